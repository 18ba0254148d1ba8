use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use super::{PointSink, SinkError};
use crate::model::Point;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Why a batch never reached the sink
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("write rejected: {0}")]
    Rejected(#[source] SinkError),

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: SinkError,
    },
}

/// Wraps a sink with the retry policy and the write log messages
pub struct RetryingSink<S> {
    sink: S,
    policy: RetryPolicy,
    sleep: fn(Duration),
}

impl<S: PointSink> RetryingSink<S> {
    pub fn new(sink: S, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            sleep: std::thread::sleep,
        }
    }

    /// Replace the function used to wait between attempts
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn inner(&self) -> &S {
        &self.sink
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write one batch. `up_to_line` is the last line number the consumer
    /// processed, used only for logging. An empty batch is not sent.
    pub fn write(&mut self, points: &[Point], up_to_line: u64) -> Result<(), WriteError> {
        if points.is_empty() {
            info!(
                line_number = up_to_line,
                "points are empty, skipping. Please check your data set"
            );
            return Ok(());
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.sink.write_points(points) {
                Ok(()) => {
                    info!(
                        "wrote {} points to {}, processed up to line {}",
                        points.len(),
                        self.sink.describe(),
                        up_to_line
                    );
                    return Ok(());
                }
                Err(e) if !e.is_transient() => {
                    error!(error = %e, "unable to write to {}", self.sink.describe());
                    return Err(WriteError::Rejected(e));
                }
                Err(e) if attempt >= max_attempts => {
                    error!(error = %e, attempts = attempt, "unable to write to {}", self.sink.describe());
                    return Err(WriteError::RetriesExhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write to {} failed, retrying",
                        self.sink.describe()
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OperationFields, OperationKind, OperationTags, PipelineTags};
    use chrono::Utc;
    use std::collections::VecDeque;

    /// Sink that replays a fixed list of results
    struct ScriptedSink {
        script: VecDeque<Result<(), SinkError>>,
        calls: u32,
    }

    impl ScriptedSink {
        fn new(script: Vec<Result<(), SinkError>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
            }
        }
    }

    impl PointSink for ScriptedSink {
        fn write_points(&mut self, _points: &[Point]) -> Result<(), SinkError> {
            self.calls += 1;
            self.script.pop_front().unwrap_or(Ok(()))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn no_sleep(_: Duration) {}

    fn point() -> Point {
        let tags = OperationTags::new(
            &PipelineTags {
                project: "p".to_string(),
                hostname: "h".to_string(),
            },
            OperationKind::Insert,
        );
        Point::new(Utc::now(), tags, OperationFields::new(1))
    }

    fn refused() -> SinkError {
        SinkError::Connection {
            endpoint: "http://localhost:8086".to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(64));
        assert_eq!(policy.delay_for(7), Duration::from_secs(120));
        assert_eq!(policy.delay_for(200), Duration::from_secs(120));
    }

    #[test]
    fn test_empty_batch_is_not_sent() {
        let mut sink = RetryingSink::new(ScriptedSink::new(vec![]), RetryPolicy::default());
        assert!(sink.write(&[], 10).is_ok());
        assert_eq!(sink.inner().calls, 0);
    }

    #[test]
    fn test_transient_failure_then_success() {
        let script = vec![Err(refused()), Err(refused()), Ok(())];
        let mut sink = RetryingSink::new(ScriptedSink::new(script), RetryPolicy::default())
            .with_sleep(no_sleep);
        assert!(sink.write(&[point()], 7).is_ok());
        assert_eq!(sink.inner().calls, 3);
    }

    #[test]
    fn test_retries_exhausted() {
        let script = (0..10).map(|_| Err(refused())).collect();
        let mut sink = RetryingSink::new(ScriptedSink::new(script), RetryPolicy::default())
            .with_sleep(no_sleep);
        match sink.write(&[point()], 7) {
            Err(WriteError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert!(last.is_transient());
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
        assert_eq!(sink.inner().calls, 5);
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let script = vec![Err(SinkError::Client {
            status: 400,
            body: "partial write".to_string(),
        })];
        let mut sink = RetryingSink::new(ScriptedSink::new(script), RetryPolicy::default())
            .with_sleep(no_sleep);
        assert!(matches!(
            sink.write(&[point()], 1),
            Err(WriteError::Rejected(SinkError::Client { status: 400, .. }))
        ));
        assert_eq!(sink.inner().calls, 1);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let mut sink =
            RetryingSink::new(ScriptedSink::new(vec![Err(refused())]), policy).with_sleep(no_sleep);
        assert!(matches!(
            sink.write(&[point()], 1),
            Err(WriteError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
