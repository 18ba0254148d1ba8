//! Consumer loop: parse lines, batch points, flush them through the sink

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use crate::model::Batch;
use crate::parser::{LineOutcome, OperationParser, SkipReason};
use crate::queue::WorkItem;
use crate::sink::{PointSink, RetryingSink};
use crate::stats::ConsumerStats;

/// Default number of points per write
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// What a consumer does with a line it cannot parse
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedLinePolicy {
    /// Log the error, flush pending points and stop this consumer
    #[default]
    StopWorker,
    /// Log the error and carry on with the next line
    SkipLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    pub on_malformed: MalformedLinePolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_malformed: MalformedLinePolicy::default(),
        }
    }
}

pub struct Consumer<S> {
    id: usize,
    parser: OperationParser,
    sink: RetryingSink<S>,
    batch: Batch,
    on_malformed: MalformedLinePolicy,
    stats: ConsumerStats,
    last_line: u64,
}

impl<S: PointSink> Consumer<S> {
    pub fn new(
        id: usize,
        parser: OperationParser,
        sink: RetryingSink<S>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            id,
            parser,
            sink,
            batch: Batch::new(settings.batch_size),
            on_malformed: settings.on_malformed,
            stats: ConsumerStats::new(),
            last_line: 0,
        }
    }

    /// Run until a sentinel arrives, the input ends, or a malformed line
    /// stops the worker. Pending points are always flushed before returning.
    ///
    /// The input is dropped as soon as the loop ends, before the final write,
    /// so whoever feeds this consumer sees it go away without waiting on the
    /// sink.
    pub fn process<I>(mut self, items: I) -> ConsumerStats
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let span = info_span!("worker", id = self.id);
        let _guard = span.enter();
        info!("worker started, writing to {}", self.sink.inner().describe());

        let mut items = items.into_iter();
        let mut got_sentinel = false;
        for item in items.by_ref() {
            let raw = match item {
                WorkItem::Shutdown => {
                    debug!("received shutdown sentinel");
                    got_sentinel = true;
                    break;
                }
                WorkItem::Line(raw) => raw,
            };

            self.stats.lines_received += 1;
            self.last_line = raw.line_number;

            match self.parser.parse(&raw.bytes) {
                LineOutcome::Parsed(point) => {
                    self.stats.points_parsed += 1;
                    self.batch.push(point);
                }
                LineOutcome::Skipped(SkipReason::NotCandidate) => {
                    self.stats.skipped += 1;
                    debug!(line_number = raw.line_number, "skipping line");
                }
                LineOutcome::Skipped(SkipReason::NonOperation(operation)) => {
                    self.stats.non_operation += 1;
                    debug!(
                        line_number = raw.line_number,
                        operation = %operation,
                        "skipping non-operation line"
                    );
                }
                LineOutcome::Malformed(e) => {
                    self.stats.malformed += 1;
                    error!(
                        line_number = raw.line_number,
                        offset = raw.offset,
                        error = %e,
                        "unable to parse line"
                    );
                    if self.on_malformed == MalformedLinePolicy::StopWorker {
                        self.stats.stopped_early = true;
                        break;
                    }
                }
            }

            self.flush(false);
        }

        if !got_sentinel && !self.stats.stopped_early {
            warn!("work stream ended without a shutdown sentinel");
            self.stats.stopped_early = true;
        }
        drop(items);

        self.flush(true);
        info!(
            lines = self.stats.lines_received,
            points_written = self.stats.points_written,
            points_dropped = self.stats.points_dropped,
            "worker complete"
        );
        self.stats
    }

    /// Write the batch when it is full, or unconditionally when `force` is set.
    /// The batch is empty afterwards whether or not the write succeeded.
    fn flush(&mut self, force: bool) {
        if !force && !self.batch.is_full() {
            return;
        }
        let points = self.batch.take();
        match self.sink.write(&points, self.last_line) {
            Ok(()) if points.is_empty() => {}
            Ok(()) => self.stats.record_written(points.len()),
            Err(e) => {
                error!(
                    error = %e,
                    points = points.len(),
                    line_number = self.last_line,
                    "dropping batch"
                );
                self.stats.record_dropped(points.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PipelineTags, Point, RawLine};
    use crate::sink::{MemorySink, RetryPolicy, SinkError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const GOOD: &str = "2024-01-01T00:00:00.000+0000 I COMMAND [conn1] command test.foo command: find { find: \"foo\" } planSummary: IXSCAN keysExamined:10 docsExamined:5 numYields:0 reslen:220 locks:{...} protocol:op_query 12ms\n";
    const BAD: &str = "2024-01-01T00:00:00.000+0000 I WRITE [conn2] insert test.foo query: { x: 1 } ninserted:1 keysInserted:1 12ms\n";

    fn parser() -> OperationParser {
        OperationParser::new(PipelineTags {
            project: "acme".to_string(),
            hostname: "db1".to_string(),
        })
    }

    fn items(lines: &[&str], sentinel: bool) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = lines
            .iter()
            .enumerate()
            .map(|(i, l)| WorkItem::Line(RawLine::new(l.as_bytes().to_vec(), i as u64 + 1, 0)))
            .collect();
        if sentinel {
            items.push(WorkItem::Shutdown);
        }
        items
    }

    fn consumer(
        sink: MemorySink,
        batch_size: usize,
        on_malformed: MalformedLinePolicy,
    ) -> Consumer<MemorySink> {
        Consumer::new(
            0,
            parser(),
            RetryingSink::new(sink, RetryPolicy::default()),
            ConsumerSettings {
                batch_size,
                on_malformed,
            },
        )
    }

    #[test]
    fn test_batches_are_ceil_of_points_over_size() {
        let sink = MemorySink::new();
        let lines = vec![GOOD; 7];
        let stats = consumer(sink.clone(), 3, MalformedLinePolicy::StopWorker)
            .process(items(&lines, true));

        let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(stats.points_written, 7);
        assert_eq!(stats.batches_written, 3);
        assert!(!stats.stopped_early);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_write() {
        let sink = MemorySink::new();
        let lines = vec![GOOD; 4];
        consumer(sink.clone(), 2, MalformedLinePolicy::StopWorker).process(items(&lines, true));
        assert_eq!(sink.batch_count(), 2);
    }

    #[test]
    fn test_skips_are_counted() {
        let sink = MemorySink::new();
        let lines = [
            "2024-01-01T00:00:00.000+0000 I NETWORK [listener] connection accepted\n",
            "2024-01-01T00:00:00.000+0000 I COMMAND [conn3] killcursors test.foo 2ms\n",
            "\n",
            GOOD,
        ];
        let stats = consumer(sink.clone(), 10, MalformedLinePolicy::StopWorker)
            .process(items(&lines, true));
        assert_eq!(stats.lines_received, 4);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.non_operation, 1);
        assert_eq!(stats.points_written, 1);
    }

    #[test]
    fn test_stop_worker_flushes_pending_points() {
        let sink = MemorySink::new();
        let lines = [GOOD, GOOD, BAD, GOOD];
        let stats = consumer(sink.clone(), 10, MalformedLinePolicy::StopWorker)
            .process(items(&lines, true));
        assert!(stats.stopped_early);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.lines_received, 3);
        assert_eq!(sink.points().len(), 2);
    }

    #[test]
    fn test_skip_line_continues() {
        let sink = MemorySink::new();
        let lines = [GOOD, BAD, GOOD];
        let stats = consumer(sink.clone(), 10, MalformedLinePolicy::SkipLine)
            .process(items(&lines, true));
        assert!(!stats.stopped_early);
        assert_eq!(stats.malformed, 1);
        assert_eq!(sink.points().len(), 2);
    }

    #[test]
    fn test_items_after_sentinel_are_not_consumed() {
        let sink = MemorySink::new();
        let mut work = items(&[GOOD], true);
        work.push(WorkItem::Line(RawLine::new(GOOD.as_bytes().to_vec(), 9, 0)));
        let mut iter = work.into_iter();
        let stats = consumer(sink.clone(), 10, MalformedLinePolicy::StopWorker).process(&mut iter);
        assert_eq!(stats.lines_received, 1);
        assert_eq!(iter.count(), 1);
    }

    #[test]
    fn test_missing_sentinel_marks_early_stop() {
        let sink = MemorySink::new();
        let stats = consumer(sink.clone(), 10, MalformedLinePolicy::StopWorker)
            .process(items(&[GOOD], false));
        assert!(stats.stopped_early);
        assert_eq!(sink.points().len(), 1);
    }

    struct AlwaysDown;

    impl PointSink for AlwaysDown {
        fn write_points(&mut self, _points: &[Point]) -> Result<(), SinkError> {
            Err(SinkError::Server {
                status: 500,
                body: "down".to_string(),
            })
        }

        fn describe(&self) -> String {
            "down".to_string()
        }
    }

    #[test]
    fn test_failed_batches_are_dropped_and_counted() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let consumer = Consumer::new(
            1,
            parser(),
            RetryingSink::new(AlwaysDown, policy),
            ConsumerSettings {
                batch_size: 2,
                on_malformed: MalformedLinePolicy::StopWorker,
            },
        );
        let stats = consumer.process(items(&[GOOD, GOOD, GOOD], true));
        assert_eq!(stats.points_parsed, 3);
        assert_eq!(stats.points_dropped, 3);
        assert_eq!(stats.batches_dropped, 2);
        assert_eq!(stats.points_written, 0);
    }

    /// Work source that records when the consumer lets go of it
    struct TrackedInput {
        items: std::vec::IntoIter<WorkItem>,
        released: Arc<AtomicBool>,
    }

    impl Iterator for TrackedInput {
        type Item = WorkItem;

        fn next(&mut self) -> Option<WorkItem> {
            self.items.next()
        }
    }

    impl Drop for TrackedInput {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Notes, for every write, whether the input had been released already
    struct ReleaseCheckSink {
        released: Arc<AtomicBool>,
        writes: Arc<Mutex<Vec<bool>>>,
    }

    impl PointSink for ReleaseCheckSink {
        fn write_points(&mut self, _points: &[Point]) -> Result<(), SinkError> {
            let released = self.released.load(Ordering::SeqCst);
            self.writes.lock().unwrap().push(released);
            Ok(())
        }

        fn describe(&self) -> String {
            "release check".to_string()
        }
    }

    #[test]
    fn test_input_is_released_before_the_final_write() {
        let released = Arc::new(AtomicBool::new(false));
        let input = TrackedInput {
            items: items(&[GOOD, BAD, GOOD], true).into_iter(),
            released: released.clone(),
        };
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = ReleaseCheckSink {
            released: released.clone(),
            writes: writes.clone(),
        };
        let consumer = Consumer::new(
            0,
            parser(),
            RetryingSink::new(sink, RetryPolicy::default()),
            ConsumerSettings {
                batch_size: 10,
                on_malformed: MalformedLinePolicy::StopWorker,
            },
        );
        let stats = consumer.process(input);
        assert!(stats.stopped_early);
        assert_eq!(stats.points_written, 1);
        assert_eq!(*writes.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&MalformedLinePolicy::SkipLine).unwrap(),
            "\"skip-line\""
        );
    }
}
