use std::path::PathBuf;
use std::time::Duration;

use crate::backend::ExecutionMode;
use crate::cli::{Cli, RunArgs};
use crate::config_file::ConfigFile;
use crate::consumer::{ConsumerSettings, DEFAULT_BATCH_SIZE};
use crate::logging::LogSettings;
use crate::model::PipelineTags;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::sink::{InfluxSettings, RetryPolicy, SinkSettings};
use crate::worker_proc::WorkerSpec;

pub const DEFAULT_WORKERS: usize = 8;

/// Fully resolved configuration for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub input: PathBuf,
    pub tags: PipelineTags,
    pub influx: InfluxSettings,
    pub dry_run: bool,
    pub performance: PerformanceConfig,
    pub consumer: ConsumerSettings,
    pub retry: RetryPolicy,
    pub log: LogSettings,
}

/// How the work is spread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceConfig {
    pub workers: usize,
    pub mode: ExecutionMode,
    /// Single consumer on the calling thread, no queue
    pub debug: bool,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no input file given")]
    MissingInput,

    #[error("--{flag} is required (or set {key} in the [tags] section of the config file)")]
    MissingTag {
        flag: &'static str,
        key: &'static str,
    },

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl IngestConfig {
    /// Merge command-line arguments over config-file values over defaults
    pub fn resolve(args: &RunArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let input = args.input.clone().ok_or(ConfigError::MissingInput)?;

        let project = non_empty(args.project.clone().or_else(|| file.tags.project.clone()))
            .ok_or(ConfigError::MissingTag {
                flag: "project",
                key: "project",
            })?;
        let hostname = non_empty(args.hostname.clone().or_else(|| file.tags.hostname.clone()))
            .ok_or(ConfigError::MissingTag {
                flag: "hostname",
                key: "hostname",
            })?;

        let defaults = InfluxSettings::default();
        let influx = InfluxSettings {
            host: args
                .influxdb_host
                .clone()
                .or_else(|| file.influxdb.host.clone())
                .unwrap_or(defaults.host),
            port: args
                .influxdb_port
                .or(file.influxdb.port)
                .unwrap_or(defaults.port),
            database: args
                .database
                .clone()
                .or_else(|| file.influxdb.database.clone())
                .unwrap_or(defaults.database),
            ssl: args.ssl || file.influxdb.ssl.unwrap_or(defaults.ssl),
            username: file.influxdb.username.clone(),
            password: file.influxdb.password.clone(),
            timeout_secs: file.influxdb.timeout_secs.unwrap_or(defaults.timeout_secs),
        };
        if influx.host.trim().is_empty() {
            return Err(invalid("influxdb host", "must not be empty"));
        }
        if influx.database.trim().is_empty() {
            return Err(invalid("database", "must not be empty"));
        }

        let workers = args
            .workers
            .or(file.pipeline.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        let batch_size = args
            .batch_size
            .or(file.pipeline.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(invalid("batch size", "must be at least 1"));
        }
        let queue_capacity = args
            .queue_capacity
            .or(file.pipeline.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(invalid("queue capacity", "must be at least 1"));
        }

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: args
                .max_attempts
                .or(file.retry.max_attempts)
                .unwrap_or(retry_defaults.max_attempts),
            base_delay: args
                .retry_base_ms
                .or(file.retry.base_delay_ms)
                .map_or(retry_defaults.base_delay, Duration::from_millis),
            max_delay: args
                .retry_max_ms
                .or(file.retry.max_delay_ms)
                .map_or(retry_defaults.max_delay, Duration::from_millis),
        };
        if retry.max_attempts == 0 {
            return Err(invalid("max attempts", "must be at least 1"));
        }
        if retry.base_delay > retry.max_delay {
            return Err(invalid(
                "retry delays",
                format!(
                    "base delay {}ms exceeds max delay {}ms",
                    retry.base_delay.as_millis(),
                    retry.max_delay.as_millis()
                ),
            ));
        }

        let log_defaults = LogSettings::default();
        let log = LogSettings {
            level: args
                .log_level
                .clone()
                .or_else(|| file.logging.level.clone())
                .unwrap_or(log_defaults.level),
            format: args
                .log_format
                .or(file.logging.format)
                .unwrap_or(log_defaults.format),
        };

        Ok(Self {
            input,
            tags: PipelineTags { project, hostname },
            influx,
            dry_run: args.dry_run,
            performance: PerformanceConfig {
                workers,
                mode: Cli::requested_mode(args)
                    .or(file.pipeline.mode)
                    .unwrap_or_default(),
                debug: args.debug,
                queue_capacity,
            },
            consumer: ConsumerSettings {
                batch_size,
                on_malformed: args
                    .on_malformed
                    .or(file.pipeline.on_malformed)
                    .unwrap_or_default(),
            },
            retry,
            log,
        })
    }

    pub fn sink_settings(&self) -> SinkSettings {
        if self.dry_run {
            SinkSettings::Stdout
        } else {
            SinkSettings::Influx(self.influx.clone())
        }
    }

    /// What every worker, thread or process, is built from
    pub fn worker_spec(&self) -> WorkerSpec {
        WorkerSpec {
            tags: self.tags.clone(),
            consumer: self.consumer,
            retry: self.retry,
            sink: self.sink_settings(),
            log: self.log.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MalformedLinePolicy;
    use crate::logging::LogFormat;

    fn args() -> RunArgs {
        RunArgs {
            input: Some(PathBuf::from("mongod.log")),
            hostname: Some("db1".to_string()),
            project: Some("shop".to_string()),
            ..RunArgs::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::resolve(&args(), &ConfigFile::default()).unwrap();
        assert_eq!(config.influx.host, "localhost");
        assert_eq!(config.influx.port, 8086);
        assert_eq!(config.influx.database, "insight");
        assert!(!config.influx.ssl);
        assert_eq!(config.performance.workers, 8);
        assert_eq!(config.performance.mode, ExecutionMode::Thread);
        assert_eq!(config.performance.queue_capacity, 10_000);
        assert_eq!(config.consumer.batch_size, 5000);
        assert_eq!(config.consumer.on_malformed, MalformedLinePolicy::StopWorker);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_cli_wins_over_file() {
        let file = ConfigFile::parse(
            "[tags]\nproject = \"file-project\"\n[pipeline]\nworkers = 2\nbatch_size = 10\nmode = \"process\"\n",
        )
        .unwrap();
        let mut run = args();
        run.workers = Some(5);
        run.mode = Some(ExecutionMode::Thread);
        let config = IngestConfig::resolve(&run, &file).unwrap();
        assert_eq!(config.tags.project, "shop");
        assert_eq!(config.performance.workers, 5);
        assert_eq!(config.consumer.batch_size, 10);
        assert_eq!(config.performance.mode, ExecutionMode::Thread);
    }

    #[test]
    fn test_tags_from_file() {
        let file = ConfigFile::parse("[tags]\nproject = \"p\"\nhostname = \"h\"\n").unwrap();
        let run = RunArgs {
            input: Some(PathBuf::from("-")),
            ..RunArgs::default()
        };
        let config = IngestConfig::resolve(&run, &file).unwrap();
        assert_eq!(
            config.tags,
            PipelineTags {
                project: "p".to_string(),
                hostname: "h".to_string()
            }
        );
    }

    #[test]
    fn test_missing_tags_and_input() {
        let mut run = args();
        run.project = None;
        assert!(matches!(
            IngestConfig::resolve(&run, &ConfigFile::default()),
            Err(ConfigError::MissingTag { flag: "project", .. })
        ));

        let mut run = args();
        run.hostname = Some("  ".to_string());
        assert!(matches!(
            IngestConfig::resolve(&run, &ConfigFile::default()),
            Err(ConfigError::MissingTag { flag: "hostname", .. })
        ));

        let mut run = args();
        run.input = None;
        assert_eq!(
            IngestConfig::resolve(&run, &ConfigFile::default()),
            Err(ConfigError::MissingInput)
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        for mutate in [
            (|a: &mut RunArgs| a.workers = Some(0)) as fn(&mut RunArgs),
            |a: &mut RunArgs| a.batch_size = Some(0),
            |a: &mut RunArgs| a.queue_capacity = Some(0),
            |a: &mut RunArgs| a.max_attempts = Some(0),
        ] {
            let mut run = args();
            mutate(&mut run);
            assert!(matches!(
                IngestConfig::resolve(&run, &ConfigFile::default()),
                Err(ConfigError::Invalid { .. })
            ));
        }
    }

    #[test]
    fn test_retry_bounds() {
        let mut run = args();
        run.retry_base_ms = Some(5000);
        run.retry_max_ms = Some(100);
        assert!(IngestConfig::resolve(&run, &ConfigFile::default()).is_err());
    }

    #[test]
    fn test_fork_and_dry_run() {
        let mut run = args();
        run.fork = true;
        run.dry_run = true;
        let config = IngestConfig::resolve(&run, &ConfigFile::default()).unwrap();
        assert_eq!(config.performance.mode, ExecutionMode::Process);
        assert_eq!(config.sink_settings(), SinkSettings::Stdout);
        assert_eq!(config.worker_spec().sink, SinkSettings::Stdout);
    }
}
