// Command-line interface definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::backend::ExecutionMode;
use crate::consumer::MalformedLinePolicy;
use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "mongolog-ingest")]
#[command(about = "Load mongod operation timings from a log file into InfluxDB")]
#[command(
    long_about = "Load mongod operation timings from a log file into InfluxDB\n\nEvery slow-operation line (a line ending in \"<N>ms\") becomes one point in the\n\"operations\" measurement, tagged with the operation, namespace, connection and\nplan summary, with the lock and document counters as integer fields.\n\nEXAMPLES:\n  mongolog-ingest -n db1 -p shop mongod.log\n  mongolog-ingest -n db1 -p shop -w 4 --fork mongod.log.gz\n  mongolog-ingest -n db1 -p shop --dry-run mongod.log | head"
)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
#[command(subcommand_negates_reqs = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Internal: one worker of --fork mode; reads its configuration and
    /// then frames from stdin
    #[command(hide = true)]
    Worker {
        #[arg(long = "worker-id")]
        worker_id: usize,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// mongod log file to import (gzip and zstd are detected); "-" reads stdin
    pub input: Option<PathBuf>,

    /// Tag every point with this hostname
    #[arg(short = 'n', long = "hostname", help_heading = "Tags")]
    pub hostname: Option<String>,

    /// Tag every point with this project name
    #[arg(short = 'p', long = "project", help_heading = "Tags")]
    pub project: Option<String>,

    /// InfluxDB host
    #[arg(short = 'i', long = "influxdb-host", help_heading = "InfluxDB")]
    pub influxdb_host: Option<String>,

    /// InfluxDB HTTP port [default: 8086]
    #[arg(long = "influxdb-port", help_heading = "InfluxDB")]
    pub influxdb_port: Option<u16>,

    /// InfluxDB database [default: insight]
    #[arg(short = 'd', long = "database", help_heading = "InfluxDB")]
    pub database: Option<String>,

    /// Connect to InfluxDB over HTTPS
    #[arg(short = 's', long = "ssl", help_heading = "InfluxDB")]
    pub ssl: bool,

    /// Print line protocol to stdout instead of writing to InfluxDB
    #[arg(long = "dry-run", help_heading = "InfluxDB")]
    pub dry_run: bool,

    /// Points per write [default: 5000]
    #[arg(short = 'b', long = "batch-size", help_heading = "Pipeline")]
    pub batch_size: Option<usize>,

    /// Number of consumers [default: 8]
    #[arg(short = 'w', long = "workers", help_heading = "Pipeline")]
    pub workers: Option<usize>,

    /// Run consumers as child processes (same as --mode process)
    #[arg(
        short = 'f',
        long = "fork",
        help_heading = "Pipeline",
        conflicts_with = "mode"
    )]
    pub fork: bool,

    /// Worker backend [default: thread]
    #[arg(long = "mode", value_enum, help_heading = "Pipeline")]
    pub mode: Option<ExecutionMode>,

    /// Parse with a single consumer on the main thread, without a queue
    #[arg(long = "debug", help_heading = "Pipeline")]
    pub debug: bool,

    /// Lines buffered between the reader and the consumers [default: 10000]
    #[arg(long = "queue-capacity", help_heading = "Pipeline")]
    pub queue_capacity: Option<usize>,

    /// What a consumer does with a line it cannot parse [default: stop-worker]
    #[arg(long = "on-malformed", value_enum, help_heading = "Pipeline")]
    pub on_malformed: Option<MalformedLinePolicy>,

    /// Write attempts per batch, including the first [default: 5]
    #[arg(long = "max-attempts", help_heading = "Retry")]
    pub max_attempts: Option<u32>,

    /// Delay before the first retry in milliseconds [default: 1000]
    #[arg(long = "retry-base-ms", help_heading = "Retry")]
    pub retry_base_ms: Option<u64>,

    /// Upper bound for the retry delay in milliseconds [default: 120000]
    #[arg(long = "retry-max-ms", help_heading = "Retry")]
    pub retry_max_ms: Option<u64>,

    /// Log level or filter directives; RUST_LOG takes precedence [default: info]
    #[arg(long = "log-level", help_heading = "Logging")]
    pub log_level: Option<String>,

    /// Log output format [default: text]
    #[arg(long = "log-format", value_enum, help_heading = "Logging")]
    pub log_format: Option<LogFormat>,

    /// Read settings from this TOML file instead of searching for one
    #[arg(long = "config", help_heading = "Configuration", conflicts_with = "ignore_config")]
    pub config: Option<PathBuf>,

    /// Do not load any configuration file
    #[arg(long = "ignore-config", help_heading = "Configuration")]
    pub ignore_config: bool,
}

impl Cli {
    /// Backend requested on the command line, if any
    pub fn requested_mode(args: &RunArgs) -> Option<ExecutionMode> {
        if args.fork {
            Some(ExecutionMode::Process)
        } else {
            args.mode
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from([
            "mongolog-ingest",
            "-n",
            "db1",
            "-p",
            "shop",
            "-b",
            "100",
            "-w",
            "3",
            "-d",
            "metrics",
            "-i",
            "influx.local",
            "-s",
            "-f",
            "mongod.log",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        let run = cli.run;
        assert_eq!(run.hostname.as_deref(), Some("db1"));
        assert_eq!(run.project.as_deref(), Some("shop"));
        assert_eq!(run.batch_size, Some(100));
        assert_eq!(run.workers, Some(3));
        assert_eq!(run.database.as_deref(), Some("metrics"));
        assert_eq!(run.influxdb_host.as_deref(), Some("influx.local"));
        assert!(run.ssl);
        assert_eq!(Cli::requested_mode(&run), Some(ExecutionMode::Process));
        assert_eq!(run.input, Some(PathBuf::from("mongod.log")));
    }

    #[test]
    fn test_value_enums() {
        let cli = Cli::try_parse_from([
            "mongolog-ingest",
            "--mode",
            "thread",
            "--on-malformed",
            "skip-line",
            "--log-format",
            "json",
            "x.log",
        ])
        .unwrap();
        assert_eq!(cli.run.mode, Some(ExecutionMode::Thread));
        assert_eq!(cli.run.on_malformed, Some(MalformedLinePolicy::SkipLine));
        assert_eq!(cli.run.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_fork_conflicts_with_mode() {
        let result = Cli::try_parse_from(["mongolog-ingest", "-f", "--mode", "thread", "x.log"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_subcommand() {
        let cli = Cli::try_parse_from(["mongolog-ingest", "worker", "--worker-id", "2"]).unwrap();
        match cli.command {
            Some(Command::Worker { worker_id }) => assert_eq!(worker_id, 2),
            None => panic!("expected the worker subcommand"),
        }
        assert!(Cli::try_parse_from([
            "mongolog-ingest",
            "worker",
            "--worker-id",
            "2",
            "--config-json",
            "{}",
        ])
        .is_err());
    }
}
