// Core library for mongolog-ingest: mongod operation log lines to InfluxDB points

pub mod backend;
pub mod cli;
pub mod config;
pub mod config_file;
pub mod consumer;
pub mod logging;
pub mod model;
pub mod parser;
pub mod platform;
pub mod producer;
pub mod queue;
pub mod runner;
pub mod sink;
pub mod source;
pub mod stats;
pub mod timestamp;
pub mod worker_proc;

pub use config::IngestConfig;
pub use model::{OperationKind, PipelineTags, Point, RawLine};
pub use parser::{LineOutcome, OperationParser, ParseError, SkipReason};
pub use runner::Runner;
pub use stats::{ConsumerStats, RunReport};
