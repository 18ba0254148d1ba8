//! Destinations for parsed points
//!
//! Every consumer owns its own [`PointSink`]; nothing here is shared between
//! workers except the stdout writer used for dry runs.

mod influx;
mod memory;
mod retry;
mod stdout;

pub use influx::{InfluxSettings, InfluxSink};
pub use memory::MemorySink;
pub use retry::{RetryPolicy, RetryingSink, WriteError};
pub use stdout::StdoutSink;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::Point;

/// Something that accepts a batch of points in one call
pub trait PointSink: Send {
    fn write_points(&mut self, points: &[Point]) -> Result<(), SinkError>;

    /// Short description for log messages, e.g. the endpoint URL
    fn describe(&self) -> String;
}

impl<S: PointSink + ?Sized> PointSink for Box<S> {
    fn write_points(&mut self, points: &[Point]) -> Result<(), SinkError> {
        (**self).write_points(points)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("unable to connect to {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("TLS error talking to {endpoint}: {message}")]
    Tls { endpoint: String, message: String },

    #[error("write rejected with status {status}: {body}")]
    Client { status: u16, body: String },

    #[error("invalid request: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Failures worth retrying: the same payload may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Connection { .. }
            | SinkError::Server { .. }
            | SinkError::Tls { .. }
            | SinkError::Io(_) => true,
            SinkError::Client { .. } | SinkError::Request(_) => false,
        }
    }
}

/// Which sink each worker builds. Serialisable so worker processes can build
/// their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkSettings {
    Influx(InfluxSettings),
    /// Dry run: line protocol on stdout
    Stdout,
}

impl SinkSettings {
    pub fn build(&self) -> anyhow::Result<Box<dyn PointSink>> {
        match self {
            SinkSettings::Influx(settings) => Ok(Box::new(InfluxSink::new(settings.clone())?)),
            SinkSettings::Stdout => Ok(Box::new(StdoutSink::stdout())),
        }
    }
}

/// Newline separated line protocol, one record per point
pub fn encode_body(points: &[Point]) -> String {
    let mut body = String::with_capacity(points.len() * 256);
    for point in points {
        body.push_str(&point.to_line_protocol());
        body.push('\n');
    }
    body
}

/// Builds one sink per worker
pub type SinkFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn PointSink>> + Send + Sync>;

/// Factory building sinks from settings
pub fn factory_for(settings: SinkSettings) -> SinkFactory {
    Arc::new(move || settings.build())
}
