//! Child side of the process backend
//!
//! The parent starts each child with nothing but its worker id on the command
//! line. The first line on the child's stdin is its [`WorkerSpec`] as JSON, so
//! database credentials never show up in the process table. Length-prefixed
//! frames follow:
//!
//! ```text
//! <line_number> <offset> <len>\n<len raw bytes>
//! ```
//!
//! Closing stdin is the shutdown sentinel. The child closes its end as soon as
//! its consumer stops, which fails the parent's next write instead of letting
//! lines pile up in a pipe nobody reads. Raw bytes are passed through
//! untouched so invalid UTF-8 is reported by the child's parser exactly as a
//! thread consumer would report it. When the consumer finishes the child
//! prints one `@@report <json>` line with its counters on stdout.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Read, Write};
use tracing::error;

use crate::consumer::{Consumer, ConsumerSettings};
use crate::logging::LogSettings;
use crate::model::{PipelineTags, RawLine};
use crate::parser::OperationParser;
use crate::queue::WorkItem;
use crate::sink::{RetryPolicy, RetryingSink, SinkSettings};
use crate::stats::ConsumerStats;

/// Marks the stats line among a child's stdout output
pub const REPORT_PREFIX: &str = "@@report ";

/// Largest line a frame may carry
pub const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Everything a worker process needs to build its consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub tags: PipelineTags,
    pub consumer: ConsumerSettings,
    pub retry: RetryPolicy,
    pub sink: SinkSettings,
    pub log: LogSettings,
}

impl WorkerSpec {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize worker configuration")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid worker configuration")
    }
}

/// Send the configuration line that opens a worker's input
pub fn write_spec<W: Write>(out: &mut W, spec_json: &str) -> io::Result<()> {
    writeln!(out, "{}", spec_json)?;
    out.flush()
}

/// Read the configuration line that opens a worker's input
pub fn read_spec<R: BufRead>(input: &mut R) -> Result<WorkerSpec> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("Failed to read the worker configuration")?;
    if read == 0 {
        anyhow::bail!("No worker configuration on stdin");
    }
    WorkerSpec::from_json(line.trim_end())
}

/// Stdin as a handle the worker owns, so dropping it closes the pipe
#[cfg(unix)]
pub fn worker_input() -> Box<dyn BufRead + Send> {
    use std::fs::File;
    use std::os::unix::io::{AsRawFd, FromRawFd};

    let fd = io::stdin().as_raw_fd();
    // SAFETY: a worker reads stdin only through the returned handle, so no
    // other owner uses the descriptor after this one closes it.
    let file = unsafe { File::from_raw_fd(fd) };
    Box::new(BufReader::new(file))
}

#[cfg(not(unix))]
pub fn worker_input() -> Box<dyn BufRead + Send> {
    Box::new(BufReader::new(io::stdin()))
}

pub fn write_frame<W: Write>(out: &mut W, line: &RawLine) -> io::Result<()> {
    writeln!(
        out,
        "{} {} {}",
        line.line_number,
        line.offset,
        line.bytes.len()
    )?;
    out.write_all(&line.bytes)
}

/// Decodes frames back into work items, ending with one sentinel at clean EOF.
/// A corrupt frame is logged and ends the stream without a sentinel.
pub struct FrameReader<R> {
    input: R,
    done: bool,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, done: false }
    }

    fn read_frame(&mut self) -> io::Result<Option<RawLine>> {
        let mut header = String::new();
        if self.input.read_line(&mut header)? == 0 {
            return Ok(None);
        }

        let mut parts = header.trim_end_matches('\n').split(' ');
        let mut field = |name: &str| -> io::Result<u64> {
            parts
                .next()
                .and_then(|part| part.parse::<u64>().ok())
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("bad frame header {:?}: missing {}", header.trim_end(), name),
                    )
                })
        };
        let line_number = field("line number")?;
        let offset = field("offset")?;
        let len = field("length")?;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN),
            ));
        }

        let mut bytes = vec![0u8; len as usize];
        self.input.read_exact(&mut bytes)?;
        Ok(Some(RawLine::new(bytes, line_number, offset)))
    }
}

impl<R: BufRead> Iterator for FrameReader<R> {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(line)) => Some(WorkItem::Line(line)),
            Ok(None) => {
                self.done = true;
                Some(WorkItem::Shutdown)
            }
            Err(e) => {
                error!(error = %e, "unable to read work from the parent process");
                self.done = true;
                None
            }
        }
    }
}

pub fn format_report(stats: &ConsumerStats) -> Result<String> {
    let json = serde_json::to_string(stats).context("Failed to serialize worker stats")?;
    Ok(format!("{}{}", REPORT_PREFIX, json))
}

/// Parse a report line, `None` for ordinary output
pub fn parse_report(line: &str) -> Option<Result<ConsumerStats>> {
    line.strip_prefix(REPORT_PREFIX).map(|json| {
        serde_json::from_str(json).context("Invalid stats report from worker process")
    })
}

/// Entry point of `mongolog-ingest worker`, reading frames from `input`
pub fn run_worker<R: BufRead>(
    worker_id: usize,
    spec: &WorkerSpec,
    input: R,
) -> Result<ConsumerStats> {
    let sink = spec
        .sink
        .build()
        .with_context(|| format!("Worker {} failed to create its sink", worker_id))?;
    let consumer = Consumer::new(
        worker_id,
        OperationParser::new(spec.tags.clone()),
        RetryingSink::new(sink, spec.retry),
        spec.consumer,
    );

    let stats = consumer.process(FrameReader::new(input));

    let report = format_report(&stats)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", report).context("Failed to send stats to the parent process")?;
    out.flush()?;
    Ok(stats)
}
