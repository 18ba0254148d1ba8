//! Single reader feeding the work queue in input order

use anyhow::{Context, Result};
use std::io;
use tracing::{debug, info, warn};

use crate::model::RawLine;
use crate::queue::{WorkItem, WorkSender};

/// What the producer did with the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    /// Every line read, including ones not enqueued
    pub lines_read: u64,
    pub lines_enqueued: u64,
    /// All consumers exited before the input was exhausted
    pub consumers_gone: bool,
}

pub struct Producer {
    queue: WorkSender,
}

impl Producer {
    pub fn new(queue: WorkSender) -> Self {
        Self { queue }
    }

    /// Push every non-empty line onto the queue, blocking while it is full.
    ///
    /// A source read error aborts the run. Running out of consumers does not:
    /// the producer stops reading and reports it in the summary.
    pub fn start<I>(&self, source: I) -> Result<ProducerSummary>
    where
        I: IntoIterator<Item = io::Result<RawLine>>,
    {
        let mut summary = ProducerSummary::default();

        for line in source {
            let line = line.with_context(|| {
                format!("Failed to read input after line {}", summary.lines_read)
            })?;
            summary.lines_read += 1;

            if line.bytes.is_empty() {
                continue;
            }

            let line_number = line.line_number;
            debug!(line_number, "reading line");
            if self.queue.push(WorkItem::Line(line)).is_err() {
                warn!(
                    line_number,
                    "all consumers have exited, stopping the producer"
                );
                summary.consumers_gone = true;
                break;
            }
            summary.lines_enqueued += 1;
        }

        info!(
            lines_read = summary.lines_read,
            lines_enqueued = summary.lines_enqueued,
            "producer finished"
        );
        Ok(summary)
    }

    /// Enqueue one shutdown sentinel per consumer. Returns how many were
    /// accepted, which is fewer than `n` only when the consumers are gone.
    pub fn flush(&self, n: usize) -> usize {
        for sent in 0..n {
            if self.queue.push(WorkItem::Shutdown).is_err() {
                warn!(sent, requested = n, "consumers exited before all sentinels were sent");
                return sent;
            }
        }
        debug!(sentinels = n, "sentinels enqueued");
        n
    }

    /// Turn a line source into a work stream ending with one sentinel, for
    /// running a single consumer without a queue
    pub fn line_adapter<I>(source: I) -> LineAdapter<I::IntoIter>
    where
        I: IntoIterator<Item = io::Result<RawLine>>,
    {
        LineAdapter {
            source: source.into_iter(),
            summary: ProducerSummary::default(),
            error: None,
            finished: false,
        }
    }
}

/// Iterator produced by [`Producer::line_adapter`]
pub struct LineAdapter<I> {
    source: I,
    summary: ProducerSummary,
    error: Option<io::Error>,
    finished: bool,
}

impl<I> LineAdapter<I> {
    /// Summary of the lines handed out, or the read error that cut the
    /// stream short
    pub fn finish(self) -> Result<ProducerSummary> {
        match self.error {
            Some(e) => Err(anyhow::Error::new(e).context(format!(
                "Failed to read input after line {}",
                self.summary.lines_read
            ))),
            None => Ok(self.summary),
        }
    }
}

impl<I> Iterator for LineAdapter<I>
where
    I: Iterator<Item = io::Result<RawLine>>,
{
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        if self.finished {
            return None;
        }
        loop {
            match self.source.next() {
                Some(Ok(line)) => {
                    self.summary.lines_read += 1;
                    if line.bytes.is_empty() {
                        continue;
                    }
                    self.summary.lines_enqueued += 1;
                    return Some(WorkItem::Line(line));
                }
                Some(Err(e)) => {
                    self.error = Some(e);
                    self.finished = true;
                    return Some(WorkItem::Shutdown);
                }
                None => {
                    self.finished = true;
                    return Some(WorkItem::Shutdown);
                }
            }
        }
    }
}
