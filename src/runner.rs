//! Pipeline execution
//!
//! Wires the line source, queue, producer and worker pool together, or runs a
//! single consumer inline in debug mode.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use crate::backend::{ExecutionMode, WorkerPool};
use crate::config::IngestConfig;
use crate::consumer::Consumer;
use crate::parser::OperationParser;
use crate::producer::Producer;
use crate::queue::work_queue;
use crate::sink::{factory_for, RetryingSink, SinkFactory};
use crate::source::LineSource;
use crate::stats::RunReport;

pub struct Runner {
    config: IngestConfig,
    sink_factory: SinkFactory,
    worker_exe: Option<PathBuf>,
}

impl Runner {
    pub fn new(config: IngestConfig) -> Self {
        let sink_factory = factory_for(config.sink_settings());
        Self {
            config,
            sink_factory,
            worker_exe: None,
        }
    }

    /// Use a custom sink for thread and debug mode. Worker processes always
    /// build their sink from the configuration.
    pub fn with_sink_factory(mut self, sink_factory: SinkFactory) -> Self {
        self.sink_factory = sink_factory;
        self
    }

    /// Executable started for process workers; defaults to the running binary
    pub fn with_worker_exe(mut self, exe: PathBuf) -> Self {
        self.worker_exe = Some(exe);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunReport> {
        let source = LineSource::open(&self.config.input)?;
        info!(input = source.name(), "reading log");
        if self.config.performance.debug {
            self.run_debug(source)
        } else {
            self.run_pool(source)
        }
    }

    /// One consumer fed directly from the source, no queue and no threads
    fn run_debug(&self, source: LineSource) -> Result<RunReport> {
        let start = Instant::now();
        let sink = (self.sink_factory)().context("Failed to create the sink")?;
        let consumer = Consumer::new(
            0,
            OperationParser::new(self.config.tags.clone()),
            RetryingSink::new(sink, self.config.retry),
            self.config.consumer,
        );

        let mut adapter = Producer::line_adapter(source);
        let stats = consumer.process(&mut adapter);
        let summary = adapter.finish()?;

        let report = RunReport::new(summary.lines_read, &[stats], start.elapsed());
        log_report(&report);
        Ok(report)
    }

    fn run_pool(&self, source: LineSource) -> Result<RunReport> {
        let start = Instant::now();
        let performance = self.config.performance;
        let spec = self.config.worker_spec();
        let (sender, receiver) = work_queue(performance.queue_capacity);

        let pool = match performance.mode {
            ExecutionMode::Thread => WorkerPool::spawn_threads(
                performance.workers,
                receiver,
                &spec,
                &self.sink_factory,
            )?,
            ExecutionMode::Process => {
                let exe = match &self.worker_exe {
                    Some(exe) => exe.clone(),
                    None => std::env::current_exe()
                        .context("Failed to locate the executable for worker processes")?,
                };
                WorkerPool::spawn_processes(performance.workers, receiver, &spec, &exe)?
            }
        };

        let producer = Producer::new(sender);
        let produced = producer.start(source);
        // workers still get their sentinels after a read error so pending
        // points are flushed before the run fails
        producer.flush(pool.len());
        drop(producer);

        let stats = pool.join();
        let summary = produced?;
        if summary.consumers_gone {
            warn!(
                lines_read = summary.lines_read,
                "every worker stopped before the end of the input"
            );
        }

        let report = RunReport::new(summary.lines_read, &stats, start.elapsed());
        log_report(&report);
        Ok(report)
    }
}

fn log_report(report: &RunReport) {
    let t = &report.totals;
    info!(
        lines_read = report.lines_read,
        workers = report.workers,
        points_written = t.points_written,
        points_dropped = t.points_dropped,
        skipped = t.skipped + t.non_operation,
        malformed = t.malformed,
        lines_lost = t.lines_lost,
        "run complete"
    );
}
