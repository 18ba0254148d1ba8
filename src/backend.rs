//! Worker pools: consumers on named threads, or in child processes
//!
//! Both backends take the receiving end of the shared queue by value and hand
//! one clone to each worker, so the pool never keeps a receiver of its own.
//! Once every worker has exited the producer sees the queue disconnect.
//!
//! A process worker's dispatcher counts the lines it takes off the queue.
//! Whatever its child never received, because the child stopped early or
//! died, is reported as lost.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::consumer::Consumer;
use crate::parser::OperationParser;
use crate::queue::{WorkItem, WorkReceiver};
use crate::sink::{RetryingSink, SinkFactory};
use crate::stats::ConsumerStats;
use crate::worker_proc::{parse_report, write_frame, write_spec, WorkerSpec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One OS thread per consumer
    #[default]
    Thread,
    /// One child process per consumer
    Process,
}

/// Something running one consumer to completion
trait Worker: Send {
    fn name(&self) -> &str;
    fn join(self: Box<Self>) -> Result<ConsumerStats>;
}

pub struct WorkerPool {
    workers: Vec<Box<dyn Worker>>,
    mode: ExecutionMode,
}

impl WorkerPool {
    /// Start `n` consumers on named threads (`Thread-00`, `Thread-01`, ...).
    /// Every sink is built up front so a bad sink configuration fails the
    /// whole pool before any line is read.
    pub fn spawn_threads(
        n: usize,
        receiver: WorkReceiver,
        spec: &WorkerSpec,
        sink_factory: &SinkFactory,
    ) -> Result<Self> {
        let mut workers: Vec<Box<dyn Worker>> = Vec::with_capacity(n);
        for id in 0..n {
            let sink = sink_factory()
                .with_context(|| format!("Failed to create the sink for worker {}", id))?;
            let consumer = Consumer::new(
                id,
                OperationParser::new(spec.tags.clone()),
                RetryingSink::new(sink, spec.retry),
                spec.consumer,
            );
            let items = receiver.clone();
            let name = format!("Thread-{:02}", id);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || consumer.process(items))
                .with_context(|| format!("Failed to spawn {}", name))?;
            workers.push(Box::new(ThreadWorker { name, handle }));
        }
        info!(workers = n, "started thread workers");
        Ok(Self {
            workers,
            mode: ExecutionMode::Thread,
        })
    }

    /// Start `n` child processes running `<exe> worker`. A dispatcher thread
    /// per child sends it the configuration, then moves items from the queue
    /// into the child's stdin.
    pub fn spawn_processes(
        n: usize,
        receiver: WorkReceiver,
        spec: &WorkerSpec,
        exe: &Path,
    ) -> Result<Self> {
        let spec_json = spec.to_json()?;
        let mut workers: Vec<Box<dyn Worker>> = Vec::with_capacity(n);
        for id in 0..n {
            let worker = ProcessWorker::spawn(id, exe, spec_json.clone(), receiver.clone())?;
            workers.push(Box::new(worker));
        }
        info!(workers = n, exe = %exe.display(), "started worker processes");
        Ok(Self {
            workers,
            mode: ExecutionMode::Process,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Wait for every worker. A worker that panicked or whose process died
    /// without a report counts as stopped early rather than failing the run.
    pub fn join(self) -> Vec<ConsumerStats> {
        self.workers
            .into_iter()
            .map(|worker| {
                let name = worker.name().to_string();
                match worker.join() {
                    Ok(stats) => stats,
                    Err(e) => {
                        let message = format!("{:#}", e);
                        error!(worker = %name, error = %message, "worker failed");
                        ConsumerStats {
                            stopped_early: true,
                            ..ConsumerStats::default()
                        }
                    }
                }
            })
            .collect()
    }
}

struct ThreadWorker {
    name: String,
    handle: JoinHandle<ConsumerStats>,
}

impl Worker for ThreadWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn join(self: Box<Self>) -> Result<ConsumerStats> {
        let ThreadWorker { name, handle } = *self;
        handle.join().map_err(|_| anyhow!("{} panicked", name))
    }
}

/// Command line of one worker process. The configuration, credentials
/// included, travels over the child's stdin instead.
fn worker_command(exe: &Path, id: usize) -> Command {
    let mut command = Command::new(exe);
    command.arg("worker").arg("--worker-id").arg(id.to_string());
    command
}

struct ProcessWorker {
    name: String,
    child: Child,
    dispatcher: JoinHandle<u64>,
    relay: JoinHandle<Option<Result<ConsumerStats>>>,
}

impl ProcessWorker {
    fn spawn(id: usize, exe: &Path, spec_json: String, receiver: WorkReceiver) -> Result<Self> {
        let name = format!("Process-{:02}", id);
        let mut child = worker_command(exe, id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start worker process {}", name))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{} has no stdin pipe", name))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("{} has no stdout pipe", name))?;

        let dispatcher = thread::Builder::new()
            .name(format!("Dispatch-{:02}", id))
            .spawn(move || dispatch(receiver, stdin, &spec_json))
            .context("Failed to spawn dispatcher thread")?;
        let relay = thread::Builder::new()
            .name(format!("Relay-{:02}", id))
            .spawn(move || relay_output(stdout))
            .context("Failed to spawn output relay thread")?;

        debug!(worker = %name, pid = child.id(), "worker process started");
        Ok(Self {
            name,
            child,
            dispatcher,
            relay,
        })
    }
}

impl Worker for ProcessWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn join(self: Box<Self>) -> Result<ConsumerStats> {
        let ProcessWorker {
            name,
            mut child,
            dispatcher,
            relay,
        } = *self;

        let taken = dispatcher
            .join()
            .map_err(|_| anyhow!("dispatcher for {} panicked", name))?;
        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for {}", name))?;
        let report = relay
            .join()
            .map_err(|_| anyhow!("output relay for {} panicked", name))?;

        debug!(worker = %name, lines_taken = taken, %status, "worker process exited");
        let mut stats = match report {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => {
                let message = format!("{:#}", e);
                error!(worker = %name, error = %message, "unreadable stats report");
                ConsumerStats {
                    stopped_early: true,
                    ..ConsumerStats::default()
                }
            }
            None => {
                error!(worker = %name, %status, "worker process exited without reporting its stats");
                ConsumerStats {
                    stopped_early: true,
                    ..ConsumerStats::default()
                }
            }
        };

        stats.lines_lost = lines_lost(taken, &stats);
        if stats.lines_lost > 0 {
            error!(
                worker = %name,
                lines_taken = taken,
                lines_received = stats.lines_received,
                lines_lost = stats.lines_lost,
                "lines handed to the worker process were never processed"
            );
        }
        Ok(stats)
    }
}

/// Lines a dispatcher took for its child that the child's consumer never saw
fn lines_lost(taken: u64, stats: &ConsumerStats) -> u64 {
    taken.saturating_sub(stats.lines_received)
}

/// Feed one child its configuration, then lines until its sentinel, the end
/// of the queue, or a broken pipe. Returns the number of lines taken off the
/// queue, including one whose write failed. Dropping `out` on return is what
/// tells the child to finish.
fn dispatch<W: Write>(receiver: WorkReceiver, out: W, spec_json: &str) -> u64 {
    let mut out = BufWriter::new(out);
    if let Err(e) = write_spec(&mut out, spec_json) {
        warn!(error = %e, "unable to send the configuration to the worker process");
        return 0;
    }

    let mut taken = 0;
    while let Some(item) = receiver.pop() {
        match item {
            WorkItem::Line(line) => {
                taken += 1;
                if let Err(e) = write_frame(&mut out, &line) {
                    warn!(
                        error = %e,
                        line_number = line.line_number,
                        "worker process stopped accepting work"
                    );
                    return taken;
                }
            }
            WorkItem::Shutdown => break,
        }
    }
    if let Err(e) = out.flush() {
        warn!(error = %e, "unable to flush the last frames to the worker process");
    }
    taken
}

/// Copy child output to our stdout, keeping the stats report aside
fn relay_output(stdout: ChildStdout) -> Option<Result<ConsumerStats>> {
    let mut report = None;
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "unable to read worker process output");
                break;
            }
        };
        match parse_report(&line) {
            Some(stats) => report = Some(stats),
            None => {
                let mut out = io::stdout().lock();
                if writeln!(out, "{}", line).is_err() {
                    break;
                }
            }
        }
    }
    report
}
