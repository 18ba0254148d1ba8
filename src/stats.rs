use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters kept by one consumer over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub lines_received: u64,
    /// Lines that are not candidates (no trailing `ms`)
    pub skipped: u64,
    /// Candidate lines with an operation outside the known kinds
    pub non_operation: u64,
    pub malformed: u64,
    pub points_parsed: u64,
    pub points_written: u64,
    pub points_dropped: u64,
    pub batches_written: u64,
    pub batches_dropped: u64,
    /// The consumer left its loop before receiving a sentinel
    pub stopped_early: bool,
    /// Lines taken off the queue for a worker process that never reached
    /// its consumer; filled in by the parent
    #[serde(default)]
    pub lines_lost: u64,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_written(&mut self, points: usize) {
        self.points_written += points as u64;
        self.batches_written += 1;
    }

    pub fn record_dropped(&mut self, points: usize) {
        self.points_dropped += points as u64;
        self.batches_dropped += 1;
    }

    /// Add another consumer's counters into this one
    pub fn merge(&mut self, other: &ConsumerStats) {
        self.lines_received += other.lines_received;
        self.skipped += other.skipped;
        self.non_operation += other.non_operation;
        self.malformed += other.malformed;
        self.points_parsed += other.points_parsed;
        self.points_written += other.points_written;
        self.points_dropped += other.points_dropped;
        self.batches_written += other.batches_written;
        self.batches_dropped += other.batches_dropped;
        self.stopped_early |= other.stopped_early;
        self.lines_lost += other.lines_lost;
    }
}

/// Merged end-of-run report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub lines_read: u64,
    pub workers: usize,
    /// Consumers that stopped before their sentinel
    pub workers_stopped_early: usize,
    pub totals: ConsumerStats,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(lines_read: u64, per_worker: &[ConsumerStats], elapsed: Duration) -> Self {
        let mut totals = ConsumerStats::new();
        for stats in per_worker {
            totals.merge(stats);
        }
        Self {
            lines_read,
            workers: per_worker.len(),
            workers_stopped_early: per_worker.iter().filter(|s| s.stopped_early).count(),
            totals,
            elapsed,
        }
    }

    /// True when every line was parsed and every parsed point reached the sink
    pub fn is_complete(&self) -> bool {
        self.totals.points_dropped == 0
            && self.totals.lines_lost == 0
            && self.workers_stopped_early == 0
    }

    pub fn format_summary(&self) -> String {
        let t = &self.totals;
        let mut output = format!(
            "Lines processed: {} total, {} skipped, {} non-operation, {} malformed",
            self.lines_read, t.skipped, t.non_operation, t.malformed
        );
        if t.lines_lost > 0 {
            output.push_str(&format!(", {} lost", t.lines_lost));
        }
        output.push_str(&format!(
            "; Points: {} parsed, {} written, {} dropped",
            t.points_parsed,
            t.points_written,
            t.points_dropped
        ));

        output.push_str(&format!(
            "; Batches: {} written, {} dropped",
            t.batches_written, t.batches_dropped
        ));

        if self.workers_stopped_early > 0 {
            output.push_str(&format!(
                ", {} of {} workers stopped early",
                self.workers_stopped_early, self.workers
            ));
        }

        let processing_time_ms = self.elapsed.as_millis();
        output.push_str(&format!(" in {}ms", processing_time_ms));

        if processing_time_ms > 0 && self.lines_read > 0 {
            let lines_per_sec = (self.lines_read as f64 * 1000.0) / processing_time_ms as f64;
            output.push_str(&format!(" ({:.0} lines/s)", lines_per_sec));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(points_written: u64, dropped: u64, stopped_early: bool) -> ConsumerStats {
        ConsumerStats {
            lines_received: 10,
            skipped: 2,
            non_operation: 1,
            malformed: u64::from(stopped_early),
            points_parsed: points_written + dropped,
            points_written,
            points_dropped: dropped,
            batches_written: 1,
            batches_dropped: u64::from(dropped > 0),
            stopped_early,
            lines_lost: 0,
        }
    }

    #[test]
    fn test_merge_sums_counters() {
        let report = RunReport::new(
            20,
            &[worker(5, 0, false), worker(3, 2, true)],
            Duration::from_millis(0),
        );
        assert_eq!(report.workers, 2);
        assert_eq!(report.workers_stopped_early, 1);
        assert_eq!(report.totals.lines_received, 20);
        assert_eq!(report.totals.points_written, 8);
        assert_eq!(report.totals.points_dropped, 2);
        assert_eq!(report.totals.batches_dropped, 1);
        assert!(report.totals.stopped_early);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_format_summary() {
        let report = RunReport::new(10, &[worker(7, 0, false)], Duration::from_millis(0));
        assert_eq!(
            report.format_summary(),
            "Lines processed: 10 total, 2 skipped, 1 non-operation, 0 malformed; \
             Points: 7 parsed, 7 written, 0 dropped; Batches: 1 written, 0 dropped in 0ms"
        );
        assert!(report.is_complete());
    }

    #[test]
    fn test_format_summary_rate_and_early_stop() {
        let report = RunReport::new(
            2000,
            &[worker(1, 0, true), worker(1, 0, false)],
            Duration::from_millis(1000),
        );
        let summary = report.format_summary();
        assert!(summary.contains("1 of 2 workers stopped early"));
        assert!(summary.ends_with("in 1000ms (2000 lines/s)"));
    }

    #[test]
    fn test_lost_lines_are_reported() {
        let mut lossy = worker(3, 0, true);
        lossy.lines_lost = 343;
        let report = RunReport::new(400, &[lossy, worker(50, 0, false)], Duration::ZERO);
        assert_eq!(report.totals.lines_lost, 343);
        assert!(!report.is_complete());
        assert!(report
            .format_summary()
            .starts_with("Lines processed: 400 total, 4 skipped, 2 non-operation, 1 malformed, 343 lost; Points:"));
    }

    #[test]
    fn test_stats_serde_roundtrip() {
        let stats = worker(4, 1, true);
        let json = serde_json::to_string(&stats).unwrap();
        let back: ConsumerStats = serde_json::from_str(&json).unwrap();
        assert_eq!(stats, back);
    }
}
