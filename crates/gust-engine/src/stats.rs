use hdrhistogram::Histogram;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use gust_core::{GustError, Result, RunConfig, StopReason};

/// Per-worker counters, owned by the worker task while it runs
#[derive(Debug)]
pub struct WorkerStats {
    worker_id: u32,
    attempts: u64,
    sent: u64,
    failed: u64,
    latency_us: Histogram<u64>,
    started_at: Instant,
}

impl WorkerStats {
    pub fn new(worker_id: u32) -> Result<Self> {
        let latency_us = Histogram::<u64>::new(3)
            .map_err(|e| GustError::Metrics(format!("latency histogram: {}", e)))?;

        Ok(Self {
            worker_id,
            attempts: 0,
            sent: 0,
            failed: 0,
            latency_us,
            started_at: Instant::now(),
        })
    }

    pub fn start(&mut self) {
        self.started_at = Instant::now();
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.attempts += 1;
        self.sent += 1;
        self.latency_us.saturating_record(micros(latency));
    }

    pub fn record_failure(&mut self) {
        self.attempts += 1;
        self.failed += 1;
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn finish(self) -> WorkerReport {
        WorkerReport {
            worker_id: self.worker_id,
            attempts: self.attempts,
            sent: self.sent,
            failed: self.failed,
            elapsed: self.started_at.elapsed(),
            latency_us: self.latency_us,
        }
    }
}

/// Final tally of one worker
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub worker_id: u32,
    pub attempts: u64,
    pub sent: u64,
    pub failed: u64,
    pub elapsed: Duration,
    /// Successful send latency in microseconds
    pub latency_us: Histogram<u64>,
}

impl WorkerReport {
    /// Highest sequence the worker used, if it attempted anything
    pub fn last_sequence(&self) -> Option<u64> {
        self.attempts.checked_sub(1)
    }
}

/// Latency summary in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencySummary {
    pub min: u64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub max: u64,
}

/// Outcome of one controller run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub config: RunConfig,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
    /// Reports of workers that exited normally, ordered by worker id
    pub workers: Vec<WorkerReport>,
}

impl RunReport {
    pub fn total_attempts(&self) -> u64 {
        self.workers.iter().map(|w| w.attempts).sum()
    }

    pub fn total_sent(&self) -> u64 {
        self.workers.iter().map(|w| w.sent).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }

    /// Achieved successful sends per second across all workers
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_sent() as f64 / secs
        } else {
            0.0
        }
    }

    /// Merged send latency across workers. `None` when nothing succeeded.
    pub fn latency(&self) -> Option<LatencySummary> {
        let mut histograms = self.workers.iter().map(|w| &w.latency_us);
        let mut aggregate = histograms.next()?.clone();
        for hist in histograms {
            if let Err(e) = aggregate.add(hist) {
                tracing::warn!("Failed to merge latency histogram: {}", e);
            }
        }

        if aggregate.is_empty() {
            return None;
        }
        Some(LatencySummary {
            min: aggregate.min(),
            p50: aggregate.value_at_quantile(0.50),
            p90: aggregate.value_at_quantile(0.90),
            p99: aggregate.value_at_quantile(0.99),
            max: aggregate.max(),
        })
    }
}

/// Whole microseconds, saturating at `u64::MAX`
fn micros(latency: Duration) -> u64 {
    u64::try_from(latency.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_micros_saturate() {
        assert_eq!(micros(Duration::from_micros(1500)), 1500);
        assert_eq!(micros(Duration::from_secs(u64::MAX)), u64::MAX);
    }

    fn report_with(workers: Vec<WorkerReport>) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            config: RunConfig::new(workers.len().max(1), 10),
            stop_reason: StopReason::Deadline,
            elapsed: Duration::from_secs(2),
            workers,
        }
    }

    #[test]
    fn test_worker_stats_counts() {
        let mut stats = WorkerStats::new(1).unwrap();
        stats.record_success(Duration::from_micros(250));
        stats.record_failure();
        stats.record_success(Duration::from_micros(750));

        let report = stats.finish();
        assert_eq!(report.worker_id, 1);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.last_sequence(), Some(2));
        assert_eq!(report.latency_us.len(), 2);
    }

    #[test]
    fn test_idle_worker_has_no_sequence() {
        let report = WorkerStats::new(0).unwrap().finish();
        assert_eq!(report.last_sequence(), None);
    }

    #[test]
    fn test_run_report_totals() {
        let mut a = WorkerStats::new(0).unwrap();
        let mut b = WorkerStats::new(1).unwrap();
        for _ in 0..10 {
            a.record_success(Duration::from_micros(100));
            b.record_success(Duration::from_micros(300));
        }
        b.record_failure();

        let report = report_with(vec![a.finish(), b.finish()]);
        assert_eq!(report.total_attempts(), 21);
        assert_eq!(report.total_sent(), 20);
        assert_eq!(report.total_failed(), 1);
        assert!((report.throughput() - 10.0).abs() < f64::EPSILON);

        let latency = report.latency().unwrap();
        assert_eq!(latency.min, 100);
        assert!(latency.max >= 300);
    }

    #[test]
    fn test_latency_absent_without_successes() {
        let mut stats = WorkerStats::new(0).unwrap();
        stats.record_failure();
        let report = report_with(vec![stats.finish()]);
        assert!(report.latency().is_none());
        assert!(report_with(Vec::new()).latency().is_none());
    }
}
