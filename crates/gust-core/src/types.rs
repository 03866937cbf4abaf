use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::ConfigError;

/// Body of every generated message, created fresh for each send attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestMessage {
    pub timestamp: DateTime<Utc>,
    pub worker_id: u32,
    pub sequence: u64,
}

impl LoadTestMessage {
    pub fn new(worker_id: u32, sequence: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            worker_id,
            sequence,
        }
    }
}

/// Parameters of one load run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub worker_count: usize,
    /// Messages per second, per worker
    pub rate_per_worker: u32,
    /// `None` runs until stopped externally
    pub duration: Option<Duration>,
}

impl RunConfig {
    pub fn new(worker_count: usize, rate_per_worker: u32) -> Self {
        Self {
            worker_count,
            rate_per_worker,
            duration: None,
        }
    }

    /// Bound the run. A zero duration means unbounded.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = (!duration.is_zero()).then_some(duration);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        if self.rate_per_worker == 0 {
            return Err(ConfigError::InvalidRate(self.rate_per_worker));
        }
        Ok(())
    }

    /// Aggregate target across all workers
    pub fn total_rate(&self) -> u64 {
        self.worker_count as u64 * u64::from(self.rate_per_worker)
    }

    /// Messages a bounded run should produce per worker at the target rate
    pub fn expected_per_worker(&self) -> Option<u64> {
        self.duration
            .map(|d| (d.as_secs_f64() * f64::from(self.rate_per_worker)).floor() as u64)
    }
}

/// Broker acknowledgement for one published payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// What ended a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The configured duration elapsed
    Deadline,
    /// The external shutdown signal resolved
    Signal,
    /// The caller cancelled through the controller
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::Deadline => "deadline",
            StopReason::Signal => "signal",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = RunConfig::new(0, 10);
        assert_eq!(config.validate(), Err(ConfigError::InvalidWorkerCount));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = RunConfig::new(3, 0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidRate(0)));
    }

    #[test]
    fn test_zero_duration_is_unbounded() {
        let config = RunConfig::new(1, 10).with_duration(Duration::ZERO);
        assert_eq!(config.duration, None);
        assert_eq!(config.expected_per_worker(), None);
    }

    #[test]
    fn test_expected_per_worker() {
        let config = RunConfig::new(3, 10).with_duration(Duration::from_secs(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.expected_per_worker(), Some(20));
        assert_eq!(config.total_rate(), 30);
    }

    #[test]
    fn test_message_json_shape() {
        let message = LoadTestMessage::new(4, 17);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["worker_id"], 4);
        assert_eq!(json["sequence"], 17);
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
