use clap::{Args, ValueEnum};
use std::time::Duration;

use gust_core::{ConfigError, RunConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SenderKind {
    /// GUST frame protocol over TCP (see `gust sink`)
    Tcp,
    /// Kafka producer (requires the `kafka` feature)
    Kafka,
    /// One JSON line per message on stdout
    Stdout,
    /// Discard everything
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Settings for `gust produce`. Every flag can also come from the
/// environment or a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct ProduceSettings {
    /// Comma-separated broker addresses
    #[arg(long, env = "MSK_BOOTSTRAP_SERVERS")]
    pub brokers: Option<String>,

    #[arg(long, env = "MSK_TOPIC", default_value = "test-topic")]
    pub topic: String,

    #[arg(long, env = "GUST_SENDER", value_enum, default_value = "tcp")]
    pub sender: SenderKind,

    /// Number of concurrent producers
    #[arg(long, env = "GUST_WORKERS", default_value = "1")]
    pub workers: usize,

    /// Messages per second, per worker
    #[arg(long, env = "GUST_RATE", default_value = "10")]
    pub rate: u32,

    /// Stop after this many seconds; 0 runs until interrupted
    #[arg(long, env = "GUST_DURATION_SECS", default_value = "0")]
    pub duration_secs: u64,

    /// Log progress every N messages per worker
    #[arg(long, default_value = "100")]
    pub progress_every: u64,

    /// Retries per message inside the sender
    #[arg(long, default_value = "5")]
    pub max_retries: u32,

    #[arg(long, default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Upper bound on one message, retries included
    #[arg(long, default_value = "30000")]
    pub delivery_timeout_ms: u64,
}

impl ProduceSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.needs_brokers() && self.broker_list().is_none() {
            return Err(ConfigError::Missing("MSK_BOOTSTRAP_SERVERS"));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "MSK_TOPIC",
                reason: "topic must not be empty".to_string(),
            });
        }
        if self.progress_every == 0 {
            return Err(ConfigError::InvalidProgressCadence);
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.delivery_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "delivery_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.run_config().validate()
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig::new(self.workers, self.rate).with_duration(Duration::from_secs(self.duration_secs))
    }

    /// Broker list, if set and not blank
    pub fn broker_list(&self) -> Option<&str> {
        self.brokers
            .as_deref()
            .map(str::trim)
            .filter(|brokers| !brokers.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    fn needs_brokers(&self) -> bool {
        matches!(self.sender, SenderKind::Tcp | SenderKind::Kafka)
    }
}
