//! Fixed-interval pacing for a single worker

use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};

use gust_core::{ConfigError, StopReason};

use crate::StopSignal;

/// Outcome of waiting on a [`RateLimiter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Granted,
    Stopped(StopReason),
}

/// Releases one permit per `1 / rate` seconds.
///
/// Ticks are fixed-interval, not a token bucket: when the caller falls behind
/// the missed ticks are dropped and the next permit is due one full interval
/// after the late one. The first permit comes one interval after the first
/// call to [`RateLimiter::acquire`].
pub struct RateLimiter {
    rate: u32,
    period: Duration,
    ticker: Option<Interval>,
}

impl RateLimiter {
    pub fn new(rate: u32) -> Result<Self, ConfigError> {
        if rate == 0 {
            return Err(ConfigError::InvalidRate(rate));
        }

        let period = (Duration::from_secs(1) / rate).max(Duration::from_nanos(1));
        Ok(Self {
            rate,
            period,
            ticker: None,
        })
    }

    /// Wait for the next permit, or for `stop`, whichever comes first.
    pub async fn acquire(&mut self, stop: &mut StopSignal) -> Permit {
        let period = self.period;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        tokio::select! {
            biased;
            reason = stop.stopped() => Permit::Stopped(reason),
            _ = ticker.tick() => Permit::Granted,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate)
            .field("period", &self.period)
            .field("started", &self.ticker.is_some())
            .finish()
    }
}
