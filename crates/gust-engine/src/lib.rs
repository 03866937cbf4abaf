//! Rate-limited producer engine.
//!
//! A [`LoadController`] fans a run out over N [`Worker`] tasks, each paced by
//! its own [`RateLimiter`], and drains them all through a shared
//! [`StopToken`] when the deadline elapses, the shutdown future resolves or
//! the caller cancels.

pub mod controller;
pub mod observer;
pub mod rate_limiter;
pub mod stats;
pub mod stop;
pub mod worker;

pub use controller::*;
pub use observer::*;
pub use rate_limiter::*;
pub use stats::*;
pub use stop::*;
pub use worker::*;
