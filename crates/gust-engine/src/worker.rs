use std::sync::Arc;
use tokio::time::Instant;

use gust_core::{LoadTestMessage, MessageCodec, Result, Sender, SendError, StopReason};

use crate::{EventKind, Observer, Permit, RateLimiter, StopSignal, WorkerEvent, WorkerReport, WorkerStats};

/// Default number of attempts between progress events
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

/// One paced producer: wait for a permit, send, record, repeat until stopped.
///
/// Nothing here is shared with other workers except the sender and the
/// observer; the sequence counter and stats live in the task.
pub struct Worker {
    id: u32,
    limiter: RateLimiter,
    sender: Arc<dyn Sender>,
    observer: Arc<dyn Observer>,
    stop: StopSignal,
    progress_every: u64,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        id: u32,
        limiter: RateLimiter,
        sender: Arc<dyn Sender>,
        observer: Arc<dyn Observer>,
        stop: StopSignal,
    ) -> Result<Self> {
        Ok(Self {
            id,
            limiter,
            sender,
            observer,
            stop,
            progress_every: DEFAULT_PROGRESS_EVERY,
            stats: WorkerStats::new(id)?,
        })
    }

    /// Emit a progress event every `every` attempts
    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Run until the stop signal fires. A send in progress always completes
    /// before the stop is honoured.
    pub async fn run(mut self) -> WorkerReport {
        let mut sequence: u64 = 0;
        self.stats.start();
        self.emit(sequence, EventKind::Started);

        let reason = loop {
            if let Permit::Stopped(reason) = self.limiter.acquire(&mut self.stop).await {
                break reason;
            }

            self.send_one(sequence).await;
            sequence += 1;

            if sequence % self.progress_every == 0 {
                self.emit(
                    sequence,
                    EventKind::Progress {
                        sent: self.stats.sent(),
                        failed: self.stats.failed(),
                    },
                );
            }
        };

        self.finish(sequence, reason)
    }

    async fn send_one(&mut self, sequence: u64) {
        let message = LoadTestMessage::new(self.id, sequence);
        let started = Instant::now();

        let outcome = match MessageCodec::encode(&message) {
            Ok(payload) => self.sender.send(payload).await,
            Err(e) => Err(SendError::from(e)),
        };

        match outcome {
            Ok(delivery) => {
                self.stats.record_success(started.elapsed());
                self.emit(sequence, EventKind::Sent { delivery });
            }
            Err(e) => {
                self.stats.record_failure();
                self.emit(
                    sequence,
                    EventKind::SendFailed {
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    fn finish(self, sequence: u64, reason: StopReason) -> WorkerReport {
        self.emit(sequence, EventKind::Stopped { reason });
        self.stats.finish()
    }

    fn emit(&self, sequence: u64, kind: EventKind) {
        self.observer
            .observe(&WorkerEvent::new(self.id, sequence, kind));
    }
}
