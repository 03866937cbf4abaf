use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use gust_core::{Delivery, StopReason};

use crate::ControllerState;

/// Structured event emitted by a worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub worker_id: u32,
    /// Sequence of the message the event refers to; for `Started`, `Progress`
    /// and `Stopped` it is the next sequence the worker would use.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Started,
    Sent { delivery: Delivery },
    SendFailed { error: String },
    Progress { sent: u64, failed: u64 },
    Stopped { reason: StopReason },
}

impl WorkerEvent {
    pub fn new(worker_id: u32, sequence: u64, kind: EventKind) -> Self {
        Self {
            worker_id,
            sequence,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::Started => "started",
            EventKind::Sent { .. } => "sent",
            EventKind::SendFailed { .. } => "send_failed",
            EventKind::Progress { .. } => "progress",
            EventKind::Stopped { .. } => "stopped",
        }
    }
}

/// Sink for worker events. Called from every worker task concurrently.
pub trait Observer: Send + Sync {
    fn observe(&self, event: &WorkerEvent);

    /// Controller lifecycle edge; called once per actual change
    fn state_changed(&self, _from: ControllerState, _to: ControllerState) {}
}

/// Default sink: one `tracing` event per worker event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn state_changed(&self, from: ControllerState, to: ControllerState) {
        debug!(from = ?from, to = ?to, "Controller state changed");
    }

    fn observe(&self, event: &WorkerEvent) {
        let worker_id = event.worker_id;
        let sequence = event.sequence;
        match &event.kind {
            EventKind::Started => {
                info!(worker_id, event = event.name(), "Worker started");
            }
            EventKind::Sent { delivery } => {
                debug!(
                    worker_id,
                    sequence,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    event = event.name(),
                    "Message sent"
                );
            }
            EventKind::SendFailed { error } => {
                warn!(
                    worker_id,
                    sequence,
                    error = %error,
                    event = event.name(),
                    "Failed to send message"
                );
            }
            EventKind::Progress { sent, failed } => {
                info!(
                    worker_id,
                    attempts = sequence,
                    sent,
                    failed,
                    event = event.name(),
                    "Worker {}: {} messages sent",
                    worker_id,
                    sent
                );
            }
            EventKind::Stopped { reason } => {
                info!(
                    worker_id,
                    attempts = sequence,
                    reason = %reason,
                    event = event.name(),
                    "Worker stopped"
                );
            }
        }
    }
}
