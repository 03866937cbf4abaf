use std::future::{pending, Future};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use gust_core::{ConfigError, Result, RunConfig, Sender, StopReason};

use crate::{
    Observer, RateLimiter, RunReport, StopToken, TracingObserver, Worker, WorkerReport,
    DEFAULT_PROGRESS_EVERY,
};

/// Lifecycle of a [`LoadController`]. A finished controller goes back to
/// `Idle` when the next run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Draining,
    Done,
}

/// Caller-side cancellation for a controller's current (or next) run
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    /// Request the run to stop. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|cancelled| !std::mem::replace(cancelled, true));
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Fans a run out over `worker_count` workers and drains them on the first
/// of deadline, shutdown signal or cancellation.
pub struct LoadController {
    sender: Arc<dyn Sender>,
    observer: Arc<dyn Observer>,
    progress_every: u64,
    state_tx: watch::Sender<ControllerState>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl LoadController {
    pub fn new(sender: Arc<dyn Sender>) -> Self {
        let (state_tx, _) = watch::channel(ControllerState::Idle);
        let (cancel_tx, _) = watch::channel(false);

        Self {
            sender,
            observer: Arc::new(TracingObserver),
            progress_every: DEFAULT_PROGRESS_EVERY,
            state_tx,
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    /// Route worker events to a custom sink instead of `tracing`
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Attempts between worker progress events
    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Run the load until the deadline, `shutdown` resolving, or a
    /// [`Canceller`] firing, then wait for every worker to exit.
    ///
    /// Fails only on invalid configuration, before any message is sent.
    /// Send failures are reported in the returned [`RunReport`].
    pub async fn run<F>(&mut self, config: &RunConfig, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()> + Send,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.set_state(ControllerState::Idle);

        let result = self
            .run_inner(run_id, config, shutdown)
            .instrument(span)
            .await;

        self.cancel_tx.send_replace(false);
        result
    }

    async fn run_inner<F>(&self, run_id: Uuid, config: &RunConfig, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()> + Send,
    {
        if self.progress_every == 0 {
            return Err(ConfigError::InvalidProgressCadence.into());
        }
        config.validate()?;

        let token = StopToken::new();
        let workers = self.build_workers(config, &token)?;

        info!(
            workers = config.worker_count,
            rate_per_worker = config.rate_per_worker,
            duration = ?config.duration,
            sender = self.sender.name(),
            "Starting load test: {} workers, {} msg/sec each",
            config.worker_count,
            config.rate_per_worker
        );

        let start = Instant::now();
        self.set_state(ControllerState::Running);
        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run().in_current_span()))
            .collect();

        let reason = self.wait_for_stop(config.duration, shutdown).await;
        if token.stop(reason) {
            self.set_state(ControllerState::Draining);
            info!(reason = %reason, "Stop requested, draining workers");
        }

        let mut reports: Vec<WorkerReport> = Vec::with_capacity(handles.len());
        for (worker_id, joined) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            match joined {
                Ok(report) => {
                    debug!(
                        worker_id,
                        attempts = report.attempts,
                        sent = report.sent,
                        failed = report.failed,
                        "Worker completed"
                    );
                    reports.push(report);
                }
                Err(e) => {
                    error!(worker_id, error = %e, "Worker task failed");
                }
            }
        }

        let report = RunReport {
            run_id,
            config: config.clone(),
            stop_reason: token.reason().unwrap_or(reason),
            elapsed: start.elapsed(),
            workers: reports,
        };
        self.set_state(ControllerState::Done);

        info!(
            elapsed_secs = report.elapsed.as_secs_f64(),
            sent = report.total_sent(),
            failed = report.total_failed(),
            "Load test completed"
        );
        Ok(report)
    }

    fn set_state(&self, next: ControllerState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            self.observer.state_changed(previous, next);
        }
    }

    /// Every worker is constructed before any is spawned, so a bad setting
    /// aborts the run with nothing sent.
    fn build_workers(&self, config: &RunConfig, token: &StopToken) -> Result<Vec<Worker>> {
        (0..config.worker_count)
            .map(|index| {
                let id = u32::try_from(index).map_err(|_| ConfigError::Invalid {
                    name: "worker_count",
                    reason: format!("{} exceeds the worker id range", config.worker_count),
                })?;
                let limiter = RateLimiter::new(config.rate_per_worker)?;
                let worker = Worker::new(
                    id,
                    limiter,
                    self.sender.clone(),
                    self.observer.clone(),
                    token.signal(),
                )?
                .with_progress_every(self.progress_every);
                Ok(worker)
            })
            .collect()
    }

    async fn wait_for_stop<F>(&self, duration: Option<Duration>, shutdown: F) -> StopReason
    where
        F: Future<Output = ()> + Send,
    {
        let deadline = async {
            match duration {
                Some(duration) => sleep(duration).await,
                None => pending::<()>().await,
            }
        };

        let mut cancel_rx = self.cancel_tx.subscribe();
        let cancelled = async move {
            let closed = cancel_rx.wait_for(|cancelled| *cancelled).await.is_err();
            if closed {
                pending::<()>().await;
            }
        };

        tokio::select! {
            _ = deadline => StopReason::Deadline,
            _ = shutdown => StopReason::Signal,
            _ = cancelled => StopReason::Cancelled,
        }
    }
}

impl std::fmt::Debug for LoadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadController")
            .field("sender", &self.sender.name())
            .field("progress_every", &self.progress_every)
            .field("state", &self.state())
            .finish()
    }
}
