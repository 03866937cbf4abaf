use std::sync::Arc;
use tokio::sync::watch;

use gust_core::StopReason;

/// One-way `running -> stopped` broadcast shared by a run.
///
/// Only the controller holds the token; workers get read-only
/// [`StopSignal`]s from [`StopToken::signal`].
#[derive(Debug, Clone)]
pub struct StopToken {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl StopToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request stop. Returns `true` only for the call that made the transition.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(reason);
            true
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The reason recorded by the winning `stop` call
    pub fn reason(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a [`StopToken`]
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<Option<StopReason>>,
}

impl StopSignal {
    /// Resolves once the token has stopped, immediately if it already has.
    pub async fn stopped(&mut self) -> StopReason {
        let state = self.rx.wait_for(Option::is_some).await.map(|state| *state);
        match state {
            Ok(Some(reason)) => reason,
            // Token dropped without stopping: nobody is left to run for.
            Ok(None) | Err(_) => StopReason::Cancelled,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_first_stop_wins() {
        let token = StopToken::new();
        assert!(!token.is_stopped());

        assert!(token.stop(StopReason::Deadline));
        assert!(!token.stop(StopReason::Signal));
        assert!(!token.stop(StopReason::Cancelled));

        assert!(token.is_stopped());
        assert_eq!(token.reason(), Some(StopReason::Deadline));
    }

    #[tokio::test]
    async fn test_all_signals_observe_stop() {
        let token = StopToken::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let mut signal = token.signal();
            handles.push(tokio::spawn(async move { signal.stopped().await }));
        }

        tokio::task::yield_now().await;
        token.stop(StopReason::Signal);

        for handle in handles {
            let reason = timeout(Duration::from_secs(1), handle)
                .await
                .expect("signal not observed")
                .unwrap();
            assert_eq!(reason, StopReason::Signal);
        }
    }

    #[tokio::test]
    async fn test_signal_created_after_stop_resolves() {
        let token = StopToken::new();
        token.stop(StopReason::Cancelled);

        let mut signal = token.signal();
        assert!(signal.is_stopped());
        assert_eq!(signal.stopped().await, StopReason::Cancelled);
    }
}
