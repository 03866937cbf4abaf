//! Senders that never leave the process

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use gust_core::{Delivery, SendError, Sender};

/// Accepts everything and discards it. Measures the engine alone.
#[derive(Debug, Default)]
pub struct NullSender {
    next_offset: AtomicI64,
}

impl NullSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads accepted so far
    pub fn accepted(&self) -> i64 {
        self.next_offset.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sender for NullSender {
    async fn send(&self, _payload: Bytes) -> Result<Delivery, SendError> {
        Ok(Delivery {
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Writes each payload as one line on stdout
pub struct StdoutSender {
    out: Mutex<Stdout>,
    next_offset: AtomicI64,
}

impl StdoutSender {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
            next_offset: AtomicI64::new(0),
        }
    }
}

impl Default for StdoutSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for StdoutSender {
    async fn send(&self, payload: Bytes) -> Result<Delivery, SendError> {
        let mut out = self.out.lock().await;
        out.write_all(&payload).await?;
        out.write_all(b"\n").await?;

        Ok(Delivery {
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn name(&self) -> &str {
        "stdout"
    }

    async fn close(&self) -> gust_core::Result<()> {
        self.out.lock().await.flush().await?;
        Ok(())
    }
}
