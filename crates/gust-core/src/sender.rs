use async_trait::async_trait;
use bytes::Bytes;

use crate::{Delivery, Result, SendError};

/// Publishes one encoded payload to a broker.
///
/// A single instance is shared by every worker of a run, so implementations
/// must tolerate concurrent calls and serialize internally where their
/// transport cannot. Retries, acknowledgement level and timeouts are the
/// implementation's own concern; the engine never retries a failed send.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, payload: Bytes) -> std::result::Result<Delivery, SendError>;

    /// Short label used in logs
    fn name(&self) -> &str;

    /// Flush buffered messages and release the transport
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
