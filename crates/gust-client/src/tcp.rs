use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

use gust_core::{Delivery, ProduceAck, ProduceRequest, SendError, Sender};

use crate::{Backoff, Connection};

/// Retries per message before the send is reported as failed
pub const DEFAULT_MAX_RETRIES: u32 = 5;

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Sender speaking the GUST frame protocol to a sink broker.
///
/// One connection is shared by every worker; each request/ack exchange holds
/// a mutex so frames and acknowledgements never interleave.
pub struct TcpSender {
    topic: String,
    connection: Mutex<Connection>,
    max_retries: u32,
    request_timeout: Duration,
    delivery_timeout: Duration,
}

impl TcpSender {
    pub fn new(bootstrap: &str, topic: impl Into<String>) -> Result<Self, SendError> {
        Ok(Self {
            topic: topic.into(),
            connection: Mutex::new(Connection::new(bootstrap)?),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: Duration::from_secs(10),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Upper bound on one `send`, retries and backoff included
    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    /// Open the connection up front so a bad address shows before the run
    pub async fn connect(&self) -> Result<(), SendError> {
        self.connection.lock().await.connect().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// One request per attempt. The connection lock is released while
    /// backing off so other workers keep sending.
    async fn send_with_retries(&self, req: &ProduceRequest) -> Result<Delivery, SendError> {
        let mut backoff = Backoff::new();
        let mut attempt = 0;
        loop {
            let err = match self.request_once(req).await {
                Ok(ProduceAck::Accepted(delivery)) => {
                    debug!(
                        "Message sent to partition {} at offset {}",
                        delivery.partition, delivery.offset
                    );
                    return Ok(delivery);
                }
                // The broker saw the message; resending would not help.
                Ok(ProduceAck::Rejected(reason)) => return Err(SendError::Rejected(reason)),
                Err(e) => e,
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            attempt += 1;

            let delay = backoff.next_delay();
            warn!(
                attempt,
                max_retries = self.max_retries,
                error = %err,
                "Send failed, retrying in {:?}",
                delay
            );
            sleep(delay).await;
        }
    }

    async fn request_once(&self, req: &ProduceRequest) -> Result<ProduceAck, SendError> {
        let mut connection = self.connection.lock().await;
        let outcome = timeout(self.request_timeout, connection.request(req)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                connection.disconnect();
                Err(SendError::Timeout(self.request_timeout))
            }
        }
    }
}

#[async_trait]
impl Sender for TcpSender {
    async fn send(&self, payload: Bytes) -> Result<Delivery, SendError> {
        let req = ProduceRequest {
            topic: self.topic.clone(),
            payload,
        };

        match timeout(self.delivery_timeout, self.send_with_retries(&req)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(self.delivery_timeout)),
        }
    }

    fn name(&self) -> &str {
        "tcp"
    }

    async fn close(&self) -> gust_core::Result<()> {
        self.connection.lock().await.disconnect();
        Ok(())
    }
}
