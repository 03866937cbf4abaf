use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use gust_core::{FrameCodec, GustError, ProduceAck, ProduceRequest, SendError};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(100);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Doubling delay with up to 25% jitter, capped. One per send, so a broker
/// outage never stretches the wait for the next message.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            delay: INITIAL_RECONNECT_DELAY,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.delay;
        self.delay = std::cmp::min(self.delay * 2, MAX_RECONNECT_DELAY);
        self.attempts += 1;

        let jitter_ms = base.as_millis() as u64 / 4;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        debug!(attempts = self.attempts, "Backing off {:?}", base + jitter);
        base + jitter
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection to one of a set of bootstrap brokers with reconnection
pub struct Connection {
    addresses: Vec<String>,
    next_address: usize,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
}

impl Connection {
    /// `bootstrap` is a comma-separated `host:port` list
    pub fn new(bootstrap: &str) -> Result<Self, SendError> {
        let addresses: Vec<String> = bootstrap
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(String::from)
            .collect();
        if addresses.is_empty() {
            return Err(SendError::Connection(
                "No bootstrap address given".to_string(),
            ));
        }

        Ok(Self {
            addresses,
            next_address: 0,
            stream: None,
            connect_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Try each bootstrap address once, starting after the last one used
    pub async fn connect(&mut self) -> Result<(), SendError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut last_error = None;
        for _ in 0..self.addresses.len() {
            let address = &self.addresses[self.next_address];
            self.next_address = (self.next_address + 1) % self.addresses.len();

            match timeout(self.connect_timeout, TcpStream::connect(address)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    info!("Connected to {}", address);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Connection to {} failed: {}", address, e);
                    last_error = Some(SendError::Connection(format!("{}: {}", address, e)));
                }
                Err(_) => {
                    warn!("Connection to {} timed out", address);
                    last_error = Some(SendError::Timeout(self.connect_timeout));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SendError::Connection("No bootstrap address given".to_string())))
    }

    /// Send one request and wait for its acknowledgement. The stream is
    /// taken for the exchange, so a cancelled request never leaves a
    /// half-written frame behind.
    pub async fn request(&mut self, req: &ProduceRequest) -> Result<ProduceAck, SendError> {
        self.connect().await?;

        let Some(mut stream) = self.stream.take() else {
            return Err(SendError::Connection("No active connection".to_string()));
        };

        let result = async {
            FrameCodec::write_request(&mut stream, req).await?;
            FrameCodec::read_ack(&mut stream).await
        }
        .await;

        match result {
            Ok(ack) => {
                self.stream = Some(stream);
                Ok(ack)
            }
            Err(e) => {
                error!("Request failed: {}. Marking connection as disconnected.", e);
                Err(into_send_error(e))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
    }
}

fn into_send_error(err: GustError) -> SendError {
    match err {
        GustError::Io(e) => SendError::Io(e),
        GustError::Send(e) => e,
        GustError::Protocol(msg) => SendError::Protocol(msg),
        other => SendError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_bootstrap_list() {
        let conn = Connection::new("broker-1:9092, broker-2:9092,,").unwrap();
        assert_eq!(conn.addresses(), ["broker-1:9092", "broker-2:9092"]);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_empty_bootstrap_rejected() {
        assert!(matches!(
            Connection::new(" , "),
            Err(SendError::Connection(_))
        ));
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new();
        let first = backoff.next_delay();
        assert!(first >= INITIAL_RECONNECT_DELAY);
        assert!(first <= INITIAL_RECONNECT_DELAY + INITIAL_RECONNECT_DELAY / 4);

        for _ in 0..20 {
            backoff.next_delay();
        }
        let capped = backoff.next_delay();
        assert!(capped >= MAX_RECONNECT_DELAY);
        assert!(capped <= MAX_RECONNECT_DELAY + MAX_RECONNECT_DELAY / 4);
    }

    #[test]
    fn test_fresh_backoff_starts_small() {
        let mut exhausted = Backoff::new();
        for _ in 0..20 {
            exhausted.next_delay();
        }

        let fresh = Backoff::new().next_delay();
        assert!(fresh <= INITIAL_RECONNECT_DELAY + INITIAL_RECONNECT_DELAY / 4);
    }
}
