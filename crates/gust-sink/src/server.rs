use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use gust_core::{FrameCodec, Result};

use crate::Sink;

/// Accepts sender connections and acknowledges every frame through a [`Sink`]
pub struct SinkServer {
    sink: Arc<Sink>,
    bind_address: String,
    stats_interval: Duration,
}

impl SinkServer {
    pub fn new(bind_address: String) -> Self {
        Self {
            sink: Arc::new(Sink::new()),
            bind_address,
            stats_interval: Duration::from_secs(10),
        }
    }

    pub fn with_sink(mut self, sink: Sink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_stats_interval(mut self, stats_interval: Duration) -> Self {
        self.stats_interval = stats_interval;
        self
    }

    pub fn sink(&self) -> Arc<Sink> {
        self.sink.clone()
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(&self.bind_address).await?)
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!("GUST sink listening on {}", listener.local_addr()?);

        let stats_handle = {
            let sink = self.sink.clone();
            let period = self.stats_interval;
            tokio::spawn(async move {
                let mut stats_interval = interval(period);
                stats_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    stats_interval.tick().await;
                    log_stats(&sink);
                }
            })
        };

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Sink shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        info!("New producer connected: {}", addr);
                        let sink = self.sink.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_client(sink, socket).await {
                                error!("Producer {} error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        stats_handle.abort();
        log_stats(&self.sink);
        Ok(())
    }

    async fn handle_client(sink: Arc<Sink>, mut socket: TcpStream) -> Result<()> {
        socket.set_nodelay(true)?;
        sink.metrics()
            .active_connections
            .fetch_add(1, Ordering::Relaxed);

        let result: Result<()> = async {
            while let Some(req) = FrameCodec::read_request(&mut socket).await? {
                let ack = sink.ingest(&req);
                FrameCodec::write_ack(&mut socket, &ack).await?;
            }
            debug!("Producer closed connection");
            Ok(())
        }
        .await;

        sink.metrics()
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
        result
    }
}

fn log_stats(sink: &Sink) {
    let metrics = sink.metrics();
    info!(
        messages = metrics.total_messages.load(Ordering::Relaxed),
        bytes = metrics.total_bytes.load(Ordering::Relaxed),
        rejected = metrics.rejected.load(Ordering::Relaxed),
        undecodable = metrics.undecodable.load(Ordering::Relaxed),
        connections = metrics.active_connections.load(Ordering::Relaxed),
        workers = sink.tallies().len(),
        gaps = sink.total_gaps(),
        "Sink stats"
    );
}
