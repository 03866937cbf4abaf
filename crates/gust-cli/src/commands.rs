use anyhow::Context;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

use gust_client::{NullSender, StdoutSender, TcpSender};
use gust_core::Sender;
use gust_engine::{LoadController, RunReport};
use gust_sink::{Sink, SinkServer};

use crate::settings::{ProduceSettings, SenderKind};

pub async fn produce(settings: ProduceSettings) -> anyhow::Result<()> {
    settings.validate()?;
    let config = settings.run_config();
    let sender = build_sender(&settings).await?;

    // Payloads own stdout when printing messages
    let mut out: Box<dyn Write> = match settings.sender {
        SenderKind::Stdout => Box::new(io::stderr()),
        _ => Box::new(io::stdout()),
    };

    writeln!(out, "=== GUST Load Run ===")?;
    writeln!(out, "Sender:   {}", sender.name())?;
    writeln!(out, "Topic:    {}", settings.topic)?;
    writeln!(out, "Workers:  {}", config.worker_count)?;
    writeln!(
        out,
        "Rate:     {} msg/s per worker ({} msg/s total)",
        config.rate_per_worker,
        config.total_rate()
    )?;
    match config.duration {
        Some(duration) => writeln!(out, "Duration: {:?}", duration)?,
        None => writeln!(out, "Duration: until Ctrl+C")?,
    }
    writeln!(out)?;

    let mut controller =
        LoadController::new(sender.clone()).with_progress_every(settings.progress_every);
    let report = controller.run(&config, drain_on_signal()).await?;

    if let Err(e) = sender.close().await {
        warn!("Failed to close {} sender: {}", sender.name(), e);
    }

    print_report(&mut out, &report)?;
    Ok(())
}

async fn build_sender(settings: &ProduceSettings) -> anyhow::Result<Arc<dyn Sender>> {
    let brokers = settings.broker_list().unwrap_or_default();

    let sender: Arc<dyn Sender> = match settings.sender {
        SenderKind::Tcp => {
            let sender = TcpSender::new(brokers, settings.topic.clone())?
                .with_max_retries(settings.max_retries)
                .with_request_timeout(settings.request_timeout())
                .with_delivery_timeout(settings.delivery_timeout());
            sender
                .connect()
                .await
                .with_context(|| format!("failed to connect to {}", brokers))?;
            Arc::new(sender)
        }
        SenderKind::Kafka => kafka_sender(brokers, settings)?,
        SenderKind::Stdout => Arc::new(StdoutSender::new()),
        SenderKind::Null => Arc::new(NullSender::new()),
    };

    info!(sender = sender.name(), "Sender ready");
    Ok(sender)
}

#[cfg(feature = "kafka")]
fn kafka_sender(brokers: &str, settings: &ProduceSettings) -> anyhow::Result<Arc<dyn Sender>> {
    let sender = gust_client::KafkaSender::new(brokers, settings.topic.clone())?
        .with_delivery_timeout(settings.delivery_timeout());
    Ok(Arc::new(sender))
}

#[cfg(not(feature = "kafka"))]
fn kafka_sender(_brokers: &str, _settings: &ProduceSettings) -> anyhow::Result<Arc<dyn Sender>> {
    anyhow::bail!("gust was built without Kafka support; rebuild with `--features kafka`")
}

fn print_report(out: &mut dyn Write, report: &RunReport) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "=== Run {} ===", report.run_id)?;
    writeln!(out, "Stopped by: {}", report.stop_reason)?;
    writeln!(out, "Elapsed:    {:.2}s", report.elapsed.as_secs_f64())?;
    writeln!(out, "Attempts:   {}", report.total_attempts())?;
    writeln!(out, "Sent:       {}", report.total_sent())?;
    writeln!(out, "Failed:     {}", report.total_failed())?;
    writeln!(out, "Throughput: {:.1} msg/s", report.throughput())?;

    if let Some(latency) = report.latency() {
        writeln!(out)?;
        writeln!(out, "Latency (μs):")?;
        writeln!(out, "  Min: {}", latency.min)?;
        writeln!(out, "  P50: {}", latency.p50)?;
        writeln!(out, "  P90: {}", latency.p90)?;
        writeln!(out, "  P99: {}", latency.p99)?;
        writeln!(out, "  Max: {}", latency.max)?;
    }

    if report.workers.len() < report.config.worker_count {
        writeln!(
            out,
            "\nWarning: {} of {} workers did not report",
            report.config.worker_count - report.workers.len(),
            report.config.worker_count
        )?;
    }

    writeln!(out)?;
    for worker in &report.workers {
        writeln!(
            out,
            "  worker {:>3}: sent {:>8}  failed {:>6}",
            worker.worker_id, worker.sent, worker.failed
        )?;
    }
    out.flush()
}

pub async fn sink(bind: String, topics: Vec<String>, stats_interval_secs: u64) -> anyhow::Result<()> {
    let mut sink = Sink::new();
    if !topics.is_empty() {
        sink = sink.with_topics(topics);
    }

    let server = SinkServer::new(bind)
        .with_sink(sink)
        .with_stats_interval(Duration::from_secs(stats_interval_secs.max(1)));
    server.run(shutdown_signal()).await?;

    let sink = server.sink();
    println!("=== Sink Summary ===");
    for (worker_id, tally) in sink.tallies() {
        println!(
            "  worker {:>3}: received {:>8}  gaps {:>4}  out-of-order {:>4}  restarts {}",
            worker_id, tally.received, tally.gaps, tally.out_of_order, tally.restarts
        );
    }
    Ok(())
}

/// First signal starts the drain; a second Ctrl+C exits without waiting
async fn drain_on_signal() {
    let second = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    drain_until(shutdown_signal(), second, || {
        warn!("Second interrupt, exiting without draining");
        std::process::exit(130);
    })
    .await
}

/// Resolve on `first`; from then on, `second` firing runs `abort`
async fn drain_until<F, S, A>(first: F, second: S, abort: A)
where
    F: Future<Output = ()>,
    S: Future<Output = ()> + Send + 'static,
    A: FnOnce() + Send + 'static,
{
    first.await;
    info!("Draining workers, press Ctrl+C again to exit immediately");
    tokio::spawn(async move {
        second.await;
        abort();
    });
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
