use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod settings;

use settings::{LogFormat, ProduceSettings};

#[derive(Parser)]
#[command(name = "gust")]
#[command(about = "Rate-limited load generator for message brokers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "GUST_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[arg(long, env = "GUST_LOG_FORMAT", value_enum, default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce messages at a fixed rate per worker until the deadline or Ctrl+C
    Produce(ProduceSettings),
    /// Run a local sink broker that acknowledges and checks produced messages
    Sink {
        #[arg(long, default_value = "127.0.0.1:9092")]
        bind: String,

        /// Accept only these topics (comma-separated)
        #[arg(long, value_delimiter = ',')]
        topics: Vec<String>,

        #[arg(long, default_value = "10")]
        stats_interval_secs: u64,
    },
}

fn init_tracing(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level)?;
    // Logs go to stderr so `--sender stdout` output stays clean
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_format)?;

    match cli.command {
        Commands::Produce(settings) => {
            commands::produce(settings).await?;
        }
        Commands::Sink {
            bind,
            topics,
            stats_interval_secs,
        } => {
            commands::sink(bind, topics, stats_interval_secs).await?;
        }
    }

    Ok(())
}
