//! CLI entry point for the GTFS-RT reporter.
//!
//! Stands in for the chat platform: commands come from stdin (one
//! `!command arg...` per line) or from the command line, and every chunk the
//! handler sends is written to stdout.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gtfs_rt_reporter::{
    command::{ChunkSender, CommandHandler},
    config::{Config, load_agencies, ttl_from_secs},
    error::SendError,
    fetch::{AutoSource, FeedCache, FeedClient, FeedSource},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{Instrument, error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_reporter")]
#[command(about = "Reports live train locations and counts from GTFS feeds", long_about = None)]
struct Cli {
    /// JSON file mapping agency ids to feed URLs (overrides AGENCIES_FILE)
    #[arg(long, global = true)]
    agencies: Option<String>,

    /// Maximum size of one outgoing message, in bytes
    #[arg(long, global = true)]
    max_chunk_size: Option<usize>,

    /// Timeout for each feed fetch, in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Cache fetched feeds for this many seconds (0 disables)
    #[arg(long, global = true)]
    cache_ttl_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read `!command arg...` lines from stdin until EOF or Ctrl+C
    Run,
    /// Run a single command, e.g. `query schedule bart`
    Query {
        /// Command name, with or without the `!` prefix
        name: String,

        /// Command arguments
        args: Vec<String>,
    },
}

/// Writes each chunk to stdout, followed by a blank line.
struct StdoutSender {
    out: tokio::sync::Mutex<tokio::io::Stdout>,
}

impl StdoutSender {
    fn new() -> Self {
        Self {
            out: tokio::sync::Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl ChunkSender for StdoutSender {
    async fn send(&self, text: &str) -> Result<(), SendError> {
        let mut out = self.out.lock().await;
        let write = async {
            out.write_all(text.as_bytes()).await?;
            if !text.ends_with('\n') {
                out.write_all(b"\n").await?;
            }
            out.write_all(b"\n").await?;
            out.flush().await
        };
        write.await.map_err(|e| SendError(e.to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_reporter.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_reporter.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli)?);

    info!(
        agencies = config.agencies.len(),
        max_chunk_size = config.max_chunk_size,
        fetch_timeout_secs = config.fetch_timeout.as_secs(),
        cache_ttl_secs = config.cache_ttl.map(|t| t.as_secs()),
        "Configuration loaded"
    );

    let source = AutoSource::new(config.fetch_timeout).context("building HTTP client")?;
    let mut client = FeedClient::new(source, config.fetch_timeout);
    if let Some(ttl) = config.cache_ttl {
        client = client.with_cache(Arc::new(FeedCache::new(ttl)));
    }
    let handler = Arc::new(CommandHandler::new(client, config));
    let sender = Arc::new(StdoutSender::new());

    match cli.command {
        Commands::Query { name, args } => {
            let cancelled = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            if let Err(e) = handler
                .handle_until(&name, &args, sender.as_ref(), cancelled)
                .await
            {
                error!(error = %e, "Command failed");
            }
        }
        Commands::Run => run(handler, sender).await?,
    }

    Ok(())
}

/// Applies CLI overrides on top of the environment configuration.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(path) = &cli.agencies {
        config.agencies = load_agencies(path)?;
    }
    if let Some(size) = cli.max_chunk_size {
        config.max_chunk_size = size;
    }
    if let Some(secs) = cli.timeout_secs {
        config.fetch_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.cache_ttl_secs {
        config.cache_ttl = ttl_from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

/// Reads command lines from stdin and runs each one as its own task.
async fn run<S>(handler: Arc<CommandHandler<S>>, sender: Arc<StdoutSender>) -> Result<()>
where
    S: FeedSource + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = vec![];

    info!("Reading commands from stdin. Press Ctrl+C to exit.");

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                let _ = shutdown_tx.send(true);
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        // Only prefixed messages are commands.
        let line = line.trim();
        if !line.starts_with('!') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next().map(str::to_string) else {
            continue;
        };
        let args: Vec<String> = parts.map(str::to_string).collect();

        let handler = handler.clone();
        let sender = sender.clone();
        let mut shutdown = shutdown_rx.clone();
        let span = tracing::info_span!("invocation", command = %name);

        tasks.push(tokio::spawn(
            async move {
                let cancelled = async move {
                    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
                    if closed {
                        std::future::pending::<()>().await;
                    }
                };
                if let Err(e) = handler
                    .handle_until(&name, &args, sender.as_ref(), cancelled)
                    .await
                {
                    error!(error = %e, "Command failed");
                }
            }
            .instrument(span),
        ));
    }

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
