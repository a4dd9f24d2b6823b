use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bulwark::config::{BulwarkConfig, LogFormat, LoggingConfig};
use bulwark::error::BulwarkError;
use bulwark::queue::{DeliveryQueue, InMemoryQueueStore, LogDispatcher, QueueWorker, Submission};
use bulwark::ratelimit::{AdmissionLimiter, Decision, InMemoryCounterStore};

/// Delivery queue worker and admission limiter tooling.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true, env = "BULWARK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the queue worker until interrupted
    Run {
        /// YAML or JSON list of messages to queue before starting
        #[arg(short, long)]
        messages: Option<PathBuf>,
    },
    /// Queue messages from a file, drain one batch of due messages and exit
    Drain {
        /// YAML or JSON list of messages to queue
        #[arg(short, long)]
        messages: PathBuf,
    },
    /// Run admission checks against a configured limiter and print decisions
    Check {
        /// Limiter name, e.g. `auth`
        limiter: String,
        /// Caller identifier, e.g. a client address
        identifier: String,
        /// Number of consecutive checks
        #[arg(short, long, default_value_t = 1)]
        times: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = BulwarkConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);

    match cli.command.unwrap_or(Command::Run { messages: None }) {
        Command::Run { messages } => run(&config, messages.as_deref()).await,
        Command::Drain { messages } => drain(&config, &messages).await,
        Command::Check {
            limiter,
            identifier,
            times,
        } => check(&config, &limiter, &identifier, times).await,
    }
}

fn build_queue(config: &BulwarkConfig) -> Arc<DeliveryQueue> {
    let store = Arc::new(InMemoryQueueStore::new());
    let queue = DeliveryQueue::from_config(&config.queue, store, Arc::new(LogDispatcher));
    info!(
        batch_size = config.queue.batch_size,
        poll_interval_secs = config.queue.poll_interval_secs,
        "Delivery queue initialized"
    );
    Arc::new(queue)
}

async fn submit_from(queue: &DeliveryQueue, path: &Path) -> anyhow::Result<()> {
    let submissions = Submission::read_list(path)
        .with_context(|| format!("failed to read messages from {}", path.display()))?;
    queue.submit_all(submissions).await;
    Ok(())
}

async fn run(config: &BulwarkConfig, messages: Option<&Path>) -> anyhow::Result<()> {
    info!("Starting Bulwark");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let queue = build_queue(config);
    if let Some(path) = messages {
        submit_from(&queue, path).await?;
    }
    let worker = QueueWorker::new(queue, Duration::from_secs(config.queue.poll_interval_secs));
    worker.run_until(shutdown_signal()).await;

    info!("Bulwark stopped");
    Ok(())
}

async fn drain(config: &BulwarkConfig, messages: &Path) -> anyhow::Result<()> {
    let queue = build_queue(config);
    submit_from(&queue, messages).await?;
    queue.process_pending().await;

    let stats = queue.get_stats().await;
    info!(
        pending = stats.pending,
        sent = stats.sent,
        failed = stats.failed,
        total = stats.total,
        "Queue drained"
    );
    Ok(())
}

async fn check(
    config: &BulwarkConfig,
    limiter_name: &str,
    identifier: &str,
    times: u32,
) -> anyhow::Result<()> {
    let registry = config.rate_limiting.registry();
    let limiter_config = registry
        .get(limiter_name)
        .ok_or_else(|| {
            BulwarkError::Configuration(format!(
                "unknown limiter {limiter_name:?}; configured: {:?}",
                registry.names()
            ))
        })?
        .clone();

    let limiter = AdmissionLimiter::new(Arc::new(InMemoryCounterStore::new()));

    for attempt in 1..=times {
        let line = match limiter.check(&limiter_config, identifier).await {
            Decision::Allowed {
                limit,
                remaining,
                reset_at,
            } => json!({
                "attempt": attempt,
                "allowed": true,
                "limit": limit,
                "remaining": remaining,
                "reset": reset_at.timestamp_millis(),
            }),
            Decision::Denied(denial) => json!({
                "attempt": attempt,
                "allowed": false,
                "status": denial.status(),
                "headers": denial
                    .headers()
                    .into_iter()
                    .collect::<std::collections::BTreeMap<_, _>>(),
                "body": denial.body(),
            }),
        };
        println!(
            "{}",
            serde_json::to_string(&line).context("failed to render decision")?
        );
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
