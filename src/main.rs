use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use tokio::signal;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sluice::config::{LogFormat, LoggingConfig, SluiceConfig};
use sluice::ratelimit::{LimiterRegistry, RateLimiter};

/// Sliding-window rate limiters for outbound API calls.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective configuration as YAML
    Config,
    /// Print the status of every configured limiter as JSON
    Status,
    /// Drive one limiter with a burst of requests
    Simulate {
        /// Name of the limiter to exercise
        #[arg(short, long)]
        limiter: String,

        /// Total number of requests to issue
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: usize,

        /// Reject when full, or wait for a slot
        #[arg(short, long, value_enum, default_value_t = Mode::Check)]
        mode: Mode,

        /// Requests in flight at once
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Check,
    Acquire,
}

#[derive(Debug, Serialize)]
struct Outcome {
    request: usize,
    admitted: bool,
    elapsed_ms: u64,
    remaining: u32,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    limiter: String,
    requests: usize,
    admitted: usize,
    rejected: usize,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = SluiceConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    log_startup(&config, cli.config.as_deref());

    let registry = LimiterRegistry::from_config(&config.limiters)?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&registry.snapshot())?);
        }
        Command::Simulate {
            limiter,
            requests,
            mode,
            concurrency,
        } => {
            let limiter = registry.require(&limiter)?;
            info!(
                limiter = %limiter.name(),
                requests = requests,
                mode = ?mode,
                "Starting simulation"
            );

            tokio::select! {
                summary = simulate(limiter, requests, mode, concurrency) => {
                    println!("{}", serde_json::to_string(&summary)?);
                }
                _ = shutdown_signal() => {
                    info!("Simulation interrupted");
                }
            }
        }
    }

    Ok(())
}

/// Startup banner. Runs once the subscriber is installed so nothing is lost.
fn log_startup(config: &SluiceConfig, path: Option<&Path>) {
    info!("Starting Sluice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        path = ?path,
        limiters = config.limiters.len(),
        "Configuration loaded"
    );
}

/// Issue `requests` calls against `limiter`, at most `concurrency` at a time,
/// printing one JSON line per outcome.
async fn simulate(
    limiter: Arc<RateLimiter>,
    requests: usize,
    mode: Mode,
    concurrency: usize,
) -> Summary {
    let start = Instant::now();
    let mut summary = Summary {
        limiter: limiter.name().to_string(),
        requests,
        ..Summary::default()
    };

    let mut outcomes = futures::stream::iter(0..requests)
        .map(|request| {
            let limiter = limiter.clone();
            async move {
                let admitted = match mode {
                    Mode::Check => limiter.check(),
                    Mode::Acquire => {
                        limiter.acquire().await;
                        true
                    }
                };
                Outcome {
                    request,
                    admitted,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    remaining: limiter.remaining(),
                }
            }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some(outcome) = outcomes.next().await {
        if outcome.admitted {
            summary.admitted += 1;
        } else {
            summary.rejected += 1;
        }
        if let Ok(line) = serde_json::to_string(&outcome) {
            println!("{}", line);
        }
    }

    summary.elapsed_ms = start.elapsed().as_millis() as u64;
    summary
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
