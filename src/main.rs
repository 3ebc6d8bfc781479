use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use bazaar_ratelimit::config::ServiceConfig;
use bazaar_ratelimit::ratelimit::{PolicySet, RateLimiter};

/// Operator tool for the Bazaar request rate limiter.
#[derive(Debug, Parser)]
#[command(name = "bazaar-ratelimit", version, about)]
struct Cli {
    /// Service configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Policy file layered over the built-in presets (overrides the config file)
    #[arg(short, long, global = true)]
    policies: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective policy table
    Policies,
    /// Feed `<policy> <key>` lines through the limiter and print each decision
    Replay {
        /// Input file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.policies {
        config.limiter.policies_path = Some(path);
    }
    info!(
        sweep_interval_secs = config.limiter.sweep_interval_secs,
        policies_path = ?config.limiter.policies_path,
        "Configuration loaded"
    );

    let policies = config.limiter.load_policies()?;

    match cli.command {
        Command::Policies => {
            println!("{}", serde_json::to_string_pretty(&policies)?);
        }
        Command::Replay { input } => {
            let limiter = Arc::new(RateLimiter::new());
            let sweeper = limiter.spawn_sweeper(config.limiter.sweep_interval())?;

            let result = if input.as_os_str() == "-" {
                replay(BufReader::new(tokio::io::stdin()), &limiter, &policies).await
            } else {
                let file = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("failed to open {}", input.display()))?;
                replay(BufReader::new(file), &limiter, &policies).await
            };

            sweeper.stop().await;
            result?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    // Decisions go to stdout, logs to stderr.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Run every `<policy> <key>` line through the limiter until EOF or a
/// shutdown signal.
async fn replay<R>(reader: R, limiter: &RateLimiter, policies: &PolicySet) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    let (mut admitted, mut denied) = (0u64, 0u64);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line.context("failed to read replay input")?,
        };
        let Some(line) = line else { break };
        line_no += 1;

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((policy_name, key)) = line.split_once(char::is_whitespace) else {
            warn!(line = line_no, "Skipping line without a key");
            continue;
        };
        let key = key.trim();

        let decision = match limiter.check_named(key, policies, policy_name) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping line");
                continue;
            }
        };

        if decision.allowed {
            admitted += 1;
        } else {
            denied += 1;
        }

        println!(
            "{}",
            json!({
                "line": line_no,
                "policy": policy_name,
                "key": key,
                "allowed": decision.allowed,
                "remaining": decision.remaining,
                "reset_at_ms": decision.reset_at_ms(),
                "retry_after_ms": decision.retry_after().as_millis() as u64,
            })
        );
    }

    info!(
        admitted = admitted,
        denied = denied,
        tracked_keys = limiter.entry_count(),
        "Replay finished"
    );
    println!(
        "{}",
        json!({ "admitted": admitted, "denied": denied, "tracked_keys": limiter.entry_count() })
    );

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping replay");
        }
    }
}
