use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GateConfig;
use gatekeeper::store::PostgresStore;
use gatekeeper::{ClientIdentity, Gate};

/// Per-client admission control backed by PostgreSQL.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an admission check for each client address
    Check {
        /// Client addresses, with or without port
        #[arg(required = true)]
        addrs: Vec<String>,
    },
    /// Connect to the counter store and report once it is reachable
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GateConfig::load(cli.config.as_deref())?;
    config.validate()?;
    info!(
        limit = config.rate_limiting.limit,
        timespan_secs = config.rate_limiting.timespan_secs,
        table = %config.store.table,
        "Configuration loaded"
    );

    // Cancelling this token interrupts the store's reconnect loop.
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let store = Arc::new(PostgresStore::from_config(&config.store, shutdown.clone())?);

    match cli.command {
        Command::Probe => {
            store.manager().ensure_connected().await?;
            info!(state = ?store.manager().state(), "Counter store reachable");
        }
        Command::Check { addrs } => {
            let gate = Gate::from_config(store, &config.rate_limiting)?;
            run_checks(&gate, &addrs).await;
        }
    }

    info!("gatekeeper stopped");
    Ok(())
}

async fn run_checks(gate: &Gate, addrs: &[String]) {
    let checks = addrs.iter().map(|addr| async move {
        let identity = match ClientIdentity::from_remote_addr(addr) {
            Ok(identity) => identity,
            Err(e) => {
                return json!({ "addr": addr, "error": e.to_string() });
            }
        };

        let verdict = gate.check(&identity.as_key()).await;
        if let (false, Some(e)) = (verdict.rejected, verdict.error.as_ref()) {
            warn!(identity = %identity, error = %e, "Admitted without recording the access");
        }

        json!({
            "identity": identity.as_key(),
            "rejected": verdict.rejected,
            "wait_secs": verdict.wait_secs_f64(),
            "error": verdict.error.as_ref().map(|e| e.to_string()),
        })
    });

    for line in futures::future::join_all(checks).await {
        println!("{}", line);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
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
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
