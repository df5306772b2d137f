// src/main.rs

use clap::Parser;
use std::process::ExitCode;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod manager;
mod sys;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::manager::LeaseManager;
use crate::sys::vault::build_http_client;

/// SPIFFE-enabled Vault credential manager
#[derive(Parser, Debug)]
#[command(name = "spiffe-vault-agent", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Write the credentials file once and exit instead of watching the lease
    #[arg(long)]
    init: bool,

    /// Print a single secret field on stdout and exit
    #[arg(long, value_name = "NAME", conflicts_with = "init")]
    key: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ==============================================================================
    // 1. Telemetry (stderr only: stdout is reserved for `--key`)
    // ==============================================================================
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Operation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    // ==============================================================================
    // 2. Configuration & Trust Anchor (fail fast)
    // ==============================================================================
    let config = AgentConfig::from_env()?;
    config.log_summary();

    let http_client = build_http_client(&config.service_ca_file)?;

    // ==============================================================================
    // 3. Dependency Injection & Mode Dispatch
    // ==============================================================================
    let mut manager = LeaseManager::new(config, http_client);

    if let Some(key) = cli.key {
        let value = manager.lookup_key(&key).await?;
        // Only the value: callers capture this with $(...).
        println!("{}", value);
        return Ok(());
    }

    if cli.init {
        return manager.run_once().await;
    }

    manager.watch(shutdown_signal()).await;
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on SIGINT or SIGTERM (the kubelet stops sidecars with the latter).
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
