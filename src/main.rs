//! cmdward - supervised command execution from the terminal
//!
//! Thin binary entry point that delegates to modular CLI handlers.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cmdward_config::LoggingConfig;

mod cli;
mod startup;

use cli::args::Cli;
use startup::StartupContext;

/// Conventional exit status for a run cut short by Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // RUST_LOG takes precedence over the [logging] section
    let env_tracing = initialize_tracing_from_env();

    let startup = StartupContext::from_cli_args(&args)?;
    if !env_tracing {
        initialize_tracing_from_config(&startup.config.logging);
    }

    let supervisor = Arc::new(startup.build_supervisor());

    let outcome = tokio::select! {
        outcome = cli::dispatch(&args, &startup, Arc::clone(&supervisor)) => outcome,
        () = wait_for_interrupt() => {
            eprintln!("Interrupted; stopping running commands");
            Ok(INTERRUPTED_EXIT_CODE)
        }
    };

    let report = supervisor.shutdown().await;
    if !report.is_empty() {
        tracing::info!(terminated = report.len(), "stopped commands still running at exit");
    }

    let code = outcome?;
    if code != 0 {
        std::io::stdout().flush().ok();
        std::process::exit(code);
    }
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn wait_for_interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn initialize_tracing_from_env() -> bool {
    if std::env::var("RUST_LOG").is_err() {
        return false;
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

fn initialize_tracing_from_config(logging: &LoggingConfig) {
    let filter_str = logging.filter_directive();

    let initialized = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter_str)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if initialized {
        tracing::debug!(filter = %filter_str, "tracing initialized from configuration");
    }
}
