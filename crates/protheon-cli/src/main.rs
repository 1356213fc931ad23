//! Protheon CLI - Main entry point

use std::process;

use clap::Parser;
use protheon_cli::commands::{self, ConductorArgs, ProducerArgs};
use protheon_cli::signal::cancel_on_shutdown;
use protheon_cli::{merge_log_env, Cli, Commands};
use protheon_common::logging::{init_logging, LogConfig, LogLevel};
use tokio_util::sync::CancellationToken;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(level)
        .log_file_prefix(format!("protheon-{}", cli.command.role()))
        .build();

    // Environment variables take precedence
    let (log_config, warning) = merge_log_env(log_config);
    if let Some(warning) = warning {
        eprintln!("Warning: {warning}");
    }

    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    if let Err(e) = execute_command(cli, cancel).await {
        error!(error = %format!("{e:#}"), "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn execute_command(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    match cli.command {
        Commands::Conductor {
            host,
            port,
            queue,
            emit,
            emit_interval,
        } => {
            let args = ConductorArgs {
                host,
                port,
                queue,
                emit,
                emit_interval,
            };
            commands::conductor(cli.broker_url, args, cancel).await
        }

        Commands::Mind {
            conductor_url,
            prefetch,
        } => commands::mind(cli.broker_url, conductor_url, prefetch, cancel).await,

        Commands::Producer {
            root,
            ext,
            concurrency,
            queue,
        } => {
            let args = ProducerArgs {
                root,
                ext,
                concurrency,
                queue,
            };
            commands::producer(cli.broker_url, args, cancel).await
        }
    }
}
