// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer CLI - Terminal frontend for croc transfers

mod render;

use anyhow::Context;
use clap::{Parser, Subcommand};
use render::StatusRenderer;
use siro_transfer_core::{
    preflight, AppSettings, SettingsStore, TransferHistory, TransferManager, TransferOutcome,
    TransferRequest,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Send and receive files with croc
#[derive(Parser)]
#[command(name = "siro")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// croc executable to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    croc: Option<PathBuf>,

    /// Cancel the transfer after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Do not record this transfer in the history
    #[arg(long, global = true)]
    no_history: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send files; prints the code phrase for the receiver
    Send {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Use this code phrase instead of a generated one
        #[arg(long)]
        code: Option<String>,
    },

    /// Receive files using a code phrase
    Receive {
        code: String,

        /// Output directory (defaults to the configured download dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show past transfers
    History {
        /// Delete all history entries
        #[arg(long)]
        clear: bool,
    },

    /// Check that a usable croc is installed
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("siro_transfer_cli={}", level).parse()?)
                .add_directive(format!("siro_transfer_core={}", level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting Siro Transfer CLI v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Send { paths, code } => {
            let request = TransferRequest::Send {
                paths: paths.clone(),
                code: code.clone(),
            };
            run_transfer(&cli, request).await
        }
        Commands::Receive { code, out } => {
            let request = TransferRequest::Receive {
                code: code.clone(),
                destination: out.clone(),
            };
            run_transfer(&cli, request).await
        }
        Commands::History { clear } => show_history(*clear),
        Commands::Check => check(&cli),
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<AppSettings> {
    let store = SettingsStore::new().context("Failed to load settings")?;
    let mut settings = store.get();
    if let Some(croc) = &cli.croc {
        settings.croc_path = Some(croc.clone());
    }
    Ok(settings)
}

async fn run_transfer(cli: &Cli, request: TransferRequest) -> anyhow::Result<ExitCode> {
    let settings = load_settings(cli)?;
    let installation = preflight(&settings)?;
    tracing::info!(
        "Using croc {} at {}",
        installation.version_label(),
        installation.program.display()
    );

    let max_history = settings.max_history;
    let mut manager = TransferManager::new(settings, installation);
    if !cli.no_history {
        match TransferHistory::new(max_history) {
            Ok(history) => manager = manager.with_history(Arc::new(history)),
            Err(e) => tracing::warn!("History disabled: {}", e),
        }
    }

    let direction = request.direction();
    let task = manager.start(request)?;
    let events = task.events().clone();
    let mut renderer = StatusRenderer::new(direction);

    let deadline = async {
        match cli.timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut cancelling = false;

    loop {
        tokio::select! {
            status = events.recv() => match status {
                Ok(status) => renderer.update(&status),
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                renderer.note("Cancelling...");
                task.cancel().await;
            }
            _ = &mut deadline, if !cancelling => {
                cancelling = true;
                renderer.note("Timed out, cancelling...");
                task.cancel().await;
            }
        }
    }

    match task.wait().await {
        Ok(result) if result.is_success() => Ok(ExitCode::SUCCESS),
        Ok(result) => {
            tracing::debug!("croc exit code: {:?}", result.exit_code);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            tracing::error!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn show_history(clear: bool) -> anyhow::Result<ExitCode> {
    let settings = SettingsStore::new().context("Failed to load settings")?.get();
    let history = TransferHistory::new(settings.max_history)?;

    if clear {
        history.clear()?;
        println!("History cleared");
        return Ok(ExitCode::SUCCESS);
    }

    let records = history.list();
    if records.is_empty() {
        println!("No transfers yet");
    }
    for record in records {
        let outcome = match record.outcome {
            TransferOutcome::Completed => "ok",
            TransferOutcome::Failed => "failed",
        };
        print!(
            "{}  {:<7}  {:<6}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.direction.label(),
            outcome,
            record.summary
        );
        match record.message {
            Some(message) => println!("  ({})", message),
            None => println!(),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn check(cli: &Cli) -> anyhow::Result<ExitCode> {
    let settings = load_settings(cli)?;
    match preflight(&settings) {
        Ok(installation) => {
            println!(
                "croc {} at {}",
                installation.version_label(),
                installation.program.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
