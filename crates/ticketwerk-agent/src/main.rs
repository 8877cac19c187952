// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ticketwerk: at-most-once thermal ticket delivery agent.
//
// Entry point. Initialises logging, resolves the data directory and
// dispatches the subcommand.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use services::agent::AgentServices;
use services::data_dir::data_dir;
use ticketwerk_core::Result;

#[derive(Debug, Parser)]
#[command(name = "ticketwerk")]
#[command(about = "Ticketwerk - print backend jobs on a USB thermal printer", long_about = None)]
struct Cli {
    /// Configuration file (default: <data-dir>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the ledger and configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the backend and print jobs until interrupted (default)
    Run,
    /// Show ledger counts, ambiguous jobs and the attached printer
    Status,
    /// Allow an ambiguous job to print again
    Requeue {
        /// Backend job id
        job_id: String,
    },
    /// Print a self-test ticket
    TestPrint,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "ticketwerk stopped");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let dir = data_dir(cli.data_dir.as_deref())?;
    let services = AgentServices::init(cli.config.as_deref(), dir)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "ticketwerk starting");
            services.run().await
        }
        Command::Status => {
            print!("{}", services.status()?);
            Ok(())
        }
        Command::Requeue { job_id } => services.requeue(&job_id),
        Command::TestPrint => services.test_print().await,
    }
}
