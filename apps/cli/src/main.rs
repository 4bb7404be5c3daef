//! Stratus - pipeline orchestration engine
//!
//! Main entry point for the `stratus` CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod steps;

use commands::{run, validate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Stratus - validate and run orchestration plans
#[derive(Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "STRATUS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a plan file and print every problem found
    Validate(validate::ValidateArgs),

    /// Run a plan with the demo steps and print the executions
    Run(run::RunArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = config::Settings::load(cli.config.as_deref())?;
    if cli.verbose {
        settings.log.level = "stratus=debug,info".to_string();
    }
    stratus_log::init(&settings.log)?;

    match cli.command {
        Commands::Validate(args) => validate::run(args),
        Commands::Run(args) => run::run(args, &settings).await,
    }
}
