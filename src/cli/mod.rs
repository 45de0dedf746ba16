//! Command-line interface for gitredact
//!
//! Parses arguments with clap, installs logging and dispatches to the
//! command modules. `-C` is resolved to a path and handed down; the process
//! working directory is never changed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

pub mod commands;
mod output;

pub use output::Output;

#[derive(Parser)]
#[command(
    name = "gitredact",
    version,
    about = "Scan git repositories for secrets and redact or purge them from history",
    long_about = "gitredact finds secret-like content in the working tree, the index or the full \
                  history, prints a dry-run plan with a digest, and rewrites history only after \
                  the plan is confirmed."
)]
pub struct Cli {
    /// Run as if started in <DIR> instead of the current working directory
    #[arg(short = 'C', long = "directory", value_name = "DIR", global = true)]
    pub directory: Option<PathBuf>,

    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use a custom configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the working tree, index or history for secrets
    Scan(commands::scan::ScanArgs),
    /// Replace all history with a single commit of the current files
    Purge(commands::purge::PurgeArgs),
    /// Replace matched secrets across history using a rules file
    Redact(commands::redact::RedactArgs),
    /// Print a remediation plan and its digest without executing it
    Plan(commands::plan::PlanArgs),
    /// Manage the pre-commit hook
    Hook(commands::hook::HookArgs),
    /// Inspect the merged configuration
    Config(commands::config::ConfigArgs),
}

/// Successful command outcome, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Nothing found, nothing to do
    Clean,
    /// A scan found matches or a plan was executed
    Found,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Clean => ExitCode::SUCCESS,
            ExitStatus::Found => ExitCode::from(1),
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<ExitStatus> {
        setup_logging(self.verbose, self.quiet);

        let ctx = commands::Context {
            directory: self.directory.unwrap_or_else(|| PathBuf::from(".")),
            config: self.config,
            output: Output::new(self.verbose > 0, self.quiet),
        };

        match self.command {
            Some(Commands::Scan(args)) => commands::scan::execute(args, &ctx).await,
            Some(Commands::Purge(args)) => commands::purge::execute(args, &ctx).await,
            Some(Commands::Redact(args)) => commands::redact::execute(args, &ctx).await,
            Some(Commands::Plan(args)) => commands::plan::execute(args, &ctx).await,
            Some(Commands::Hook(args)) => commands::hook::execute(args, &ctx),
            Some(Commands::Config(args)) => commands::config::execute(args, &ctx),
            None => {
                Cli::command().print_help()?;
                Ok(ExitStatus::Clean)
            }
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => tracing_subscriber::EnvFilter::new("warn"),
        1 => tracing_subscriber::EnvFilter::new("info,ignore=warn,globset=warn"),
        2 => tracing_subscriber::EnvFilter::new("debug,ignore=warn,globset=warn"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    });

    // Logs go to stderr so `--format json` stays parseable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
