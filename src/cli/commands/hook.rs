use anyhow::Result;
use clap::{Args, Subcommand};

use super::Context;
use crate::cli::ExitStatus;
use crate::error::Error;
use crate::hooks::{self, InstallOutcome};

#[derive(Args)]
pub struct HookArgs {
    #[command(subcommand)]
    pub command: HookCommand,
}

#[derive(Subcommand)]
pub enum HookCommand {
    /// Install a pre-commit hook that scans staged changes
    Install {
        /// Overwrite a pre-commit hook this tool did not install
        #[arg(short, long)]
        force: bool,
    },
    /// Remove the pre-commit hook if this tool installed it
    Uninstall,
}

pub fn execute(args: HookArgs, ctx: &Context) -> Result<ExitStatus> {
    let handle = ctx.repo()?;

    match args.command {
        HookCommand::Install { force } => match hooks::install(&handle, force)? {
            InstallOutcome::Installed(path) => {
                ctx.output.success(&format!("Installed pre-commit hook at {}", path.display()));
            }
            InstallOutcome::Replaced(path) => {
                ctx.output.success(&format!("Replaced pre-commit hook at {}", path.display()));
            }
            InstallOutcome::Conflict(path) => {
                return Err(Error::configuration(format!(
                    "{} exists and was not installed by gitredact; use --force to replace it",
                    path.display()
                ))
                .into());
            }
        },
        HookCommand::Uninstall => {
            if hooks::uninstall(&handle)? {
                ctx.output.success("Removed pre-commit hook");
            } else {
                ctx.output.info("No gitredact pre-commit hook installed");
            }
        }
    }
    Ok(ExitStatus::Clean)
}
