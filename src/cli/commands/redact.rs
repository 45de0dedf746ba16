use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;

use super::{ConfirmArgs, Context, remediate};
use crate::cli::ExitStatus;
use crate::config::{Config, load_rules};
use crate::plan::RemediationMode;

#[derive(Args)]
pub struct RedactArgs {
    /// Signatures to redact: TOML/YAML/JSON, or `secret==>replacement` lines
    #[arg(long, value_name = "FILE")]
    pub rules: PathBuf,

    #[command(flatten)]
    pub confirm: ConfirmArgs,
}

pub async fn execute(args: RedactArgs, ctx: &Context) -> Result<ExitStatus> {
    let handle = ctx.repo()?;
    let config = ctx.load_config(&super::repo_root(&handle))?;
    let config = with_rules(config, &args.rules)?;
    let planner = ctx.planner(handle, &config)?;

    remediate(planner, RemediationMode::SelectiveReplace, &args.confirm, &ctx.output).await
}

/// Replace the configured signatures with those from a rules file.
pub(super) fn with_rules(config: Config, rules: &Path) -> Result<Config> {
    let signatures =
        load_rules(rules).with_context(|| format!("Failed to load rules from {}", rules.display()))?;
    tracing::info!("Loaded {} rules from {}", signatures.len(), rules.display());
    Ok(config.with_signatures(signatures))
}
