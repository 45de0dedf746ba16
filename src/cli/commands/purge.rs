use anyhow::Result;
use clap::Args;

use super::{ConfirmArgs, Context, remediate};
use crate::cli::ExitStatus;
use crate::plan::RemediationMode;

#[derive(Args)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub confirm: ConfirmArgs,
}

pub async fn execute(args: PurgeArgs, ctx: &Context) -> Result<ExitStatus> {
    let handle = ctx.repo()?;
    let config = ctx.load_config(&super::repo_root(&handle))?;
    let planner = ctx.planner(handle, &config)?;

    ctx.output
        .warning("Purging replaces all history with a single commit and deletes every other branch and tag");
    remediate(planner, RemediationMode::FullPurge, &args.confirm, &ctx.output).await
}
