use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};

use super::{Context, ReportFormat, print_plan, print_warnings, run_cancellable};
use crate::cli::ExitStatus;
use crate::plan::RemediationMode;

#[derive(Args)]
pub struct PlanArgs {
    /// Remediation to plan
    #[arg(value_enum)]
    pub mode: PlanMode,

    /// Rules file for `redact`
    #[arg(long, value_name = "FILE", required_if_eq("mode", "redact"))]
    pub rules: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanMode {
    Purge,
    Redact,
}

impl From<PlanMode> for RemediationMode {
    fn from(mode: PlanMode) -> Self {
        match mode {
            PlanMode::Purge => RemediationMode::FullPurge,
            PlanMode::Redact => RemediationMode::SelectiveReplace,
        }
    }
}

pub async fn execute(args: PlanArgs, ctx: &Context) -> Result<ExitStatus> {
    let handle = ctx.repo()?;
    let mut config = ctx.load_config(&super::repo_root(&handle))?;
    if let Some(rules) = &args.rules {
        config = super::redact::with_rules(config, rules)?;
    }
    let planner = ctx.planner(handle, &config)?;

    let mode = RemediationMode::from(args.mode);
    let (planner, plan) = run_cancellable(planner, &ctx.output, move |planner, cancel| planner.plan_with(mode, cancel)).await?;
    if !plan.is_empty() {
        planner.record(&plan)?;
    }

    match args.format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        ReportFormat::Text if plan.is_empty() => {
            print_warnings(&plan, &ctx.output);
            ctx.output.success("No secrets found in history; nothing to rewrite");
        }
        ReportFormat::Text => {
            print_plan(&plan, &ctx.output);
            ctx.output.blank_line();
            let command = match args.mode {
                PlanMode::Purge => "purge".to_string(),
                PlanMode::Redact => format!(
                    "redact --rules {}",
                    args.rules.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
                ),
            };
            ctx.output.info(&format!(
                "Execute with `gitredact {command} --confirm {}`",
                plan.short_digest()
            ));
        }
    }

    Ok(if plan.is_empty() {
        ExitStatus::Clean
    } else {
        ExitStatus::Found
    })
}
