use std::collections::BTreeSet;

use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;

use super::{Context, run_cancellable};
use crate::cli::{ExitStatus, Output};
use crate::config::Config;
use crate::scanner::{PatternKind, ScanOptions, ScanReport, SignatureSet};
use crate::walker::Scope;

#[derive(Args)]
pub struct ScanArgs {
    /// Scan every blob reachable from any ref, including remote-tracking refs
    #[arg(long, conflicts_with = "staged")]
    pub history: bool,

    /// Scan staged changes only (used by the pre-commit hook)
    #[arg(long)]
    pub staged: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Stop at the first match
    #[arg(long)]
    pub fail_fast: bool,

    /// List configured signatures and exit
    #[arg(long)]
    pub list_signatures: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    /// Paths of files with matches, one per line
    Files,
}

impl ScanArgs {
    fn scope(&self) -> Scope {
        if self.history {
            Scope::FullHistory
        } else if self.staged {
            Scope::Staged
        } else {
            Scope::WorkingTree
        }
    }
}

pub async fn execute(args: ScanArgs, ctx: &Context) -> Result<ExitStatus> {
    let handle = ctx.repo()?;
    let config = ctx.load_config(&super::repo_root(&handle))?;

    if args.list_signatures {
        list_signatures(&config)?;
        return Ok(ExitStatus::Clean);
    }

    let scope = args.scope();
    let planner = ctx.planner(handle, &config)?;
    let fail_fast = args.fail_fast;

    tracing::info!("Scanning {scope}");
    let (_, report) = run_cancellable(planner, &ctx.output, move |planner, cancel| {
        let options = ScanOptions {
            fail_fast,
            cancel: cancel.clone(),
        };
        planner.scan(scope, &options)
    })
    .await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Files => print_files(&report),
        OutputFormat::Text => print_text(&report, &ctx.output),
    }

    Ok(if report.has_matches() {
        ExitStatus::Found
    } else {
        ExitStatus::Clean
    })
}

fn list_signatures(config: &Config) -> Result<()> {
    let signatures = SignatureSet::compile(&config.signatures)?;
    println!("{} signatures:", style(signatures.len()).bold());
    for signature in signatures.iter() {
        let kind = match signature.kind {
            PatternKind::Regex => "regex",
            PatternKind::Literal => "literal",
        };
        println!(
            "  {} {} {}",
            style(&signature.id).cyan().bold(),
            style(format!("({kind})")).dim(),
            signature.description
        );
    }
    Ok(())
}

fn print_files(report: &ScanReport) {
    let paths: BTreeSet<&str> = report
        .matches
        .iter()
        .filter_map(|m| report.sources.get(&m.blob_id))
        .map(|source| source.path())
        .collect();
    for path in paths {
        println!("{path}");
    }
}

fn print_text(report: &ScanReport, output: &Output) {
    for skipped in &report.skipped {
        output.verbose(&format!("Skipped {}", skipped.source));
    }

    if !report.has_matches() {
        output.success(&format!(
            "No secrets detected ({} blobs scanned in {})",
            report.blobs_scanned, report.scope
        ));
        return;
    }

    for m in &report.matches {
        let location = report
            .sources
            .get(&m.blob_id)
            .map(ToString::to_string)
            .unwrap_or_else(|| m.blob_id.short());
        output.file_location(&location, m.line, &m.signature_id);
        output.indent(&m.context_snippet);
    }

    output.blank_line();
    output.warning(&format!(
        "Found {} potential secrets in {} blobs ({} scanned)",
        report.matches.len(),
        report.affected_blob_count(),
        report.blobs_scanned
    ));
    if report.stopped_early {
        output.info("Stopped at the first match (--fail-fast)");
    }
    if report.scope != Scope::FullHistory {
        output.info("Run `gitredact scan --history` to check past commits");
    }
}
