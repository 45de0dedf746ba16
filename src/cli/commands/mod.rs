//! Command implementations for the gitredact CLI
//!
//! Each command lives in its own module. Shared plumbing (repository and
//! config loading, cancellation, confirmation and plan rendering) lives here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};

use crate::cli::{ExitStatus, Output};
use crate::config::{Config, Settings};
use crate::error::Error;
use crate::git::RepoHandle;
use crate::notify::{CompositeNotifier, JsonLinesNotifier, LogNotifier, RotationNotifier};
use crate::plan::{ConfirmationToken, ConfirmedPlan, Plan, Planner, RemediationMode};
use crate::rewrite::{RefUpdate, RewriteResult};
use crate::scanner::{CancelFlag, SkipReason};

pub mod config;
pub mod hook;
pub mod plan;
pub mod purge;
pub mod redact;
pub mod scan;

/// Global options shared by every command
pub struct Context {
    pub directory: PathBuf,
    pub config: Option<PathBuf>,
    pub output: Output,
}

impl Context {
    pub fn repo(&self) -> Result<RepoHandle> {
        RepoHandle::discover(&self.directory)
            .with_context(|| format!("Failed to open a git repository at {}", self.directory.display()))
    }

    pub fn load_config(&self, root: &Path) -> Result<Config> {
        Config::load(root, self.config.as_deref()).context("Failed to load configuration")
    }

    /// Build a planner for `handle` with the given configuration.
    pub fn planner(&self, handle: RepoHandle, config: &Config) -> Result<Planner> {
        let settings = Settings::from_config(config)?;
        let notifier = build_notifier(&settings, &repo_root(&handle));
        Ok(Planner::new(handle, settings, notifier))
    }
}

/// Work tree root, or the git dir for bare repositories
pub fn repo_root(handle: &RepoHandle) -> PathBuf {
    handle
        .workdir()
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| handle.git_dir().to_path_buf())
}

fn build_notifier(settings: &Settings, root: &Path) -> Arc<dyn RotationNotifier> {
    let mut notifier = CompositeNotifier::new().with(LogNotifier);
    if let Some(events_file) = &settings.notify.events_file {
        notifier = notifier.with(JsonLinesNotifier::new(root.join(events_file)));
    }
    Arc::new(notifier)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

/// How a destructive command is confirmed
#[derive(Debug, Clone, Args)]
pub struct ConfirmArgs {
    /// Execute the plan without prompting
    #[arg(short, long, conflicts_with = "confirm")]
    pub yes: bool,

    /// Execute only if the plan digest starts with <DIGEST>
    #[arg(long, value_name = "DIGEST")]
    pub confirm: Option<String>,
}

/// Run planning or scanning work off the async runtime. Ctrl-C sets the
/// cancel flag and waits for workers to drain.
pub async fn run_cancellable<T, F>(planner: Planner, output: &Output, work: F) -> Result<(Planner, T)>
where
    F: FnOnce(&Planner, &CancelFlag) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        let result = work(&planner, &flag);
        (planner, result)
    });

    let (planner, result) = tokio::select! {
        joined = &mut task => joined?,
        Ok(()) = tokio::signal::ctrl_c() => {
            output.warning("Interrupted; stopping after blobs in flight");
            cancel.cancel();
            task.await?
        }
    };
    Ok((planner, result?))
}

/// Run a rewrite to completion. Ctrl-C is acknowledged but refused.
pub async fn run_uninterruptible<T, F>(planner: Planner, output: &Output, work: F) -> Result<T>
where
    F: FnOnce(&Planner) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(move || work(&planner));
    loop {
        tokio::select! {
            joined = &mut task => return Ok(joined??),
            Ok(()) = tokio::signal::ctrl_c() => {
                output.warning("History rewrite in progress; cancellation refused");
            }
        }
    }
}

/// Turn a plan into a confirmed plan using the flags, or a prompt when a
/// user is at the terminal.
pub fn confirm_plan(planner: &Planner, plan: Plan, args: &ConfirmArgs, output: &Output) -> Result<ConfirmedPlan> {
    let token = if args.yes {
        plan.token()
    } else if let Some(digest) = &args.confirm {
        ConfirmationToken::new(digest.trim())
    } else if console::user_attended() {
        let prompt = format!("Rewrite history as planned (digest {})?", plan.short_digest());
        if !output.confirm(&prompt)? {
            return Err(Error::ConfirmationDenied("declined at the prompt".to_string()).into());
        }
        plan.token()
    } else {
        return Err(Error::ConfirmationDenied(format!(
            "no terminal to confirm on; re-run with --confirm {} or --yes",
            plan.short_digest()
        ))
        .into());
    };
    Ok(planner.confirm(plan, &token)?)
}

/// Plan, confirm and execute one remediation.
pub async fn remediate(
    planner: Planner,
    mode: RemediationMode,
    args: &ConfirmArgs,
    output: &Output,
) -> Result<ExitStatus> {
    output.step(&format!("Planning {mode} over the full history"));
    let (planner, plan) = run_cancellable(planner, output, move |planner, cancel| planner.plan_with(mode, cancel)).await?;

    if plan.is_empty() {
        print_warnings(&plan, output);
        output.success("No secrets found in history; nothing to rewrite");
        return Ok(ExitStatus::Clean);
    }
    print_plan(&plan, output);

    let confirmed = confirm_plan(&planner, plan, args, output)?;
    output.step("Rewriting history");
    let result = run_uninterruptible(planner, output, move |planner| planner.execute(confirmed)).await?;
    print_result(&result, output);
    Ok(ExitStatus::Found)
}

pub fn print_plan(plan: &Plan, output: &Output) {
    output.header(&format!("Plan: {}", plan.mode()));
    output.key_value("Blobs scanned", &plan.blobs_scanned().to_string(), false);
    output.key_value("Matches", &plan.match_count().to_string(), false);
    output.key_value("Affected blobs", &plan.affected_blob_count().to_string(), false);
    output.key_value("Affected commits", &plan.affected_commit_count().to_string(), false);
    output.key_value("Signatures", &plan.exposed_signatures().join(", "), false);
    if !plan.skipped().is_empty() {
        output.key_value("Skipped blobs", &plan.skipped().len().to_string(), false);
    }
    output.key_value("Digest", plan.digest(), true);

    if !plan.matches().is_empty() {
        output.blank_line();
        for m in plan.matches() {
            let location = plan
                .sources()
                .get(&m.blob_id)
                .map(ToString::to_string)
                .unwrap_or_else(|| m.blob_id.short());
            output.file_location(&location, m.line, &m.signature_id);
            output.indent(&m.context_snippet);
        }
    }

    if plan.mode() == RemediationMode::FullPurge {
        let snapshot = plan.snapshot();
        let deleted: Vec<&String> = snapshot
            .refs
            .keys()
            .filter(|name| Some(name.as_str()) != snapshot.head.branch())
            .collect();
        if !deleted.is_empty() {
            output.blank_line();
            output.warning(&format!("{} refs will be deleted:", deleted.len()));
            for name in deleted {
                output.list_item(name);
            }
        }
    }

    print_warnings(plan, output);

    if output.is_verbose() {
        for skipped in plan.skipped() {
            let reason = match &skipped.reason {
                SkipReason::Binary => "binary".to_string(),
                SkipReason::TooLarge { size, limit } => format!("{size} bytes, limit {limit}"),
            };
            output.verbose(&format!("Skipped {} ({reason})", skipped.source));
        }
    }
}

/// Matches the plan leaves in place because no rewritten ref reaches them
pub fn print_warnings(plan: &Plan, output: &Output) {
    if plan.warnings().is_empty() {
        return;
    }
    output.blank_line();
    output.warning(&format!(
        "{} blobs with secrets are only reachable from refs that will not be rewritten:",
        plan.warnings().len()
    ));
    for warning in plan.warnings() {
        output.list_item(warning);
    }
}

pub fn print_result(result: &RewriteResult, output: &Output) {
    output.success(&format!(
        "History rewritten ({}): {} commits re-created",
        result.mode, result.remapped_commit_count
    ));
    if let Some(old_head) = &result.old_head {
        output.key_value("Old HEAD", &old_head.to_string(), false);
    }
    if let Some(new_head) = &result.new_head {
        output.key_value("New HEAD", &new_head.to_string(), true);
    }
    for update in &result.ref_updates {
        match update {
            RefUpdate::Moved { name, from, to } => {
                output.list_item(&format!("{name}: {} -> {}", from.short(), to.short()))
            }
            RefUpdate::Deleted { name, from } => output.list_item(&format!("{name}: deleted (was {})", from.short())),
        }
    }
    for warning in &result.warnings {
        output.warning(warning);
    }
    output.info("Rotate every exposed credential; rewriting history does not revoke it");
}
