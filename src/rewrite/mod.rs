//! History rewriting
//!
//! Rewrites never touch the original repository until they have fully
//! succeeded. New objects go to a private scratch repository that borrows the
//! original object store as an alternate; on success the objects are copied
//! over and synced, then every ref moves in one locked transaction.

mod purge;
mod scratch;
mod selective;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::Serialize;

pub use scratch::{SCRATCH_PREFIX, ScratchStore};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::git::{CommitId, ObjectId, RefSnapshot, RepoHandle};
use crate::plan::{ConfirmedPlan, RemediationMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteState {
    Planned,
    Confirmed,
    Rewriting,
    Completed,
    Aborted,
}

impl RewriteState {
    fn name(self) -> &'static str {
        match self {
            RewriteState::Planned => "planned",
            RewriteState::Confirmed => "confirmed",
            RewriteState::Rewriting => "rewriting",
            RewriteState::Completed => "completed",
            RewriteState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RewriteState::Completed | RewriteState::Aborted)
    }
}

impl fmt::Display for RewriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of one remediation:
/// `Planned -> Confirmed -> Rewriting -> {Completed | Aborted}`.
#[derive(Debug)]
pub struct RewriteSession {
    state: RewriteState,
}

impl Default for RewriteSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteSession {
    pub fn new() -> Self {
        Self {
            state: RewriteState::Planned,
        }
    }

    pub fn state(&self) -> RewriteState {
        self.state
    }

    pub fn advance(&mut self, to: RewriteState) -> Result<()> {
        use RewriteState::*;
        let allowed = matches!(
            (self.state, to),
            (Planned, Confirmed) | (Confirmed, Rewriting) | (Rewriting, Completed) | (Rewriting, Aborted)
        );
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            });
        }
        tracing::debug!("Rewrite session {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }
}

/// A ref change applied by a rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RefUpdate {
    Moved { name: String, from: ObjectId, to: ObjectId },
    Deleted { name: String, from: ObjectId },
}

impl RefUpdate {
    pub fn name(&self) -> &str {
        match self {
            RefUpdate::Moved { name, .. } | RefUpdate::Deleted { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RewriteResult {
    pub mode: RemediationMode,
    pub old_head: Option<CommitId>,
    pub new_head: Option<CommitId>,
    /// Commits re-created with new ids
    pub remapped_commit_count: usize,
    pub ref_updates: Vec<RefUpdate>,
    pub warnings: Vec<String>,
}

/// Everything a rewrite strategy produced in the scratch store
pub(crate) struct Outcome {
    pub new_head: Option<CommitId>,
    pub remapped_commit_count: usize,
    pub ref_updates: Vec<RefUpdate>,
    pub warnings: Vec<String>,
}

pub struct Rewriter<'a> {
    handle: &'a RepoHandle,
    settings: &'a Settings,
    /// Abort after this many commits are written, for atomicity tests
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl<'a> Rewriter<'a> {
    pub fn new(handle: &'a RepoHandle, settings: &'a Settings) -> Self {
        Self {
            handle,
            settings,
            #[cfg(test)]
            fail_after: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn fail_after(mut self, commits: usize) -> Self {
        self.fail_after = Some(commits);
        self
    }

    /// Check whether the fault injector should trip after `written` commits.
    pub(crate) fn check_fault(&self, written: usize) -> Result<()> {
        #[cfg(test)]
        if self.fail_after.is_some_and(|limit| written >= limit) {
            return Err(Error::aborted(format!("injected fault after {written} commits")));
        }
        let _ = written;
        Ok(())
    }

    /// Execute a confirmed plan. Once rewriting starts it runs to completion
    /// or aborts with the repository unchanged.
    pub fn rewrite(&self, confirmed: ConfirmedPlan) -> Result<RewriteResult> {
        let (plan, mut session) = confirmed.into_parts();
        session.advance(RewriteState::Rewriting)?;
        tracing::info!("Rewriting history ({})", plan.mode());

        if let Err(e) = ScratchStore::sweep_stale(self.handle) {
            tracing::warn!("Could not remove stale scratch directories: {e}");
        }

        let attempt = (|| {
            let scratch = ScratchStore::create(self.handle)?;
            let outcome = match plan.mode() {
                RemediationMode::SelectiveReplace => selective::rewrite(self, &scratch, &plan)?,
                RemediationMode::FullPurge => purge::rewrite(self, &scratch, &plan)?,
            };
            let copied = scratch.publish(self.handle)?;
            tracing::debug!("Copied {copied} objects into the repository");
            swap_refs(self.handle, plan.snapshot(), &outcome.ref_updates)?;
            Ok::<_, Error>(outcome)
        })();

        match attempt {
            Ok(outcome) => {
                session.advance(RewriteState::Completed)?;
                for warning in &outcome.warnings {
                    tracing::warn!("{warning}");
                }
                Ok(RewriteResult {
                    mode: plan.mode(),
                    old_head: plan.snapshot().head.commit(),
                    new_head: outcome.new_head,
                    remapped_commit_count: outcome.remapped_commit_count,
                    ref_updates: outcome.ref_updates,
                    warnings: outcome.warnings,
                })
            }
            Err(e) => {
                session.advance(RewriteState::Aborted)?;
                tracing::error!("Rewrite aborted, no refs were moved: {e}");
                Err(e)
            }
        }
    }

    pub(crate) fn handle(&self) -> &RepoHandle {
        self.handle
    }

    pub(crate) fn settings(&self) -> &Settings {
        self.settings
    }
}

/// Move every ref in one transaction, after checking under lock that
/// nothing changed since planning.
fn swap_refs(handle: &RepoHandle, planned: &RefSnapshot, updates: &[RefUpdate]) -> Result<()> {
    let repo = handle.repo();
    let mut transaction = repo.transaction()?;
    for update in updates {
        transaction.lock_ref(update.name())?;
    }

    let current = RefSnapshot::capture(repo)?;
    if let Some(change) = planned.diff(&current) {
        return Err(Error::StalePlan(change));
    }

    for update in updates {
        match update {
            RefUpdate::Moved { name, to, .. } => {
                transaction.set_target(name, to.oid(), None, "gitredact: rewrite history")?;
            }
            RefUpdate::Deleted { name, .. } => transaction.remove(name)?,
        }
    }
    transaction.commit()?;
    tracing::info!("Updated {} refs", updates.len());
    Ok(())
}
