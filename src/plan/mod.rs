//! Remediation planning
//!
//! A [`Plan`] is a dry run: it lists what a remediation would change and is
//! bound to the repository state it was computed from by a digest. Executing
//! requires confirming with that digest, and consumes the plan.

mod digest;
mod record;
mod redaction;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use git2::{ObjectType, Oid, Repository, Sort};
use serde::{Deserialize, Serialize};

pub use digest::{MIN_TOKEN_LEN, plan_digest, token_matches};
pub use record::PlanRecord;
pub use redaction::{Redaction, apply as apply_redactions, resolve as resolve_redactions};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::git::{BlobId, CommitId, HeadState, RefSnapshot, RepoHandle};
use crate::notify::{RotationNotifier, SecretsExposedEvent};
use crate::rewrite::{RewriteResult, RewriteSession, RewriteState, Rewriter};
use crate::scanner::{CancelFlag, Match, ScanOptions, ScanPool, ScanReport, SkippedBlob};
use crate::walker::{BlobSource, ReaderSource, Scope, Walker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationMode {
    /// Replace history with one root commit built from the working tree
    FullPurge,
    /// Rewrite only the matched byte ranges across history
    SelectiveReplace,
}

impl fmt::Display for RemediationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemediationMode::FullPurge => "full-purge",
            RemediationMode::SelectiveReplace => "selective-replace",
        })
    }
}

/// Dry-run description of a remediation.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    mode: RemediationMode,
    scope: Scope,
    /// Empty for full purges, which keep only counts
    matches: Vec<Match>,
    match_count: usize,
    affected_blob_count: usize,
    affected_commit_count: usize,
    affected_commits: Vec<CommitId>,
    exposed_signatures: Vec<String>,
    sources: BTreeMap<BlobId, BlobSource>,
    skipped: Vec<SkippedBlob>,
    blobs_scanned: usize,
    snapshot: RefSnapshot,
    /// Blobs with matches that only refs outside the rewrite set reach
    warnings: Vec<String>,
    #[serde(skip)]
    redactions: BTreeMap<BlobId, Vec<Redaction>>,
    digest: String,
}

impl Plan {
    pub fn mode(&self) -> RemediationMode {
        self.mode
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn match_count(&self) -> usize {
        self.match_count
    }

    pub fn affected_blob_count(&self) -> usize {
        self.affected_blob_count
    }

    pub fn affected_commit_count(&self) -> usize {
        self.affected_commit_count
    }

    /// Commits holding at least one affected blob, parents first.
    /// Empty for full purges.
    pub fn affected_commits(&self) -> &[CommitId] {
        &self.affected_commits
    }

    pub fn exposed_signatures(&self) -> &[String] {
        &self.exposed_signatures
    }

    pub fn sources(&self) -> &BTreeMap<BlobId, BlobSource> {
        &self.sources
    }

    pub fn skipped(&self) -> &[SkippedBlob] {
        &self.skipped
    }

    pub fn blobs_scanned(&self) -> usize {
        self.blobs_scanned
    }

    pub fn snapshot(&self) -> &RefSnapshot {
        &self.snapshot
    }

    pub fn redactions(&self) -> &BTreeMap<BlobId, Vec<Redaction>> {
        &self.redactions
    }

    /// Secrets the rewrite will leave in place
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn short_digest(&self) -> &str {
        &self.digest[..MIN_TOKEN_LEN.min(self.digest.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.match_count == 0
    }

    /// Token that confirms this exact plan
    pub fn token(&self) -> ConfirmationToken {
        ConfirmationToken::new(self.digest.clone())
    }

    pub fn exposure_event(&self) -> SecretsExposedEvent {
        SecretsExposedEvent {
            signature_ids: self.exposed_signatures.clone(),
            blob_count: self.affected_blob_count,
        }
    }

    /// Bind the plan to an explicit confirmation.
    ///
    /// The token must be the plan digest or a prefix of at least
    /// [`MIN_TOKEN_LEN`] characters.
    pub fn confirm(self, token: &ConfirmationToken) -> Result<ConfirmedPlan> {
        if !token_matches(&self.digest, token.as_str()) {
            return Err(Error::ConfirmationDenied(format!(
                "token '{token}' does not match plan digest {}",
                self.short_digest()
            )));
        }
        let mut session = RewriteSession::new();
        session.advance(RewriteState::Confirmed)?;
        Ok(ConfirmedPlan { plan: self, session })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A plan the user has confirmed. Can only be executed once.
#[derive(Debug)]
pub struct ConfirmedPlan {
    plan: Plan,
    session: RewriteSession,
}

impl ConfirmedPlan {
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub(crate) fn into_parts(self) -> (Plan, RewriteSession) {
        (self.plan, self.session)
    }
}

/// Entry point for scanning, planning and executing remediations.
pub struct Planner {
    handle: RepoHandle,
    settings: Arc<Settings>,
    notifier: Arc<dyn RotationNotifier>,
}

impl Planner {
    pub fn new(handle: RepoHandle, settings: Settings, notifier: Arc<dyn RotationNotifier>) -> Self {
        Self {
            handle,
            settings: Arc::new(settings),
            notifier,
        }
    }

    pub fn handle(&self) -> &RepoHandle {
        &self.handle
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn pool(&self) -> ScanPool<'_> {
        ScanPool::new(
            self.settings.pool,
            &self.settings.signatures,
            ReaderSource::from_handle(&self.handle),
        )
    }

    /// Scan a scope and report matches. Never modifies the repository.
    pub fn scan(&self, scope: Scope, options: &ScanOptions) -> Result<ScanReport> {
        let walker = Walker::new(&self.handle, &self.settings.ignore);
        let report = self.pool().run(scope, walker.enumerate(scope)?, options)?;
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if report.has_matches() {
            self.notifier.notify(&SecretsExposedEvent {
                signature_ids: report.exposed_signatures(),
                blob_count: report.affected_blob_count(),
            })?;
        }
        Ok(report)
    }

    pub fn plan(&self, mode: RemediationMode) -> Result<Plan> {
        self.plan_with(mode, &CancelFlag::new())
    }

    /// Compute a plan over the full history. Safe to call any number of times.
    pub fn plan_with(&self, mode: RemediationMode, cancel: &CancelFlag) -> Result<Plan> {
        self.build_plan(mode, cancel).map_err(|e| match e {
            Error::Cancelled => e,
            other => Error::planning(mode, other),
        })
    }

    fn build_plan(&self, mode: RemediationMode, cancel: &CancelFlag) -> Result<Plan> {
        let snapshot = self.handle.snapshot()?;
        if mode == RemediationMode::FullPurge {
            self.handle.workdir()?;
            if let HeadState::Detached { .. } = snapshot.head {
                return Err(Error::UnsupportedRepository(
                    "full purge needs HEAD on a branch, not detached".to_string(),
                ));
            }
        }

        let walker = Walker::new(&self.handle, &self.settings.ignore);
        let options = ScanOptions {
            fail_fast: false,
            cancel: cancel.clone(),
        };
        let mut report = self.pool().run(Scope::FullHistory, walker.all_history()?, &options)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let warnings = retain_rewritable(&walker, &snapshot, &mut report)?;

        let redactions: BTreeMap<BlobId, Vec<Redaction>> = match mode {
            RemediationMode::SelectiveReplace => report
                .matches
                .chunk_by(|a, b| a.blob_id == b.blob_id)
                .map(|chunk| (chunk[0].blob_id, resolve_redactions(chunk, &self.settings.signatures)))
                .collect(),
            RemediationMode::FullPurge => BTreeMap::new(),
        };
        let digest = plan_digest(mode, &snapshot, &report.matches, &redactions);
        let exposed_signatures = report.exposed_signatures();
        let affected_blob_count = report.affected_blob_count();
        let match_count = report.matches.len();
        let repo = self.handle.repo();

        let plan = match mode {
            RemediationMode::SelectiveReplace => {
                let blob_set: HashSet<Oid> = report.sources.keys().map(|id| id.oid()).collect();
                let affected_commits = commits_containing(repo, &snapshot, &blob_set)?;
                Plan {
                    mode,
                    scope: Scope::FullHistory,
                    match_count,
                    affected_blob_count,
                    affected_commit_count: affected_commits.len(),
                    affected_commits,
                    exposed_signatures,
                    sources: report.sources,
                    skipped: report.skipped,
                    blobs_scanned: report.blobs_scanned,
                    matches: report.matches,
                    snapshot,
                    warnings,
                    redactions,
                    digest,
                }
            }
            RemediationMode::FullPurge => {
                let affected_commit_count = if match_count > 0 {
                    count_commits(repo, &snapshot)?
                } else {
                    0
                };
                Plan {
                    mode,
                    scope: Scope::FullHistory,
                    match_count,
                    affected_blob_count,
                    affected_commit_count,
                    affected_commits: Vec::new(),
                    exposed_signatures,
                    sources: BTreeMap::new(),
                    skipped: report.skipped,
                    blobs_scanned: report.blobs_scanned,
                    matches: Vec::new(),
                    snapshot,
                    warnings,
                    redactions,
                    digest,
                }
            }
        };

        tracing::info!(
            "Planned {mode}: {} matches in {} blobs across {} commits",
            plan.match_count,
            plan.affected_blob_count,
            plan.affected_commit_count
        );
        Ok(plan)
    }

    /// Confirm `plan` with `token`.
    ///
    /// A token that does not match `plan` but does match the last recorded
    /// plan of the same mode fails with [`Error::StalePlan`] when the refs
    /// moved since that plan was recorded.
    pub fn confirm(&self, plan: Plan, token: &ConfirmationToken) -> Result<ConfirmedPlan> {
        if !token_matches(plan.digest(), token.as_str()) {
            let recorded = PlanRecord::load(&self.handle).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable plan record: {e}");
                None
            });
            if let Some(record) = recorded.filter(|r| r.mode == plan.mode() && token_matches(&r.digest, token.as_str())) {
                if let Some(change) = record.snapshot.diff(plan.snapshot()) {
                    return Err(Error::StalePlan(change));
                }
            }
        }
        plan.confirm(token)
    }

    /// Remember `plan` so that a later confirmation can tell a stale digest
    /// from a wrong one.
    pub fn record(&self, plan: &Plan) -> Result<()> {
        PlanRecord::from_plan(plan).save(&self.handle)
    }

    /// Run a confirmed plan.
    ///
    /// Fails with [`Error::EmptyPlan`] when there is nothing to do and with
    /// [`Error::StalePlan`] when refs moved since planning.
    pub fn execute(&self, confirmed: ConfirmedPlan) -> Result<RewriteResult> {
        let plan = confirmed.plan();
        if plan.is_empty() {
            return Err(Error::EmptyPlan);
        }
        let current = self.handle.snapshot()?;
        if let Some(change) = plan.snapshot().diff(&current) {
            return Err(Error::StalePlan(change));
        }

        let event = plan.exposure_event();
        let mut result = Rewriter::new(&self.handle, &self.settings).rewrite(confirmed)?;

        if let Err(e) = self.notifier.notify(&event) {
            tracing::error!("Rotation notification failed: {e}");
            result.warnings.push(format!("rotation notification failed: {e}"));
        }
        Ok(result)
    }
}

/// Drop matches in blobs that no ref in the rewrite set reaches, returning
/// one warning per dropped blob.
fn retain_rewritable(walker: &Walker<'_>, snapshot: &RefSnapshot, report: &mut ScanReport) -> Result<Vec<String>> {
    if !report.has_matches() {
        return Ok(Vec::new());
    }
    let mut rewritable = HashSet::new();
    for blob in walker.history(snapshot)? {
        rewritable.insert(blob?.id);
    }

    let mut outside: BTreeMap<BlobId, usize> = BTreeMap::new();
    for m in report.matches.iter().filter(|m| !rewritable.contains(&m.blob_id)) {
        *outside.entry(m.blob_id).or_default() += 1;
    }
    if outside.is_empty() {
        return Ok(Vec::new());
    }

    report.matches.retain(|m| rewritable.contains(&m.blob_id));
    let warnings = outside
        .into_iter()
        .map(|(blob_id, count)| {
            let location = report
                .sources
                .remove(&blob_id)
                .map(|source| source.to_string())
                .unwrap_or_else(|| blob_id.short());
            format!("{location}: {count} matches only reachable from refs outside the rewrite set; not rewritten")
        })
        .collect::<Vec<_>>();
    tracing::warn!("{} blobs with matches are outside the rewrite set", warnings.len());
    Ok(warnings)
}

/// Commits whose tree reaches any blob in `blobs`, parents first.
fn commits_containing(repo: &Repository, snapshot: &RefSnapshot, blobs: &HashSet<Oid>) -> Result<Vec<CommitId>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    for root in snapshot.root_commits() {
        revwalk.push(root.oid())?;
    }

    let mut memo = HashMap::new();
    let mut commits = Vec::new();
    for oid in revwalk {
        let oid = oid?;
        let tree_id = repo.find_commit(oid)?.tree_id();
        if tree_contains(repo, tree_id, blobs, &mut memo)? {
            commits.push(oid.into());
        }
    }
    Ok(commits)
}

fn tree_contains(repo: &Repository, tree_id: Oid, blobs: &HashSet<Oid>, memo: &mut HashMap<Oid, bool>) -> Result<bool> {
    if let Some(found) = memo.get(&tree_id) {
        return Ok(*found);
    }
    let tree = repo.find_tree(tree_id)?;
    let mut found = false;
    for entry in tree.iter() {
        found = match entry.kind() {
            Some(ObjectType::Blob) => blobs.contains(&entry.id()),
            Some(ObjectType::Tree) => tree_contains(repo, entry.id(), blobs, memo)?,
            _ => false,
        };
        if found {
            break;
        }
    }
    memo.insert(tree_id, found);
    Ok(found)
}

fn count_commits(repo: &Repository, snapshot: &RefSnapshot) -> Result<usize> {
    let mut revwalk = repo.revwalk()?;
    for root in snapshot.root_commits() {
        revwalk.push(root.oid())?;
    }
    let mut count = 0;
    for oid in revwalk {
        oid?;
        count += 1;
    }
    Ok(count)
}
