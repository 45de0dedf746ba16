//! Git integration layer for gitredact
//!
//! This module provides the explicit repository handle every component is
//! given, object ids with stable formatting, and snapshots of the refs a
//! rewrite is allowed to move. Nothing here reads the process working
//! directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use git2::{ErrorCode, Oid, Repository, Status, StatusOptions};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Content hash of a git object (blob, tree, commit or tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(Oid);

pub type BlobId = ObjectId;
pub type CommitId = ObjectId;

impl ObjectId {
    pub fn oid(&self) -> Oid {
        self.0
    }

    /// Abbreviated form used in human output.
    pub fn short(&self) -> String {
        let full = self.0.to_string();
        full[..8.min(full.len())].to_string()
    }
}

impl From<Oid> for ObjectId {
    fn from(oid: Oid) -> Self {
        ObjectId(oid)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Oid::from_str(&hex).map(ObjectId).map_err(serde::de::Error::custom)
    }
}

/// Where HEAD points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HeadState {
    /// A branch with no commits yet.
    Unborn { branch: String },
    Branch { name: String, commit: CommitId },
    Detached { commit: CommitId },
}

impl HeadState {
    pub fn commit(&self) -> Option<CommitId> {
        match self {
            HeadState::Unborn { .. } => None,
            HeadState::Branch { commit, .. } | HeadState::Detached { commit } => Some(*commit),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            HeadState::Unborn { branch } | HeadState::Branch { name: branch, .. } => Some(branch),
            HeadState::Detached { .. } => None,
        }
    }
}

/// Direct target of a ref plus the commit it peels to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTarget {
    pub target: ObjectId,
    pub commit: Option<CommitId>,
}

/// HEAD plus every local branch and tag, captured at one instant.
///
/// Two snapshots compare equal only if no ref in the rewrite set moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSnapshot {
    pub head: HeadState,
    pub refs: BTreeMap<String, RefTarget>,
}

impl RefSnapshot {
    pub fn capture(repo: &Repository) -> Result<Self> {
        let head = match repo.head() {
            Ok(head) => {
                let commit = head.peel_to_commit()?.id().into();
                if repo.head_detached()? {
                    HeadState::Detached { commit }
                } else {
                    let name = head
                        .name()
                        .ok_or_else(|| Error::UnsupportedRepository("HEAD name is not UTF-8".into()))?
                        .to_string();
                    HeadState::Branch { name, commit }
                }
            }
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                let branch = repo
                    .find_reference("HEAD")
                    .ok()
                    .and_then(|r| r.symbolic_target().map(str::to_string))
                    .unwrap_or_else(|| "refs/heads/main".to_string());
                HeadState::Unborn { branch }
            }
            Err(e) => return Err(e.into()),
        };

        let mut refs = BTreeMap::new();
        for reference in repo.references()? {
            let reference = reference?;
            let Some(name) = reference.name() else { continue };
            if !is_rewritable_ref(name) {
                continue;
            }
            // Symbolic refs follow their targets.
            let Some(target) = reference.target() else { continue };
            let commit = reference.peel_to_commit().ok().map(|c| c.id().into());
            refs.insert(
                name.to_string(),
                RefTarget {
                    target: target.into(),
                    commit,
                },
            );
        }

        Ok(Self { head, refs })
    }

    /// Every commit the rewrite set can reach directly, HEAD first.
    pub fn root_commits(&self) -> Vec<CommitId> {
        let mut seen = BTreeSet::new();
        let mut roots = Vec::new();
        let candidates = self
            .head
            .commit()
            .into_iter()
            .chain(self.refs.values().filter_map(|t| t.commit));
        for commit in candidates {
            if seen.insert(commit) {
                roots.push(commit);
            }
        }
        roots
    }

    pub fn is_empty(&self) -> bool {
        self.head.commit().is_none() && self.refs.is_empty()
    }

    /// Describe the first difference between two snapshots.
    pub fn diff(&self, current: &RefSnapshot) -> Option<String> {
        if self.head != current.head {
            return Some(format!(
                "HEAD moved from {} to {}",
                describe_head(&self.head),
                describe_head(&current.head)
            ));
        }
        for (name, target) in &self.refs {
            match current.refs.get(name) {
                None => return Some(format!("{name} was deleted")),
                Some(now) if now != target => {
                    return Some(format!("{name} moved from {} to {}", target.target.short(), now.target.short()));
                }
                _ => {}
            }
        }
        current
            .refs
            .keys()
            .find(|name| !self.refs.contains_key(*name))
            .map(|name| format!("{name} was created"))
    }
}

fn describe_head(head: &HeadState) -> String {
    match head {
        HeadState::Unborn { branch } => format!("{branch} (unborn)"),
        HeadState::Branch { name, commit } => format!("{name}@{}", commit.short()),
        HeadState::Detached { commit } => format!("detached@{}", commit.short()),
    }
}

/// Local branches and tags are rewritten; remote-tracking refs mirror the
/// remote and are left alone.
pub fn is_rewritable_ref(name: &str) -> bool {
    name.starts_with("refs/heads/") || name.starts_with("refs/tags/")
}

pub fn is_remote_ref(name: &str) -> bool {
    name.starts_with("refs/remotes/")
}

/// Explicit handle on a repository, passed to every component.
pub struct RepoHandle {
    repo: Repository,
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
}

impl RepoHandle {
    /// Discover the repository containing `path`.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::discover(path.as_ref())?;
        Ok(Self::from_repository(repo))
    }

    pub fn from_repository(repo: Repository) -> Self {
        let git_dir = repo.path().to_path_buf();
        let workdir = repo.workdir().map(Path::to_path_buf);
        Self { repo, git_dir, workdir }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Open an independent handle on the same repository (for worker threads).
    pub fn reopen(&self) -> Result<Repository> {
        Ok(Repository::open(&self.git_dir)?)
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.git_dir.join("objects")
    }

    /// Working directory, or an error for bare repositories.
    pub fn workdir(&self) -> Result<&Path> {
        self.workdir
            .as_deref()
            .ok_or_else(|| Error::UnsupportedRepository("bare repository has no working tree".into()))
    }

    pub fn snapshot(&self) -> Result<RefSnapshot> {
        RefSnapshot::capture(&self.repo)
    }

    /// HEAD plus the commit behind every ref in any namespace, including
    /// remote-tracking refs, the stash and notes. Refs that do not peel to a
    /// commit are skipped.
    pub fn reachable_roots(&self) -> Result<Vec<CommitId>> {
        let mut seen = BTreeSet::new();
        let mut roots = Vec::new();
        if let Ok(commit) = self.repo.head().and_then(|head| head.peel_to_commit()) {
            seen.insert(commit.id());
            roots.push(commit.id().into());
        }
        for reference in self.repo.references()? {
            let reference = reference?;
            let Ok(commit) = reference.peel_to_commit() else { continue };
            if seen.insert(commit.id()) {
                roots.push(commit.id().into());
            }
        }
        Ok(roots)
    }

    /// Remote-tracking refs that will still point at pre-rewrite history.
    pub fn remote_refs(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for reference in self.repo.references()? {
            let reference = reference?;
            if let Some(name) = reference.name().filter(|n| is_remote_ref(n)) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Repo-relative paths of files staged as new or modified
    pub fn staged_paths(&self) -> Result<Vec<String>> {
        let mut staged = Vec::new();
        let mut opts = StatusOptions::new();
        opts.include_ignored(false);
        opts.include_untracked(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        for entry in statuses.iter() {
            let status = entry.status();
            if status.intersects(Status::INDEX_NEW | Status::INDEX_MODIFIED | Status::INDEX_RENAMED | Status::INDEX_TYPECHANGE) {
                if let Some(path) = entry.path() {
                    staged.push(path.to_string());
                }
            }
        }
        staged.sort();
        Ok(staged)
    }

    /// Install a git hook
    pub fn install_hook(&self, hook_name: &str, hook_content: &str) -> Result<PathBuf> {
        let hooks_dir = self.git_dir.join("hooks");
        let hook_path = hooks_dir.join(hook_name);

        std::fs::create_dir_all(&hooks_dir)?;
        std::fs::write(&hook_path, hook_content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&hook_path)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&hook_path, perms)?;
        }

        Ok(hook_path)
    }

    /// Contents of an installed hook, if present
    pub fn read_hook(&self, hook_name: &str) -> Result<Option<String>> {
        let hook_path = self.git_dir.join("hooks").join(hook_name);
        match std::fs::read_to_string(&hook_path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a git hook
    pub fn remove_hook(&self, hook_name: &str) -> Result<()> {
        let hook_path = self.git_dir.join("hooks").join(hook_name);
        if hook_path.exists() {
            std::fs::remove_file(&hook_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Helpers for building throwaway repositories in tests.

    use git2::{Repository, Signature};
    use std::path::Path;
    use tempfile::TempDir;

    pub fn init_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        (dir, repo)
    }

    /// Write `files` to the work tree, stage them, and commit on HEAD.
    pub fn commit_files(repo: &Repository, files: &[(&str, &str)], message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let mut index = repo.index().unwrap();
        for (path, content) in files {
            let full = workdir.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let parents: Vec<git2::Commit> = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs).unwrap()
    }
}
