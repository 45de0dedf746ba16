//! Repository walker
//!
//! Enumerates candidate blobs for a scan scope as a lazy sequence. Every call
//! to [`Walker::enumerate`] starts a fresh walk; consumers may stop early.

mod history;
mod ignore;
mod reader;
mod staged;
mod worktree;

use std::fmt;

use serde::Serialize;

pub use history::HistoryBlobs;
pub use self::ignore::IgnoreList;
pub use reader::{BlobReader, ReaderSource};
pub use staged::StagedBlobs;
pub use worktree::WorkingTreeBlobs;

use crate::error::Result;
use crate::git::{BlobId, CommitId, RefSnapshot, RepoHandle};

/// What part of the repository a scan covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    WorkingTree,
    Staged,
    FullHistory,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::WorkingTree => "working tree",
            Scope::Staged => "staged changes",
            Scope::FullHistory => "full history",
        })
    }
}

/// Where a blob was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlobSource {
    WorkingTree { path: String },
    Index { path: String },
    /// First commit (parents first) that introduced the blob at `tree_path`
    History { commit_id: CommitId, tree_path: String },
}

impl BlobSource {
    pub fn path(&self) -> &str {
        match self {
            BlobSource::WorkingTree { path } | BlobSource::Index { path } => path,
            BlobSource::History { tree_path, .. } => tree_path,
        }
    }
}

impl fmt::Display for BlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobSource::WorkingTree { path } => write!(f, "{path}"),
            BlobSource::Index { path } => write!(f, "{path} (staged)"),
            BlobSource::History { commit_id, tree_path } => write!(f, "{}:{tree_path}", commit_id.short()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blob {
    pub id: BlobId,
    pub size: u64,
    pub source: BlobSource,
}

/// Lazy blob sequence for one scope
pub enum BlobIter<'repo> {
    WorkingTree(WorkingTreeBlobs),
    Staged(StagedBlobs),
    History(HistoryBlobs<'repo>),
}

impl Iterator for BlobIter<'_> {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BlobIter::WorkingTree(blobs) => blobs.next(),
            BlobIter::Staged(blobs) => blobs.next(),
            BlobIter::History(blobs) => blobs.next(),
        }
    }
}

pub struct Walker<'repo> {
    handle: &'repo RepoHandle,
    ignore: &'repo IgnoreList,
}

impl<'repo> Walker<'repo> {
    pub fn new(handle: &'repo RepoHandle, ignore: &'repo IgnoreList) -> Self {
        Self { handle, ignore }
    }

    pub fn enumerate(&self, scope: Scope) -> Result<BlobIter<'repo>> {
        tracing::debug!("Enumerating blobs in {scope}");
        match scope {
            Scope::WorkingTree => Ok(BlobIter::WorkingTree(WorkingTreeBlobs::new(
                self.handle.workdir()?,
                self.ignore.clone(),
            ))),
            Scope::Staged => Ok(BlobIter::Staged(StagedBlobs::new(self.handle, self.ignore)?)),
            Scope::FullHistory => self.all_history().map(BlobIter::History),
        }
    }

    /// History walk over every ref, including remote-tracking refs, the
    /// stash and notes
    pub fn all_history(&self) -> Result<HistoryBlobs<'repo>> {
        HistoryBlobs::new(self.handle.repo(), &self.handle.reachable_roots()?)
    }

    /// History walk limited to the rewrite set of an existing snapshot
    pub fn history(&self, snapshot: &RefSnapshot) -> Result<HistoryBlobs<'repo>> {
        HistoryBlobs::new(self.handle.repo(), &snapshot.root_commits())
    }
}
