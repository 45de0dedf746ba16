use std::collections::{HashSet, VecDeque};

use git2::{ObjectType, Odb, Oid, Repository, Revwalk, Sort, TreeWalkMode, TreeWalkResult};

use super::{Blob, BlobSource};
use crate::error::Result;
use crate::git::CommitId;

/// Every unique blob reachable from a set of commits, parents first.
///
/// Blobs are deduplicated by object id and identical subtrees are only
/// descended into once, so a blob's source is the first commit that
/// introduced it.
pub struct HistoryBlobs<'repo> {
    repo: &'repo Repository,
    odb: Odb<'repo>,
    revwalk: Revwalk<'repo>,
    pending: VecDeque<(Oid, CommitId, String)>,
    seen_blobs: HashSet<Oid>,
    seen_trees: HashSet<Oid>,
    commits_walked: usize,
}

impl<'repo> HistoryBlobs<'repo> {
    pub fn new(repo: &'repo Repository, roots: &[CommitId]) -> Result<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        for root in roots {
            revwalk.push(root.oid())?;
        }
        Ok(Self {
            repo,
            odb: repo.odb()?,
            revwalk,
            pending: VecDeque::new(),
            seen_blobs: HashSet::new(),
            seen_trees: HashSet::new(),
            commits_walked: 0,
        })
    }

    pub fn commits_walked(&self) -> usize {
        self.commits_walked
    }

    fn queue_commit(&mut self, commit_oid: Oid) -> Result<()> {
        let commit = self.repo.find_commit(commit_oid)?;
        let tree = commit.tree()?;
        self.commits_walked += 1;

        let Self {
            seen_trees,
            seen_blobs,
            pending,
            ..
        } = self;
        if !seen_trees.insert(tree.id()) {
            return Ok(());
        }

        let commit_id = CommitId::from(commit_oid);
        tree.walk(TreeWalkMode::PreOrder, |root, entry| match entry.kind() {
            Some(ObjectType::Tree) => {
                if seen_trees.insert(entry.id()) {
                    TreeWalkResult::Ok
                } else {
                    TreeWalkResult::Skip
                }
            }
            Some(ObjectType::Blob) => {
                if seen_blobs.insert(entry.id()) {
                    let name = String::from_utf8_lossy(entry.name_bytes());
                    pending.push_back((entry.id(), commit_id, format!("{root}{name}")));
                }
                TreeWalkResult::Ok
            }
            // Submodule commits live in another repository.
            _ => TreeWalkResult::Ok,
        })?;
        Ok(())
    }
}

impl Iterator for HistoryBlobs<'_> {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((oid, commit_id, tree_path)) = self.pending.pop_front() {
                let size = match self.odb.read_header(oid) {
                    Ok((size, _)) => size as u64,
                    Err(e) => return Some(Err(e.into())),
                };
                return Some(Ok(Blob {
                    id: oid.into(),
                    size,
                    source: BlobSource::History { commit_id, tree_path },
                }));
            }

            match self.revwalk.next()? {
                Ok(commit_oid) => {
                    if let Err(e) = self.queue_commit(commit_oid) {
                        return Some(Err(e));
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
