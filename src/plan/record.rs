use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{Plan, RemediationMode};
use crate::error::Result;
use crate::git::{RefSnapshot, RepoHandle};

const RECORD_FILE: &str = "gitredact-plan.json";

/// The last plan printed by `gitredact plan`, kept in the git dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub mode: RemediationMode,
    pub digest: String,
    pub snapshot: RefSnapshot,
}

impl PlanRecord {
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            mode: plan.mode(),
            digest: plan.digest().to_string(),
            snapshot: plan.snapshot().clone(),
        }
    }

    pub fn path(handle: &RepoHandle) -> PathBuf {
        handle.git_dir().join(RECORD_FILE)
    }

    pub fn save(&self, handle: &RepoHandle) -> Result<()> {
        let path = Self::path(handle);
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        tracing::debug!("Recorded plan {} at {}", &self.digest[..12.min(self.digest.len())], path.display());
        Ok(())
    }

    pub fn load(handle: &RepoHandle) -> Result<Option<Self>> {
        match std::fs::read(Self::path(handle)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::{commit_files, init_repo};

    #[test]
    fn test_missing_record_loads_as_none() {
        let (_dir, repo) = init_repo();
        let handle = RepoHandle::from_repository(repo);
        assert!(PlanRecord::load(&handle).unwrap().is_none());
    }

    #[test]
    fn test_record_is_saved_in_git_dir() {
        let (_dir, repo) = init_repo();
        commit_files(&repo, &[("a.txt", "one")], "first");
        let handle = RepoHandle::from_repository(repo);
        let record = PlanRecord {
            mode: RemediationMode::FullPurge,
            digest: "ab".repeat(32),
            snapshot: handle.snapshot().unwrap(),
        };
        record.save(&handle).unwrap();

        assert!(PlanRecord::path(&handle).starts_with(handle.git_dir()));
        assert_eq!(PlanRecord::load(&handle).unwrap(), Some(record));
    }
}
