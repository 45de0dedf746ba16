use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use git2::{Oid, Repository};
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::git::RepoHandle;

/// Directory name prefix for scratch repositories inside `.git`
pub const SCRATCH_PREFIX: &str = "gitredact-scratch-";

/// Scratch directories older than this are leftovers from a crashed run.
const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Private bare repository that sees the original objects through an
/// alternate but writes only to its own store.
pub struct ScratchStore {
    dir: TempDir,
    repo: Repository,
}

impl ScratchStore {
    pub fn create(handle: &RepoHandle) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(handle.git_dir())?;
        let repo = Repository::init_bare(dir.path())?;

        let objects = handle.objects_dir();
        let objects = objects
            .to_str()
            .ok_or_else(|| Error::UnsupportedRepository(format!("non UTF-8 objects path {}", objects.display())))?;
        repo.odb()?.add_disk_alternate(objects)?;

        tracing::debug!("Created scratch store {}", dir.path().display());
        Ok(Self { dir, repo })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Ids of every object written to the scratch store itself
    pub fn written_objects(&self) -> Result<BTreeSet<Oid>> {
        let mut oids = BTreeSet::new();
        let objects = self.dir.path().join("objects");
        for fanout in std::fs::read_dir(&objects)? {
            let fanout = fanout?;
            let prefix = fanout.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 || !fanout.file_type()?.is_dir() {
                continue;
            }
            for object in std::fs::read_dir(fanout.path())? {
                let rest = object?.file_name().to_string_lossy().into_owned();
                if let Ok(oid) = Oid::from_str(&format!("{prefix}{rest}")) {
                    oids.insert(oid);
                }
            }
        }
        Ok(oids)
    }

    /// Copy every new object into the target repository and sync it to disk.
    pub fn publish(&self, target: &RepoHandle) -> Result<usize> {
        let oids = self.written_objects()?;
        let source = self.repo.odb()?;
        let destination = target.repo().odb()?;
        let objects_dir = target.objects_dir();

        let mut touched_dirs = BTreeSet::new();
        for oid in &oids {
            let object = source.read(*oid)?;
            let written = destination.write(object.kind(), object.data())?;
            if written != *oid {
                return Err(Error::aborted(format!("object {oid} changed id while copying")));
            }
            let (dir, file) = loose_object_path(&objects_dir, *oid);
            // Packed objects need no sync here.
            if file.exists() {
                File::open(&file)?.sync_all()?;
                touched_dirs.insert(dir);
            }
        }
        for dir in touched_dirs {
            sync_dir(&dir)?;
        }
        Ok(oids.len())
    }

    /// Remove scratch directories left behind by interrupted runs.
    pub fn sweep_stale(handle: &RepoHandle) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(handle.git_dir())? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
                continue;
            }
            let age = entry
                .metadata()?
                .modified()
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or_default();
            if age >= STALE_AFTER {
                tracing::info!("Removing stale scratch directory {}", entry.path().display());
                std::fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn loose_object_path(objects_dir: &Path, oid: Oid) -> (PathBuf, PathBuf) {
    let hex = oid.to_string();
    let dir = objects_dir.join(&hex[..2]);
    let file = dir.join(&hex[2..]);
    (dir, file)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::{commit_files, init_repo};

    #[test]
    fn test_scratch_reads_through_alternate() {
        let (_dir, repo) = init_repo();
        let commit = commit_files(&repo, &[("a.txt", "original")], "first");
        let handle = RepoHandle::from_repository(repo);

        let scratch = ScratchStore::create(&handle).unwrap();
        assert!(scratch.repo().find_commit(commit).is_ok());
        assert!(scratch.written_objects().unwrap().is_empty());
    }

    #[test]
    fn test_publish_copies_only_new_objects() {
        let (_dir, repo) = init_repo();
        commit_files(&repo, &[("a.txt", "original")], "first");
        let handle = RepoHandle::from_repository(repo);

        let scratch = ScratchStore::create(&handle).unwrap();
        let blob = scratch.repo().blob(b"brand new content").unwrap();
        assert!(handle.repo().find_blob(blob).is_err());

        assert_eq!(scratch.publish(&handle).unwrap(), 1);
        assert_eq!(handle.repo().find_blob(blob).unwrap().content(), b"brand new content");
    }

    #[test]
    fn test_scratch_directory_is_removed_on_drop() {
        let (_dir, repo) = init_repo();
        let handle = RepoHandle::from_repository(repo);
        let scratch = ScratchStore::create(&handle).unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.starts_with(handle.git_dir()));
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_sweep_keeps_recent_directories() {
        let (_dir, repo) = init_repo();
        let handle = RepoHandle::from_repository(repo);
        let recent = handle.git_dir().join(format!("{SCRATCH_PREFIX}recent"));
        std::fs::create_dir_all(&recent).unwrap();
        assert_eq!(ScratchStore::sweep_stale(&handle).unwrap(), 0);
        assert!(recent.exists());
    }
}
