use std::path::PathBuf;

use git2::Repository;

use super::{Blob, BlobSource};
use crate::error::Result;
use crate::git::RepoHandle;

/// Everything a worker thread needs to open its own [`BlobReader`].
#[derive(Debug, Clone)]
pub struct ReaderSource {
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
}

impl ReaderSource {
    pub fn from_handle(handle: &RepoHandle) -> Self {
        Self {
            git_dir: handle.git_dir().to_path_buf(),
            workdir: handle.workdir().ok().map(PathBuf::from),
        }
    }

    pub fn open(&self) -> Result<BlobReader> {
        Ok(BlobReader {
            repo: Repository::open(&self.git_dir)?,
            workdir: self.workdir.clone(),
        })
    }
}

/// Reads blob contents. Not shared between threads.
pub struct BlobReader {
    repo: Repository,
    workdir: Option<PathBuf>,
}

impl BlobReader {
    pub fn read(&self, blob: &Blob) -> Result<Vec<u8>> {
        match (&blob.source, &self.workdir) {
            (BlobSource::WorkingTree { path }, Some(workdir)) => Ok(std::fs::read(workdir.join(path))?),
            _ => Ok(self.repo.find_blob(blob.id.oid())?.content().to_vec()),
        }
    }
}
