use std::path::Path;

use super::{Blob, BlobSource, IgnoreList};
use crate::error::Result;
use crate::git::RepoHandle;

/// Index entries staged as new or modified relative to HEAD
pub struct StagedBlobs {
    blobs: std::vec::IntoIter<Blob>,
}

impl StagedBlobs {
    pub fn new(handle: &RepoHandle, ignore: &IgnoreList) -> Result<Self> {
        let index = handle.repo().index()?;
        let mut blobs = Vec::new();

        for path in handle.staged_paths()? {
            if ignore.is_ignored(&path) {
                tracing::debug!("Ignoring staged {path}");
                continue;
            }
            // Stage 0 only; conflicted entries are not committable.
            let Some(entry) = index.get_path(Path::new(&path), 0) else {
                continue;
            };
            blobs.push(Blob {
                id: entry.id.into(),
                size: u64::from(entry.file_size),
                source: BlobSource::Index { path },
            });
        }

        Ok(Self {
            blobs: blobs.into_iter(),
        })
    }
}

impl Iterator for StagedBlobs {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        self.blobs.next().map(Ok)
    }
}
