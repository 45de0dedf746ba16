use std::path::{Path, PathBuf};

use git2::{ObjectType, Oid};
use ignore::{Walk, WalkBuilder};

use super::{Blob, BlobSource, IgnoreList};
use crate::error::{Error, Result};

/// Files in the work tree, honouring `.gitignore` and the ignore list.
pub struct WorkingTreeBlobs {
    root: PathBuf,
    walk: Walk,
    ignore: IgnoreList,
}

impl WorkingTreeBlobs {
    pub fn new(root: &Path, ignore: IgnoreList) -> Self {
        let walk = WalkBuilder::new(root)
            .hidden(false)
            .follow_links(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();
        Self {
            root: root.to_path_buf(),
            walk,
            ignore,
        }
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl Iterator for WorkingTreeBlobs {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(Error::Io(std::io::Error::other(e.to_string())))),
            };

            // Symlinks and directories are not content.
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            let Some(relative) = self.relative_path(path) else { continue };
            if self.ignore.is_ignored(&relative) {
                tracing::debug!("Ignoring {relative}");
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => return Some(Err(Error::Io(std::io::Error::other(e.to_string())))),
            };
            let id = match Oid::hash_file(ObjectType::Blob, path) {
                Ok(oid) => oid,
                Err(e) => return Some(Err(e.into())),
            };

            return Some(Ok(Blob {
                id: id.into(),
                size,
                source: BlobSource::WorkingTree { path: relative },
            }));
        }
    }
}
