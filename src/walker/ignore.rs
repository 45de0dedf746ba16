//! Ignore-list glob matching
//!
//! Paths excluded here are never scanned and never carried into a purged
//! commit.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct IgnoreList {
    patterns: Vec<String>,
    set: GlobSet,
}

impl IgnoreList {
    /// Compile ignore patterns. A trailing `/` matches everything beneath a
    /// directory, like in `.gitignore`.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let processed = if pattern.ends_with('/') {
                format!("{pattern}**")
            } else {
                pattern.clone()
            };
            let glob = Glob::new(&processed)
                .map_err(|e| Error::configuration(format!("ignore pattern '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::configuration(format!("ignore patterns: {e}")))?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// Match a repo-relative, `/`-separated path, or its file name alone.
    pub fn is_ignored(&self, path: &str) -> bool {
        if self.set.is_empty() {
            return false;
        }
        let name = path.rsplit('/').next().unwrap_or(path);
        self.set.is_match(path) || self.set.is_match(name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
