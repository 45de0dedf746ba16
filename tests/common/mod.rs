//! Shared helpers for the CLI integration tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use git2::{Oid, Repository, Signature};
use tempfile::TempDir;

/// Signatures used across the tests, matching `sk-` style keys
pub const SK_CONFIG: &str = r#"
[[signatures]]
id = "api-key"
pattern = 'sk-[A-Za-z0-9]+'
description = "Test API keys"
"#;

pub struct TestRepo {
    pub dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Fresh handle, so assertions see what the binary wrote
    pub fn repo(&self) -> Repository {
        Repository::open(self.dir.path()).unwrap()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn stage(&self, path: &str, content: &str) {
        self.write(path, content);
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
    }

    /// Write, stage and commit `files` on HEAD.
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> Oid {
        for (path, content) in files {
            self.stage(path, content);
        }
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    /// Content of `path` in the HEAD commit
    pub fn head_file(&self, path: &str) -> Option<String> {
        let repo = self.repo();
        let tree = repo.head().ok()?.peel_to_tree().ok()?;
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).into_owned())
    }

    /// Commit ids reachable from HEAD, oldest first
    pub fn history(&self) -> Vec<Oid> {
        let repo = self.repo();
        let mut walk = repo.revwalk().unwrap();
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)
            .unwrap();
        walk.push_head().unwrap();
        walk.map(Result::unwrap).collect()
    }

    /// The binary, run against this repository
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("gitredact").unwrap();
        cmd.env_remove("RUST_LOG").arg("-C").arg(self.dir.path());
        cmd
    }
}

/// Write a config file outside any repository and return its directory.
pub fn config_file(content: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gitredact.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}
