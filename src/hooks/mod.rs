//! Pre-commit hook management
//!
//! The installed hook scans staged changes and blocks the commit on the
//! first match. Hooks written by someone else are never overwritten unless
//! forced, and never removed.

use std::path::PathBuf;

use crate::error::Result;
use crate::git::RepoHandle;

pub const PRE_COMMIT: &str = "pre-commit";

/// Marks hooks this tool owns
pub const HOOK_MARKER: &str = "# managed by gitredact";

pub fn pre_commit_script() -> String {
    format!(
        "#!/bin/sh\n{HOOK_MARKER}; remove with `gitredact hook uninstall`\nexec gitredact scan --staged --fail-fast\n"
    )
}

pub fn is_managed(content: &str) -> bool {
    content.contains(HOOK_MARKER)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed(PathBuf),
    /// An existing hook was replaced
    Replaced(PathBuf),
    /// A foreign hook exists and `force` was not given
    Conflict(PathBuf),
}

pub fn install(handle: &RepoHandle, force: bool) -> Result<InstallOutcome> {
    let existing = handle.read_hook(PRE_COMMIT)?;
    let path = handle.git_dir().join("hooks").join(PRE_COMMIT);

    match existing {
        Some(content) if !is_managed(&content) && !force => {
            tracing::debug!("Refusing to overwrite foreign hook {}", path.display());
            Ok(InstallOutcome::Conflict(path))
        }
        Some(_) => Ok(InstallOutcome::Replaced(handle.install_hook(PRE_COMMIT, &pre_commit_script())?)),
        None => Ok(InstallOutcome::Installed(handle.install_hook(PRE_COMMIT, &pre_commit_script())?)),
    }
}

/// Remove the hook if this tool installed it. Returns whether it was removed.
pub fn uninstall(handle: &RepoHandle) -> Result<bool> {
    match handle.read_hook(PRE_COMMIT)? {
        Some(content) if is_managed(&content) => {
            handle.remove_hook(PRE_COMMIT)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
