use git2::build::TreeUpdateBuilder;
use git2::{FileMode, Signature};

use super::{Outcome, RefUpdate, Rewriter, ScratchStore};
use crate::error::{Error, Result};
use crate::git::HeadState;
use crate::plan::Plan;
use crate::scanner;

const GITLINK_MODE: u32 = 0o160000;
const SYMLINK_MODE: u32 = 0o120000;
const STAGE_MASK: u16 = 0x3000;

/// Replace all history with one root commit holding the tracked files as
/// they are on disk now, minus ignored paths.
pub(super) fn rewrite(rewriter: &Rewriter<'_>, scratch: &ScratchStore, plan: &Plan) -> Result<Outcome> {
    let handle = rewriter.handle();
    let settings = rewriter.settings();
    let workdir = handle.workdir()?;
    let snapshot = plan.snapshot();

    let (branch, old_head) = match &snapshot.head {
        HeadState::Branch { name, commit } => (name.clone(), *commit),
        HeadState::Unborn { .. } | HeadState::Detached { .. } => {
            return Err(Error::UnsupportedRepository(
                "full purge needs HEAD on a branch with at least one commit".to_string(),
            ));
        }
    };

    let repo = scratch.repo();
    let index = handle.repo().index()?;
    let mut builder = TreeUpdateBuilder::new();
    let mut kept = 0;
    let mut ignored = Vec::new();
    let mut missing = Vec::new();
    let mut still_matching = Vec::new();

    for entry in index.iter() {
        // Conflicted entries carry a non-zero stage; only stage 0 is committable.
        if entry.flags & STAGE_MASK != 0 {
            continue;
        }
        let path = String::from_utf8_lossy(&entry.path).into_owned();
        if settings.ignore.is_ignored(&path) {
            ignored.push(path);
            continue;
        }
        let full = workdir.join(&path);

        let (oid, mode) = match entry.mode {
            GITLINK_MODE => (entry.id, FileMode::Commit),
            SYMLINK_MODE => match std::fs::read_link(&full) {
                Ok(target) => (repo.blob(target.to_string_lossy().as_bytes())?, FileMode::Link),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    missing.push(path);
                    continue;
                }
                Err(e) => return Err(e.into()),
            },
            mode => match std::fs::read(&full) {
                Ok(data) => {
                    let oid = repo.blob(&data)?;
                    if !scanner::scan(oid.into(), &data, &settings.signatures).matches().is_empty() {
                        still_matching.push(path.clone());
                    }
                    let file_mode = if mode & 0o111 != 0 {
                        FileMode::BlobExecutable
                    } else {
                        FileMode::Blob
                    };
                    (oid, file_mode)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    missing.push(path);
                    continue;
                }
                Err(e) => return Err(e.into()),
            },
        };

        builder.upsert(entry.path.clone(), oid, mode);
        kept += 1;
    }

    let empty_tree = repo.find_tree(repo.treebuilder(None)?.write()?)?;
    let tree_id = builder.create_updated(repo, &empty_tree)?;
    let tree = repo.find_tree(tree_id)?;

    let author = match (&settings.purge.author_name, &settings.purge.author_email) {
        (Some(name), Some(email)) => Signature::now(name, email)?,
        _ => handle
            .repo()
            .signature()
            .or_else(|_| Signature::now("gitredact", "gitredact@localhost"))?,
    };
    let new_root = repo.commit(None, &author, &author, &settings.purge.message, &tree, &[])?;
    rewriter.check_fault(1)?;
    tracing::info!("Built purged root commit {new_root} with {kept} files");

    let mut ref_updates = vec![RefUpdate::Moved {
        name: branch.clone(),
        from: old_head,
        to: new_root.into(),
    }];
    for (name, target) in &snapshot.refs {
        if *name != branch {
            ref_updates.push(RefUpdate::Deleted {
                name: name.clone(),
                from: target.target,
            });
        }
    }

    let mut warnings = Vec::new();
    let deleted: Vec<&str> = ref_updates
        .iter()
        .filter(|u| matches!(u, RefUpdate::Deleted { .. }))
        .map(RefUpdate::name)
        .collect();
    if !deleted.is_empty() {
        warnings.push(format!("deleted {} refs: {}", deleted.len(), deleted.join(", ")));
    }
    if !missing.is_empty() {
        warnings.push(format!(
            "{} tracked files are missing on disk and were left out: {}",
            missing.len(),
            missing.join(", ")
        ));
    }
    if !still_matching.is_empty() {
        warnings.push(format!(
            "kept files still contain secrets; edit them and commit: {}",
            still_matching.join(", ")
        ));
    }
    if !ignored.is_empty() {
        warnings.push(format!(
            "{} ignored files are still tracked in the index; run `git rm --cached` on them: {}",
            ignored.len(),
            ignored.join(", ")
        ));
    }
    let remote = handle.remote_refs()?;
    if !remote.is_empty() {
        warnings.push(format!(
            "{} remote-tracking refs still point at the old history; force-push after review",
            remote.len()
        ));
    }

    Ok(Outcome {
        new_head: Some(new_root.into()),
        remapped_commit_count: 1,
        ref_updates,
        warnings,
    })
}
