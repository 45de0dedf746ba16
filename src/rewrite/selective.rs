use std::collections::HashMap;

use git2::{Commit, ObjectType, Oid, Repository, Sort};
use rayon::prelude::*;

use super::{Outcome, RefUpdate, Rewriter, ScratchStore};
use crate::error::{Error, Result};
use crate::git::{CommitId, HeadState};
use crate::plan::{Plan, Redaction, apply_redactions};
use crate::scanner::{self, SignatureSet};

/// Replace matched ranges in every affected blob and re-create the commits
/// that reach them. Unaffected commits keep their ids.
pub(super) fn rewrite(rewriter: &Rewriter<'_>, scratch: &ScratchStore, plan: &Plan) -> Result<Outcome> {
    let repo = scratch.repo();
    let signatures = &rewriter.settings().signatures;
    let mut warnings = Vec::new();

    let blob_map = redact_blobs(repo, plan, signatures)?;
    tracing::info!("Redacted {} blobs", blob_map.len());

    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    for root in plan.snapshot().root_commits() {
        revwalk.push(root.oid())?;
    }

    let mut commit_map: HashMap<Oid, Oid> = HashMap::new();
    let mut tree_map: HashMap<Oid, Oid> = HashMap::new();
    let mut remapped = 0;
    let mut signed = 0;

    for oid in revwalk {
        let oid = oid?;
        let commit = repo.find_commit(oid)?;
        let new_tree = rewrite_tree(repo, commit.tree_id(), &blob_map, &mut tree_map)?;
        let old_parents: Vec<Oid> = commit.parent_ids().collect();
        let new_parents: Vec<Oid> = old_parents
            .iter()
            .map(|p| commit_map.get(p).copied().unwrap_or(*p))
            .collect();

        if new_tree == commit.tree_id() && new_parents == old_parents {
            commit_map.insert(oid, oid);
            continue;
        }

        let message = commit
            .message_raw()
            .ok_or_else(|| Error::aborted(format!("commit {oid} has a non UTF-8 message")))?;
        if repo.extract_signature(&oid, None).is_ok() {
            signed += 1;
        }

        let tree = repo.find_tree(new_tree)?;
        let parents = new_parents
            .iter()
            .map(|p| repo.find_commit(*p))
            .collect::<std::result::Result<Vec<Commit<'_>>, _>>()?;
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
        let new_oid = repo.commit(None, &commit.author(), &commit.committer(), message, &tree, &parent_refs)?;

        tracing::debug!("Rewrote commit {oid} -> {new_oid}");
        commit_map.insert(oid, new_oid);
        remapped += 1;
        rewriter.check_fault(remapped)?;
    }

    if signed > 0 {
        warnings.push(format!("{signed} signed commits were rewritten and lost their signatures"));
    }

    let ref_updates = update_refs(repo, plan, &commit_map, &mut warnings)?;

    let snapshot = plan.snapshot();
    let new_head = snapshot
        .head
        .commit()
        .map(|c| CommitId::from(commit_map.get(&c.oid()).copied().unwrap_or(c.oid())));

    let remote = rewriter.handle().remote_refs()?;
    if !remote.is_empty() {
        warnings.push(format!(
            "{} remote-tracking refs still point at the old history; force-push after review",
            remote.len()
        ));
    }
    if snapshot.head.commit() != new_head && rewriter.handle().workdir().is_ok() {
        warnings.push(
            "the working tree and index still hold pre-rewrite content; run `git reset --hard` after review"
                .to_string(),
        );
    }

    Ok(Outcome {
        new_head,
        remapped_commit_count: remapped,
        ref_updates,
        warnings,
    })
}

/// Read every affected blob, redact in parallel, write the results.
fn redact_blobs(repo: &Repository, plan: &Plan, signatures: &SignatureSet) -> Result<HashMap<Oid, Oid>> {
    let originals = plan
        .redactions()
        .iter()
        .map(|(id, redactions)| -> Result<(Oid, Vec<u8>, &Vec<Redaction>)> {
            Ok((id.oid(), repo.find_blob(id.oid())?.content().to_vec(), redactions))
        })
        .collect::<Result<Vec<_>>>()?;

    let redacted = originals
        .par_iter()
        .map(|(oid, content, redactions)| redact_blob(*oid, content, redactions, signatures).map(|data| (*oid, data)))
        .collect::<Result<Vec<_>>>()?;

    let mut blob_map = HashMap::with_capacity(redacted.len());
    for (old, data) in redacted {
        let new = repo.blob(&data)?;
        blob_map.insert(old, new);
    }
    Ok(blob_map)
}

fn redact_blob(oid: Oid, content: &[u8], redactions: &[Redaction], signatures: &SignatureSet) -> Result<Vec<u8>> {
    let data = apply_redactions(content, redactions).map_err(|reason| Error::aborted(format!("blob {oid}: {reason}")))?;

    let rescan = scanner::scan(oid.into(), &data, signatures);
    if let Some(leftover) = rescan.matches().first() {
        return Err(Error::aborted(format!(
            "blob {oid} still matches '{}' after redaction",
            leftover.signature_id
        )));
    }
    Ok(data)
}

/// Rewrite a tree bottom-up, memoised per tree id.
fn rewrite_tree(
    repo: &Repository,
    tree_id: Oid,
    blob_map: &HashMap<Oid, Oid>,
    tree_map: &mut HashMap<Oid, Oid>,
) -> Result<Oid> {
    if let Some(done) = tree_map.get(&tree_id) {
        return Ok(*done);
    }

    let tree = repo.find_tree(tree_id)?;
    let mut changes = Vec::new();
    for entry in tree.iter() {
        let replacement = match entry.kind() {
            Some(ObjectType::Blob) => blob_map.get(&entry.id()).copied(),
            Some(ObjectType::Tree) => {
                let rewritten = rewrite_tree(repo, entry.id(), blob_map, tree_map)?;
                (rewritten != entry.id()).then_some(rewritten)
            }
            _ => None,
        };
        if let Some(new_id) = replacement {
            changes.push((entry.name_bytes().to_vec(), new_id, entry.filemode()));
        }
    }

    let new_id = if changes.is_empty() {
        tree_id
    } else {
        let mut builder = repo.treebuilder(Some(&tree))?;
        for (name, oid, mode) in changes {
            builder.insert(name, oid, mode)?;
        }
        builder.write()?
    };
    tree_map.insert(tree_id, new_id);
    Ok(new_id)
}

/// Ref moves for every snapshotted ref whose commit changed. Annotated tags
/// are re-created on the new commit.
fn update_refs(
    repo: &Repository,
    plan: &Plan,
    commit_map: &HashMap<Oid, Oid>,
    warnings: &mut Vec<String>,
) -> Result<Vec<RefUpdate>> {
    let snapshot = plan.snapshot();
    let mut updates = Vec::new();

    for (name, target) in &snapshot.refs {
        let Some(commit) = target.commit else { continue };
        let new_commit = commit_map.get(&commit.oid()).copied().unwrap_or(commit.oid());
        if new_commit == commit.oid() {
            continue;
        }

        let to = if target.target == commit {
            new_commit
        } else {
            let tag = repo.find_tag(target.target.oid())?;
            if tag.target_id() != commit.oid() {
                warnings.push(format!("{name} is a nested tag; it now points directly at the rewritten commit"));
            }
            let tag_name = tag
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| name.trim_start_matches("refs/tags/").to_string());
            let tagger = match tag.tagger() {
                Some(tagger) => tagger.to_owned(),
                None => repo.signature()?,
            };
            let object = repo.find_object(new_commit, Some(ObjectType::Commit))?;
            let message = tag.message().unwrap_or_default();
            repo.tag_annotation_create(&tag_name, &object, &tagger, message)?
        };

        updates.push(RefUpdate::Moved {
            name: name.clone(),
            from: target.target,
            to: to.into(),
        });
    }

    if let HeadState::Detached { commit } = &snapshot.head {
        if let Some(new_commit) = commit_map.get(&commit.oid()).filter(|c| **c != commit.oid()) {
            updates.push(RefUpdate::Moved {
                name: "HEAD".to_string(),
                from: *commit,
                to: (*new_commit).into(),
            });
        }
    }

    Ok(updates)
}
