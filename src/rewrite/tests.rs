use std::sync::Arc;

use git2::{Oid, Repository};

use super::*;
use crate::config::Config;
use crate::git::testutil::{commit_files, init_repo};
use crate::notify::MemoryNotifier;
use crate::plan::{Plan, Planner};
use crate::scanner::{Signature, SignatureSet};

fn planner_with(repo: Repository, signatures: Vec<Signature>) -> Planner {
    let config = Config::defaults().unwrap();
    let mut settings = Settings::from_config(&config).unwrap();
    settings.signatures = Arc::new(SignatureSet::new(signatures).unwrap());
    Planner::new(
        RepoHandle::from_repository(repo),
        settings,
        Arc::new(MemoryNotifier::default()),
    )
}

fn planner(repo: Repository) -> Planner {
    planner_with(
        repo,
        vec![Signature::regex("api-key", r"sk-[A-Z0-9]{6,}", "REDACTED").unwrap()],
    )
}

fn confirm(plan: Plan) -> ConfirmedPlan {
    let token = plan.token();
    plan.confirm(&token).unwrap()
}

fn head_commit(repo: &Repository) -> Oid {
    repo.head().unwrap().peel_to_commit().unwrap().id()
}

fn file_at(repo: &Repository, commit: Oid, path: &str) -> String {
    let tree = repo.find_commit(commit).unwrap().tree().unwrap();
    let entry = tree.get_path(std::path::Path::new(path)).unwrap();
    let blob = repo.find_blob(entry.id()).unwrap();
    String::from_utf8(blob.content().to_vec()).unwrap()
}

/// Commit ids from HEAD back to the root, following first parents
fn first_parent_chain(repo: &Repository) -> Vec<Oid> {
    let mut chain = Vec::new();
    let mut commit = repo.head().unwrap().peel_to_commit().unwrap();
    loop {
        chain.push(commit.id());
        match commit.parent(0) {
            Ok(parent) => commit = parent,
            Err(_) => break,
        }
    }
    chain.reverse();
    chain
}

fn scratch_dirs(handle: &RepoHandle) -> usize {
    std::fs::read_dir(handle.git_dir())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(SCRATCH_PREFIX)
        })
        .count()
}

#[test]
fn test_session_transitions() {
    let mut session = RewriteSession::new();
    assert!(session.advance(RewriteState::Rewriting).is_err());
    session.advance(RewriteState::Confirmed).unwrap();
    session.advance(RewriteState::Rewriting).unwrap();
    session.advance(RewriteState::Completed).unwrap();
    assert!(session.state().is_terminal());

    let err = session.advance(RewriteState::Aborted).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: "completed",
            to: "aborted"
        }
    ));
}

#[test]
fn test_selective_replace_rewrites_only_descendants() {
    let (_dir, repo) = init_repo();
    let c1 = commit_files(&repo, &[("README.md", "# demo\n")], "first");
    let c2 = commit_files(&repo, &[("config.py", "API_KEY = \"sk-ABC123\"\n")], "add config");
    let c3 = commit_files(&repo, &[("main.py", "print('hi')\n")], "third");

    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::SelectiveReplace).unwrap();
    assert_eq!(plan.affected_commit_count(), 2);

    let result = planner.execute(confirm(plan)).unwrap();
    assert_eq!(result.remapped_commit_count, 2);
    assert_eq!(result.old_head.map(|c| c.oid()), Some(c3));

    let repo = planner.handle().repo();
    let chain = first_parent_chain(repo);
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0], c1);
    assert_ne!(chain[1], c2);
    assert_ne!(chain[2], c3);
    assert_eq!(Some(chain[2]), result.new_head.map(|c| c.oid()));

    assert_eq!(file_at(repo, chain[1], "config.py"), "API_KEY = \"REDACTED\"\n");
    assert_eq!(file_at(repo, chain[2], "main.py"), "print('hi')\n");

    let rewritten = repo.find_commit(chain[1]).unwrap();
    let original = repo.find_commit(c2).unwrap();
    assert_eq!(rewritten.message(), original.message());
    assert_eq!(rewritten.author().name(), original.author().name());
    assert_eq!(rewritten.author().when(), original.author().when());
    assert_eq!(scratch_dirs(planner.handle()), 0);
}

#[test]
fn test_selective_replace_round_trip_is_clean() {
    let (_dir, repo) = init_repo();
    commit_files(&repo, &[("a.txt", "one sk-AAAAAA1 two\n")], "first");
    commit_files(&repo, &[("b/c.txt", "x=sk-BBBBBB2;y=sk-CCCCCC3\n")], "second");

    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::SelectiveReplace).unwrap();
    assert_eq!(plan.match_count(), 3);
    planner.execute(confirm(plan)).unwrap();

    let again = planner.plan(RemediationMode::SelectiveReplace).unwrap();
    assert!(again.is_empty(), "history still has {} matches", again.match_count());

    let repo = planner.handle().repo();
    let head = head_commit(repo);
    assert_eq!(file_at(repo, head, "a.txt"), "one REDACTED two\n");
    assert_eq!(file_at(repo, head, "b/c.txt"), "x=REDACTED;y=REDACTED\n");
}

/// Every blob in a commit's tree by path, with its file mode
fn tree_entries(repo: &Repository, commit: Oid) -> std::collections::BTreeMap<String, (Oid, i32)> {
    let tree = repo.find_commit(commit).unwrap().tree().unwrap();
    let mut entries = std::collections::BTreeMap::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            entries.insert(format!("{root}{}", entry.name().unwrap()), (entry.id(), entry.filemode()));
        }
        git2::TreeWalkResult::Ok
    })
    .unwrap();
    entries
}

#[test]
fn test_selective_replace_changes_only_redacted_ranges() {
    let (_dir, repo) = init_repo();
    commit_files(
        &repo,
        &[("README.md", "# demo\n"), ("a.txt", "one sk-AAAAAA1 two\n")],
        "first",
    );
    commit_files(
        &repo,
        &[("nested/b.txt", "x=sk-BBBBBB2;y=sk-CCCCCC3\n"), ("README.md", "# demo v2\n")],
        "second",
    );
    commit_files(
        &repo,
        &[("a.txt", "one sk-AAAAAA1 two\nthree\n"), ("nested/plain.txt", "nothing\n")],
        "third",
    );

    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::SelectiveReplace).unwrap();
    let redactions: std::collections::BTreeMap<Oid, Vec<(std::ops::Range<usize>, String)>> = plan
        .redactions()
        .iter()
        .map(|(blob_id, planned)| {
            let mut ranges: Vec<_> = planned.iter().map(|r| (r.range.clone(), r.replacement.clone())).collect();
            ranges.sort_by_key(|(range, _)| range.start);
            (blob_id.oid(), ranges)
        })
        .collect();
    assert_eq!(redactions.len(), 3);

    let before = first_parent_chain(planner.handle().repo());
    planner.execute(confirm(plan)).unwrap();
    let repo = planner.handle().repo();
    let after = first_parent_chain(repo);
    assert_eq!(before.len(), after.len());

    for (old_commit, new_commit) in before.iter().zip(&after) {
        let old_entries = tree_entries(repo, *old_commit);
        let new_entries = tree_entries(repo, *new_commit);
        assert_eq!(
            old_entries.keys().collect::<Vec<_>>(),
            new_entries.keys().collect::<Vec<_>>(),
            "paths changed in {old_commit}"
        );

        for (path, (old_id, old_mode)) in &old_entries {
            let (new_id, new_mode) = &new_entries[path];
            assert_eq!(old_mode, new_mode, "{path} changed mode");
            let Some(ranges) = redactions.get(old_id) else {
                assert_eq!(old_id, new_id, "{path} changed without a redaction");
                continue;
            };

            let old_content = repo.find_blob(*old_id).unwrap().content().to_vec();
            let mut expected = Vec::new();
            let mut cursor = 0;
            for (range, replacement) in ranges {
                expected.extend_from_slice(&old_content[cursor..range.start]);
                expected.extend_from_slice(replacement.as_bytes());
                cursor = range.end;
            }
            expected.extend_from_slice(&old_content[cursor..]);
            assert_eq!(repo.find_blob(*new_id).unwrap().content(), expected.as_slice(), "{path}");
        }
    }
}

#[test]
fn test_branches_and_tags_follow_rewrite() {
    let (_dir, repo) = init_repo();
    commit_files(&repo, &[("a.txt", "clean\n")], "first");
    let secret = commit_files(&repo, &[("key.txt", "sk-ABC123\n")], "leak");
    {
        let commit = repo.find_commit(secret).unwrap();
        repo.branch("feature", &commit, false).unwrap();
        repo.tag_lightweight("light", commit.as_object(), false).unwrap();
        let sig = repo.signature().unwrap();
        repo.tag("v1.0", commit.as_object(), &sig, "release 1.0", false).unwrap();
    }

    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::SelectiveReplace).unwrap();
    let result = planner.execute(confirm(plan)).unwrap();
    let new_head = result.new_head.unwrap().oid();

    let repo = planner.handle().repo();
    let peel = |name: &str| repo.find_reference(name).unwrap().peel_to_commit().unwrap().id();
    assert_eq!(peel("refs/heads/feature"), new_head);
    assert_eq!(peel("refs/tags/light"), new_head);
    assert_eq!(peel("refs/tags/v1.0"), new_head);

    let tag = repo.find_reference("refs/tags/v1.0").unwrap().peel_to_tag().unwrap();
    assert_eq!(tag.message(), Some("release 1.0"));
    assert_eq!(tag.name(), Some("v1.0"));
}

#[test]
fn test_injected_fault_leaves_repository_untouched() {
    let (_dir, repo) = init_repo();
    commit_files(&repo, &[("a.txt", "sk-ABC123\n")], "first");
    commit_files(&repo, &[("b.txt", "more\n")], "second");
    commit_files(&repo, &[("c.txt", "even more\n")], "third");

    let planner = planner(repo);
    let before = planner.handle().snapshot().unwrap();
    let plan = planner.plan(RemediationMode::SelectiveReplace).unwrap();

    let rewriter = Rewriter::new(planner.handle(), planner.settings()).fail_after(2);
    let err = rewriter.rewrite(confirm(plan)).unwrap_err();
    assert!(matches!(err, Error::RewriteAborted(_)));
    assert_eq!(err.exit_code(), 3);

    assert_eq!(planner.handle().snapshot().unwrap(), before);
    let redacted = Oid::hash_object(git2::ObjectType::Blob, b"REDACTED\n").unwrap();
    assert!(planner.handle().repo().find_blob(redacted).is_err());
    assert_eq!(scratch_dirs(planner.handle()), 0);
}

#[test]
fn test_stale_plan_is_rejected() {
    let (_dir, repo) = init_repo();
    commit_files(&repo, &[("a.txt", "sk-ABC123\n")], "first");
    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::SelectiveReplace).unwrap();

    commit_files(planner.handle().repo(), &[("b.txt", "new work\n")], "concurrent");
    let before = planner.handle().snapshot().unwrap();

    let err = planner.execute(confirm(plan)).unwrap_err();
    assert!(matches!(err, Error::StalePlan(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(planner.handle().snapshot().unwrap(), before);
}

#[test]
fn test_split_utf8_sequence_aborts() {
    let (_dir, repo) = init_repo();
    commit_files(&repo, &[("notes.txt", "copyright ©secret\n")], "first");
    // Starts on the continuation byte of the copyright sign.
    let planner = planner_with(
        repo,
        vec![Signature::regex("odd", r"(?-u:\xA9)secret", "X").unwrap()],
    );
    let before = planner.handle().snapshot().unwrap();
    let plan = planner.plan(RemediationMode::SelectiveReplace).unwrap();
    assert_eq!(plan.match_count(), 1);

    let err = planner.execute(confirm(plan)).unwrap_err();
    assert!(matches!(err, Error::RewriteAborted(_)), "unexpected error: {err}");
    assert_eq!(planner.handle().snapshot().unwrap(), before);
}

#[test]
fn test_full_purge_builds_single_root() {
    let (dir, repo) = init_repo();
    commit_files(&repo, &[(".env", "TOKEN=sk-ABC123\n"), ("app.py", "print(0)\n")], "commit 0");
    for i in 1..10 {
        let content = format!("print({i})\n");
        commit_files(&repo, &[("app.py", content.as_str())], &format!("commit {i}"));
    }
    {
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("old-feature", &head, false).unwrap();
    }

    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::FullPurge).unwrap();
    assert_eq!(plan.affected_commit_count(), 10);
    assert!(plan.matches().is_empty());

    let result = planner.execute(confirm(plan)).unwrap();
    let repo = planner.handle().repo();
    let head = repo.head().unwrap().peel_to_commit().unwrap();

    assert_eq!(head.parent_count(), 0);
    assert_eq!(Some(head.id()), result.new_head.map(|c| c.oid()));
    assert_eq!(head.message(), Some("Initial commit"));
    assert!(repo.find_branch("old-feature", git2::BranchType::Local).is_err());

    let tree = head.tree().unwrap();
    let names: Vec<String> = tree.iter().map(|e| e.name().unwrap().to_string()).collect();
    assert_eq!(names, vec!["app.py".to_string()]);
    assert_eq!(
        file_at(repo, head.id(), "app.py"),
        std::fs::read_to_string(dir.path().join("app.py")).unwrap()
    );
    assert!(result.warnings.iter().any(|w| w.contains("old-feature")));
    assert!(result.warnings.iter().any(|w| w.contains(".env")));
}

#[test]
fn test_full_purge_is_idempotent() {
    let (_dir, repo) = init_repo();
    commit_files(&repo, &[(".env", "TOKEN=sk-ABC123\n"), ("app.py", "print(0)\n")], "first");
    commit_files(&repo, &[("app.py", "print(1)\n")], "second");

    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::FullPurge).unwrap();
    planner.execute(confirm(plan)).unwrap();
    let purged = head_commit(planner.handle().repo());

    let again = planner.plan(RemediationMode::FullPurge).unwrap();
    assert!(again.is_empty());
    let err = planner.execute(confirm(again)).unwrap_err();
    assert!(matches!(err, Error::EmptyPlan));
    assert_eq!(head_commit(planner.handle().repo()), purged);
}

#[test]
fn test_full_purge_warns_about_remaining_secrets() {
    let (_dir, repo) = init_repo();
    commit_files(&repo, &[("app.py", "KEY = 'sk-ABC123'\n")], "first");

    let planner = planner(repo);
    let plan = planner.plan(RemediationMode::FullPurge).unwrap();
    let result = planner.execute(confirm(plan)).unwrap();
    assert!(result.warnings.iter().any(|w| w.contains("still contain secrets") && w.contains("app.py")));
}
