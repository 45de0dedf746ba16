use std::collections::BTreeMap;

use crate::git::{BlobId, HeadState, RefSnapshot};
use crate::scanner::Match;

use super::{Redaction, RemediationMode};

/// Minimum accepted length of an abbreviated confirmation token
pub const MIN_TOKEN_LEN: usize = 12;

/// blake3 over mode, ref snapshot, the ordered match set and the planned
/// redactions, as lowercase hex.
pub fn plan_digest(
    mode: RemediationMode,
    snapshot: &RefSnapshot,
    matches: &[Match],
    redactions: &BTreeMap<BlobId, Vec<Redaction>>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"gitredact-plan-v1\0");
    hasher.update(mode.to_string().as_bytes());
    hasher.update(b"\0");

    match &snapshot.head {
        HeadState::Unborn { branch } => {
            hasher.update(b"unborn\0");
            hasher.update(branch.as_bytes());
        }
        HeadState::Branch { name, commit } => {
            hasher.update(b"branch\0");
            hasher.update(name.as_bytes());
            hasher.update(commit.oid().as_bytes());
        }
        HeadState::Detached { commit } => {
            hasher.update(b"detached\0");
            hasher.update(commit.oid().as_bytes());
        }
    }

    for (name, target) in &snapshot.refs {
        hasher.update(b"\0ref\0");
        hasher.update(name.as_bytes());
        hasher.update(target.target.oid().as_bytes());
    }

    for m in matches {
        hasher.update(b"\0match\0");
        hasher.update(m.signature_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(m.blob_id.oid().as_bytes());
        hasher.update(&(m.byte_range.start as u64).to_le_bytes());
        hasher.update(&(m.byte_range.end as u64).to_le_bytes());
    }

    for (blob_id, planned) in redactions {
        for redaction in planned {
            hasher.update(b"\0redact\0");
            hasher.update(blob_id.oid().as_bytes());
            hasher.update(&(redaction.range.start as u64).to_le_bytes());
            hasher.update(&(redaction.range.end as u64).to_le_bytes());
            hasher.update(redaction.replacement.as_bytes());
        }
    }

    hasher.finalize().to_hex().to_string()
}

/// Whether `token` confirms `digest`: the full digest, or a prefix of at
/// least [`MIN_TOKEN_LEN`] characters, case-insensitive.
pub fn token_matches(digest: &str, token: &str) -> bool {
    let token = token.trim().to_ascii_lowercase();
    token.len() >= MIN_TOKEN_LEN && token.len() <= digest.len() && digest.starts_with(&token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Oid;

    fn snapshot() -> RefSnapshot {
        RefSnapshot {
            head: HeadState::Unborn {
                branch: "refs/heads/main".to_string(),
            },
            refs: BTreeMap::new(),
        }
    }

    #[test]
    fn test_digest_depends_on_mode() {
        let a = plan_digest(RemediationMode::FullPurge, &snapshot(), &[], &BTreeMap::new());
        let b = plan_digest(RemediationMode::SelectiveReplace, &snapshot(), &[], &BTreeMap::new());
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, plan_digest(RemediationMode::FullPurge, &snapshot(), &[], &BTreeMap::new()));
    }

    #[test]
    fn test_token_prefix_rules() {
        let digest = plan_digest(RemediationMode::FullPurge, &snapshot(), &[], &BTreeMap::new());
        assert!(token_matches(&digest, &digest));
        assert!(token_matches(&digest, &digest[..12]));
        assert!(token_matches(&digest, &digest[..16].to_uppercase()));
        assert!(!token_matches(&digest, &digest[..11]));
        assert!(!token_matches(&digest, "000000000000"));
        assert!(!token_matches(&digest, ""));
    }

    #[test]
    fn test_digest_depends_on_replacement_tokens() {
        let blob_id: BlobId = Oid::hash_object(git2::ObjectType::Blob, b"KEY = sk-ABC123").unwrap().into();
        let planned = |replacement: &str| {
            BTreeMap::from([(
                blob_id,
                vec![Redaction {
                    range: 6..15,
                    replacement: replacement.to_string(),
                    signature_id: "api-key".to_string(),
                }],
            )])
        };
        let a = plan_digest(RemediationMode::SelectiveReplace, &snapshot(), &[], &planned("REDACTED"));
        let b = plan_digest(RemediationMode::SelectiveReplace, &snapshot(), &[], &planned("***"));
        assert_ne!(a, b);
        assert!(!token_matches(&b, &a[..MIN_TOKEN_LEN]));
    }
}
