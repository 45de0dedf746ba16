use std::ops::Range;

use content_inspector::{ContentType, inspect};
use serde::Serialize;

use crate::scanner::{Match, SignatureSet};

/// One substitution in a blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redaction {
    pub range: Range<usize>,
    pub replacement: String,
    /// Signature whose replacement won the cluster
    pub signature_id: String,
}

/// Merge a blob's matches into non-overlapping redactions.
///
/// Transitively overlapping ranges form one cluster, replaced once by the
/// replacement of the earliest-declared signature in it. Adjacent ranges
/// stay separate.
pub fn resolve<'a>(matches: impl IntoIterator<Item = &'a Match>, signatures: &SignatureSet) -> Vec<Redaction> {
    let mut sorted: Vec<&Match> = matches.into_iter().collect();
    sorted.sort_by_key(|m| (m.byte_range.start, m.byte_range.end));

    let precedence = |m: &Match| signatures.position(&m.signature_id).unwrap_or(usize::MAX);

    let mut clusters: Vec<(Range<usize>, &Match)> = Vec::new();
    for m in sorted {
        match clusters.last_mut() {
            Some((range, winner)) if m.byte_range.start < range.end => {
                range.end = range.end.max(m.byte_range.end);
                if precedence(m) < precedence(*winner) {
                    *winner = m;
                }
            }
            _ => clusters.push((m.byte_range.clone(), m)),
        }
    }

    clusters
        .into_iter()
        .map(|(range, winner)| Redaction {
            range,
            replacement: signatures
                .get(&winner.signature_id)
                .map(|s| s.replacement.clone())
                .unwrap_or_else(|| crate::config::DEFAULT_REPLACEMENT.to_string()),
            signature_id: winner.signature_id.clone(),
        })
        .collect()
}

fn is_char_boundary(content: &[u8], index: usize) -> bool {
    index == 0 || index >= content.len() || (content[index] & 0xC0) != 0x80
}

/// Apply sorted, non-overlapping redactions.
///
/// Refuses substitutions that would corrupt the text: multi-byte encodings,
/// ranges splitting a UTF-8 sequence, or output that stops being UTF-8.
pub fn apply(content: &[u8], redactions: &[Redaction]) -> std::result::Result<Vec<u8>, String> {
    match inspect(content) {
        ContentType::UTF_16LE | ContentType::UTF_16BE | ContentType::UTF_32LE | ContentType::UTF_32BE => {
            return Err("content is UTF-16/UTF-32 encoded".to_string());
        }
        _ => {}
    }

    let mut out = Vec::with_capacity(content.len());
    let mut cursor = 0;
    for redaction in redactions {
        let Range { start, end } = redaction.range;
        if start < cursor || end > content.len() || start >= end {
            return Err(format!("invalid redaction range {start}..{end}"));
        }
        if !is_char_boundary(content, start) || !is_char_boundary(content, end) {
            return Err(format!("range {start}..{end} splits a UTF-8 sequence"));
        }
        out.extend_from_slice(&content[cursor..start]);
        out.extend_from_slice(redaction.replacement.as_bytes());
        cursor = end;
    }
    out.extend_from_slice(&content[cursor..]);

    if std::str::from_utf8(content).is_ok() && std::str::from_utf8(&out).is_err() {
        return Err("redacted content is no longer valid UTF-8".to_string());
    }
    Ok(out)
}
