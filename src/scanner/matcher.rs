use std::ops::Range;

use content_inspector::{ContentType, inspect};
use serde::Serialize;

use super::signature::SignatureSet;
use crate::git::BlobId;

/// Characters of surrounding text kept on each side of a masked match
const CONTEXT_CHARS: usize = 40;

/// A single signature hit inside a blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub signature_id: String,
    pub blob_id: BlobId,
    pub byte_range: Range<usize>,
    /// 1-based line of the first matched byte
    pub line: usize,
    /// The matched line with the secret replaced by its redaction token
    pub context_snippet: String,
}

impl Match {
    pub fn len(&self) -> usize {
        self.byte_range.end - self.byte_range.start
    }

    pub fn is_empty(&self) -> bool {
        self.byte_range.is_empty()
    }

    pub fn overlaps(&self, other: &Match) -> bool {
        self.blob_id == other.blob_id
            && self.byte_range.start < other.byte_range.end
            && other.byte_range.start < self.byte_range.end
    }
}

/// Result of scanning a single blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned(Vec<Match>),
    /// Binary content is not scanned or rewritten
    BinarySkipped,
}

impl ScanOutcome {
    pub fn matches(&self) -> &[Match] {
        match self {
            ScanOutcome::Scanned(matches) => matches,
            ScanOutcome::BinarySkipped => &[],
        }
    }

    pub fn into_matches(self) -> Vec<Match> {
        match self {
            ScanOutcome::Scanned(matches) => matches,
            ScanOutcome::BinarySkipped => Vec::new(),
        }
    }
}

/// Whether `content` should be treated as binary.
///
/// UTF-16/32 text is detected by BOM and still scanned; redaction later
/// refuses to touch it.
pub fn is_binary(content: &[u8]) -> bool {
    inspect(content) == ContentType::BINARY
}

/// Scan one blob against every signature.
///
/// Matches come out in signature declaration order, then left to right.
/// Overlapping matches from different signatures are all reported.
pub fn scan(blob_id: BlobId, content: &[u8], signatures: &SignatureSet) -> ScanOutcome {
    if content.is_empty() {
        return ScanOutcome::Scanned(Vec::new());
    }
    if is_binary(content) {
        tracing::debug!("Skipping binary blob {}", blob_id.short());
        return ScanOutcome::BinarySkipped;
    }

    let mut matches = Vec::new();
    let mut replacements: Vec<&str> = Vec::new();

    for signature in signatures.iter() {
        for found in signature.regex.find_iter(content) {
            if found.start() == found.end() {
                continue;
            }
            replacements.push(&signature.replacement);
            matches.push(Match {
                signature_id: signature.id.clone(),
                blob_id,
                line: 0,
                context_snippet: String::new(),
                byte_range: found.range(),
            });
        }
    }

    if !matches.is_empty() {
        // Snippets are built once every match is known so that neighbouring
        // secrets on the same line are masked as well.
        let lines = LineIndex::new(content);
        let mut masks: Vec<(Range<usize>, &str)> = matches
            .iter()
            .map(|m| m.byte_range.clone())
            .zip(replacements.iter().copied())
            .collect();
        masks.sort_by_key(|(range, _)| (range.start, range.end));

        for (m, replacement) in matches.iter_mut().zip(replacements) {
            m.line = lines.line_of(m.byte_range.start);
            m.context_snippet = masked_context(content, &lines, &m.byte_range, replacement, &masks);
        }
    }

    if !matches.is_empty() {
        tracing::trace!("Blob {} has {} matches", blob_id.short(), matches.len());
    }
    ScanOutcome::Scanned(matches)
}

/// Byte offsets of line starts
struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    fn new(content: &[u8]) -> Self {
        let starts = std::iter::once(0)
            .chain(content.iter().enumerate().filter(|(_, b)| **b == b'\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            starts,
            len: content.len(),
        }
    }

    /// 1-based line containing `offset`
    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Bounds of the line containing `offset`, without the line terminator
    fn bounds(&self, content: &[u8], offset: usize) -> Range<usize> {
        let line = self.line_of(offset);
        let start = self.starts[line - 1];
        let mut end = self.starts.get(line).map(|next| next - 1).unwrap_or(self.len);
        if end > start && content[end - 1] == b'\r' {
            end -= 1;
        }
        start..end
    }
}

fn masked_context(
    content: &[u8],
    lines: &LineIndex,
    range: &Range<usize>,
    replacement: &str,
    masks: &[(Range<usize>, &str)],
) -> String {
    let first = lines.bounds(content, range.start);
    // Multi-line matches show the tail of the line where they end.
    let last = lines.bounds(content, range.end.saturating_sub(1));

    let before = mask_segment(content, first.start..range.start, masks);
    let after = mask_segment(content, range.end..last.end.max(range.end), masks);

    let before: String = {
        let trimmed = before.trim_start();
        let count = trimmed.chars().count();
        trimmed.chars().skip(count.saturating_sub(CONTEXT_CHARS)).collect()
    };
    let after: String = after.chars().take(CONTEXT_CHARS).collect();

    format!("{before}{replacement}{after}")
}

/// Render `segment` with every masked range inside it replaced by its token.
/// `masks` must be sorted by start. Overlapping ranges collapse into the
/// token of the first one.
fn mask_segment(content: &[u8], segment: Range<usize>, masks: &[(Range<usize>, &str)]) -> String {
    let mut out = String::new();
    let mut cursor = segment.start;
    for (range, token) in masks {
        if range.end <= cursor || range.start >= segment.end {
            continue;
        }
        let start = range.start.max(cursor);
        if start > cursor {
            out.push_str(&String::from_utf8_lossy(&content[cursor..start]));
            out.push_str(token);
        } else if cursor == segment.start || start == range.start {
            out.push_str(token);
        }
        cursor = range.end.min(segment.end);
    }
    if cursor < segment.end {
        out.push_str(&String::from_utf8_lossy(&content[cursor..segment.end]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::signature::Signature;
    use git2::Oid;

    fn blob_id() -> BlobId {
        Oid::hash_object(git2::ObjectType::Blob, b"test").unwrap().into()
    }

    fn signatures() -> SignatureSet {
        SignatureSet::new(vec![
            Signature::regex("api-key", r"sk-[A-Z0-9]{6,}", "REDACTED").unwrap(),
            Signature::literal("password", "hunter2", "***").unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_finds_matches_with_lines_and_ranges() {
        let content = b"name = 1\nkey = \"sk-ABC123\"\npw = hunter2\n";
        let matches = scan(blob_id(), content, &signatures()).into_matches();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].signature_id, "api-key");
        assert_eq!(matches[0].line, 2);
        assert_eq!(&content[matches[0].byte_range.clone()], b"sk-ABC123");
        assert_eq!(matches[1].signature_id, "password");
        assert_eq!(matches[1].line, 3);
    }

    #[test]
    fn test_snippet_never_contains_secret() {
        let content = b"export TOKEN=sk-ABC123XYZ # prod\n";
        let matches = scan(blob_id(), content, &signatures()).into_matches();
        assert_eq!(matches[0].context_snippet, "export TOKEN=REDACTED # prod");
    }

    #[test]
    fn test_snippet_masks_neighbouring_secrets_on_the_same_line() {
        let content = b"KEYS = [\"sk-AAAAAA1\", \"sk-BBBBBB2\"] # hunter2\n";
        let matches = scan(blob_id(), content, &signatures()).into_matches();
        assert_eq!(matches.len(), 3);
        for m in &matches {
            assert!(!m.context_snippet.contains("sk-"), "{}", m.context_snippet);
            assert!(!m.context_snippet.contains("hunter2"), "{}", m.context_snippet);
        }
        assert_eq!(matches[0].context_snippet, "KEYS = [\"REDACTED\", \"REDACTED\"] # ***");
    }

    #[test]
    fn test_snippet_masks_overlapping_match_from_other_signature() {
        let set = SignatureSet::new(vec![
            Signature::regex("short", r"ABC123", "B").unwrap(),
            Signature::regex("long", r"sk-[A-Z0-9]{6,}", "A").unwrap(),
        ])
        .unwrap();
        let matches = scan(blob_id(), b"x = sk-ABC123XY", &set).into_matches();
        assert_eq!(matches.len(), 2);
        for m in &matches {
            assert!(!m.context_snippet.contains("ABC"), "{}", m.context_snippet);
            assert!(!m.context_snippet.contains("sk-"), "{}", m.context_snippet);
        }
    }

    #[test]
    fn test_overlapping_matches_are_all_reported() {
        let set = SignatureSet::new(vec![
            Signature::regex("long", r"sk-[A-Z0-9]{6,}", "A").unwrap(),
            Signature::regex("short", r"ABC123", "B").unwrap(),
        ])
        .unwrap();
        let matches = scan(blob_id(), b"sk-ABC123", &set).into_matches();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].overlaps(&matches[1]));
    }

    #[test]
    fn test_order_is_declaration_then_position() {
        let content = b"hunter2 sk-AAAAAA hunter2 sk-BBBBBB";
        let matches = scan(blob_id(), content, &signatures()).into_matches();
        let order: Vec<(&str, usize)> = matches
            .iter()
            .map(|m| (m.signature_id.as_str(), m.byte_range.start))
            .collect();
        assert_eq!(order, vec![("api-key", 8), ("api-key", 26), ("password", 0), ("password", 18)]);

        // Deterministic across runs.
        assert_eq!(matches, scan(blob_id(), content, &signatures()).into_matches());
    }

    #[test]
    fn test_binary_is_skipped() {
        let content = b"\x00\x01\x02sk-ABC123\x00";
        assert_eq!(scan(blob_id(), content, &signatures()), ScanOutcome::BinarySkipped);
    }

    #[test]
    fn test_empty_blob_has_no_matches() {
        assert!(scan(blob_id(), b"", &signatures()).matches().is_empty());
    }

    #[test]
    fn test_crlf_line_is_trimmed() {
        let content = b"a\r\nkey=sk-ABC123\r\n";
        let matches = scan(blob_id(), content, &signatures()).into_matches();
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[0].context_snippet, "key=REDACTED");
    }
}
