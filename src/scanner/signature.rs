use regex::bytes::Regex;
use serde::Serialize;

use crate::config::SignatureConfig;
use crate::error::{Error, Result};

/// How a signature's pattern text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Regex,
    Literal,
}

/// A named secret signature with the token that replaces its matches
#[derive(Debug, Clone)]
pub struct Signature {
    pub id: String,
    pub kind: PatternKind,
    /// Pattern text as configured (regex source or literal)
    pub source: String,
    pub regex: Regex,
    pub replacement: String,
    pub description: String,
}

impl Signature {
    pub fn regex(id: impl Into<String>, pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let regex = Regex::new(pattern)
            .map_err(|e| Error::configuration(format!("signature '{id}': invalid regex: {e}")))?;
        if regex.is_match(b"") {
            return Err(Error::configuration(format!(
                "signature '{id}': pattern matches the empty string"
            )));
        }
        Ok(Self {
            id,
            kind: PatternKind::Regex,
            source: pattern.to_string(),
            regex,
            replacement: replacement.into(),
            description: String::new(),
        })
    }

    pub fn literal(id: impl Into<String>, literal: &str, replacement: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if literal.is_empty() {
            return Err(Error::configuration(format!("signature '{id}': literal is empty")));
        }
        let regex = Regex::new(&regex::escape(literal))
            .map_err(|e| Error::configuration(format!("signature '{id}': {e}")))?;
        Ok(Self {
            id,
            kind: PatternKind::Literal,
            source: literal.to_string(),
            regex,
            replacement: replacement.into(),
            description: String::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn from_config(config: &SignatureConfig) -> Result<Self> {
        let signature = match (&config.pattern, &config.literal) {
            (Some(pattern), None) => Self::regex(&config.id, pattern, &config.replacement)?,
            (None, Some(literal)) => Self::literal(&config.id, literal, &config.replacement)?,
            (Some(_), Some(_)) => {
                return Err(Error::configuration(format!(
                    "signature '{}': set either `pattern` or `literal`, not both",
                    config.id
                )));
            }
            (None, None) => {
                return Err(Error::configuration(format!(
                    "signature '{}': missing `pattern` or `literal`",
                    config.id
                )));
            }
        };
        Ok(signature.with_description(config.description.clone()))
    }
}

/// Ordered, immutable set of signatures. Declaration order decides match
/// ordering and redaction precedence.
#[derive(Debug, Clone, Default)]
pub struct SignatureSet {
    signatures: Vec<Signature>,
}

impl SignatureSet {
    /// Validate and freeze a list of signatures.
    ///
    /// Rejects duplicate ids and replacements that would themselves be
    /// detected by any signature, since a redacted history must re-scan clean.
    pub fn new(signatures: Vec<Signature>) -> Result<Self> {
        for (i, signature) in signatures.iter().enumerate() {
            if signature.id.trim().is_empty() {
                return Err(Error::configuration(format!("signature #{} has an empty id", i + 1)));
            }
            if signatures[..i].iter().any(|s| s.id == signature.id) {
                return Err(Error::configuration(format!("duplicate signature id '{}'", signature.id)));
            }
        }
        for signature in &signatures {
            if let Some(other) = signatures
                .iter()
                .find(|s| s.regex.is_match(signature.replacement.as_bytes()))
            {
                return Err(Error::configuration(format!(
                    "replacement '{}' of signature '{}' is itself matched by signature '{}'",
                    signature.replacement, signature.id, other.id
                )));
            }
        }
        Ok(Self { signatures })
    }

    pub fn compile(configs: &[SignatureConfig]) -> Result<Self> {
        let signatures = configs
            .iter()
            .map(Signature::from_config)
            .collect::<Result<Vec<_>>>()?;
        Self::new(signatures)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.id == id)
    }

    /// Declaration index of a signature, used as redaction precedence
    pub fn position(&self, id: &str) -> Option<usize> {
        self.signatures.iter().position(|s| s.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.signatures.iter().map(|s| s.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str, pattern: Option<&str>, literal: Option<&str>) -> SignatureConfig {
        SignatureConfig {
            id: id.to_string(),
            pattern: pattern.map(str::to_string),
            literal: literal.map(str::to_string),
            replacement: "REDACTED".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_literal_is_escaped() {
        let signature = Signature::literal("dotted", "a.b", "X").unwrap();
        assert!(signature.regex.is_match(b"xa.by"));
        assert!(!signature.regex.is_match(b"axb"));
        assert_eq!(signature.kind, PatternKind::Literal);
    }

    #[test]
    fn test_invalid_regex_is_configuration_error() {
        let err = Signature::regex("broken", "sk-[", "X").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_empty_matching_pattern_rejected() {
        assert!(Signature::regex("greedy", "a*", "X").is_err());
        assert!(Signature::literal("empty", "", "X").is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = SignatureSet::compile(&[
            config("dup", Some("sk-[A-Z]+"), None),
            config("dup", None, Some("secret")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_pattern_and_literal_are_exclusive() {
        assert!(SignatureSet::compile(&[config("both", Some("x+"), Some("x"))]).is_err());
        assert!(SignatureSet::compile(&[config("neither", None, None)]).is_err());
    }

    #[test]
    fn test_self_matching_replacement_rejected() {
        let mut cfg = config("redacted-word", Some("RED[A-Z]+"), None);
        cfg.replacement = "REDACTED".to_string();
        let err = SignatureSet::compile(&[cfg]).unwrap_err();
        assert!(err.to_string().contains("itself matched"));
    }

    #[test]
    fn test_lookup_and_order() {
        let set = SignatureSet::compile(&[
            config("first", Some("sk-[A-Z0-9]+"), None),
            config("second", None, Some("hunter2")),
        ])
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.ids(), vec!["first", "second"]);
        assert_eq!(set.position("second"), Some(1));
        assert!(set.get("missing").is_none());
    }
}
