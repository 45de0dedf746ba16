//! Replacement rules for `redact --rules`
//!
//! Structured files (TOML, YAML, JSON) carry a `signatures` array shaped like
//! the config key. Anything else is read as a line-based list:
//!
//! ```text
//! # comment
//! hunter2                       -> literal, default replacement
//! sk-live-123==>STRIPE_KEY      -> literal with replacement
//! regex:AKIA[0-9A-Z]{16}==>AWS  -> regex with replacement
//! ```

use std::path::Path;

use figment::Figment;
use figment::providers::{Format, Json, Toml, Yaml};
use serde::Deserialize;

use super::{DEFAULT_REPLACEMENT, SignatureConfig};
use crate::error::{Error, Result};

const SEPARATOR: &str = "==>";
const REGEX_PREFIX: &str = "regex:";

#[derive(Debug, Deserialize)]
struct RulesFile {
    signatures: Vec<SignatureConfig>,
}

pub fn load_rules(path: &Path) -> Result<Vec<SignatureConfig>> {
    if !path.is_file() {
        return Err(Error::configuration(format!("rules file not found: {}", path.display())));
    }

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            let text = std::fs::read_to_string(path)?;
            return parse_replacement_lines(&text);
        }
    };

    let rules: RulesFile = figment
        .extract()
        .map_err(|e| Error::configuration(format!("rules file {}: {e}", path.display())))?;
    if rules.signatures.is_empty() {
        return Err(Error::configuration(format!("rules file {} defines no signatures", path.display())));
    }
    Ok(rules.signatures)
}

pub fn parse_replacement_lines(text: &str) -> Result<Vec<SignatureConfig>> {
    let mut rules = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (needle, replacement) = match line.rsplit_once(SEPARATOR) {
            Some((needle, replacement)) => (needle, replacement.to_string()),
            None => (line, DEFAULT_REPLACEMENT.to_string()),
        };
        let (pattern, literal) = match needle.strip_prefix(REGEX_PREFIX) {
            Some(regex) => (Some(regex.to_string()), None),
            None => (None, Some(needle.to_string())),
        };
        if pattern.as_deref().or(literal.as_deref()).is_some_and(str::is_empty) {
            return Err(Error::configuration(format!("rules line {}: empty pattern", number + 1)));
        }

        rules.push(SignatureConfig {
            id: format!("rule-{}", rules.len() + 1),
            pattern,
            literal,
            replacement,
            description: format!("rules line {}", number + 1),
        });
    }

    if rules.is_empty() {
        return Err(Error::configuration("rules file defines no signatures"));
    }
    Ok(rules)
}
