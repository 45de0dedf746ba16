//! Configuration management for gitredact
//!
//! Settings are layered with figment: embedded defaults, then a repository
//! or explicit config file, then `GITREDACT_*` environment variables.
//! Arrays from a higher layer replace lower ones.

mod rules;

pub use rules::{load_rules, parse_replacement_lines};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scanner::{PoolConfig, SignatureSet};
use crate::walker::IgnoreList;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../assets/default-config.toml");

/// Repository config files, in lookup order
pub const REPO_CONFIG_FILES: [&str; 4] = ["gitredact.toml", "gitredact.yaml", "gitredact.yml", "gitredact.json"];

pub const DEFAULT_REPLACEMENT: &str = "REDACTED";

fn default_replacement() -> String {
    DEFAULT_REPLACEMENT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub signatures: Vec<SignatureConfig>,

    /// Globs never scanned and never carried into a purged commit
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub purge: PurgeConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

/// One signature as written in config or a rules file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub id: String,

    /// Regular expression; exclusive with `literal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,

    #[serde(default = "default_replacement")]
    pub replacement: String,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub max_file_size_mb: u64,
    /// 0 derives the worker count from `thread_percentage`
    pub max_threads: usize,
    pub thread_percentage: u8,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10,
            max_threads: 0,
            thread_percentage: 75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            message: "Initial commit".to_string(),
            author_name: None,
            author_email: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Append exposure events as JSON lines to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration for the repository rooted at `repo_root`.
    pub fn load(repo_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(repo_root, explicit)?)
    }

    /// Embedded defaults only
    pub fn defaults() -> Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(DEFAULT_CONFIG)))
    }

    pub fn figment(repo_root: &Path, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));

        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(Error::configuration(format!("config file not found: {}", path.display())));
            }
            figment = merge_file(figment, path);
        } else if let Some(path) = REPO_CONFIG_FILES
            .iter()
            .map(|name| repo_root.join(name))
            .find(|p| p.is_file())
        {
            tracing::debug!("Using repository config {}", path.display());
            figment = merge_file(figment, &path);
        }

        // Environment variables always have highest priority
        Ok(figment.merge(Env::prefixed("GITREDACT_").split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| Error::configuration(e.to_string()))
    }

    /// Replace the configured signatures, as `redact --rules` does.
    pub fn with_signatures(mut self, signatures: Vec<SignatureConfig>) -> Self {
        self.signatures = signatures;
        self
    }

    /// Compile everything that can fail, without side effects.
    pub fn validate(&self) -> Result<()> {
        Settings::from_config(self).map(|_| ())
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => figment.merge(Json::file(path)),
        Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

/// Compiled, immutable settings shared by the planner and rewriter
#[derive(Debug, Clone)]
pub struct Settings {
    pub signatures: Arc<SignatureSet>,
    pub ignore: IgnoreList,
    pub pool: PoolConfig,
    pub purge: PurgeConfig,
    pub notify: NotifyConfig,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.signatures.is_empty() {
            return Err(Error::configuration("no signatures configured"));
        }
        if config.scanner.thread_percentage > 100 {
            return Err(Error::configuration("scanner.thread_percentage must be between 0 and 100"));
        }
        let signatures = SignatureSet::compile(&config.signatures)?;
        let ignore = IgnoreList::new(&config.ignore_patterns)?;
        let pool = PoolConfig {
            max_threads: config.scanner.max_threads,
            thread_percentage: config.scanner.thread_percentage,
            max_blob_size: config.scanner.max_file_size_mb.saturating_mul(1024 * 1024),
        };
        Ok(Self {
            signatures: Arc::new(signatures),
            ignore,
            pool,
            purge: config.purge.clone(),
            notify: config.notify.clone(),
        })
    }
}

#[cfg(test)]
mod tests;
