//! # gitredact
//!
//! Find secrets in a git repository and remove them from history.
//!
//! Scanning never touches the repository. Remediation goes through a
//! [`Plan`]: a dry run bound to the repository state by a digest. A plan is
//! executed only after it is confirmed with that digest, and every rewrite is
//! built in a scratch object store before refs move in one locked
//! transaction.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitredact::{Config, LogNotifier, Planner, RemediationMode, RepoHandle, Settings};
//!
//! # fn main() -> gitredact::Result<()> {
//! let handle = RepoHandle::discover(".")?;
//! let config = Config::load(handle.workdir()?, None)?;
//! let planner = Planner::new(handle, Settings::from_config(&config)?, Arc::new(LogNotifier));
//!
//! let plan = planner.plan(RemediationMode::SelectiveReplace)?;
//! println!("{} matches, digest {}", plan.match_count(), plan.digest());
//! let confirmed = plan.confirm(&gitredact::ConfirmationToken::new("0123456789ab"))?;
//! planner.execute(confirmed)?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod hooks;
pub mod notify;
pub mod plan;
pub mod rewrite;
pub mod scanner;
pub mod walker;

pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use git::RepoHandle;
pub use notify::{LogNotifier, RotationNotifier, SecretsExposedEvent};
pub use plan::{ConfirmationToken, ConfirmedPlan, Plan, Planner, RemediationMode};
pub use rewrite::RewriteResult;
pub use scanner::{Match, ScanOptions, ScanReport, SignatureSet};
pub use walker::Scope;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
