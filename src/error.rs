//! Error taxonomy for gitredact
//!
//! Library code returns [`Error`]; the CLI wraps it in `anyhow` and maps it
//! back to a process exit code through [`Error::exit_code`].

use thiserror::Error;

use crate::plan::RemediationMode;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed signature, glob or configuration file. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Refs moved between planning and execution.
    #[error("stale plan: {0} (re-run the plan)")]
    StalePlan(String),

    /// The user declined, or the confirmation token did not match the plan digest.
    #[error("confirmation denied: {0}")]
    ConfirmationDenied(String),

    /// Nothing to rewrite. Callers treat this as success.
    #[error("plan is empty: no matches found")]
    EmptyPlan,

    /// The rewrite was abandoned before any ref moved; the repository is unchanged.
    #[error("rewrite aborted, repository unchanged: {0}")]
    RewriteAborted(String),

    #[error("invalid rewrite transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("unsupported repository: {0}")]
    UnsupportedRepository(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Interrupted before any repository change.
    #[error("cancelled")]
    Cancelled,

    #[error("while planning {mode}: {source}")]
    Plan {
        mode: RemediationMode,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Error::RewriteAborted(message.into())
    }

    /// Wrap an error raised by the walker or matcher with the plan it belongs to.
    pub fn planning(mode: RemediationMode, source: Error) -> Self {
        match source {
            // Already carries plan context.
            Error::Plan { .. } => source,
            other => Error::Plan {
                mode,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through plan context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Plan { source, .. } => source.root(),
            other => other,
        }
    }

    /// Exit code for the CLI.
    ///
    /// `0` nothing to do, `2` declined, `3` stale plan or aborted rewrite,
    /// `130` interrupted, `4` anything else.
    pub fn exit_code(&self) -> u8 {
        match self.root() {
            Error::EmptyPlan => 0,
            Error::ConfirmationDenied(_) => 2,
            Error::StalePlan(_) | Error::RewriteAborted(_) => 3,
            Error::Cancelled => 130,
            _ => 4,
        }
    }

    /// Informational outcomes that are shaped like errors but are not failures.
    pub fn is_informational(&self) -> bool {
        matches!(self.root(), Error::EmptyPlan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::EmptyPlan.exit_code(), 0);
        assert_eq!(Error::ConfirmationDenied("no".into()).exit_code(), 2);
        assert_eq!(Error::StalePlan("moved".into()).exit_code(), 3);
        assert_eq!(Error::aborted("bad utf-8").exit_code(), 3);
        assert_eq!(Error::configuration("bad regex").exit_code(), 4);
    }

    #[test]
    fn test_plan_context_is_transparent_for_exit_codes() {
        let wrapped = Error::planning(
            RemediationMode::SelectiveReplace,
            Error::StalePlan("HEAD moved".into()),
        );
        assert_eq!(wrapped.exit_code(), 3);
        assert!(wrapped.to_string().contains("selective-replace"));

        // Wrapping twice keeps a single layer of context.
        let twice = Error::planning(RemediationMode::FullPurge, wrapped);
        assert!(matches!(
            twice,
            Error::Plan {
                mode: RemediationMode::SelectiveReplace,
                ..
            }
        ));
    }

    #[test]
    fn test_informational() {
        assert!(Error::EmptyPlan.is_informational());
        assert!(!Error::configuration("x").is_informational());
    }
}
