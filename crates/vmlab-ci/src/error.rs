//! Error taxonomy for the harness.
//!
//! Fatal failures travel as [`HarnessError`]. Failures the run is allowed to
//! survive are converted into [`ToleratedError`] values and kept for the
//! run report instead of being discarded.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("step `{step}` exited with code {code}")]
    StepFailed { step: String, code: i32 },

    #[error("failed to remove stale environment at {path:?}: {source}")]
    StaleEnvironment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid package glob `{glob}`: {source}")]
    InvalidGlob {
        glob: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Build a [`HarnessError::StepFailed`] for a non-zero exit.
    pub fn step_failed(step: impl Into<String>, code: i32) -> Self {
        HarnessError::StepFailed {
            step: step.into(),
            code,
        }
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// A failure that was recorded and then ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToleratedError {
    /// Pipeline step that produced the failure.
    pub step: String,
    /// Human-readable cause.
    pub message: String,
}

impl ToleratedError {
    pub fn new(step: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            step: step.into(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for ToleratedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}
