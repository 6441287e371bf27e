//! Run report: tolerated failures, suite results and the final outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::HarnessConfig;
use crate::error::{Result, ToleratedError};
use crate::executor::TestResult;
use crate::obs;
use crate::outcome::RunOutcome;

/// Failures recorded during a run that did not abort it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerations {
    errors: Vec<ToleratedError>,
}

impl Tolerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure of `step`.
    pub fn push(&mut self, step: &str, message: impl std::fmt::Display) {
        let tolerated = ToleratedError::new(step, message);
        obs::emit_step_tolerated(&tolerated);
        self.errors.push(tolerated);
    }

    /// Keep the value of `result`, or record its error and return `None`.
    pub fn tolerate<T, E: std::fmt::Display>(
        &mut self,
        step: &str,
        result: std::result::Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(step, e);
                None
            }
        }
    }

    /// Like [`Tolerations::tolerate`] for exit codes; a non-zero code counts as a failure.
    pub fn tolerate_exit(&mut self, step: &str, result: Result<i32>) -> bool {
        match self.tolerate(step, result) {
            Some(0) => {
                obs::emit_step_finished(step, 0);
                true
            }
            Some(code) => {
                self.push(step, format!("exited with code {}", code));
                false
            }
            None => false,
        }
    }

    pub fn errors(&self) -> &[ToleratedError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any recorded failure belongs to `step`.
    pub fn contains_step(&self, step: &str) -> bool {
        self.errors.iter().any(|e| e.step == step)
    }
}

/// Summary of one run, written as JSON to the export directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub distro: String,
    pub vm_name: String,
    pub config: HarnessConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<TestResult>,
    pub tolerated: Vec<ToleratedError>,
    pub outcome: RunOutcome,
    /// Fatal error that ended the run after the guest started, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.code()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
