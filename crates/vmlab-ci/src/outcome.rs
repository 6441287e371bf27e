//! Aggregation of test results into one run outcome.

use serde::{Deserialize, Serialize};

/// Aggregated exit status of a run.
///
/// Starts at zero. A non-zero result always overwrites the current value and
/// a zero result never does, so an earlier failure survives a later success
/// while a later failure replaces an earlier one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    code: i32,
}

impl RunOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, exit_code: i32) {
        if exit_code != 0 {
            self.code = exit_code;
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Code suitable for a process exit status: 0, or a value in `1..=255`.
    pub fn process_exit_code(&self) -> u8 {
        match self.code {
            0 => 0,
            c @ 1..=255 => c as u8,
            _ => 1,
        }
    }
}

impl FromIterator<i32> for RunOutcome {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        let mut outcome = RunOutcome::new();
        for code in iter {
            outcome.record(code);
        }
        outcome
    }
}
