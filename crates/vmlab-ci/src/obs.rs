//! Structured lifecycle events for a harness run.
//!
//! - [`run_span`] tags everything logged during a run with its run id and distro.
//! - `emit_*` functions log the step lifecycle with a stable `event` field so
//!   CI log aggregation can filter on it.

use tracing::{info, warn};

use crate::error::ToleratedError;

/// Run-scoped span; the pipeline future is instrumented with it.
pub fn run_span(run_id: &str, distro: &str) -> tracing::Span {
    tracing::info_span!("vmlab.run", run_id = %run_id, distro = %distro)
}

pub fn emit_step_started(step: &str) {
    info!(event = "step.started", step = %step);
}

pub fn emit_step_finished(step: &str, code: i32) {
    info!(event = "step.finished", step = %step, exit_code = code);
}

/// A failure was recorded and the run continues.
pub fn emit_step_tolerated(tolerated: &ToleratedError) {
    warn!(
        event = "step.tolerated",
        step = %tolerated.step,
        error = %tolerated.message,
    );
}

pub fn emit_suite_finished(suite: &str, exit_code: i32, duration_ms: u64) {
    if exit_code == 0 {
        info!(event = "suite.finished", suite = %suite, exit_code, duration_ms, passed = true);
    } else {
        warn!(event = "suite.finished", suite = %suite, exit_code, duration_ms, passed = false);
    }
}

pub fn emit_run_finished(run_id: &str, exit_code: i32, duration_ms: u64, tolerated: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        exit_code,
        duration_ms,
        tolerated_errors = tolerated,
        success = exit_code == 0,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let _span = run_span("run-1", "el7").entered();
        emit_step_started("lago init");
        emit_step_finished("lago init", 0);
        emit_step_tolerated(&ToleratedError::new("copy-from-vm", "missing"));
        emit_suite_finished("infra", 1, 10);
        emit_run_finished("run-1", 1, 100, 1);
    }
}
