//! Guest test suites and their execution.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::lab::Lab;
use crate::obs;
use crate::outcome::RunOutcome;
use crate::process::NO_EXIT_CODE;

/// Infra modules run by the guest test runner.
pub const INFRA_MODULES: [&str; 2] = [
    "functional/supervdsmFuncTests.py",
    "functional/upgrade_vdsm_test.py",
];

/// Network modules, expanded by the guest shell.
pub const NETWORK_MODULES: &str = "network/func_*_test.py";

/// Attribute filter selecting functional tests on the legacy switch.
pub const NETWORK_ATTRIBUTES: &str = "type=functional,switch=legacy";

/// Guest service that interferes with the network tests.
pub const NETWORK_MANAGER_SERVICE: &str = "NetworkManager";

/// Guest-side test suites, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suite {
    Infra,
    Network,
}

impl Suite {
    pub const ALL: [Suite; 2] = [Suite::Infra, Suite::Network];

    pub fn name(&self) -> &'static str {
        match self {
            Suite::Infra => "infra",
            Suite::Network => "network",
        }
    }

    /// Command chain run in the guest; it stops at the first failing step.
    pub fn script(&self, ctx: &RunContext) -> String {
        let tests_dir = &ctx.config.guest_tests_dir;
        let steps: Vec<String> = match self {
            Suite::Infra => vec![
                format!("cd {}", tests_dir),
                format!(
                    "./run_tests.sh --with-xunit --xunit-file={} -s {}",
                    ctx.guest_result_file(),
                    INFRA_MODULES.join(" ")
                ),
            ],
            Suite::Network => vec![
                format!("systemctl stop {}", NETWORK_MANAGER_SERVICE),
                format!("systemctl mask {}", NETWORK_MANAGER_SERVICE),
                format!("cd {}", tests_dir),
                format!("./run_tests.sh -a {} {}", NETWORK_ATTRIBUTES, NETWORK_MODULES),
            ],
        };
        steps.join(" && ")
    }

    /// Guest-side structured result file this suite produces, if any.
    pub fn result_file(&self, ctx: &RunContext) -> Option<String> {
        match self {
            Suite::Infra => Some(ctx.guest_result_file()),
            Suite::Network => None,
        }
    }
}

impl std::fmt::Display for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

/// Result of one suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub suite: Suite,
    pub exit_code: i32,
    /// Guest-side result file path, when the suite writes one.
    pub result_file: Option<String>,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run one suite in the guest. Never fails: a suite that cannot be started
/// is reported with exit code -1.
pub async fn run_suite(lab: &Lab<'_>, suite: Suite) -> TestResult {
    let ctx = lab.context();
    let start = Instant::now();
    info!(suite = %suite, "running test suite");

    let exit_code = match lab.shell_tee(&suite.script(ctx), &ctx.stdout_log()).await {
        Ok(code) => code,
        Err(e) => {
            warn!(suite = %suite, error = %e, "test suite could not be run");
            NO_EXIT_CODE
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    obs::emit_suite_finished(suite.name(), exit_code, duration_ms);

    TestResult {
        suite,
        exit_code,
        result_file: suite.result_file(ctx),
        duration_ms,
    }
}

/// Run every suite in order, regardless of earlier failures.
pub async fn run_all(lab: &Lab<'_>) -> (Vec<TestResult>, RunOutcome) {
    let mut results = Vec::with_capacity(Suite::ALL.len());
    let mut outcome = RunOutcome::new();
    for suite in Suite::ALL {
        let result = run_suite(lab, suite).await;
        outcome.record(result.exit_code);
        results.push(result);
    }
    (results, outcome)
}
