//! End-to-end run orchestration.

use chrono::Utc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::artifacts;
use crate::collector;
use crate::context::RunContext;
use crate::error::Result;
use crate::executor::{self, TestResult};
use crate::lab::Lab;
use crate::lifecycle::{self, ServeGuard};
use crate::obs;
use crate::outcome::RunOutcome;
use crate::process::CommandRunner;
use crate::provision;
use crate::report::{RunReport, Tolerations};

pub const STEP_RELEASE_SERVE: &str = "stop serve";
pub const STEP_WRITE_REPORT: &str = "write report";

/// Runs the whole harness against one [`RunContext`].
pub struct Pipeline<'a> {
    runner: &'a dyn CommandRunner,
    ctx: &'a RunContext,
}

impl<'a> Pipeline<'a> {
    pub fn new(runner: &'a dyn CommandRunner, ctx: &'a RunContext) -> Self {
        Self { runner, ctx }
    }

    fn lab(&self) -> Lab<'a> {
        Lab::new(self.runner, self.ctx)
    }

    /// Execute the run.
    ///
    /// Returns `Err` only for fatal setup failures. Test failures are carried
    /// in the report's outcome. Once the guest has started it is always
    /// stopped and cleaned up, even when a later step fails.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, self.ctx.distro());
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: String) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let lab = self.lab();
        let mut tolerations = Tolerations::new();

        info!(vm = %self.ctx.vm_name, prefix = ?self.ctx.prefix, "starting functional test run");

        tokio::fs::create_dir_all(&self.ctx.export_dir).await?;
        // Suites append to the stdout log; it starts empty on every run.
        tokio::fs::File::create(self.ctx.stdout_log()).await?;
        artifacts::build_artifacts(self.runner, self.ctx).await?;
        provision::ensure_binary_alias(&self.ctx.config.binary_alias, &mut tolerations);
        provision::ensure_clean_environment(&lab, &mut tolerations).await?;
        provision::register_local_repo(&lab).await?;
        lifecycle::start(&lab).await?;

        let guest_phase = self.guest_phase(&lab, &mut tolerations).await;

        lifecycle::teardown(&lab, &mut tolerations).await;
        collector::collect_prefix_logs(self.ctx, &mut tolerations).await;

        let mut report = RunReport {
            run_id,
            distro: self.ctx.distro().to_string(),
            vm_name: self.ctx.vm_name.clone(),
            config: self.ctx.config.clone(),
            started_at,
            finished_at: Utc::now(),
            results: Vec::new(),
            tolerated: tolerations.errors().to_vec(),
            outcome: RunOutcome::new(),
            aborted: None,
        };
        let aborted = match guest_phase {
            Ok((results, outcome)) => {
                report.results = results;
                report.outcome = outcome;
                None
            }
            Err(e) => {
                error!(error = %e, "run aborted after guest start");
                report.aborted = Some(e.to_string());
                Some(e)
            }
        };

        // A partial summary still records what teardown tolerated.
        if let Err(e) = report.write_to(&self.ctx.report_file()).await {
            warn!(step = STEP_WRITE_REPORT, error = %e, "run summary not written");
        }
        if let Some(e) = aborted {
            return Err(e);
        }

        obs::emit_run_finished(
            &report.run_id,
            report.exit_code(),
            clock.elapsed().as_millis() as u64,
            report.tolerated.len(),
        );
        Ok(report)
    }

    /// Everything that needs the guest running.
    async fn guest_phase(
        &self,
        lab: &Lab<'_>,
        tolerations: &mut Tolerations,
    ) -> Result<(Vec<TestResult>, RunOutcome)> {
        lifecycle::inject_package_config(lab).await?;
        lifecycle::deploy(lab).await?;

        let serve = ServeGuard::acquire(lab).await?;
        let (results, outcome) = executor::run_all(lab).await;
        tolerations.tolerate(STEP_RELEASE_SERVE, serve.release().await);

        collector::collect_from_guest(lab, &results, tolerations).await;
        Ok((results, outcome))
    }

    /// Best-effort teardown after the run future was abandoned (e.g. on a signal).
    pub async fn teardown_after_interrupt(&self) -> Tolerations {
        let lab = self.lab();
        let mut tolerations = Tolerations::new();
        warn!(vm = %self.ctx.vm_name, "run interrupted, tearing down");
        lifecycle::teardown(&lab, &mut tolerations).await;
        collector::collect_prefix_logs(self.ctx, &mut tolerations).await;
        tolerations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::fakes::RecordingRunner;
    use tempfile::tempdir;

    fn ctx(workdir: &std::path::Path) -> RunContext {
        let config = HarnessConfig {
            host_package_config: workdir.join("yum.conf"),
            binary_alias: crate::config::BinaryAlias {
                alias: workdir.join("qemu-kvm"),
                target: workdir.join("libexec-qemu-kvm"),
            },
            ..HarnessConfig::default()
        };
        RunContext::new(config, workdir).expect("context")
    }

    #[tokio::test]
    async fn test_successful_run_outcome_zero() {
        let dir = tempdir().expect("tempdir");
        let ctx = ctx(dir.path());
        let runner = RecordingRunner::new();

        let report = Pipeline::new(&runner, &ctx).run().await.expect("run");

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.results.len(), 2);
        assert_eq!(runner.terminations(), 1);
        assert_eq!(runner.kills(), 0);
        assert!(ctx.report_file().exists());
    }

    #[tokio::test]
    async fn test_init_failure_is_fatal_without_teardown() {
        let dir = tempdir().expect("tempdir");
        let ctx = ctx(dir.path());
        let runner = RecordingRunner::new().with_exit("lago init", 1);

        let result = Pipeline::new(&runner, &ctx).run().await;

        assert!(result.is_err());
        assert_eq!(runner.count("lago start"), 0);
        assert_eq!(runner.count("lago stop"), 0);
    }

    #[tokio::test]
    async fn test_deploy_failure_still_tears_down() {
        let dir = tempdir().expect("tempdir");
        let ctx = ctx(dir.path());
        let runner = RecordingRunner::new().with_exit("ovirt deploy", 3);

        let result = Pipeline::new(&runner, &ctx).run().await;

        assert!(result.is_err());
        assert_eq!(runner.count("ovirt serve"), 0);
        assert_eq!(runner.count("lago stop"), 1);
        assert_eq!(runner.count("lago cleanup"), 1);
    }

    #[tokio::test]
    async fn test_abort_after_start_writes_partial_summary() {
        let dir = tempdir().expect("tempdir");
        let ctx = ctx(dir.path());
        let runner = RecordingRunner::new()
            .with_exit("ovirt deploy", 3)
            .with_exit("lago stop", 1);

        let result = Pipeline::new(&runner, &ctx).run().await;
        assert!(result.is_err());

        let summary = RunReport::read_from(&ctx.report_file())
            .await
            .expect("partial summary");
        assert!(summary.aborted.as_deref().is_some_and(|m| m.contains("deploy")));
        assert!(summary.results.is_empty());
        assert!(summary.tolerated.iter().any(|t| t.step == lifecycle::STEP_STOP));
    }
}
