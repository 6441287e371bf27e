//! Typed front for the lago command-line surface.
//!
//! Each method maps one subcommand to an [`Invocation`] and returns the raw
//! exit code; callers decide whether a non-zero code is fatal or tolerated.

use std::path::Path;

use crate::context::RunContext;
use crate::error::{HarnessError, Result};
use crate::process::{BackgroundProcess, CommandRunner, Invocation};

/// Lago subcommands bound to one run.
pub struct Lab<'a> {
    runner: &'a dyn CommandRunner,
    ctx: &'a RunContext,
}

impl<'a> Lab<'a> {
    pub fn new(runner: &'a dyn CommandRunner, ctx: &'a RunContext) -> Self {
        Self { runner, ctx }
    }

    pub fn context(&self) -> &'a RunContext {
        self.ctx
    }

    /// Bare tool invocation, not bound to any directory.
    fn tool(&self) -> Invocation {
        Invocation::new(&self.ctx.config.lago_bin)
    }

    /// Tool invocation run inside the environment prefix.
    fn in_prefix(&self) -> Invocation {
        self.tool().current_dir(&self.ctx.prefix)
    }

    fn product(&self) -> Invocation {
        self.in_prefix().arg(&self.ctx.config.product)
    }

    pub fn init_invocation(&self) -> Invocation {
        self.tool()
            .arg("init")
            .arg(path_arg(&self.ctx.prefix))
            .arg(path_arg(&self.ctx.env_definition()))
    }

    pub async fn init(&self) -> Result<i32> {
        self.runner.run(&self.init_invocation()).await
    }

    pub async fn cleanup(&self) -> Result<i32> {
        self.runner.run(&self.in_prefix().arg("cleanup")).await
    }

    pub async fn start(&self) -> Result<i32> {
        self.runner
            .run(&self.in_prefix().args(["start", self.ctx.vm_name.as_str()]))
            .await
    }

    pub async fn stop(&self) -> Result<i32> {
        self.runner
            .run(&self.in_prefix().args(["stop", self.ctx.vm_name.as_str()]))
            .await
    }

    pub fn shell_invocation(&self, script: &str) -> Invocation {
        self.in_prefix()
            .args(["shell", self.ctx.vm_name.as_str(), "-c"])
            .arg(script)
    }

    pub async fn shell(&self, script: &str) -> Result<i32> {
        self.runner.run(&self.shell_invocation(script)).await
    }

    /// Run `script` in the guest, teeing its output into `log`.
    pub async fn shell_tee(&self, script: &str, log: &Path) -> Result<i32> {
        self.runner.run_tee(&self.shell_invocation(script), log).await
    }

    pub async fn copy_to_vm(&self, host: &Path, guest: &str) -> Result<i32> {
        self.runner
            .run(
                &self
                    .in_prefix()
                    .args(["copy-to-vm", self.ctx.vm_name.as_str()])
                    .arg(path_arg(host))
                    .arg(guest),
            )
            .await
    }

    pub async fn copy_from_vm(&self, guest: &str, host: &Path) -> Result<i32> {
        self.runner
            .run(
                &self
                    .in_prefix()
                    .args(["copy-from-vm", self.ctx.vm_name.as_str(), guest])
                    .arg(path_arg(host)),
            )
            .await
    }

    pub async fn collect(&self, output: &Path) -> Result<i32> {
        self.runner
            .run(&self.in_prefix().args(["collect", "--output"]).arg(path_arg(output)))
            .await
    }

    /// `<product> reposetup` sourcing packages from `source_dir` only.
    pub async fn reposetup(&self, sync_config: &Path, source_dir: &Path) -> Result<i32> {
        self.runner
            .run(
                &self
                    .product()
                    .args(["reposetup", "--reposync-yum-config"])
                    .arg(path_arg(sync_config))
                    .arg("--custom-source")
                    .arg(format!("dir:{}", source_dir.display())),
            )
            .await
    }

    pub async fn deploy(&self) -> Result<i32> {
        self.runner.run(&self.product().arg("deploy")).await
    }

    pub async fn serve(&self) -> Result<Box<dyn BackgroundProcess>> {
        self.runner.spawn(&self.product().arg("serve")).await
    }
}

/// Turn a non-zero exit of a fatal step into an error.
pub fn require_success(step: &str, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(HarnessError::step_failed(step, code))
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::fakes::{CallMode, RecordingRunner};
    use std::path::PathBuf;

    fn ctx() -> RunContext {
        RunContext::new(HarnessConfig::default(), "/work").expect("context")
    }

    #[test]
    fn test_init_invocation_uses_prefix_and_definition() {
        let runner = RecordingRunner::new();
        let ctx = ctx();
        let lab = Lab::new(&runner, &ctx);
        let inv = lab.init_invocation();
        assert_eq!(
            inv.args,
            vec![
                "init".to_string(),
                "/work/automation/vdsm_functional".to_string(),
                "/work/automation/lago-env.yml".to_string(),
            ]
        );
        assert_eq!(inv.cwd, None);
    }

    #[tokio::test]
    async fn test_prefix_commands_run_inside_prefix() {
        let runner = RecordingRunner::new();
        let ctx = ctx();
        let lab = Lab::new(&runner, &ctx);
        lab.start().await.expect("start");
        lab.deploy().await.expect("deploy");

        let calls = runner.calls();
        assert_eq!(
            calls[0].invocation.cwd,
            Some(PathBuf::from("/work/automation/vdsm_functional"))
        );
        assert_eq!(
            calls[0].command_line(),
            "lago start vdsm_functional_tests_host-el7"
        );
        assert_eq!(calls[1].command_line(), "lago ovirt deploy");
    }

    #[tokio::test]
    async fn test_reposetup_arguments() {
        let runner = RecordingRunner::new();
        let ctx = ctx();
        let lab = Lab::new(&runner, &ctx);
        lab.reposetup(Path::new("/dev/null"), &ctx.export_dir)
            .await
            .expect("reposetup");
        assert_eq!(
            runner.command_lines()[0],
            "lago ovirt reposetup --reposync-yum-config /dev/null \
             --custom-source dir:/work/exported-artifacts"
        );
    }

    #[tokio::test]
    async fn test_serve_is_spawned() {
        let runner = RecordingRunner::new();
        let ctx = ctx();
        let lab = Lab::new(&runner, &ctx);
        let mut process = lab.serve().await.expect("serve");
        process.kill_now();
        assert_eq!(runner.calls()[0].mode, CallMode::Spawn);
        assert_eq!(runner.command_lines()[0], "lago ovirt serve");
    }

    #[tokio::test]
    async fn test_shell_passes_script_as_single_argument() {
        let runner = RecordingRunner::new();
        let ctx = ctx();
        let lab = Lab::new(&runner, &ctx);
        lab.shell("uname -a").await.expect("shell");
        let inv = &runner.calls()[0].invocation;
        assert_eq!(inv.args.last().map(String::as_str), Some("uname -a"));
    }

    #[test]
    fn test_require_success() {
        assert!(require_success("start", 0).is_ok());
        let err = require_success("start", 1).expect_err("non-zero");
        assert!(matches!(err, HarnessError::StepFailed { code: 1, .. }));
    }
}
