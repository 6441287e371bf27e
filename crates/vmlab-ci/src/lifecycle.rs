//! Guest VM lifecycle: start, configuration injection, deploy, the serve
//! sidecar and teardown.

use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lab::{require_success, Lab};
use crate::obs;
use crate::process::BackgroundProcess;
use crate::report::Tolerations;
use crate::yum_conf::PackageConfigSanitizer;

pub const STEP_START: &str = "lago start";
pub const STEP_INJECT_CONFIG: &str = "copy package config";
pub const STEP_DEPLOY: &str = "deploy";
pub const STEP_SERVE: &str = "serve";
pub const STEP_STOP: &str = "lago stop";
pub const STEP_CLEANUP: &str = "lago cleanup";

pub async fn start(lab: &Lab<'_>) -> Result<()> {
    obs::emit_step_started(STEP_START);
    let code = lab.start().await?;
    obs::emit_step_finished(STEP_START, code);
    require_success(STEP_START, code)
}

pub async fn deploy(lab: &Lab<'_>) -> Result<()> {
    obs::emit_step_started(STEP_DEPLOY);
    let code = lab.deploy().await?;
    obs::emit_step_finished(STEP_DEPLOY, code);
    require_success(STEP_DEPLOY, code)
}

/// Copy the sanitized host package-manager config into the guest.
///
/// A missing host config is treated as empty.
pub async fn inject_package_config(lab: &Lab<'_>) -> Result<()> {
    let config = &lab.context().config;
    obs::emit_step_started(STEP_INJECT_CONFIG);

    let source = match tokio::fs::read_to_string(&config.host_package_config).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = ?config.host_package_config, "host package config missing, using empty");
            String::new()
        }
        Err(e) => return Err(e.into()),
    };

    let sanitizer = PackageConfigSanitizer::new(&config.excluded_package_glob)?;
    let sanitized = sanitizer.sanitize(&source);

    let mut staged = tempfile::NamedTempFile::new()?;
    staged.write_all(sanitized.as_bytes())?;
    staged.flush()?;

    let code = lab
        .copy_to_vm(staged.path(), &config.guest_package_config)
        .await?;
    obs::emit_step_finished(STEP_INJECT_CONFIG, code);
    require_success(STEP_INJECT_CONFIG, code)
}

/// Owns the repository-serving process for the duration of the test phase.
///
/// The process is stopped exactly once: by [`ServeGuard::release`] on the
/// normal path, or by `Drop` when the owning future errors, panics or is
/// cancelled.
pub struct ServeGuard {
    process: Option<Box<dyn BackgroundProcess>>,
    grace: Duration,
}

impl ServeGuard {
    pub async fn acquire(lab: &Lab<'_>) -> Result<Self> {
        obs::emit_step_started(STEP_SERVE);
        let process = lab.serve().await?;
        info!(pid = ?process.id(), "repository server started");
        Ok(Self {
            process: Some(process),
            grace: lab.context().config.serve_grace,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    /// Stop the server gracefully. Returns its exit code, if it had one.
    pub async fn release(mut self) -> Result<Option<i32>> {
        let Some(mut process) = self.process.take() else {
            return Ok(None);
        };
        let pid = process.id();
        let code = process.terminate(self.grace).await?;
        info!(pid = ?pid, exit_code = ?code, "repository server stopped");
        Ok(code)
    }
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            warn!(pid = ?process.id(), "repository server not released, killing");
            process.kill_now();
        }
    }
}

/// Stop the guest and tear the environment down. Never fails.
pub async fn teardown(lab: &Lab<'_>, tolerations: &mut Tolerations) {
    obs::emit_step_started(STEP_STOP);
    tolerations.tolerate_exit(STEP_STOP, lab.stop().await);
    obs::emit_step_started(STEP_CLEANUP);
    tolerations.tolerate_exit(STEP_CLEANUP, lab.cleanup().await);
}
