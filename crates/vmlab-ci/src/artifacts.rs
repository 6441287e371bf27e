//! Artifact build trigger.

use crate::context::RunContext;
use crate::error::Result;
use crate::lab::require_success;
use crate::obs;
use crate::process::{CommandRunner, Invocation};

pub const STEP_BUILD: &str = "build artifacts";

/// Backend the image tooling inside the build script must use.
pub const LIBGUESTFS_BACKEND: (&str, &str) = ("LIBGUESTFS_BACKEND", "direct");

pub fn build_invocation(ctx: &RunContext) -> Invocation {
    Invocation::new(ctx.build_script().display().to_string())
        .current_dir(&ctx.workdir)
        .env(LIBGUESTFS_BACKEND.0, LIBGUESTFS_BACKEND.1)
}

/// Run the build script to completion. Any failure is fatal.
pub async fn build_artifacts(runner: &dyn CommandRunner, ctx: &RunContext) -> Result<()> {
    if ctx.config.skip_build {
        tracing::info!("artifact build skipped");
        return Ok(());
    }
    obs::emit_step_started(STEP_BUILD);
    let code = runner.run(&build_invocation(ctx)).await?;
    obs::emit_step_finished(STEP_BUILD, code);
    require_success(STEP_BUILD, code)
}
