//! Environment provisioning: stale-prefix removal, `init`, the host binary
//! alias shim and local repository registration.

use std::path::Path;
use tracing::{debug, info};

use crate::config::BinaryAlias;
use crate::error::{HarnessError, Result};
use crate::lab::{require_success, Lab};
use crate::obs;
use crate::report::Tolerations;

pub const STEP_STALE_CLEANUP: &str = "lago cleanup (stale)";
pub const STEP_REMOVE_PREFIX: &str = "remove prefix";
pub const STEP_INIT: &str = "lago init";
pub const STEP_ALIAS: &str = "binary alias";
pub const STEP_REPOSETUP: &str = "reposetup";

/// Sync config handed to `reposetup`; an empty file disables remote sync.
pub const NO_REMOTE_SYNC_CONFIG: &str = "/dev/null";

/// Leave exactly one freshly initialized environment at the prefix.
///
/// A prefix left by an earlier run is cleaned through the tool (failure
/// tolerated, the state may be half-broken) and then removed from disk
/// (failure fatal, stale state must not survive). `init` failing is fatal.
pub async fn ensure_clean_environment(lab: &Lab<'_>, tolerations: &mut Tolerations) -> Result<()> {
    let prefix = &lab.context().prefix;

    if let Ok(meta) = tokio::fs::symlink_metadata(prefix).await {
        info!(prefix = ?prefix, "cleaning old lab environment");
        obs::emit_step_started(STEP_STALE_CLEANUP);
        if meta.is_dir() {
            tolerations.tolerate_exit(STEP_STALE_CLEANUP, lab.cleanup().await);
        }

        obs::emit_step_started(STEP_REMOVE_PREFIX);
        remove_path(prefix, meta.is_dir())
            .await
            .map_err(|source| HarnessError::StaleEnvironment {
                path: prefix.clone(),
                source,
            })?;
    }

    obs::emit_step_started(STEP_INIT);
    let code = lab.init().await?;
    obs::emit_step_finished(STEP_INIT, code);
    require_success(STEP_INIT, code)
}

async fn remove_path(path: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// What [`ensure_binary_alias`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasStatus {
    /// Something already exists at the alias path.
    Present,
    Created,
    /// Neither alias nor target exist; later tool calls will fail on their own.
    TargetMissing,
    Failed,
}

/// Create `alias -> target` when the alias is missing.
pub fn ensure_binary_alias(shim: &BinaryAlias, tolerations: &mut Tolerations) -> AliasStatus {
    if shim.alias.symlink_metadata().is_ok() {
        debug!(alias = ?shim.alias, "binary alias present");
        return AliasStatus::Present;
    }
    if !shim.target.exists() {
        tolerations.push(
            STEP_ALIAS,
            format!(
                "{} is missing and {} does not exist",
                shim.alias.display(),
                shim.target.display()
            ),
        );
        return AliasStatus::TargetMissing;
    }

    match std::os::unix::fs::symlink(&shim.target, &shim.alias) {
        Ok(()) => {
            info!(alias = ?shim.alias, target = ?shim.target, "created binary alias");
            AliasStatus::Created
        }
        Err(e) => {
            tolerations.push(
                STEP_ALIAS,
                format!("cannot link {}: {}", shim.alias.display(), e),
            );
            AliasStatus::Failed
        }
    }
}

/// Point the environment at the exported artifacts instead of remote mirrors.
pub async fn register_local_repo(lab: &Lab<'_>) -> Result<()> {
    let ctx = lab.context();
    obs::emit_step_started(STEP_REPOSETUP);
    let code = lab
        .reposetup(Path::new(NO_REMOTE_SYNC_CONFIG), &ctx.export_dir)
        .await?;
    obs::emit_step_finished(STEP_REPOSETUP, code);
    require_success(STEP_REPOSETUP, code)
}
