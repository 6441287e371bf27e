//! Result and log collection into the export directory.
//!
//! Guest-dependent copies run while the guest is up; the filesystem-only
//! copy of the prefix logs runs after teardown. Nothing here aborts a run.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::executor::TestResult;
use crate::lab::Lab;
use crate::obs;
use crate::report::Tolerations;

pub const STEP_COPY_RESULTS: &str = "copy-from-vm results";
pub const STEP_COLLECT: &str = "lago collect";
pub const STEP_COPY_LOGS: &str = "copy prefix logs";

/// Copy structured result files out of the guest and collect lab logs.
///
/// Must run before the guest is stopped.
pub async fn collect_from_guest(
    lab: &Lab<'_>,
    results: &[TestResult],
    tolerations: &mut Tolerations,
) {
    let ctx = lab.context();

    for guest_file in results.iter().filter_map(|r| r.result_file.as_deref()) {
        let host_file = host_destination(ctx, guest_file);
        obs::emit_step_started(STEP_COPY_RESULTS);
        let copied = lab.copy_from_vm(guest_file, &host_file).await;
        if tolerations.tolerate_exit(STEP_COPY_RESULTS, copied) {
            info!(file = ?host_file, "collected result file");
        }
    }

    let logs_dir = ctx.lab_logs_dir();
    obs::emit_step_started(STEP_COLLECT);
    tolerations.tolerate(STEP_COLLECT, tokio::fs::create_dir_all(&logs_dir).await);
    tolerations.tolerate_exit(STEP_COLLECT, lab.collect(&logs_dir).await);
}

/// Copy `*.log` files the lab kept under the prefix. Returns how many were copied.
pub async fn collect_prefix_logs(ctx: &RunContext, tolerations: &mut Tolerations) -> usize {
    obs::emit_step_started(STEP_COPY_LOGS);
    let source = ctx.prefix_logs_dir();
    let dest = ctx.lab_logs_dir();

    let logs = match list_logs(&source).await {
        Ok(logs) => logs,
        Err(e) => {
            tolerations.push(STEP_COPY_LOGS, format!("{}: {}", source.display(), e));
            return 0;
        }
    };
    if tolerations
        .tolerate(STEP_COPY_LOGS, tokio::fs::create_dir_all(&dest).await)
        .is_none()
    {
        return 0;
    }

    let mut copied = 0;
    for log in logs {
        let Some(name) = log.file_name() else { continue };
        let target = dest.join(name);
        match tokio::fs::copy(&log, &target).await {
            Ok(_) => {
                debug!(file = ?target, "copied lab log");
                copied += 1;
            }
            Err(e) => tolerations.push(STEP_COPY_LOGS, format!("{}: {}", log.display(), e)),
        }
    }
    obs::emit_step_finished(STEP_COPY_LOGS, 0);
    copied
}

/// Host path for a guest result file: same file name, in the export directory.
fn host_destination(ctx: &RunContext, guest_file: &str) -> PathBuf {
    match Path::new(guest_file).file_name() {
        Some(name) => ctx.export_dir.join(name),
        None => ctx.host_result_file(),
    }
}

async fn list_logs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut logs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "log") && entry.file_type().await?.is_file() {
            logs.push(path);
        }
    }
    logs.sort();
    Ok(logs)
}
