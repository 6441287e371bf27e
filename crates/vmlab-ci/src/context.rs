//! Run context: the immutable set of names and paths a run works with.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::error::Result;

/// Name of the export directory under the working directory.
pub const EXPORT_DIR: &str = "exported-artifacts";

/// Name of the automation directory under the working directory.
pub const AUTOMATION_DIR: &str = "automation";

/// Subdirectory of the export directory receiving lab logs.
pub const LAB_LOGS_DIR: &str = "lago-logs";

/// Everything derived from the configuration and the working directory.
///
/// Built once at the start of a run and passed by reference to each stage.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub config: HarnessConfig,
    pub workdir: PathBuf,
    pub automation_dir: PathBuf,
    pub export_dir: PathBuf,
    pub prefix: PathBuf,
    pub vm_name: String,
}

impl RunContext {
    /// Derive the context for a run rooted at `workdir`.
    pub fn new(config: HarnessConfig, workdir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;

        let workdir = workdir.into();
        let automation_dir = workdir.join(AUTOMATION_DIR);
        let export_dir = workdir.join(EXPORT_DIR);
        let prefix = automation_dir.join(&config.prefix_dir);
        let vm_name = format!("{}{}", config.vm_name_prefix, config.distro);

        Ok(Self {
            config,
            workdir,
            automation_dir,
            export_dir,
            prefix,
            vm_name,
        })
    }

    pub fn distro(&self) -> &str {
        &self.config.distro
    }

    /// Environment definition passed to `init`.
    pub fn env_definition(&self) -> PathBuf {
        self.automation_dir.join(&self.config.env_definition)
    }

    /// Build script, resolved against the working directory.
    pub fn build_script(&self) -> PathBuf {
        resolve(&self.workdir, &self.config.build_script)
    }

    /// Log file both test suites append their output to.
    pub fn stdout_log(&self) -> PathBuf {
        self.export_dir
            .join(format!("functional_tests_stdout.{}.log", self.distro()))
    }

    /// Guest-side path of the structured result file.
    pub fn guest_result_file(&self) -> String {
        format!("/tmp/nosetests-{}.xml", self.distro())
    }

    /// Host-side destination of the structured result file.
    pub fn host_result_file(&self) -> PathBuf {
        self.export_dir.join(format!("nosetests-{}.xml", self.distro()))
    }

    pub fn lab_logs_dir(&self) -> PathBuf {
        self.export_dir.join(LAB_LOGS_DIR)
    }

    /// Log directory the lab keeps inside the prefix.
    pub fn prefix_logs_dir(&self) -> PathBuf {
        self.prefix.join("current").join("logs")
    }

    /// JSON run summary written at the end of the run.
    pub fn report_file(&self) -> PathBuf {
        self.export_dir
            .join(format!("run-summary.{}.json", self.distro()))
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
