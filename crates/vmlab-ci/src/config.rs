//! Harness configuration.
//!
//! Every tunable of a run lives here. `Default` reproduces the fixed values
//! of the vdsm functional-test job; the CLI overrides individual fields from
//! flags and environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarnessError, Result};

/// Host binary alias that must exist before the lab is started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryAlias {
    /// Path the tooling expects.
    pub alias: PathBuf,
    /// Known alternate install location the alias points at.
    pub target: PathBuf,
}

impl Default for BinaryAlias {
    fn default() -> Self {
        Self {
            alias: PathBuf::from("/usr/bin/qemu-kvm"),
            target: PathBuf::from("/usr/libexec/qemu-kvm"),
        }
    }
}

/// Configuration for one harness run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Distro identifier; tags the VM name and every per-run artifact.
    pub distro: String,

    /// Orchestration tool executable.
    pub lago_bin: String,

    /// Product plugin used for `reposetup`, `deploy` and `serve`.
    pub product: String,

    /// Prefix of the guest VM name; the distro is appended.
    pub vm_name_prefix: String,

    /// Environment definition file, relative to the automation directory.
    pub env_definition: String,

    /// Prefix directory name, relative to the automation directory.
    pub prefix_dir: String,

    /// Artifact build script, relative to the working directory.
    pub build_script: PathBuf,

    /// Skip the artifact build (artifacts already exported).
    pub skip_build: bool,

    /// Host package-manager configuration copied into the guest.
    pub host_package_config: PathBuf,

    /// Guest path the sanitized configuration is written to.
    pub guest_package_config: String,

    /// Package glob removed from exclude lists so the guest pulls it from the served repo.
    pub excluded_package_glob: String,

    /// Host binary alias shim.
    pub binary_alias: BinaryAlias,

    /// Directory holding the guest test runner.
    pub guest_tests_dir: String,

    /// Grace period between SIGTERM and SIGKILL for the serve process.
    #[serde(with = "duration_secs")]
    pub serve_grace: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            distro: "el7".to_string(),
            lago_bin: "lago".to_string(),
            product: "ovirt".to_string(),
            vm_name_prefix: "vdsm_functional_tests_host-".to_string(),
            env_definition: "lago-env.yml".to_string(),
            prefix_dir: "vdsm_functional".to_string(),
            build_script: PathBuf::from("automation/build-artifacts.sh"),
            skip_build: false,
            host_package_config: PathBuf::from("/etc/yum/yum.conf"),
            guest_package_config: "/etc/yum.conf".to_string(),
            excluded_package_glob: "vdsm*".to_string(),
            binary_alias: BinaryAlias::default(),
            guest_tests_dir: "/usr/share/vdsm/tests".to_string(),
            serve_grace: Duration::from_secs(10),
        }
    }
}

impl HarnessConfig {
    /// Reject values that would produce malformed paths or commands.
    pub fn validate(&self) -> Result<()> {
        if self.distro.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("distro must not be empty".into()));
        }
        if self.distro.contains(['/', ' ']) {
            return Err(HarnessError::InvalidConfig(format!(
                "distro `{}` must not contain '/' or spaces",
                self.distro
            )));
        }
        if self.lago_bin.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("lago binary must not be empty".into()));
        }
        if self.product.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("product must not be empty".into()));
        }
        if self.excluded_package_glob.trim().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "excluded package glob must not be empty".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
