//! vmlab-ci - functional test orchestration over a lago VM lab.
//!
//! Drives one run end to end:
//! - builds the artifacts and provisions a fresh lab environment
//! - starts the guest, injects a sanitized package config, deploys, serves
//!   the local repository under a scoped guard
//! - runs the infra and network suites, keeping the first failure
//! - collects results and logs into `exported-artifacts/`, tears down
//!
//! All external commands go through [`CommandRunner`]; [`fakes::RecordingRunner`]
//! replaces it in tests and dry runs.

pub mod artifacts;
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod lab;
pub mod lifecycle;
pub mod obs;
pub mod outcome;
pub mod pipeline;
pub mod process;
pub mod provision;
pub mod report;
pub mod telemetry;
pub mod yum_conf;

pub use config::{BinaryAlias, HarnessConfig};
pub use context::RunContext;
pub use error::{HarnessError, Result, ToleratedError};
pub use executor::{Suite, TestResult};
pub use lab::Lab;
pub use lifecycle::ServeGuard;
pub use outcome::RunOutcome;
pub use pipeline::Pipeline;
pub use process::{BackgroundProcess, CommandRunner, Invocation, ProcessRunner};
pub use report::{RunReport, Tolerations};
pub use telemetry::init_tracing;
pub use yum_conf::PackageConfigSanitizer;
