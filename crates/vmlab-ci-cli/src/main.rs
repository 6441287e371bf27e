//! vmlab-ci - run the vdsm functional test suites inside a lago VM lab.
//!
//! No arguments are required; every flag has an environment fallback so the
//! binary can be dropped into a CI job unchanged.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn, Level};

use vmlab_ci::fakes::RecordingRunner;
use vmlab_ci::{BinaryAlias, HarnessConfig, Pipeline, ProcessRunner, RunContext, RunReport};

/// Exit status after SIGINT/SIGTERM, as a shell reports it.
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(name = "vmlab-ci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Functional test harness over a lago VM lab", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON run summary
    #[arg(long, global = true)]
    json: bool,

    /// Distro identifier tagging the VM and every artifact
    #[arg(long, env = "VMLAB_DISTRO", default_value = "el7")]
    distro: String,

    /// Working directory holding `automation/` (default: current directory)
    #[arg(long, env = "VMLAB_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Lab orchestration tool executable
    #[arg(long = "lago", env = "VMLAB_LAGO_BIN", default_value = "lago")]
    lago_bin: String,

    /// Product plugin providing reposetup, deploy and serve
    #[arg(long, default_value = "ovirt")]
    product: String,

    /// Reuse artifacts already in exported-artifacts/
    #[arg(long)]
    skip_build: bool,

    /// Print the command plan instead of executing anything
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn config(&self) -> HarnessConfig {
        HarnessConfig {
            distro: self.distro.clone(),
            lago_bin: self.lago_bin.clone(),
            product: self.product.clone(),
            skip_build: self.skip_build,
            ..HarnessConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    vmlab_ci::init_tracing(cli.json, level);

    let workdir = match &cli.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve working directory")?,
    };

    if cli.dry_run {
        return cmd_plan(cli.config(), &workdir).await;
    }

    let ctx = RunContext::new(cli.config(), &workdir).context("Invalid harness configuration")?;
    cmd_run(&ctx, cli.json).await
}

async fn cmd_run(ctx: &RunContext, json: bool) -> Result<ExitCode> {
    let runner = ProcessRunner::new();
    let pipeline = Pipeline::new(&runner, ctx);
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    let interrupted_by = tokio::select! {
        result = pipeline.run() => {
            let report = result.context("Functional test run aborted")?;
            print_summary(&report, json)?;
            return Ok(ExitCode::from(report.outcome.process_exit_code()));
        }
        Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };

    // The run future is gone by now, so the serve process has been killed.
    warn!(signal = interrupted_by, "interrupted");
    let tolerations = pipeline.teardown_after_interrupt().await;
    if !tolerations.is_empty() {
        error!(count = tolerations.len(), "teardown after interrupt was incomplete");
    }
    Ok(ExitCode::from(INTERRUPTED_EXIT))
}

/// Walk the whole run against a recording runner in a scratch directory.
async fn cmd_plan(mut config: HarnessConfig, workdir: &Path) -> Result<ExitCode> {
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    config.binary_alias = BinaryAlias {
        alias: scratch.path().join("qemu-kvm"),
        target: config.binary_alias.target.clone(),
    };
    let ctx = RunContext::new(config, scratch.path()).context("Invalid harness configuration")?;
    let runner = RecordingRunner::new();

    info!(workdir = ?workdir, scratch = ?scratch.path(), "dry run");
    Pipeline::new(&runner, &ctx)
        .run()
        .await
        .context("Dry run failed")?;

    println!("Command plan (paths under {:?}):", scratch.path());
    for (i, line) in runner.command_lines().iter().enumerate() {
        println!("{:>3}. {}", i + 1, line);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Run {} ({})", report.run_id, report.distro);
    for result in &report.results {
        let status = if result.passed() { "passed" } else { "FAILED" };
        println!(
            "  {:<8} {} (exit {}, {} ms)",
            result.suite, status, result.exit_code, result.duration_ms
        );
    }
    if !report.tolerated.is_empty() {
        println!("Tolerated errors:");
        for tolerated in &report.tolerated {
            println!("  {}", tolerated);
        }
    }
    println!(
        "Outcome: exit {} in {} ms",
        report.exit_code(),
        report.duration_ms()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_need_no_arguments() {
        let cli = Cli::try_parse_from(["vmlab-ci"]).expect("parse");
        let config = cli.config();
        assert_eq!(config.distro, "el7");
        assert_eq!(config.lago_bin, "lago");
        assert_eq!(config.product, "ovirt");
        assert!(!config.skip_build);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "vmlab-ci",
            "--distro",
            "el8",
            "--lago",
            "/opt/lago/bin/lago",
            "--skip-build",
            "--verbose",
        ])
        .expect("parse");
        let config = cli.config();
        assert_eq!(config.distro, "el8");
        assert_eq!(config.lago_bin, "/opt/lago/bin/lago");
        assert!(config.skip_build);
        assert!(cli.verbose);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_side_effects() {
        let dir = tempfile::tempdir().expect("tempdir");
        cmd_plan(HarnessConfig::default(), dir.path())
            .await
            .expect("plan");
        assert!(!dir.path().join("exported-artifacts").exists());
    }
}
