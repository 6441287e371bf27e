//! External command execution.
//!
//! Every call into the lab tool or the build script goes through
//! [`CommandRunner`], so the pipeline can be driven by the tokio-backed
//! [`ProcessRunner`] in production and by a recording fake in tests and
//! dry runs.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// Exit code reported when a process ended without one (killed by a signal).
pub const NO_EXIT_CODE: i32 = -1;

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs and dry-run plans.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, quote(v)))
            .collect();
        parts.push(quote(&self.program));
        parts.extend(self.args.iter().map(|a| quote(a)));
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> HarnessError {
        HarnessError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,*@+%".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with output going straight to the console.
    async fn run(&self, invocation: &Invocation) -> Result<i32>;

    /// Run to completion, streaming output to the console and appending it to `log`.
    ///
    /// The returned code is the child's own exit status.
    async fn run_tee(&self, invocation: &Invocation, log: &Path) -> Result<i32>;

    /// Start a detached process and return a handle to it.
    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>>;
}

/// A process running alongside the pipeline.
#[async_trait]
pub trait BackgroundProcess: Send {
    fn id(&self) -> Option<u32>;

    /// SIGTERM, wait up to `grace`, then SIGKILL. Returns the exit code if any.
    async fn terminate(&mut self, grace: Duration) -> Result<Option<i32>>;

    /// Immediate kill without waiting; used on drop paths.
    fn kill_now(&mut self);
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<i32> {
        debug!(command = %invocation, "running");
        let status = invocation
            .to_command()
            .status()
            .await
            .map_err(|e| invocation.spawn_error(e))?;
        Ok(status.code().unwrap_or(NO_EXIT_CODE))
    }

    async fn run_tee(&self, invocation: &Invocation, log: &Path) -> Result<i32> {
        debug!(command = %invocation, log = ?log, "running with tee");
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .await?;
        let log_file = Arc::new(Mutex::new(log_file));

        let mut child = invocation
            .to_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| invocation.spawn_error(e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out, err, status) = tokio::join!(
            tee_optional(stdout, tokio::io::stdout(), log_file.clone()),
            tee_optional(stderr, tokio::io::stderr(), log_file.clone()),
            child.wait(),
        );

        for (stream, result) in [("stdout", out), ("stderr", err)] {
            if let Err(e) = result {
                warn!(command = %invocation, stream, error = %e, "output capture interrupted");
            }
        }

        Ok(status?.code().unwrap_or(NO_EXIT_CODE))
    }

    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>> {
        debug!(command = %invocation, "spawning background process");
        let child = invocation
            .to_command()
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| invocation.spawn_error(e))?;
        Ok(Box::new(ChildProcess {
            program: invocation.program.clone(),
            child,
        }))
    }
}

async fn tee_optional<R, W>(
    source: Option<R>,
    console: W,
    log: Arc<Mutex<File>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match source {
        Some(source) => tee(source, console, log).await,
        None => Ok(()),
    }
}

/// Copy `source` line by line to `console` and `log`.
///
/// Keeps draining the pipe when a sink fails so the child never blocks on a
/// full pipe.
async fn tee<R, W>(source: R, mut console: W, log: Arc<Mutex<File>>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut line = Vec::new();
    let mut log_ok = true;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }

        if console.write_all(&line).await.is_ok() {
            let _ = console.flush().await;
        }

        if log_ok {
            let mut file = log.lock().await;
            if let Err(e) = file.write_all(&line).await {
                warn!(error = %e, "stopped appending to run log");
                log_ok = false;
            }
        }
    }

    log.lock().await.flush().await
}

struct ChildProcess {
    program: String,
    child: Child,
}

#[async_trait]
impl BackgroundProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self, grace: Duration) -> Result<Option<i32>> {
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(self.child.try_wait()?.and_then(|s| s.code()));
        };

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(program = %self.program, pid, error = %e, "SIGTERM not delivered");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?.code()),
            Err(_) => {
                warn!(
                    program = %self.program,
                    pid,
                    grace_secs = grace.as_secs(),
                    "process ignored SIGTERM, killing"
                );
                self.child.start_kill()?;
                Ok(self.child.wait().await?.code())
            }
        }
    }

    fn kill_now(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(program = %self.program, error = %e, "kill skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_command_line_quotes_spaces() {
        let inv = Invocation::new("lago")
            .args(["shell", "vm", "-c"])
            .arg("cd /tmp && ls")
            .env("LIBGUESTFS_BACKEND", "direct");
        assert_eq!(
            inv.command_line(),
            "LIBGUESTFS_BACKEND=direct lago shell vm -c 'cd /tmp && ls'"
        );
    }

    #[test]
    fn test_command_line_escapes_single_quote() {
        let inv = Invocation::new("sh").arg("it's");
        assert_eq!(inv.command_line(), r"sh 'it'\''s'");
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let runner = ProcessRunner::new();
        let code = runner
            .run(&Invocation::new("sh").args(["-c", "exit 3"]))
            .await
            .expect("run");
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_run_missing_program_is_spawn_error() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(&Invocation::new("/nonexistent/vmlab-ci-tool"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_run_tee_appends_both_streams() {
        let dir = tempdir().expect("tempdir");
        let log = dir.path().join("out.log");
        std::fs::write(&log, "previous\n").expect("seed log");

        let runner = ProcessRunner::new();
        let code = runner
            .run_tee(
                &Invocation::new("sh").args(["-c", "echo out; echo err 1>&2; exit 4"]),
                &log,
            )
            .await
            .expect("run_tee");

        assert_eq!(code, 4);
        let content = std::fs::read_to_string(&log).expect("read log");
        assert!(content.starts_with("previous\n"));
        assert!(content.contains("out\n"));
        assert!(content.contains("err\n"));
    }

    #[tokio::test]
    async fn test_run_tee_respects_cwd() {
        let dir = tempdir().expect("tempdir");
        let log = dir.path().join("cwd.log");
        let runner = ProcessRunner::new();
        let code = runner
            .run_tee(
                &Invocation::new("sh")
                    .args(["-c", "test -f marker"])
                    .current_dir(dir.path()),
                &log,
            )
            .await
            .expect("run_tee");
        assert_ne!(code, 0);

        std::fs::write(dir.path().join("marker"), "").expect("marker");
        let code = runner
            .run_tee(
                &Invocation::new("sh")
                    .args(["-c", "test -f marker"])
                    .current_dir(dir.path()),
                &log,
            )
            .await
            .expect("run_tee");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_spawned_process_terminates_on_sigterm() {
        let runner = ProcessRunner::new();
        let mut process = runner
            .spawn(&Invocation::new("sleep").arg("30"))
            .await
            .expect("spawn");
        assert!(process.id().is_some());

        let code = process
            .terminate(Duration::from_secs(5))
            .await
            .expect("terminate");
        // Killed by a signal, so no exit code.
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn test_terminate_escalates_when_sigterm_ignored() {
        let runner = ProcessRunner::new();
        let mut process = runner
            .spawn(&Invocation::new("sh").args(["-c", "trap '' TERM; sleep 30"]))
            .await
            .expect("spawn");
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let code = process
            .terminate(Duration::from_millis(200))
            .await
            .expect("terminate");
        assert_eq!(code, None);
    }
}
