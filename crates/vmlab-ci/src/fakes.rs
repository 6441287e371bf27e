//! In-memory [`CommandRunner`] that records instead of executing.
//!
//! Used by the test suites and by `--dry-run`. Exit codes, log output and
//! side effects are scripted per command-line substring; the first matching
//! rule wins and unmatched commands succeed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::{HarnessError, Result};
use crate::process::{BackgroundProcess, CommandRunner, Invocation};

/// How a recorded command was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Run,
    Tee,
    Spawn,
}

/// One recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub mode: CallMode,
    pub invocation: Invocation,
    pub log: Option<PathBuf>,
}

impl RecordedCall {
    pub fn command_line(&self) -> String {
        self.invocation.command_line()
    }
}

type Effect = Box<dyn Fn(&Invocation) + Send + Sync>;

enum Behavior {
    Exit(i32),
    SpawnError,
    Hang,
    Output(String),
    Effect(Effect),
}

struct Rule {
    pattern: String,
    behavior: Behavior,
}

/// Recording fake for [`CommandRunner`].
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCall>>,
    rules: Vec<Rule>,
    terminations: Arc<AtomicUsize>,
    kills: Arc<AtomicUsize>,
    next_pid: AtomicU32,
}

impl std::fmt::Debug for RecordingRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRunner")
            .field("calls", &self.calls().len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit with `code`.
    pub fn with_exit(mut self, pattern: &str, code: i32) -> Self {
        self.push(pattern, Behavior::Exit(code));
        self
    }

    /// Commands containing `pattern` fail to spawn.
    pub fn with_spawn_error(mut self, pattern: &str) -> Self {
        self.push(pattern, Behavior::SpawnError);
        self
    }

    /// Commands containing `pattern` never complete.
    pub fn with_hang(mut self, pattern: &str) -> Self {
        self.push(pattern, Behavior::Hang);
        self
    }

    /// Teed commands containing `pattern` write `text` to their log.
    pub fn with_output(mut self, pattern: &str, text: &str) -> Self {
        self.push(pattern, Behavior::Output(text.to_string()));
        self
    }

    /// Commands containing `pattern` run `effect` before succeeding.
    pub fn with_effect<F>(mut self, pattern: &str, effect: F) -> Self
    where
        F: Fn(&Invocation) + Send + Sync + 'static,
    {
        self.push(pattern, Behavior::Effect(Box::new(effect)));
        self
    }

    fn push(&mut self, pattern: &str, behavior: Behavior) {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            behavior,
        });
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines of every recorded call, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::command_line).collect()
    }

    /// Index of the first call whose command line contains `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.command_lines().iter().position(|c| c.contains(pattern))
    }

    /// Number of calls whose command line contains `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Graceful terminations of spawned processes.
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Immediate kills of spawned processes.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn record(&self, mode: CallMode, invocation: &Invocation, log: Option<&Path>) {
        self.calls.lock().unwrap().push(RecordedCall {
            mode,
            invocation: invocation.clone(),
            log: log.map(Path::to_path_buf),
        });
    }

    fn rule_for(&self, invocation: &Invocation) -> Option<&Behavior> {
        let line = invocation.command_line();
        self.rules
            .iter()
            .find(|r| line.contains(&r.pattern))
            .map(|r| &r.behavior)
    }

    async fn resolve(&self, invocation: &Invocation, log: Option<&Path>) -> Result<i32> {
        match self.rule_for(invocation) {
            None => Ok(0),
            Some(Behavior::Exit(code)) => Ok(*code),
            Some(Behavior::SpawnError) => Err(spawn_error(invocation)),
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Output(text)) => {
                if let Some(log) = log {
                    append(log, text).await?;
                }
                Ok(0)
            }
            Some(Behavior::Effect(effect)) => {
                effect(invocation);
                Ok(0)
            }
        }
    }
}

fn spawn_error(invocation: &Invocation) -> HarnessError {
    HarnessError::Spawn {
        program: invocation.program.clone(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
    }
}

async fn append(log: &Path, text: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .await?;
    file.write_all(text.as_bytes()).await?;
    Ok(())
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<i32> {
        self.record(CallMode::Run, invocation, None);
        self.resolve(invocation, None).await
    }

    async fn run_tee(&self, invocation: &Invocation, log: &Path) -> Result<i32> {
        self.record(CallMode::Tee, invocation, Some(log));
        // Real tee creates the log even when the command prints nothing.
        append(log, "").await?;
        self.resolve(invocation, Some(log)).await
    }

    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>> {
        self.record(CallMode::Spawn, invocation, None);
        if let Some(Behavior::SpawnError) = self.rule_for(invocation) {
            return Err(spawn_error(invocation));
        }
        let pid = 10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            pid,
            done: false,
            terminations: self.terminations.clone(),
            kills: self.kills.clone(),
        }))
    }
}

/// Background process handle counting how it was stopped.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    done: bool,
    terminations: Arc<AtomicUsize>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl BackgroundProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        (!self.done).then_some(self.pid)
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<Option<i32>> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.done = true;
        Ok(Some(0))
    }

    fn kill_now(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unmatched_commands_succeed_and_are_recorded() {
        let runner = RecordingRunner::new();
        let code = runner
            .run(&Invocation::new("lago").arg("start"))
            .await
            .expect("run");
        assert_eq!(code, 0);
        assert_eq!(runner.command_lines(), vec!["lago start".to_string()]);
        assert_eq!(runner.calls()[0].mode, CallMode::Run);
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let runner = RecordingRunner::new()
            .with_exit("deploy", 5)
            .with_exit("ovirt", 9);
        let code = runner
            .run(&Invocation::new("lago").args(["ovirt", "deploy"]))
            .await
            .expect("run");
        assert_eq!(code, 5);
    }

    #[tokio::test]
    async fn test_output_written_to_tee_log() {
        let dir = tempdir().expect("tempdir");
        let log = dir.path().join("tee.log");
        let runner = RecordingRunner::new().with_output("shell", "PASSED\n");
        runner
            .run_tee(&Invocation::new("lago").arg("shell"), &log)
            .await
            .expect("run_tee");
        assert_eq!(std::fs::read_to_string(&log).expect("log"), "PASSED\n");
    }

    #[tokio::test]
    async fn test_spawned_process_counts_stops() {
        let runner = RecordingRunner::new();
        let mut first = runner
            .spawn(&Invocation::new("lago").arg("serve"))
            .await
            .expect("spawn");
        let mut second = runner
            .spawn(&Invocation::new("lago").arg("serve"))
            .await
            .expect("spawn");
        assert_ne!(first.id(), second.id());

        first
            .terminate(Duration::from_secs(1))
            .await
            .expect("terminate");
        second.kill_now();

        assert_eq!(runner.terminations(), 1);
        assert_eq!(runner.kills(), 1);
        assert_eq!(first.id(), None);
    }
}
