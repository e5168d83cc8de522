//! External command execution.
//!
//! Commands are built as structured argument vectors; nothing is routed
//! through a shell, so instance names and paths containing metacharacters
//! cannot change what gets executed. Every invocation carries an explicit
//! deadline, and exceeding it maps to [`AdapterError::Timeout`] rather than
//! an ordinary failure.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AdapterError, Result};

/// One external command invocation: program, argument vector, deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str], timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs,
        }
    }

    /// Display form used in error values and logs.
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for arg in &self.args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// The seam between adapters and the operating system.
///
/// Production code uses [`SystemRunner`]; tests substitute a
/// [`ScriptedRunner`] to assert which commands were (or were not) issued.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real subprocesses via tokio.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display(), timeout_secs = spec.timeout_secs, "Running command");

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(
            Duration::from_secs(spec.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| AdapterError::Timeout {
            command: spec.display(),
            timeout_secs: spec.timeout_secs,
        })?
        .map_err(|e| AdapterError::CommandFailed {
            command: spec.display(),
            code: None,
            stderr: e.to_string(),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Check a finished command and surface non-zero exits as
/// [`AdapterError::CommandFailed`] carrying the command identity and code.
pub fn expect_success(spec: &CommandSpec, output: &CommandOutput) -> Result<()> {
    if output.success() {
        Ok(())
    } else {
        Err(AdapterError::CommandFailed {
            command: spec.display(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Quote a value for interpolation into a PowerShell command string.
///
/// Single-quoted PowerShell strings treat everything literally except the
/// quote itself, which is escaped by doubling.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Replays canned outputs and records every invocation.
///
/// Used throughout the test suites to drive the subprocess-backed adapters
/// without the real tools installed, and to assert that unavailable backends
/// never touch the transport.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<Result<CommandOutput>>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful invocation producing `stdout`.
    pub fn push_ok(&self, stdout: &str) {
        self.push_output(0, stdout, "");
    }

    /// Queue an invocation with an explicit exit code.
    pub fn push_output(&self, code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().push_back(Ok(CommandOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }));
    }

    /// Queue a transport-level error (spawn failure, timeout).
    pub fn push_err(&self, err: AdapterError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    /// Every command issued so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(CommandOutput {
                    code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("VBoxManage", &["list", "vms"], 10);
        assert_eq!(spec.display(), "VBoxManage list vms");
    }

    #[test]
    fn expect_success_preserves_exit_code() {
        let spec = CommandSpec::new("VBoxManage", &["modifyhd", "/d.vdi", "--resize", "40960"], 60);
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "VBOX_E_FILE_ERROR".to_string(),
        };

        match expect_success(&spec, &output) {
            Err(AdapterError::CommandFailed { command, code, stderr }) => {
                assert!(command.contains("modifyhd"));
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "VBOX_E_FILE_ERROR");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn ps_quote_doubles_embedded_quotes() {
        assert_eq!(ps_quote("plain"), "'plain'");
        assert_eq!(ps_quote("it's"), "'it''s'");
    }

    #[tokio::test]
    async fn scripted_runner_records_calls() {
        let runner = ScriptedRunner::new();
        runner.push_ok("out");

        let spec = CommandSpec::new("powershell", &["-NoProfile", "-Command", "Get-VM"], 30);
        let output = runner.run(&spec).await.unwrap();

        assert_eq!(output.stdout, "out");
        assert_eq!(runner.call_count(), 1);
        assert_eq!(runner.calls()[0].program, "powershell");
    }
}
