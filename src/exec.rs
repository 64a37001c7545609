//! Typed command execution with dry-run interception and a transcript.
//!
//! Every external operation is described by an [`Invocation`] built from
//! typed arguments; nothing is ever interpolated through a shell. The
//! [`Executor`] distinguishes three paths:
//! - `run` for destructive operations (no-op reporting success in dry-run),
//! - `run_advisory` for steps where failure is logged but never fatal,
//! - `probe` for read-only queries that execute even in dry-run.
//!
//! Every destructive operation attempted is recorded in the transcript for
//! post-mortem review.

use std::fmt;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};

/// A structured operation descriptor: tool plus argument list.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of an executed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Outcome of one attempted destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(i32),
    /// Dry-run: the command was logged, not executed.
    Skipped,
}

/// One transcript line: the rendered command and what became of it.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub command: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Real,
    DryRun,
    /// Test-only: behaves like dry-run but fails invocations of one program,
    /// so failure paths can be exercised without touching the host.
    #[cfg(test)]
    Mock { fail_on: Option<&'static str> },
}

/// Executes destructive and advisory operations on behalf of a session.
#[derive(Debug)]
pub struct Executor {
    mode: Mode,
    transcript: Vec<TranscriptEntry>,
}

impl Executor {
    pub fn new(dry_run: bool) -> Self {
        Self {
            mode: if dry_run { Mode::DryRun } else { Mode::Real },
            transcript: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn mock(fail_on: Option<&'static str>) -> Self {
        Self {
            mode: Mode::Mock { fail_on },
            transcript: Vec::new(),
        }
    }

    pub fn dry_run(&self) -> bool {
        !matches!(self.mode, Mode::Real)
    }

    /// Ordered record of every destructive operation attempted so far.
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Run a destructive operation. Non-zero exit is an `Execution` error.
    pub fn run(&mut self, inv: Invocation) -> Result<ExecOutput> {
        match self.mode {
            Mode::DryRun => {
                info!(command = %inv, "dry-run: would execute");
                self.record(&inv, Outcome::Skipped);
                return Ok(ExecOutput {
                    code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
            #[cfg(test)]
            Mode::Mock { fail_on } => {
                if fail_on == Some(inv.program()) {
                    self.record(&inv, Outcome::Failed(1));
                    return Err(ProvisionError::Execution {
                        command: inv.to_string(),
                        code: 1,
                        stderr: "mock failure".to_string(),
                    });
                }
                self.record(&inv, Outcome::Skipped);
                return Ok(ExecOutput {
                    code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
            Mode::Real => {}
        }

        debug!(command = %inv, "executing");
        let output = spawn(&inv)?;
        if output.success() {
            self.record(&inv, Outcome::Succeeded);
            Ok(output)
        } else {
            self.record(&inv, Outcome::Failed(output.code));
            Err(ProvisionError::Execution {
                command: inv.to_string(),
                code: output.code,
                stderr: output.stderr_trimmed().to_string(),
            })
        }
    }

    /// Run an advisory operation: failure is logged and swallowed.
    pub fn run_advisory(&mut self, inv: Invocation) {
        if self.dry_run() {
            info!(command = %inv, "dry-run: would execute (advisory)");
            self.record(&inv, Outcome::Skipped);
            return;
        }

        match spawn(&inv) {
            Ok(out) if out.success() => self.record(&inv, Outcome::Succeeded),
            Ok(out) => {
                warn!(
                    command = %inv,
                    code = out.code,
                    stderr = %out.stderr_trimmed(),
                    "advisory command failed, continuing"
                );
                self.record(&inv, Outcome::Failed(out.code));
            }
            Err(e) => {
                warn!(command = %inv, error = %e, "advisory command could not run");
                self.record(&inv, Outcome::Failed(-1));
            }
        }
    }

    fn record(&mut self, inv: &Invocation, outcome: Outcome) {
        self.transcript.push(TranscriptEntry {
            command: inv.to_string(),
            outcome,
        });
    }
}

/// Run a read-only query. Executes even in dry-run, since it never mutates,
/// and is not recorded in the transcript.
pub fn probe(inv: &Invocation) -> Result<ExecOutput> {
    spawn(inv)
}

fn spawn(inv: &Invocation) -> Result<ExecOutput> {
    let output = Command::new(inv.program())
        .args(&inv.args)
        .output()
        .map_err(|e| ProvisionError::Execution {
            command: inv.to_string(),
            code: -1,
            stderr: format!("failed to launch: {}. Is '{}' installed?", e, inv.program()),
        })?;

    Ok(ExecOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_renders_program_and_args() {
        let inv = Invocation::new("sgdisk")
            .arg("--zap-all")
            .arg_path(Path::new("/dev/sda"));
        assert_eq!(inv.to_string(), "sgdisk --zap-all /dev/sda");
    }

    #[test]
    fn run_captures_output() {
        let mut ex = Executor::new(false);
        let out = ex.run(Invocation::new("echo").arg("hello")).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_trimmed(), "hello");
        assert_eq!(ex.transcript().len(), 1);
        assert_eq!(ex.transcript()[0].outcome, Outcome::Succeeded);
    }

    #[test]
    fn run_failure_is_execution_error_with_stderr() {
        let mut ex = Executor::new(false);
        let err = ex
            .run(Invocation::new("ls").arg("/nonexistent_path_12345"))
            .unwrap_err();
        match err {
            ProvisionError::Execution { code, stderr, .. } => {
                assert_ne!(code, 0);
                assert!(!stderr.is_empty());
            }
            other => panic!("expected Execution error, got {:?}", other),
        }
        assert!(matches!(ex.transcript()[0].outcome, Outcome::Failed(_)));
    }

    #[test]
    fn dry_run_executes_nothing_but_records() {
        let mut ex = Executor::new(true);
        let out = ex
            .run(Invocation::new("definitely_not_a_real_tool_xyz").arg("--explode"))
            .unwrap();
        assert!(out.success());
        assert_eq!(ex.transcript().len(), 1);
        assert_eq!(ex.transcript()[0].outcome, Outcome::Skipped);
    }

    #[test]
    fn advisory_failure_does_not_propagate() {
        let mut ex = Executor::new(false);
        ex.run_advisory(Invocation::new("false"));
        assert!(matches!(ex.transcript()[0].outcome, Outcome::Failed(_)));
    }

    #[test]
    fn probe_runs_even_without_executor() {
        let out = probe(&Invocation::new("echo").arg("probe")).unwrap();
        assert_eq!(out.stdout_trimmed(), "probe");
    }

    #[test]
    fn mock_fails_only_the_named_program() {
        let mut ex = Executor::mock(Some("zpool"));
        assert!(ex.run(Invocation::new("sgdisk").arg("--zap-all")).is_ok());
        assert!(ex.run(Invocation::new("zpool").arg("create")).is_err());
    }
}
