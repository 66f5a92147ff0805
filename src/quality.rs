//! Quality gates: a configured list of shell commands run against the
//! working tree between the author and reviewer steps of a phase.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::cancel::CancellationToken;

/// Output of a single quality command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReport {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub passed: bool,
}

/// Truncation bound for captured command output, to keep stored reports small.
const MAX_CAPTURED_BYTES: usize = 16 * 1024;

fn truncate(s: String) -> String {
    if s.len() <= MAX_CAPTURED_BYTES {
        s
    } else {
        let mut s = s;
        s.truncate(MAX_CAPTURED_BYTES);
        s.push_str("\n...[truncated]");
        s
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub passed: bool,
    pub commands: Vec<CommandReport>,
    pub duration_ms: u64,
}

/// Runs a list of shell commands, sequentially, against a working directory.
/// Every command runs to completion regardless of earlier failures so the
/// report stays complete; `passed` is the conjunction of all exit codes.
#[async_trait]
pub trait QualityRunner: Send + Sync {
    async fn run(
        &self,
        commands: &[String],
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> crate::Result<QualityReport>;
}

/// Default implementation: each command runs as `sh -c <command>`, mirroring
/// the teacher's `run_hook`.
pub struct ShellQualityRunner;

#[async_trait]
impl QualityRunner for ShellQualityRunner {
    async fn run(
        &self,
        commands: &[String],
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> crate::Result<QualityReport> {
        let start = Instant::now();
        let mut reports = Vec::with_capacity(commands.len());
        let mut all_passed = true;

        for command in commands {
            if cancel.is_cancelled() {
                break;
            }

            let fut = Command::new("sh").arg("-c").arg(command).current_dir(workdir).output();
            let output = match cancel.race(fut).await {
                None => break,
                Some(Ok(output)) => output,
                Some(Err(e)) => {
                    reports.push(CommandReport {
                        command: command.clone(),
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("failed to run command: {e}"),
                        passed: false,
                    });
                    all_passed = false;
                    continue;
                }
            };

            let passed = output.status.success();
            all_passed &= passed;
            reports.push(CommandReport {
                command: command.clone(),
                exit_code: output.status.code(),
                stdout: truncate(String::from_utf8_lossy(&output.stdout).into_owned()),
                stderr: truncate(String::from_utf8_lossy(&output.stderr).into_owned()),
                passed,
            });
        }

        Ok(QualityReport {
            passed: all_passed && !cancel.is_cancelled(),
            commands: reports,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Test double: returns pre-scripted reports without touching the shell.
pub struct ScriptedQualityRunner {
    pub reports: std::sync::Mutex<Vec<QualityReport>>,
}

impl ScriptedQualityRunner {
    pub fn new(reports: Vec<QualityReport>) -> Self {
        Self {
            reports: std::sync::Mutex::new(reports),
        }
    }
}

#[async_trait]
impl QualityRunner for ScriptedQualityRunner {
    async fn run(
        &self,
        _commands: &[String],
        _workdir: &Path,
        _cancel: &CancellationToken,
    ) -> crate::Result<QualityReport> {
        let mut reports = self.reports.lock().unwrap();
        if reports.is_empty() {
            return Ok(QualityReport {
                passed: true,
                commands: vec![],
                duration_ms: 0,
            });
        }
        Ok(reports.remove(0))
    }
}

/// A small helper so callers can build a failing report deterministically
/// in tests without going through the shell runner.
pub fn failing_report(command: &str, stderr: &str) -> QualityReport {
    QualityReport {
        passed: false,
        commands: vec![CommandReport {
            command: command.to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
            passed: false,
        }],
        duration_ms: 0,
    }
}

pub fn passing_report() -> QualityReport {
    QualityReport {
        passed: true,
        commands: vec![],
        duration_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_runner_executes_and_reports_pass() {
        let runner = ShellQualityRunner;
        let cancel = CancellationToken::new();
        let report = runner
            .run(&["true".to_string()], Path::new("/tmp"), &cancel)
            .await
            .unwrap();
        assert!(report.passed);
        assert_eq!(report.commands.len(), 1);
    }

    #[tokio::test]
    async fn shell_runner_runs_all_commands_even_after_failure() {
        let runner = ShellQualityRunner;
        let cancel = CancellationToken::new();
        let report = runner
            .run(
                &["false".to_string(), "true".to_string()],
                Path::new("/tmp"),
                &cancel,
            )
            .await
            .unwrap();
        assert!(!report.passed);
        assert_eq!(report.commands.len(), 2);
        assert!(!report.commands[0].passed);
        assert!(report.commands[1].passed);
    }

    #[tokio::test]
    async fn scripted_runner_returns_canned_reports_in_order() {
        let runner = ScriptedQualityRunner::new(vec![failing_report("lint", "boom"), passing_report()]);
        let cancel = CancellationToken::new();
        let first = runner.run(&[], Path::new("/tmp"), &cancel).await.unwrap();
        assert!(!first.passed);
        let second = runner.run(&[], Path::new("/tmp"), &cancel).await.unwrap();
        assert!(second.passed);
    }
}
