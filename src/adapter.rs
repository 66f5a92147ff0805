//! Agent adapter: the narrow contract the orchestrator uses to invoke the
//! author and reviewer models, plus a process-backed reference
//! implementation that shells out to a CLI binary in headless/print mode,
//! mirroring the teacher's `ClaudeCodeHarness`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::protocol::{assert_author_status, assert_reviewer_verdict, AuthorStatus, CommitRequirement, ReviewerVerdict};

/// Whether the adapter should suppress its own stdout mirroring. A thunk
/// variant lets the caller re-evaluate UI state (e.g. a TUI toggling
/// verbosity) at each call rather than freezing the decision up front.
pub enum QuietMode {
    Always,
    Never,
    Dynamic(std::sync::Arc<dyn Fn() -> bool + Send + Sync>),
}

impl QuietMode {
    pub fn resolve(&self) -> bool {
        match self {
            QuietMode::Always => true,
            QuietMode::Never => false,
            QuietMode::Dynamic(f) => f(),
        }
    }
}

impl Clone for QuietMode {
    fn clone(&self) -> Self {
        match self {
            QuietMode::Always => QuietMode::Always,
            QuietMode::Never => QuietMode::Never,
            QuietMode::Dynamic(f) => QuietMode::Dynamic(f.clone()),
        }
    }
}

impl std::fmt::Debug for QuietMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuietMode::Always => write!(f, "QuietMode::Always"),
            QuietMode::Never => write!(f, "QuietMode::Never"),
            QuietMode::Dynamic(_) => write!(f, "QuietMode::Dynamic(..)"),
        }
    }
}

/// Best-effort, fire-and-forget notification of a newly created session id.
/// Spawned as a detached task; failure or hang must never block the call.
pub type SessionCreatedHook = std::sync::Arc<dyn Fn(String) + Send + Sync>;

pub struct InvokeOptions {
    pub prompt: String,
    pub model: String,
    pub timeout: Duration,
    pub workdir: Option<PathBuf>,
    pub log_path: PathBuf,
    pub quiet: QuietMode,
    pub show_reasoning: bool,
    pub cancel: CancellationToken,
    pub session_title: String,
    pub session_id: Option<String>,
    pub on_session_created: Option<SessionCreatedHook>,
}

#[derive(Debug, Clone)]
pub struct InvokeStatus {
    pub status: AuthorStatus,
    pub duration: Duration,
    pub session_id: Option<String>,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct InvokeVerdict {
    pub verdict: ReviewerVerdict,
    pub duration: Duration,
    pub session_id: Option<String>,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invocation cancelled")]
    Cancelled,
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to create session: {0}")]
    SessionCreation(String),
    #[error("remote invocation error: {0}")]
    Remote(String),
    #[error("structured output could not be parsed: {0}")]
    StructuredOutput(String),
    #[error("protocol invariant violated: {0}")]
    Invariant(String),
}

/// The seam the orchestrator invokes. `invoke_for_status` drives the author;
/// `invoke_for_verdict` drives the reviewer. Both validate their result
/// against the protocol invariants before returning.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn invoke_for_status(&self, opts: InvokeOptions) -> Result<InvokeStatus, AdapterError>;
    async fn invoke_for_verdict(&self, opts: InvokeOptions) -> Result<InvokeVerdict, AdapterError>;
}

/// Reference implementation: shells out to a configured CLI binary in
/// headless/print mode, streaming newline-delimited JSON events to
/// `log_path` as they arrive, and parses the final structured-output line.
pub struct ProcessAgentAdapter {
    binary: String,
}

impl ProcessAgentAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn build_args(&self, opts: &InvokeOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            opts.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            opts.model.clone(),
        ];
        if let Some(session_id) = &opts.session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        if opts.show_reasoning {
            args.push("--verbose".to_string());
        }
        args
    }

    async fn run(&self, opts: &InvokeOptions) -> Result<(String, Option<String>, Option<i64>, Option<i64>, Option<f64>), AdapterError> {
        if let Some(parent) = opts.log_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut log_file = tokio::fs::File::create(&opts.log_path)
            .await
            .map_err(|e| AdapterError::Remote(format!("failed to open log file: {e}")))?;

        let args = self.build_args(opts);
        debug!(binary = %self.binary, ?args, "invoking agent");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(workdir) = &opts.workdir {
            cmd.current_dir(workdir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AdapterError::Remote(format!("failed to spawn {}: {e}", self.binary)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Remote("failed to capture stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut final_line: Option<String> = None;
        let mut session_id = opts.session_id.clone();
        let mut tokens_in = None;
        let mut tokens_out = None;
        let mut cost_usd = None;
        let quiet = opts.quiet.resolve();

        let read_loop = async {
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = log_file.write_all(line.as_bytes()).await;
                let _ = log_file.write_all(b"\n").await;
                if !quiet {
                    println!("{line}");
                }

                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&line) {
                    if let Some(sid) = json.get("session_id").and_then(|v| v.as_str()) {
                        if session_id.as_deref() != Some(sid) {
                            session_id = Some(sid.to_string());
                            if let Some(hook) = &opts.on_session_created {
                                let hook = hook.clone();
                                let sid = sid.to_string();
                                tokio::spawn(async move { hook(sid) });
                            }
                        }
                    }
                    if let Some(v) = json.get("tokens_in").and_then(|v| v.as_i64()) {
                        tokens_in = Some(v);
                    }
                    if let Some(v) = json.get("tokens_out").and_then(|v| v.as_i64()) {
                        tokens_out = Some(v);
                    }
                    if let Some(v) = json.get("cost_usd").and_then(|v| v.as_f64()) {
                        cost_usd = Some(v);
                    }
                    if json.get("type").and_then(|t| t.as_str()) == Some("result") {
                        final_line = Some(line);
                    }
                }
            }
            child.wait().await
        };

        let status = match opts.cancel.race(read_loop).await {
            None => return Err(AdapterError::Cancelled),
            Some(Ok(status)) => status,
            Some(Err(e)) => return Err(AdapterError::Remote(format!("agent process error: {e}"))),
        };

        if !status.success() {
            warn!(?status, "agent process exited non-zero");
        }

        let final_line = final_line.ok_or_else(|| {
            AdapterError::StructuredOutput("no structured result line in agent output".to_string())
        })?;

        Ok((final_line, session_id, tokens_in, tokens_out, cost_usd))
    }
}

#[async_trait]
impl AgentAdapter for ProcessAgentAdapter {
    async fn invoke_for_status(&self, opts: InvokeOptions) -> Result<InvokeStatus, AdapterError> {
        let start = Instant::now();
        let timeout = opts.timeout;
        let fut = self.run(&opts);
        let (line, session_id, tokens_in, tokens_out, cost_usd) =
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result?,
                Err(_) => return Err(AdapterError::Timeout(timeout)),
            };

        let json = serde_json::from_str::<serde_json::Value>(&line)
            .map_err(|e| AdapterError::StructuredOutput(e.to_string()))?;
        let payload = json.get("structured_output").unwrap_or(&json);
        let status: AuthorStatus = serde_json::from_value(payload.clone())
            .map_err(|e| AdapterError::StructuredOutput(e.to_string()))?;

        assert_author_status(&status, CommitRequirement::NotRequired)
            .map_err(|e| AdapterError::Invariant(e.to_string()))?;

        Ok(InvokeStatus {
            status,
            duration: start.elapsed(),
            session_id,
            tokens_in,
            tokens_out,
            cost_usd,
        })
    }

    async fn invoke_for_verdict(&self, opts: InvokeOptions) -> Result<InvokeVerdict, AdapterError> {
        let start = Instant::now();
        let timeout = opts.timeout;
        let fut = self.run(&opts);
        let (line, session_id, tokens_in, tokens_out, cost_usd) =
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result?,
                Err(_) => return Err(AdapterError::Timeout(timeout)),
            };

        let json = serde_json::from_str::<serde_json::Value>(&line)
            .map_err(|e| AdapterError::StructuredOutput(e.to_string()))?;
        let payload = json.get("structured_output").unwrap_or(&json);
        let verdict: ReviewerVerdict = serde_json::from_value(payload.clone())
            .map_err(|e| AdapterError::StructuredOutput(e.to_string()))?;

        assert_reviewer_verdict(&verdict).map_err(|e| AdapterError::Invariant(e.to_string()))?;

        Ok(InvokeVerdict {
            verdict,
            duration: start.elapsed(),
            session_id,
            tokens_in,
            tokens_out,
            cost_usd,
        })
    }
}

/// One scripted response, consumed in order by `ScriptedAgentAdapter`.
pub enum ScriptedResponse {
    Status(AuthorStatus),
    Verdict(ReviewerVerdict),
    Error(AdapterError),
}

/// Test double: returns pre-scripted, pre-validated responses in sequence
/// without shelling out, for exercising the orchestration loops end to end.
pub struct ScriptedAgentAdapter {
    responses: std::sync::Mutex<std::collections::VecDeque<ScriptedResponse>>,
}

impl ScriptedAgentAdapter {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().collect()),
        }
    }

    fn next(&self) -> ScriptedResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedResponse::Error(AdapterError::Remote("scripted adapter exhausted".to_string())))
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAgentAdapter {
    async fn invoke_for_status(&self, _opts: InvokeOptions) -> Result<InvokeStatus, AdapterError> {
        match self.next() {
            ScriptedResponse::Status(status) => {
                assert_author_status(&status, CommitRequirement::NotRequired)
                    .map_err(|e| AdapterError::Invariant(e.to_string()))?;
                Ok(InvokeStatus {
                    status,
                    duration: Duration::from_millis(1),
                    session_id: Some(Uuid::new_v4().to_string()),
                    tokens_in: Some(10),
                    tokens_out: Some(10),
                    cost_usd: Some(0.01),
                })
            }
            ScriptedResponse::Verdict(_) => Err(AdapterError::StructuredOutput("expected author status, scripted a verdict".to_string())),
            ScriptedResponse::Error(e) => Err(e),
        }
    }

    async fn invoke_for_verdict(&self, _opts: InvokeOptions) -> Result<InvokeVerdict, AdapterError> {
        match self.next() {
            ScriptedResponse::Verdict(verdict) => {
                assert_reviewer_verdict(&verdict).map_err(|e| AdapterError::Invariant(e.to_string()))?;
                Ok(InvokeVerdict {
                    verdict,
                    duration: Duration::from_millis(1),
                    session_id: Some(Uuid::new_v4().to_string()),
                    tokens_in: Some(10),
                    tokens_out: Some(10),
                    cost_usd: Some(0.01),
                })
            }
            ScriptedResponse::Status(_) => Err(AdapterError::StructuredOutput("expected verdict, scripted an author status".to_string())),
            ScriptedResponse::Error(e) => Err(e),
        }
    }
}

/// Generates a per-invocation log path under `<project_root>/.phaseloop/logs/<run_id>/`.
pub fn agent_log_path(project_root: &std::path::Path, run_id: &str) -> PathBuf {
    project_root
        .join(".phaseloop")
        .join("logs")
        .join(run_id)
        .join(format!("agent-{}.ndjson", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_mode_resolves_variants() {
        assert!(QuietMode::Always.resolve());
        assert!(!QuietMode::Never.resolve());
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag2 = flag.clone();
        let dynamic = QuietMode::Dynamic(std::sync::Arc::new(move || {
            flag2.load(std::sync::atomic::Ordering::SeqCst)
        }));
        assert!(dynamic.resolve());
        flag.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(!dynamic.resolve());
    }

    #[test]
    fn agent_log_path_is_namespaced_by_run() {
        let path = agent_log_path(std::path::Path::new("/proj"), "run-1");
        assert!(path.starts_with("/proj/.phaseloop/logs/run-1"));
        assert_eq!(path.extension().unwrap(), "ndjson");
    }
}
