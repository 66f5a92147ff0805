//! Gates: the human-in-the-loop seam. The same `PhaseExecutionLoop` and
//! `PlanReviewLoop` drive either a fully automated `HeadlessGates` (CI,
//! `--auto`) or an interactive `CliGate` (terminal prompts), modeled on the
//! teacher's `CliGate::prompt`.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cancel::CancellationToken;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct PhaseSummary {
    pub phase: String,
    pub title: String,
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseGateDecision {
    Continue,
    Review,
    Abort,
}

#[derive(Debug, Clone)]
pub struct EscalationEvent {
    pub phase: String,
    pub reason: String,
    pub log_path: Option<String>,
    /// Populated only for author-originated escalations; lets a `ContinueSession`
    /// decision thread the session id back to the next author call.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationAction {
    Continue,
    ContinueSession,
    Approve,
    Abort,
}

#[derive(Debug, Clone)]
pub struct EscalationDecision {
    pub action: EscalationAction,
    pub guidance: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Resume,
    StartFresh,
    Abort,
}

#[derive(Debug, Clone)]
pub struct HumanPrompt {
    pub title: String,
    pub body: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDecision {
    pub chosen: String,
    pub guidance: Option<String>,
}

/// The four decision points the loops consult. Every entry point must
/// respect the supplied `CancellationToken`: a blocked prompt resolves to
/// the conservative outcome (`Abort`) rather than hanging forever.
#[async_trait]
pub trait Gates: Send + Sync {
    async fn phase_gate(&self, summary: &PhaseSummary, cancel: &CancellationToken) -> Result<PhaseGateDecision>;
    async fn escalation_gate(&self, event: &EscalationEvent, cancel: &CancellationToken) -> Result<EscalationDecision>;
    async fn resume_gate(&self, run_id: &str, phase: &str, state: &str, cancel: &CancellationToken) -> Result<ResumeDecision>;
    async fn human_gate(&self, prompt: &HumanPrompt, cancel: &CancellationToken) -> Result<HumanDecision>;
}

/// Deterministic `auto` mode policy: abort on escalation, continue past the
/// phase gate, and resume any active run without asking.
pub struct HeadlessGates;

#[async_trait]
impl Gates for HeadlessGates {
    async fn phase_gate(&self, _summary: &PhaseSummary, cancel: &CancellationToken) -> Result<PhaseGateDecision> {
        if cancel.is_cancelled() {
            return Ok(PhaseGateDecision::Abort);
        }
        Ok(PhaseGateDecision::Continue)
    }

    /// Best-judgment automatic continuation: retries the escalation's
    /// retry-state rather than aborting outright. `PhaseExecutionLoop`'s own
    /// auto-retry ceiling (`max_auto_retries`) is what eventually aborts a
    /// phase stuck in a persistent escalation loop, so the gate itself
    /// never needs to refuse.
    async fn escalation_gate(&self, event: &EscalationEvent, cancel: &CancellationToken) -> Result<EscalationDecision> {
        if cancel.is_cancelled() {
            return Ok(EscalationDecision {
                action: EscalationAction::Abort,
                guidance: None,
            });
        }
        Ok(EscalationDecision {
            action: EscalationAction::Continue,
            guidance: Some(format!("auto mode: retrying after escalation ({})", event.reason)),
        })
    }

    async fn resume_gate(&self, _run_id: &str, _phase: &str, _state: &str, cancel: &CancellationToken) -> Result<ResumeDecision> {
        if cancel.is_cancelled() {
            return Ok(ResumeDecision::Abort);
        }
        Ok(ResumeDecision::Resume)
    }

    async fn human_gate(&self, prompt: &HumanPrompt, cancel: &CancellationToken) -> Result<HumanDecision> {
        if cancel.is_cancelled() {
            return Ok(HumanDecision {
                chosen: "abort".to_string(),
                guidance: None,
            });
        }
        let chosen = prompt.options.first().cloned().unwrap_or_else(|| "abort".to_string());
        Ok(HumanDecision { chosen, guidance: None })
    }
}

/// Interactive terminal prompt, modeled on the teacher's `CliGate::prompt`:
/// reads one line of stdin, racing the cancellation token so Ctrl-C during
/// a wait resolves promptly rather than blocking the process.
pub struct CliGate;

impl CliGate {
    async fn prompt(&self, title: &str, body: &str, options: &[&str], cancel: &CancellationToken) -> Result<String> {
        println!("{title}");
        if !body.is_empty() {
            println!("{body}");
        }
        println!("[{}]", options.join("/"));

        let read = async {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            lines.next_line().await
        };

        match cancel.race(read).await {
            None => Ok("abort".to_string()),
            Some(Ok(Some(line))) => {
                let trimmed = line.trim().to_lowercase();
                if options.iter().any(|o| o.eq_ignore_ascii_case(&trimmed)) {
                    Ok(trimmed)
                } else {
                    Ok(options.first().map(|s| s.to_string()).unwrap_or_else(|| "abort".to_string()))
                }
            }
            Some(Ok(None)) => Ok("abort".to_string()),
            Some(Err(e)) => Err(Error::Io(e)),
        }
    }
}

#[async_trait]
impl Gates for CliGate {
    async fn phase_gate(&self, summary: &PhaseSummary, cancel: &CancellationToken) -> Result<PhaseGateDecision> {
        let body = format!("Phase {} — {} complete.", summary.phase, summary.title);
        let answer = self.prompt("Continue to next phase?", &body, &["continue", "review", "abort"], cancel).await?;
        Ok(match answer.as_str() {
            "review" => PhaseGateDecision::Review,
            "abort" => PhaseGateDecision::Abort,
            _ => PhaseGateDecision::Continue,
        })
    }

    async fn escalation_gate(&self, event: &EscalationEvent, cancel: &CancellationToken) -> Result<EscalationDecision> {
        let answer = self
            .prompt(
                &format!("Phase {} escalated: {}", event.phase, event.reason),
                event.log_path.as_deref().unwrap_or(""),
                &["continue", "continue-session", "approve", "abort"],
                cancel,
            )
            .await?;
        let action = match answer.as_str() {
            "continue-session" => EscalationAction::ContinueSession,
            "approve" => EscalationAction::Approve,
            "abort" => EscalationAction::Abort,
            _ => EscalationAction::Continue,
        };
        Ok(EscalationDecision { action, guidance: None })
    }

    async fn resume_gate(&self, run_id: &str, phase: &str, state: &str, cancel: &CancellationToken) -> Result<ResumeDecision> {
        let body = format!("Run {run_id} is active at phase {phase}, state {state}.");
        let answer = self.prompt("Resume this run?", &body, &["resume", "start-fresh", "abort"], cancel).await?;
        Ok(match answer.as_str() {
            "start-fresh" => ResumeDecision::StartFresh,
            "abort" => ResumeDecision::Abort,
            _ => ResumeDecision::Resume,
        })
    }

    async fn human_gate(&self, prompt: &HumanPrompt, cancel: &CancellationToken) -> Result<HumanDecision> {
        let options: Vec<&str> = prompt.options.iter().map(|s| s.as_str()).collect();
        let chosen = self.prompt(&prompt.title, &prompt.body, &options, cancel).await?;
        Ok(HumanDecision { chosen, guidance: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn headless_gates_continue_and_abort_on_escalation() {
        let gates = HeadlessGates;
        let cancel = CancellationToken::new();
        let summary = PhaseSummary {
            phase: "1".to_string(),
            title: "setup".to_string(),
            commit: None,
        };
        assert_eq!(gates.phase_gate(&summary, &cancel).await.unwrap(), PhaseGateDecision::Continue);

        let event = EscalationEvent {
            phase: "1".to_string(),
            reason: "quality failed".to_string(),
            log_path: None,
            session_id: None,
        };
        let decision = gates.escalation_gate(&event, &cancel).await.unwrap();
        assert_eq!(decision.action, EscalationAction::Continue);
    }

    #[tokio::test]
    async fn headless_gates_resolve_to_abort_when_cancelled() {
        let gates = HeadlessGates;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = PhaseSummary {
            phase: "1".to_string(),
            title: "setup".to_string(),
            commit: None,
        };
        assert_eq!(gates.phase_gate(&summary, &cancel).await.unwrap(), PhaseGateDecision::Abort);
        assert_eq!(
            gates.resume_gate("run-1", "1", "Execute", &cancel).await.unwrap(),
            ResumeDecision::Abort
        );
    }
}
