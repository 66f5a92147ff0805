//! `PlanReviewLoop`: reviews and auto-fixes the plan document itself before
//! implementation begins. A simplified instance of `phase_loop`'s routing,
//! targeting the special phase tag `"-1"` (the plan as a whole).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::adapter::{agent_log_path, AgentAdapter, InvokeOptions, QuietMode, SessionCreatedHook};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::gates::{EscalationAction, EscalationEvent, Gates, ResumeDecision};
use crate::plan::resolve_phase_review_path;
use crate::protocol::{assert_author_status, CommitRequirement, Readiness};
use crate::resume::next_iteration;
use crate::store::{ResultType, Role, RunCommand, RunStatus, Store};
use crate::{Error, Result};

const PLAN_PHASE_TAG: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReviewState {
    Review,
    AutoFix,
    Escalate,
    Approved,
    Aborted,
}

impl PlanReviewState {
    pub fn label(&self) -> &'static str {
        match self {
            PlanReviewState::Review => "Review",
            PlanReviewState::AutoFix => "AutoFix",
            PlanReviewState::Escalate => "Escalate",
            PlanReviewState::Approved => "Approved",
            PlanReviewState::Aborted => "Aborted",
        }
    }
}

pub struct PlanReviewOptions {
    pub auto: bool,
    pub workdir: PathBuf,
    pub project_root: PathBuf,
    pub quiet: QuietMode,
    pub cancel: CancellationToken,
    pub on_session_created: Option<SessionCreatedHook>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanReviewOutcome {
    Approved,
    Aborted { reason: String },
}

pub struct PlanReviewLoop {
    store: Store,
    adapter: Arc<dyn AgentAdapter>,
    gates: Arc<dyn Gates>,
    config: Config,
    options: PlanReviewOptions,
}

impl PlanReviewLoop {
    pub fn new(store: Store, adapter: Arc<dyn AgentAdapter>, gates: Arc<dyn Gates>, config: Config, options: PlanReviewOptions) -> Self {
        Self { store, adapter, gates, config, options }
    }

    /// Resolves the review file path, preferring a path already recorded on
    /// the run, otherwise deriving one from the configured template. Rejects
    /// any stored path that escapes the configured reviews directory.
    fn resolve_review_path(&self, plan_path: &Path, stored: Option<&str>) -> Result<PathBuf> {
        let reviews_dir = self.config.reviews_dir.canonicalize().unwrap_or_else(|_| self.config.reviews_dir.clone());

        if let Some(stored) = stored {
            let candidate = PathBuf::from(stored);
            let canonical_parent = candidate
                .parent()
                .and_then(|p| p.canonicalize().ok())
                .unwrap_or_else(|| reviews_dir.clone());
            if !canonical_parent.starts_with(&reviews_dir) {
                return Err(Error::Config(format!(
                    "stored review path {stored} escapes reviews directory {}",
                    reviews_dir.display()
                )));
            }
            return Ok(candidate);
        }

        let template = self.config.review_path_template.clone().unwrap_or_default();
        Ok(resolve_phase_review_path(plan_path, &template, PLAN_PHASE_TAG))
    }

    pub async fn run(&self, plan_path: &Path) -> Result<PlanReviewOutcome> {
        let canonical = plan_path.canonicalize().map_err(Error::Io)?;
        let plan_path_str = canonical.to_string_lossy().into_owned();

        let run = match self.resolve_run(&plan_path_str).await? {
            Some(run) => run,
            None => return Ok(PlanReviewOutcome::Aborted { reason: "resume declined".to_string() }),
        };

        let review_path = self.resolve_review_path(&canonical, run.review_path.as_deref())?;
        self.store.set_review_path(&run.id, &review_path.to_string_lossy()).await?;

        let mut state = PlanReviewState::Review;
        let mut escalation_reason = String::new();
        let mut reviewer_session_id: Option<String> = None;

        loop {
            if self.options.cancel.is_cancelled() {
                self.store.update_run_status(&run.id, RunStatus::Aborted, Some("Aborted"), None).await?;
                return Ok(PlanReviewOutcome::Aborted { reason: "cancelled".to_string() });
            }

            state = match state {
                PlanReviewState::Review => {
                    let iteration = next_iteration(self.store.get_max_iteration_for_phase(&run.id, PLAN_PHASE_TAG).await?);

                    if iteration as u32 > self.config.max_review_iterations {
                        escalation_reason = "max review iterations exceeded".to_string();
                        PlanReviewState::Escalate
                    } else {
                        let log_path = agent_log_path(&self.options.project_root, &run.id);
                        let opts = InvokeOptions {
                            prompt: format!("Review the plan at {} and write feedback to {}", plan_path.display(), review_path.display()),
                            model: self.config.reviewer.model.clone(),
                            timeout: self.config.reviewer_timeout(),
                            workdir: Some(self.options.workdir.clone()),
                            log_path: log_path.clone(),
                            quiet: self.options.quiet.clone(),
                            show_reasoning: false,
                            cancel: self.options.cancel.clone(),
                            session_title: format!("Plan review {iteration}"),
                            session_id: reviewer_session_id.clone(),
                            on_session_created: self.options.on_session_created.clone(),
                        };

                        match self.adapter.invoke_for_verdict(opts).await {
                            Ok(result) => {
                                let json = serde_json::to_string(&result.verdict)?;
                                self.store
                                    .upsert_agent_result(
                                        &run.id, PLAN_PHASE_TAG, iteration, Role::Reviewer, "plan_review", ResultType::Verdict,
                                        &json, result.duration.as_millis() as i64, Some(&log_path.to_string_lossy()),
                                        result.session_id.as_deref(), Some(&self.config.reviewer.model),
                                        result.tokens_in, result.tokens_out, result.cost_usd,
                                    )
                                    .await?;
                                self.store
                                    .set_phase_review_outcome(&plan_path_str, PLAN_PHASE_TAG, readiness_label(result.verdict.readiness), None)
                                    .await?;
                                reviewer_session_id = result.session_id.clone();

                                if result.verdict.has_human_required() {
                                    escalation_reason = "plan review requires human input".to_string();
                                    PlanReviewState::Escalate
                                } else if result.verdict.readiness == Readiness::Ready {
                                    PlanReviewState::Approved
                                } else if result.verdict.has_auto_fix() {
                                    PlanReviewState::AutoFix
                                } else {
                                    escalation_reason = "plan review has no actionable items".to_string();
                                    PlanReviewState::Escalate
                                }
                            }
                            Err(e) => {
                                reviewer_session_id = None;
                                escalation_reason = format!("plan reviewer invocation failed: {e}");
                                PlanReviewState::Escalate
                            }
                        }
                    }
                }

                PlanReviewState::AutoFix => {
                    let iteration = next_iteration(self.store.get_max_iteration_for_phase(&run.id, PLAN_PHASE_TAG).await?);
                    let log_path = agent_log_path(&self.options.project_root, &run.id);
                    let opts = InvokeOptions {
                        prompt: format!("Revise the plan at {} per the review feedback at {}", plan_path.display(), review_path.display()),
                        model: self.config.author.model.clone(),
                        timeout: self.config.author_timeout(),
                        workdir: Some(self.options.workdir.clone()),
                        log_path: log_path.clone(),
                        quiet: self.options.quiet.clone(),
                        show_reasoning: false,
                        cancel: self.options.cancel.clone(),
                        session_title: format!("Plan revision {iteration}"),
                        session_id: None,
                        on_session_created: self.options.on_session_created.clone(),
                    };

                    match self.adapter.invoke_for_status(opts).await {
                        Ok(result) => {
                            assert_author_status(&result.status, CommitRequirement::NotRequired)
                                .map_err(|e| Error::Invariant(e.to_string()))?;
                            let json = serde_json::to_string(&result.status)?;
                            self.store
                                .upsert_agent_result(
                                    &run.id, PLAN_PHASE_TAG, iteration, Role::Author, "plan_autofix", ResultType::Status,
                                    &json, result.duration.as_millis() as i64, Some(&log_path.to_string_lossy()),
                                    result.session_id.as_deref(), Some(&self.config.author.model),
                                    result.tokens_in, result.tokens_out, result.cost_usd,
                                )
                                .await?;
                            match result.status {
                                crate::protocol::AuthorStatus::Complete { .. } => PlanReviewState::Review,
                                _ => {
                                    escalation_reason = result.status.reason().unwrap_or("plan autofix failed").to_string();
                                    PlanReviewState::Escalate
                                }
                            }
                        }
                        Err(e) => {
                            escalation_reason = format!("plan autofix invocation failed: {e}");
                            PlanReviewState::Escalate
                        }
                    }
                }

                PlanReviewState::Escalate => {
                    if self.options.auto {
                        self.store.update_run_status(&run.id, RunStatus::Aborted, Some("Aborted"), None).await?;
                        return Ok(PlanReviewOutcome::Aborted { reason: escalation_reason });
                    }

                    let event = EscalationEvent {
                        phase: PLAN_PHASE_TAG.to_string(),
                        reason: escalation_reason.clone(),
                        log_path: None,
                        session_id: None,
                    };
                    let decision = self.gates.escalation_gate(&event, &self.options.cancel).await?;
                    match decision.action {
                        EscalationAction::Continue | EscalationAction::ContinueSession => PlanReviewState::Review,
                        EscalationAction::Approve => PlanReviewState::Approved,
                        EscalationAction::Abort => PlanReviewState::Aborted,
                    }
                }

                PlanReviewState::Approved => {
                    self.store.set_phase_review_approved(&plan_path_str, PLAN_PHASE_TAG, None).await?;
                    self.store.update_run_status(&run.id, RunStatus::Completed, Some("Approved"), None).await?;
                    info!(run_id = %run.id, "plan approved");
                    return Ok(PlanReviewOutcome::Approved);
                }

                PlanReviewState::Aborted => {
                    self.store.update_run_status(&run.id, RunStatus::Aborted, Some("Aborted"), None).await?;
                    return Ok(PlanReviewOutcome::Aborted { reason: escalation_reason });
                }
            };

            self.store.update_run_status(&run.id, RunStatus::Active, Some(state.label()), None).await?;
        }
    }

    async fn resolve_run(&self, plan_path: &str) -> Result<Option<crate::store::Run>> {
        if let Some(active) = self.store.get_active_run(plan_path, RunCommand::PlanReview).await? {
            if self.options.auto {
                return Ok(Some(active));
            }
            let state = active.current_state.clone().unwrap_or_else(|| "Review".to_string());
            let decision = self
                .gates
                .resume_gate(&active.id, PLAN_PHASE_TAG, &state, &self.options.cancel)
                .await?;
            return Ok(match decision {
                ResumeDecision::Resume => Some(active),
                ResumeDecision::StartFresh => {
                    self.store.update_run_status(&active.id, RunStatus::Aborted, None, None).await?;
                    Some(self.store.create_run(plan_path, RunCommand::PlanReview).await?)
                }
                ResumeDecision::Abort => None,
            });
        }
        Ok(Some(self.store.create_run(plan_path, RunCommand::PlanReview).await?))
    }
}

fn readiness_label(readiness: Readiness) -> &'static str {
    match readiness {
        Readiness::Ready => "ready",
        Readiness::ReadyWithCorrections => "ready_with_corrections",
        Readiness::NotReady => "not_ready",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_label_matches_protocol_tags() {
        assert_eq!(readiness_label(Readiness::Ready), "ready");
        assert_eq!(readiness_label(Readiness::NotReady), "not_ready");
    }
}
