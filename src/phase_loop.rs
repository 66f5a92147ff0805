//! `PhaseExecutionLoop`: the per-phase author/quality/review state machine.
//!
//! Each `route_*` function is a pure mapping from (state, structured input)
//! to the next state, kept free of the store/adapter so the transition
//! table is unit-testable on its own, per the design note in SPEC_FULL.md.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::{agent_log_path, AgentAdapter, InvokeOptions, QuietMode, SessionCreatedHook};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::gates::{
    EscalationAction, EscalationEvent, Gates, HumanPrompt, PhaseGateDecision, PhaseSummary, ResumeDecision,
};
use crate::plan::{sanitize_phase_token, Phase, Plan};
use crate::protocol::{assert_author_status, AuthorStatus, CommitRequirement, ReviewerVerdict};
use crate::quality::{QualityReport, QualityRunner};
use crate::resume::{next_iteration, resolve_persisted_state};
use crate::store::{ResultType, Role, RunCommand, RunStatus, Store};
use crate::{Error, Result};

/// States of the per-phase execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Execute,
    QualityCheck,
    QualityRetry,
    Review,
    AutoFix,
    Escalate,
    PhaseGate,
    PhaseComplete,
    Aborted,
}

impl PhaseState {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseState::Execute => "Execute",
            PhaseState::QualityCheck => "QualityCheck",
            PhaseState::QualityRetry => "QualityRetry",
            PhaseState::Review => "Review",
            PhaseState::AutoFix => "AutoFix",
            PhaseState::Escalate => "Escalate",
            PhaseState::PhaseGate => "PhaseGate",
            PhaseState::PhaseComplete => "PhaseComplete",
            PhaseState::Aborted => "Aborted",
        }
    }

    /// `Escalate` and `Aborted` are treated as terminal for auto-resume
    /// purposes: resuming into them would livelock, so they start fresh.
    pub fn is_terminal_for_resume(&self) -> bool {
        matches!(self, PhaseState::Escalate | PhaseState::Aborted)
    }
}

/// Where an escalation originated, so a `Continue`/`ContinueSession`
/// decision knows which state to return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOrigin {
    Execute,
    QualityRetry,
    Review,
    AutoFix,
}

impl EscalationOrigin {
    fn resume_state(self) -> PhaseState {
        match self {
            EscalationOrigin::Execute => PhaseState::Execute,
            EscalationOrigin::QualityRetry => PhaseState::QualityRetry,
            EscalationOrigin::Review => PhaseState::Review,
            EscalationOrigin::AutoFix => PhaseState::AutoFix,
        }
    }
}

/// Routes a just-received author status to the next state.
pub fn route_author_status(status: &AuthorStatus, skip_quality: bool) -> PhaseState {
    match status {
        AuthorStatus::Complete { .. } => {
            if skip_quality {
                PhaseState::Review
            } else {
                PhaseState::QualityCheck
            }
        }
        AuthorStatus::NeedsHuman { .. } | AuthorStatus::Failed { .. } => PhaseState::Escalate,
    }
}

/// Routes a quality report, given the attempt count so far (1-based) and
/// the configured retry ceiling.
pub fn route_quality(report: &QualityReport, attempt: u32, max_retries: u32) -> PhaseState {
    if report.passed {
        PhaseState::Review
    } else if attempt < max_retries {
        PhaseState::QualityRetry
    } else {
        PhaseState::Escalate
    }
}

/// Routes a reviewer verdict. `human_required` items always escalate, even
/// in auto mode; `auto_fix`-only findings proceed to `AutoFix`; anything
/// else (including informational-only findings on a non-ready verdict)
/// escalates as "no actionable items".
pub fn route_verdict(verdict: &ReviewerVerdict) -> PhaseState {
    if verdict.has_human_required() {
        PhaseState::Escalate
    } else if crate::protocol::Readiness::Ready == verdict.readiness {
        PhaseState::PhaseGate
    } else if verdict.has_auto_fix() {
        PhaseState::AutoFix
    } else {
        PhaseState::Escalate
    }
}

/// Routes an escalation resolution back into the loop.
pub fn route_escalation(action: EscalationAction, origin: EscalationOrigin) -> PhaseState {
    match action {
        EscalationAction::Continue | EscalationAction::ContinueSession => origin.resume_state(),
        EscalationAction::Approve => PhaseState::PhaseGate,
        EscalationAction::Abort => PhaseState::Aborted,
    }
}

/// Routes a phase-gate decision.
pub fn route_phase_gate(decision: PhaseGateDecision) -> PhaseState {
    match decision {
        PhaseGateDecision::Continue => PhaseState::PhaseComplete,
        PhaseGateDecision::Review => PhaseState::Review,
        PhaseGateDecision::Abort => PhaseState::Aborted,
    }
}

/// Run-scoped knobs supplied by the caller (CLI or tests).
pub struct PhaseLoopOptions {
    pub auto: bool,
    pub skip_quality: bool,
    pub start_phase: Option<String>,
    pub workdir: PathBuf,
    pub project_root: PathBuf,
    pub quiet: QuietMode,
    pub cancel: CancellationToken,
    pub on_session_created: Option<SessionCreatedHook>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseLoopOutcome {
    Completed,
    Aborted { reason: String },
}

pub struct PhaseExecutionLoop {
    store: Store,
    adapter: Arc<dyn AgentAdapter>,
    quality: Arc<dyn QualityRunner>,
    gates: Arc<dyn Gates>,
    config: Config,
    options: PhaseLoopOptions,
}

impl PhaseExecutionLoop {
    pub fn new(
        store: Store,
        adapter: Arc<dyn AgentAdapter>,
        quality: Arc<dyn QualityRunner>,
        gates: Arc<dyn Gates>,
        config: Config,
        options: PhaseLoopOptions,
    ) -> Self {
        Self {
            store,
            adapter,
            quality,
            gates,
            config,
            options,
        }
    }

    async fn event(&self, run_id: &str, event_type: &str, phase: Option<&str>, iteration: Option<i64>, data: serde_json::Value) -> Result<()> {
        self.store.append_run_event(run_id, event_type, phase, iteration, &data).await?;
        Ok(())
    }

    /// Decides whether the (role, template, result_type) step for this phase
    /// should be replayed from a previously recorded `agent_results` row
    /// rather than invoked fresh.
    ///
    /// A process kill between recording a result (`upsert_agent_result`) and
    /// the loop-bottom `current_state` update leaves the DB max iteration
    /// already reflecting that write, even though the run's persisted state
    /// still names the state that just ran. On resume, the first visit to
    /// that state must detect the already-recorded row and replay it instead
    /// of invoking again at a fresh iteration (which would double the
    /// `agent_results` row for that logical step). `last_invoked` — the
    /// iteration this very `run_phase` call last invoked fresh, if any —
    /// distinguishes that recovery case from an ordinary later re-visit
    /// of the same state later in the same phase (e.g. after an
    /// escalation `Continue`), where the max row is one this call itself
    /// just wrote and must never be replayed.
    async fn resume_replay_iteration(
        &self,
        run_id: &str,
        phase: &str,
        role: Role,
        template: &str,
        result_type: ResultType,
        max_iteration: Option<i64>,
        last_invoked: Option<i64>,
    ) -> Result<Option<i64>> {
        let Some(max) = max_iteration else {
            return Ok(None);
        };
        if last_invoked == Some(max) {
            return Ok(None);
        }
        if self.store.has_completed_step(run_id, role, phase, max, template, result_type).await? {
            Ok(Some(max))
        } else {
            Ok(None)
        }
    }

    /// Entry point: parses the plan, resolves (or starts) a run, and drives
    /// pending phases to completion or abort.
    pub async fn run(&self, plan_path: &Path) -> Result<PhaseLoopOutcome> {
        let canonical = plan_path
            .canonicalize()
            .map_err(Error::Io)?;
        let plan_path_str = canonical.to_string_lossy().into_owned();
        let content = tokio::fs::read_to_string(&canonical).await?;
        let mut plan = Plan::parse(&canonical, &content)?;

        let run = self.resolve_run(&plan_path_str).await?;
        let run = match run {
            Some(run) => run,
            None => return Ok(PhaseLoopOutcome::Aborted { reason: "resume declined".to_string() }),
        };

        self.event(&run.id, "run_start", None, None, serde_json::json!({ "plan_path": plan_path_str })).await?;

        // A resumed run may have been interrupted mid-phase; honor its
        // persisted state for that one phase instead of restarting at
        // `Execute`, which would re-invoke an agent step already recorded.
        let mut resume_into: Option<PhaseState> = match (&run.current_phase, &run.current_state) {
            (Some(cp), Some(cs)) if !cp.is_empty() => {
                resolve_persisted_state(cs).filter(|s| !s.is_terminal_for_resume())
            }
            _ => None,
        };

        loop {
            if self.options.cancel.is_cancelled() {
                self.store.update_run_status(&run.id, RunStatus::Aborted, Some("Aborted"), None).await?;
                self.event(&run.id, "run_abort", None, None, serde_json::json!({ "reason": "cancelled" })).await?;
                return Ok(PhaseLoopOutcome::Aborted { reason: "cancelled".to_string() });
            }

            let approved = self.store.get_approved_phase_numbers(&plan_path_str).await?;
            let mut pending: Vec<Phase> = plan.pending_phases(&approved).into_iter().cloned().collect();

            if let Some(start_phase) = &self.options.start_phase {
                let order: Vec<&str> = plan.phases.iter().map(|p| p.number.as_str()).collect();
                match order.iter().position(|n| *n == start_phase.as_str()) {
                    Some(start_idx) => {
                        pending.retain(|p| {
                            order
                                .iter()
                                .position(|n| *n == p.number.as_str())
                                .map(|idx| idx >= start_idx)
                                .unwrap_or(true)
                        });
                    }
                    None => {
                        let reason = format!("--start-phase {start_phase} does not match any phase in the plan");
                        self.store.update_run_status(&run.id, RunStatus::Aborted, Some("Aborted"), None).await?;
                        self.event(&run.id, "run_abort", None, None, serde_json::json!({ "reason": reason.clone() })).await?;
                        return Ok(PhaseLoopOutcome::Aborted { reason });
                    }
                }
            }

            let Some(phase) = pending.first() else {
                self.store.update_run_status(&run.id, RunStatus::Completed, Some("PhaseComplete"), None).await?;
                self.event(&run.id, "run_complete", None, None, serde_json::json!({})).await?;
                return Ok(PhaseLoopOutcome::Completed);
            };

            let phase_resume_state = if run.current_phase.as_deref() == Some(phase.number.as_str()) {
                resume_into.take()
            } else {
                None
            };
            let outcome = self.run_phase(&run.id, &plan_path_str, phase, phase_resume_state).await?;
            if let PhaseLoopOutcome::Aborted { reason } = outcome {
                self.store.update_run_status(&run.id, RunStatus::Aborted, Some("Aborted"), Some(&phase.number)).await?;
                self.event(&run.id, "run_abort", Some(&phase.number), None, serde_json::json!({ "reason": reason })).await?;
                return Ok(PhaseLoopOutcome::Aborted { reason });
            }

            // Re-parse after every PhaseComplete: the author may have appended
            // phases. A set-equality check catches illegal renumbering.
            let before_ids = plan.phase_numbers();
            let refreshed = tokio::fs::read_to_string(&canonical).await?;
            let reparsed = Plan::parse(&canonical, &refreshed)?;
            let after_ids = reparsed.phase_numbers();
            if !crate::plan::phase_ids_unchanged(&before_ids, &after_ids) {
                let reason = format!("plan phase IDs changed: had {before_ids:?}, now {after_ids:?}");
                self.store.update_run_status(&run.id, RunStatus::Aborted, Some("Aborted"), None).await?;
                self.event(&run.id, "run_abort", None, None, serde_json::json!({ "reason": reason.clone() })).await?;
                return Err(Error::PlanRenumbered(reason));
            }
            plan = reparsed;
        }
    }

    async fn resolve_run(&self, plan_path: &str) -> Result<Option<crate::store::Run>> {
        if let Some(active) = self.store.get_active_run(plan_path, RunCommand::Run).await? {
            let persisted_state = active.current_state.as_deref().unwrap_or("Execute");
            let state = resolve_persisted_state(persisted_state).unwrap_or(PhaseState::Execute);

            if self.options.auto {
                if state.is_terminal_for_resume() {
                    info!(run_id = %active.id, "active run at terminal state, starting fresh");
                    self.store.update_run_status(&active.id, RunStatus::Aborted, None, None).await?;
                    self.event(&active.id, "auto_start_fresh", None, None, serde_json::json!({})).await?;
                    let fresh = self.store.create_run(plan_path, RunCommand::Run).await?;
                    return Ok(Some(fresh));
                }
                return Ok(Some(active));
            }

            let decision = self
                .gates
                .resume_gate(&active.id, active.current_phase.as_deref().unwrap_or(""), persisted_state, &self.options.cancel)
                .await?;
            return Ok(match decision {
                ResumeDecision::Resume => Some(active),
                ResumeDecision::StartFresh => {
                    self.store.update_run_status(&active.id, RunStatus::Aborted, None, None).await?;
                    Some(self.store.create_run(plan_path, RunCommand::Run).await?)
                }
                ResumeDecision::Abort => None,
            });
        }

        Ok(Some(self.store.create_run(plan_path, RunCommand::Run).await?))
    }

    async fn run_phase(&self, run_id: &str, plan_path: &str, phase: &Phase, resume_state: Option<PhaseState>) -> Result<PhaseLoopOutcome> {
        self.event(run_id, "phase_start", Some(&phase.number), None, serde_json::json!({ "title": phase.title })).await?;

        let mut state = resume_state.unwrap_or(PhaseState::Execute);
        let mut quality_attempt = self.store.get_quality_attempt_count(run_id, &phase.number).await? as u32;
        let mut escalation_count: u32 = 0;
        let mut escalation_origin = EscalationOrigin::Execute;
        let mut escalation_reason = String::new();
        let mut reviewer_session_id: Option<String> = None;
        let mut last_commit: Option<String> = None;
        let mut pending_author_session: Option<String> = None;
        // Tracks the iteration this call last invoked fresh, so the replay
        // check below only fires for a state's *first* visit after a resume,
        // never for an ordinary later re-visit within the same live call.
        let mut last_invoked_iteration: Option<i64> = None;

        loop {
            if self.options.cancel.is_cancelled() {
                return Ok(PhaseLoopOutcome::Aborted { reason: "cancelled".to_string() });
            }

            debug!(phase = %phase.number, state = state.label(), "phase loop iteration");

            state = match state {
                PhaseState::Execute => {
                    let max_iteration = self.store.get_max_iteration_for_phase(run_id, &phase.number).await?;
                    let replay = self
                        .resume_replay_iteration(run_id, &phase.number, Role::Author, "author", ResultType::Status, max_iteration, last_invoked_iteration)
                        .await?;

                    if let Some(iteration) = replay {
                        let json = self.store.get_step_result(run_id, Role::Author, &phase.number, iteration, "author", ResultType::Status).await?.unwrap();
                        let status: AuthorStatus = serde_json::from_str(&json)?;
                        last_commit = status.commit().map(|s| s.to_string());
                        route_author_status(&status, self.options.skip_quality)
                    } else {
                        let iteration = next_iteration(max_iteration);
                        let log_path = agent_log_path(&self.options.project_root, run_id);
                        let opts = InvokeOptions {
                            prompt: format!("Implement phase {}: {}", phase.number, phase.title),
                            model: self.config.author.model.clone(),
                            timeout: self.config.author_timeout(),
                            workdir: Some(self.options.workdir.clone()),
                            log_path: log_path.clone(),
                            quiet: self.options.quiet.clone(),
                            show_reasoning: false,
                            cancel: self.options.cancel.clone(),
                            session_title: format!("Phase {} — author", phase.number),
                            session_id: pending_author_session.take(),
                            on_session_created: self.options.on_session_created.clone(),
                        };

                        match self.adapter.invoke_for_status(opts).await {
                            Ok(result) => {
                                assert_author_status(&result.status, CommitRequirement::NotRequired)
                                    .map_err(|e| Error::Invariant(e.to_string()))?;
                                let json = serde_json::to_string(&result.status)?;
                                self.store
                                    .upsert_agent_result(
                                        run_id, &phase.number, iteration, Role::Author, "author", ResultType::Status,
                                        &json, result.duration.as_millis() as i64, Some(&log_path.to_string_lossy()),
                                        result.session_id.as_deref(), Some(&self.config.author.model),
                                        result.tokens_in, result.tokens_out, result.cost_usd,
                                    )
                                    .await?;
                                last_invoked_iteration = Some(iteration);
                                self.event(run_id, "agent_invoke", Some(&phase.number), Some(iteration), serde_json::json!({ "role": "author" })).await?;
                                last_commit = result.status.commit().map(|s| s.to_string());
                                route_author_status(&result.status, self.options.skip_quality)
                            }
                            Err(e) => {
                                escalation_origin = EscalationOrigin::Execute;
                                escalation_reason = format!("author invocation failed: {e}");
                                warn!(phase = %phase.number, error = %e, "author invocation failed");
                                PhaseState::Escalate
                            }
                        }
                    }
                }

                PhaseState::QualityCheck | PhaseState::QualityRetry => {
                    quality_attempt += 1;
                    let report = self
                        .quality
                        .run(&self.config.quality_gates, &self.options.workdir, &self.options.cancel)
                        .await?;
                    self.store
                        .record_quality_result(run_id, &phase.number, quality_attempt as i64, report.passed, &serde_json::to_string(&report)?, report.duration_ms as i64)
                        .await?;
                    self.event(run_id, "quality_gate", Some(&phase.number), None, serde_json::json!({ "passed": report.passed, "attempt": quality_attempt })).await?;

                    let next = route_quality(&report, quality_attempt, self.config.max_quality_retries);
                    if next == PhaseState::Escalate {
                        escalation_origin = EscalationOrigin::QualityRetry;
                        escalation_reason = "quality gate failed after max retries".to_string();
                    }
                    next
                }

                PhaseState::Review => {
                    let max_iteration = self.store.get_max_iteration_for_phase(run_id, &phase.number).await?;
                    let replay = self
                        .resume_replay_iteration(run_id, &phase.number, Role::Reviewer, "review", ResultType::Verdict, max_iteration, last_invoked_iteration)
                        .await?;

                    if let Some(iteration) = replay {
                        let json = self.store.get_step_result(run_id, Role::Reviewer, &phase.number, iteration, "review", ResultType::Verdict).await?.unwrap();
                        let verdict: ReviewerVerdict = serde_json::from_str(&json)?;

                        let next = route_verdict(&verdict);
                        if next == PhaseState::Escalate {
                            if verdict.has_human_required() {
                                escalation_origin = EscalationOrigin::AutoFix;
                                escalation_reason = format!(
                                    "reviewer verdict requires human review: {}",
                                    verdict.summary.clone().unwrap_or_else(|| "no summary".to_string())
                                );
                            } else {
                                escalation_origin = EscalationOrigin::Review;
                                escalation_reason = verdict.summary.clone().unwrap_or_else(|| "reviewer escalated".to_string());
                            }
                        }
                        next
                    } else {
                        let iteration = next_iteration(max_iteration);
                        let log_path = agent_log_path(&self.options.project_root, run_id);

                        let prompt = match &reviewer_session_id {
                            Some(_) => format!("Addendum review for phase {} (commit {})", phase.number, last_commit.clone().unwrap_or_default()),
                            None => format!("Review phase {}: {}", phase.number, phase.title),
                        };

                        let opts = InvokeOptions {
                            prompt,
                            model: self.config.reviewer.model.clone(),
                            timeout: self.config.reviewer_timeout(),
                            workdir: Some(self.options.workdir.clone()),
                            log_path: log_path.clone(),
                            quiet: self.options.quiet.clone(),
                            show_reasoning: false,
                            cancel: self.options.cancel.clone(),
                            session_title: format!("Phase {} — review {}", phase.number, iteration),
                            session_id: reviewer_session_id.clone(),
                            on_session_created: self.options.on_session_created.clone(),
                        };

                        match self.adapter.invoke_for_verdict(opts).await {
                            Ok(result) => {
                                let json = serde_json::to_string(&result.verdict)?;
                                self.store
                                    .upsert_agent_result(
                                        run_id, &phase.number, iteration, Role::Reviewer, "review", ResultType::Verdict,
                                        &json, result.duration.as_millis() as i64, Some(&log_path.to_string_lossy()),
                                        result.session_id.as_deref(), Some(&self.config.reviewer.model),
                                        result.tokens_in, result.tokens_out, result.cost_usd,
                                    )
                                    .await?;
                                last_invoked_iteration = Some(iteration);
                                self.event(run_id, "verdict", Some(&phase.number), Some(iteration), serde_json::json!({ "readiness": result.verdict.readiness })).await?;
                                reviewer_session_id = result.session_id.clone();

                                let next = route_verdict(&result.verdict);
                                if next == PhaseState::Escalate {
                                    // `human_required` findings retry into AUTO_FIX (a best-judgment
                                    // fix attempt) rather than back into REVIEW itself; any other
                                    // escalating verdict (no actionable items) retries REVIEW.
                                    if result.verdict.has_human_required() {
                                        escalation_origin = EscalationOrigin::AutoFix;
                                        escalation_reason = format!(
                                            "reviewer verdict requires human review: {}",
                                            result.verdict.summary.clone().unwrap_or_else(|| "no summary".to_string())
                                        );
                                    } else {
                                        escalation_origin = EscalationOrigin::Review;
                                        escalation_reason = result
                                            .verdict
                                            .summary
                                            .clone()
                                            .unwrap_or_else(|| "reviewer escalated".to_string());
                                    }
                                }
                                next
                            }
                            Err(e) => {
                                reviewer_session_id = None;
                                escalation_origin = EscalationOrigin::Review;
                                escalation_reason = format!("reviewer invocation failed: {e}");
                                PhaseState::Escalate
                            }
                        }
                    }
                }

                PhaseState::AutoFix => {
                    let max_iteration = self.store.get_max_iteration_for_phase(run_id, &phase.number).await?;
                    let replay = self
                        .resume_replay_iteration(run_id, &phase.number, Role::Author, "autofix", ResultType::Status, max_iteration, last_invoked_iteration)
                        .await?;

                    if let Some(iteration) = replay {
                        let json = self.store.get_step_result(run_id, Role::Author, &phase.number, iteration, "autofix", ResultType::Status).await?.unwrap();
                        let status: AuthorStatus = serde_json::from_str(&json)?;
                        last_commit = status.commit().map(|s| s.to_string());
                        match route_author_status(&status, true) {
                            PhaseState::Escalate => {
                                escalation_origin = EscalationOrigin::AutoFix;
                                escalation_reason = status.reason().unwrap_or("autofix failed").to_string();
                                PhaseState::Escalate
                            }
                            _ => PhaseState::Review,
                        }
                    } else {
                        let iteration = next_iteration(max_iteration);
                        let log_path = agent_log_path(&self.options.project_root, run_id);

                        let opts = InvokeOptions {
                            prompt: format!("Apply reviewer-requested fixes for phase {}", phase.number),
                            model: self.config.author.model.clone(),
                            timeout: self.config.author_timeout(),
                            workdir: Some(self.options.workdir.clone()),
                            log_path: log_path.clone(),
                            quiet: self.options.quiet.clone(),
                            show_reasoning: false,
                            cancel: self.options.cancel.clone(),
                            session_title: format!("Phase {} — revision {}", phase.number, iteration),
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
                                        run_id, &phase.number, iteration, Role::Author, "autofix", ResultType::Status,
                                        &json, result.duration.as_millis() as i64, Some(&log_path.to_string_lossy()),
                                        result.session_id.as_deref(), Some(&self.config.author.model),
                                        result.tokens_in, result.tokens_out, result.cost_usd,
                                    )
                                    .await?;
                                last_invoked_iteration = Some(iteration);
                                last_commit = result.status.commit().map(|s| s.to_string());
                                match route_author_status(&result.status, true) {
                                    PhaseState::Escalate => {
                                        escalation_origin = EscalationOrigin::AutoFix;
                                        escalation_reason = result.status.reason().unwrap_or("autofix failed").to_string();
                                        PhaseState::Escalate
                                    }
                                    _ => PhaseState::Review,
                                }
                            }
                            Err(e) => {
                                escalation_origin = EscalationOrigin::AutoFix;
                                escalation_reason = format!("autofix invocation failed: {e}");
                                PhaseState::Escalate
                            }
                        }
                    }
                }

                PhaseState::Escalate => {
                    escalation_count += 1;
                    self.event(run_id, "escalation", Some(&phase.number), None, serde_json::json!({ "reason": escalation_reason })).await?;

                    if self.options.auto && escalation_count > self.config.max_auto_retries {
                        self.event(run_id, "auto_escalation_abort", Some(&phase.number), None, serde_json::json!({ "reason": escalation_reason })).await?;
                        return Ok(PhaseLoopOutcome::Aborted { reason: escalation_reason });
                    }

                    let event = EscalationEvent {
                        phase: phase.number.clone(),
                        reason: escalation_reason.clone(),
                        log_path: None,
                        session_id: pending_author_session.clone(),
                    };
                    let decision = self.gates.escalation_gate(&event, &self.options.cancel).await?;
                    self.event(run_id, "human_decision", Some(&phase.number), None, serde_json::json!({ "action": format!("{:?}", decision.action) })).await?;

                    if decision.action == EscalationAction::ContinueSession {
                        pending_author_session = event.session_id;
                    }

                    let next = route_escalation(decision.action, escalation_origin);
                    if next == PhaseState::Aborted && self.options.auto {
                        return Ok(PhaseLoopOutcome::Aborted { reason: escalation_reason });
                    }
                    next
                }

                PhaseState::PhaseGate => {
                    let summary = PhaseSummary {
                        phase: phase.number.clone(),
                        title: phase.title.clone(),
                        commit: last_commit.clone(),
                    };
                    let decision = self.gates.phase_gate(&summary, &self.options.cancel).await?;
                    route_phase_gate(decision)
                }

                PhaseState::PhaseComplete => {
                    self.store.mark_phase_implementation_done(plan_path, &phase.number).await?;
                    self.store
                        .set_phase_review_approved(plan_path, &phase.number, last_commit.as_deref())
                        .await?;
                    self.event(run_id, "phase_complete", Some(&phase.number), None, serde_json::json!({})).await?;
                    return Ok(PhaseLoopOutcome::Completed);
                }

                PhaseState::Aborted => {
                    return Ok(PhaseLoopOutcome::Aborted { reason: escalation_reason });
                }
            };

            self.store
                .update_run_status(run_id, RunStatus::Active, Some(state.label()), Some(&phase.number))
                .await?;
        }
    }
}

/// A human-prompt payload the generic `human_gate` primitive can drive when
/// a TUI wants to surface the raw decision rather than going through
/// `escalation_gate`/`phase_gate`.
pub fn human_prompt_for_escalation(event: &EscalationEvent) -> HumanPrompt {
    HumanPrompt {
        title: format!("Phase {} escalated", event.phase),
        body: event.reason.clone(),
        options: vec!["continue".to_string(), "approve".to_string(), "abort".to_string()],
    }
}

/// Exposed for the CLI: sanitizes a user-supplied `--start-phase` value the
/// same way plan tokens are sanitized, so it can be matched against parsed
/// phase numbers.
pub fn normalize_start_phase(raw: &str) -> String {
    sanitize_phase_token(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Item, ItemAction, Readiness};
    use crate::quality::{failing_report, passing_report};

    #[test]
    fn author_complete_routes_to_quality_unless_skipped() {
        let status = AuthorStatus::Complete { commit: Some("abc".into()), notes: None };
        assert_eq!(route_author_status(&status, false), PhaseState::QualityCheck);
        assert_eq!(route_author_status(&status, true), PhaseState::Review);
    }

    #[test]
    fn author_needs_human_or_failed_escalates() {
        let needs_human = AuthorStatus::NeedsHuman { reason: Some("r".into()), notes: None };
        let failed = AuthorStatus::Failed { reason: Some("r".into()), notes: None };
        assert_eq!(route_author_status(&needs_human, false), PhaseState::Escalate);
        assert_eq!(route_author_status(&failed, false), PhaseState::Escalate);
    }

    #[test]
    fn quality_failure_retries_then_escalates() {
        let report = failing_report("cargo test", "boom");
        assert_eq!(route_quality(&report, 1, 2), PhaseState::QualityRetry);
        assert_eq!(route_quality(&report, 2, 2), PhaseState::Escalate);
        assert_eq!(route_quality(&passing_report(), 1, 2), PhaseState::Review);
    }

    fn item(action: ItemAction) -> Item {
        Item { id: "1".into(), title: "t".into(), action, reason: "r".into(), priority: None }
    }

    #[test]
    fn verdict_routing_matches_spec_table() {
        let ready = ReviewerVerdict { readiness: Readiness::Ready, items: vec![], summary: None };
        assert_eq!(route_verdict(&ready), PhaseState::PhaseGate);

        let auto_fix = ReviewerVerdict {
            readiness: Readiness::NotReady,
            items: vec![item(ItemAction::AutoFix)],
            summary: None,
        };
        assert_eq!(route_verdict(&auto_fix), PhaseState::AutoFix);

        let human_required = ReviewerVerdict {
            readiness: Readiness::NotReady,
            items: vec![item(ItemAction::AutoFix), item(ItemAction::HumanRequired)],
            summary: None,
        };
        assert_eq!(route_verdict(&human_required), PhaseState::Escalate);

        let informational_only = ReviewerVerdict {
            readiness: Readiness::NotReady,
            items: vec![item(ItemAction::Informational)],
            summary: None,
        };
        assert_eq!(route_verdict(&informational_only), PhaseState::Escalate);
    }

    #[test]
    fn escalation_resolution_returns_to_origin_or_terminates() {
        assert_eq!(route_escalation(EscalationAction::Continue, EscalationOrigin::Execute), PhaseState::Execute);
        assert_eq!(route_escalation(EscalationAction::ContinueSession, EscalationOrigin::Review), PhaseState::Review);
        assert_eq!(route_escalation(EscalationAction::Approve, EscalationOrigin::Review), PhaseState::PhaseGate);
        assert_eq!(route_escalation(EscalationAction::Abort, EscalationOrigin::Execute), PhaseState::Aborted);
    }

    #[test]
    fn phase_gate_routing() {
        assert_eq!(route_phase_gate(PhaseGateDecision::Continue), PhaseState::PhaseComplete);
        assert_eq!(route_phase_gate(PhaseGateDecision::Review), PhaseState::Review);
        assert_eq!(route_phase_gate(PhaseGateDecision::Abort), PhaseState::Aborted);
    }

    #[test]
    fn start_phase_is_sanitized_like_plan_tokens() {
        assert_eq!(normalize_start_phase("1.1!"), "1.1");
    }
}
