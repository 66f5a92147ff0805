//! End-to-end exercises of `PhaseExecutionLoop` against scripted agents and
//! an in-memory store — no real CLI binary or shell commands involved.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use phaseloop::adapter::{
    AdapterError, AgentAdapter, InvokeOptions, InvokeStatus, InvokeVerdict, QuietMode, ScriptedAgentAdapter,
    ScriptedResponse,
};
use phaseloop::cancel::CancellationToken;
use phaseloop::gates::HeadlessGates;
use phaseloop::phase_loop::{PhaseExecutionLoop, PhaseLoopOptions, PhaseLoopOutcome};
use phaseloop::protocol::{AuthorStatus, Item, ItemAction, Readiness, ReviewerVerdict};
use phaseloop::quality::{passing_report, ScriptedQualityRunner};
use phaseloop::store::{Role, ResultType, RunCommand, Store};
use phaseloop::Config;

fn write_plan(dir: &tempfile::TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("plan.md");
    std::fs::write(&path, content).unwrap();
    path
}

fn options(dir: &tempfile::TempDir, auto: bool) -> PhaseLoopOptions {
    PhaseLoopOptions {
        auto,
        skip_quality: false,
        start_phase: None,
        workdir: dir.path().to_path_buf(),
        project_root: dir.path().to_path_buf(),
        quiet: QuietMode::Always,
        cancel: CancellationToken::new(),
        on_session_created: None,
    }
}

fn item(action: ItemAction) -> Item {
    Item { id: "p1-1".into(), title: "finding".into(), action, reason: "r".into(), priority: None }
}

#[tokio::test]
async fn single_phase_happy_path_completes() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = write_plan(&dir, "## Phase 1: Setup\n- [ ] do the thing\n");

    let store = Store::open_in_memory().await.unwrap();
    let adapter = Arc::new(ScriptedAgentAdapter::new(vec![
        ScriptedResponse::Status(AuthorStatus::Complete { commit: Some("abc123".into()), notes: None }),
        ScriptedResponse::Verdict(ReviewerVerdict { readiness: Readiness::Ready, items: vec![], summary: None }),
    ]));
    let quality = Arc::new(ScriptedQualityRunner::new(vec![passing_report()]));
    let gates = Arc::new(HeadlessGates);
    let config = Config::default();

    let engine = PhaseExecutionLoop::new(store.clone(), adapter, quality, gates, config, options(&dir, true));
    let outcome = engine.run(&plan_path).await.unwrap();
    assert_eq!(outcome, PhaseLoopOutcome::Completed);

    let plan_path_str = plan_path.canonicalize().unwrap().to_string_lossy().into_owned();
    let approved = store.get_approved_phase_numbers(&plan_path_str).await.unwrap();
    assert!(approved.contains("1"));
}

#[tokio::test]
async fn autofix_cycle_completes_after_revision() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = write_plan(&dir, "## Phase 1: Setup\n");

    let store = Store::open_in_memory().await.unwrap();
    let adapter = Arc::new(ScriptedAgentAdapter::new(vec![
        ScriptedResponse::Status(AuthorStatus::Complete { commit: Some("c1".into()), notes: None }),
        ScriptedResponse::Verdict(ReviewerVerdict {
            readiness: Readiness::NotReady,
            items: vec![item(ItemAction::AutoFix)],
            summary: Some("fix formatting".into()),
        }),
        ScriptedResponse::Status(AuthorStatus::Complete { commit: Some("c2".into()), notes: None }),
        ScriptedResponse::Verdict(ReviewerVerdict { readiness: Readiness::Ready, items: vec![], summary: None }),
    ]));
    let quality = Arc::new(ScriptedQualityRunner::new(vec![passing_report()]));
    let gates = Arc::new(HeadlessGates);
    let config = Config::default();

    let engine = PhaseExecutionLoop::new(store, adapter, quality, gates, config, options(&dir, true));
    let outcome = engine.run(&plan_path).await.unwrap();
    assert_eq!(outcome, PhaseLoopOutcome::Completed);
}

#[tokio::test]
async fn human_required_verdict_attempts_one_autofix_then_aborts_in_auto_mode() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = write_plan(&dir, "## Phase 1: Setup\n");
    let plan_path_str = plan_path.canonicalize().unwrap().to_string_lossy().into_owned();

    let store = Store::open_in_memory().await.unwrap();
    // Pre-create the run so its id is known for the event-log assertion below.
    let run = store.create_run(&plan_path_str, RunCommand::Run).await.unwrap();

    let adapter = Arc::new(ScriptedAgentAdapter::new(vec![
        ScriptedResponse::Status(AuthorStatus::Complete { commit: Some("c1".into()), notes: None }),
        ScriptedResponse::Verdict(ReviewerVerdict {
            readiness: Readiness::NotReady,
            items: vec![item(ItemAction::AutoFix), item(ItemAction::HumanRequired)],
            summary: Some("needs a human call".into()),
        }),
        // The auto-mode policy's best judgment after a human_required verdict
        // is one AUTO_FIX attempt (not an immediate abort); this author call
        // fails too, so the ceiling (max_auto_retries=1) trips on the next escalation.
        ScriptedResponse::Status(AuthorStatus::NeedsHuman { reason: Some("still stuck".into()), notes: None }),
    ]));
    let quality = Arc::new(ScriptedQualityRunner::new(vec![passing_report()]));
    let gates = Arc::new(HeadlessGates);
    let mut config = Config::default();
    config.max_auto_retries = 1;

    let engine = PhaseExecutionLoop::new(store.clone(), adapter, quality, gates, config, options(&dir, true));
    let outcome = engine.run(&plan_path).await.unwrap();
    assert!(matches!(outcome, PhaseLoopOutcome::Aborted { .. }));

    let events = store.list_run_events(&run.id).await.unwrap();
    let escalations: Vec<_> = events.iter().filter(|e| e.event_type == "escalation").collect();
    assert_eq!(escalations.len(), 2, "expected the human_required escalation plus the failed autofix escalation");
    assert!(escalations[0].data["reason"].as_str().unwrap_or_default().contains("human review"));
}

#[tokio::test]
async fn resume_at_quality_check_does_not_reinvoke_author() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = write_plan(&dir, "## Phase 1: Setup\n");
    let plan_path_str = plan_path.canonicalize().unwrap().to_string_lossy().into_owned();

    let store = Store::open_in_memory().await.unwrap();

    // Simulate a prior interrupted run: the author step already completed
    // and persisted, and the run was left at QUALITY_CHECK for phase 1.
    let run = store.create_run(&plan_path_str, RunCommand::Run).await.unwrap();
    let author_status = AuthorStatus::Complete { commit: Some("abc123".into()), notes: None };
    store
        .upsert_agent_result(
            &run.id, "1", 0, Role::Author, "author", ResultType::Status,
            &serde_json::to_string(&author_status).unwrap(), 10, None, None, None, None, None, None,
        )
        .await
        .unwrap();
    store
        .update_run_status(&run.id, phaseloop::store::RunStatus::Active, Some("QualityCheck"), Some("1"))
        .await
        .unwrap();

    // Only a verdict is scripted: if the engine wrongly re-invoked the
    // author on resume it would exhaust the script and escalate instead.
    let adapter = Arc::new(ScriptedAgentAdapter::new(vec![ScriptedResponse::Verdict(ReviewerVerdict {
        readiness: Readiness::Ready,
        items: vec![],
        summary: None,
    })]));
    let quality = Arc::new(ScriptedQualityRunner::new(vec![passing_report()]));
    let gates = Arc::new(HeadlessGates);
    let config = Config::default();

    let engine = PhaseExecutionLoop::new(store, adapter, quality, gates, config, options(&dir, true));
    let outcome = engine.run(&plan_path).await.unwrap();
    assert_eq!(outcome, PhaseLoopOutcome::Completed);
}

#[tokio::test]
async fn resume_at_review_with_result_already_recorded_replays_without_reinvoking() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = write_plan(&dir, "## Phase 1: Setup\n");
    let plan_path_str = plan_path.canonicalize().unwrap().to_string_lossy().into_owned();

    let store = Store::open_in_memory().await.unwrap();

    // Simulate a crash that happened after the reviewer's verdict was
    // recorded but before the loop-bottom `current_state` update away from
    // "Review" ran: both the author result (iteration 0) and the reviewer's
    // `Ready` verdict (iteration 1) are already present, yet `current_state`
    // is still "Review".
    let run = store.create_run(&plan_path_str, RunCommand::Run).await.unwrap();
    let author_status = AuthorStatus::Complete { commit: Some("abc123".into()), notes: None };
    store
        .upsert_agent_result(
            &run.id, "1", 0, Role::Author, "author", ResultType::Status,
            &serde_json::to_string(&author_status).unwrap(), 10, None, None, None, None, None, None,
        )
        .await
        .unwrap();
    let verdict = ReviewerVerdict { readiness: Readiness::Ready, items: vec![], summary: None };
    store
        .upsert_agent_result(
            &run.id, "1", 1, Role::Reviewer, "review", ResultType::Verdict,
            &serde_json::to_string(&verdict).unwrap(), 10, None, None, None, None, None, None,
        )
        .await
        .unwrap();
    store
        .update_run_status(&run.id, phaseloop::store::RunStatus::Active, Some("Review"), Some("1"))
        .await
        .unwrap();

    // No responses scripted at all: any invocation (of either role) fails
    // the test by returning a "scripted adapter exhausted" error instead of
    // replaying the already-recorded verdict.
    let adapter = Arc::new(ScriptedAgentAdapter::new(vec![]));
    let quality = Arc::new(ScriptedQualityRunner::new(vec![passing_report()]));
    let gates = Arc::new(HeadlessGates);
    let config = Config::default();

    let engine = PhaseExecutionLoop::new(store.clone(), adapter, quality, gates, config, options(&dir, true));
    let outcome = engine.run(&plan_path).await.unwrap();
    assert_eq!(outcome, PhaseLoopOutcome::Completed);

    let events = store.list_run_events(&run.id).await.unwrap();
    let verdict_rows = events.iter().filter(|e| e.event_type == "verdict").count();
    assert_eq!(verdict_rows, 0, "replaying a recorded verdict must not write a fresh agent_invoke/verdict event");

    let max_iteration = store.get_max_iteration_for_phase(&run.id, "1").await.unwrap();
    assert_eq!(max_iteration, Some(1), "replay must not append a duplicate agent_results row");
}

#[tokio::test]
async fn auto_retry_ceiling_aborts_after_persistent_escalations() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = write_plan(&dir, "## Phase 1: Setup\n");
    let plan_path_str = plan_path.canonicalize().unwrap().to_string_lossy().into_owned();

    let store = Store::open_in_memory().await.unwrap();
    let run = store.create_run(&plan_path_str, RunCommand::Run).await.unwrap();

    let adapter = Arc::new(ScriptedAgentAdapter::new(vec![
        ScriptedResponse::Status(AuthorStatus::Complete { commit: Some("c1".into()), notes: None }),
        ScriptedResponse::Verdict(ReviewerVerdict {
            readiness: Readiness::NotReady,
            items: vec![item(ItemAction::HumanRequired)],
            summary: Some("needs a human call".into()),
        }),
        // Persistent autofix failures: each retries AUTO_FIX until the
        // ceiling trips regardless of how many the reviewer would have liked.
        ScriptedResponse::Status(AuthorStatus::NeedsHuman { reason: Some("r1".into()), notes: None }),
        ScriptedResponse::Status(AuthorStatus::NeedsHuman { reason: Some("r2".into()), notes: None }),
    ]));
    let quality = Arc::new(ScriptedQualityRunner::new(vec![passing_report()]));
    let gates = Arc::new(HeadlessGates);
    let mut config = Config::default();
    config.max_auto_retries = 2;

    let engine = PhaseExecutionLoop::new(store.clone(), adapter, quality, gates, config, options(&dir, true));
    let outcome = engine.run(&plan_path).await.unwrap();
    assert!(matches!(outcome, PhaseLoopOutcome::Aborted { .. }));

    let events = store.list_run_events(&run.id).await.unwrap();
    let escalations = events.iter().filter(|e| e.event_type == "escalation").count();
    assert!(escalations >= 3, "expected at least 3 escalations before the ceiling tripped, got {escalations}");
}

/// Rewrites the plan file to add a bogus phase the first time it is invoked,
/// simulating an author that renumbers phases mid-run.
struct RenumberingAdapter {
    inner: ScriptedAgentAdapter,
    plan_path: PathBuf,
    rewritten: AtomicBool,
}

#[async_trait]
impl AgentAdapter for RenumberingAdapter {
    async fn invoke_for_status(&self, opts: InvokeOptions) -> Result<InvokeStatus, AdapterError> {
        if !self.rewritten.swap(true, Ordering::SeqCst) {
            std::fs::write(&self.plan_path, "## Phase 7: Renamed\n").unwrap();
        }
        self.inner.invoke_for_status(opts).await
    }

    async fn invoke_for_verdict(&self, opts: InvokeOptions) -> Result<InvokeVerdict, AdapterError> {
        self.inner.invoke_for_verdict(opts).await
    }
}

#[tokio::test]
async fn plan_renumbering_mid_run_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = write_plan(&dir, "## Phase 1: Setup\n");

    let store = Store::open_in_memory().await.unwrap();
    let inner = ScriptedAgentAdapter::new(vec![
        ScriptedResponse::Status(AuthorStatus::Complete { commit: Some("c1".into()), notes: None }),
        ScriptedResponse::Verdict(ReviewerVerdict { readiness: Readiness::Ready, items: vec![], summary: None }),
    ]);
    let adapter = Arc::new(RenumberingAdapter { inner, plan_path: plan_path.clone(), rewritten: AtomicBool::new(false) });
    let quality = Arc::new(ScriptedQualityRunner::new(vec![passing_report()]));
    let gates = Arc::new(HeadlessGates);
    let config = Config::default();

    let engine = PhaseExecutionLoop::new(store, adapter, quality, gates, config, options(&dir, true));
    let result = engine.run(&plan_path).await;
    assert!(matches!(result, Err(phaseloop::Error::PlanRenumbered(_))));
}
