//! Row types returned by the store. Plain data, no behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCommand {
    Run,
    PlanReview,
}

impl RunCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunCommand::Run => "run",
            RunCommand::PlanReview => "plan_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "run" => Some(RunCommand::Run),
            "plan_review" => Some(RunCommand::PlanReview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Active => "active",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RunStatus::Active),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "aborted" => Some(RunStatus::Aborted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Author,
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Author => "author",
            Role::Reviewer => "reviewer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Status,
    Verdict,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Status => "status",
            ResultType::Verdict => "verdict",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub plan_path: String,
    pub command: RunCommand,
    pub status: RunStatus,
    pub current_phase: Option<String>,
    pub current_state: Option<String>,
    pub review_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AgentResultRow {
    pub id: String,
    pub run_id: String,
    pub phase: String,
    pub iteration: i64,
    pub role: Role,
    pub template: String,
    pub result_type: ResultType,
    pub result_json: String,
    pub duration_ms: i64,
    pub log_path: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct QualityResultRow {
    pub id: String,
    pub run_id: String,
    pub phase: String,
    pub attempt: i64,
    pub passed: bool,
    pub results: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct PhaseProgressRow {
    pub plan_path: String,
    pub phase: String,
    pub implementation_done: bool,
    pub review_outcome: Option<String>,
    pub approved: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunEventRow {
    pub run_id: String,
    pub seq: i64,
    pub event_type: String,
    pub phase: Option<String>,
    pub iteration: Option<i64>,
    pub data: serde_json::Value,
    pub ts: DateTime<Utc>,
}
