//! phaseloop: author/reviewer phase execution engine.
//!
//! Drives two LLM agents — an author that edits code and a reviewer that
//! critiques the result — through a multi-phase implementation plan. For each
//! phase it invokes the author, runs configurable quality gates, invokes the
//! reviewer, routes on the reviewer's structured verdict, and advances only
//! when the current phase is approved. Progress is durably persisted so an
//! interrupted run resumes from the exact state it left.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            PhaseExecutionLoop             │
//! │  EXECUTE → QUALITY_CHECK → REVIEW → ...   │
//! └───────────────────┬────────────────────────┘
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │   AgentAdapter · QualityRunner · Gates    │
//! └───────────────────┬────────────────────────┘
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │         Store (SQLite, durable)           │
//! └──────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod cancel;
pub mod config;
pub mod gates;
pub mod phase_loop;
pub mod plan;
pub mod plan_review_loop;
pub mod protocol;
pub mod quality;
pub mod resume;
pub mod store;

pub use adapter::{AdapterError, AgentAdapter, InvokeOptions, InvokeStatus, InvokeVerdict};
pub use cancel::CancellationToken;
pub use config::Config;
pub use gates::{EscalationDecision, Gates, HeadlessGates, HumanDecision, PhaseGateDecision, ResumeDecision};
pub use phase_loop::{PhaseExecutionLoop, PhaseLoopOptions, PhaseLoopOutcome};
pub use plan::{Phase, Plan};
pub use plan_review_loop::{PlanReviewLoop, PlanReviewOutcome};
pub use protocol::{AuthorStatus, Item, ItemAction, Readiness, ReviewerVerdict};
pub use quality::{QualityReport, QualityRunner};
pub use store::Store;

/// Crate-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("schema mismatch: database is at version {db_version}, binary supports {binary_version}")]
    SchemaMismatch {
        db_version: i64,
        binary_version: i64,
    },

    #[error("adapter error: {0}")]
    Adapter(#[from] adapter::AdapterError),

    #[error("quality gate error: {0}")]
    Quality(String),

    #[error("plan error: {0}")]
    Plan(String),

    #[error("plan phase IDs changed mid-run: {0}")]
    PlanRenumbered(String),

    #[error("orchestration error: {0}")]
    Loop(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
