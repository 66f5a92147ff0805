//! Structured agent outputs.
//!
//! Model responses are modeled as tagged sum types with a single invariant
//! assertion per type, called at the boundary where the value enters the
//! orchestrator. Downstream code pattern-matches the tag and never re-parses.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Outcome reported by the author agent for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AuthorStatus {
    Complete {
        commit: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    NeedsHuman {
        reason: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    Failed {
        reason: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
}

impl AuthorStatus {
    pub fn notes(&self) -> Option<&str> {
        match self {
            AuthorStatus::Complete { notes, .. }
            | AuthorStatus::NeedsHuman { notes, .. }
            | AuthorStatus::Failed { notes, .. } => notes.as_deref(),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AuthorStatus::NeedsHuman { reason, .. } | AuthorStatus::Failed { reason, .. } => {
                reason.as_deref()
            }
            AuthorStatus::Complete { .. } => None,
        }
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            AuthorStatus::Complete { commit, .. } => commit.as_deref(),
            _ => None,
        }
    }
}

/// Which states require a `commit` on an author `complete` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitRequirement {
    Required,
    NotRequired,
}

/// Validates an `AuthorStatus` against the protocol invariants:
/// `complete` at EXECUTE/AUTO_FIX requires `commit`; `needs_human` and
/// `failed` require `reason`.
pub fn assert_author_status(status: &AuthorStatus, commit_requirement: CommitRequirement) -> Result<()> {
    match status {
        AuthorStatus::Complete { commit, .. } => {
            if commit_requirement == CommitRequirement::Required && commit.as_deref().unwrap_or("").is_empty() {
                return Err(Error::Invariant(
                    "author status complete requires a non-empty commit".to_string(),
                ));
            }
        }
        AuthorStatus::NeedsHuman { reason, .. } => {
            if reason.as_deref().unwrap_or("").is_empty() {
                return Err(Error::Invariant(
                    "author status needs_human requires a reason".to_string(),
                ));
            }
        }
        AuthorStatus::Failed { reason, .. } => {
            if reason.as_deref().unwrap_or("").is_empty() {
                return Err(Error::Invariant(
                    "author status failed requires a reason".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Overall readiness classification from the reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    ReadyWithCorrections,
    NotReady,
}

/// What should happen with one reviewer finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    AutoFix,
    HumanRequired,
    Informational,
}

/// A single actionable (or informational) finding from the reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub action: ItemAction,
    pub reason: String,
    pub priority: Option<String>,
}

/// Structured reviewer output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewerVerdict {
    pub readiness: Readiness,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ReviewerVerdict {
    pub fn has_human_required(&self) -> bool {
        self.items.iter().any(|i| i.action == ItemAction::HumanRequired)
    }

    pub fn has_auto_fix(&self) -> bool {
        self.items.iter().any(|i| i.action == ItemAction::AutoFix)
    }

    /// True when every item is `informational` (or there are none at all for
    /// a non-ready verdict) — the "no actionable items" case that escalates.
    pub fn has_only_informational(&self) -> bool {
        !self.has_human_required() && !self.has_auto_fix()
    }
}

/// Validates a `ReviewerVerdict` against the protocol invariants: `ready`
/// implies empty `items`; `ready_with_corrections`/`not_ready` imply
/// non-empty `items`.
pub fn assert_reviewer_verdict(verdict: &ReviewerVerdict) -> Result<()> {
    match verdict.readiness {
        Readiness::Ready => {
            if !verdict.items.is_empty() {
                return Err(Error::Invariant(
                    "reviewer verdict ready requires empty items".to_string(),
                ));
            }
        }
        Readiness::ReadyWithCorrections | Readiness::NotReady => {
            if verdict.items.is_empty() {
                return Err(Error::Invariant(format!(
                    "reviewer verdict {:?} requires non-empty items",
                    verdict.readiness
                )));
            }
        }
    }
    Ok(())
}
