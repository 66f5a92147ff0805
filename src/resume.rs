//! Iteration accounting and legacy-state mapping for resume.
//!
//! Kept in its own module, per the teacher's own note about its legacy
//! resume-state table, so this mapping can be deleted independently of the
//! state machine once runs recorded under the legacy labels age out.

use crate::phase_loop::PhaseState;

/// Maps a persisted state label to its current `PhaseState`, translating
/// legacy labels recorded before the state machine was renamed.
pub fn resolve_persisted_state(label: &str) -> Option<PhaseState> {
    match label {
        "Execute" | "ParseAuthorStatus" => Some(PhaseState::Execute),
        "QualityCheck" => Some(PhaseState::QualityCheck),
        "QualityRetry" => Some(PhaseState::QualityRetry),
        "Review" | "ParseVerdict" => Some(PhaseState::Review),
        "AutoFix" | "ParseFixStatus" => Some(PhaseState::AutoFix),
        "Escalate" => Some(PhaseState::Escalate),
        "PhaseGate" => Some(PhaseState::PhaseGate),
        "PhaseComplete" => Some(PhaseState::PhaseComplete),
        "Aborted" => Some(PhaseState::Aborted),
        _ => None,
    }
}

/// Computes the next fresh iteration for a phase: the first invocation for a
/// phase is iteration 0, every subsequent one is the DB max plus one.
/// Replaying an interrupted step that already recorded its `agent_results`
/// row (rather than invoking fresh) is a separate decision the caller makes
/// via `Store::has_completed_step` at the *current* max iteration — this
/// function only ever hands out iterations that don't exist yet.
pub fn next_iteration(max_iteration: Option<i64>) -> i64 {
    max_iteration.map(|m| m + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_labels_map_to_current_states() {
        assert_eq!(resolve_persisted_state("ParseAuthorStatus"), Some(PhaseState::Execute));
        assert_eq!(resolve_persisted_state("ParseVerdict"), Some(PhaseState::Review));
        assert_eq!(resolve_persisted_state("ParseFixStatus"), Some(PhaseState::AutoFix));
    }

    #[test]
    fn current_labels_map_to_themselves() {
        assert_eq!(resolve_persisted_state("Execute"), Some(PhaseState::Execute));
        assert_eq!(resolve_persisted_state("Aborted"), Some(PhaseState::Aborted));
    }

    #[test]
    fn unknown_label_resolves_to_none() {
        assert_eq!(resolve_persisted_state("SomethingElse"), None);
    }

    #[test]
    fn first_invocation_for_a_phase_is_iteration_zero() {
        assert_eq!(next_iteration(None), 0);
    }

    #[test]
    fn subsequent_invocations_increment_past_max() {
        assert_eq!(next_iteration(Some(0)), 1);
        assert_eq!(next_iteration(Some(3)), 4);
    }
}
