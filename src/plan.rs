//! Plan parsing: Markdown into an ordered, stably-numbered phase list.
//!
//! Headings of the form `## Phase N: Title` delimit phases; unchecked/checked
//! list items under a heading form that phase's completion checklist. The
//! checklist is informational only — gating reads `phase_progress.approved`,
//! never the checklist.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::{Error, Result};

/// One checklist line under a phase heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistItem {
    pub text: String,
    pub checked: bool,
}

/// A single phase of an implementation plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    /// Stable textual phase number, e.g. "1", "1.1", "20".
    pub number: String,
    pub title: String,
    pub checklist: Vec<ChecklistItem>,
}

/// A parsed implementation plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Canonical absolute path to the plan file.
    pub path: PathBuf,
    pub phases: Vec<Phase>,
}

fn heading_regex() -> Regex {
    Regex::new(r"(?m)^##\s*Phase\s+([0-9]+(?:\.[0-9]+)*)\s*:\s*(.+?)\s*$").unwrap()
}

fn checklist_regex() -> Regex {
    Regex::new(r"(?m)^\s*-\s*\[( |x|X)\]\s*(.+?)\s*$").unwrap()
}

impl Plan {
    /// Parses a plan from Markdown source. `path` is stored verbatim (the
    /// caller is responsible for canonicalizing it before this call, per
    /// the "canonical absolute path is the primary key" contract).
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let heading_re = heading_regex();
        let checklist_re = checklist_regex();

        let headings: Vec<_> = heading_re.captures_iter(content).collect();
        let mut phases = Vec::with_capacity(headings.len());

        for (i, cap) in headings.iter().enumerate() {
            let number = cap[1].to_string();
            let title = cap[2].to_string();
            let whole = cap.get(0).unwrap();

            let body_start = whole.end();
            let body_end = headings
                .get(i + 1)
                .map(|next| next.get(0).unwrap().start())
                .unwrap_or(content.len());
            let body = &content[body_start..body_end];

            let checklist = checklist_re
                .captures_iter(body)
                .map(|c| ChecklistItem {
                    checked: c[1].eq_ignore_ascii_case("x"),
                    text: c[2].to_string(),
                })
                .collect();

            phases.push(Phase {
                number,
                title,
                checklist,
            });
        }

        let mut seen = HashSet::new();
        for phase in &phases {
            if !seen.insert(phase.number.clone()) {
                return Err(Error::Plan(format!(
                    "duplicate phase number {} in {}",
                    phase.number,
                    path.display()
                )));
            }
        }

        Ok(Plan {
            path: path.to_path_buf(),
            phases,
        })
    }

    pub fn phase(&self, number: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.number == number)
    }

    pub fn phase_numbers(&self) -> HashSet<String> {
        self.phases.iter().map(|p| p.number.clone()).collect()
    }

    /// Phases not yet in `approved`, in plan order.
    pub fn pending_phases<'a>(&'a self, approved: &HashSet<String>) -> Vec<&'a Phase> {
        self.phases
            .iter()
            .filter(|p| !approved.contains(&p.number))
            .collect()
    }
}

/// Detects an illegal mid-run renumbering: the set of phase IDs must be
/// identical before and after a re-parse (additions are fine, anything else
/// is fatal — per spec, renumbering is detected via set equality, so a
/// reordering without an actual ID change is not itself flagged here; callers
/// compare the specific invariant they need).
pub fn phase_ids_unchanged(before: &HashSet<String>, after: &HashSet<String>) -> bool {
    before.is_subset(after)
}

/// Sanitizes a phase number into the `[0-9A-Za-z._-]` character class used in
/// per-phase review filenames.
pub fn sanitize_phase_token(phase: &str) -> String {
    static INVALID: once_cell_lite::Lazy<Regex> =
        once_cell_lite::Lazy::new(|| Regex::new(r"[^0-9A-Za-z._-]").unwrap());
    INVALID.replace_all(phase, "").into_owned()
}

/// A tiny inline replacement for `once_cell::sync::Lazy` scoped to this
/// module — avoids pulling in a new dependency for a single call site.
mod once_cell_lite {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self {
                cell: OnceLock::new(),
                init,
            }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

/// Resolves the review-file path for one phase given a configured template.
///
/// If `template` contains a `{phase}` token, it is substituted with the
/// sanitized phase number. Otherwise a new filename is derived from the
/// plan's stem: `<base>-phase-<token>-review.md`. A pre-existing single-file
/// review at the un-substituted template path is deliberately never reused
/// across phases to avoid cross-phase contamination.
pub fn resolve_phase_review_path(plan_path: &Path, template: &str, phase: &str) -> PathBuf {
    let token = sanitize_phase_token(phase);
    if template.contains("{phase}") {
        return PathBuf::from(template.replace("{phase}", &token));
    }

    let base = plan_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plan".to_string());
    let dir = plan_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{base}-phase-{token}-review.md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_phases_with_checklists() {
        let content = "\
# Title

## Phase 1: Set up scaffolding

- [x] create crate
- [ ] wire ci

## Phase 1.1: Sub-phase

Some prose.

## Phase 20: Final polish

- [ ] done
";
        let plan = Plan::parse(Path::new("/tmp/plan.md"), content).unwrap();
        assert_eq!(plan.phases.len(), 3);
        assert_eq!(plan.phases[0].number, "1");
        assert_eq!(plan.phases[0].title, "Set up scaffolding");
        assert_eq!(plan.phases[0].checklist.len(), 2);
        assert!(plan.phases[0].checklist[0].checked);
        assert!(!plan.phases[0].checklist[1].checked);
        assert_eq!(plan.phases[1].number, "1.1");
        assert_eq!(plan.phases[2].number, "20");
    }

    #[test]
    fn rejects_duplicate_phase_numbers() {
        let content = "## Phase 1: A\n## Phase 1: B\n";
        let result = Plan::parse(Path::new("/tmp/plan.md"), content);
        assert!(result.is_err());
    }

    #[test]
    fn pending_phases_excludes_approved() {
        let content = "## Phase 1: A\n## Phase 2: B\n";
        let plan = Plan::parse(Path::new("/tmp/plan.md"), content).unwrap();
        let mut approved = HashSet::new();
        approved.insert("1".to_string());
        let pending = plan.pending_phases(&approved);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].number, "2");
    }

    #[test]
    fn sanitizes_phase_token() {
        assert_eq!(sanitize_phase_token("1.1"), "1.1");
        assert_eq!(sanitize_phase_token("1/../etc"), "1..etc");
        assert_eq!(sanitize_phase_token("phase 1!"), "phase1");
    }

    #[test]
    fn resolves_review_path_with_token() {
        let path = resolve_phase_review_path(Path::new("/plans/impl.md"), "reviews/{phase}.md", "1.1");
        assert_eq!(path, PathBuf::from("reviews/1.1.md"));
    }

    #[test]
    fn resolves_review_path_without_token() {
        let path = resolve_phase_review_path(Path::new("/plans/impl.md"), "", "2");
        assert_eq!(path, PathBuf::from("/plans/impl-phase-2-review.md"));
    }
}
