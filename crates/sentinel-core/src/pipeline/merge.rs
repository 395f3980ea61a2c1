//! Cross-stage issue deduplication.

use std::collections::HashMap;

use crate::domain::{Issue, IssueKey};

#[derive(Debug)]
struct Slot {
    issue: Issue,
    /// Discovery order of the first sighting of this key.
    order: usize,
}

/// Deduplicates issues by `(kind, location)`, keeping the highest severity.
///
/// Equal severities keep the earlier classification. An upgrade replaces
/// the stored issue wholesale, so its stage, message, and compliance tags
/// come from the stage that produced the higher severity.
#[derive(Debug, Default)]
pub struct IssueMerger {
    slots: HashMap<IssueKey, Slot>,
    next_order: usize,
}

impl IssueMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an issue. Returns the issue to stream when it is new or a
    /// severity upgrade; `None` when an equal or higher duplicate exists.
    pub fn offer(&mut self, issue: Issue) -> Option<Issue> {
        let key = issue.key();
        match self.slots.get_mut(&key) {
            Some(slot) if issue.severity > slot.issue.severity => {
                slot.issue = issue.clone();
                Some(issue)
            }
            Some(_) => None,
            None => {
                let order = self.next_order;
                self.next_order += 1;
                self.slots.insert(
                    key,
                    Slot {
                        issue: issue.clone(),
                        order,
                    },
                );
                Some(issue)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Merged issues ordered by stage priority, then discovery order.
    pub fn finalize(&self) -> Vec<Issue> {
        let mut slots: Vec<&Slot> = self.slots.values().collect();
        slots.sort_by_key(|s| (s.issue.stage.priority(), s.order));
        slots.into_iter().map(|s| s.issue.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssueKind, Location, Severity, Stage};

    fn issue(kind: &str, line: u32, severity: Severity, stage: Stage) -> Issue {
        Issue::new(
            IssueKind::new(kind),
            severity,
            Location::new("a.py", line, 1),
            format!("{kind} from {stage}"),
            stage,
        )
    }

    #[test]
    fn test_duplicate_with_lower_or_equal_severity_is_dropped() {
        let mut m = IssueMerger::new();
        assert!(m.offer(issue("weak-hash", 2, Severity::High, Stage::Symbolic)).is_some());
        assert!(m.offer(issue("weak-hash", 2, Severity::High, Stage::Inference)).is_none());
        assert!(m.offer(issue("weak-hash", 2, Severity::Low, Stage::Inference)).is_none());
        assert_eq!(m.len(), 1);
        assert_eq!(m.finalize()[0].stage, Stage::Symbolic);
    }

    #[test]
    fn test_upgrade_is_reemitted_and_kept() {
        let mut m = IssueMerger::new();
        m.offer(issue("weak-hash", 2, Severity::Low, Stage::Symbolic));
        let upgraded = m
            .offer(issue("weak-hash", 2, Severity::Critical, Stage::Inference))
            .unwrap();
        assert_eq!(upgraded.severity, Severity::Critical);
        let merged = m.finalize();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].severity, Severity::Critical);
        assert_eq!(merged[0].stage, Stage::Inference);
    }

    #[test]
    fn test_finalize_orders_by_stage_priority_then_discovery() {
        let mut m = IssueMerger::new();
        m.offer(issue("model-finding", 9, Severity::High, Stage::Inference));
        m.offer(issue("dynamic-eval", 5, Severity::Medium, Stage::Symbolic));
        m.offer(issue("weak-hash", 1, Severity::Medium, Stage::Symbolic));
        let lines: Vec<u32> = m.finalize().iter().map(|i| i.location.line).collect();
        assert_eq!(lines, vec![5, 1, 9]);
    }

    #[test]
    fn test_same_kind_different_location_is_distinct() {
        let mut m = IssueMerger::new();
        m.offer(issue("weak-hash", 1, Severity::Medium, Stage::Symbolic));
        m.offer(issue("weak-hash", 2, Severity::Medium, Stage::Symbolic));
        assert_eq!(m.len(), 2);
    }
}
