//! Containment replay over a recorded audit trail.
//!
//! Replays records in sequence order and checks, per request, that:
//!
//! - a request whose route record is sensitive has no stage record that
//!   executed on or attempted `cloud`
//! - no route record grants `cloud` to a sensitive request
//! - every stage record follows the request's route record
//! - nothing is recorded for a request after its terminal record
//!
//! The same checks back `sentinel audit check` and the integration tests.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use sentinel_audit::{AuditKind, AuditRecord};

/// One broken guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainmentViolation {
    pub request_id: String,
    pub seq: u64,
    pub reason: String,
}

/// Outcome of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainmentReport {
    pub records_checked: usize,
    pub requests_checked: usize,
    pub sensitive_requests: usize,
    pub violations: Vec<ContainmentViolation>,
}

impl ContainmentReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Default)]
struct RequestState {
    routed: bool,
    sensitive: bool,
    terminated: bool,
}

fn violation(report: &mut ContainmentReport, id: &str, seq: u64, reason: String) {
    report.violations.push(ContainmentViolation {
        request_id: id.to_string(),
        seq,
        reason,
    });
}

fn touches_cloud(record: &AuditRecord) -> bool {
    record.payload_str("target") == Some("cloud")
        || record
            .payload
            .get("attempted_targets")
            .and_then(|v| v.as_array())
            .is_some_and(|targets| targets.iter().any(|t| t.as_str() == Some("cloud")))
}

fn route_grants_cloud(record: &AuditRecord) -> bool {
    record
        .payload
        .get("routes")
        .and_then(|r| r.as_object())
        .is_some_and(|routes| {
            routes.values().any(|targets| {
                targets
                    .as_array()
                    .is_some_and(|t| t.iter().any(|x| x.as_str() == Some("cloud")))
            })
        })
}

/// Replay `records` and report every containment violation found.
pub fn check_containment(records: &[AuditRecord]) -> ContainmentReport {
    let mut report = ContainmentReport {
        records_checked: records.len(),
        ..Default::default()
    };
    let mut requests: BTreeMap<&str, RequestState> = BTreeMap::new();
    let mut sensitive: BTreeSet<&str> = BTreeSet::new();

    for record in records {
        let Some(id) = record.request_id.as_deref() else {
            continue;
        };
        let state = requests.entry(id).or_default();

        if state.terminated {
            violation(
                &mut report,
                id,
                record.seq,
                format!("{} recorded after terminal record", record.kind),
            );
            continue;
        }

        match record.kind {
            AuditKind::RouteDecided => {
                state.routed = true;
                state.sensitive = record
                    .payload
                    .get("sensitive")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if state.sensitive {
                    sensitive.insert(id);
                    if route_grants_cloud(record) {
                        violation(
                            &mut report,
                            id,
                            record.seq,
                            "sensitive request routed with cloud permitted".to_string(),
                        );
                    }
                }
            }
            kind if kind.is_stage() => {
                if !state.routed {
                    violation(
                        &mut report,
                        id,
                        record.seq,
                        format!("{kind} recorded before route decision"),
                    );
                }
                if state.sensitive && touches_cloud(record) {
                    violation(
                        &mut report,
                        id,
                        record.seq,
                        format!("sensitive request executed on cloud ({kind})"),
                    );
                }
            }
            kind if kind.is_terminal() => state.terminated = true,
            _ => {}
        }
    }

    report.requests_checked = requests.len();
    report.sensitive_requests = sensitive.len();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_audit::{AuditEntry, GENESIS_DIGEST};
    use serde_json::json;

    fn trail(entries: Vec<AuditEntry>) -> Vec<AuditRecord> {
        let mut prev = GENESIS_DIGEST.to_string();
        entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                let rec = AuditRecord::seal(e, i as u64, Utc::now(), &prev).unwrap();
                prev = rec.digest.clone();
                rec
            })
            .collect()
    }

    fn route(id: &str, sensitive: bool, inference: &[&str]) -> AuditEntry {
        AuditEntry::for_request(
            AuditKind::RouteDecided,
            id,
            json!({ "sensitive": sensitive, "routes": { "inference": inference } }),
        )
    }

    fn stage(id: &str, target: &str) -> AuditEntry {
        AuditEntry::for_request(
            AuditKind::StageCompleted,
            id,
            json!({ "stage": "inference", "target": target, "attempted_targets": [target] }),
        )
    }

    fn finished(id: &str) -> AuditEntry {
        AuditEntry::for_request(AuditKind::RunFinished, id, json!({ "disposition": "completed" }))
    }

    #[test]
    fn test_clean_trail() {
        let records = trail(vec![
            route("a", true, &["local"]),
            stage("a", "local"),
            finished("a"),
            route("b", false, &["local", "cloud"]),
            stage("b", "cloud"),
            finished("b"),
        ]);
        let report = check_containment(&records);
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.requests_checked, 2);
        assert_eq!(report.sensitive_requests, 1);
    }

    #[test]
    fn test_sensitive_cloud_stage_is_flagged() {
        let records = trail(vec![route("a", true, &["local"]), stage("a", "cloud")]);
        let report = check_containment(&records);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].seq, 1);
    }

    #[test]
    fn test_sensitive_route_granting_cloud_is_flagged() {
        let records = trail(vec![route("a", true, &["local", "cloud"])]);
        assert_eq!(check_containment(&records).violations.len(), 1);
    }

    #[test]
    fn test_record_after_terminal_is_flagged() {
        let records = trail(vec![
            route("a", false, &["local"]),
            finished("a"),
            stage("a", "local"),
        ]);
        let report = check_containment(&records);
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].reason.contains("after terminal"));
    }

    #[test]
    fn test_stage_before_route_is_flagged() {
        let records = trail(vec![stage("a", "local")]);
        assert!(check_containment(&records).violations[0]
            .reason
            .contains("before route"));
    }

    #[test]
    fn test_violation_record_with_blocked_target_is_not_execution() {
        let records = trail(vec![
            route("a", true, &["local"]),
            AuditEntry::for_request(
                AuditKind::RoutingViolation,
                "a",
                json!({ "stage": "inference", "blocked_target": "cloud" }),
            ),
            finished("a"),
        ]);
        assert!(check_containment(&records).is_clean());
    }
}
