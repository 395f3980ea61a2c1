//! Pipeline stages, execution targets, and route decisions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::request::{ModelMode, RequestId};

/// Pipeline stage, in fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    ContextRetrieval,
    Symbolic,
    Inference,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Parse,
        Stage::ContextRetrieval,
        Stage::Symbolic,
        Stage::Inference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::ContextRetrieval => "context_retrieval",
            Stage::Symbolic => "symbolic",
            Stage::Inference => "inference",
        }
    }

    /// Aggregation priority: lower sorts first in the final summary.
    pub fn priority(&self) -> u8 {
        match self {
            Stage::Parse => 0,
            Stage::Symbolic => 1,
            Stage::ContextRetrieval => 2,
            Stage::Inference => 3,
        }
    }

    /// Only inference may ever be routed off the machine.
    pub fn cloud_capable(&self) -> bool {
        matches!(self, Stage::Inference)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    Local,
    Cloud,
}

impl ExecutionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionTarget::Local => "local",
            ExecutionTarget::Cloud => "cloud",
        }
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permitted targets for one stage, in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRoute {
    pub stage: Stage,
    pub targets: Vec<ExecutionTarget>,
}

/// Sensitivity verdict with the signals that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sensitivity {
    pub sensitive: bool,
    pub reasons: Vec<String>,
}

impl Sensitivity {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn flag(&mut self, reason: impl Into<String>) {
        self.sensitive = true;
        self.reasons.push(reason.into());
    }
}

/// Output of policy evaluation for one request. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub request_id: RequestId,
    pub policy_version: u64,
    pub mode: ModelMode,
    pub sensitivity: Sensitivity,
    pub air_gapped: bool,
    /// A team override pinned this path to local execution.
    pub forced_local: bool,
    pub routes: Vec<StageRoute>,
}

impl RouteDecision {
    /// Permitted targets for `stage`, in preference order. Empty means the
    /// stage may not run at all.
    pub fn targets(&self, stage: Stage) -> &[ExecutionTarget] {
        self.routes
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.targets.as_slice())
            .unwrap_or(&[])
    }

    pub fn permits(&self, stage: Stage, target: ExecutionTarget) -> bool {
        self.targets(stage).contains(&target)
    }

    /// `true` when any stage may leave the machine.
    pub fn cloud_permitted(&self) -> bool {
        self.routes
            .iter()
            .any(|r| r.targets.contains(&ExecutionTarget::Cloud))
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitivity.sensitive
    }

    /// Structured payload recorded in the audit log.
    pub fn audit_payload(&self) -> serde_json::Value {
        let routes: serde_json::Map<String, serde_json::Value> = self
            .routes
            .iter()
            .map(|r| {
                (
                    r.stage.as_str().to_string(),
                    serde_json::json!(r.targets.iter().map(|t| t.as_str()).collect::<Vec<_>>()),
                )
            })
            .collect();
        serde_json::json!({
            "policy_version": self.policy_version,
            "mode": self.mode.as_str(),
            "sensitive": self.sensitivity.sensitive,
            "reasons": self.sensitivity.reasons,
            "air_gapped": self.air_gapped,
            "forced_local": self.forced_local,
            "routes": routes,
        })
    }
}
