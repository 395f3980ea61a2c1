//! Policy router. Fails closed and defaults to local execution.

use super::model::Policy;
use super::sensitivity::assess;
use crate::domain::{AnalysisRequest, ExecutionTarget, ModelMode, RouteDecision, Stage, StageRoute};

/// Classify `request` against `policy` and produce its [`RouteDecision`].
///
/// Pure with respect to mutable state: the result depends only on the
/// request and the policy snapshot passed in. Every stage is permitted
/// `local`. Cloud-capable stages additionally permit `cloud` only when the
/// policy is not air-gapped, the file is not sensitive, no override pins it
/// local, and the user mode is `cloud` or `auto`.
pub fn classify(request: &AnalysisRequest, policy: &Policy) -> RouteDecision {
    let assessment = assess(request, policy);

    let cloud_eligible = !policy.air_gapped
        && !assessment.sensitivity.sensitive
        && !assessment.forced_local
        && matches!(request.mode, ModelMode::Cloud | ModelMode::Auto);

    let routes = Stage::ALL
        .iter()
        .map(|&stage| StageRoute {
            stage,
            targets: targets_for(stage, request.mode, cloud_eligible),
        })
        .collect();

    RouteDecision {
        request_id: request.id.clone(),
        policy_version: policy.version,
        mode: request.mode,
        sensitivity: assessment.sensitivity,
        air_gapped: policy.air_gapped,
        forced_local: assessment.forced_local,
        routes,
    }
}

fn targets_for(stage: Stage, mode: ModelMode, cloud_eligible: bool) -> Vec<ExecutionTarget> {
    if !stage.cloud_capable() || !cloud_eligible {
        return vec![ExecutionTarget::Local];
    }
    match mode {
        ModelMode::Cloud => vec![ExecutionTarget::Cloud, ExecutionTarget::Local],
        _ => vec![ExecutionTarget::Local, ExecutionTarget::Cloud],
    }
}
