//! Model inference backends.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::CapabilityResult;
use super::syntax::SyntaxTree;
use crate::context::ContextChunk;
use crate::domain::{ExecutionTarget, Issue, RequestId};

/// Everything a backend sees for one inference call.
#[derive(Debug, Clone)]
pub struct InferenceInput {
    pub request_id: RequestId,
    pub tree: Arc<SyntaxTree>,
    pub context: Vec<ContextChunk>,
    /// Findings from the symbolic stage, offered as hints.
    pub annotations: Vec<Issue>,
    /// The route decision marked the file sensitive.
    pub sensitive: bool,
}

/// A model backend bound to one execution target.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn target(&self) -> ExecutionTarget;

    fn name(&self) -> &str;

    /// Cheap readiness probe.
    async fn is_available(&self) -> bool;

    async fn infer(&self, input: &InferenceInput) -> CapabilityResult<Vec<Issue>>;
}

/// The configured local and cloud backends.
#[derive(Clone, Default)]
pub struct InferenceBackends {
    local: Option<Arc<dyn InferenceBackend>>,
    cloud: Option<Arc<dyn InferenceBackend>>,
}

impl InferenceBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_cloud(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.cloud = Some(backend);
        self
    }

    /// Backend for `target`. A backend registered under the wrong slot is
    /// never returned.
    pub fn get(&self, target: ExecutionTarget) -> Option<&Arc<dyn InferenceBackend>> {
        let slot = match target {
            ExecutionTarget::Local => self.local.as_ref(),
            ExecutionTarget::Cloud => self.cloud.as_ref(),
        };
        slot.filter(|b| b.target() == target)
    }
}

impl std::fmt::Debug for InferenceBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceBackends")
            .field("local", &self.local.as_ref().map(|b| b.name().to_string()))
            .field("cloud", &self.cloud.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StaticInference;

    #[test]
    fn test_get_respects_target_slot() {
        let local = Arc::new(StaticInference::new(ExecutionTarget::Local, vec![]));
        let misplaced = Arc::new(StaticInference::new(ExecutionTarget::Local, vec![]));
        let backends = InferenceBackends::new()
            .with_local(local)
            .with_cloud(misplaced);
        assert!(backends.get(ExecutionTarget::Local).is_some());
        assert!(backends.get(ExecutionTarget::Cloud).is_none());
    }
}
