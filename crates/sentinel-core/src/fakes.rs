//! In-memory capability fakes (testing only)
//!
//! Deterministic stand-ins for the inference, symbolic, and embedding
//! capabilities. Each can be delayed or made to fail so tests can drive the
//! coordinator through timeouts, fallbacks, and refusals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{
    CapabilityError, CapabilityResult, InferenceBackend, InferenceInput, SymbolicAnalyzer,
    SyntaxTree,
};
use crate::context::{ContextChunk, Embedder, HashingEmbedder};
use crate::domain::{ExecutionTarget, Issue};

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(String),
    RefuseSensitive,
}

/// Inference backend returning a fixed set of issues.
#[derive(Debug)]
pub struct StaticInference {
    target: ExecutionTarget,
    issues: Vec<Issue>,
    delay: Option<Duration>,
    available: bool,
    behavior: Behavior,
    calls: AtomicUsize,
    received: Mutex<Vec<ContextChunk>>,
}

impl StaticInference {
    pub fn new(target: ExecutionTarget, issues: Vec<Issue>) -> Self {
        Self {
            target,
            issues,
            delay: None,
            available: true,
            behavior: Behavior::Succeed,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every `infer` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report unavailable from the readiness probe.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.behavior = Behavior::Fail(message.into());
        self
    }

    /// Refuse sensitive input the way a real cloud backend does.
    pub fn refusing_sensitive(mut self) -> Self {
        self.behavior = Behavior::RefuseSensitive;
        self
    }

    /// Number of `infer` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every context chunk passed to `infer`, across all calls.
    pub fn received_context(&self) -> Vec<ContextChunk> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl InferenceBackend for StaticInference {
    fn target(&self) -> ExecutionTarget {
        self.target
    }

    fn name(&self) -> &str {
        match self.target {
            ExecutionTarget::Local => "static-local",
            ExecutionTarget::Cloud => "static-cloud",
        }
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn infer(&self, input: &InferenceInput) -> CapabilityResult<Vec<Issue>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(input.context.iter().cloned());
        if let Behavior::RefuseSensitive = self.behavior {
            if input.sensitive {
                return Err(CapabilityError::SensitiveRefused);
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            Behavior::Fail(message) => Err(CapabilityError::Failed(message.clone())),
            _ => Ok(self.issues.clone()),
        }
    }
}

/// Symbolic analyzer returning a fixed set of issues.
#[derive(Debug, Default)]
pub struct ScriptedSymbolic {
    issues: Vec<Issue>,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl ScriptedSymbolic {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl SymbolicAnalyzer for ScriptedSymbolic {
    async fn analyze(&self, _tree: &SyntaxTree) -> CapabilityResult<Vec<Issue>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(CapabilityError::Failed(message.clone())),
            None => Ok(self.issues.clone()),
        }
    }
}

/// Hashing embedder that sleeps before every call.
#[derive(Debug)]
pub struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::default(),
            delay,
        }
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> CapabilityResult<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.inner.embed_sync(text))
    }
}
