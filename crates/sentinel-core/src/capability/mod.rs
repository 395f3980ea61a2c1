//! External capabilities invoked by the pipeline.
//!
//! The coordinator never talks to a concrete implementation. It sees only
//! these traits, so tests substitute the fakes in [`crate::fakes`].
//!
//! - [`parser`]: `Parser` and the built-in `LineParser`
//! - [`symbolic`]: `SymbolicAnalyzer` and the built-in `RuleEngine`
//! - [`inference`]: `InferenceBackend` and the local/cloud backend pair
//! - [`http`]: Ollama and cloud HTTP backends

pub mod error;
pub mod http;
pub mod inference;
pub mod parser;
pub mod symbolic;
pub mod syntax;

use std::sync::Arc;

pub use error::{CapabilityError, CapabilityResult, ParseError};
pub use http::{build_prompt, parse_findings, CloudBackend, OllamaBackend};
pub use inference::{InferenceBackend, InferenceBackends, InferenceInput};
pub use parser::{LineParser, Parser};
pub use symbolic::{RuleEngine, SymbolicAnalyzer};
pub use syntax::{Language, NodeKind, SyntaxNode, SyntaxTree};

use crate::config::EngineConfig;
use crate::context::{ContextStore, HashingEmbedder};

/// Everything the coordinator calls out to.
#[derive(Clone)]
pub struct Capabilities {
    pub parser: Arc<dyn Parser>,
    pub symbolic: Arc<dyn SymbolicAnalyzer>,
    pub inference: InferenceBackends,
    pub context: Arc<ContextStore>,
}

impl Capabilities {
    /// Built-in parser, rule engine, and hashing embedder with no inference
    /// backend. Inference is skipped until one is attached.
    pub fn builtin(max_file_bytes: u64, chunk_lines: usize) -> Self {
        Self {
            parser: Arc::new(LineParser::with_max_bytes(max_file_bytes)),
            symbolic: Arc::new(RuleEngine::builtin()),
            inference: InferenceBackends::new(),
            context: Arc::new(ContextStore::new(
                Arc::new(HashingEmbedder::default()),
                chunk_lines,
            )),
        }
    }

    /// Built-ins plus whichever HTTP backends `config` names.
    pub fn from_config(config: &EngineConfig) -> CapabilityResult<Self> {
        let mut caps = Self::builtin(config.max_file_bytes, config.context_chunk_lines);
        let timeout = config.stages.inference();
        if let Some(local) = &config.inference.local {
            caps.inference = caps.inference.with_local(Arc::new(OllamaBackend::new(
                &local.endpoint,
                &local.model,
                timeout,
            )?));
        }
        if let Some(cloud) = &config.inference.cloud {
            caps.inference = caps.inference.with_cloud(Arc::new(CloudBackend::new(
                &cloud.endpoint,
                &cloud.model,
                cloud.credential(),
                timeout,
            )?));
        }
        Ok(caps)
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_symbolic(mut self, symbolic: Arc<dyn SymbolicAnalyzer>) -> Self {
        self.symbolic = symbolic;
        self
    }

    pub fn with_inference(mut self, inference: InferenceBackends) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_context(mut self, context: Arc<ContextStore>) -> Self {
        self.context = context;
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("inference", &self.inference)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
