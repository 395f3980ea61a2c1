//! Sentinel Core Library
//!
//! Hybrid analysis orchestration: a fail-closed privacy router decides where
//! each pipeline stage of a file analysis may run, a staged coordinator drives
//! parse, retrieval, symbolic analysis, and inference under per-stage
//! deadlines, a fixed worker pool admits requests with backpressure, and every
//! routing and lifecycle decision lands in a hash-chained audit log.

pub mod audit;
pub mod capability;
pub mod config;
pub mod context;
pub mod domain;
pub mod engine;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod policy;
pub mod protocol;
pub mod replay;
pub mod scheduler;
pub mod stream;
pub mod telemetry;

/// Crate version, reported by the health probe.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use audit::{AuditTrail, AuthAction, AuthEvent, FixApplication};
pub use capability::{
    Capabilities, CapabilityError, CloudBackend, InferenceBackend, InferenceBackends,
    LineParser, OllamaBackend, ParseError, Parser, RuleEngine, SymbolicAnalyzer,
};
pub use config::{ConfigError, EngineConfig, StageBudgets};
pub use context::{ContextStore, HashingEmbedder, UpdateOutcome};
pub use domain::{
    AnalysisRequest, AnalysisSummary, Disposition, EngineError, ExecutionTarget, FileSnapshot,
    Issue, IssueKind, Location, ModelMode, RequestId, Result, RouteDecision, Severity, Stage,
    StageReport, StageStatus,
};
pub use engine::{AnalysisEngine, HealthReport};
pub use metrics::{MetricsSnapshot, METRICS};
pub use pipeline::Coordinator;
pub use policy::{classify, Policy, PolicyError, PolicyHandle};
pub use protocol::{AnalyzeParams, ClientMessage, ServerMessage};
pub use replay::{check_containment, ContainmentReport, ContainmentViolation};
pub use scheduler::{AdmissionError, LoadReport, Scheduler, SchedulerConfig};
pub use stream::{AnalysisEvent, AnalysisStream, StreamEmitter};
pub use telemetry::{init_tracing, LogFormat};
