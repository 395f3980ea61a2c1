//! Domain models for Sentinel.
//!
//! Canonical definitions for the core entities:
//! - `AnalysisRequest` / `FileSnapshot`: the unit of scheduling
//! - `RouteDecision`: per-stage permitted execution targets
//! - `Issue`: one finding
//! - `Disposition`: how a run terminated

pub mod error;
pub mod issue;
pub mod outcome;
pub mod request;
pub mod route;

pub use error::{EngineError, Result};
pub use issue::{kinds, ComplianceTags, FixSafety, Issue, IssueKey, IssueKind, Location, Severity};
pub use outcome::{AnalysisSummary, Disposition, StageReport, StageStatus};
pub use request::{AnalysisRequest, ContentHash, FileSnapshot, ModelMode, RequestId};
pub use route::{ExecutionTarget, RouteDecision, Sensitivity, Stage, StageRoute};
