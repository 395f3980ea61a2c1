//! Staged analysis pipeline.
//!
//! - [`state`]: per-run phase machine and disposition precedence
//! - [`merge`]: cross-stage deduplication and final ordering
//! - [`coordinator`]: drives one request through every stage

pub mod coordinator;
pub mod merge;
pub mod state;

pub use coordinator::{Coordinator, RunContext};
pub use merge::IssueMerger;
pub use state::{Interrupt, InvalidTransition, Phase, PipelineRun};
