//! Policy: privacy routing for analysis requests.
//!
//! A fail-closed router decides, per request and per pipeline stage, which
//! execution targets are permitted. Cloud is only ever permitted for
//! cloud-capable stages, and only when the policy is not air-gapped, the
//! file is not sensitive, no override pins it local, and the user asked for
//! `cloud` or `auto`.
//!
//! # Modules
//!
//! - [`model`]: `Policy`, the TOML policy file, glob matching
//! - [`sensitivity`]: heuristic sensitivity assessment
//! - [`router`]: `classify()` producing a `RouteDecision`
//! - [`snapshot`]: `PolicyHandle`, atomically swapped versioned snapshots
//! - [`error`]: `PolicyError` / `PolicyResult`

pub mod error;
pub mod model;
pub mod router;
pub mod sensitivity;
pub mod snapshot;

pub use error::{PolicyError, PolicyResult};
pub use model::{Glob, OverrideAction, Policy, SignalCategory, DEFAULT_POLICY_TOML};
pub use router::classify;
pub use sensitivity::{assess, file_is_sensitive, Assessment};
pub use snapshot::PolicyHandle;
