//! Versioned policy snapshots with atomic replacement.
//!
//! Readers clone the current `Arc<Policy>` and keep using it for the whole
//! request, so a reload never changes the policy under an in-flight run.
//! Installing a new snapshot only swaps the pointer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use super::error::{PolicyError, PolicyResult};
use super::model::Policy;

/// Shared handle to the process-wide policy.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    current: Arc<RwLock<Arc<Policy>>>,
    source: Option<PathBuf>,
}

impl PolicyHandle {
    /// Wrap an already validated policy as version 1.
    pub fn new(mut policy: Policy) -> Self {
        policy.version = 1;
        Self {
            current: Arc::new(RwLock::new(Arc::new(policy))),
            source: None,
        }
    }

    /// Load the policy file at startup. Any error is fatal to the caller.
    pub fn load(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let policy = Policy::load(path)?;
        let mut handle = Self::new(policy);
        handle.source = Some(path.to_path_buf());
        Ok(handle)
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<Policy> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.current().version
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Install `policy` as the next version and return the new snapshot.
    pub fn install(&self, mut policy: Policy) -> Arc<Policy> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        policy.version = guard.version + 1;
        let snapshot = Arc::new(policy);
        *guard = Arc::clone(&snapshot);
        info!(
            version = snapshot.version,
            revision = ?snapshot.revision,
            air_gapped = snapshot.air_gapped,
            "policy snapshot installed"
        );
        snapshot
    }

    /// Parse and validate `path` as the next version without installing
    /// it. The result goes to [`PolicyHandle::commit`].
    pub fn prepare_from(&self, path: impl AsRef<Path>) -> PolicyResult<Policy> {
        match Policy::load(path.as_ref()) {
            Ok(mut policy) => {
                policy.version = self.version() + 1;
                Ok(policy)
            }
            Err(e) => {
                warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    version = self.version(),
                    "policy reload rejected; keeping current snapshot"
                );
                Err(e)
            }
        }
    }

    /// [`PolicyHandle::prepare_from`] against the file the policy was loaded
    /// from.
    pub fn prepare(&self) -> PolicyResult<Policy> {
        let path = self.source.as_ref().ok_or(PolicyError::NoSource)?;
        self.prepare_from(path)
    }

    /// Install a prepared policy. Fails if another snapshot was installed
    /// since it was prepared.
    pub fn commit(&self, policy: Policy) -> PolicyResult<Arc<Policy>> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if policy.version != guard.version + 1 {
            return Err(PolicyError::Superseded {
                prepared: policy.version,
                current: guard.version,
            });
        }
        let snapshot = Arc::new(policy);
        *guard = Arc::clone(&snapshot);
        info!(
            version = snapshot.version,
            revision = ?snapshot.revision,
            air_gapped = snapshot.air_gapped,
            "policy snapshot installed"
        );
        Ok(snapshot)
    }

    /// Re-read the policy from the file it was loaded from.
    pub fn reload(&self) -> PolicyResult<Arc<Policy>> {
        self.commit(self.prepare()?)
    }

    /// Parse and validate `path`; install it only if valid. On error the
    /// current snapshot is left untouched.
    pub fn reload_from(&self, path: impl AsRef<Path>) -> PolicyResult<Arc<Policy>> {
        self.commit(self.prepare_from(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_bumps_version() {
        let handle = PolicyHandle::new(Policy::builtin().unwrap());
        assert_eq!(handle.version(), 1);
        let next = handle.install(Policy::from_toml_str("air_gapped = true\n").unwrap());
        assert_eq!(next.version, 2);
        assert!(handle.current().air_gapped);
    }

    #[test]
    fn test_in_flight_snapshot_is_stable() {
        let handle = PolicyHandle::new(Policy::builtin().unwrap());
        let held = handle.current();
        handle.install(Policy::from_toml_str("air_gapped = true\n").unwrap());
        assert!(!held.air_gapped);
        assert_eq!(held.version, 1);
    }

    #[test]
    fn test_invalid_reload_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "air_gapped = true\n").unwrap();

        let handle = PolicyHandle::load(&path).unwrap();
        assert!(handle.current().air_gapped);

        std::fs::write(&path, "air_gapped = \"maybe\"\n").unwrap();
        assert!(handle.reload().is_err());
        assert!(handle.current().air_gapped);
        assert_eq!(handle.version(), 1);
    }

    #[test]
    fn test_reload_without_source() {
        let handle = PolicyHandle::new(Policy::builtin().unwrap());
        assert!(matches!(handle.reload(), Err(PolicyError::NoSource)));
    }

    #[test]
    fn test_prepared_policy_is_not_visible_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "air_gapped = true\n").unwrap();

        let handle = PolicyHandle::new(Policy::builtin().unwrap());
        let prepared = handle.prepare_from(&path).unwrap();
        assert_eq!(prepared.version, 2);
        assert_eq!(handle.version(), 1);
        assert!(!handle.current().air_gapped);

        assert_eq!(handle.commit(prepared).unwrap().version, 2);
        assert!(handle.current().air_gapped);
    }

    #[test]
    fn test_commit_rejects_superseded_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "air_gapped = true\n").unwrap();

        let handle = PolicyHandle::new(Policy::builtin().unwrap());
        let stale = handle.prepare_from(&path).unwrap();
        handle.install(Policy::builtin().unwrap());
        assert!(matches!(
            handle.commit(stale),
            Err(PolicyError::Superseded { prepared: 2, current: 2 })
        ));
        assert!(!handle.current().air_gapped);
    }
}
