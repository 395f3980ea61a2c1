//! Engine facade.
//!
//! `AnalysisEngine` owns the policy handle, the audit trail, the coordinator,
//! and the scheduler. Transports (the daemon, the CLI) talk only to this type.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use sentinel_audit::{AuditSink, JsonlAuditLog};

use crate::audit::{AuditTrail, AuthEvent, FixApplication};
use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::context::UpdateOutcome;
use crate::domain::{AnalysisRequest, EngineError, FileSnapshot, RequestId, Result};
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::obs;
use crate::pipeline::Coordinator;
use crate::policy::{file_is_sensitive, Policy, PolicyHandle};
use crate::scheduler::{AdmissionError, Job, LoadReport, Scheduler, SchedulerConfig};
use crate::stream::AnalysisStream;
use crate::VERSION;

/// Liveness and load, answered synchronously.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub halted: bool,
    pub policy_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_revision: Option<String>,
    pub air_gapped: bool,
    pub load: LoadReport,
    pub metrics: MetricsSnapshot,
}

pub struct AnalysisEngine {
    config: EngineConfig,
    policy: PolicyHandle,
    audit: AuditTrail,
    coordinator: Coordinator,
    scheduler: Scheduler,
    reload: tokio::sync::Mutex<()>,
    started: std::time::Instant,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("policy_version", &self.policy.version())
            .field("halted", &self.audit.is_halted())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl AnalysisEngine {
    /// Validate `config`, record the active policy, and spawn the worker
    /// pool. Must be called from within a Tokio runtime.
    pub async fn start(
        config: EngineConfig,
        policy: PolicyHandle,
        caps: Capabilities,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate()?;
        let audit = AuditTrail::new(sink);
        let current = policy.current();
        audit.policy_loaded(&current).await?;
        obs::emit_policy_installed(current.version, current.revision.as_deref());

        let coordinator = Coordinator::new(
            caps,
            audit.clone(),
            config.stages.clone(),
            config.context_top_k,
        );

        let worker_coordinator = coordinator.clone();
        let worker_policy = policy.clone();
        let scheduler = Scheduler::start(
            SchedulerConfig {
                workers: config.workers,
                queue_capacity: config.queue_capacity,
                request_deadline: config.request_deadline(),
            },
            move |job: Job| {
                let coordinator = worker_coordinator.clone();
                // Snapshot taken at dequeue; a later reload does not affect
                // this run.
                let policy = worker_policy.current();
                async move {
                    coordinator
                        .execute(job.request, policy, job.emitter, job.cancel, job.deadline)
                        .await;
                }
            },
        );

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            request_deadline_ms = config.request_deadline_ms,
            policy_version = current.version,
            air_gapped = current.air_gapped,
            "analysis engine started"
        );

        Ok(Self {
            config,
            policy,
            audit,
            coordinator,
            scheduler,
            reload: tokio::sync::Mutex::new(()),
            started: std::time::Instant::now(),
            started_at: Utc::now(),
        })
    }

    /// Start with the configured policy file (or the built-in policy), the
    /// configured capabilities, and the JSONL audit log at
    /// `config.audit_log`.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let policy = match &config.policy {
            Some(path) => PolicyHandle::load(path)?,
            None => PolicyHandle::new(Policy::builtin()?),
        };
        let caps = Capabilities::from_config(&config)?;
        let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditLog::open(&config.audit_log).await?);
        Self::start(config, policy, caps, sink).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn is_halted(&self) -> bool {
        self.audit.is_halted()
    }

    /// Admit `request` and return its event stream, or reject it before it
    /// consumes any resources.
    pub fn submit(
        &self,
        request: AnalysisRequest,
    ) -> std::result::Result<AnalysisStream, AdmissionError> {
        let id = request.id.clone();
        let path = request.path().to_string();
        let mode = request.mode;

        match self.admit(request) {
            Ok(stream) => {
                METRICS.inc_admitted();
                obs::emit_request_admitted(
                    id.as_str(),
                    &path,
                    mode.as_str(),
                    self.scheduler.load().in_flight,
                );
                Ok(stream)
            }
            Err(e) => {
                METRICS.inc_rejected();
                obs::emit_admission_rejected(id.as_str(), &e);
                Err(e)
            }
        }
    }

    fn admit(
        &self,
        request: AnalysisRequest,
    ) -> std::result::Result<AnalysisStream, AdmissionError> {
        if self.audit.is_halted() {
            return Err(AdmissionError::Halted);
        }
        if request.id.as_str().is_empty() {
            return Err(AdmissionError::Invalid("empty request id".to_string()));
        }
        if request.path().is_empty() {
            return Err(AdmissionError::Invalid("empty file path".to_string()));
        }
        let size = request.snapshot.content().len() as u64;
        if size > self.config.max_file_bytes {
            return Err(AdmissionError::TooLarge {
                size,
                limit: self.config.max_file_bytes,
            });
        }
        self.scheduler.admit(request)
    }

    /// Cancel a queued or running request. `false` if it is not in flight.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let found = self.scheduler.cancel(id);
        if found {
            info!(request_id = %id, "cancellation requested");
        }
        found
    }

    pub fn health(&self) -> HealthReport {
        let policy = self.policy.current();
        HealthReport {
            version: VERSION,
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
            halted: self.audit.is_halted(),
            policy_version: policy.version,
            policy_revision: policy.revision.clone(),
            air_gapped: policy.air_gapped,
            load: self.scheduler.load(),
            metrics: METRICS.snapshot(),
        }
    }

    /// Reload the policy from its source file and record the new version.
    pub async fn reload_policy(&self) -> Result<u64> {
        let _serial = self.reload.lock().await;
        let next = self.policy.prepare()?;
        self.record_policy(next).await
    }

    /// Replace the policy with the one at `path`. On a parse or validation
    /// error the current snapshot stays in effect.
    pub async fn reload_policy_from(&self, path: impl AsRef<Path>) -> Result<u64> {
        let _serial = self.reload.lock().await;
        let next = self.policy.prepare_from(path)?;
        self.record_policy(next).await
    }

    /// The version is audited before any run can read it. If the append
    /// fails the current snapshot stays in effect.
    async fn record_policy(&self, next: Policy) -> Result<u64> {
        self.audit.policy_loaded(&next).await?;
        let snapshot = self.policy.commit(next)?;
        obs::emit_policy_installed(snapshot.version, snapshot.revision.as_deref());
        Ok(snapshot.version)
    }

    /// Record a fix the client applied. Returns the audit sequence number.
    pub async fn record_fix_applied(&self, fix: &FixApplication) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.audit.fix_applied(fix).await?.seq)
    }

    pub async fn record_auth_event(&self, event: &AuthEvent) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.audit.auth_event(event).await?.seq)
    }

    /// Add or refresh one file in the context index, classified under the
    /// current policy.
    pub async fn index_file(&self, file: &FileSnapshot) -> Result<UpdateOutcome> {
        let sensitive = file_is_sensitive(file, &self.policy.current());
        Ok(self
            .coordinator
            .capabilities()
            .context
            .update(file, sensitive)
            .await?)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.audit.is_halted() {
            return Err(EngineError::Halted);
        }
        Ok(())
    }

    /// Stop admitting, let in-flight requests finish, and flush metrics.
    /// With `cancel_in_flight` the running requests are cancelled first.
    pub async fn shutdown(&self, cancel_in_flight: bool) {
        if cancel_in_flight {
            self.scheduler.cancel_all();
        }
        self.scheduler.shutdown().await;
        METRICS.flush();
        if self.audit.is_halted() {
            warn!("analysis engine stopped after a durability failure");
        } else {
            info!("analysis engine stopped");
        }
    }
}
