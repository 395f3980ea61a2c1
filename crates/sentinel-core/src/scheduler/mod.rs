//! Concurrency scheduler.
//!
//! A fixed pool of worker tasks is spawned at start and shares one bounded
//! admission channel. Admission is decided synchronously against the number
//! of requests in flight (running plus queued), so a saturated scheduler
//! rejects immediately instead of waiting. Each admitted request runs to its
//! terminal event on the worker that dequeued it.

pub mod error;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

pub use error::AdmissionError;

use crate::domain::{AnalysisRequest, RequestId};
use crate::obs;
use crate::stream::{AnalysisStream, StreamEmitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub request_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 32,
            request_deadline: Duration::from_secs(30),
        }
    }
}

/// One admitted request, handed to a worker.
#[derive(Debug)]
pub struct Job {
    pub request: AnalysisRequest,
    pub emitter: StreamEmitter,
    pub cancel: CancellationToken,
    /// Absolute run deadline, fixed at admission.
    pub deadline: Instant,
    pub admitted_at: Instant,
}

/// Point-in-time load figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub in_flight: usize,
    pub running: usize,
    pub queued: usize,
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug)]
struct Shared {
    /// Cancellation tokens of every admitted, unfinished request.
    active: Mutex<HashMap<RequestId, CancellationToken>>,
    running: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn release(&self, id: &RequestId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(id);
        }
    }

    fn in_flight(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("load", &self.load())
            .finish()
    }
}

impl Scheduler {
    /// Spawn `config.workers` workers, each running `handler` on the jobs it
    /// dequeues. Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(config: SchedulerConfig, handler: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(workers + config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            active: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        let handler = Arc::new(handler);

        let handles = (0..workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&rx),
                    Arc::clone(&shared),
                    Arc::clone(&handler),
                ))
            })
            .collect();

        Self {
            config: SchedulerConfig { workers, ..config },
            tx: Mutex::new(Some(tx)),
            shared,
            workers: Mutex::new(handles),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn capacity(&self) -> usize {
        self.config.workers + self.config.queue_capacity
    }

    /// Admit a request or reject it without blocking.
    pub fn admit(&self, request: AnalysisRequest) -> Result<AnalysisStream, AdmissionError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(AdmissionError::ShuttingDown);
        }
        let tx = self
            .tx
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(AdmissionError::ShuttingDown)?;

        let mut active = self
            .shared
            .active
            .lock()
            .map_err(|_| AdmissionError::ShuttingDown)?;
        if active.contains_key(&request.id) {
            return Err(AdmissionError::Duplicate(request.id));
        }
        let capacity = self.capacity();
        if active.len() >= capacity {
            return Err(AdmissionError::Backpressure {
                in_flight: active.len(),
                capacity,
            });
        }

        let id = request.id.clone();
        let cancel = CancellationToken::new();
        let (emitter, stream) = StreamEmitter::channel(id.clone());
        let admitted_at = Instant::now();
        let job = Job {
            request,
            emitter,
            cancel: cancel.clone(),
            deadline: admitted_at + self.config.request_deadline,
            admitted_at,
        };

        // In-flight never exceeds the channel capacity, so this only fails
        // once the workers are gone.
        tx.try_send(job).map_err(|_| AdmissionError::ShuttingDown)?;
        active.insert(id, cancel);
        Ok(stream)
    }

    /// Cancel an admitted request, queued or running. `false` when the id
    /// is not in flight.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let token = self
            .shared
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        if let Ok(active) = self.shared.active.lock() {
            for token in active.values() {
                token.cancel();
            }
        }
    }

    pub fn is_active(&self, id: &RequestId) -> bool {
        self.shared
            .active
            .lock()
            .map(|a| a.contains_key(id))
            .unwrap_or(false)
    }

    pub fn load(&self) -> LoadReport {
        let in_flight = self.shared.in_flight();
        let running = self.shared.running.load(Ordering::Acquire).min(in_flight);
        LoadReport {
            in_flight,
            running,
            queued: in_flight - running,
            workers: self.config.workers,
            queue_capacity: self.config.queue_capacity,
        }
    }

    /// Stop admitting, let queued and running jobs finish, and join the
    /// workers.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop<F, Fut>(
    index: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    shared: Arc<Shared>,
    handler: Arc<F>,
) where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        let id = job.request.id.clone();
        debug!(worker = index, request_id = %id, "job dequeued");

        shared.running.fetch_add(1, Ordering::AcqRel);
        handler(job).instrument(obs::request_span(id.as_str())).await;
        shared.running.fetch_sub(1, Ordering::AcqRel);
        shared.release(&id);
    }
    debug!(worker = index, "worker stopped");
}
