//! Process-wide context store.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::embed::Embedder;
use super::index::{
    chunk_lines, ContextChunk, ContextScope, FileEntry, IndexSnapshot, IndexedChunk,
};
use crate::capability::{CapabilityError, CapabilityResult};
use crate::domain::FileSnapshot;

/// Query text is truncated to this many bytes before embedding.
const MAX_QUERY_BYTES: usize = 16 * 1024;

/// Result of [`ContextStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Path already indexed at this content hash.
    Unchanged,
    /// Chunks reused from another path with identical content.
    Reused { chunks: usize },
    Indexed { chunks: usize },
    /// Not indexable (binary or empty).
    Skipped,
}

/// Result of a bounded retrieval.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Hits(Vec<ContextChunk>),
    TimedOut,
    Failed(String),
}

impl Retrieval {
    /// Retrieved chunks; empty unless the query completed.
    pub fn into_chunks(self) -> Vec<ContextChunk> {
        match self {
            Retrieval::Hits(chunks) => chunks,
            _ => Vec::new(),
        }
    }
}

/// Embedding index shared by all requests.
///
/// Readers never block writers: queries clone the current snapshot pointer
/// and search it without holding any lock. Writers are serialised so two
/// updates never race to install stale snapshots.
pub struct ContextStore {
    embedder: Arc<dyn Embedder>,
    lines_per_chunk: usize,
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl ContextStore {
    pub fn new(embedder: Arc<dyn Embedder>, lines_per_chunk: usize) -> Self {
        Self {
            embedder,
            lines_per_chunk: lines_per_chunk.max(1),
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    /// The current index generation.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn install(&self, next: IndexSnapshot) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
    }

    /// Index `file`, recording whether it was classified sensitive.
    /// Idempotent for an unchanged content hash.
    ///
    /// Chunks are embedded without holding the writer lock. The lock is
    /// taken only to re-check the current generation and install the next.
    pub async fn update(
        &self,
        file: &FileSnapshot,
        sensitive: bool,
    ) -> CapabilityResult<UpdateOutcome> {
        let base = self.snapshot();
        if base.hash_of(&file.path) == Some(&file.hash)
            && (!sensitive || base.is_sensitive(&file.path) == Some(true))
        {
            return Ok(UpdateOutcome::Unchanged);
        }
        let embedded = if base.by_hash.contains_key(&file.hash) {
            None
        } else {
            let Some(text) = indexable_text(file) else {
                return Ok(UpdateOutcome::Skipped);
            };
            Some(self.embed_chunks(text).await?)
        };
        drop(base);

        let _writer = self.writer.lock().await;
        let current = self.snapshot();

        if let Some(entry) = current.files.get(&file.path).filter(|e| e.hash == file.hash) {
            if entry.sensitive || !sensitive {
                return Ok(UpdateOutcome::Unchanged);
            }
            let mut next = (*current).clone();
            next.generation += 1;
            if let Some(entry) = next.files.get_mut(&file.path) {
                entry.sensitive = true;
            }
            debug!(path = %file.path, "context entry marked sensitive");
            self.install(next);
            return Ok(UpdateOutcome::Unchanged);
        }

        let (chunks, outcome) = match (current.by_hash.get(&file.hash), embedded) {
            (Some(existing), _) => (
                Arc::clone(existing),
                UpdateOutcome::Reused {
                    chunks: existing.len(),
                },
            ),
            (None, Some(embedded)) => {
                let count = embedded.len();
                (Arc::new(embedded), UpdateOutcome::Indexed { chunks: count })
            }
            // The shared chunks were dropped after the first look.
            (None, None) => {
                let Some(text) = indexable_text(file) else {
                    return Ok(UpdateOutcome::Skipped);
                };
                let embedded = self.embed_chunks(text).await?;
                let count = embedded.len();
                (Arc::new(embedded), UpdateOutcome::Indexed { chunks: count })
            }
        };

        let mut next = (*current).clone();
        next.generation += 1;
        if let Some(old) = next.files.insert(
            file.path.clone(),
            FileEntry {
                hash: file.hash.clone(),
                chunks: Arc::clone(&chunks),
                sensitive,
            },
        ) {
            if !next.files.values().any(|f| f.hash == old.hash) {
                next.by_hash.remove(&old.hash);
            }
        }
        next.by_hash.insert(file.hash.clone(), chunks);
        debug!(
            path = %file.path,
            hash = %file.hash.short(),
            sensitive,
            generation = next.generation,
            "context index updated"
        );
        self.install(next);
        Ok(outcome)
    }

    async fn embed_chunks(&self, text: &str) -> CapabilityResult<Vec<IndexedChunk>> {
        let mut embedded = Vec::new();
        for (start_line, end_line, text) in chunk_lines(text, self.lines_per_chunk) {
            let vector = self.embedder.embed(&text).await?;
            embedded.push(IndexedChunk {
                start_line,
                end_line,
                text,
                vector,
            });
        }
        Ok(embedded)
    }

    /// Drop `path` from the index. Returns `true` if it was present.
    pub async fn remove(&self, path: &str) -> bool {
        let _writer = self.writer.lock().await;
        let base = self.snapshot();
        if !base.files.contains_key(path) {
            return false;
        }
        let mut next = (*base).clone();
        next.generation += 1;
        if let Some(old) = next.files.remove(path) {
            if !next.files.values().any(|f| f.hash == old.hash) {
                next.by_hash.remove(&old.hash);
            }
        }
        self.install(next);
        true
    }

    /// Up to `k` chunks related to `file` within `scope`, most similar
    /// first. Chunks from `file`'s own path are excluded.
    pub async fn query(
        &self,
        file: &FileSnapshot,
        k: usize,
        scope: ContextScope,
    ) -> CapabilityResult<Vec<ContextChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let text = file
            .text()
            .ok_or_else(|| CapabilityError::Failed("query text is not UTF-8".to_string()))?;
        let query = self.embedder.embed(truncate(text, MAX_QUERY_BYTES)).await?;
        Ok(self.snapshot().search(&query, k, &file.path, scope))
    }

    /// Refresh `file` in the index, then query `scope`, all within
    /// `budget`.
    ///
    /// Never fails the caller: a timeout or capability error yields an
    /// empty retrieval tagged with the reason.
    pub async fn retrieve(
        &self,
        file: &FileSnapshot,
        sensitive: bool,
        scope: ContextScope,
        k: usize,
        budget: Duration,
    ) -> Retrieval {
        let work = async {
            if file.text().is_some() {
                self.update(file, sensitive).await?;
            }
            self.query(file, k, scope).await
        };
        match tokio::time::timeout(budget, work).await {
            Ok(Ok(chunks)) => Retrieval::Hits(chunks),
            Ok(Err(e)) => {
                warn!(path = %file.path, error = %e, "context retrieval failed");
                Retrieval::Failed(e.to_string())
            }
            Err(_) => Retrieval::TimedOut,
        }
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("ContextStore")
            .field("generation", &snap.generation())
            .field("files", &snap.file_count())
            .field("lines_per_chunk", &self.lines_per_chunk)
            .finish()
    }
}

fn indexable_text(file: &FileSnapshot) -> Option<&str> {
    file.text().filter(|t| !t.trim().is_empty())
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
