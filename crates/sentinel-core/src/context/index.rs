//! Immutable index snapshots.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::ContentHash;

use super::embed::cosine;

/// A retrieved chunk of related code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub score: f32,
}

/// An embedded chunk held by the index.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub(crate) struct FileEntry {
    pub hash: ContentHash,
    pub chunks: Arc<Vec<IndexedChunk>>,
    /// Set when the file was classified sensitive. Sticky until the
    /// content changes.
    pub sensitive: bool,
}

/// Which indexed files a search may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextScope {
    /// Every indexed file. Results must stay on this machine.
    #[default]
    All,
    /// Only content never classified sensitive under any path. Required
    /// whenever the results may reach a cloud target.
    Shareable,
}

/// One immutable generation of the index.
///
/// Writers build a new snapshot from the previous one and swap it in;
/// readers keep whatever generation they cloned.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub(crate) generation: u64,
    pub(crate) files: BTreeMap<String, FileEntry>,
    /// Embedded chunks by content hash, shared across paths with identical
    /// content.
    pub(crate) by_hash: HashMap<ContentHash, Arc<Vec<IndexedChunk>>>,
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.files.values().map(|f| f.chunks.len()).sum()
    }

    pub fn hash_of(&self, path: &str) -> Option<&ContentHash> {
        self.files.get(path).map(|f| &f.hash)
    }

    /// `None` when `path` is not indexed.
    pub fn is_sensitive(&self, path: &str) -> Option<bool> {
        self.files.get(path).map(|f| f.sensitive)
    }

    /// Top `k` chunks by similarity to `query`, excluding `exclude_path`.
    /// Ties break by path then line so results are stable.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        exclude_path: &str,
        scope: ContextScope,
    ) -> Vec<ContextChunk> {
        // Identical content is withheld under every path once any path
        // holding it is sensitive.
        let withheld: HashSet<&ContentHash> = match scope {
            ContextScope::All => HashSet::new(),
            ContextScope::Shareable => self
                .files
                .values()
                .filter(|f| f.sensitive)
                .map(|f| &f.hash)
                .collect(),
        };
        let mut scored: Vec<ContextChunk> = self
            .files
            .iter()
            .filter(|(path, _)| path.as_str() != exclude_path)
            .filter(|(_, entry)| !withheld.contains(&entry.hash))
            .flat_map(|(path, entry)| {
                entry.chunks.iter().filter_map(move |chunk| {
                    let score = cosine(query, &chunk.vector);
                    (score > 0.0).then(|| ContextChunk {
                        path: path.clone(),
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        text: chunk.text.clone(),
                        score,
                    })
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        scored.truncate(k);
        scored
    }
}

/// Split text into consecutive windows of `lines_per_chunk` lines, skipping
/// windows that are entirely blank. Line numbers are 1-based and inclusive.
pub fn chunk_lines(text: &str, lines_per_chunk: usize) -> Vec<(u32, u32, String)> {
    let lines: Vec<&str> = text.lines().collect();
    let size = lines_per_chunk.max(1);
    lines
        .chunks(size)
        .enumerate()
        .filter(|(_, window)| window.iter().any(|l| !l.trim().is_empty()))
        .map(|(i, window)| {
            let start = (i * size) as u32 + 1;
            let end = start + window.len() as u32 - 1;
            (start, end, window.join("\n"))
        })
        .collect()
}
