//! Context retrieval: an embedding index over project files.
//!
//! The coordinator refreshes the request's own file in the index and then
//! asks for the most similar chunks from other files, all under the
//! retrieval sub-deadline. On timeout the pipeline continues with no
//! context.

pub mod embed;
pub mod index;
pub mod store;

pub use embed::{cosine, Embedder, HashingEmbedder};
pub use index::{chunk_lines, ContextChunk, ContextScope, IndexSnapshot, IndexedChunk};
pub use store::{ContextStore, Retrieval, UpdateOutcome};
