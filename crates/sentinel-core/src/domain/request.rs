//! Analysis requests and file snapshots.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Client-issued request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        RequestId(id.into())
    }

    /// Generate a random id for callers that do not supply one.
    pub fn generate() -> Self {
        RequestId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId(s.to_string())
    }
}

/// Where the user asked inference to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    Local,
    Cloud,
    #[default]
    Auto,
}

impl ModelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelMode::Local => "local",
            ModelMode::Cloud => "cloud",
            ModelMode::Auto => "auto",
        }
    }
}

impl fmt::Display for ModelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ModelMode::Local),
            "cloud" => Ok(ModelMode::Cloud),
            "auto" => Ok(ModelMode::Auto),
            other => Err(format!("unknown model mode: {other}")),
        }
    }
}

/// SHA-256 of a file's content, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Compare against a client-supplied hex digest, case-insensitively.
    pub fn matches_hex(&self, hex_digest: &str) -> bool {
        self.0.eq_ignore_ascii_case(hex_digest)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable view of a file's content at analysis time.
///
/// Cloning is cheap: the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub path: String,
    pub hash: ContentHash,
    pub byte_len: u64,
    content: Arc<[u8]>,
}

impl FileSnapshot {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content: Vec<u8> = content.into();
        Self {
            path: path.into(),
            hash: ContentHash::from_bytes(&content),
            byte_len: content.len() as u64,
            content: Arc::from(content),
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The content as UTF-8, or `None` for binary / invalid encodings.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Lowercased file extension without the dot.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// One file to analyze. Immutable once admitted.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub id: RequestId,
    pub snapshot: FileSnapshot,
    pub mode: ModelMode,
    /// Language hint; detected from the extension when absent.
    pub language: Option<String>,
    /// Caller-supplied sensitivity flag. `Some(true)` always marks the file
    /// sensitive; `Some(false)` never overrides a heuristic hit.
    pub sensitive_hint: Option<bool>,
}

impl AnalysisRequest {
    pub fn new(id: RequestId, snapshot: FileSnapshot, mode: ModelMode) -> Self {
        Self {
            id,
            snapshot,
            mode,
            language: None,
            sensitive_hint: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_sensitive_hint(mut self, sensitive: bool) -> Self {
        self.sensitive_hint = Some(sensitive);
        self
    }

    pub fn path(&self) -> &str {
        &self.snapshot.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_hash_and_len() {
        let snap = FileSnapshot::new("src/app.py", "print('hi')\n");
        assert_eq!(snap.byte_len, 12);
        assert_eq!(snap.hash.as_str().len(), 64);
        assert_eq!(snap.hash, ContentHash::from_bytes(b"print('hi')\n"));
        assert_eq!(snap.extension().as_deref(), Some("py"));
    }

    #[test]
    fn test_snapshot_text_rejects_invalid_utf8() {
        let snap = FileSnapshot::new("blob.bin", vec![0xff, 0xfe, 0x00]);
        assert!(snap.text().is_none());
    }

    #[test]
    fn test_model_mode_parse() {
        assert_eq!("CLOUD".parse::<ModelMode>().unwrap(), ModelMode::Cloud);
        assert!("hybrid".parse::<ModelMode>().is_err());
        assert_eq!(ModelMode::default(), ModelMode::Auto);
    }

    #[test]
    fn test_content_hash_matches_hex_case_insensitive() {
        let hash = ContentHash::from_bytes(b"abc");
        assert!(hash.matches_hex(&hash.as_str().to_ascii_uppercase()));
        assert!(!hash.matches_hex("deadbeef"));
    }
}
