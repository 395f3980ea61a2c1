//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! workers = 10
//! queue_capacity = 32
//! request_deadline_ms = 30000
//! audit_log = ".sentinel/audit.jsonl"
//!
//! [stages]
//! context_ms = 1500
//! inference_ms = 20000
//!
//! [inference.local]
//! endpoint = "http://localhost:11434"
//! model = "qwen2.5-coder"
//!
//! [inference.cloud]
//! endpoint = "https://inference.example.com/v1/analyze"
//! model = "review-large"
//! credential_env = "SENTINEL_CLOUD_TOKEN"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Malformed(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Time budgets per stage, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageBudgets {
    pub parse_ms: u64,
    /// Retrieval sub-deadline. Must be below the request deadline.
    pub context_ms: u64,
    pub symbolic_ms: u64,
    pub inference_ms: u64,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            parse_ms: 2_000,
            context_ms: 1_500,
            symbolic_ms: 5_000,
            inference_ms: 20_000,
        }
    }
}

impl StageBudgets {
    pub fn parse(&self) -> Duration {
        Duration::from_millis(self.parse_ms)
    }

    pub fn context(&self) -> Duration {
        Duration::from_millis(self.context_ms)
    }

    pub fn symbolic(&self) -> Duration {
        Duration::from_millis(self.symbolic_ms)
    }

    pub fn inference(&self) -> Duration {
        Duration::from_millis(self.inference_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalModelConfig {
    #[serde(default = "default_ollama_url")]
    pub endpoint: String,
    pub model: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudModelConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the bearer credential.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
}

fn default_credential_env() -> String {
    "SENTINEL_CLOUD_TOKEN".to_string()
}

impl CloudModelConfig {
    /// Read the credential from the environment. `None` when unset or empty.
    pub fn credential(&self) -> Option<String> {
        std::env::var(&self.credential_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub local: Option<LocalModelConfig>,
    pub cloud: Option<CloudModelConfig>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Fixed worker pool size.
    pub workers: usize,
    /// Admitted requests allowed to wait beyond the busy workers.
    pub queue_capacity: usize,
    pub request_deadline_ms: u64,
    pub stages: StageBudgets,
    pub context_top_k: usize,
    pub context_chunk_lines: usize,
    /// Larger files are rejected at admission.
    pub max_file_bytes: u64,
    pub audit_log: PathBuf,
    /// Policy file; the built-in policy is used when absent.
    pub policy: Option<PathBuf>,
    pub inference: InferenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 32,
            request_deadline_ms: 30_000,
            stages: StageBudgets::default(),
            context_top_k: 8,
            context_chunk_lines: 40,
            max_file_bytes: 4 * 1024 * 1024,
            audit_log: PathBuf::from(".sentinel/audit.jsonl"),
            policy: None,
            inference: InferenceConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.workers == 0 {
            return invalid("workers must be at least 1".to_string());
        }
        if self.request_deadline_ms == 0 {
            return invalid("request_deadline_ms must be positive".to_string());
        }
        let s = &self.stages;
        for (name, ms) in [
            ("parse_ms", s.parse_ms),
            ("context_ms", s.context_ms),
            ("symbolic_ms", s.symbolic_ms),
            ("inference_ms", s.inference_ms),
        ] {
            if ms == 0 {
                return invalid(format!("stages.{name} must be positive"));
            }
        }
        if s.context_ms >= self.request_deadline_ms {
            return invalid(format!(
                "stages.context_ms ({}) must be below request_deadline_ms ({})",
                s.context_ms, self.request_deadline_ms
            ));
        }
        if self.context_chunk_lines == 0 {
            return invalid("context_chunk_lines must be at least 1".to_string());
        }
        if self.max_file_bytes == 0 {
            return invalid("max_file_bytes must be positive".to_string());
        }
        if let Some(cloud) = &self.inference.cloud {
            if cloud.endpoint.trim().is_empty() {
                return invalid("inference.cloud.endpoint must not be empty".to_string());
            }
        }
        Ok(())
    }
}
