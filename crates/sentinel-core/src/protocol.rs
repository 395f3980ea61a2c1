//! NDJSON request/response protocol.
//!
//! One JSON object per line in each direction, tagged by `type`. Clients send
//! [`ClientMessage`]s; the engine answers with [`ServerMessage`]s. Analysis
//! events for different requests may interleave, but within one request they
//! arrive in production order and end with `completed` or `failed`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::audit::{AuthEvent, FixApplication};
use crate::domain::{AnalysisRequest, AnalysisSummary, FileSnapshot, Issue, ModelMode, RequestId};
use crate::engine::HealthReport;
use crate::scheduler::AdmissionError;
use crate::stream::AnalysisEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeParams {
    /// Generated when omitted.
    #[serde(default)]
    pub request_id: Option<RequestId>,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub mode: ModelMode,
    /// Hex SHA-256 of `content`; verified at admission when present.
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub sensitive: Option<bool>,
}

impl AnalyzeParams {
    pub fn into_request(self) -> Result<AnalysisRequest, AdmissionError> {
        let snapshot = FileSnapshot::new(self.path, self.content.into_bytes());
        if let Some(declared) = self.content_hash {
            if !snapshot.hash.matches_hex(&declared) {
                return Err(AdmissionError::HashMismatch {
                    declared,
                    computed: snapshot.hash.to_string(),
                });
            }
        }
        let id = self.request_id.unwrap_or_else(RequestId::generate);
        let mut request = AnalysisRequest::new(id, snapshot, self.mode);
        if let Some(language) = self.language {
            request = request.with_language(language);
        }
        if let Some(sensitive) = self.sensitive {
            request = request.with_sensitive_hint(sensitive);
        }
        Ok(request)
    }
}

/// Client to engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Analyze(AnalyzeParams),
    Cancel {
        request_id: RequestId,
    },
    Health,
    /// Reload from `path`, or from the file the policy was loaded from.
    ReloadPolicy {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    FixApplied(FixApplication),
    Auth(AuthEvent),
}

impl ClientMessage {
    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Engine to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Accepted {
        request_id: RequestId,
    },
    Rejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        code: &'static str,
        reason: String,
    },
    Issue {
        request_id: RequestId,
        seq: u64,
        issue: Issue,
    },
    Completed {
        request_id: RequestId,
        seq: u64,
        summary: AnalysisSummary,
    },
    Failed {
        request_id: RequestId,
        seq: u64,
        error: String,
    },
    Health(HealthReport),
    Cancelled {
        request_id: RequestId,
        /// `false` when the request was not in flight.
        found: bool,
    },
    PolicyReloaded {
        version: u64,
    },
    /// An audit-only message was recorded at `seq`.
    Recorded {
        seq: u64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn rejected(request_id: Option<RequestId>, error: &AdmissionError) -> Self {
        ServerMessage::Rejected {
            request_id,
            code: error.code(),
            reason: error.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Serialize as one NDJSON line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<AnalysisEvent> for ServerMessage {
    fn from(event: AnalysisEvent) -> Self {
        match event {
            AnalysisEvent::Issue {
                request_id,
                seq,
                issue,
            } => ServerMessage::Issue {
                request_id,
                seq,
                issue,
            },
            AnalysisEvent::Completed {
                request_id,
                seq,
                summary,
            } => ServerMessage::Completed {
                request_id,
                seq,
                summary,
            },
            AnalysisEvent::Failed {
                request_id,
                seq,
                error,
            } => ServerMessage::Failed {
                request_id,
                seq,
                error,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentHash;

    #[test]
    fn test_parse_analyze_with_defaults() {
        let msg = ClientMessage::parse_line(
            r#"{"type":"analyze","request_id":"r1","path":"app.py","content":"x = 1\n"}"#,
        )
        .unwrap();
        let ClientMessage::Analyze(params) = msg else {
            panic!("expected analyze");
        };
        assert_eq!(params.mode, ModelMode::Auto);
        let request = params.into_request().unwrap();
        assert_eq!(request.id, RequestId::new("r1"));
        assert_eq!(request.path(), "app.py");
    }

    #[test]
    fn test_content_hash_mismatch_rejected() {
        let params = AnalyzeParams {
            request_id: None,
            path: "a.py".into(),
            content: "print(1)\n".into(),
            mode: ModelMode::Local,
            content_hash: Some("00".repeat(32)),
            language: None,
            sensitive: None,
        };
        let err = params.into_request().unwrap_err();
        assert_eq!(err.code(), "hash_mismatch");
    }

    #[test]
    fn test_content_hash_match_accepted_case_insensitive() {
        let content = "print(1)\n";
        let hash = ContentHash::from_bytes(content.as_bytes())
            .as_str()
            .to_uppercase();
        let params = AnalyzeParams {
            request_id: Some(RequestId::new("h")),
            path: "a.py".into(),
            content: content.into(),
            mode: ModelMode::Local,
            content_hash: Some(hash),
            language: Some("python".into()),
            sensitive: Some(true),
        };
        let request = params.into_request().unwrap();
        assert_eq!(request.sensitive_hint, Some(true));
        assert_eq!(request.language.as_deref(), Some("python"));
    }

    #[test]
    fn test_control_messages_parse() {
        assert_eq!(
            ClientMessage::parse_line(r#"{"type":"health"}"#).unwrap(),
            ClientMessage::Health
        );
        assert_eq!(
            ClientMessage::parse_line(r#"{"type":"cancel","request_id":"r9"}"#).unwrap(),
            ClientMessage::Cancel {
                request_id: RequestId::new("r9")
            }
        );
        assert_eq!(
            ClientMessage::parse_line(r#"{"type":"reload_policy"}"#).unwrap(),
            ClientMessage::ReloadPolicy { path: None }
        );
        assert!(ClientMessage::parse_line(r#"{"type":"shutdown_everything"}"#).is_err());
    }

    #[test]
    fn test_rejected_serializes_code() {
        let msg = ServerMessage::rejected(
            Some(RequestId::new("r")),
            &AdmissionError::Backpressure {
                in_flight: 42,
                capacity: 42,
            },
        );
        let value: serde_json::Value = serde_json::from_str(&msg.to_line().unwrap()).unwrap();
        assert_eq!(value["type"], "rejected");
        assert_eq!(value["code"], "backpressure");
        assert_eq!(value["request_id"], "r");
    }
}
