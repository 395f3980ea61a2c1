//! HTTP inference backends: a local Ollama server and a cloud endpoint.
//!
//! Both backends share one prompt format and one response format. The model
//! is asked for a JSON object `{"issues": [...]}`; each entry carries `kind`,
//! `severity`, `line`, optional `column`, and `message`.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{CapabilityError, CapabilityResult};
use super::inference::{InferenceBackend, InferenceInput};
use crate::domain::{ExecutionTarget, Issue, IssueKind, Location, Severity, Stage};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

const SYSTEM_PROMPT: &str = "You are a security code reviewer. Report only concrete, \
high-confidence security issues in the given file. Answer with a single JSON object \
of the form {\"issues\": [{\"kind\": \"kebab-case-kind\", \"severity\": \
\"info|low|medium|high|critical\", \"line\": 1, \"column\": 1, \"message\": \"...\"}]}. \
Return {\"issues\": []} when nothing is found.";

/// Render the prompt for one inference call.
pub fn build_prompt(input: &InferenceInput) -> String {
    let tree = &input.tree;
    let mut prompt = String::new();
    let _ = writeln!(prompt, "File: {} (language: {})", tree.path, tree.language);
    prompt.push_str("\nSource:\n");
    for (idx, line) in tree.lines.iter().enumerate() {
        let _ = writeln!(prompt, "{:>5} | {}", idx + 1, line);
    }

    if !input.annotations.is_empty() {
        prompt.push_str("\nStatic analysis findings (confirm, refine, or add to these):\n");
        for issue in &input.annotations {
            let _ = writeln!(
                prompt,
                "- line {}: {} [{}] {}",
                issue.location.line, issue.kind, issue.severity, issue.message
            );
        }
    }

    if !input.context.is_empty() {
        prompt.push_str("\nRelated code from the same project:\n");
        for chunk in &input.context {
            let _ = writeln!(
                prompt,
                "--- {}:{}-{} (similarity {:.2})",
                chunk.path, chunk.start_line, chunk.end_line, chunk.score
            );
            prompt.push_str(&chunk.text);
            if !chunk.text.ends_with('\n') {
                prompt.push('\n');
            }
        }
    }
    prompt
}

#[derive(Deserialize)]
struct Findings {
    #[serde(default)]
    issues: Vec<Finding>,
}

#[derive(Deserialize)]
struct Finding {
    kind: String,
    #[serde(default)]
    severity: Option<String>,
    line: i64,
    #[serde(default)]
    column: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Parse a model answer into issues located in `path`.
///
/// Accepts `{"issues": [...]}` or a bare array. Entries with a non-positive
/// line or an empty kind are dropped; unknown severities become `medium`.
pub fn parse_findings(text: &str, path: &str) -> CapabilityResult<Vec<Issue>> {
    let trimmed = text.trim();
    let findings: Vec<Finding> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
    } else {
        serde_json::from_str::<Findings>(trimmed).map(|f| f.issues)
    }
    .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;

    Ok(findings
        .into_iter()
        .filter(|f| f.line > 0 && !f.kind.trim().is_empty())
        .map(|f| {
            let severity = f
                .severity
                .as_deref()
                .and_then(|s| s.parse::<Severity>().ok())
                .unwrap_or(Severity::Medium);
            let column = f.column.filter(|c| *c > 0).unwrap_or(1);
            Issue::new(
                IssueKind::new(&f.kind),
                severity,
                Location::new(path, f.line as u32, column as u32),
                f.message,
                Stage::Inference,
            )
        })
        .collect())
}

fn build_client(timeout: Duration) -> CapabilityResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CapabilityError::Unavailable(format!("http client: {e}")))
}

async fn error_for_status(response: reqwest::Response) -> CapabilityResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CapabilityError::Failed(format!(
        "backend returned {}: {}",
        status.as_u16(),
        body.chars().take(200).collect::<String>()
    )))
}

/// Local model served by Ollama.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    probe: reqwest::Client,
}

impl OllamaBackend {
    pub const DEFAULT_URL: &'static str = "http://localhost:11434";

    pub fn new(base_url: &str, model: &str, timeout: Duration) -> CapabilityResult<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: build_client(timeout)?,
            probe: build_client(PROBE_TIMEOUT)?,
        })
    }

    async fn list_models(&self) -> CapabilityResult<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = error_for_status(self.probe.get(&url).send().await?).await?;
        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::Local
    }

    fn name(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        match self.list_models().await {
            Ok(models) => models.iter().any(|m| m.starts_with(&self.model)),
            Err(e) => {
                debug!(url = %self.base_url, error = %e, "ollama probe failed");
                false
            }
        }
    }

    async fn infer(&self, input: &InferenceInput) -> CapabilityResult<Vec<Issue>> {
        let prompt = build_prompt(input);
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            system: SYSTEM_PROMPT,
            stream: false,
            format: "json",
        };
        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_connect() {
                CapabilityError::Unavailable(format!("cannot reach {}", self.base_url))
            } else {
                CapabilityError::from(e)
            }
        })?;
        let parsed: GenerateResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;
        parse_findings(&parsed.response, &input.tree.path)
    }
}

#[derive(Serialize)]
struct CloudRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct CloudResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    issues: Option<serde_json::Value>,
}

/// Remote model endpoint authenticated with a bearer credential.
///
/// Refuses any request flagged sensitive before touching the network.
#[derive(Clone)]
pub struct CloudBackend {
    endpoint: String,
    model: String,
    credential: Option<String>,
    client: reqwest::Client,
}

impl CloudBackend {
    pub fn new(
        endpoint: &str,
        model: &str,
        credential: Option<String>,
        timeout: Duration,
    ) -> CapabilityResult<Self> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            credential: credential.filter(|c| !c.is_empty()),
            client: build_client(timeout)?,
        })
    }
}

impl std::fmt::Debug for CloudBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl InferenceBackend for CloudBackend {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::Cloud
    }

    fn name(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        self.credential.is_some()
    }

    async fn infer(&self, input: &InferenceInput) -> CapabilityResult<Vec<Issue>> {
        if input.sensitive {
            return Err(CapabilityError::SensitiveRefused);
        }
        let credential = self
            .credential
            .as_deref()
            .ok_or(CapabilityError::MissingCredential)?;

        let prompt = build_prompt(input);
        let body = CloudRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            prompt: &prompt,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await?;
        let parsed: CloudResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;

        let path = &input.tree.path;
        match (parsed.issues, parsed.output) {
            (Some(issues), _) => parse_findings(&issues.to_string(), path),
            (None, Some(output)) => parse_findings(&output, path),
            (None, None) => Err(CapabilityError::MalformedResponse(
                "response has neither `issues` nor `output`".to_string(),
            )),
        }
    }
}
