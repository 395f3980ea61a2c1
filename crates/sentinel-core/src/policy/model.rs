//! Policy model and TOML policy file.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{PolicyError, PolicyResult};
use crate::domain::{ComplianceTags, FixSafety, Issue, IssueKind};

/// Built-in policy used on first run and in tests.
pub const DEFAULT_POLICY_TOML: &str = r#"
revision = "builtin-1"
air_gapped = false
scan_limit_bytes = 2097152

[[sensitive_paths]]
pattern = "**/.env"
reason = "dotenv"

[[sensitive_paths]]
pattern = "**/.env.*"
reason = "dotenv"

[[sensitive_paths]]
pattern = "*.pem"
reason = "key-material"

[[sensitive_paths]]
pattern = "*.key"
reason = "key-material"

[[sensitive_paths]]
pattern = "*.p12"
reason = "key-material"

[[sensitive_paths]]
pattern = "id_rsa*"
reason = "ssh-key"

[[sensitive_paths]]
pattern = "**/secrets/**"
reason = "secrets-directory"

[[content_signals]]
name = "aws_access_key"
category = "secret"
regex = 'AKIA[0-9A-Z]{16}'

[[content_signals]]
name = "private_key_block"
category = "secret"
regex = '-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY-----'

[[content_signals]]
name = "github_token"
category = "secret"
regex = 'gh[pousr]_[A-Za-z0-9]{36,}'

[[content_signals]]
name = "slack_token"
category = "secret"
regex = 'xox[abprs]-[A-Za-z0-9-]{10,}'

[[content_signals]]
name = "credential_assignment"
category = "secret"
regex = "(?i)(?:password|passwd|secret|api[_-]?key|access[_-]?token)\\s*[:=]\\s*[\"'][^\"'\\s]{8,}[\"']"

[[content_signals]]
name = "us_ssn"
category = "pii"
regex = '\b\d{3}-\d{2}-\d{4}\b'

[[content_signals]]
name = "iban"
category = "pii"
regex = '\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){3,7}\b'

[compliance.hardcoded-secret]
CWE = "CWE-798"
OWASP-ASVS = "V2.10.4"
PCI-DSS = "8.3.1"

[compliance.private-key]
CWE = "CWE-321"
PCI-DSS = "3.6.1"

[compliance.sql-injection-pattern]
CWE = "CWE-89"
OWASP-TOP10 = "A03:2021"

[compliance.command-injection-pattern]
CWE = "CWE-78"
OWASP-TOP10 = "A03:2021"

[compliance.weak-hash]
CWE = "CWE-328"
OWASP-TOP10 = "A02:2021"

[compliance.unsafe-deserialization]
CWE = "CWE-502"
OWASP-TOP10 = "A08:2021"

[compliance.dynamic-eval]
CWE = "CWE-95"

[fix_safety]
weak-hash = "auto-fixable-low-risk"
"#;

/// Category of a content signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Secret,
    Pii,
    Regulated,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Secret => "secret",
            SignalCategory::Pii => "pii",
            SignalCategory::Regulated => "regulated",
        }
    }
}

/// What a team override does to matching paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideAction {
    /// Never route off the machine, without labelling the file sensitive.
    ForceLocal,
    /// Treat the file as sensitive.
    MarkSensitive,
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    air_gapped: bool,
    #[serde(default = "default_scan_limit")]
    scan_limit_bytes: u64,
    #[serde(default)]
    sensitive_paths: Vec<PathRuleFile>,
    #[serde(default)]
    content_signals: Vec<SignalFile>,
    #[serde(default)]
    overrides: Vec<OverrideFile>,
    #[serde(default)]
    compliance: BTreeMap<String, ComplianceTags>,
    #[serde(default)]
    fix_safety: BTreeMap<String, FixSafety>,
}

fn default_scan_limit() -> u64 {
    2 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathRuleFile {
    pattern: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignalFile {
    name: String,
    category: SignalCategory,
    regex: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverrideFile {
    pattern: String,
    action: OverrideAction,
}

// ---------------------------------------------------------------------------
// Compiled policy
// ---------------------------------------------------------------------------

/// Path glob: `*` and `?` stay within a segment, `**` crosses segments.
/// Patterns without `/` match the file name.
#[derive(Debug, Clone)]
pub struct Glob {
    matcher: GlobMatcher,
    basename_only: bool,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, String> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err("empty pattern".to_string());
        }
        let matcher = GlobBuilder::new(trimmed)
            .literal_separator(true)
            .build()
            .map_err(|e| e.to_string())?
            .compile_matcher();
        Ok(Self {
            matcher,
            basename_only: !trimmed.contains('/'),
        })
    }

    pub fn as_str(&self) -> &str {
        self.matcher.glob().glob()
    }

    pub fn matches(&self, path: &str) -> bool {
        let normalized = path.replace('\\', "/");
        let normalized = normalized.trim_start_matches("./");
        if self.basename_only {
            let name = normalized.rsplit('/').next().unwrap_or(normalized);
            self.matcher.is_match(name)
        } else {
            self.matcher.is_match(normalized)
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PathRule {
    pub(crate) glob: Glob,
    pub(crate) reason: String,
}

/// A named content pattern marking a file sensitive.
#[derive(Debug, Clone)]
pub struct ContentSignal {
    pub name: String,
    pub category: SignalCategory,
    pub(crate) regex: Regex,
}

#[derive(Debug, Clone)]
pub(crate) struct OverrideRule {
    pub(crate) glob: Glob,
    pub(crate) action: OverrideAction,
}

/// Immutable, validated policy snapshot.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Installation epoch assigned by [`super::PolicyHandle`].
    pub version: u64,
    /// Revision label from the policy file (team-pushed identifier).
    pub revision: Option<String>,
    pub air_gapped: bool,
    /// Files larger than this cannot be scanned and are treated as sensitive.
    pub scan_limit_bytes: u64,
    pub(crate) sensitive_paths: Vec<PathRule>,
    pub(crate) content_signals: Vec<ContentSignal>,
    pub(crate) overrides: Vec<OverrideRule>,
    compliance: BTreeMap<String, ComplianceTags>,
    fix_safety: BTreeMap<String, FixSafety>,
}

impl Policy {
    /// Parse and validate a TOML policy.
    pub fn from_toml_str(text: &str) -> PolicyResult<Self> {
        let file: PolicyFile = toml::from_str(text)?;
        Self::compile(file)
    }

    /// Read, parse, and validate a policy file.
    pub fn load(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// The built-in default policy.
    pub fn builtin() -> PolicyResult<Self> {
        Self::from_toml_str(DEFAULT_POLICY_TOML)
    }

    fn compile(file: PolicyFile) -> PolicyResult<Self> {
        if file.scan_limit_bytes == 0 {
            return Err(PolicyError::Inconsistent(
                "scan_limit_bytes must be greater than zero".to_string(),
            ));
        }

        let sensitive_paths = file
            .sensitive_paths
            .into_iter()
            .map(|rule| {
                let glob = Glob::new(&rule.pattern).map_err(|reason| {
                    PolicyError::InvalidPattern {
                        section: "sensitive_paths",
                        pattern: rule.pattern.clone(),
                        reason,
                    }
                })?;
                let reason = rule.reason.unwrap_or_else(|| glob.as_str().to_string());
                Ok(PathRule { glob, reason })
            })
            .collect::<PolicyResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut content_signals = Vec::with_capacity(file.content_signals.len());
        for signal in file.content_signals {
            if signal.name.trim().is_empty() {
                return Err(PolicyError::Inconsistent(
                    "content signal with empty name".to_string(),
                ));
            }
            if !seen.insert(signal.name.clone()) {
                return Err(PolicyError::Inconsistent(format!(
                    "duplicate content signal name: {}",
                    signal.name
                )));
            }
            if signal.regex.is_empty() {
                return Err(PolicyError::InvalidPattern {
                    section: "content_signals",
                    pattern: signal.name,
                    reason: "empty regex".to_string(),
                });
            }
            let regex = Regex::new(&signal.regex).map_err(|e| PolicyError::InvalidPattern {
                section: "content_signals",
                pattern: signal.regex.clone(),
                reason: e.to_string(),
            })?;
            content_signals.push(ContentSignal {
                name: signal.name,
                category: signal.category,
                regex,
            });
        }

        let overrides = file
            .overrides
            .into_iter()
            .map(|rule| {
                let glob = Glob::new(&rule.pattern).map_err(|reason| {
                    PolicyError::InvalidPattern {
                        section: "overrides",
                        pattern: rule.pattern.clone(),
                        reason,
                    }
                })?;
                Ok(OverrideRule {
                    glob,
                    action: rule.action,
                })
            })
            .collect::<PolicyResult<Vec<_>>>()?;

        let mut compliance = BTreeMap::new();
        for (kind, tags) in file.compliance {
            for (framework, clause) in &tags {
                if framework.trim().is_empty() || clause.trim().is_empty() {
                    return Err(PolicyError::Inconsistent(format!(
                        "empty compliance framework or clause for {kind}"
                    )));
                }
            }
            compliance.insert(IssueKind::new(&kind).as_str().to_string(), tags);
        }

        let fix_safety = file
            .fix_safety
            .into_iter()
            .map(|(kind, safety)| (IssueKind::new(&kind).as_str().to_string(), safety))
            .collect();

        Ok(Self {
            version: 1,
            revision: file.revision,
            air_gapped: file.air_gapped,
            scan_limit_bytes: file.scan_limit_bytes,
            sensitive_paths,
            content_signals,
            overrides,
            compliance,
            fix_safety,
        })
    }

    pub fn content_signals(&self) -> &[ContentSignal] {
        &self.content_signals
    }

    /// Compliance tags for an issue kind (empty when unmapped).
    pub fn compliance_for(&self, kind: &IssueKind) -> ComplianceTags {
        self.compliance.get(kind.as_str()).cloned().unwrap_or_default()
    }

    /// Fix-safety for an issue kind. Unmapped kinds require manual review.
    pub fn fix_safety_for(&self, kind: &IssueKind) -> FixSafety {
        self.fix_safety
            .get(kind.as_str())
            .copied()
            .unwrap_or(FixSafety::ManualReviewRequired)
    }

    /// Apply the classification tables to an issue. Tags already set by the
    /// producing stage are kept; policy tags win on conflict.
    pub fn classify_issue(&self, issue: &mut Issue) {
        issue.compliance.extend(self.compliance_for(&issue.kind));
        issue.fix_safety = self.fix_safety_for(&issue.kind);
    }

    /// A short, stable summary for audit payloads.
    pub fn audit_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "version": self.version,
            "revision": self.revision,
            "air_gapped": self.air_gapped,
            "sensitive_paths": self.sensitive_paths.len(),
            "content_signals": self.content_signals.len(),
            "overrides": self.overrides.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{kinds, Location, Severity, Stage};

    #[test]
    fn test_builtin_policy_is_valid() {
        let policy = Policy::builtin().unwrap();
        assert!(!policy.air_gapped);
        assert!(policy.content_signals().len() >= 5);
        assert_eq!(policy.version, 1);
    }

    #[test]
    fn test_glob_matching() {
        let g = Glob::new("**/.env").unwrap();
        assert!(g.matches(".env"));
        assert!(g.matches("app/config/.env"));
        assert!(!g.matches("app/.envrc"));

        let g = Glob::new("*.pem").unwrap();
        assert!(g.matches("certs/server.pem"));
        assert!(!g.matches("certs/server.pem.bak"));

        let g = Glob::new("**/secrets/**").unwrap();
        assert!(g.matches("deploy/secrets/db.yaml"));
        assert!(!g.matches("deploy/secret/db.yaml"));

        let g = Glob::new("vendor/*.go").unwrap();
        assert!(g.matches("vendor/x.go"));
        assert!(!g.matches("vendor/a/x.go"));
    }

    #[test]
    fn test_glob_classes_and_alternation() {
        let g = Glob::new("*.{pem,key}").unwrap();
        assert!(g.matches("certs/server.key"));
        assert!(g.matches("./tls/ca.pem"));
        assert!(!g.matches("certs/server.crt"));

        let g = Glob::new("config/[ps]rod?.yaml").unwrap();
        assert!(g.matches("config/prod1.yaml"));
        assert!(g.matches("config\\srodx.yaml"));
        assert!(!g.matches("config/prod/1.yaml"));
        assert_eq!(g.as_str(), "config/[ps]rod?.yaml");
    }

    #[test]
    fn test_malformed_glob_is_rejected_at_load() {
        assert!(Glob::new("secrets/[abc").is_err());
        assert!(Glob::new("   ").is_err());
        let err = Policy::from_toml_str(
            "[[sensitive_paths]]\npattern = \"keys/{a,b\"\nreason = \"keys\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPattern { .. }), "{err}");
    }

    #[test]
    fn test_unknown_field_is_fatal() {
        let err = Policy::from_toml_str("air_gaped = true\n").unwrap_err();
        assert!(matches!(err, PolicyError::Malformed(_)));
    }

    #[test]
    fn test_bad_regex_is_fatal() {
        let text = r#"
[[content_signals]]
name = "broken"
category = "secret"
regex = '(unclosed'
"#;
        let err = Policy::from_toml_str(text).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPattern { .. }));
    }

    #[test]
    fn test_duplicate_signal_names_rejected() {
        let text = r#"
[[content_signals]]
name = "dup"
category = "secret"
regex = 'a'

[[content_signals]]
name = "dup"
category = "pii"
regex = 'b'
"#;
        let err = Policy::from_toml_str(text).unwrap_err();
        assert!(matches!(err, PolicyError::Inconsistent(_)));
    }

    #[test]
    fn test_classify_issue_applies_tables() {
        let policy = Policy::builtin().unwrap();
        let mut issue = Issue::new(
            IssueKind::new(kinds::WEAK_HASH),
            Severity::Medium,
            Location::new("a.py", 1, 1),
            "md5",
            Stage::Symbolic,
        );
        policy.classify_issue(&mut issue);
        assert_eq!(issue.fix_safety, FixSafety::AutoFixableLowRisk);
        assert_eq!(issue.compliance.get("CWE").map(String::as_str), Some("CWE-328"));

        let mut unknown = Issue::new(
            IssueKind::new("novel-thing"),
            Severity::Low,
            Location::new("a.py", 1, 1),
            "?",
            Stage::Inference,
        );
        policy.classify_issue(&mut unknown);
        assert_eq!(unknown.fix_safety, FixSafety::ManualReviewRequired);
        assert!(unknown.compliance.is_empty());
    }
}
