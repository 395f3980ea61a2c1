//! Findings produced by the analysis stages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::route::Stage;

/// Well-known issue kinds produced by the built-in analyzers.
pub mod kinds {
    pub const HARDCODED_SECRET: &str = "hardcoded-secret";
    pub const PRIVATE_KEY: &str = "private-key";
    pub const SQL_INJECTION: &str = "sql-injection-pattern";
    pub const COMMAND_INJECTION: &str = "command-injection-pattern";
    pub const WEAK_HASH: &str = "weak-hash";
    pub const UNSAFE_DESERIALIZATION: &str = "unsafe-deserialization";
    pub const DYNAMIC_EVAL: &str = "dynamic-eval";
}

/// Severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "informational" | "note" => Ok(Severity::Info),
            "low" | "minor" => Ok(Severity::Low),
            "medium" | "moderate" | "warning" => Ok(Severity::Medium),
            "high" | "major" | "error" => Ok(Severity::High),
            "critical" | "blocker" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Issue category, e.g. `hardcoded-secret`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueKind(String);

impl IssueKind {
    /// Normalizes to lowercase kebab-case.
    pub fn new(kind: impl AsRef<str>) -> Self {
        IssueKind(
            kind.as_ref()
                .trim()
                .to_ascii_lowercase()
                .replace(['_', ' '], "-"),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source position of a finding. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub line: u32,
    #[serde(default = "default_column")]
    pub column: u32,
}

fn default_column() -> u32 {
    1
}

impl Location {
    pub fn new(path: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.column)
    }
}

/// Whether a fix may be applied without human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixSafety {
    AutoFixableLowRisk,
    #[default]
    ManualReviewRequired,
}

/// Compliance framework name → clause id.
pub type ComplianceTags = BTreeMap<String, String>;

/// Identity used for cross-stage deduplication.
pub type IssueKey = (IssueKind, Location);

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub location: Location,
    pub message: String,
    /// Stage that produced this classification.
    pub stage: Stage,
    #[serde(default)]
    pub compliance: ComplianceTags,
    #[serde(default)]
    pub fix_safety: FixSafety,
}

impl Issue {
    pub fn new(
        kind: IssueKind,
        severity: Severity,
        location: Location,
        message: impl Into<String>,
        stage: Stage,
    ) -> Self {
        Self {
            kind,
            severity,
            location,
            message: message.into(),
            stage,
            compliance: ComplianceTags::new(),
            fix_safety: FixSafety::default(),
        }
    }

    pub fn key(&self) -> IssueKey {
        (self.kind.clone(), self.location.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
        assert_eq!("Warning".parse::<Severity>().unwrap(), Severity::Medium);
    }

    #[test]
    fn test_issue_kind_normalizes() {
        assert_eq!(IssueKind::new("SQL_Injection Pattern").as_str(), "sql-injection-pattern");
    }

    #[test]
    fn test_fix_safety_wire_format() {
        let json = serde_json::to_string(&FixSafety::AutoFixableLowRisk).unwrap();
        assert_eq!(json, "\"auto-fixable-low-risk\"");
        assert_eq!(FixSafety::default(), FixSafety::ManualReviewRequired);
    }

    #[test]
    fn test_issue_key_ignores_severity_and_stage() {
        let loc = Location::new("a.py", 3, 1);
        let a = Issue::new(
            IssueKind::new(kinds::WEAK_HASH),
            Severity::Low,
            loc.clone(),
            "md5",
            Stage::Symbolic,
        );
        let b = Issue::new(
            IssueKind::new(kinds::WEAK_HASH),
            Severity::High,
            loc,
            "md5 used for passwords",
            Stage::Inference,
        );
        assert_eq!(a.key(), b.key());
    }
}
