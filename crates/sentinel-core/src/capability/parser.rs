//! Structural parsing.

use regex::Regex;

use super::error::ParseError;
use super::syntax::{Language, NodeKind, SyntaxNode, SyntaxTree};
use crate::domain::FileSnapshot;

/// Produces a syntax tree from a file snapshot. Runs locally and in-process.
pub trait Parser: Send + Sync {
    fn parse(&self, snapshot: &FileSnapshot, language: Language) -> Result<SyntaxTree, ParseError>;
}

/// Line-oriented parser recognising functions, imports, string literals,
/// and whole-line comments across the common languages.
#[derive(Debug, Clone)]
pub struct LineParser {
    max_bytes: u64,
    function: Regex,
    import: Regex,
    string: Regex,
}

impl LineParser {
    pub const DEFAULT_MAX_BYTES: u64 = 4 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_max_bytes(Self::DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            function: Regex::new(r"\b(?:def|fn|func|function|sub)\s+([A-Za-z_][A-Za-z0-9_]*)")
                .expect("function pattern is valid"),
            import: Regex::new(
                r"^\s*(?:import\s+\S+|from\s+\S+\s+import\b|use\s+[\w:]+|#include\s*[<\x22]|require\s*\(|const\s+\w+\s*=\s*require\s*\()",
            )
            .expect("import pattern is valid"),
            string: Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#)
                .expect("string pattern is valid"),
        }
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for LineParser {
    fn parse(&self, snapshot: &FileSnapshot, language: Language) -> Result<SyntaxTree, ParseError> {
        if snapshot.byte_len > self.max_bytes {
            return Err(ParseError::TooLarge {
                size: snapshot.byte_len,
                limit: self.max_bytes,
            });
        }
        if snapshot.content().contains(&0) {
            return Err(ParseError::Binary);
        }
        let text = snapshot.text().ok_or(ParseError::InvalidUtf8)?;
        let prefixes = language.comment_prefixes();

        let mut lines = Vec::new();
        let mut nodes = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = raw.trim_start();

            if prefixes.iter().any(|p| trimmed.starts_with(p)) {
                nodes.push(node(NodeKind::Comment, line_no, raw, trimmed));
            } else {
                if self.import.is_match(raw) {
                    nodes.push(node(NodeKind::Import, line_no, raw, trimmed));
                }
                if let Some(m) = self.function.captures(raw).and_then(|c| c.get(1)) {
                    nodes.push(SyntaxNode {
                        kind: NodeKind::Function,
                        line: line_no,
                        column: m.start() as u32 + 1,
                        text: m.as_str().to_string(),
                    });
                }
                for m in self.string.find_iter(raw) {
                    nodes.push(SyntaxNode {
                        kind: NodeKind::StringLiteral,
                        line: line_no,
                        column: m.start() as u32 + 1,
                        text: m.as_str().to_string(),
                    });
                }
            }
            lines.push(raw.to_string());
        }

        Ok(SyntaxTree {
            path: snapshot.path.clone(),
            language,
            lines,
            nodes,
        })
    }
}

fn node(kind: NodeKind, line: u32, raw: &str, trimmed: &str) -> SyntaxNode {
    SyntaxNode {
        kind,
        line,
        column: (raw.len() - trimmed.len()) as u32 + 1,
        text: trimmed.trim_end().to_string(),
    }
}
