//! Syntax tree handed from the parse stage to later stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    Ruby,
    Php,
    CSharp,
    C,
    Cpp,
    Shell,
    Sql,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "py" | "pyw" => Language::Python,
            "js" | "mjs" | "cjs" | "jsx" => Language::JavaScript,
            "ts" | "tsx" | "mts" => Language::TypeScript,
            "java" | "kt" => Language::Java,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "cs" => Language::CSharp,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" => Language::Cpp,
            "sh" | "bash" | "zsh" => Language::Shell,
            "sql" => Language::Sql,
            _ => Language::Unknown,
        }
    }

    /// Resolve from a caller hint (name or extension), else the path.
    pub fn detect(hint: Option<&str>, path: &str) -> Self {
        if let Some(hint) = hint {
            let lang = Self::from_name(hint);
            if lang != Language::Unknown {
                return lang;
            }
        }
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "python" => Language::Python,
            "javascript" => Language::JavaScript,
            "typescript" => Language::TypeScript,
            "java" | "kotlin" => Language::Java,
            "go" | "golang" => Language::Go,
            "rust" => Language::Rust,
            "ruby" => Language::Ruby,
            "php" => Language::Php,
            "csharp" | "c#" => Language::CSharp,
            "c" => Language::C,
            "cpp" | "c++" => Language::Cpp,
            "shell" | "bash" => Language::Shell,
            "sql" => Language::Sql,
            other => Self::from_extension(other),
        }
    }

    /// Single-line comment prefixes.
    pub fn comment_prefixes(&self) -> &'static [&'static str] {
        match self {
            Language::Python | Language::Ruby | Language::Shell => &["#"],
            Language::Sql => &["--"],
            Language::Php => &["//", "#", "*", "/*"],
            Language::Unknown => &["#", "//"],
            _ => &["//", "*", "/*"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::CSharp => "csharp",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Import,
    StringLiteral,
    Comment,
}

/// A structural element located on one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    /// 1-based.
    pub line: u32,
    /// 1-based.
    pub column: u32,
    pub text: String,
}

/// Line-oriented syntax tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxTree {
    pub path: String,
    pub language: Language,
    pub lines: Vec<String>,
    pub nodes: Vec<SyntaxNode>,
}

impl SyntaxTree {
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &SyntaxNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// `true` when the 1-based `line` is a whole-line comment.
    pub fn is_comment_line(&self, line: u32) -> bool {
        self.nodes
            .iter()
            .any(|n| n.kind == NodeKind::Comment && n.line == line)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_hint() {
        assert_eq!(Language::detect(Some("python"), "x.js"), Language::Python);
        assert_eq!(Language::detect(Some("nonsense"), "x.js"), Language::JavaScript);
        assert_eq!(Language::detect(None, "Makefile"), Language::Unknown);
        assert_eq!(Language::detect(Some("ts"), "x"), Language::TypeScript);
    }
}
