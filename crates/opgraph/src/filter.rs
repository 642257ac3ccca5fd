//! Name filters narrowing a set of operations
//!
//! Two flavours are supported:
//! - glob: shell-style `*`, `?`, `[seq]`, `[!seq]`, matched against the whole name
//! - regex: matched from the start of the name

use crate::error::{Error, Result};
use crate::operation::Operation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of filter expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Glob,
    Regex,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob => write!(f, "glob"),
            Self::Regex => write!(f, "regex"),
        }
    }
}

/// Serializable description of a filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub expression: String,
}

impl FilterSpec {
    pub fn glob(expression: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Glob,
            expression: expression.into(),
        }
    }

    pub fn regex(expression: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Regex,
            expression: expression.into(),
        }
    }

    /// Compile into a usable filter
    pub fn compile(&self) -> Result<OperationFilter> {
        OperationFilter::new(self.clone())
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.expression)
    }
}

/// Compiled operation name filter
#[derive(Debug, Clone)]
pub struct OperationFilter {
    spec: FilterSpec,
    regex: Regex,
}

impl OperationFilter {
    pub fn new(spec: FilterSpec) -> Result<Self> {
        let pattern = match spec.kind {
            FilterKind::Glob => glob_to_regex(&spec.expression),
            FilterKind::Regex => format!("^(?:{})", spec.expression),
        };
        let regex = Regex::new(&pattern).map_err(|source| Error::InvalidFilter {
            expression: spec.expression.clone(),
            source,
        })?;
        Ok(Self { spec, regex })
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    /// Whether an operation name passes the filter
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Keep the operations whose name passes, preserving order
    pub fn apply<'a>(&self, operations: Vec<&'a Operation>) -> Vec<&'a Operation> {
        operations
            .into_iter()
            .filter(|op| self.matches(op.name()))
            .collect()
    }
}

/// Translate a shell glob into an anchored regular expression
pub fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; a `]` right after `[` or `[!` is literal
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str("\\[");
                } else {
                    let raw: String = chars[i + 1..j].iter().collect();
                    let (negate, body) = match raw.strip_prefix('!') {
                        Some(rest) => (true, rest.to_string()),
                        None => (false, raw),
                    };
                    let body = body.replace('\\', "\\\\").replace('[', "\\[");
                    out.push('[');
                    if negate {
                        out.push('^');
                    } else if body.starts_with('^') {
                        out.push('\\');
                    }
                    out.push_str(&body);
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matches_whole_name() {
        let filter = FilterSpec::glob("hdfs_*").compile().unwrap();
        assert!(filter.matches("hdfs_config"));
        assert!(filter.matches("hdfs_namenode_start"));
        assert!(!filter.matches("yarn_hdfs_config"));
    }

    #[test]
    fn test_glob_character_classes() {
        let filter = FilterSpec::glob("*_[cs]tart").compile().unwrap();
        assert!(filter.matches("hdfs_start"));
        assert!(!filter.matches("hdfs_restart"));

        let filter = FilterSpec::glob("hdfs_[!c]*").compile().unwrap();
        assert!(filter.matches("hdfs_start"));
        assert!(!filter.matches("hdfs_config"));

        let filter = FilterSpec::glob("a?c_x").compile().unwrap();
        assert!(filter.matches("abc_x"));
        assert!(!filter.matches("ac_x"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let filter = FilterSpec::glob("a.b_*").compile().unwrap();
        assert!(!filter.matches("axb_config"));
    }

    #[test]
    fn test_regex_is_anchored_at_start() {
        let filter = FilterSpec::regex("hdfs|yarn").compile().unwrap();
        assert!(filter.matches("yarn_config"));
        assert!(!filter.matches("spark_yarn_config"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = FilterSpec::regex("(").compile().unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
    }
}
