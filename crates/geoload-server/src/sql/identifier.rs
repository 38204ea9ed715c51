//! Validated SQL identifiers

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// PostgreSQL truncates identifiers beyond this length (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[allow(clippy::expect_used)]
static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_\-]*$").expect("identifier pattern compiles"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Identifier is required and cannot be empty")]
    Empty,

    #[error("Identifier '{0}' exceeds {MAX_IDENTIFIER_LEN} bytes")]
    TooLong(String),

    #[error("Identifier '{0}' may only contain letters, digits, '_' and '-'")]
    InvalidCharacters(String),
}

/// A schema, table, trigger, view or index name that is safe to splice into
/// statement text. Rendered double-quoted so case and leading digits survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();

        if name.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong(name));
        }
        if !IDENTIFIER_PATTERN.is_match(&name) {
            return Err(IdentifierError::InvalidCharacters(name));
        }

        Ok(Self(name))
    }

    /// Build a sibling name such as `<table>_head` or `<table>_version_seq`.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, IdentifierError> {
        Self::new(format!("{}{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
