//! Query templates with named variables and nested fragments
//!
//! A template holds `${name}` variable placeholders and `${{name}}` fragment
//! placeholders. [`SqlQuery::substitute`] expands both in one left-to-right
//! pass; a fragment is rendered recursively with its own variables layered
//! over the parent's. Substituted text is never re-scanned, so a literal that
//! happens to contain `${x}` stays inert.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

use super::identifier::Identifier;

const MAX_FRAGMENT_DEPTH: usize = 16;

// Hardcoded pattern, always valid
#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{([A-Za-z0-9_]+)\}\}|\$\{([A-Za-z0-9_]+)\}")
        .expect("placeholder pattern compiles")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unresolved variable '${{{0}}}'")]
    UnresolvedVariable(String),

    #[error("Unresolved fragment '${{{{{0}}}}}'")]
    UnresolvedFragment(String),

    #[error("Fragments nested deeper than {MAX_FRAGMENT_DEPTH} levels")]
    TooDeep,
}

/// A value that may be spliced into statement text
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Identifier(Identifier),
    Literal(String),
    Integer(i64),
    Boolean(bool),
}

impl SqlValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    fn render(&self) -> String {
        match self {
            SqlValue::Identifier(ident) => ident.quoted(),
            SqlValue::Literal(text) => format!("'{}'", text.replace('\'', "''")),
            SqlValue::Integer(n) => n.to_string(),
            SqlValue::Boolean(b) => b.to_string(),
        }
    }
}

impl From<Identifier> for SqlValue {
    fn from(ident: Identifier) -> Self {
        Self::Identifier(ident)
    }
}

impl From<&Identifier> for SqlValue {
    fn from(ident: &Identifier) -> Self {
        Self::Identifier(ident.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Statement template
#[derive(Debug, Clone, Default)]
pub struct SqlQuery {
    text: String,
    variables: HashMap<String, SqlValue>,
    fragments: HashMap<String, SqlQuery>,
    params: Vec<String>,
}

impl SqlQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn append(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    pub fn set_variable(&mut self, name: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    pub fn set_fragment(&mut self, name: &str, fragment: SqlQuery) -> &mut Self {
        self.fragments.insert(name.to_string(), fragment);
        self
    }

    /// Positional `$n` parameter, bound by the driver rather than spliced.
    pub fn bind(&mut self, value: impl Into<String>) -> &mut Self {
        self.params.push(value.into());
        self
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.set_variable(name, value);
        self
    }

    pub fn with_fragment(mut self, name: &str, fragment: SqlQuery) -> Self {
        self.set_fragment(name, fragment);
        self
    }

    pub fn with_param(mut self, value: impl Into<String>) -> Self {
        self.bind(value);
        self
    }

    /// Expand all placeholders into an executable statement.
    pub fn substitute(&self) -> Result<SqlStatement, TemplateError> {
        let text = self.render(&HashMap::new(), 0)?;
        Ok(SqlStatement {
            text,
            params: self.params.clone(),
        })
    }

    fn render(
        &self,
        inherited: &HashMap<String, SqlValue>,
        depth: usize,
    ) -> Result<String, TemplateError> {
        if depth > MAX_FRAGMENT_DEPTH {
            return Err(TemplateError::TooDeep);
        }

        let mut scope = inherited.clone();
        scope.extend(self.variables.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(&self.text) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((last, last));
            out.push_str(&self.text[last..whole.0]);
            out.push_str(&self.expand(&caps, &scope, depth)?);
            last = whole.1;
        }
        out.push_str(&self.text[last..]);

        Ok(out)
    }

    fn expand(
        &self,
        caps: &Captures<'_>,
        scope: &HashMap<String, SqlValue>,
        depth: usize,
    ) -> Result<String, TemplateError> {
        if let Some(name) = caps.get(1).map(|m| m.as_str()) {
            let fragment = self
                .fragments
                .get(name)
                .ok_or_else(|| TemplateError::UnresolvedFragment(name.to_string()))?;
            return fragment.render(scope, depth + 1);
        }

        let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        scope
            .get(name)
            .map(SqlValue::render)
            .ok_or_else(|| TemplateError::UnresolvedVariable(name.to_string()))
    }
}

/// Fully expanded statement plus its positional parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    text: String,
    params: Vec<String>,
}

impl SqlStatement {
    /// Statement text used verbatim, for queries without placeholders.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
