//! Index definitions rebuilt after a bulk load
//!
//! Which indices exist depends on the table layout: the legacy layout knows
//! seven, the versioned layout adds five column indices on top. The choice is
//! made once per process from configuration.

use std::fmt;

use crate::sql::{Identifier, IdentifierError, SqlQuery, SqlStatement, TemplateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Id,
    Geo,
    CreatedAt,
    UpdatedAt,
    Serial,
    Tags,
    Viz,
    IdNew,
    Version,
    IdVersion,
    Operation,
    Author,
}

impl IndexKind {
    /// Stable key, used in index names and `idxList` entries.
    pub fn key(self) -> &'static str {
        match self {
            IndexKind::Id => "id",
            IndexKind::Geo => "geo",
            IndexKind::CreatedAt => "createdAt",
            IndexKind::UpdatedAt => "updatedAt",
            IndexKind::Serial => "serial",
            IndexKind::Tags => "tags",
            IndexKind::Viz => "viz",
            IndexKind::IdNew => "idnew",
            IndexKind::Version => "version",
            IndexKind::IdVersion => "idversion",
            IndexKind::Operation => "operation",
            IndexKind::Author => "author",
        }
    }

    /// `CREATE INDEX` template over `${idx_name}`, `${schema}` and `${table}`.
    pub fn definition(self) -> &'static str {
        match self {
            IndexKind::Id => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} ((jsondata->>'id'))"
            }
            IndexKind::Geo => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING gist ((geo))"
            }
            IndexKind::CreatedAt => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree \
                 ((jsondata->'properties'->'@ns:com:here:xyz'->'createdAt'), (jsondata->>'id'))"
            }
            IndexKind::UpdatedAt => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree \
                 ((jsondata->'properties'->'@ns:com:here:xyz'->'updatedAt'), (jsondata->>'id'))"
            }
            IndexKind::Serial => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree ((i))"
            }
            IndexKind::Tags => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING gin \
                 ((jsondata->'properties'->'@ns:com:here:xyz'->'tags') jsonb_ops)"
            }
            IndexKind::Viz => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree \
                 (left(md5(''||i),5))"
            }
            IndexKind::IdNew => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree (id)"
            }
            IndexKind::Version => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree (version)"
            }
            IndexKind::IdVersion => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree (id,version)"
            }
            IndexKind::Operation => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree (operation)"
            }
            IndexKind::Author => {
                "CREATE INDEX IF NOT EXISTS ${idx_name} ON ${schema}.${table} USING btree (author)"
            }
        }
    }

    /// `idx_<table>_<key>`, folded to lower case so it matches indices
    /// created under the unquoted name.
    pub fn index_name(self, table: &Identifier) -> Result<Identifier, IdentifierError> {
        Identifier::new(format!("idx_{}_{}", table.as_str(), self.key()).to_ascii_lowercase())
    }

    pub fn statement(
        self,
        schema: &Identifier,
        table: &Identifier,
    ) -> Result<SqlStatement, CatalogError> {
        let statement = SqlQuery::new(self.definition())
            .with_variable("idx_name", self.index_name(table)?)
            .with_variable("schema", schema)
            .with_variable("table", table)
            .substitute()?;
        Ok(statement)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

const LEGACY_INDICES: [IndexKind; 7] = [
    IndexKind::Id,
    IndexKind::Geo,
    IndexKind::CreatedAt,
    IndexKind::UpdatedAt,
    IndexKind::Serial,
    IndexKind::Tags,
    IndexKind::Viz,
];

const EXTENDED_INDICES: [IndexKind; 12] = [
    IndexKind::Id,
    IndexKind::Geo,
    IndexKind::CreatedAt,
    IndexKind::UpdatedAt,
    IndexKind::Serial,
    IndexKind::Tags,
    IndexKind::Viz,
    IndexKind::IdNew,
    IndexKind::Version,
    IndexKind::IdVersion,
    IndexKind::Operation,
    IndexKind::Author,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLayout {
    Legacy,
    Extended,
}

impl IndexLayout {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            IndexLayout::Legacy
        } else {
            IndexLayout::Extended
        }
    }

    pub fn is_legacy(self) -> bool {
        self == IndexLayout::Legacy
    }

    pub fn indices(self) -> &'static [IndexKind] {
        match self {
            IndexLayout::Legacy => &LEGACY_INDICES,
            IndexLayout::Extended => &EXTENDED_INDICES,
        }
    }
}

/// A physical part of the partitioned target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    suffix: Option<String>,
}

impl Segment {
    pub const ROOT_NAME: &'static str = "root";

    pub fn head() -> Self {
        Self::named("head")
    }

    pub fn p0() -> Self {
        Self::named("p0")
    }

    /// The partitioned parent itself.
    pub fn root() -> Self {
        Self { suffix: None }
    }

    /// `root` maps to the parent, any other name `n` to the `_n` partition.
    pub fn named(name: &str) -> Self {
        if name.eq_ignore_ascii_case(Self::ROOT_NAME) {
            Self::root()
        } else {
            Self {
                suffix: Some(name.to_string()),
            }
        }
    }

    pub fn default_order() -> Vec<Segment> {
        vec![Self::head(), Self::p0(), Self::root()]
    }

    pub fn is_root(&self) -> bool {
        self.suffix.is_none()
    }

    pub fn table_for(&self, base: &Identifier) -> Result<Identifier, IdentifierError> {
        match &self.suffix {
            Some(suffix) => base.with_suffix(&format!("_{}", suffix)),
            None => Ok(base.clone()),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.suffix {
            Some(suffix) => f.write_str(suffix),
            None => f.write_str(Self::ROOT_NAME),
        }
    }
}

/// Indices to build on one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub segment: Segment,
    pub indices: Vec<IndexKind>,
}

impl IndexPlan {
    /// The viz index is only built on the root; building it on the head and
    /// p0 partitions collides with the names Postgres generates for the
    /// parent's inherited index.
    pub fn for_segment(layout: IndexLayout, segment: Segment) -> Self {
        let indices = layout
            .indices()
            .iter()
            .copied()
            .filter(|kind| segment.is_root() || *kind != IndexKind::Viz)
            .collect();
        Self { segment, indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(IndexLayout::Legacy.indices().len(), 7);
        assert_eq!(IndexLayout::Extended.indices().len(), 12);
        assert!(IndexLayout::from_legacy_flag(true).is_legacy());
    }

    #[test]
    fn test_viz_only_on_root() {
        let head = IndexPlan::for_segment(IndexLayout::Legacy, Segment::head());
        let root = IndexPlan::for_segment(IndexLayout::Legacy, Segment::root());
        assert_eq!(head.len(), 6);
        assert!(!head.indices.contains(&IndexKind::Viz));
        assert_eq!(root.len(), 7);
        assert!(root.indices.contains(&IndexKind::Viz));
    }

    #[test]
    fn test_segment_tables() {
        let base = ident("3b32d555c6a2eb07009fbf382564d9e1");
        assert_eq!(
            Segment::head().table_for(&base).unwrap().as_str(),
            "3b32d555c6a2eb07009fbf382564d9e1_head"
        );
        assert_eq!(Segment::named("ROOT"), Segment::root());
        assert_eq!(Segment::root().table_for(&base).unwrap(), base);
        assert_eq!(Segment::p0().to_string(), "p0");
    }

    #[test]
    fn test_index_statement() {
        let statement = IndexKind::CreatedAt
            .statement(&ident("public"), &ident("t1_head"))
            .unwrap();
        assert_eq!(
            statement.text(),
            "CREATE INDEX IF NOT EXISTS \"idx_t1_head_createdat\" ON \"public\".\"t1_head\" \
             USING btree ((jsondata->'properties'->'@ns:com:here:xyz'->'createdAt'), (jsondata->>'id'))"
        );
    }

    #[test]
    fn test_index_names_are_folded() {
        let table = ident("t1");
        assert_eq!(
            IndexKind::CreatedAt.index_name(&table).unwrap().as_str(),
            "idx_t1_createdat"
        );
        assert_eq!(
            IndexKind::UpdatedAt.index_name(&table).unwrap().as_str(),
            "idx_t1_updatedat"
        );
        assert_eq!(IndexKind::Geo.index_name(&table).unwrap().as_str(), "idx_t1_geo");
        assert_eq!(
            IndexKind::UpdatedAt.index_name(&table).unwrap().quoted(),
            "\"idx_t1_updatedat\""
        );
    }

    #[test]
    fn test_viz_definition_keeps_literal() {
        let statement = IndexKind::Viz
            .statement(&ident("public"), &ident("t1"))
            .unwrap();
        assert!(statement.text().ends_with("USING btree (left(md5(''||i),5))"));
    }
}
