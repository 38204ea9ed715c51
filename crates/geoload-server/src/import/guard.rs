//! Fresh-table check that gates every import
//!
//! Each target table owns a `<table>_version_seq` sequence that every write
//! advances. Claiming the table calls `nextval` once: a table that has never
//! been written returns 1, anything else means another import (or regular
//! traffic) already touched it. `nextval` is atomic, so of any number of
//! concurrent claimants at most one ever observes 1.

use tracing::{info, instrument, warn};

use crate::db::SqlExecutor;
use crate::error::{ImportError, ImportResult, ImportStage};
use crate::sql::{Identifier, SqlQuery, SqlStatement, SqlValue, TemplateError};

/// Version a fresh table hands out on its first `nextval`.
pub const FRESH_TABLE_VERSION: i64 = 1;

pub fn claim_statement(
    schema: &Identifier,
    table: &Identifier,
) -> Result<SqlStatement, ImportError> {
    let sequence = table
        .with_suffix("_version_seq")
        .map_err(|e| ImportError::during(ImportStage::Preparation, e))?;

    // nextval takes a regclass literal, so the qualified name is passed as text.
    SqlQuery::new("SELECT nextval(${sequence})")
        .with_variable(
            "sequence",
            SqlValue::literal(format!("{}.{}", schema.quoted(), sequence.quoted())),
        )
        .substitute()
        .map_err(|e: TemplateError| ImportError::during(ImportStage::Preparation, e))
}

pub struct ConsistencyGuard;

impl ConsistencyGuard {
    /// Advance the table's version sequence and return the new value when the
    /// table was fresh. Any other value is a [`ImportError::SequenceNot0`].
    /// The sequence is consumed either way.
    #[instrument(skip_all, fields(schema = %schema, table = %table))]
    pub async fn check_and_claim_empty(
        executor: &dyn SqlExecutor,
        schema: &Identifier,
        table: &Identifier,
    ) -> ImportResult<i64> {
        let statement = claim_statement(schema, table)?;
        let version = executor
            .fetch_i64(&statement)
            .await
            .map_err(|e| ImportError::during(ImportStage::Preparation, e))?;

        if version != FRESH_TABLE_VERSION {
            warn!(version, "Target table was already written, refusing import");
            return Err(ImportError::SequenceNot0 { version });
        }

        info!(version, "Claimed fresh target table");
        Ok(version)
    }
}
