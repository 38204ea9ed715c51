//! Read-only probes against an import target

use crate::sql::{Identifier, SqlStatement};

use super::{DbResult, SqlExecutor};

pub fn table_exists_statement(schema: &Identifier, table: &Identifier) -> SqlStatement {
    SqlStatement::raw(
        "SELECT count(*) FROM pg_catalog.pg_tables WHERE schemaname = $1 AND tablename = $2",
    )
    .with_param(schema.as_str())
    .with_param(table.as_str())
}

pub fn running_queries_statement(application_name: &str) -> SqlStatement {
    SqlStatement::raw(
        "SELECT query FROM pg_catalog.pg_stat_activity \
         WHERE application_name = $1 AND state = 'active' \
         AND backend_type = 'client backend' AND pid <> pg_backend_pid()",
    )
    .with_param(application_name)
}

/// Whether `schema.table` exists.
pub async fn table_exists(
    executor: &dyn SqlExecutor,
    schema: &Identifier,
    table: &Identifier,
) -> DbResult<bool> {
    let count = executor
        .fetch_i64(&table_exists_statement(schema, table))
        .await?;
    Ok(count > 0)
}

/// Statements currently executing on sessions tagged with `application_name`.
pub async fn running_queries(
    executor: &dyn SqlExecutor,
    application_name: &str,
) -> DbResult<Vec<String>> {
    executor
        .fetch_strings(&running_queries_statement(application_name))
        .await
}
