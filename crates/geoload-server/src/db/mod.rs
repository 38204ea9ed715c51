//! Database access for import targets
//!
//! The import pipeline never touches `sqlx` directly. It talks to a
//! [`SqlExecutor`], obtained per connector from a [`ConnectorRegistry`], so the
//! orchestration logic can run against any backend that understands the
//! rendered statements (and against a recording fake in tests).

pub mod registry;
pub mod status;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::sql::SqlStatement;

pub use registry::{ConnectorRegistry, PgConnectorRegistry};

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    /// The pool could not hand out a connection (timeout, closed, network)
    #[error("No database connection available: {0}")]
    NoConnection(String),

    /// SQL query error
    #[error("Database query failed: {0}")]
    Sqlx(sqlx::Error),

    /// No client is registered for the requested connector id
    #[error("Unknown connector '{0}'")]
    UnknownConnector(String),

    /// The query succeeded but did not return the expected shape
    #[error("Unexpected result: {0}")]
    UnexpectedRow(String),

    /// Database configuration is invalid or missing
    #[error("Database configuration error: {0}. Check DATABASE_URL and GEOLOAD_CONNECTORS.")]
    Config(String),
}

impl DbError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an unexpected-row error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedRow(message.into())
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DbError::NoConnection(err.to_string()),
            other => DbError::Sqlx(other),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Executes rendered statements against one backend
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a statement, returning the affected row count.
    async fn execute(&self, statement: &SqlStatement) -> DbResult<u64>;

    /// Run a query returning a single integer.
    async fn fetch_i64(&self, statement: &SqlStatement) -> DbResult<i64>;

    /// Run a query and collect the first column of every row as text.
    /// NULLs are skipped.
    async fn fetch_strings(&self, statement: &SqlStatement) -> DbResult<Vec<String>>;

    /// First column of the first row as text.
    async fn fetch_string(&self, statement: &SqlStatement) -> DbResult<String> {
        self.fetch_strings(statement)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::unexpected(format!("no rows for: {}", statement.text())))
    }
}

#[async_trait]
impl SqlExecutor for PgPool {
    async fn execute(&self, statement: &SqlStatement) -> DbResult<u64> {
        let result = if statement.params().is_empty() {
            // Multi-statement DDL has no parameters and needs the simple protocol.
            sqlx::raw_sql(statement.text()).execute(self).await?
        } else {
            let mut query = sqlx::query(statement.text());
            for param in statement.params() {
                query = query.bind(param.as_str());
            }
            query.execute(self).await?
        };
        Ok(result.rows_affected())
    }

    async fn fetch_i64(&self, statement: &SqlStatement) -> DbResult<i64> {
        let mut query = sqlx::query_scalar::<_, i64>(statement.text());
        for param in statement.params() {
            query = query.bind(param.as_str());
        }
        Ok(query.fetch_one(self).await?)
    }

    async fn fetch_strings(&self, statement: &SqlStatement) -> DbResult<Vec<String>> {
        let mut query = sqlx::query(statement.text());
        for param in statement.params() {
            query = query.bind(param.as_str());
        }
        let rows = query.fetch_all(self).await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(value) = row.try_get::<Option<String>, _>(0)? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

/// Pool options shared by the job database and the connector pools.
pub fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
}

/// Connect the pool that holds job records.
pub async fn create_pool(config: &DatabaseConfig) -> DbResult<PgPool> {
    let pool = pool_options(config).connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}
