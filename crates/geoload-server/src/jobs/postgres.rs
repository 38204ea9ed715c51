//! Relational job store
//!
//! Each job is one row of `geoload_jobs`. The full record lives in the JSONB
//! `payload`; `job_type`, `status` and `target_space_id` are copied into
//! columns so listings can filter without unpacking it.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::model::{Job, JobStatus};
use super::repository::{JobFilter, JobStore, RepositoryError, RepositoryResult};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(id: String, payload: serde_json::Value) -> RepositoryResult<Job> {
    serde_json::from_value(payload).map_err(|source| RepositoryError::Serialization { id, source })
}

fn encode(job: &Job) -> RepositoryResult<serde_json::Value> {
    serde_json::to_value(job).map_err(|source| RepositoryError::Serialization {
        id: job.id().to_string(),
        source,
    })
}

/// States in which an import is considered running.
fn running_states() -> Vec<String> {
    JobStatus::ALL
        .into_iter()
        .filter(|s| *s != JobStatus::Waiting && !s.is_terminal())
        .map(|s| s.as_str().to_string())
        .collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self))]
    async fn load(&self, id: &str) -> RepositoryResult<Option<Job>> {
        let row = sqlx::query_as::<_, (String, serde_json::Value)>(
            "SELECT id, payload FROM geoload_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, payload)| decode(id, payload)).transpose()
    }

    #[instrument(skip(self))]
    async fn load_all(&self, filter: &JobFilter) -> RepositoryResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            r#"
            SELECT id, payload FROM geoload_jobs
            WHERE ($1::text IS NULL OR job_type = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR target_space_id = $3)
            ORDER BY created_at, id
            "#,
        )
        .bind(filter.job_type.map(|t| t.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.target_space_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Loaded jobs");
        rows.into_iter()
            .map(|(id, payload)| decode(id, payload))
            .collect()
    }

    #[instrument(skip(self))]
    async fn import_ids_for_space(&self, space_id: &str) -> RepositoryResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM geoload_jobs
            WHERE job_type = 'Import' AND target_space_id = $1 AND status = ANY($2)
            ORDER BY created_at, id
            "#,
        )
        .bind(space_id)
        .bind(running_states())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    #[instrument(skip_all, fields(job_id = %job.id(), is_update = is_update))]
    async fn save(&self, job: &Job, is_update: bool) -> RepositoryResult<()> {
        let payload = encode(job)?;
        let envelope = job.envelope();

        let sql = if is_update {
            r#"
            INSERT INTO geoload_jobs
                (id, job_type, status, target_space_id, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                job_type = EXCLUDED.job_type,
                status = EXCLUDED.status,
                target_space_id = EXCLUDED.target_space_id,
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#
        } else {
            r#"
            INSERT INTO geoload_jobs
                (id, job_type, status, target_space_id, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#
        };

        sqlx::query(sql)
            .bind(job.id())
            .bind(job.job_type().as_str())
            .bind(job.status().as_str())
            .bind(envelope.target_space_id.as_deref())
            .bind(&payload)
            .bind(envelope.created_at)
            .bind(envelope.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RepositoryError::Conflict(job.id().to_string())
                }
                other => RepositoryError::Database(other),
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> RepositoryResult<Option<Job>> {
        let row = sqlx::query_as::<_, (String, serde_json::Value)>(
            "DELETE FROM geoload_jobs WHERE id = $1 RETURNING id, payload",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, payload)| decode(id, payload)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_states() {
        let states = running_states();
        assert_eq!(states.first().map(String::as_str), Some("queued"));
        assert_eq!(states.last().map(String::as_str), Some("finalizing"));
        assert_eq!(states.len(), 8);
    }
}
