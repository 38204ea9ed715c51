//! Job persistence contract
//!
//! [`JobStore`] is the raw storage seam (Postgres or in-memory). The
//! [`JobRepository`] on top of it owns the lifecycle rules: creation defaults,
//! the empty-space precondition, and `updatedAt` stamping.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::model::{ImportJob, Job, JobStatus, JobType, DEFAULT_TIMESTAMP};
use super::statistics::SpaceStatistics;

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The job cannot be accepted in the current state of its target
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A new job reused the id of a stored one
    #[error("Job '{0}' already exists")]
    Conflict(String),

    #[error("Statistics request failed: {0}")]
    Statistics(String),

    #[error("Job store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job record '{id}' could not be (de)serialized: {source}")]
    Serialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Optional criteria for [`JobRepository::list`]; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub target_space_id: Option<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.job_type.is_none_or(|t| t == job.job_type())
            && self.status.is_none_or(|s| s == job.status())
            && self
                .target_space_id
                .as_deref()
                .is_none_or(|space| job.envelope().target_space_id.as_deref() == Some(space))
    }
}

/// An import counts as running once it left `waiting` and until it is terminal.
pub fn is_running_import(job: &Job) -> bool {
    let status = job.status();
    job.job_type() == JobType::Import && status != JobStatus::Waiting && !status.is_terminal()
}

/// Raw job storage
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, id: &str) -> RepositoryResult<Option<Job>>;

    async fn load_all(&self, filter: &JobFilter) -> RepositoryResult<Vec<Job>>;

    /// Ids of the running imports targeting `space_id`.
    async fn import_ids_for_space(&self, space_id: &str) -> RepositoryResult<Vec<String>>;

    /// Insert, or overwrite when `is_update` is set. Inserting an id that is
    /// already stored fails with [`RepositoryError::Conflict`].
    async fn save(&self, job: &Job, is_update: bool) -> RepositoryResult<()>;

    async fn remove(&self, id: &str) -> RepositoryResult<Option<Job>>;
}

/// Receives every status change the orchestrator makes
#[async_trait]
pub trait JobStatusSink: Send + Sync {
    async fn record(&self, job: &ImportJob) -> RepositoryResult<()>;
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Clone)]
pub struct JobRepository {
    store: Arc<dyn JobStore>,
    statistics: Arc<dyn SpaceStatistics>,
}

impl JobRepository {
    pub fn new(store: Arc<dyn JobStore>, statistics: Arc<dyn SpaceStatistics>) -> Self {
        Self { store, statistics }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> RepositoryResult<Option<Job>> {
        let job = self.store.load(id).await?;
        if job.is_none() {
            info!("Job not found");
        }
        Ok(job)
    }

    pub async fn list(&self, filter: &JobFilter) -> RepositoryResult<Vec<Job>> {
        let jobs = self.store.load_all(filter).await?;
        info!(count = jobs.len(), filter = ?filter, "Listed jobs");
        Ok(jobs)
    }

    #[instrument(skip(self))]
    pub async fn list_running_imports_for_space(
        &self,
        target_space_id: &str,
    ) -> RepositoryResult<Vec<String>> {
        self.store.import_ids_for_space(target_space_id).await
    }

    /// Persist a new job. Rejected with [`RepositoryError::PreconditionFailed`]
    /// when the target space already holds features.
    #[instrument(skip_all, fields(job_id = %job.id(), space = ?job.envelope().target_space_id))]
    pub async fn store(&self, mut job: Job) -> RepositoryResult<Job> {
        if let Some(space) = job.envelope().target_space_id.clone() {
            let count = self.statistics.feature_count(&space).await?;
            if count.is_some_and(|n| n != 0) {
                warn!(count = ?count, "Rejecting job for non-empty space");
                return Err(RepositoryError::PreconditionFailed(
                    "Layer is not empty!".to_string(),
                ));
            }
        }

        let now = now_secs();
        let envelope = job.envelope_mut();
        if envelope.id.is_empty() {
            envelope.id = uuid::Uuid::new_v4().to_string();
        }
        if envelope.created_at == DEFAULT_TIMESTAMP {
            envelope.created_at = now;
        }
        if envelope.updated_at == DEFAULT_TIMESTAMP {
            envelope.updated_at = now;
        }

        self.store.save(&job, false).await?;
        info!(job_id = %job.id(), status = %job.status(), "Job stored");
        Ok(job)
    }

    /// Overwrite a job, stamping `updatedAt` with the current time.
    #[instrument(skip_all, fields(job_id = %job.id(), status = %job.status()))]
    pub async fn update(&self, mut job: Job) -> RepositoryResult<Job> {
        job.envelope_mut().updated_at = now_secs();
        self.store.save(&job, true).await?;
        Ok(job)
    }

    /// Remove a job; a missing id is a no-op.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> RepositoryResult<Option<Job>> {
        let removed = self.store.remove(id).await?;
        match &removed {
            Some(_) => info!("Job deleted"),
            None => info!("Job not found, nothing deleted"),
        }
        Ok(removed)
    }
}

#[async_trait]
impl JobStatusSink for JobRepository {
    async fn record(&self, job: &ImportJob) -> RepositoryResult<()> {
        self.update(Job::Import(job.clone())).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{CsvFormat, ExportJob, JobEnvelope, Strategy};

    fn import(space: &str, status: JobStatus) -> Job {
        let mut job = ImportJob::new("t", space, "t1", false, CsvFormat::Geojson, Strategy::LastWins);
        job.envelope.status = status;
        Job::Import(job)
    }

    #[test]
    fn test_filter_matches() {
        let job = import("space-1", JobStatus::Executing);

        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter {
            job_type: Some(JobType::Import),
            status: Some(JobStatus::Executing),
            target_space_id: Some("space-1".to_string()),
        }
        .matches(&job));
        assert!(!JobFilter {
            target_space_id: Some("space-2".to_string()),
            ..Default::default()
        }
        .matches(&job));
        assert!(!JobFilter {
            job_type: Some(JobType::Export),
            ..Default::default()
        }
        .matches(&job));
    }

    #[test]
    fn test_running_import() {
        assert!(is_running_import(&import("s", JobStatus::Queued)));
        assert!(is_running_import(&import("s", JobStatus::Finalizing)));
        assert!(!is_running_import(&import("s", JobStatus::Waiting)));
        assert!(!is_running_import(&import("s", JobStatus::Finalized)));
        assert!(!is_running_import(&import("s", JobStatus::Aborted)));

        let export = Job::Export(ExportJob {
            envelope: JobEnvelope {
                status: JobStatus::Executing,
                ..Default::default()
            },
        });
        assert!(!is_running_import(&export));
    }
}
