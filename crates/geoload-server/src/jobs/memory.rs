//! Key-value job store held in process memory

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::Job;
use super::repository::{
    is_running_import, JobFilter, JobStore, RepositoryError, RepositoryResult,
};

/// Jobs keyed by id. Listing order is by creation time, then id.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn sorted(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by(|a, b| {
        a.envelope()
            .created_at
            .cmp(&b.envelope().created_at)
            .then_with(|| a.id().cmp(b.id()))
    });
    jobs
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load(&self, id: &str) -> RepositoryResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn load_all(&self, filter: &JobFilter) -> RepositoryResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(sorted(
            jobs.values().filter(|job| filter.matches(job)).cloned().collect(),
        ))
    }

    async fn import_ids_for_space(&self, space_id: &str) -> RepositoryResult<Vec<String>> {
        let jobs = self.jobs.read().await;
        let running = jobs
            .values()
            .filter(|job| is_running_import(job))
            .filter(|job| job.envelope().target_space_id.as_deref() == Some(space_id))
            .cloned()
            .collect();
        Ok(sorted(running).into_iter().map(|job| job.id().to_string()).collect())
    }

    async fn save(&self, job: &Job, is_update: bool) -> RepositoryResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.entry(job.id().to_string()) {
            Entry::Occupied(mut stored) if is_update => {
                stored.insert(job.clone());
            }
            Entry::Occupied(_) => return Err(RepositoryError::Conflict(job.id().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
            }
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> RepositoryResult<Option<Job>> {
        Ok(self.jobs.write().await.remove(id))
    }
}
