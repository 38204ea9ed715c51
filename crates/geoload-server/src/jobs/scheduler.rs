//! Polling scheduler for waiting imports
//!
//! The orchestrator does not lock across jobs, so the scheduler is what keeps
//! two imports off the same `(connector, table)`: a key is claimed in the
//! in-flight set before a job is spawned and released when it ends. Overall
//! parallelism is capped by a semaphore.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::model::{ImportJob, Job, JobStatus, JobType};
use super::repository::{JobFilter, JobRepository, RepositoryResult};
use crate::config::SchedulerConfig;
use crate::import::ImportOrchestrator;

type TargetKey = (String, String);

fn target_key(job: &ImportJob) -> Option<TargetKey> {
    let connector = job.envelope.target_connector.clone()?;
    let table = job.envelope.target_table.clone()?;
    Some((connector, table))
}

pub struct ImportScheduler {
    repository: JobRepository,
    orchestrator: Arc<ImportOrchestrator>,
    poll_interval: Duration,
    max_connector_queries: usize,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<TargetKey>>>,
}

impl ImportScheduler {
    pub fn new(
        repository: JobRepository,
        orchestrator: Arc<ImportOrchestrator>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            orchestrator,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_connector_queries: config.max_connector_queries,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Poll until `shutdown` flips to `true`. Jobs already running are left
    /// to finish on their own tasks.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.poll_interval, "Import scheduler started");

            loop {
                match self.run_cycle().await {
                    Ok(handles) if !handles.is_empty() => {
                        info!(dispatched = handles.len(), "Dispatched imports");
                    }
                    Ok(_) => debug!("No imports to dispatch"),
                    Err(e) => error!(error = %e, "Scheduler cycle failed"),
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Import scheduler stopped");
        })
    }

    /// Claim and spawn every runnable import. Returns the handles of the
    /// spawned runs, each resolving to the status its job ended in.
    pub async fn run_cycle(&self) -> RepositoryResult<Vec<JoinHandle<JobStatus>>> {
        let mut candidates = Vec::new();
        for status in [JobStatus::Queued, JobStatus::Waiting] {
            let filter = JobFilter {
                job_type: Some(JobType::Import),
                status: Some(status),
                target_space_id: None,
            };
            candidates.extend(self.repository.list(&filter).await?);
        }

        let mut handles = Vec::new();
        // Connector load is sampled at most once per cycle.
        let mut busy: HashMap<String, bool> = HashMap::new();

        for job in candidates.into_iter().filter_map(Job::into_import) {
            let Some(key) = target_key(&job) else {
                warn!(job_id = %job.id(), "Import has no target connector or table, skipping");
                continue;
            };

            if self.in_flight.lock().await.contains(&key) {
                debug!(job_id = %job.id(), table = %key.1, "Target busy, deferring");
                continue;
            }

            let connector_busy = match busy.get(&key.0) {
                Some(known) => *known,
                None => {
                    let sampled = self.connector_busy(&key.0).await;
                    busy.insert(key.0.clone(), sampled);
                    sampled
                }
            };
            if connector_busy {
                continue;
            }

            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                debug!("Concurrency limit reached");
                break;
            };

            if !self.in_flight.lock().await.insert(key.clone()) {
                debug!(job_id = %job.id(), table = %key.1, "Target busy, deferring");
                continue;
            }

            let mut job = job;
            if job.status() == JobStatus::Waiting {
                if let Err(e) = job.advance(JobStatus::Queued) {
                    warn!(job_id = %job.id(), error = %e, "Cannot queue job");
                    self.in_flight.lock().await.remove(&key);
                    continue;
                }
                match self.repository.update(Job::Import(job.clone())).await {
                    Ok(Job::Import(updated)) => job = updated,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(job_id = %job.id(), error = %e, "Cannot persist queued job");
                        self.in_flight.lock().await.remove(&key);
                        continue;
                    }
                }
            }

            let orchestrator = self.orchestrator.clone();
            let repository = self.repository.clone();
            let in_flight = self.in_flight.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                info!(job_id = %job.id(), connector = %key.0, table = %key.1, "Import started");

                let status = orchestrator.run(&mut job, &repository).await;

                in_flight.lock().await.remove(&key);
                info!(job_id = %job.id(), status = %status, "Import ended");
                status
            }));
        }

        Ok(handles)
    }

    /// Whether the connector already runs as many statements as allowed.
    /// An unreachable connector is not treated as busy; the import itself
    /// will record the connection failure.
    async fn connector_busy(&self, connector: &str) -> bool {
        if self.max_connector_queries == 0 {
            return false;
        }

        match self.orchestrator.running_queries(connector).await {
            Ok(running) if running >= self.max_connector_queries => {
                debug!(connector, running, "Connector busy, deferring");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(connector, error = %e, "Cannot read connector load");
                false
            }
        }
    }
}
