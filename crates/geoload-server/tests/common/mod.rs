//! Shared fixtures for integration tests
//!
//! [`RecordingExecutor`] stands in for an import target database. It records
//! every statement, simulates the version sequence and table catalog, and
//! fails any statement containing a configured marker.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use geoload_server::config::ImportConfig;
use geoload_server::db::{ConnectorRegistry, DbError, DbResult, SqlExecutor};
use geoload_server::import::{ImportOrchestrator, ImportSettings};
use geoload_server::jobs::{
    CsvFormat, ImportJob, ImportObject, InMemoryJobStore, JobRepository, JobStatus,
    JobStatusSink, ObjectInspector, RepositoryResult, SpaceStatistics, Strategy,
};
use geoload_server::jobs::objects::ObjectError;
use geoload_server::sql::SqlStatement;

pub const CONNECTOR: &str = "psql";
pub const TABLE: &str = "3b32d555c6a2eb07009fbf382564d9e1";

pub struct RecordingExecutor {
    statements: Mutex<Vec<SqlStatement>>,
    sequence: AtomicI64,
    tables: HashSet<String>,
    existing_indices: Vec<String>,
    failing: Mutex<Vec<String>>,
    offline: bool,
    running_queries: usize,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            sequence: AtomicI64::new(0),
            tables: [TABLE.to_string()].into_iter().collect(),
            existing_indices: vec![
                format!("idx_{}_id", TABLE),
                format!("{}_p0_expr_idx", TABLE),
            ],
            failing: Mutex::new(Vec::new()),
            offline: false,
            running_queries: 0,
        }
    }

    /// Every statement fails as if the pool timed out.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::new()
        }
    }

    pub fn without_tables() -> Self {
        Self {
            tables: HashSet::new(),
            ..Self::new()
        }
    }

    /// Pretend the version sequence was already advanced `n` times.
    pub fn with_sequence(self, n: i64) -> Self {
        self.sequence.store(n, Ordering::SeqCst);
        self
    }

    /// Report `n` active statements on the connector's sessions.
    pub fn with_running_queries(self, n: usize) -> Self {
        Self {
            running_queries: n,
            ..self
        }
    }

    /// Fail every statement whose text contains `marker`.
    pub fn fail_on(&self, marker: impl Into<String>) {
        self.failing.lock().unwrap().push(marker.into());
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.text().to_string())
            .collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }

    pub fn position(&self, needle: &str) -> Option<usize> {
        self.statements().iter().position(|s| s.contains(needle))
    }

    fn record(&self, statement: &SqlStatement) -> DbResult<()> {
        self.statements.lock().unwrap().push(statement.clone());

        if self.offline {
            return Err(DbError::NoConnection("pool timed out".to_string()));
        }

        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|marker| statement.text().contains(marker.as_str())) {
            return Err(DbError::unexpected(format!(
                "simulated failure: {}",
                statement.text()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn execute(&self, statement: &SqlStatement) -> DbResult<u64> {
        self.record(statement)?;
        Ok(0)
    }

    async fn fetch_i64(&self, statement: &SqlStatement) -> DbResult<i64> {
        self.record(statement)?;
        let text = statement.text();

        if text.contains("nextval") {
            return Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        }
        if text.contains("pg_tables") {
            let table = statement.params().get(1).cloned().unwrap_or_default();
            return Ok(i64::from(self.tables.contains(&table)));
        }
        Ok(0)
    }

    async fn fetch_strings(&self, statement: &SqlStatement) -> DbResult<Vec<String>> {
        self.record(statement)?;
        let text = statement.text();

        if text.contains("xyz_index_list_all_available") {
            return Ok(self.existing_indices.clone());
        }
        if text.contains("pg_stat_activity") {
            return Ok(vec!["CREATE INDEX ...".to_string(); self.running_queries]);
        }
        if text.contains("aws_s3.table_import_from_s3") {
            return Ok(vec![
                "100 rows imported into relation from file".to_string(),
            ]);
        }
        Ok(Vec::new())
    }
}

pub struct SingleConnector {
    executor: Arc<RecordingExecutor>,
}

impl SingleConnector {
    pub fn new(executor: Arc<RecordingExecutor>) -> Self {
        Self { executor }
    }
}

impl ConnectorRegistry for SingleConnector {
    fn client(&self, connector_id: &str) -> DbResult<Arc<dyn SqlExecutor>> {
        if connector_id == CONNECTOR {
            Ok(self.executor.clone() as Arc<dyn SqlExecutor>)
        } else {
            Err(DbError::UnknownConnector(connector_id.to_string()))
        }
    }

    fn application_name(&self, connector_id: &str) -> String {
        format!("geoload_import_{}", connector_id)
    }
}

/// Statistics endpoint stand-in with a fixed answer
pub struct FixedStatistics(pub Option<i64>);

#[async_trait]
impl SpaceStatistics for FixedStatistics {
    async fn feature_count(&self, _space_id: &str) -> RepositoryResult<Option<i64>> {
        Ok(self.0)
    }
}

/// Captures every persisted status in order
#[derive(Default)]
pub struct StatusLog {
    pub statuses: Mutex<Vec<JobStatus>>,
}

impl StatusLog {
    pub fn observed(&self) -> Vec<JobStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStatusSink for StatusLog {
    async fn record(&self, job: &ImportJob) -> RepositoryResult<()> {
        self.statuses.lock().unwrap().push(job.status());
        Ok(())
    }
}

/// Uploads that exist, keyed by object key
pub struct KnownObjects(pub Vec<(String, u64)>);

#[async_trait]
impl ObjectInspector for KnownObjects {
    async fn head(&self, _bucket: &str, key: &str) -> Result<Option<u64>, ObjectError> {
        Ok(self
            .0
            .iter()
            .find(|(known, _)| known == key)
            .map(|(_, size)| *size))
    }
}

pub fn settings(legacy: bool, view_facade: bool) -> ImportSettings {
    let config = ImportConfig {
        legacy_layout: legacy,
        use_view_facade: view_facade,
        ..ImportConfig::default()
    };
    ImportSettings::from_config(&config).unwrap()
}

pub fn orchestrator(executor: &Arc<RecordingExecutor>, legacy: bool) -> ImportOrchestrator {
    ImportOrchestrator::new(
        Arc::new(SingleConnector::new(executor.clone())),
        settings(legacy, false),
    )
}

pub fn upload(name: &str, size: u64) -> ImportObject {
    ImportObject::new(name, "geoload-uploads", format!("job-1/{}", name), "eu-west-1")
        .with_filesize(size)
}

/// A queued import of two files into [`TABLE`].
pub fn queued_import(id: &str) -> ImportJob {
    let mut job = ImportJob::new(
        "test import",
        "space-1",
        TABLE,
        false,
        CsvFormat::Geojson,
        Strategy::LastWins,
    )
    .with_id(id)
    .with_connector(CONNECTOR);
    job.add_import_object(upload("part_1.csv", 1024));
    job.add_import_object(upload("part_2.csv", 2048));
    job.advance(JobStatus::Queued).unwrap();
    job
}

pub fn memory_repository(count: Option<i64>) -> (Arc<InMemoryJobStore>, JobRepository) {
    let store = Arc::new(InMemoryJobStore::new());
    let repository = JobRepository::new(store.clone(), Arc::new(FixedStatistics(count)));
    (store, repository)
}
