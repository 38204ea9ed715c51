//! Drives one import job through its phases
//!
//! `validate → prepare → execute → finalize`, each bracketed by a pair of
//! status transitions that are persisted as they happen. The orchestrator
//! assumes its caller never runs two jobs against the same
//! `(connector, table)` at once; the scheduler guarantees that.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::barrier::IndexBuildBarrier;
use super::catalog::{IndexLayout, Segment};
use super::facade::{StagingFacade, TriggerSettings};
use super::guard::{ConsistencyGuard, FRESH_TABLE_VERSION};
use super::loader::{BulkLoader, LoadRequest};
use crate::config::ImportConfig;
use crate::db::{status, ConnectorRegistry, DbError, SqlExecutor};
use crate::error::{ErrorDescription, ImportError, ImportResult, ImportStage};
use crate::jobs::model::{ImportJob, ImportObject, ImportObjectStatus, JobStatus};
use crate::jobs::objects::ObjectInspector;
use crate::jobs::repository::JobStatusSink;
use crate::sql::{Identifier, IdentifierError, SqlQuery, SqlStatement};

/// Orchestrator settings, resolved once from [`ImportConfig`]
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub schema: Identifier,
    pub layout: IndexLayout,
    pub segments: Vec<Segment>,
    pub use_view_facade: bool,
    pub index_status_schema: Identifier,
    pub index_status_table: Identifier,
    pub author: String,
}

impl ImportSettings {
    pub fn from_config(config: &ImportConfig) -> Result<Self, IdentifierError> {
        Ok(Self {
            schema: Identifier::new(config.schema.as_str())?,
            layout: IndexLayout::from_legacy_flag(config.legacy_layout),
            segments: config
                .index_segments
                .iter()
                .map(|name| Segment::named(name))
                .collect(),
            use_view_facade: config.use_view_facade,
            index_status_schema: Identifier::new(config.index_status_schema.as_str())?,
            index_status_table: Identifier::new(config.index_status_table.as_str())?,
            author: config.author.clone(),
        })
    }
}

pub fn list_indices_statement(schema: &Identifier, table: &Identifier) -> SqlStatement {
    SqlStatement::raw("select * from xyz_index_list_all_available($1,$2)")
        .with_param(schema.as_str())
        .with_param(table.as_str())
}

/// One `DROP INDEX` per name, executed as a single batch.
pub fn drop_indices_statement(
    schema: &Identifier,
    indices: &[String],
) -> Result<SqlStatement, ImportError> {
    let mut query = SqlQuery::new("");
    query.set_variable("schema", schema);

    for (n, name) in indices.iter().enumerate() {
        let index = Identifier::new(name.as_str())
            .map_err(|e| ImportError::during(ImportStage::Preparation, e))?;
        let variable = format!("idx_{}", n);
        query.append(&format!("DROP INDEX IF EXISTS ${{schema}}.${{{}}} CASCADE;", variable));
        query.set_variable(&variable, index);
    }

    query
        .substitute()
        .map_err(|e| ImportError::during(ImportStage::Preparation, e))
}

pub fn mark_maintenance_statement(
    status_schema: &Identifier,
    status_table: &Identifier,
    space_table: &Identifier,
    schema: &Identifier,
) -> Result<SqlStatement, ImportError> {
    SqlQuery::new(
        "UPDATE ${status_schema}.${status_table} SET idx_creation_finished = false \
         WHERE spaceid = $1 AND schem = $2",
    )
    .with_variable("status_schema", status_schema)
    .with_variable("status_table", status_table)
    .with_param(space_table.as_str())
    .with_param(schema.as_str())
    .substitute()
    .map_err(|e| ImportError::during(ImportStage::Finalization, e))
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Validate,
    Prepare,
    Execute,
    Finalize,
}

impl Phase {
    const PIPELINE: [Phase; 4] = [Phase::Validate, Phase::Prepare, Phase::Execute, Phase::Finalize];

    fn running(self) -> JobStatus {
        match self {
            Phase::Validate => JobStatus::Validating,
            Phase::Prepare => JobStatus::Preparing,
            Phase::Execute => JobStatus::Executing,
            Phase::Finalize => JobStatus::Finalizing,
        }
    }

    fn done(self) -> JobStatus {
        match self {
            Phase::Validate => JobStatus::Validated,
            Phase::Prepare => JobStatus::Prepared,
            Phase::Execute => JobStatus::Executed,
            Phase::Finalize => JobStatus::Finalized,
        }
    }

    fn stage(self) -> ImportStage {
        match self {
            Phase::Validate => ImportStage::Validation,
            Phase::Prepare => ImportStage::Preparation,
            Phase::Execute => ImportStage::Execution,
            Phase::Finalize => ImportStage::Finalization,
        }
    }
}

pub struct ImportOrchestrator {
    registry: Arc<dyn ConnectorRegistry>,
    settings: ImportSettings,
    barrier: IndexBuildBarrier,
    inspector: Option<Arc<dyn ObjectInspector>>,
}

impl ImportOrchestrator {
    pub fn new(registry: Arc<dyn ConnectorRegistry>, settings: ImportSettings) -> Self {
        let barrier = IndexBuildBarrier::with_segments(settings.layout, settings.segments.clone());
        Self {
            registry,
            settings,
            barrier,
            inspector: None,
        }
    }

    /// Check uploads against object storage during validation.
    pub fn with_inspector(mut self, inspector: Arc<dyn ObjectInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Number of statements currently active on `connector_id`'s sessions.
    pub async fn running_queries(&self, connector_id: &str) -> Result<usize, DbError> {
        let executor = self.registry.client(connector_id)?;
        let application_name = self.registry.application_name(connector_id);
        let queries = status::running_queries(executor.as_ref(), &application_name).await?;
        Ok(queries.len())
    }

    /// Run every phase, persisting each transition through `sink`. Returns
    /// the status the job ended in.
    #[instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn run(&self, job: &mut ImportJob, sink: &dyn JobStatusSink) -> JobStatus {
        if job.status().is_terminal() {
            warn!(status = %job.status(), "Job already finished, not running");
            return job.status();
        }

        for phase in Phase::PIPELINE {
            if let Err(e) = self.transition(job, phase.running(), sink).await {
                return self.fail(job, &e, sink).await;
            }

            let result = match phase {
                Phase::Validate => self.validate(job).await,
                Phase::Prepare => self.prepare(job).await,
                Phase::Execute => self.execute(job).await,
                Phase::Finalize => self.finalize(job).await,
            };

            if let Err(e) = result {
                let claimed = job.envelope.space_version == Some(FRESH_TABLE_VERSION);
                if matches!(phase, Phase::Prepare | Phase::Execute)
                    && claimed
                    && !e.is_precondition()
                {
                    self.release_facade(job).await;
                }
                return self.fail(job, &e, sink).await;
            }

            match phase {
                Phase::Execute => job.envelope.executed_at = Some(now_secs()),
                Phase::Finalize => job.envelope.finalized_at = Some(now_secs()),
                _ => {}
            }

            if let Err(e) = self.transition(job, phase.done(), sink).await {
                return self.fail(job, &e, sink).await;
            }
        }

        info!(
            idx_count = job.idx_list.len(),
            error_description = ?job.envelope.error_description,
            "Import finished"
        );
        job.status()
    }

    async fn transition(
        &self,
        job: &mut ImportJob,
        next: JobStatus,
        sink: &dyn JobStatusSink,
    ) -> ImportResult<()> {
        let stage = Phase::PIPELINE
            .into_iter()
            .find(|p| p.running() == next || p.done() == next)
            .map(Phase::stage)
            .unwrap_or(ImportStage::Validation);

        job.advance(next).map_err(|e| ImportError::Unexpected {
            stage,
            message: e.to_string(),
        })?;
        self.persist(job, sink).await;
        Ok(())
    }

    async fn fail(
        &self,
        job: &mut ImportJob,
        err: &ImportError,
        sink: &dyn JobStatusSink,
    ) -> JobStatus {
        job.fail_with(err);
        if err.is_precondition() {
            warn!(error = %err, status = %job.status(), "Import aborted");
        } else {
            error!(error = %err, status = %job.status(), "Import failed");
        }
        self.persist(job, sink).await;
        job.status()
    }

    /// Best-effort removal of the staging facade after a failed prepare or
    /// load, so the table does not keep its import trigger.
    async fn release_facade(&self, job: &ImportJob) {
        let stage = ImportStage::Finalization;
        let (Ok(executor), Ok(table)) = (self.client(job, stage), self.target_table(job, stage))
        else {
            return;
        };

        let facade = StagingFacade::new(executor.as_ref(), &self.settings.schema);
        if let Err(e) = facade.drop_trigger(&table).await {
            warn!(error = %e, "Failed to drop import trigger after failure");
        }
        if self.settings.use_view_facade {
            if let Err(e) = facade.drop_view(&table).await {
                warn!(error = %e, "Failed to drop import view after failure");
            }
        }
    }

    async fn persist(&self, job: &ImportJob, sink: &dyn JobStatusSink) {
        if let Err(e) = sink.record(job).await {
            warn!(status = %job.status(), error = %e, "Failed to persist job status");
        }
    }

    fn client(&self, job: &ImportJob, stage: ImportStage) -> ImportResult<Arc<dyn SqlExecutor>> {
        let connector = job
            .envelope
            .target_connector
            .as_deref()
            .ok_or_else(|| ImportError::during(stage, DbError::config("job has no target connector")))?;
        self.registry
            .client(connector)
            .map_err(|e| ImportError::during(stage, e))
    }

    fn target_table(&self, job: &ImportJob, stage: ImportStage) -> ImportResult<Identifier> {
        let table = job
            .envelope
            .target_table
            .as_deref()
            .ok_or_else(|| ImportError::during(stage, DbError::config("job has no target table")))?;
        Identifier::new(table).map_err(|e| ImportError::during(stage, e))
    }

    /// Target table exists and at least one upload is usable.
    #[instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn validate(&self, job: &mut ImportJob) -> ImportResult<()> {
        let stage = ImportStage::Validation;
        let executor = self.client(job, stage)?;
        let table = self.target_table(job, stage)?;

        let exists = status::table_exists(executor.as_ref(), &self.settings.schema, &table)
            .await
            .map_err(|e| ImportError::during(stage, e))?;
        if !exists {
            return Err(ImportError::TargetTableMissing(table.to_string()));
        }

        if job.import_objects.is_empty() {
            return Err(ImportError::UploadMissing);
        }

        if let Some(inspector) = &self.inspector {
            for object in job.import_objects.values_mut() {
                match inspector.head(&object.bucket, &object.s3_key).await {
                    Ok(Some(size)) => {
                        object.filesize = Some(size);
                        object.valid = size > 0;
                    }
                    Ok(None) => object.valid = false,
                    Err(e) => {
                        warn!(file = %object.filename, error = %e, "Upload inspection failed");
                        object.valid = false;
                    }
                }
            }
        }

        for object in job.import_objects.values_mut().filter(|o| !o.valid) {
            object.details.get_or_insert_with(|| ErrorDescription::InvalidFile.to_string());
        }

        let valid = job.valid_objects().count();
        if valid == 0 {
            return Err(ImportError::NoValidFilesFound);
        }

        info!(valid, total = job.import_objects.len(), "Uploads validated");
        Ok(())
    }

    /// Claim the fresh table, drop its indices and install the staging facade.
    #[instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn prepare(&self, job: &mut ImportJob) -> ImportResult<()> {
        let stage = ImportStage::Preparation;
        let executor = self.client(job, stage)?;
        let table = self.target_table(job, stage)?;
        let schema = &self.settings.schema;

        let claimed =
            ConsistencyGuard::check_and_claim_empty(executor.as_ref(), schema, &table).await;
        let version = match claimed {
            Ok(version) => version,
            Err(ImportError::SequenceNot0 { version }) => {
                // Kept for diagnosis; the job is rejected either way.
                let _ = job.set_space_version(version);
                return Err(ImportError::SequenceNot0 { version });
            }
            Err(e) => return Err(e),
        };
        job.set_space_version(version).map_err(|e| ImportError::Unexpected {
            stage,
            message: e.to_string(),
        })?;

        let indices = executor
            .fetch_strings(&list_indices_statement(schema, &table))
            .await
            .map_err(|e| ImportError::during(stage, e))?;
        info!(count = indices.len(), "Dropping existing indices");

        if !indices.is_empty() {
            let statement = drop_indices_statement(schema, &indices)?;
            executor
                .execute(&statement)
                .await
                .map_err(|e| ImportError::during(stage, e))?;
        }

        let facade = StagingFacade::new(executor.as_ref(), schema);
        let author = job
            .envelope
            .author
            .clone()
            .unwrap_or_else(|| self.settings.author.clone());
        facade
            .create_write_trigger(
                &table,
                &TriggerSettings {
                    csv_format: job.envelope.csv_format,
                    space_version: version,
                    enable_uuid: job.enabled_uuid,
                    layout: self.settings.layout,
                    author: &author,
                },
            )
            .await?;

        if self.settings.use_view_facade {
            facade.create_view_with_instead_of_trigger(&table).await?;
        }

        Ok(())
    }

    /// Load a single object, through the view when the view facade is on.
    pub async fn load(&self, job: &ImportJob, object: &ImportObject) -> ImportResult<String> {
        let stage = ImportStage::Execution;
        let executor = self.client(job, stage)?;
        let table = self.target_table(job, stage)?;
        let request = LoadRequest::from(object);
        let schema = &self.settings.schema;

        let loaded = if self.settings.use_view_facade {
            let view = super::facade::view_name(&table).map_err(|e| ImportError::during(stage, e))?;
            BulkLoader::load_into_view(
                executor.as_ref(),
                schema,
                &view,
                job.envelope.csv_format,
                &request,
            )
            .await
        } else {
            BulkLoader::load(executor.as_ref(), schema, &table, job.envelope.csv_format, &request)
                .await
        };

        loaded.map_err(|e| ImportError::during(stage, e))
    }

    /// Load every valid object in order. Partial failure is recorded and the
    /// job moves on; only a total failure stops it.
    #[instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn execute(&self, job: &mut ImportJob) -> ImportResult<()> {
        let filenames: Vec<String> = job.valid_objects().map(|o| o.filename.clone()).collect();
        let mut failed = 0usize;

        for filename in &filenames {
            let Some(object) = job.import_objects.get(filename).cloned() else {
                continue;
            };

            let outcome = match self.load(job, &object).await {
                Err(e) if e.is_retryable() => return Err(e),
                other => other,
            };

            if let Some(object) = job.import_objects.get_mut(filename) {
                match outcome {
                    Ok(status) => {
                        object.status = ImportObjectStatus::Imported;
                        object.details = Some(status);
                    }
                    Err(e) => {
                        warn!(file = %filename, error = %e, "File import failed");
                        object.status = ImportObjectStatus::Failed;
                        object.details = Some(e.to_string());
                        failed += 1;
                    }
                }
            }
        }

        if failed > 0 && failed == filenames.len() {
            return Err(ImportError::AllImportsFailed { failed });
        }
        if failed > 0 {
            warn!(failed, total = filenames.len(), "Some file imports failed");
            job.envelope.error_description = Some(ErrorDescription::ImportsPartiallyFailed);
        }

        Ok(())
    }

    /// Rebuild indices segment by segment, then tear the facade down and flag
    /// the table for maintenance. Teardown runs even when index builds failed.
    #[instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn finalize(&self, job: &mut ImportJob) -> ImportResult<()> {
        let stage = ImportStage::Finalization;
        let executor = self.client(job, stage)?;
        let table = self.target_table(job, stage)?;
        let schema = &self.settings.schema;

        let report = self.barrier.run(executor.as_ref(), schema, &table).await;
        for entry in &report.built {
            job.add_idx(entry.as_str());
        }
        if !report.is_complete() {
            for failure in &report.failed {
                warn!(index = %failure.entry, reason = %failure.reason, "Index missing after import");
            }
            job.envelope.error_description = Some(ErrorDescription::IdxCreationFailed);
        }

        let facade = StagingFacade::new(executor.as_ref(), schema);
        let mut cleanup_errors = Vec::new();
        if let Err(e) = facade.drop_trigger(&table).await {
            cleanup_errors.push(e.to_string());
        }
        if self.settings.use_view_facade {
            if let Err(e) = facade.drop_view(&table).await {
                cleanup_errors.push(e.to_string());
            }
        }

        if !cleanup_errors.is_empty() {
            return Err(ImportError::TableCleanupFailed(cleanup_errors.join("; ")));
        }

        let statement = mark_maintenance_statement(
            &self.settings.index_status_schema,
            &self.settings.index_status_table,
            &table,
            schema,
        )?;
        if let Err(e) = executor.execute(&statement).await {
            warn!(error = %e, "Failed to mark table for maintenance");
        }

        info!(
            built = report.built.len(),
            failed = report.failed.len(),
            attempted = report.attempted,
            "Finalize complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    #[test]
    fn test_drop_indices_statement() {
        let statement = drop_indices_statement(
            &ident("public"),
            &["idx_t1_id".to_string(), "t1_p0_expr_idx".to_string()],
        )
        .unwrap();
        assert_eq!(
            statement.text(),
            "DROP INDEX IF EXISTS \"public\".\"idx_t1_id\" CASCADE;\
             DROP INDEX IF EXISTS \"public\".\"t1_p0_expr_idx\" CASCADE;"
        );
    }

    #[test]
    fn test_drop_indices_rejects_odd_names() {
        let err = drop_indices_statement(&ident("public"), &["x\"; DROP TABLE y".to_string()])
            .unwrap_err();
        assert_eq!(err.error_type().as_str(), "preparation_failed");
    }

    #[test]
    fn test_mark_maintenance_statement() {
        let statement = mark_maintenance_statement(
            &ident("xyz_config"),
            &ident("xyz_idxs_status"),
            &ident("t1"),
            &ident("public"),
        )
        .unwrap();
        assert_eq!(
            statement.text(),
            "UPDATE \"xyz_config\".\"xyz_idxs_status\" SET idx_creation_finished = false \
             WHERE spaceid = $1 AND schem = $2"
        );
        assert_eq!(statement.params(), ["t1", "public"]);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ImportSettings::from_config(&ImportConfig::default()).unwrap();
        assert_eq!(settings.segments, Segment::default_order());
        assert_eq!(settings.layout, IndexLayout::Extended);
        assert_eq!(settings.schema.as_str(), "public");
    }
}
