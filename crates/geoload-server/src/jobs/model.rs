//! Job records
//!
//! A [`Job`] is either an [`ImportJob`] or an [`ExportJob`]; the variant is
//! carried in the `type` field of the stored JSON. Both share the lifecycle
//! fields in [`JobEnvelope`]. Only imports are driven by this crate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorDescription, ErrorType, ImportError};

/// Placeholder for `createdAt`/`updatedAt` until the repository stamps them
/// (2018-10-01T00:00Z).
pub const DEFAULT_TIMESTAMP: i64 = 1_538_352_000_000;

fn default_timestamp() -> i64 {
    DEFAULT_TIMESTAMP
}

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Import,
    Export,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Import => "Import",
            JobType::Export => "Export",
        }
    }

    /// Case-insensitive lookup; unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "import" => Some(JobType::Import),
            "export" => Some(JobType::Export),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state, declared in happy-path order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Waiting,
    Queued,
    Validating,
    Validated,
    Preparing,
    Prepared,
    Executing,
    Executed,
    Finalizing,
    Finalized,
    Aborted,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 12] = [
        JobStatus::Waiting,
        JobStatus::Queued,
        JobStatus::Validating,
        JobStatus::Validated,
        JobStatus::Preparing,
        JobStatus::Prepared,
        JobStatus::Executing,
        JobStatus::Executed,
        JobStatus::Finalizing,
        JobStatus::Finalized,
        JobStatus::Aborted,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Queued => "queued",
            JobStatus::Validating => "validating",
            JobStatus::Validated => "validated",
            JobStatus::Preparing => "preparing",
            JobStatus::Prepared => "prepared",
            JobStatus::Executing => "executing",
            JobStatus::Executed => "executed",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Finalized => "finalized",
            JobStatus::Aborted => "aborted",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.to_ascii_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Position in the happy path. Failure states sort after `finalized`.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finalized | JobStatus::Aborted | JobStatus::Failed
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Aborted | JobStatus::Failed)
    }

    /// Forward along the happy path, or into a failure state, and never out
    /// of a terminal state.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_failure() || next.ordinal() > self.ordinal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout of the uploaded CSV files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CsvFormat {
    Geojson,
    JsonWkt,
    JsonWkb,
}

impl CsvFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            CsvFormat::Geojson => "GEOJSON",
            CsvFormat::JsonWkt => "JSON_WKT",
            CsvFormat::JsonWkb => "JSON_WKB",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GEOJSON" => Some(CsvFormat::Geojson),
            "JSON_WKT" => Some(CsvFormat::JsonWkt),
            "JSON_WKB" => Some(CsvFormat::JsonWkb),
            _ => None,
        }
    }
}

impl fmt::Display for CsvFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conflict handling for features that already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    LastWins,
    SkipExisting,
    Error,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::LastWins => "LASTWINS",
            Strategy::SkipExisting => "SKIPEXISTING",
            Strategy::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "LASTWINS" => Some(Strategy::LastWins),
            "SKIPEXISTING" => Some(Strategy::SkipExisting),
            "ERROR" => Some(Strategy::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("Space version already set to {0}")]
    SpaceVersionAlreadySet(i64),
}

// ============================================================================
// Records
// ============================================================================

/// Lifecycle fields common to every job type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_timestamp")]
    pub created_at: i64,

    #[serde(default = "default_timestamp")]
    pub updated_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<i64>,

    /// Expiry, epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_space_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_connector: Option<String>,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<ErrorDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_format: Option<CsvFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_version: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Default for JobEnvelope {
    fn default() -> Self {
        Self {
            id: String::new(),
            description: None,
            created_at: DEFAULT_TIMESTAMP,
            updated_at: DEFAULT_TIMESTAMP,
            executed_at: None,
            finalized_at: None,
            exp: None,
            target_space_id: None,
            target_table: None,
            target_connector: None,
            status: JobStatus::Waiting,
            error_type: None,
            error_description: None,
            csv_format: None,
            strategy: None,
            space_version: None,
            author: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportObjectStatus {
    #[default]
    Waiting,
    Imported,
    Failed,
}

/// One uploaded file staged in object storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportObject {
    pub filename: String,
    pub s3_key: String,
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub status: ImportObjectStatus,
    /// Loader status line, or the failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ImportObject {
    pub fn new(
        filename: impl Into<String>,
        bucket: impl Into<String>,
        s3_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            s3_key: s3_key.into(),
            bucket: bucket.into(),
            region: region.into(),
            filesize: None,
            valid: false,
            status: ImportObjectStatus::Waiting,
            details: None,
        }
    }

    pub fn with_filesize(mut self, filesize: u64) -> Self {
        self.filesize = Some(filesize);
        self.valid = filesize > 0;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    #[serde(flatten)]
    pub envelope: JobEnvelope,

    #[serde(default, rename = "enabledUUID")]
    pub enabled_uuid: bool,

    /// `"<index key>@<segment table>"` for every index that was built
    #[serde(default)]
    pub idx_list: Vec<String>,

    #[serde(default)]
    pub import_objects: BTreeMap<String, ImportObject>,
}

impl ImportJob {
    pub fn new(
        description: impl Into<String>,
        target_space_id: impl Into<String>,
        target_table: impl Into<String>,
        enabled_uuid: bool,
        csv_format: CsvFormat,
        strategy: Strategy,
    ) -> Self {
        Self {
            envelope: JobEnvelope {
                description: Some(description.into()),
                target_space_id: Some(target_space_id.into()),
                target_table: Some(target_table.into()),
                csv_format: Some(csv_format),
                strategy: Some(strategy),
                ..Default::default()
            },
            enabled_uuid,
            idx_list: Vec::new(),
            import_objects: BTreeMap::new(),
        }
    }

    pub fn with_connector(mut self, connector: impl Into<String>) -> Self {
        self.envelope.target_connector = Some(connector.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.envelope.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.envelope.id
    }

    pub fn status(&self) -> JobStatus {
        self.envelope.status
    }

    pub fn add_import_object(&mut self, object: ImportObject) {
        self.import_objects.insert(object.filename.clone(), object);
    }

    /// Move to `next`, rejecting regressions and exits from terminal states.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), ModelError> {
        let current = self.envelope.status;
        if !current.can_advance_to(next) {
            return Err(ModelError::IllegalTransition {
                from: current,
                to: next,
            });
        }
        self.envelope.status = next;
        Ok(())
    }

    pub fn set_space_version(&mut self, version: i64) -> Result<(), ModelError> {
        if let Some(current) = self.envelope.space_version {
            return Err(ModelError::SpaceVersionAlreadySet(current));
        }
        self.envelope.space_version = Some(version);
        Ok(())
    }

    pub fn add_idx(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        if !self.idx_list.contains(&entry) {
            self.idx_list.push(entry);
        }
    }

    /// Record the error pair and land in `aborted` or `failed`. A job that is
    /// already terminal keeps its status.
    pub fn fail_with(&mut self, err: &ImportError) {
        let target = if err.is_precondition() {
            JobStatus::Aborted
        } else {
            JobStatus::Failed
        };
        if self.advance(target).is_err() {
            tracing::warn!(
                job_id = %self.envelope.id,
                status = %self.envelope.status,
                "Job already terminal, keeping status"
            );
        }
        self.envelope.error_type = Some(err.error_type());

        // A cleanup failure after failed index builds keeps the earlier description.
        let keep_description = matches!(err, ImportError::TableCleanupFailed(_))
            && self.envelope.error_description.is_some();
        if !keep_description {
            self.envelope.error_description = Some(err.error_description());
        }
    }

    pub fn valid_objects(&self) -> impl Iterator<Item = &ImportObject> {
        self.import_objects.values().filter(|o| o.valid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    #[serde(flatten)]
    pub envelope: JobEnvelope,
}

/// A stored job of either type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Job {
    Import(ImportJob),
    Export(ExportJob),
}

impl Job {
    pub fn envelope(&self) -> &JobEnvelope {
        match self {
            Job::Import(job) => &job.envelope,
            Job::Export(job) => &job.envelope,
        }
    }

    pub fn envelope_mut(&mut self) -> &mut JobEnvelope {
        match self {
            Job::Import(job) => &mut job.envelope,
            Job::Export(job) => &mut job.envelope,
        }
    }

    pub fn id(&self) -> &str {
        &self.envelope().id
    }

    pub fn status(&self) -> JobStatus {
        self.envelope().status
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Job::Import(_) => JobType::Import,
            Job::Export(_) => JobType::Export,
        }
    }

    pub fn as_import(&self) -> Option<&ImportJob> {
        match self {
            Job::Import(job) => Some(job),
            Job::Export(_) => None,
        }
    }

    pub fn into_import(self) -> Option<ImportJob> {
        match self {
            Job::Import(job) => Some(job),
            Job::Export(_) => None,
        }
    }
}

impl From<ImportJob> for Job {
    fn from(job: ImportJob) -> Self {
        Job::Import(job)
    }
}

impl From<ExportJob> for Job {
    fn from(job: ExportJob) -> Self {
        Job::Export(job)
    }
}
