//! Import pipeline error taxonomy
//!
//! Every failure the orchestrator can land a job in is an [`ImportError`].
//! Each variant maps onto the externally visible pair of [`ErrorType`] (which
//! phase failed) and [`ErrorDescription`] (what went wrong), and knows whether
//! it was detected before any mutation (the job is `aborted`) or after partial
//! work (the job is `failed`).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbError;
use crate::sql::{IdentifierError, TemplateError};

/// Phase of the import pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Validation,
    Preparation,
    Execution,
    Finalization,
}

impl ImportStage {
    pub fn error_type(self) -> ErrorType {
        match self {
            ImportStage::Validation => ErrorType::ValidationFailed,
            ImportStage::Preparation => ErrorType::PreparationFailed,
            ImportStage::Execution => ErrorType::ExecutionFailed,
            ImportStage::Finalization => ErrorType::FinalizationFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportStage::Validation => "validation",
            ImportStage::Preparation => "preparation",
            ImportStage::Execution => "execution",
            ImportStage::Finalization => "finalization",
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable failure category stored on the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ValidationFailed,
    PreparationFailed,
    ExecutionFailed,
    FinalizationFailed,
    NoDbConnection,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::ValidationFailed => "validation_failed",
            ErrorType::PreparationFailed => "preparation_failed",
            ErrorType::ExecutionFailed => "execution_failed",
            ErrorType::FinalizationFailed => "finalization_failed",
            ErrorType::NoDbConnection => "no_db_connection",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed vocabulary for `errorDescription`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorDescription {
    UploadMissing,
    InvalidFile,
    NoValidFilesFound,
    IdxCreationFailed,
    AllImportsFailed,
    ImportsPartiallyFailed,
    TargetTableDoesNotExists,
    TableCleanupFailed,
    ReadonlyModeFailed,
    #[serde(rename = "SEQUENCE_NOT_0")]
    SequenceNot0,
    UnexpectedError,
}

impl ErrorDescription {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorDescription::UploadMissing => "UPLOAD_MISSING",
            ErrorDescription::InvalidFile => "INVALID_FILE",
            ErrorDescription::NoValidFilesFound => "NO_VALID_FILES_FOUND",
            ErrorDescription::IdxCreationFailed => "IDX_CREATION_FAILED",
            ErrorDescription::AllImportsFailed => "ALL_IMPORTS_FAILED",
            ErrorDescription::ImportsPartiallyFailed => "IMPORTS_PARTIALLY_FAILED",
            ErrorDescription::TargetTableDoesNotExists => "TARGET_TABLE_DOES_NOT_EXISTS",
            ErrorDescription::TableCleanupFailed => "TABLE_CLEANUP_FAILED",
            ErrorDescription::ReadonlyModeFailed => "READONLY_MODE_FAILED",
            ErrorDescription::SequenceNot0 => "SEQUENCE_NOT_0",
            ErrorDescription::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl fmt::Display for ErrorDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Import pipeline failures
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Job carries no uploaded files")]
    UploadMissing,

    #[error("None of the uploaded files is valid")]
    NoValidFilesFound,

    #[error("Target table '{0}' does not exist")]
    TargetTableMissing(String),

    /// The version sequence was already advanced, so the table is not fresh.
    #[error("Target table is not empty: version sequence returned {version}")]
    SequenceNot0 { version: i64 },

    #[error("All {failed} file imports failed")]
    AllImportsFailed { failed: usize },

    #[error("Table cleanup failed: {0}")]
    TableCleanupFailed(String),

    #[error("No database connection: {0}")]
    NoConnection(String),

    #[error("Unexpected error during {stage}: {message}")]
    Unexpected { stage: ImportStage, message: String },
}

impl ImportError {
    /// Wrap a lower-level failure raised while running `stage`.
    pub fn during(stage: ImportStage, err: impl Into<StageFailure>) -> Self {
        match err.into() {
            StageFailure::Db(DbError::NoConnection(message)) => ImportError::NoConnection(message),
            StageFailure::Db(other) => ImportError::Unexpected {
                stage,
                message: other.to_string(),
            },
            StageFailure::Other(message) => ImportError::Unexpected { stage, message },
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            ImportError::UploadMissing
            | ImportError::NoValidFilesFound
            | ImportError::TargetTableMissing(_) => ErrorType::ValidationFailed,
            ImportError::SequenceNot0 { .. } => ErrorType::PreparationFailed,
            ImportError::AllImportsFailed { .. } => ErrorType::ExecutionFailed,
            ImportError::TableCleanupFailed(_) => ErrorType::FinalizationFailed,
            ImportError::NoConnection(_) => ErrorType::NoDbConnection,
            ImportError::Unexpected { stage, .. } => stage.error_type(),
        }
    }

    pub fn error_description(&self) -> ErrorDescription {
        match self {
            ImportError::UploadMissing => ErrorDescription::UploadMissing,
            ImportError::NoValidFilesFound => ErrorDescription::NoValidFilesFound,
            ImportError::TargetTableMissing(_) => ErrorDescription::TargetTableDoesNotExists,
            ImportError::SequenceNot0 { .. } => ErrorDescription::SequenceNot0,
            ImportError::AllImportsFailed { .. } => ErrorDescription::AllImportsFailed,
            ImportError::TableCleanupFailed(_) => ErrorDescription::TableCleanupFailed,
            ImportError::NoConnection(_) | ImportError::Unexpected { .. } => {
                ErrorDescription::UnexpectedError
            }
        }
    }

    /// Detected before the target was touched; the job lands in `aborted`.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ImportError::UploadMissing
                | ImportError::NoValidFilesFound
                | ImportError::TargetTableMissing(_)
                | ImportError::SequenceNot0 { .. }
                | ImportError::Unexpected {
                    stage: ImportStage::Validation,
                    ..
                }
        )
    }

    /// The caller may resubmit once the database is reachable again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImportError::NoConnection(_))
    }
}

/// Lower-level failure folded into an [`ImportError`] by [`ImportError::during`]
#[derive(Debug)]
pub enum StageFailure {
    Db(DbError),
    Other(String),
}

impl From<DbError> for StageFailure {
    fn from(err: DbError) -> Self {
        StageFailure::Db(err)
    }
}

impl From<TemplateError> for StageFailure {
    fn from(err: TemplateError) -> Self {
        StageFailure::Other(err.to_string())
    }
}

impl From<IdentifierError> for StageFailure {
    fn from(err: IdentifierError) -> Self {
        StageFailure::Other(err.to_string())
    }
}

pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_not_0_is_precondition() {
        let err = ImportError::SequenceNot0 { version: 2 };
        assert!(err.is_precondition());
        assert_eq!(err.error_type(), ErrorType::PreparationFailed);
        assert_eq!(err.error_description().as_str(), "SEQUENCE_NOT_0");
    }

    #[test]
    fn test_connection_loss_maps_to_no_db_connection() {
        let err = ImportError::during(
            ImportStage::Execution,
            DbError::NoConnection("pool timed out".to_string()),
        );
        assert_eq!(err.error_type().as_str(), "no_db_connection");
        assert!(err.is_retryable());
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_unexpected_takes_stage_type() {
        let err = ImportError::during(
            ImportStage::Finalization,
            DbError::unexpected("no rows"),
        );
        assert_eq!(err.error_type(), ErrorType::FinalizationFailed);
        assert_eq!(err.error_description(), ErrorDescription::UnexpectedError);
    }

    #[test]
    fn test_vocabulary_serializes_as_stored() {
        assert_eq!(
            serde_json::to_string(&ErrorDescription::SequenceNot0).unwrap(),
            "\"SEQUENCE_NOT_0\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorDescription::TargetTableDoesNotExists).unwrap(),
            "\"TARGET_TABLE_DOES_NOT_EXISTS\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorType::NoDbConnection).unwrap(),
            "\"no_db_connection\""
        );
    }
}
