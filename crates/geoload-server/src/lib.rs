//! Geoload import worker library
//!
//! Bulk-loads uploaded CSV files from object storage into freshly created,
//! partitioned feature tables and rebuilds their indices afterwards.
//!
//! # Pipeline
//!
//! An import job moves through
//! `waiting → queued → validating → validated → preparing → prepared →
//! executing → executed → finalizing → finalized`, or is diverted to
//! `aborted` (precondition violated, nothing touched) or `failed` (partial
//! work done).
//!
//! - **validate**: the target table exists and at least one upload is usable
//! - **prepare**: claim the table through its version sequence, drop its
//!   indices, install the staging trigger (and optionally a view)
//! - **execute**: load each upload with `aws_s3.table_import_from_s3`
//! - **finalize**: rebuild indices segment by segment, tear the staging
//!   facade down, flag the table for maintenance
//!
//! # Modules
//!
//! - [`config`]: environment-driven configuration
//! - [`db`]: connector registry and the SQL executor seam
//! - [`sql`]: statement templates and identifier hardening
//! - [`import`]: the pipeline itself
//! - [`jobs`]: job model, repository, stores and scheduler
//! - [`error`]: failure taxonomy recorded on jobs

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod jobs;
pub mod sql;

pub use config::Config;
pub use error::{ErrorDescription, ErrorType, ImportError, ImportResult};
