//! Job records, their persistence, and the scheduler that runs them

pub mod memory;
pub mod model;
pub mod objects;
pub mod postgres;
pub mod repository;
pub mod scheduler;
pub mod statistics;

pub use memory::InMemoryJobStore;
pub use model::{
    CsvFormat, ExportJob, ImportJob, ImportObject, ImportObjectStatus, Job, JobEnvelope,
    JobStatus, JobType, ModelError, Strategy, DEFAULT_TIMESTAMP,
};
pub use objects::{ObjectInspector, S3ObjectInspector};
pub use postgres::PgJobStore;
pub use repository::{
    JobFilter, JobRepository, JobStatusSink, JobStore, RepositoryError, RepositoryResult,
};
pub use scheduler::ImportScheduler;
pub use statistics::{HttpSpaceStatistics, SpaceStatistics};
