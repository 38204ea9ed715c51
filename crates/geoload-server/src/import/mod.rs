//! Import pipeline
//!
//! - [`catalog`]: index definitions and per-segment build plans
//! - [`guard`]: fresh-table claim through the version sequence
//! - [`facade`]: staging trigger and view installed for the load
//! - [`loader`]: server-side `aws_s3` bulk load
//! - [`barrier`]: segment-ordered, per-segment parallel index rebuild
//! - [`orchestrator`]: the phase machine tying it all together

pub mod barrier;
pub mod catalog;
pub mod facade;
pub mod guard;
pub mod loader;
pub mod orchestrator;

pub use barrier::{BarrierReport, IndexBuildBarrier, IndexFailure};
pub use catalog::{IndexKind, IndexLayout, IndexPlan, Segment};
pub use facade::StagingFacade;
pub use guard::ConsistencyGuard;
pub use loader::{BulkLoader, LoadRequest};
pub use orchestrator::{ImportOrchestrator, ImportSettings};
