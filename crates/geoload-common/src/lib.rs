//! Geoload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the geoload workspace members:
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Environment**: typed lookups of environment variables with defaults
//! - **Logging**: tracing subscriber bootstrap driven by `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use geoload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> geoload_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("worker booted");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
