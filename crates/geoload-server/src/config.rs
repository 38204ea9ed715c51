//! Configuration management
//!
//! All settings come from the environment (after loading `.env`), with the
//! `DEFAULT_*` constants below as fallbacks. The configuration is read once at
//! startup and threaded into constructors; nothing consults the environment
//! after that.

use geoload_common::env;
use serde::{Deserialize, Serialize};

// ============================================================================
// Defaults
// ============================================================================

/// Database holding the job records.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/geoload";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Ten minutes.
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Prefix of the `application_name` each connector pool reports to Postgres.
pub const DEFAULT_APPLICATION_NAME: &str = "geoload";

pub const DEFAULT_IMPORT_SCHEMA: &str = "public";

/// Physical segments indexed during finalize, in build order.
pub const DEFAULT_INDEX_SEGMENTS: &str = "head,p0,root";

pub const DEFAULT_INDEX_STATUS_SCHEMA: &str = "xyz_config";

pub const DEFAULT_INDEX_STATUS_TABLE: &str = "xyz_idxs_status";

pub const DEFAULT_IMPORT_AUTHOR: &str = "ANONYMOUS";

pub const DEFAULT_STATISTICS_ENDPOINT: &str = "http://localhost:8080/hub";

pub const DEFAULT_STATISTICS_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_S3_REGION: &str = "eu-west-1";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Active sessions on a connector above which new imports wait; 0 disables the check.
pub const DEFAULT_MAX_CONNECTOR_QUERIES: usize = 16;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub connectors: Vec<ConnectorConfig>,
    pub import: ImportConfig,
    pub statistics: StatisticsConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

/// Pool settings shared by the job database and every connector pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub application_name: String,
}

/// One import target backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub id: String,
    pub url: String,
}

/// Import pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub schema: String,
    /// Selects the legacy index set instead of the versioned one. Decided once
    /// per process.
    pub legacy_layout: bool,
    /// Segment names in build order; `root` is the partitioned parent, any
    /// other name `n` is the table suffixed with `_n`.
    pub index_segments: Vec<String>,
    pub index_status_schema: String,
    pub index_status_table: String,
    /// Load through a narrow view with an INSTEAD OF trigger instead of
    /// straight into the table.
    pub use_view_facade: bool,
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreKind {
    Postgres,
    Memory,
}

impl std::str::FromStr for JobStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "jdbc" => Ok(JobStoreKind::Postgres),
            "memory" | "inmemory" => Ok(JobStoreKind::Memory),
            _ => Err(anyhow::anyhow!("Invalid job store: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub max_concurrent_jobs: usize,
    pub max_connector_queries: usize,
    pub job_store: JobStoreKind,
}

/// Parse `id=url;id2=url2`. URLs may contain `=` so only the first one splits.
pub fn parse_connectors(raw: &str) -> anyhow::Result<Vec<ConnectorConfig>> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, url) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Connector entry '{}' is not id=url", entry))?;
            Ok(ConnectorConfig {
                id: id.trim().to_string(),
                url: url.trim().to_string(),
            })
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::string_or("DATABASE_URL", DEFAULT_DATABASE_URL);
        let connectors = match env::var("GEOLOAD_CONNECTORS") {
            Some(raw) => parse_connectors(&raw)?,
            // A single-backend deployment imports into the job database.
            None => vec![ConnectorConfig {
                id: "default".to_string(),
                url: database_url.clone(),
            }],
        };

        let config = Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections: env::parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env::parse_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env::parse_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env::parse_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )?,
                application_name: env::string_or(
                    "GEOLOAD_APPLICATION_NAME",
                    DEFAULT_APPLICATION_NAME,
                ),
            },
            connectors,
            import: ImportConfig {
                schema: env::string_or("GEOLOAD_SCHEMA", DEFAULT_IMPORT_SCHEMA),
                legacy_layout: env::flag("GEOLOAD_LEGACY_LAYOUT", false)?,
                index_segments: parse_list(&env::string_or(
                    "GEOLOAD_INDEX_SEGMENTS",
                    DEFAULT_INDEX_SEGMENTS,
                )),
                index_status_schema: env::string_or(
                    "GEOLOAD_INDEX_STATUS_SCHEMA",
                    DEFAULT_INDEX_STATUS_SCHEMA,
                ),
                index_status_table: env::string_or(
                    "GEOLOAD_INDEX_STATUS_TABLE",
                    DEFAULT_INDEX_STATUS_TABLE,
                ),
                use_view_facade: env::flag("GEOLOAD_VIEW_FACADE", false)?,
                author: env::string_or("GEOLOAD_IMPORT_AUTHOR", DEFAULT_IMPORT_AUTHOR),
            },
            statistics: StatisticsConfig {
                endpoint: env::string_or("HUB_ENDPOINT", DEFAULT_STATISTICS_ENDPOINT),
                timeout_secs: env::parse_or(
                    "HUB_TIMEOUT_SECS",
                    DEFAULT_STATISTICS_TIMEOUT_SECS,
                )?,
            },
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT"),
                region: env::string_or("S3_REGION", DEFAULT_S3_REGION),
                access_key: env::var("S3_ACCESS_KEY").or_else(|| env::var("AWS_ACCESS_KEY_ID")),
                secret_key: env::var("S3_SECRET_KEY")
                    .or_else(|| env::var("AWS_SECRET_ACCESS_KEY")),
                path_style: env::flag("S3_PATH_STYLE", false)?,
            },
            scheduler: SchedulerConfig {
                poll_interval_secs: env::parse_or(
                    "GEOLOAD_POLL_INTERVAL",
                    DEFAULT_POLL_INTERVAL_SECS,
                )?,
                max_concurrent_jobs: env::parse_or(
                    "GEOLOAD_MAX_CONCURRENT_JOBS",
                    DEFAULT_MAX_CONCURRENT_JOBS,
                )?,
                max_connector_queries: env::parse_or(
                    "GEOLOAD_MAX_CONNECTOR_QUERIES",
                    DEFAULT_MAX_CONNECTOR_QUERIES,
                )?,
                job_store: env::string_or("GEOLOAD_JOB_STORE", "postgres").parse()?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.connectors.is_empty() {
            anyhow::bail!("At least one connector must be configured");
        }

        let mut seen = std::collections::HashSet::new();
        for connector in &self.connectors {
            if connector.id.is_empty() || connector.url.is_empty() {
                anyhow::bail!("Connector entries need both an id and a url");
            }
            if !seen.insert(connector.id.as_str()) {
                anyhow::bail!("Connector '{}' is configured twice", connector.id);
            }
        }

        if self.import.index_segments.is_empty() {
            anyhow::bail!("GEOLOAD_INDEX_SEGMENTS must name at least one segment");
        }

        if self.scheduler.max_concurrent_jobs == 0 {
            anyhow::bail!("GEOLOAD_MAX_CONCURRENT_JOBS must be greater than 0");
        }

        if !self.statistics.endpoint.starts_with("http://")
            && !self.statistics.endpoint.starts_with("https://")
        {
            anyhow::bail!(
                "HUB_ENDPOINT must start with http:// or https://, got '{}'",
                self.statistics.endpoint
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                application_name: DEFAULT_APPLICATION_NAME.to_string(),
            },
            connectors: vec![ConnectorConfig {
                id: "default".to_string(),
                url: DEFAULT_DATABASE_URL.to_string(),
            }],
            import: ImportConfig::default(),
            statistics: StatisticsConfig {
                endpoint: DEFAULT_STATISTICS_ENDPOINT.to_string(),
                timeout_secs: DEFAULT_STATISTICS_TIMEOUT_SECS,
            },
            storage: StorageConfig {
                endpoint: None,
                region: DEFAULT_S3_REGION.to_string(),
                access_key: None,
                secret_key: None,
                path_style: false,
            },
            scheduler: SchedulerConfig {
                poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
                max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
                max_connector_queries: DEFAULT_MAX_CONNECTOR_QUERIES,
                job_store: JobStoreKind::Postgres,
            },
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_IMPORT_SCHEMA.to_string(),
            legacy_layout: false,
            index_segments: parse_list(DEFAULT_INDEX_SEGMENTS),
            index_status_schema: DEFAULT_INDEX_STATUS_SCHEMA.to_string(),
            index_status_table: DEFAULT_INDEX_STATUS_TABLE.to_string(),
            use_view_facade: false,
            author: DEFAULT_IMPORT_AUTHOR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.import.index_segments, vec!["head", "p0", "root"]);
    }

    #[test]
    fn test_parse_connectors() {
        let connectors =
            parse_connectors("a=postgres://u:p@h1/db?sslmode=require; b=postgres://h2/db;").unwrap();
        assert_eq!(connectors.len(), 2);
        assert_eq!(connectors[0].id, "a");
        assert_eq!(connectors[0].url, "postgres://u:p@h1/db?sslmode=require");
        assert_eq!(connectors[1].id, "b");

        assert!(parse_connectors("no-equals-sign").is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_connectors() {
        let mut config = Config::default();
        config.connectors.push(config.connectors[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_pool_inversion() {
        let mut config = Config::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        std::env::set_var("GEOLOAD_CONNECTORS", "psql=postgres://localhost/a");
        std::env::set_var("GEOLOAD_LEGACY_LAYOUT", "true");
        std::env::set_var("GEOLOAD_INDEX_SEGMENTS", "p0, root");

        let config = Config::load().unwrap();
        assert_eq!(config.connectors[0].id, "psql");
        assert!(config.import.legacy_layout);
        assert_eq!(config.import.index_segments, vec!["p0", "root"]);

        std::env::remove_var("GEOLOAD_CONNECTORS");
        std::env::remove_var("GEOLOAD_LEGACY_LAYOUT");
        std::env::remove_var("GEOLOAD_INDEX_SEGMENTS");
    }

    #[test]
    #[serial]
    fn test_load_rejects_bad_flag() {
        std::env::set_var("GEOLOAD_LEGACY_LAYOUT", "sometimes");
        assert!(Config::load().is_err());
        std::env::remove_var("GEOLOAD_LEGACY_LAYOUT");
    }
}
