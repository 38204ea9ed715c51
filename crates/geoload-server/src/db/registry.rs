//! Per-connector client lookup

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPool};

use super::{pool_options, DbError, DbResult, SqlExecutor};
use crate::config::{ConnectorConfig, DatabaseConfig};

/// Resolves a connector id to the client that reaches its database
pub trait ConnectorRegistry: Send + Sync {
    fn client(&self, connector_id: &str) -> DbResult<Arc<dyn SqlExecutor>>;

    /// Name the connector's sessions report as `application_name`, used to
    /// find them in `pg_stat_activity`.
    fn application_name(&self, connector_id: &str) -> String;
}

/// One lazily connecting pool per configured connector
pub struct PgConnectorRegistry {
    pools: HashMap<String, PgPool>,
    application_prefix: String,
}

impl PgConnectorRegistry {
    pub fn new(database: &DatabaseConfig, connectors: &[ConnectorConfig]) -> DbResult<Self> {
        let mut pools = HashMap::with_capacity(connectors.len());

        for connector in connectors {
            let options = PgConnectOptions::from_str(&connector.url)
                .map_err(|e| DbError::config(format!("connector '{}': {}", connector.id, e)))?
                .application_name(&application_name(&database.application_name, &connector.id));

            let pool = pool_options(database).connect_lazy_with(options);
            pools.insert(connector.id.clone(), pool);

            tracing::debug!(connector = %connector.id, "Registered connector pool");
        }

        Ok(Self {
            pools,
            application_prefix: database.application_name.clone(),
        })
    }

    pub fn connector_ids(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub async fn close(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
    }
}

impl ConnectorRegistry for PgConnectorRegistry {
    fn client(&self, connector_id: &str) -> DbResult<Arc<dyn SqlExecutor>> {
        self.pools
            .get(connector_id)
            .map(|pool| Arc::new(pool.clone()) as Arc<dyn SqlExecutor>)
            .ok_or_else(|| DbError::UnknownConnector(connector_id.to_string()))
    }

    fn application_name(&self, connector_id: &str) -> String {
        application_name(&self.application_prefix, connector_id)
    }
}

fn application_name(prefix: &str, connector_id: &str) -> String {
    format!("{}_import_{}", prefix, connector_id)
}
