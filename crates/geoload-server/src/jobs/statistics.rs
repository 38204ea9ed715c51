//! Feature counts from the hub's statistics endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::repository::{RepositoryError, RepositoryResult};
use crate::config::StatisticsConfig;

/// Reports how many features a space currently holds
#[async_trait]
pub trait SpaceStatistics: Send + Sync {
    /// `None` when the endpoint reports no count.
    async fn feature_count(&self, space_id: &str) -> RepositoryResult<Option<i64>>;
}

#[derive(Debug, Deserialize)]
struct StatisticsBody {
    count: Option<CountValue>,
}

#[derive(Debug, Deserialize)]
struct CountValue {
    value: Option<i64>,
}

pub struct HttpSpaceStatistics {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSpaceStatistics {
    pub fn new(config: &StatisticsConfig) -> RepositoryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RepositoryError::Statistics(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, space_id: &str) -> String {
        format!("{}/spaces/{}/statistics", self.endpoint, space_id)
    }
}

#[async_trait]
impl SpaceStatistics for HttpSpaceStatistics {
    #[instrument(skip(self))]
    async fn feature_count(&self, space_id: &str) -> RepositoryResult<Option<i64>> {
        let response = self
            .client
            .get(self.url(space_id))
            .query(&[("skipCache", "true")])
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| RepositoryError::Statistics(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepositoryError::Statistics(format!(
                "statistics for space '{}' returned {}",
                space_id, status
            )));
        }

        let body: StatisticsBody = response
            .json()
            .await
            .map_err(|e| RepositoryError::Statistics(e.to_string()))?;

        let count = body.count.and_then(|c| c.value);
        debug!(count = ?count, "Space statistics received");
        Ok(count)
    }
}
