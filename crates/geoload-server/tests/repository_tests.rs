//! Job repository over the in-memory store, with the statistics endpoint mocked

mod common;

use std::sync::Arc;

use common::*;
use geoload_server::config::StatisticsConfig;
use geoload_server::jobs::{
    CsvFormat, ExportJob, HttpSpaceStatistics, ImportJob, InMemoryJobStore, Job, JobFilter,
    JobRepository, JobStatus, JobType, RepositoryError, SpaceStatistics, Strategy,
    DEFAULT_TIMESTAMP,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn statistics(server: &MockServer) -> HttpSpaceStatistics {
    HttpSpaceStatistics::new(&StatisticsConfig {
        endpoint: format!("{}/hub/", server.uri()),
        timeout_secs: 5,
    })
    .unwrap()
}

fn import_for(space: &str) -> Job {
    ImportJob::new("import", space, TABLE, false, CsvFormat::Geojson, Strategy::LastWins)
        .with_connector(CONNECTOR)
        .into()
}

#[tokio::test]
async fn test_statistics_reads_feature_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hub/spaces/space-1/statistics"))
        .and(query_param("skipCache", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "count": { "value": 5, "estimated": false }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let count = statistics(&server).feature_count("space-1").await.unwrap();
    assert_eq!(count, Some(5));
}

#[tokio::test]
async fn test_statistics_without_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hub/spaces/space-1/statistics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let count = statistics(&server).feature_count("space-1").await.unwrap();
    assert_eq!(count, None);
}

#[tokio::test]
async fn test_store_accepts_empty_space() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hub/spaces/space-1/statistics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "count": { "value": 0 }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryJobStore::new());
    let repository = JobRepository::new(store.clone(), Arc::new(statistics(&server)));

    let stored = repository.store(import_for("space-1")).await.unwrap();

    assert!(!stored.id().is_empty());
    assert_ne!(stored.envelope().created_at, DEFAULT_TIMESTAMP);
    assert_ne!(stored.envelope().updated_at, DEFAULT_TIMESTAMP);
    assert_eq!(stored.status(), JobStatus::Waiting);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_store_rejects_non_empty_space() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hub/spaces/space-1/statistics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "count": { "value": 5 }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryJobStore::new());
    let repository = JobRepository::new(store.clone(), Arc::new(statistics(&server)));

    let err = repository.store(import_for("space-1")).await.unwrap_err();

    assert!(matches!(err, RepositoryError::PreconditionFailed(ref m) if m == "Layer is not empty!"));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_store_surfaces_statistics_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hub/spaces/space-1/statistics"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryJobStore::new());
    let repository = JobRepository::new(store.clone(), Arc::new(statistics(&server)));

    let err = repository.store(import_for("space-1")).await.unwrap_err();

    assert!(matches!(err, RepositoryError::Statistics(_)));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_store_keeps_given_id() {
    let (_, repository) = memory_repository(None);

    let stored = repository
        .store(queued_import("job-1").into())
        .await
        .unwrap();

    assert_eq!(stored.id(), "job-1");
    assert!(repository.get("job-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_store_rejects_duplicate_id() {
    let (store, repository) = memory_repository(None);
    repository.store(queued_import("dup").into()).await.unwrap();

    let mut second = queued_import("dup");
    second.envelope.target_space_id = Some("space-2".to_string());
    let err = repository.store(second.into()).await.unwrap_err();

    assert!(matches!(err, RepositoryError::Conflict(ref id) if id == "dup"));
    assert_eq!(store.len().await, 1);
    let kept = repository.get("dup").await.unwrap().unwrap();
    assert_eq!(kept.envelope().target_space_id.as_deref(), Some("space-1"));
}

#[tokio::test]
async fn test_update_stamps_updated_at() {
    let (_, repository) = memory_repository(Some(0));
    let stored = repository.store(import_for("space-1")).await.unwrap();

    let mut job = stored.clone().into_import().unwrap();
    job.envelope.updated_at = 0;
    job.advance(JobStatus::Queued).unwrap();
    let updated = repository.update(job.into()).await.unwrap();

    assert!(updated.envelope().updated_at > 0);
    assert_eq!(updated.envelope().created_at, stored.envelope().created_at);

    let reloaded = repository.get(stored.id()).await.unwrap().unwrap();
    assert_eq!(reloaded.status(), JobStatus::Queued);
}

#[tokio::test]
async fn test_missing_ids() {
    let (_, repository) = memory_repository(None);

    assert!(repository.get("nope").await.unwrap().is_none());
    assert!(repository.delete("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_returns_removed_job() {
    let (store, repository) = memory_repository(None);
    repository.store(queued_import("job-1").into()).await.unwrap();

    let removed = repository.delete("job-1").await.unwrap().unwrap();

    assert_eq!(removed.id(), "job-1");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_list_filters() {
    let (_, repository) = memory_repository(None);

    repository.store(queued_import("a").into()).await.unwrap();
    repository.store(import_for("space-2")).await.unwrap();
    let mut export = ExportJob::default();
    export.envelope.id = "export-1".to_string();
    export.envelope.target_space_id = Some("space-1".to_string());
    repository.store(export.into()).await.unwrap();

    let all = repository.list(&JobFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let imports = repository
        .list(&JobFilter {
            job_type: Some(JobType::Import),
            ..JobFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(imports.len(), 2);

    let queued = repository
        .list(&JobFilter {
            status: Some(JobStatus::Queued),
            ..JobFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id(), "a");

    let in_space = repository
        .list(&JobFilter {
            target_space_id: Some("space-1".to_string()),
            ..JobFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(in_space.len(), 2);
}

#[tokio::test]
async fn test_running_imports_for_space() {
    let (_, repository) = memory_repository(None);

    repository.store(queued_import("running").into()).await.unwrap();

    let mut waiting = queued_import("waiting");
    waiting.envelope.status = JobStatus::Waiting;
    repository.store(waiting.into()).await.unwrap();

    let mut done = queued_import("done");
    done.advance(JobStatus::Failed).unwrap();
    repository.store(done.into()).await.unwrap();

    let mut export = ExportJob::default();
    export.envelope.id = "export".to_string();
    export.envelope.target_space_id = Some("space-1".to_string());
    export.envelope.status = JobStatus::Executing;
    repository.store(export.into()).await.unwrap();

    let running = repository
        .list_running_imports_for_space("space-1")
        .await
        .unwrap();
    assert_eq!(running, ["running"]);

    assert!(repository
        .list_running_imports_for_space("space-2")
        .await
        .unwrap()
        .is_empty());
}
