// Dashboard service gating and cache-first composition.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::models::JobStatus;
use crate::parser::ReportParser;
use crate::pipeline::IngestionPipeline;
use crate::query::DashboardService;
use crate::storage::{Cache, MetadataStore, OlapStore};
use crate::tests::common::{sample_report, MockCache, MockMetadataStore, MockOlapStore};
use crate::utils::ApiError;

struct Harness {
    metadata: Arc<MockMetadataStore>,
    olap: Arc<MockOlapStore>,
    cache: Arc<MockCache>,
    service: DashboardService,
}

fn harness() -> Harness {
    let metadata = Arc::new(MockMetadataStore::new());
    let olap = Arc::new(MockOlapStore::new());
    let cache = Arc::new(MockCache::new());
    let service = DashboardService::new(
        metadata.clone() as Arc<dyn MetadataStore>,
        olap.clone() as Arc<dyn OlapStore>,
        cache.clone() as Arc<dyn Cache>,
    );
    Harness { metadata, olap, cache, service }
}

async fn cache_parse_result(harness: &Harness, tenant_id: Uuid, job_id: Uuid) {
    let result = ReportParser::parse(&sample_report());
    let key = IngestionPipeline::parse_result_key(tenant_id, job_id);
    harness
        .cache
        .set(&key, &serde_json::to_string(&result).unwrap(), Duration::from_secs(60))
        .await
        .unwrap();
}

#[tokio::test]
async fn incomplete_job_is_not_ready() {
    let harness = harness();
    let (tenant_id, _file, job_id) = harness.metadata.seed_job(100);
    harness
        .metadata
        .set_job_status(tenant_id, job_id, JobStatus::Analyzing);

    let err = harness.service.dashboard(tenant_id, job_id).await.unwrap_err();
    match err {
        ApiError::NotReady { status } => assert_eq!(status, "analyzing"),
        other => panic!("expected not_ready, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let harness = harness();
    let err = harness
        .service
        .dashboard(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn job_is_invisible_to_another_tenant() {
    let harness = harness();
    let (tenant_id, _file, job_id) = harness.metadata.seed_job(100);
    harness
        .metadata
        .set_job_status(tenant_id, job_id, JobStatus::Complete);

    let err = harness
        .service
        .dashboard(Uuid::new_v4(), job_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn dashboard_serves_the_cached_parse_result() {
    let harness = harness();
    let (tenant_id, _file, job_id) = harness.metadata.seed_job(100);
    harness
        .metadata
        .set_job_status(tenant_id, job_id, JobStatus::Complete);
    cache_parse_result(&harness, tenant_id, job_id).await;

    let dashboard = harness.service.dashboard(tenant_id, job_id).await.unwrap();
    assert_eq!(dashboard.general.total_lines, 9);
    assert_eq!(dashboard.general.api_count, 7);
    // The health score is passed through from the analyzer, never recomputed.
    assert_eq!(dashboard.general.health_score, Some(91.5));
    assert_eq!(dashboard.top_api.len(), 1);
    assert_eq!(dashboard.distribution[0].count, 7);
}

#[tokio::test]
async fn section_endpoints_require_the_parse_result() {
    let harness = harness();
    let (tenant_id, _file, job_id) = harness.metadata.seed_job(100);
    harness
        .metadata
        .set_job_status(tenant_id, job_id, JobStatus::Complete);

    // Complete job, but the cached parse result is gone: sections answer
    // not_ready instead of synthesizing.
    let err = harness.service.aggregates(tenant_id, job_id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotReady { .. }));

    cache_parse_result(&harness, tenant_id, job_id).await;
    assert!(harness.service.aggregates(tenant_id, job_id).await.is_ok());
    assert!(harness.service.queued_calls(tenant_id, job_id).await.is_ok());
}

#[tokio::test]
async fn delayed_escalations_compute_summary_metrics() {
    use crate::models::{LogEntry, LogType};
    use chrono::Utc;

    let harness = harness();
    let (tenant_id, _file, job_id) = harness.metadata.seed_job(100);
    harness
        .metadata
        .set_job_status(tenant_id, job_id, JobStatus::Complete);

    let mut entries = Vec::new();
    for delay in [500i64, 2_000, 8_000] {
        let mut entry =
            LogEntry::blank(tenant_id, job_id, 1, Utc::now(), LogType::Escl);
        entry.delay_ms = delay;
        entries.push(entry);
    }
    harness
        .olap
        .insert_entries(tenant_id, job_id, &entries)
        .await
        .unwrap();

    let response = harness
        .service
        .delayed_escalations(tenant_id, job_id, 1_000, 10)
        .await
        .unwrap();
    // Only the two above the threshold, worst first.
    assert_eq!(response.total, 2);
    assert_eq!(response.max_delay_ms, 8_000);
    assert_eq!(response.avg_delay_ms, 5_000.0);
    assert_eq!(response.escalations[0].delay_ms, 8_000);
}
