// Ingestion pipeline end-to-end against in-memory stores and a scripted
// analyzer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::jar::AnalyzerRunner;
use crate::models::JobStatus;
use crate::pipeline::{IngestionPipeline, PipelineConfig};
use crate::storage::{BlobStore, Cache, MessageBus, MetadataStore, OlapStore};
use crate::tests::common::{
    sample_api_line, sample_report, FakeAnalyzer, MockBlobStore, MockBus, MockCache,
    MockMetadataStore, MockOlapStore,
};

struct Harness {
    metadata: Arc<MockMetadataStore>,
    olap: Arc<MockOlapStore>,
    cache: Arc<MockCache>,
    blob: Arc<MockBlobStore>,
    bus: Arc<MockBus>,
}

impl Harness {
    fn new() -> Self {
        Self {
            metadata: Arc::new(MockMetadataStore::new()),
            olap: Arc::new(MockOlapStore::new()),
            cache: Arc::new(MockCache::new()),
            blob: Arc::new(MockBlobStore::new()),
            bus: Arc::new(MockBus::new()),
        }
    }

    fn pipeline(&self, runner: Arc<dyn AnalyzerRunner>) -> IngestionPipeline {
        IngestionPipeline::new(
            self.metadata.clone() as Arc<dyn MetadataStore>,
            self.olap.clone() as Arc<dyn OlapStore>,
            self.cache.clone() as Arc<dyn Cache>,
            self.blob.clone() as Arc<dyn BlobStore>,
            self.bus.clone() as Arc<dyn MessageBus>,
            runner,
            PipelineConfig {
                default_heap_mb: 2048,
                default_timeout_secs: 60,
                batch_size: 3,
                worker_slots: 1,
            },
        )
    }
}

/// Nine lines, two of them malformed, so the accepted count is 7 and batch
/// size 3 yields batches of [3, 3, 1].
fn nine_line_file() -> String {
    let mut content = String::new();
    for i in 0..9 {
        if i == 2 || i == 5 {
            content.push_str("this is not an AR log line\n");
        } else {
            content.push_str(sample_api_line());
            content.push('\n');
        }
    }
    content
}

async fn seed(harness: &Harness, content: &str) -> (uuid::Uuid, uuid::Uuid) {
    let (tenant_id, file_id, job_id) = harness.metadata.seed_job(content.len() as i64);
    let file = harness
        .metadata
        .get_log_file(tenant_id, file_id)
        .await
        .unwrap()
        .unwrap();
    harness.blob.put_object(&file.object_key, content.as_bytes().to_vec());
    (tenant_id, job_id)
}

fn analyzer_stdout() -> Vec<String> {
    let mut lines = vec![
        "Processed 3 of 9 lines".to_string(),
        "Processed 9 of 9 lines".to_string(),
    ];
    lines.extend(sample_report().lines().map(str::to_string));
    lines
}

#[tokio::test]
async fn ingests_a_job_to_completion() {
    let harness = Harness::new();
    let (tenant_id, job_id) = seed(&harness, &nine_line_file()).await;
    let pipeline = harness.pipeline(FakeAnalyzer::succeeding(analyzer_stdout()));

    pipeline
        .handle_delivery(MockBus::delivery(tenant_id, job_id), CancellationToken::new())
        .await;

    let job = harness
        .metadata
        .get_job(tenant_id, job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.progress_pct, 100);
    assert_eq!(job.processed_lines, 7);
    assert_eq!(job.api_lines, 7);
    assert!(job.completed_at.is_some());
    assert!(job.log_start.is_some());

    // 7 entries in OLAP, all full-text indexed (default options enable fts).
    assert_eq!(harness.olap.entries.lock().unwrap().len(), 7);
    assert_eq!(
        harness
            .olap
            .fts_indexed
            .load(std::sync::atomic::Ordering::SeqCst),
        7
    );

    // Parse result cached for the dashboard services.
    let key = IngestionPipeline::parse_result_key(tenant_id, job_id);
    assert!(harness.cache.contains(&key));

    // Progress events are monotone and the completion event fired.
    let events = harness.bus.progress_events.lock().unwrap();
    let mut last = -1i16;
    for event in events.iter() {
        assert!(event.progress_pct >= last, "progress went backwards");
        last = event.progress_pct;
    }
    assert_eq!(last, 100);
    drop(events);

    let completes = harness.bus.complete_events.lock().unwrap();
    assert_eq!(completes.len(), 1);
    assert!(completes[0].success);
}

#[tokio::test]
async fn redelivery_of_a_claimed_job_is_a_noop() {
    let harness = Harness::new();
    let (tenant_id, job_id) = seed(&harness, &nine_line_file()).await;
    let pipeline = harness.pipeline(FakeAnalyzer::succeeding(analyzer_stdout()));

    pipeline
        .handle_delivery(MockBus::delivery(tenant_id, job_id), CancellationToken::new())
        .await;
    let first = harness
        .metadata
        .get_job(tenant_id, job_id)
        .await
        .unwrap()
        .unwrap();

    // At-least-once: the same submission arrives again.
    pipeline
        .handle_delivery(MockBus::delivery(tenant_id, job_id), CancellationToken::new())
        .await;
    let second = harness
        .metadata
        .get_job(tenant_id, job_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.completed_at, second.completed_at);
    assert_eq!(harness.olap.entries.lock().unwrap().len(), 7);
    // Both deliveries were acked.
    assert_eq!(harness.bus.acked.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn analyzer_failure_fails_the_job_with_stderr() {
    let harness = Harness::new();
    let (tenant_id, job_id) = seed(&harness, &nine_line_file()).await;
    let pipeline = harness.pipeline(FakeAnalyzer::failing(2, "java.lang.OutOfMemoryError"));

    pipeline
        .handle_delivery(MockBus::delivery(tenant_id, job_id), CancellationToken::new())
        .await;

    let job = harness
        .metadata
        .get_job(tenant_id, job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap_or("").contains("status 2"));
    assert_eq!(job.stderr_output.as_deref(), Some("java.lang.OutOfMemoryError"));
    assert!(job.completed_at.is_some());

    let completes = harness.bus.complete_events.lock().unwrap();
    assert_eq!(completes.len(), 1);
    assert!(!completes[0].success);
    // No entries were stored.
    assert!(harness.olap.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn requested_cancellation_fails_the_job_with_cancelled_reason() {
    let harness = Harness::new();
    let (tenant_id, job_id) = seed(&harness, &nine_line_file()).await;
    harness.metadata.request_cancel(tenant_id, job_id).await.unwrap();

    let pipeline = harness.pipeline(FakeAnalyzer::succeeding(analyzer_stdout()));
    pipeline
        .handle_delivery(MockBus::delivery(tenant_id, job_id), CancellationToken::new())
        .await;

    let job = harness
        .metadata
        .get_job(tenant_id, job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn blob_size_mismatch_fails_the_job() {
    let harness = Harness::new();
    let content = nine_line_file();
    // Recorded size disagrees with the stored object.
    let (tenant_id, file_id, job_id) = harness.metadata.seed_job(content.len() as i64 + 100);
    let file = harness
        .metadata
        .get_log_file(tenant_id, file_id)
        .await
        .unwrap()
        .unwrap();
    harness.blob.put_object(&file.object_key, content.as_bytes().to_vec());

    let pipeline = harness.pipeline(FakeAnalyzer::succeeding(analyzer_stdout()));
    pipeline
        .handle_delivery(MockBus::delivery(tenant_id, job_id), CancellationToken::new())
        .await;

    let job = harness
        .metadata
        .get_job(tenant_id, job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap_or("").contains("size mismatch"));
}
