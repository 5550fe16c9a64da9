//! Ingestion pipeline.
//!
//! Drives an [`AnalysisJob`] through `queued → parsing → analyzing → storing
//! → complete`, producing every durable query artifact: OLAP entries, the
//! full-text index, the cached analyzer parse result, and the bus progress
//! stream. Any non-terminal state can fall to `failed`.
//!
//! Redelivery contract: job submission is at-least-once, so the first step
//! checks the metadata record and exits without work when the job is already
//! past `queued`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jar::{resolve_heap_mb, AnalyzerRunner, JarError, JarOutput};
use crate::models::{JobProgress, JobStatus, LogEntry};
use crate::parser::{self, ReportParser};
use crate::storage::{
    Cache, CompleteEvent, MessageBus, MetadataStore, OlapStore, ProgressEvent, SubmitDelivery,
    TenantKey,
};
use crate::storage::BlobStore;
use crate::utils::{ApiError, ApiResult};

/// Progress markers on the analyzer's stdout: `1371200 of 2742400`.
static PROGRESS_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+of\s+(\d+)").unwrap());

/// Share of the progress bar reserved for the analyzer; the tail belongs to
/// OLAP storage.
const JAR_PROGRESS_CAP: i16 = 90;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const BACKOFF_ATTEMPTS: u32 = 5;

pub const PARSE_RESULT_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_heap_mb: u32,
    pub default_timeout_secs: u64,
    pub batch_size: usize,
    /// Bound on concurrently processed jobs.
    pub worker_slots: usize,
}

pub struct IngestionPipeline {
    metadata: Arc<dyn MetadataStore>,
    olap: Arc<dyn OlapStore>,
    cache: Arc<dyn Cache>,
    blob: Arc<dyn BlobStore>,
    bus: Arc<dyn MessageBus>,
    runner: Arc<dyn AnalyzerRunner>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        olap: Arc<dyn OlapStore>,
        cache: Arc<dyn Cache>,
        blob: Arc<dyn BlobStore>,
        bus: Arc<dyn MessageBus>,
        runner: Arc<dyn AnalyzerRunner>,
        config: PipelineConfig,
    ) -> Self {
        Self { metadata, olap, cache, blob, bus, runner, config }
    }

    pub fn parse_result_key(tenant_id: Uuid, job_id: Uuid) -> TenantKey {
        TenantKey::new(tenant_id, &["parseresult", &job_id.to_string()])
    }

    /// Worker loop: consume submissions until shutdown, processing at most
    /// `worker_slots` jobs concurrently. Backpressure falls to the bus: a
    /// submission is only pulled once a slot is free.
    pub async fn run_worker(self: Arc<Self>, shutdown: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.config.worker_slots));
        tracing::info!(slots = self.config.worker_slots, "ingestion worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = slots.clone().acquire_owned() => permit.expect("semaphore never closed"),
                () = shutdown.cancelled() => break,
            };

            let delivery = tokio::select! {
                delivery = self.bus.next_submission() => delivery,
                () = shutdown.cancelled() => break,
            };

            match delivery {
                Ok(Some(delivery)) => {
                    let pipeline = Arc::clone(&self);
                    let job_cancel = shutdown.child_token();
                    tokio::spawn(async move {
                        let _permit = permit;
                        pipeline.handle_delivery(delivery, job_cancel).await;
                    });
                }
                Ok(None) => drop(permit),
                Err(err) => {
                    tracing::warn!(error = %err, "bus poll failed, backing off");
                    drop(permit);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!("ingestion worker stopped");
    }

    pub(crate) async fn handle_delivery(&self, delivery: SubmitDelivery, cancel: CancellationToken) {
        let tenant_id = delivery.tenant_id;
        let job_id = delivery.job_id;
        tracing::info!(%tenant_id, %job_id, "job submission received");

        if let Err(err) = self.process_job(tenant_id, job_id, &cancel).await {
            let reason = match &err {
                ApiError::Cancelled => "cancelled".to_string(),
                other => other.to_string(),
            };
            tracing::warn!(%tenant_id, %job_id, error = %reason, "job failed");
            if let Err(store_err) = self.metadata.fail_job(tenant_id, job_id, &reason, None).await {
                tracing::error!(%job_id, error = %store_err, "failed to persist job failure");
            }
            self.emit_progress(
                tenant_id,
                ProgressEvent {
                    job_id,
                    status: JobStatus::Failed,
                    progress_pct: 0,
                    processed_lines: None,
                    error: Some(reason),
                },
            )
            .await;
            let _ = self
                .bus
                .publish_complete(tenant_id, &CompleteEvent { job_id, success: false })
                .await;
        }

        // Acked regardless of outcome: the terminal state is persisted, so a
        // redelivery would be a no-op anyway.
        if let Err(err) = self.bus.ack_submission(&delivery).await {
            tracing::warn!(%job_id, error = %err, "failed to ack submission");
        }
    }

    async fn process_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let job = self
            .metadata
            .get_job(tenant_id, job_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;

        // Idempotence on redelivery.
        if job.status != JobStatus::Queued {
            tracing::info!(%job_id, status = %job.status, "job already claimed, skipping");
            return Ok(());
        }

        let log_file = self
            .metadata
            .get_log_file(tenant_id, job.log_file_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("log file {}", job.log_file_id)))?;

        self.metadata
            .transition_job(tenant_id, job_id, JobStatus::Parsing)
            .await?;
        self.metadata.mark_processing_started(tenant_id, job_id).await?;
        self.emit_progress(
            tenant_id,
            ProgressEvent {
                job_id,
                status: JobStatus::Parsing,
                progress_pct: 0,
                processed_lines: None,
                error: None,
            },
        )
        .await;

        // Per-job scratch dir; dropped (and deleted) on every exit path.
        let scratch = tempfile::tempdir()
            .map_err(|e| ApiError::internal(format!("create scratch dir: {}", e)))?;
        let local_path = scratch.path().join("input.log");

        let downloaded = retry("blob download", || async {
            self.blob
                .download_to(tenant_id, &log_file.object_key, &local_path)
                .await
        })
        .await?;
        if downloaded != log_file.size_bytes as u64 {
            return Err(ApiError::internal(format!(
                "blob size mismatch: recorded {} bytes, downloaded {}",
                log_file.size_bytes, downloaded
            )));
        }
        self.check_cancel(tenant_id, job_id, cancel).await?;

        // ── Run the analyzer, probing stdout for progress markers ──
        let heap_mb = match job.options.jvm_heap_mb {
            Some(mb) => mb,
            None if log_file.size_bytes > 0 => {
                resolve_heap_mb(log_file.size_bytes as u64, None)
            }
            None => self.config.default_heap_mb,
        };
        let timeout_secs = job
            .options
            .timeout_seconds
            .unwrap_or(self.config.default_timeout_secs);

        let (progress_tx, progress_rx) = mpsc::unbounded_channel::<(i64, i64)>();
        let reporter = self.spawn_progress_reporter(tenant_id, job_id, progress_rx);

        let mut probe = move |line: &str| {
            if let Some(cap) = PROGRESS_MARKER.captures(line) {
                let done: i64 = cap[1].parse().unwrap_or(0);
                let total: i64 = cap[2].parse().unwrap_or(0);
                let _ = progress_tx.send((done, total));
            }
        };
        let jar_result = self
            .runner
            .run(&local_path, heap_mb, timeout_secs, &job.options, cancel, &mut probe)
            .await;
        drop(probe);
        reporter.await.ok();

        let output = match jar_result {
            Ok(output) => output,
            Err(err) => return Err(self.jar_failure(tenant_id, job_id, err).await),
        };

        // ── Parse the report and cache it for the dashboard services ──
        self.metadata
            .transition_job(tenant_id, job_id, JobStatus::Analyzing)
            .await?;
        self.emit_status(tenant_id, job_id, JobStatus::Analyzing, JAR_PROGRESS_CAP).await;

        let parse_result = ReportParser::parse(&output.stdout);
        self.check_cancel(tenant_id, job_id, cancel).await?;
        let cache_key = Self::parse_result_key(tenant_id, job_id);
        retry("parse result cache write", || async {
            self.cache
                .set(&cache_key, &serde_json::to_string(&parse_result)?, PARSE_RESULT_TTL)
                .await
        })
        .await?;

        // ── Stream raw lines into the OLAP store ──
        self.metadata
            .transition_job(tenant_id, job_id, JobStatus::Storing)
            .await?;
        self.emit_status(tenant_id, job_id, JobStatus::Storing, JAR_PROGRESS_CAP).await;

        let stored = self
            .store_entries(tenant_id, job_id, &local_path, job.options.enable_fts, cancel)
            .await?;

        // ── Finalize ──
        let log_duration = match (stored.first_ts, stored.last_ts) {
            (Some(first), Some(last)) => Some(format_span(first, last)),
            _ => None,
        };
        self.metadata
            .update_progress(
                tenant_id,
                job_id,
                &JobProgress {
                    progress_pct: 100,
                    total_lines: None,
                    processed_lines: Some(stored.accepted as i64),
                    api_lines: Some(stored.api as i64),
                    sql_lines: Some(stored.sql as i64),
                    fltr_lines: Some(stored.fltr as i64),
                    escl_lines: Some(stored.escl as i64),
                },
            )
            .await?;
        self.metadata
            .complete_job(tenant_id, job_id, stored.first_ts, stored.last_ts, log_duration)
            .await?;

        self.emit_progress(
            tenant_id,
            ProgressEvent {
                job_id,
                status: JobStatus::Complete,
                progress_pct: 100,
                processed_lines: Some(stored.accepted as i64),
                error: None,
            },
        )
        .await;
        let _ = self
            .bus
            .publish_complete(tenant_id, &CompleteEvent { job_id, success: true })
            .await;

        tracing::info!(%job_id, accepted = stored.accepted, skipped = stored.skipped, "job complete");
        Ok(())
    }

    /// Attach analyzer diagnostics to the job record and map the error. The
    /// captured stdout is still parsed best-effort and cached so a partially
    /// produced report remains inspectable.
    async fn jar_failure(&self, tenant_id: Uuid, job_id: Uuid, err: JarError) -> ApiError {
        if let Some(output) = err.output() {
            self.cache_partial_report(tenant_id, job_id, output).await;
        }
        match err {
            JarError::Timeout { seconds, output } => {
                let _ = self
                    .metadata
                    .fail_job(
                        tenant_id,
                        job_id,
                        &format!("analyzer timed out after {}s", seconds),
                        Some(&output.stderr),
                    )
                    .await;
                ApiError::Timeout { seconds }
            }
            JarError::Cancelled { .. } => ApiError::Cancelled,
            JarError::Failed { output, exit_code } => {
                if let Err(store_err) = self
                    .metadata
                    .fail_job(
                        tenant_id,
                        job_id,
                        &format!("analyzer exited with status {}", exit_code),
                        Some(&output.stderr),
                    )
                    .await
                {
                    tracing::error!(%job_id, error = %store_err, "failed to attach stderr");
                }
                ApiError::SubprocessFailed { exit_code, stderr: output.stderr }
            }
            JarError::Spawn(io) => ApiError::internal(format!("spawn analyzer: {}", io)),
        }
    }

    async fn cache_partial_report(&self, tenant_id: Uuid, job_id: Uuid, output: &JarOutput) {
        if output.stdout.trim().is_empty() {
            return;
        }
        let partial = ReportParser::parse(&output.stdout);
        if let Ok(json) = serde_json::to_string(&partial) {
            let key = Self::parse_result_key(tenant_id, job_id);
            if let Err(err) = self.cache.set(&key, &json, PARSE_RESULT_TTL).await {
                tracing::debug!(%job_id, error = %err, "partial report cache write failed");
            }
        }
    }

    async fn store_entries(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        path: &std::path::Path,
        index_fts: bool,
        cancel: &CancellationToken,
    ) -> ApiResult<StoredCounts> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ApiError::internal(format!("reopen input: {}", e)))?;

        let counts = Arc::new(std::sync::Mutex::new(StoredCounts::default()));
        let counts_in = Arc::clone(&counts);

        let outcome = parser::parse_file(
            file,
            tenant_id,
            job_id,
            self.config.batch_size,
            cancel,
            |batch: Vec<LogEntry>| {
                let counts = Arc::clone(&counts_in);
                async move {
                    // Serialized per job: one batch in flight bounds memory.
                    retry("olap batch insert", || async {
                        self.olap.insert_entries(tenant_id, job_id, &batch).await
                    })
                    .await?;
                    if index_fts {
                        retry("fts batch index", || async {
                            self.olap.index_full_text(tenant_id, job_id, &batch).await
                        })
                        .await?;
                    }
                    for entry in &batch {
                        let _ = self.bus.publish_tail(tenant_id, entry).await;
                    }
                    counts.lock().unwrap().absorb(&batch);
                    Ok(())
                }
            },
        )
        .await;

        let mut totals = counts.lock().unwrap().clone();
        match outcome {
            Ok(summary) => {
                totals.accepted = summary.accepted;
                totals.skipped = summary.skipped;
                Ok(totals)
            }
            Err(aborted) => Err(aborted.error),
        }
    }

    /// Consume "N of M" markers and turn them into monotone progress updates
    /// capped at [`JAR_PROGRESS_CAP`].
    fn spawn_progress_reporter(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        mut rx: mpsc::UnboundedReceiver<(i64, i64)>,
    ) -> tokio::task::JoinHandle<()> {
        let metadata = Arc::clone(&self.metadata);
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            let mut last_pct: i16 = 0;
            while let Some((done, total)) = rx.recv().await {
                if total <= 0 {
                    continue;
                }
                let pct = ((done * JAR_PROGRESS_CAP as i64) / total).clamp(0, JAR_PROGRESS_CAP as i64)
                    as i16;
                // Out-of-order markers are discarded.
                if pct <= last_pct {
                    continue;
                }
                last_pct = pct;
                let progress = JobProgress {
                    progress_pct: pct,
                    total_lines: Some(total),
                    processed_lines: Some(done),
                    ..Default::default()
                };
                if let Err(err) = metadata.update_progress(tenant_id, job_id, &progress).await {
                    tracing::debug!(%job_id, error = %err, "progress persist failed");
                }
                let _ = bus
                    .publish_progress(
                        tenant_id,
                        &ProgressEvent {
                            job_id,
                            status: JobStatus::Parsing,
                            progress_pct: pct,
                            processed_lines: Some(done),
                            error: None,
                        },
                    )
                    .await;
            }
        })
    }

    async fn emit_status(&self, tenant_id: Uuid, job_id: Uuid, status: JobStatus, pct: i16) {
        self.emit_progress(
            tenant_id,
            ProgressEvent { job_id, status, progress_pct: pct, processed_lines: None, error: None },
        )
        .await;
    }

    async fn emit_progress(&self, tenant_id: Uuid, event: ProgressEvent) {
        if let Err(err) = self.bus.publish_progress(tenant_id, &event).await {
            tracing::debug!(job_id = %event.job_id, error = %err, "progress publish failed");
        }
    }

    /// Cancellation cascades from two sources: the worker shutdown token and
    /// the job's cancel flag in the metadata store.
    async fn check_cancel(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        if self.metadata.is_cancel_requested(tenant_id, job_id).await? {
            cancel.cancel();
            return Err(ApiError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct StoredCounts {
    accepted: u64,
    skipped: u64,
    api: u64,
    sql: u64,
    fltr: u64,
    escl: u64,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
}

impl StoredCounts {
    fn absorb(&mut self, batch: &[LogEntry]) {
        use crate::models::LogType;
        for entry in batch {
            match entry.log_type {
                LogType::Api => self.api += 1,
                LogType::Sql => self.sql += 1,
                LogType::Fltr => self.fltr += 1,
                LogType::Escl => self.escl += 1,
            }
            self.first_ts = Some(match self.first_ts {
                Some(first) if first <= entry.timestamp => first,
                _ => entry.timestamp,
            });
            self.last_ts = Some(match self.last_ts {
                Some(last) if last >= entry.timestamp => last,
                _ => entry.timestamp,
            });
        }
    }
}

fn format_span(first: DateTime<Utc>, last: DateTime<Utc>) -> String {
    let secs = (last - first).num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Bounded exponential backoff for transient infrastructure faults.
async fn retry<T, F, Fut>(operation: &str, mut f: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ApiResult<T>>,
{
    let mut delay = BACKOFF_BASE;
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < BACKOFF_ATTEMPTS => {
                tracing::warn!(operation, attempt, error = %err, "transient fault, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_marker_matches() {
        let cap = PROGRESS_MARKER.captures("Processed 1371200 of 2742400 lines").unwrap();
        assert_eq!(&cap[1], "1371200");
        assert_eq!(&cap[2], "2742400");
        assert!(PROGRESS_MARKER.captures("no markers here").is_none());
    }

    #[test]
    fn span_formatting() {
        let first = DateTime::parse_from_rfc3339("2025-11-24T14:00:00Z").unwrap().to_utc();
        let last = DateTime::parse_from_rfc3339("2025-11-24T15:30:05Z").unwrap().to_utc();
        assert_eq!(format_span(first, last), "01:30:05");
    }

    #[tokio::test]
    async fn retry_gives_up_after_bounded_attempts() {
        tokio::time::pause();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_in = calls.clone();
        let task = tokio::spawn(async move {
            retry::<(), _, _>("always fails", move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Err(ApiError::internal("boom"))
                }
            })
            .await
        });
        // Drive the paused clock through every backoff sleep.
        for _ in 0..BACKOFF_ATTEMPTS {
            tokio::time::advance(BACKOFF_CAP).await;
        }
        let result = task.await.unwrap();
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), BACKOFF_ATTEMPTS);
    }

    #[test]
    fn non_transient_errors_do_not_retry() {
        let err = ApiError::Cancelled;
        assert!(!err.is_transient());
        assert!(ApiError::internal("x").is_transient());
    }
}
