// Common test utilities: in-memory implementations of the storage seams and
// a scripted analyzer, so the pipeline and services run end-to-end without a
// database, a broker, or a JVM.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jar::{AnalyzerRunner, JarError, JarOutput};
use crate::kql;
use crate::models::*;
use crate::parser::report_models::{GeneralStatistics, TimeSeriesPoint, TopNEntry};
use crate::storage::*;
use crate::utils::{ApiError, ApiResult};

// ════════════════════════════════════════════════════════════════════════
// Metadata store
// ════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MetaState {
    tenants: HashMap<Uuid, Tenant>,
    files: HashMap<(Uuid, Uuid), LogFile>,
    jobs: HashMap<(Uuid, Uuid), AnalysisJob>,
    conversations: HashMap<(Uuid, Uuid), Conversation>,
    messages: Vec<Message>,
    saved: HashMap<(Uuid, Uuid), SavedSearch>,
    interactions: Vec<NewAiInteraction>,
}

#[derive(Default)]
pub struct MockMetadataStore {
    state: Mutex<MetaState>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a queued job with its log file; returns (tenant, file, job) ids.
    pub fn seed_job(&self, size_bytes: i64) -> (Uuid, Uuid, Uuid) {
        let tenant_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap();
        state.files.insert(
            (tenant_id, file_id),
            LogFile {
                id: file_id,
                tenant_id,
                filename: "arserver.log".into(),
                size_bytes,
                bucket: "remedyiq-logs".into(),
                object_key: format!("{}/{}/arserver.log", tenant_id, file_id),
                content_type: "text/plain".into(),
                sha256: None,
                log_types: vec![LogType::Api],
                uploaded_at: Utc::now(),
            },
        );
        let job = blank_job(tenant_id, file_id);
        let job_id = job.id;
        state.jobs.insert((tenant_id, job_id), job);
        (tenant_id, file_id, job_id)
    }

    pub fn set_job_status(&self, tenant_id: Uuid, job_id: Uuid, status: JobStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&(tenant_id, job_id)) {
            job.status = status;
            if status.is_terminal() {
                job.completed_at = Some(Utc::now());
            }
        }
    }

    pub fn interactions(&self) -> Vec<NewAiInteraction> {
        self.state.lock().unwrap().interactions.clone()
    }
}

pub fn blank_job(tenant_id: Uuid, log_file_id: Uuid) -> AnalysisJob {
    AnalysisJob {
        id: Uuid::new_v4(),
        tenant_id,
        log_file_id,
        status: JobStatus::Queued,
        options: AnalysisOptions::default(),
        progress_pct: 0,
        total_lines: None,
        processed_lines: 0,
        api_lines: 0,
        sql_lines: 0,
        fltr_lines: 0,
        escl_lines: 0,
        processing_started_at: None,
        processing_ended_at: None,
        log_start: None,
        log_end: None,
        log_duration: None,
        error_message: None,
        stderr_output: None,
        cancel_requested: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        completed_at: None,
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    async fn create_tenant(&self, req: CreateTenantRequest) -> ApiResult<Tenant> {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            external_org_id: req.external_org_id,
            name: req.name,
            plan: req.plan.unwrap_or_else(|| "standard".into()),
            storage_quota_gb: req.storage_quota_gb.unwrap_or(50),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .tenants
            .insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> ApiResult<Option<Tenant>> {
        Ok(self.state.lock().unwrap().tenants.get(&tenant_id).cloned())
    }

    async fn insert_log_file(&self, tenant_id: Uuid, file: &LogFile) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((tenant_id, file.id), file.clone());
        Ok(())
    }

    async fn get_log_file(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Option<LogFile>> {
        Ok(self.state.lock().unwrap().files.get(&(tenant_id, id)).cloned())
    }

    async fn create_job(
        &self,
        tenant_id: Uuid,
        log_file_id: Uuid,
        options: AnalysisOptions,
    ) -> ApiResult<AnalysisJob> {
        let mut job = blank_job(tenant_id, log_file_id);
        job.options = options;
        self.state
            .lock()
            .unwrap()
            .jobs
            .insert((tenant_id, job.id), job.clone());
        Ok(job)
    }

    async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Option<AnalysisJob>> {
        Ok(self.state.lock().unwrap().jobs.get(&(tenant_id, job_id)).cloned())
    }

    async fn list_jobs(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<AnalysisJob>> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<AnalysisJob> = state
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transition_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        next: JobStatus,
    ) -> ApiResult<AnalysisJob> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&(tenant_id, job_id))
            .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;
        if !job.status.can_advance_to(next) {
            return Err(ApiError::validation(format!(
                "illegal job transition {} -> {}",
                job.status, next
            )));
        }
        job.status = next;
        job.updated_at = Utc::now();
        if next.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        Ok(job.clone())
    }

    async fn update_progress(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        progress: &JobProgress,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&(tenant_id, job_id)) {
            job.progress_pct = job.progress_pct.max(progress.progress_pct.min(100));
            if let Some(total) = progress.total_lines {
                job.total_lines = Some(job.total_lines.unwrap_or(0).max(total));
            }
            if let Some(v) = progress.processed_lines {
                job.processed_lines = v;
            }
            if let Some(v) = progress.api_lines {
                job.api_lines = v;
            }
            if let Some(v) = progress.sql_lines {
                job.sql_lines = v;
            }
            if let Some(v) = progress.fltr_lines {
                job.fltr_lines = v;
            }
            if let Some(v) = progress.escl_lines {
                job.escl_lines = v;
            }
        }
        Ok(())
    }

    async fn complete_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        log_start: Option<DateTime<Utc>>,
        log_end: Option<DateTime<Utc>>,
        log_duration: Option<String>,
    ) -> ApiResult<AnalysisJob> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&(tenant_id, job_id))
            .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;
        if job.status != JobStatus::Storing {
            return Err(ApiError::validation("job is not in storing state"));
        }
        job.status = JobStatus::Complete;
        job.progress_pct = 100;
        job.log_start = log_start;
        job.log_end = log_end;
        job.log_duration = log_duration;
        job.processing_ended_at = Some(Utc::now());
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn fail_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        error_message: &str,
        stderr_output: Option<&str>,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&(tenant_id, job_id)) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Failed;
                job.error_message = Some(error_message.to_string());
                if let Some(stderr) = stderr_output {
                    job.stderr_output = Some(stderr.to_string());
                }
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_processing_started(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&(tenant_id, job_id)) {
            job.processing_started_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn request_cancel(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&(tenant_id, job_id)) {
            Some(job) if !job.status.is_terminal() => {
                job.cancel_requested = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_cancel_requested(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .get(&(tenant_id, job_id))
            .map(|j| j.cancel_requested)
            .unwrap_or(false))
    }

    async fn create_conversation(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Uuid,
        title: Option<String>,
    ) -> ApiResult<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: user_id.to_string(),
            job_id,
            title,
            message_count: 0,
            last_message_at: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .conversations
            .insert((tenant_id, conversation.id), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Option<Conversation>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .conversations
            .get(&(tenant_id, id))
            .cloned())
    }

    async fn list_conversations(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Option<Uuid>,
    ) -> ApiResult<Vec<Conversation>> {
        let state = self.state.lock().unwrap();
        let mut result: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && c.user_id == user_id
                    && job_id.map(|j| c.job_id == j).unwrap_or(true)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(result)
    }

    async fn delete_conversation(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        let removed = state.conversations.remove(&(tenant_id, id)).is_some();
        if removed {
            state.messages.retain(|m| m.conversation_id != id);
        }
        Ok(removed)
    }

    async fn add_message(&self, tenant_id: Uuid, message: NewMessage) -> ApiResult<Message> {
        let mut state = self.state.lock().unwrap();
        let stored = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            tenant_id,
            role: message.role,
            content: message.content,
            skill_name: message.skill_name,
            follow_ups: message.follow_ups,
            tokens_used: message.tokens_used,
            latency_ms: message.latency_ms,
            status: message.status,
            error_message: message.error_message,
            created_at: Utc::now(),
        };
        // Mirror the metadata store's counter trigger.
        if let Some(conversation) = state
            .conversations
            .get_mut(&(tenant_id, message.conversation_id))
        {
            conversation.message_count += 1;
            conversation.last_message_at = Some(stored.created_at);
            conversation.updated_at = stored.created_at;
        }
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn get_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<Message>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.conversation_id == conversation_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn record_interaction(
        &self,
        _tenant_id: Uuid,
        interaction: NewAiInteraction,
    ) -> ApiResult<()> {
        self.state.lock().unwrap().interactions.push(interaction);
        Ok(())
    }

    async fn create_saved_search(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        req: CreateSavedSearchRequest,
    ) -> ApiResult<SavedSearch> {
        let saved = SavedSearch {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: user_id.to_string(),
            name: req.name,
            query: req.query,
            filters: req.filters,
            pinned: req.pinned,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .saved
            .insert((tenant_id, saved.id), saved.clone());
        Ok(saved)
    }

    async fn list_saved_searches(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> ApiResult<Vec<SavedSearch>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .saved
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_saved_search(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .saved
            .remove(&(tenant_id, id))
            .is_some())
    }

    async fn ping(&self) -> ApiResult<()> {
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════
// OLAP store
// ════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockOlapStore {
    pub entries: Mutex<Vec<LogEntry>>,
    pub fts_indexed: AtomicU64,
}

impl MockOlapStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scoped(&self, tenant_id: Uuid, job_id: Uuid) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OlapStore for MockOlapStore {
    async fn insert_entries(
        &self,
        _tenant_id: Uuid,
        _job_id: Uuid,
        entries: &[LogEntry],
    ) -> ApiResult<u64> {
        let mut stored = self.entries.lock().unwrap();
        for entry in entries {
            let mut entry = entry.clone();
            entry.entry_id.get_or_insert_with(Uuid::new_v4);
            entry.ingested_at.get_or_insert_with(Utc::now);
            stored.push(entry);
        }
        Ok(entries.len() as u64)
    }

    async fn index_full_text(
        &self,
        _tenant_id: Uuid,
        _job_id: Uuid,
        entries: &[LogEntry],
    ) -> ApiResult<()> {
        self.fts_indexed
            .fetch_add(entries.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn general_stats(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<GeneralStatistics> {
        let entries = self.scoped(tenant_id, job_id);
        let count = |t: LogType| entries.iter().filter(|e| e.log_type == t).count() as i64;
        Ok(GeneralStatistics {
            total_lines: entries.len() as i64,
            api_count: count(LogType::Api),
            sql_count: count(LogType::Sql),
            fltr_count: count(LogType::Fltr),
            escl_count: count(LogType::Escl),
            ..Default::default()
        })
    }

    async fn top_n(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        log_type: LogType,
        n: u64,
    ) -> ApiResult<Vec<TopNEntry>> {
        let mut entries: Vec<LogEntry> = self
            .scoped(tenant_id, job_id)
            .into_iter()
            .filter(|e| e.log_type == log_type)
            .collect();
        entries.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        Ok(entries
            .into_iter()
            .take(n as usize)
            .enumerate()
            .map(|(i, e)| TopNEntry {
                rank: i as u32 + 1,
                line_number: e.line_number,
                duration_ms: e.duration_ms as i64,
                user: e.user,
                ..Default::default()
            })
            .collect())
    }

    async fn distribution(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Vec<TypeCount>> {
        let entries = self.scoped(tenant_id, job_id);
        Ok(LogType::ALL
            .iter()
            .map(|t| TypeCount {
                log_type: t.as_str().to_string(),
                count: entries.iter().filter(|e| e.log_type == *t).count() as u64,
            })
            .filter(|c| c.count > 0)
            .collect())
    }

    async fn time_series(
        &self,
        _tenant_id: Uuid,
        _job_id: Uuid,
        _interval_secs: u32,
    ) -> ApiResult<Vec<TimeSeriesPoint>> {
        Ok(Vec::new())
    }

    async fn search(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        request: &SearchRequest,
    ) -> ApiResult<SearchResults> {
        let entries = self.scoped(tenant_id, job_id);
        let total = entries.len() as u64;
        let size = request.size.max(1);
        let start = ((request.page.max(1) - 1) * size) as usize;
        Ok(SearchResults {
            entries: entries
                .into_iter()
                .skip(start)
                .take(size as usize)
                .collect(),
            total,
            page: request.page.max(1),
            size,
        })
    }

    async fn distinct_values(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        field: &str,
        limit: u64,
    ) -> ApiResult<Vec<String>> {
        kql::field_spec(field).ok_or_else(|| ApiError::UnknownField(field.to_string()))?;
        let mut values: Vec<String> = Vec::new();
        for entry in self.scoped(tenant_id, job_id) {
            let value = match field {
                "user" => entry.user,
                "queue" => entry.queue,
                "log_type" => entry.log_type.as_str().to_string(),
                "form" => entry.form,
                _ => continue,
            };
            if !value.is_empty() && !values.contains(&value) {
                values.push(value);
            }
        }
        values.truncate(limit as usize);
        Ok(values)
    }

    async fn trace(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        trace_id: &str,
    ) -> ApiResult<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .scoped(tenant_id, job_id)
            .into_iter()
            .filter(|e| e.trace_id == trace_id || e.rpc_id == trace_id)
            .collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    async fn delayed_escalations(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        min_delay_ms: i64,
        limit: u64,
    ) -> ApiResult<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .scoped(tenant_id, job_id)
            .into_iter()
            .filter(|e| e.log_type == LogType::Escl && e.delay_ms > min_delay_ms)
            .collect();
        entries.sort_by(|a, b| b.delay_ms.cmp(&a.delay_ms));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn ping(&self) -> ApiResult<()> {
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════
// Cache
// ════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockCache {
    values: Mutex<HashMap<String, String>>,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &TenantKey) -> bool {
        self.values.lock().unwrap().contains_key(key.as_str())
    }
}

#[async_trait]
impl Cache for MockCache {
    async fn get(&self, key: &TenantKey) -> ApiResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key.as_str()).cloned())
    }

    async fn set(&self, key: &TenantKey, value: &str, _ttl: Duration) -> ApiResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &TenantKey) -> ApiResult<()> {
        self.values.lock().unwrap().remove(key.as_str());
        Ok(())
    }

    async fn rate_limit(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        resource: &str,
        limit: u64,
        window: Duration,
    ) -> ApiResult<RateDecision> {
        let key = format!("rate:{}:{}:{}", tenant_id, resource, user_id);
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap();
        let bucket = hits.entry(key).or_default();
        bucket.retain(|t| now.duration_since(*t) < window);
        if bucket.len() as u64 >= limit {
            return Ok(RateDecision { allowed: false, retry_after_secs: window.as_secs() });
        }
        bucket.push(now);
        Ok(RateDecision { allowed: true, retry_after_secs: 0 })
    }

    async fn ping(&self) -> ApiResult<()> {
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════
// Blob store
// ════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_object(&self, key: &str, bytes: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn upload(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        filename: &str,
        bytes: Bytes,
    ) -> ApiResult<BlobRef> {
        let key = format!("{}/{}/{}", tenant_id, job_id, filename);
        self.objects.lock().unwrap().insert(key.clone(), bytes);
        Ok(BlobRef { bucket: "mock".into(), key })
    }

    async fn download_to(&self, tenant_id: Uuid, key: &str, dest: &Path) -> ApiResult<u64> {
        if !key.starts_with(&format!("{}/", tenant_id)) {
            return Err(ApiError::unauthorized("blob key is not scoped to the tenant"));
        }
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("blob {}", key)))?;
        std::fs::write(dest, &bytes).map_err(|e| ApiError::internal(e.to_string()))?;
        Ok(bytes.len() as u64)
    }

    async fn delete(&self, _tenant_id: Uuid, key: &str) -> ApiResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn ping(&self) -> ApiResult<()> {
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════
// Message bus
// ════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockBus {
    pub submissions: Mutex<VecDeque<SubmitDelivery>>,
    pub acked: Mutex<Vec<Uuid>>,
    pub progress_events: Mutex<Vec<ProgressEvent>>,
    pub complete_events: Mutex<Vec<CompleteEvent>>,
    pub tailed: AtomicU64,
    subscribers: Mutex<Vec<(Uuid, tokio::sync::mpsc::UnboundedSender<ProgressEvent>)>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivery(tenant_id: Uuid, job_id: Uuid) -> SubmitDelivery {
        SubmitDelivery::new(tenant_id, job_id, submit_subject(tenant_id), "0-1".into())
    }
}

#[async_trait]
impl MessageBus for MockBus {
    async fn publish_submit(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<()> {
        self.submissions
            .lock()
            .unwrap()
            .push_back(Self::delivery(tenant_id, job_id));
        Ok(())
    }

    async fn next_submission(&self) -> ApiResult<Option<SubmitDelivery>> {
        Ok(self.submissions.lock().unwrap().pop_front())
    }

    async fn ack_submission(&self, delivery: &SubmitDelivery) -> ApiResult<()> {
        self.acked.lock().unwrap().push(delivery.job_id);
        Ok(())
    }

    async fn publish_progress(&self, tenant_id: Uuid, event: &ProgressEvent) -> ApiResult<()> {
        self.progress_events.lock().unwrap().push(event.clone());
        let subscribers = self.subscribers.lock().unwrap();
        for (subscriber_tenant, tx) in subscribers.iter() {
            if *subscriber_tenant == tenant_id {
                let _ = tx.send(event.clone());
            }
        }
        Ok(())
    }

    async fn publish_complete(&self, _tenant_id: Uuid, event: &CompleteEvent) -> ApiResult<()> {
        self.complete_events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn publish_tail(&self, _tenant_id: Uuid, _entry: &LogEntry) -> ApiResult<()> {
        self.tailed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe_progress(
        &self,
        tenant_id: Uuid,
    ) -> ApiResult<BoxStream<'static, ProgressEvent>> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push((tenant_id, tx));
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn ping(&self) -> ApiResult<()> {
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════
// Scripted analyzer
// ════════════════════════════════════════════════════════════════════════

pub enum FakeAnalyzerMode {
    Succeed,
    Fail { exit_code: i32, stderr: String },
}

pub struct FakeAnalyzer {
    pub stdout_lines: Vec<String>,
    pub mode: FakeAnalyzerMode,
}

impl FakeAnalyzer {
    pub fn succeeding(stdout_lines: Vec<String>) -> Arc<Self> {
        Arc::new(Self { stdout_lines, mode: FakeAnalyzerMode::Succeed })
    }

    pub fn failing(exit_code: i32, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            stdout_lines: Vec::new(),
            mode: FakeAnalyzerMode::Fail { exit_code, stderr: stderr.to_string() },
        })
    }
}

#[async_trait]
impl AnalyzerRunner for FakeAnalyzer {
    async fn run(
        &self,
        _input: &Path,
        _heap_mb: u32,
        timeout_secs: u64,
        _options: &AnalysisOptions,
        _cancel: &CancellationToken,
        on_stdout: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<JarOutput, JarError> {
        let mut stdout = String::new();
        for line in &self.stdout_lines {
            on_stdout(line);
            stdout.push_str(line);
            stdout.push('\n');
        }
        let _ = timeout_secs;
        let output = JarOutput { stdout, stderr: String::new() };
        match &self.mode {
            FakeAnalyzerMode::Succeed => Ok(output),
            FakeAnalyzerMode::Fail { exit_code, stderr } => Err(JarError::Failed {
                output: JarOutput { stdout: output.stdout, stderr: stderr.clone() },
                exit_code: *exit_code,
            }),
        }
    }
}

/// A parseable API line for synthetic log files.
pub fn sample_api_line() -> &'static str {
    "<API > <TrID: tr-test-1> <TID: 0000000001> <RPC ID: 0000000002> <Queue: Fast> <Client-RPC: 390620> <USER: Demo    > <Overlay-Group: 1> /* Mon Nov 24 2025 14:46:58.5050 */ +GE       ARGetEntry -- schema HPD:Help Desk"
}

/// A minimal but realistic analyzer report.
pub fn sample_report() -> String {
    [
        "General Statistics:",
        "  Total lines: 9",
        "  API calls: 7",
        "  SQL statements: 0",
        "  Filter operations: 0",
        "  Escalations: 0",
        "  Unique users: 1",
        "  Health score: 91.5",
        "",
        "Top API Calls:",
        "  Rank | Line | File | Timestamp | TrID | RPC | Queue | Identifier | Form | User | Duration | QueueTime | Success | Details",
        "  1 | 1 | 1 | Mon Nov 24 2025 14:46:58.5050 | tr-test-1 | 2 | Fast | GE | HPD:Help Desk | Demo | 1532 | 12 | true | slowest",
    ]
    .join("\n")
}
