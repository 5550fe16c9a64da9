//! Metadata store: tenants, log files, jobs, conversations, saved searches.
//!
//! The Postgres adapter binds every statement to a tenant twice: an explicit
//! `tenant_id` predicate in the SQL, and the `app.current_tenant` session
//! setting that the row-level policies evaluate. The setting is applied with
//! `set_config(..., true)` inside a transaction so it can never leak across
//! pooled connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    AnalysisJob, AnalysisOptions, Conversation, CreateSavedSearchRequest, CreateTenantRequest,
    JobProgress, JobStatus, LogFile, Message, NewMessage, SavedSearch, Tenant,
};
use crate::utils::{ApiError, ApiResult};

/// Audit record written for every completed AI turn.
#[derive(Debug, Clone)]
pub struct NewAiInteraction {
    pub user_id: String,
    pub job_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub skill_name: String,
    pub query: String,
    pub tokens_used: i32,
    pub latency_ms: i64,
    pub success: bool,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_tenant(&self, req: CreateTenantRequest) -> ApiResult<Tenant>;
    async fn get_tenant(&self, tenant_id: Uuid) -> ApiResult<Option<Tenant>>;

    async fn insert_log_file(&self, tenant_id: Uuid, file: &LogFile) -> ApiResult<()>;
    async fn get_log_file(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Option<LogFile>>;

    async fn create_job(
        &self,
        tenant_id: Uuid,
        log_file_id: Uuid,
        options: AnalysisOptions,
    ) -> ApiResult<AnalysisJob>;
    async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Option<AnalysisJob>>;
    async fn list_jobs(&self, tenant_id: Uuid, limit: i64, offset: i64)
        -> ApiResult<Vec<AnalysisJob>>;

    /// Advance the job state machine. Rejects transitions the forward-only
    /// rule does not admit.
    async fn transition_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        next: JobStatus,
    ) -> ApiResult<AnalysisJob>;

    /// Progress updates are monotone: percentages never decrease and
    /// `total_lines` never shrinks once set.
    async fn update_progress(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        progress: &JobProgress,
    ) -> ApiResult<()>;

    async fn complete_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        log_start: Option<DateTime<Utc>>,
        log_end: Option<DateTime<Utc>>,
        log_duration: Option<String>,
    ) -> ApiResult<AnalysisJob>;

    async fn fail_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        error_message: &str,
        stderr_output: Option<&str>,
    ) -> ApiResult<()>;

    async fn mark_processing_started(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<()>;
    async fn request_cancel(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<bool>;
    async fn is_cancel_requested(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<bool>;

    async fn create_conversation(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Uuid,
        title: Option<String>,
    ) -> ApiResult<Conversation>;
    async fn get_conversation(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Option<Conversation>>;
    async fn list_conversations(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Option<Uuid>,
    ) -> ApiResult<Vec<Conversation>>;
    async fn delete_conversation(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<bool>;
    async fn add_message(&self, tenant_id: Uuid, message: NewMessage) -> ApiResult<Message>;
    async fn get_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<Message>>;

    async fn record_interaction(
        &self,
        tenant_id: Uuid,
        interaction: NewAiInteraction,
    ) -> ApiResult<()>;

    async fn create_saved_search(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        req: CreateSavedSearchRequest,
    ) -> ApiResult<SavedSearch>;
    async fn list_saved_searches(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> ApiResult<Vec<SavedSearch>>;
    async fn delete_saved_search(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<bool>;

    async fn ping(&self) -> ApiResult<()>;
}

pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a transaction with `app.current_tenant` set for the row-level
    /// policies. `is_local = true` scopes the setting to this transaction.
    async fn tenant_tx(&self, tenant_id: Uuid) -> ApiResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn create_tenant(&self, req: CreateTenantRequest) -> ApiResult<Tenant> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"INSERT INTO tenants (external_org_id, name, plan, storage_quota_gb)
               VALUES ($1, $2, COALESCE($3, 'standard'), COALESCE($4, 50))
               RETURNING *"#,
        )
        .bind(&req.external_org_id)
        .bind(&req.name)
        .bind(&req.plan)
        .bind(req.storage_quota_gb)
        .fetch_one(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> ApiResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn insert_log_file(&self, tenant_id: Uuid, file: &LogFile) -> ApiResult<()> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        sqlx::query(
            r#"INSERT INTO log_files
               (id, tenant_id, filename, size_bytes, bucket, object_key, content_type, sha256, log_types, uploaded_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(file.id)
        .bind(tenant_id)
        .bind(&file.filename)
        .bind(file.size_bytes)
        .bind(&file.bucket)
        .bind(&file.object_key)
        .bind(&file.content_type)
        .bind(&file.sha256)
        .bind(serde_json::to_value(&file.log_types)?)
        .bind(file.uploaded_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_log_file(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Option<LogFile>> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let file = sqlx::query_as::<_, LogFile>(
            "SELECT * FROM log_files WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(file)
    }

    async fn create_job(
        &self,
        tenant_id: Uuid,
        log_file_id: Uuid,
        options: AnalysisOptions,
    ) -> ApiResult<AnalysisJob> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let job = sqlx::query_as::<_, AnalysisJob>(
            r#"INSERT INTO analysis_jobs (tenant_id, log_file_id, options)
               VALUES ($1, $2, $3)
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(log_file_id)
        .bind(serde_json::to_value(&options)?)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Option<AnalysisJob>> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let job = sqlx::query_as::<_, AnalysisJob>(
            "SELECT * FROM analysis_jobs WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn list_jobs(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<AnalysisJob>> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let jobs = sqlx::query_as::<_, AnalysisJob>(
            r#"SELECT * FROM analysis_jobs
               WHERE tenant_id = $1
               ORDER BY created_at DESC
               LIMIT $2 OFFSET $3"#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(jobs)
    }

    async fn transition_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        next: JobStatus,
    ) -> ApiResult<AnalysisJob> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let current = sqlx::query_as::<_, AnalysisJob>(
            "SELECT * FROM analysis_jobs WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;

        if !current.status.can_advance_to(next) {
            return Err(ApiError::validation(format!(
                "illegal job transition {} -> {}",
                current.status, next
            )));
        }

        let job = sqlx::query_as::<_, AnalysisJob>(
            r#"UPDATE analysis_jobs
               SET status = $3,
                   updated_at = now(),
                   completed_at = CASE WHEN $3 IN ('complete', 'failed') THEN now() ELSE completed_at END
               WHERE tenant_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(next)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn update_progress(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        progress: &JobProgress,
    ) -> ApiResult<()> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        sqlx::query(
            r#"UPDATE analysis_jobs
               SET progress_pct = GREATEST(progress_pct, LEAST($3::smallint, 100)),
                   total_lines = GREATEST(COALESCE(total_lines, 0), COALESCE($4, total_lines, 0)),
                   processed_lines = COALESCE($5, processed_lines),
                   api_lines = COALESCE($6, api_lines),
                   sql_lines = COALESCE($7, sql_lines),
                   fltr_lines = COALESCE($8, fltr_lines),
                   escl_lines = COALESCE($9, escl_lines),
                   updated_at = now()
               WHERE tenant_id = $1 AND id = $2"#,
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(progress.progress_pct)
        .bind(progress.total_lines)
        .bind(progress.processed_lines)
        .bind(progress.api_lines)
        .bind(progress.sql_lines)
        .bind(progress.fltr_lines)
        .bind(progress.escl_lines)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
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
        let mut tx = self.tenant_tx(tenant_id).await?;
        let job = sqlx::query_as::<_, AnalysisJob>(
            r#"UPDATE analysis_jobs
               SET status = 'complete',
                   progress_pct = 100,
                   processing_ended_at = now(),
                   log_start = $3,
                   log_end = $4,
                   log_duration = $5,
                   completed_at = now(),
                   updated_at = now()
               WHERE tenant_id = $1 AND id = $2 AND status = 'storing'
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(log_start)
        .bind(log_end)
        .bind(log_duration)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::validation("job is not in storing state"))?;
        tx.commit().await?;
        Ok(job)
    }

    async fn fail_job(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        error_message: &str,
        stderr_output: Option<&str>,
    ) -> ApiResult<()> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        sqlx::query(
            r#"UPDATE analysis_jobs
               SET status = 'failed',
                   error_message = $3,
                   stderr_output = COALESCE($4, stderr_output),
                   processing_ended_at = COALESCE(processing_ended_at, now()),
                   completed_at = now(),
                   updated_at = now()
               WHERE tenant_id = $1 AND id = $2 AND status NOT IN ('complete', 'failed')"#,
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(error_message)
        .bind(stderr_output)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_processing_started(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<()> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        sqlx::query(
            r#"UPDATE analysis_jobs
               SET processing_started_at = COALESCE(processing_started_at, now()), updated_at = now()
               WHERE tenant_id = $1 AND id = $2"#,
        )
        .bind(tenant_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn request_cancel(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<bool> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let result = sqlx::query(
            r#"UPDATE analysis_jobs SET cancel_requested = TRUE, updated_at = now()
               WHERE tenant_id = $1 AND id = $2 AND status NOT IN ('complete', 'failed')"#,
        )
        .bind(tenant_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_cancel_requested(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<bool> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let cancel: Option<bool> = sqlx::query_scalar(
            "SELECT cancel_requested FROM analysis_jobs WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(cancel.unwrap_or(false))
    }

    async fn create_conversation(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Uuid,
        title: Option<String>,
    ) -> ApiResult<Conversation> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"INSERT INTO conversations (tenant_id, user_id, job_id, title)
               VALUES ($1, $2, $3, $4)
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(job_id)
        .bind(title)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Option<Conversation>> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(conversation)
    }

    async fn list_conversations(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Option<Uuid>,
    ) -> ApiResult<Vec<Conversation>> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"SELECT * FROM conversations
               WHERE tenant_id = $1 AND user_id = $2 AND ($3::uuid IS NULL OR job_id = $3)
               ORDER BY updated_at DESC"#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(conversations)
    }

    async fn delete_conversation(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<bool> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let result = sqlx::query("DELETE FROM conversations WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_message(&self, tenant_id: Uuid, message: NewMessage) -> ApiResult<Message> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let follow_ups = message
            .follow_ups
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let stored = sqlx::query_as::<_, Message>(
            r#"INSERT INTO messages
               (conversation_id, tenant_id, role, content, skill_name, follow_ups,
                tokens_used, latency_ms, status, error_message)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING *"#,
        )
        .bind(message.conversation_id)
        .bind(tenant_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(&message.skill_name)
        .bind(follow_ups)
        .bind(message.tokens_used)
        .bind(message.latency_ms)
        .bind(message.status)
        .bind(&message.error_message)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<Message>> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let messages = sqlx::query_as::<_, Message>(
            r#"SELECT * FROM messages
               WHERE tenant_id = $1 AND conversation_id = $2
               ORDER BY created_at ASC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(messages)
    }

    async fn record_interaction(
        &self,
        tenant_id: Uuid,
        interaction: NewAiInteraction,
    ) -> ApiResult<()> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        sqlx::query(
            r#"INSERT INTO ai_interactions
               (tenant_id, user_id, job_id, conversation_id, skill_name, query,
                tokens_used, latency_ms, success)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(tenant_id)
        .bind(&interaction.user_id)
        .bind(interaction.job_id)
        .bind(interaction.conversation_id)
        .bind(&interaction.skill_name)
        .bind(&interaction.query)
        .bind(interaction.tokens_used)
        .bind(interaction.latency_ms)
        .bind(interaction.success)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_saved_search(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        req: CreateSavedSearchRequest,
    ) -> ApiResult<SavedSearch> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let saved = sqlx::query_as::<_, SavedSearch>(
            r#"INSERT INTO saved_searches (tenant_id, user_id, name, query, filters, pinned)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(&req.name)
        .bind(&req.query)
        .bind(&req.filters)
        .bind(req.pinned)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn list_saved_searches(
        &self,
        tenant_id: Uuid,
        user_id: &str,
    ) -> ApiResult<Vec<SavedSearch>> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let searches = sqlx::query_as::<_, SavedSearch>(
            r#"SELECT * FROM saved_searches
               WHERE tenant_id = $1 AND user_id = $2
               ORDER BY pinned DESC, updated_at DESC"#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(searches)
    }

    async fn delete_saved_search(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<bool> {
        let mut tx = self.tenant_tx(tenant_id).await?;
        let result = sqlx::query("DELETE FROM saved_searches WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> ApiResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
