use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Analysis job state machine.
///
/// Forward-only: `queued → parsing → analyzing → storing → complete`, with
/// `failed` reachable from any non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Parsing,
    Analyzing,
    Storing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Parsing => "parsing",
            Self::Analyzing => "analyzing",
            Self::Storing => "storing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Parsing => 1,
            Self::Analyzing => 2,
            Self::Storing => 3,
            Self::Complete => 4,
            Self::Failed => 5,
        }
    }

    /// Whether the state machine admits `self → next`.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analyzer invocation flag bundle, stored on the job as JSONB and rendered
/// into the JAR argv by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Top-N list size.
    #[validate(range(min = 1, max = 1000))]
    pub top_n: u32,
    /// Group-by dimensions (form, client, client-ip, sql-table, esc-form, esc-pool).
    pub group_by: Vec<String>,
    pub sort_by: Option<String>,
    pub include_users: Vec<String>,
    pub exclude_users: Vec<String>,
    pub begin_time: Option<String>,
    pub end_time: Option<String>,
    pub locale: Option<String>,
    pub date_format: Option<String>,
    pub skip_api: bool,
    pub skip_sql: bool,
    pub skip_fltr: bool,
    pub skip_escl: bool,
    /// Index parsed entries into the full-text index during storage.
    pub enable_fts: bool,
    /// Overrides the size-based heap heuristic when set.
    pub jvm_heap_mb: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            top_n: 20,
            group_by: Vec::new(),
            sort_by: None,
            include_users: Vec::new(),
            exclude_users: Vec::new(),
            begin_time: None,
            end_time: None,
            locale: None,
            date_format: None,
            skip_api: false,
            skip_sql: false,
            skip_fltr: false,
            skip_escl: false,
            enable_fts: true,
            jvm_heap_mb: None,
            timeout_seconds: None,
        }
    }
}

/// The unit of ingestion work. One job references one uploaded log file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub log_file_id: Uuid,
    pub status: JobStatus,

    #[sqlx(json)]
    pub options: AnalysisOptions,

    pub progress_pct: i16,
    pub total_lines: Option<i64>,
    pub processed_lines: i64,
    pub api_lines: i64,
    pub sql_lines: i64,
    pub fltr_lines: i64,
    pub escl_lines: i64,

    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
    /// First and last log timestamps observed during storage.
    pub log_start: Option<DateTime<Utc>>,
    pub log_end: Option<DateTime<Utc>>,
    pub log_duration: Option<String>,

    pub error_message: Option<String>,
    pub stderr_output: Option<String>,

    /// Cooperative cancellation flag, polled by the pipeline between stages.
    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateAnalysisRequest {
    pub log_file_id: Uuid,
    #[validate(nested)]
    pub options: Option<AnalysisOptions>,
}

/// Incremental progress applied by the pipeline. Percentages are clamped to
/// monotone non-decreasing by the store; `total_lines` is non-decreasing once
/// set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub progress_pct: i16,
    pub total_lines: Option<i64>,
    pub processed_lines: Option<i64>,
    pub api_lines: Option<i64>,
    pub sql_lines: Option<i64>,
    pub fltr_lines: Option<i64>,
    pub escl_lines: Option<i64>,
}
