use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// The four AR Server record types recognized by the line parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    Api,
    Sql,
    Fltr,
    Escl,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "API",
            Self::Sql => "SQL",
            Self::Fltr => "FLTR",
            Self::Escl => "ESCL",
        }
    }

    /// Normalize a raw type token. Tokens carry trailing padding in the
    /// source format (`API ` vs `FLTR`), so the input is trimmed first.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "API" => Some(Self::Api),
            "SQL" => Some(Self::Sql),
            "FLTR" => Some(Self::Fltr),
            "ESCL" => Some(Self::Escl),
            _ => None,
        }
    }

    pub const ALL: [LogType; 4] = [Self::Api, Self::Sql, Self::Fltr, Self::Escl];
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed log record as it lives in the OLAP store.
///
/// Identity is `(tenant_id, job_id, entry_id)`; `entry_id` is generated at
/// insert time, not by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LogEntry {
    pub tenant_id: Uuid,
    pub job_id: Uuid,
    #[serde(default)]
    pub entry_id: Option<Uuid>,

    /// 1-based line number within the source file.
    pub line_number: u64,
    /// 1-based file ordinal when multiple files were combined.
    pub file_number: u32,

    /// Always UTC, millisecond precision, regardless of source locale.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ingested_at: Option<DateTime<Utc>>,

    pub log_type: LogType,

    pub trace_id: String,
    pub rpc_id: String,
    pub thread_id: String,

    pub queue: String,
    /// Trimmed, with any `" (Pool N)"` suffix removed.
    pub user: String,

    pub duration_ms: u64,
    pub queue_time_ms: u64,
    pub success: bool,

    // API
    pub api_code: String,
    pub form: String,

    // SQL
    pub sql_table: String,
    pub sql_statement: String,

    // FLTR
    pub filter_name: String,
    pub filter_level: u32,
    pub operation: String,
    pub request_id: String,

    // ESCL
    pub esc_name: String,
    pub esc_pool: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub delay_ms: i64,
    pub error_encountered: bool,

    pub raw_text: String,
    pub error_message: String,
}

impl LogEntry {
    /// A zeroed entry with only identity and classification populated.
    /// The type-specific payload extractors fill in the rest.
    pub fn blank(
        tenant_id: Uuid,
        job_id: Uuid,
        line_number: u64,
        timestamp: DateTime<Utc>,
        log_type: LogType,
    ) -> Self {
        Self {
            tenant_id,
            job_id,
            entry_id: None,
            line_number,
            file_number: 1,
            timestamp,
            ingested_at: None,
            log_type,
            trace_id: String::new(),
            rpc_id: String::new(),
            thread_id: String::new(),
            queue: String::new(),
            user: String::new(),
            duration_ms: 0,
            queue_time_ms: 0,
            success: true,
            api_code: String::new(),
            form: String::new(),
            sql_table: String::new(),
            sql_statement: String::new(),
            filter_name: String::new(),
            filter_level: 0,
            operation: String::new(),
            request_id: String::new(),
            esc_name: String::new(),
            esc_pool: String::new(),
            scheduled_time: None,
            delay_ms: 0,
            error_encountered: false,
            raw_text: String::new(),
            error_message: String::new(),
        }
    }
}
