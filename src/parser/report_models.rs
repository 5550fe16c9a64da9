//! Typed structures produced by the analyzer report parser.
//!
//! Everything here round-trips through serde so the ingestion pipeline can
//! cache a [`ParseResult`] and the dashboard services can serve sections from
//! it without re-running the analyzer. Fidelity note: fields mirror the
//! analyzer's tabular output; display-oriented values (timestamps, durations)
//! stay as the strings the analyzer printed.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::LogType;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeneralStatistics {
    pub total_lines: i64,
    pub api_count: i64,
    pub sql_count: i64,
    pub fltr_count: i64,
    pub escl_count: i64,
    pub unique_users: i64,
    pub unique_forms: i64,
    pub unique_tables: i64,
    pub log_start: String,
    pub log_end: String,
    pub duration: String,
    pub health_score: Option<f64>,
}

/// One row of a per-type top-N table (also used for queued API calls).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TopNEntry {
    pub rank: u32,
    pub line_number: u64,
    pub file_number: u32,
    pub timestamp: String,
    pub trace_id: String,
    pub rpc_id: String,
    pub queue: String,
    /// API code, SQL table, filter or escalation name depending on the table.
    pub identifier: String,
    pub form: String,
    pub user: String,
    pub duration_ms: i64,
    pub queue_time_ms: i64,
    pub success: bool,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TimeSeriesPoint {
    pub bucket: String,
    pub api_count: i64,
    pub sql_count: i64,
    pub fltr_count: i64,
    pub escl_count: i64,
    pub avg_duration_ms: f64,
    pub error_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregateRow {
    pub group_value: String,
    pub ok: i64,
    pub fail: i64,
    pub total: i64,
    pub min_ms: i64,
    pub max_ms: i64,
    pub avg_ms: f64,
    pub sum_ms: i64,
}

/// Aggregates for one group-by dimension (form, client, client-ip, sql-table,
/// esc-form, esc-pool).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GroupByTable {
    pub dimension: String,
    pub rows: Vec<AggregateRow>,
    pub subtotal: Option<AggregateRow>,
    pub grand_total: Option<AggregateRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GapEntry {
    pub gap_ms: i64,
    pub line_number: u64,
    pub trace_id: String,
    pub timestamp: String,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GapAnalysis {
    pub line_gaps: Vec<GapEntry>,
    pub thread_gaps: Vec<GapEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ThreadStat {
    pub queue: String,
    pub thread_id: String,
    pub first_time: String,
    pub last_time: String,
    pub count: i64,
    pub queue_count: i64,
    pub queue_time_ms: i64,
    pub total_time_ms: i64,
    /// 0..100.
    pub busy_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorEntry {
    pub end_line: u64,
    pub trace_id: String,
    pub queue: String,
    pub api_code: String,
    pub form: String,
    pub user: String,
    pub start_time: String,
    pub error_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExceptionEntry {
    pub line_number: u64,
    pub trace_id: String,
    pub exception_type: String,
    pub message: String,
    /// Offending SQL statement; empty for API exceptions.
    pub statement: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Exceptions {
    pub api_errors: Vec<ApiErrorEntry>,
    pub api_exceptions: Vec<ExceptionEntry>,
    pub sql_exceptions: Vec<ExceptionEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterTiming {
    pub filter_name: String,
    pub form: String,
    pub duration_ms: i64,
    pub line_number: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterExecution {
    pub filter_name: String,
    pub executions: i64,
    pub total_time_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionFilterCount {
    pub trace_id: String,
    pub filter_count: i64,
    pub duration_ms: i64,
    /// The analyzer emits NaN here for zero-duration transactions; normalized
    /// to 0.0 on parse.
    pub filters_per_sec: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionTopFilter {
    pub trace_id: String,
    pub filter_name: String,
    pub executions: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterLevelRow {
    pub level: u32,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterComplexity {
    pub longest_running: Vec<FilterTiming>,
    pub most_executed: Vec<FilterExecution>,
    pub per_transaction_counts: Vec<TransactionFilterCount>,
    pub per_transaction_top: Vec<TransactionTopFilter>,
    pub level_depth: Vec<FilterLevelRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AbbreviationEntry {
    pub abbrev: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FileMetadataEntry {
    pub file_number: u32,
    pub name: String,
    pub start: String,
    pub end: String,
    pub duration: String,
    pub entry_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LoggingActivityEntry {
    pub log_type: String,
    pub first: String,
    pub last: String,
    pub duration: String,
    pub entry_count: i64,
}

/// Everything extracted from one analyzer run. Each section is independent;
/// a section the analyzer did not emit stays at its default and is never
/// synthesized downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ParseResult {
    pub general: GeneralStatistics,
    pub top_api: Vec<TopNEntry>,
    pub top_sql: Vec<TopNEntry>,
    pub top_fltr: Vec<TopNEntry>,
    pub top_escl: Vec<TopNEntry>,
    pub time_series: Vec<TimeSeriesPoint>,
    pub group_by: Vec<GroupByTable>,
    pub gaps: GapAnalysis,
    pub thread_stats: Vec<ThreadStat>,
    pub exceptions: Exceptions,
    pub filter_complexity: FilterComplexity,
    pub api_legend: Vec<AbbreviationEntry>,
    pub file_metadata: Vec<FileMetadataEntry>,
    pub logging_activity: Vec<LoggingActivityEntry>,
    pub queued_calls: Vec<TopNEntry>,
}

impl ParseResult {
    pub fn top_n_for(&self, log_type: LogType) -> &[TopNEntry] {
        match log_type {
            LogType::Api => &self.top_api,
            LogType::Sql => &self.top_sql,
            LogType::Fltr => &self.top_fltr,
            LogType::Escl => &self.top_escl,
        }
    }
}
