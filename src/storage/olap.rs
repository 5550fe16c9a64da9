//! OLAP store: ClickHouse adapter for `log_entries`.
//!
//! Every query carries explicit tenant and job predicates even though the
//! partitioning key already isolates tenants. Schema management follows the
//! idempotent-DDL-on-startup pattern: every statement is `IF NOT EXISTS`, so
//! running the list on every boot is safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kql::{field_spec, QueryPlan, SqlValue};
use crate::models::{LogEntry, LogType};
use crate::parser::report_models::{GeneralStatistics, TimeSeriesPoint, TopNEntry};
use crate::utils::{ApiError, ApiResult};

/// Ordered idempotent DDL, applied on startup.
const MIGRATIONS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS log_entries
(
    tenant_id         UUID,
    job_id            UUID,
    entry_id          UUID,
    line_number       UInt64,
    file_number       UInt32,
    timestamp         DateTime64(3, 'UTC') CODEC(Delta, ZSTD(1)),
    ingested_at       DateTime64(3, 'UTC'),
    log_type          LowCardinality(String),
    trace_id          String,
    rpc_id            String,
    thread_id         String,
    queue             LowCardinality(String),
    user              LowCardinality(String),
    duration_ms       UInt64,
    queue_time_ms     UInt64,
    success           Bool,
    api_code          LowCardinality(String),
    form              String,
    sql_table         LowCardinality(String),
    sql_statement     String CODEC(ZSTD(1)),
    filter_name       String,
    filter_level      UInt32,
    operation         LowCardinality(String),
    request_id        String,
    esc_name          String,
    esc_pool          LowCardinality(String),
    scheduled_time    Nullable(DateTime64(3, 'UTC')),
    delay_ms          Int64,
    error_encountered Bool,
    raw_text          String CODEC(ZSTD(1)),
    error_message     String,
    INDEX idx_trace trace_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_rpc rpc_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_duration duration_ms TYPE minmax GRANULARITY 1
)
ENGINE = MergeTree
PARTITION BY (tenant_id, toYYYYMM(timestamp))
ORDER BY (tenant_id, job_id, log_type, timestamp, line_number)
TTL toDateTime(timestamp) + INTERVAL 90 DAY
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",
    // Secondary full-text index over the large text columns.
    r"CREATE TABLE IF NOT EXISTS log_entries_fts
(
    tenant_id   UUID,
    job_id      UUID,
    entry_id    UUID,
    line_number UInt64,
    ingested_at DateTime64(3, 'UTC'),
    content     String CODEC(ZSTD(1)),
    INDEX idx_tokens content TYPE tokenbf_v1(32768, 3, 0) GRANULARITY 4
)
ENGINE = MergeTree
PARTITION BY tenant_id
ORDER BY (tenant_id, job_id, line_number)
TTL toDateTime(ingested_at) + INTERVAL 90 DAY
SETTINGS ttl_only_drop_parts = 1",
    // Per-minute aggregates backing the dashboard time-series queries.
    r"CREATE MATERIALIZED VIEW IF NOT EXISTS log_entries_minute_mv
ENGINE = SummingMergeTree
PARTITION BY (tenant_id, toYYYYMM(minute))
ORDER BY (tenant_id, job_id, log_type, minute)
AS SELECT
    tenant_id,
    job_id,
    log_type,
    toStartOfMinute(timestamp)  AS minute,
    count()                     AS entries,
    sum(duration_ms)            AS total_duration_ms,
    countIf(NOT success)        AS errors
FROM log_entries
GROUP BY tenant_id, job_id, log_type, minute",
];

const ENTRY_COLUMNS: &str = "tenant_id, job_id, entry_id, line_number, file_number, timestamp, \
     ingested_at, log_type, trace_id, rpc_id, thread_id, queue, user, duration_ms, queue_time_ms, \
     success, api_code, form, sql_table, sql_statement, filter_name, filter_level, operation, \
     request_id, esc_name, esc_pool, scheduled_time, delay_ms, error_encountered, raw_text, \
     error_message";

/// Wire row for `log_entries`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct EntryRow {
    #[serde(with = "clickhouse::serde::uuid")]
    pub tenant_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub job_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub entry_id: Uuid,
    pub line_number: u64,
    pub file_number: u32,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub ingested_at: DateTime<Utc>,
    pub log_type: String,
    pub trace_id: String,
    pub rpc_id: String,
    pub thread_id: String,
    pub queue: String,
    pub user: String,
    pub duration_ms: u64,
    pub queue_time_ms: u64,
    pub success: bool,
    pub api_code: String,
    pub form: String,
    pub sql_table: String,
    pub sql_statement: String,
    pub filter_name: String,
    pub filter_level: u32,
    pub operation: String,
    pub request_id: String,
    pub esc_name: String,
    pub esc_pool: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis::option")]
    pub scheduled_time: Option<DateTime<Utc>>,
    pub delay_ms: i64,
    pub error_encountered: bool,
    pub raw_text: String,
    pub error_message: String,
}

impl EntryRow {
    fn from_entry(entry: &LogEntry, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: entry.tenant_id,
            job_id: entry.job_id,
            entry_id: entry.entry_id.unwrap_or_else(Uuid::new_v4),
            line_number: entry.line_number,
            file_number: entry.file_number,
            timestamp: entry.timestamp,
            ingested_at: entry.ingested_at.unwrap_or(now),
            log_type: entry.log_type.as_str().to_string(),
            trace_id: entry.trace_id.clone(),
            rpc_id: entry.rpc_id.clone(),
            thread_id: entry.thread_id.clone(),
            queue: entry.queue.clone(),
            user: entry.user.clone(),
            duration_ms: entry.duration_ms,
            queue_time_ms: entry.queue_time_ms,
            success: entry.success,
            api_code: entry.api_code.clone(),
            form: entry.form.clone(),
            sql_table: entry.sql_table.clone(),
            sql_statement: entry.sql_statement.clone(),
            filter_name: entry.filter_name.clone(),
            filter_level: entry.filter_level,
            operation: entry.operation.clone(),
            request_id: entry.request_id.clone(),
            esc_name: entry.esc_name.clone(),
            esc_pool: entry.esc_pool.clone(),
            scheduled_time: entry.scheduled_time,
            delay_ms: entry.delay_ms,
            error_encountered: entry.error_encountered,
            raw_text: entry.raw_text.clone(),
            error_message: entry.error_message.clone(),
        }
    }
}

impl From<EntryRow> for LogEntry {
    fn from(row: EntryRow) -> Self {
        LogEntry {
            tenant_id: row.tenant_id,
            job_id: row.job_id,
            entry_id: Some(row.entry_id),
            line_number: row.line_number,
            file_number: row.file_number,
            timestamp: row.timestamp,
            ingested_at: Some(row.ingested_at),
            log_type: LogType::parse(&row.log_type).unwrap_or(LogType::Api),
            trace_id: row.trace_id,
            rpc_id: row.rpc_id,
            thread_id: row.thread_id,
            queue: row.queue,
            user: row.user,
            duration_ms: row.duration_ms,
            queue_time_ms: row.queue_time_ms,
            success: row.success,
            api_code: row.api_code,
            form: row.form,
            sql_table: row.sql_table,
            sql_statement: row.sql_statement,
            filter_name: row.filter_name,
            filter_level: row.filter_level,
            operation: row.operation,
            request_id: row.request_id,
            esc_name: row.esc_name,
            esc_pool: row.esc_pool,
            scheduled_time: row.scheduled_time,
            delay_ms: row.delay_ms,
            error_encountered: row.error_encountered,
            raw_text: row.raw_text,
            error_message: row.error_message,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct FtsRow {
    #[serde(with = "clickhouse::serde::uuid")]
    tenant_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    job_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    entry_id: Uuid,
    line_number: u64,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    ingested_at: DateTime<Utc>,
    content: String,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub plan: QueryPlan,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
    pub sort_by: String,
    pub descending: bool,
    /// 1-based.
    pub page: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SearchResults {
    pub entries: Vec<LogEntry>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct TypeCount {
    pub log_type: String,
    pub count: u64,
}

#[async_trait]
pub trait OlapStore: Send + Sync {
    /// Batch insert. Assigns `entry_id` and `ingested_at`; returns rows
    /// written. Safe to re-issue on retry: duplicates merge at query time on
    /// the ordering key.
    async fn insert_entries(&self, tenant_id: Uuid, job_id: Uuid, entries: &[LogEntry])
        -> ApiResult<u64>;

    /// Index a batch into the secondary full-text table.
    async fn index_full_text(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        entries: &[LogEntry],
    ) -> ApiResult<()>;

    async fn general_stats(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<GeneralStatistics>;
    async fn top_n(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        log_type: LogType,
        n: u64,
    ) -> ApiResult<Vec<TopNEntry>>;
    async fn distribution(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Vec<TypeCount>>;
    async fn time_series(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        interval_secs: u32,
    ) -> ApiResult<Vec<TimeSeriesPoint>>;

    async fn search(&self, tenant_id: Uuid, job_id: Uuid, request: &SearchRequest)
        -> ApiResult<SearchResults>;
    async fn distinct_values(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        field: &str,
        limit: u64,
    ) -> ApiResult<Vec<String>>;

    /// All entries correlated by trace or RPC id, ordered by timestamp.
    async fn trace(&self, tenant_id: Uuid, job_id: Uuid, trace_id: &str)
        -> ApiResult<Vec<LogEntry>>;

    async fn delayed_escalations(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        min_delay_ms: i64,
        limit: u64,
    ) -> ApiResult<Vec<LogEntry>>;

    async fn ping(&self) -> ApiResult<()>;
}

pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn ensure_schema(&self) -> ApiResult<()> {
        for ddl in MIGRATIONS {
            self.client.query(ddl).execute().await?;
        }
        Ok(())
    }

    fn bind_values(
        mut query: clickhouse::query::Query,
        values: &[SqlValue],
    ) -> clickhouse::query::Query {
        for value in values {
            query = match value {
                SqlValue::Str(s) => query.bind(s.as_str()),
                SqlValue::Num(n) => query.bind(*n),
            };
        }
        query
    }

    /// Shared WHERE fragment for search: tenant/job scope, the lowered KQL
    /// filter, the time window, and the full-text semi-join when present.
    fn search_where(request: &SearchRequest) -> String {
        let mut sql = format!(
            "tenant_id = ? AND job_id = ? AND {}",
            request.plan.filter_sql
        );
        if request.time_from.is_some() {
            sql.push_str(" AND timestamp >= fromUnixTimestamp64Milli(?)");
        }
        if request.time_to.is_some() {
            sql.push_str(" AND timestamp <= fromUnixTimestamp64Milli(?)");
        }
        if request.plan.full_text.is_some() {
            sql.push_str(
                " AND line_number IN (SELECT line_number FROM log_entries_fts \
                 WHERE tenant_id = ? AND job_id = ? AND hasTokenCaseInsensitive(content, ?))",
            );
        }
        sql
    }

    fn bind_search(
        &self,
        sql: String,
        tenant_id: Uuid,
        job_id: Uuid,
        request: &SearchRequest,
    ) -> clickhouse::query::Query {
        let mut query = self.client.query(&sql).bind(tenant_id).bind(job_id);
        query = Self::bind_values(query, &request.plan.params);
        if let Some(from) = request.time_from {
            query = query.bind(from.timestamp_millis());
        }
        if let Some(to) = request.time_to {
            query = query.bind(to.timestamp_millis());
        }
        if let Some(fts) = &request.plan.full_text {
            query = query.bind(tenant_id).bind(job_id).bind(fts.as_str());
        }
        query
    }

    fn sort_column(sort_by: &str) -> &'static str {
        field_spec(sort_by).map(|f| f.column).unwrap_or("timestamp")
    }
}

#[async_trait]
impl OlapStore for ClickHouseStore {
    async fn insert_entries(
        &self,
        _tenant_id: Uuid,
        _job_id: Uuid,
        entries: &[LogEntry],
    ) -> ApiResult<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut insert = self.client.insert("log_entries")?;
        for entry in entries {
            insert.write(&EntryRow::from_entry(entry, now)).await?;
        }
        insert.end().await?;
        Ok(entries.len() as u64)
    }

    async fn index_full_text(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        entries: &[LogEntry],
    ) -> ApiResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut insert = self.client.insert("log_entries_fts")?;
        for entry in entries {
            let mut content = entry.raw_text.clone();
            if !entry.sql_statement.is_empty() {
                content.push('\n');
                content.push_str(&entry.sql_statement);
            }
            if !entry.error_message.is_empty() {
                content.push('\n');
                content.push_str(&entry.error_message);
            }
            insert
                .write(&FtsRow {
                    tenant_id,
                    job_id,
                    entry_id: entry.entry_id.unwrap_or_else(Uuid::new_v4),
                    line_number: entry.line_number,
                    ingested_at: now,
                    content,
                })
                .await?;
        }
        insert.end().await?;
        Ok(())
    }

    async fn general_stats(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<GeneralStatistics> {
        #[derive(Row, Deserialize)]
        struct StatsRow {
            total: u64,
            api: u64,
            sql: u64,
            fltr: u64,
            escl: u64,
            users: u64,
            forms: u64,
            tables: u64,
            min_ts: i64,
            max_ts: i64,
        }

        let row = self
            .client
            .query(
                r"SELECT
                    count()                                   AS total,
                    countIf(log_type = 'API')                 AS api,
                    countIf(log_type = 'SQL')                 AS sql,
                    countIf(log_type = 'FLTR')                AS fltr,
                    countIf(log_type = 'ESCL')                AS escl,
                    uniqExact(user)                           AS users,
                    uniqExactIf(form, form != '')             AS forms,
                    uniqExactIf(sql_table, sql_table != '')   AS tables,
                    toUnixTimestamp64Milli(min(timestamp))    AS min_ts,
                    toUnixTimestamp64Milli(max(timestamp))    AS max_ts
                  FROM log_entries
                  WHERE tenant_id = ? AND job_id = ?",
            )
            .bind(tenant_id)
            .bind(job_id)
            .fetch_one::<StatsRow>()
            .await?;

        let format_ts = |millis: i64| -> String {
            DateTime::<Utc>::from_timestamp_millis(millis)
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_default()
        };

        let duration = if row.total > 0 {
            let span_ms = (row.max_ts - row.min_ts).max(0);
            let secs = span_ms / 1000;
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        } else {
            String::new()
        };

        Ok(GeneralStatistics {
            total_lines: row.total as i64,
            api_count: row.api as i64,
            sql_count: row.sql as i64,
            fltr_count: row.fltr as i64,
            escl_count: row.escl as i64,
            unique_users: row.users as i64,
            unique_forms: row.forms as i64,
            unique_tables: row.tables as i64,
            log_start: if row.total > 0 { format_ts(row.min_ts) } else { String::new() },
            log_end: if row.total > 0 { format_ts(row.max_ts) } else { String::new() },
            duration,
            health_score: None,
        })
    }

    async fn top_n(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        log_type: LogType,
        n: u64,
    ) -> ApiResult<Vec<TopNEntry>> {
        let rows = self
            .client
            .query(&format!(
                "SELECT {} FROM log_entries \
                 WHERE tenant_id = ? AND job_id = ? AND log_type = ? \
                 ORDER BY duration_ms DESC LIMIT ?",
                ENTRY_COLUMNS
            ))
            .bind(tenant_id)
            .bind(job_id)
            .bind(log_type.as_str())
            .bind(n)
            .fetch_all::<EntryRow>()
            .await?;

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let identifier = match log_type {
                    LogType::Api => row.api_code.clone(),
                    LogType::Sql => row.sql_table.clone(),
                    LogType::Fltr => row.filter_name.clone(),
                    LogType::Escl => row.esc_name.clone(),
                };
                TopNEntry {
                    rank: i as u32 + 1,
                    line_number: row.line_number,
                    file_number: row.file_number,
                    timestamp: row.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    trace_id: row.trace_id,
                    rpc_id: row.rpc_id,
                    queue: row.queue,
                    identifier,
                    form: row.form,
                    user: row.user,
                    duration_ms: row.duration_ms as i64,
                    queue_time_ms: row.queue_time_ms as i64,
                    success: row.success,
                    details: String::new(),
                }
            })
            .collect())
    }

    async fn distribution(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Vec<TypeCount>> {
        #[derive(Row, Deserialize)]
        struct CountRow {
            log_type: String,
            count: u64,
        }
        let rows = self
            .client
            .query(
                "SELECT log_type, count() AS count FROM log_entries \
                 WHERE tenant_id = ? AND job_id = ? GROUP BY log_type ORDER BY count DESC",
            )
            .bind(tenant_id)
            .bind(job_id)
            .fetch_all::<CountRow>()
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| TypeCount { log_type: r.log_type, count: r.count })
            .collect())
    }

    async fn time_series(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        interval_secs: u32,
    ) -> ApiResult<Vec<TimeSeriesPoint>> {
        #[derive(Row, Deserialize)]
        struct BucketRow {
            bucket: i64,
            api: u64,
            sql: u64,
            fltr: u64,
            escl: u64,
            total_duration: u64,
            entries: u64,
            errors: u64,
        }

        // Served from the per-minute materialized aggregates.
        let rows = self
            .client
            .query(
                r"SELECT
                    toUnixTimestamp(toStartOfInterval(minute, INTERVAL ? SECOND)) AS bucket,
                    sumIf(entries, log_type = 'API')  AS api,
                    sumIf(entries, log_type = 'SQL')  AS sql,
                    sumIf(entries, log_type = 'FLTR') AS fltr,
                    sumIf(entries, log_type = 'ESCL') AS escl,
                    sum(total_duration_ms)            AS total_duration,
                    sum(entries)                      AS entries,
                    sum(errors)                       AS errors
                  FROM log_entries_minute_mv
                  WHERE tenant_id = ? AND job_id = ?
                  GROUP BY bucket
                  ORDER BY bucket",
            )
            .bind(interval_secs.max(60))
            .bind(tenant_id)
            .bind(job_id)
            .fetch_all::<BucketRow>()
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| TimeSeriesPoint {
                bucket: DateTime::<Utc>::from_timestamp(r.bucket, 0)
                    .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
                    .unwrap_or_default(),
                api_count: r.api as i64,
                sql_count: r.sql as i64,
                fltr_count: r.fltr as i64,
                escl_count: r.escl as i64,
                avg_duration_ms: if r.entries > 0 {
                    r.total_duration as f64 / r.entries as f64
                } else {
                    0.0
                },
                error_count: r.errors as i64,
            })
            .collect())
    }

    async fn search(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        request: &SearchRequest,
    ) -> ApiResult<SearchResults> {
        let where_sql = Self::search_where(request);

        let total = self
            .bind_search(
                format!("SELECT count() FROM log_entries WHERE {}", where_sql),
                tenant_id,
                job_id,
                request,
            )
            .fetch_one::<u64>()
            .await?;

        let page = request.page.max(1);
        let size = request.size.clamp(1, 1000);
        let order = if request.descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT {} FROM log_entries WHERE {} ORDER BY {} {} LIMIT {} OFFSET {}",
            ENTRY_COLUMNS,
            where_sql,
            Self::sort_column(&request.sort_by),
            order,
            size,
            (page - 1) * size,
        );

        let rows = self
            .bind_search(sql, tenant_id, job_id, request)
            .fetch_all::<EntryRow>()
            .await?;

        Ok(SearchResults {
            entries: rows.into_iter().map(LogEntry::from).collect(),
            total,
            page,
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
        let spec = field_spec(field).ok_or_else(|| ApiError::UnknownField(field.to_string()))?;

        #[derive(Row, Deserialize)]
        struct ValueRow {
            value: String,
        }
        let rows = self
            .client
            .query(&format!(
                "SELECT toString({col}) AS value FROM log_entries \
                 WHERE tenant_id = ? AND job_id = ? AND toString({col}) != '' \
                 GROUP BY value ORDER BY count() DESC LIMIT ?",
                col = spec.column
            ))
            .bind(tenant_id)
            .bind(job_id)
            .bind(limit)
            .fetch_all::<ValueRow>()
            .await?;
        Ok(rows.into_iter().map(|r| r.value).collect())
    }

    async fn trace(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        trace_id: &str,
    ) -> ApiResult<Vec<LogEntry>> {
        let rows = self
            .client
            .query(&format!(
                "SELECT {} FROM log_entries \
                 WHERE tenant_id = ? AND job_id = ? AND (trace_id = ? OR rpc_id = ?) \
                 ORDER BY timestamp, line_number",
                ENTRY_COLUMNS
            ))
            .bind(tenant_id)
            .bind(job_id)
            .bind(trace_id)
            .bind(trace_id)
            .fetch_all::<EntryRow>()
            .await?;
        Ok(rows.into_iter().map(LogEntry::from).collect())
    }

    async fn delayed_escalations(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        min_delay_ms: i64,
        limit: u64,
    ) -> ApiResult<Vec<LogEntry>> {
        let rows = self
            .client
            .query(&format!(
                "SELECT {} FROM log_entries \
                 WHERE tenant_id = ? AND job_id = ? AND log_type = 'ESCL' AND delay_ms > ? \
                 ORDER BY delay_ms DESC LIMIT ?",
                ENTRY_COLUMNS
            ))
            .bind(tenant_id)
            .bind(job_id)
            .bind(min_delay_ms)
            .bind(limit)
            .fetch_all::<EntryRow>()
            .await?;
        Ok(rows.into_iter().map(LogEntry::from).collect())
    }

    async fn ping(&self) -> ApiResult<()> {
        self.client.query("SELECT 1").execute().await?;
        Ok(())
    }
}
