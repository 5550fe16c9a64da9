//! Dashboard services.
//!
//! The primary source is the analyzer parse result the pipeline cached under
//! `{tenant}:parseresult:{job}`; OLAP queries only fill sections missing from
//! it. Named section endpoints are strictly cache-backed: when the parse
//! result is gone they answer `not_ready` rather than synthesizing numbers,
//! and the health score is only ever passed through, never recomputed.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{LogEntry, LogType};
use crate::parser::report_models::{
    Exceptions, FilterComplexity, GapAnalysis, GeneralStatistics, GroupByTable, ThreadStat,
    TimeSeriesPoint, TopNEntry,
};
use crate::parser::ParseResult;
use crate::pipeline::IngestionPipeline;
use crate::storage::{Cache, MetadataStore, OlapStore, TenantKey, TypeCount};
use crate::utils::{ApiError, ApiResult};

use super::require_complete_job;

const DASHBOARD_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardResponse {
    pub general: GeneralStatistics,
    pub top_api: Vec<TopNEntry>,
    pub top_sql: Vec<TopNEntry>,
    pub top_fltr: Vec<TopNEntry>,
    pub top_escl: Vec<TopNEntry>,
    pub distribution: Vec<TypeCountEntry>,
    pub time_series: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TypeCountEntry {
    pub log_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DelayedEscalationsResponse {
    pub escalations: Vec<LogEntry>,
    pub total: usize,
    pub avg_delay_ms: f64,
    pub max_delay_ms: i64,
}

pub struct DashboardService {
    metadata: Arc<dyn MetadataStore>,
    olap: Arc<dyn OlapStore>,
    cache: Arc<dyn Cache>,
}

impl DashboardService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        olap: Arc<dyn OlapStore>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self { metadata, olap, cache }
    }

    /// One cache read per request keeps the response read-consistent.
    async fn parse_result(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Option<ParseResult>> {
        let key = IngestionPipeline::parse_result_key(tenant_id, job_id);
        match self.cache.get(&key).await? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(result) => Ok(Some(result)),
                Err(err) => {
                    tracing::warn!(%job_id, error = %err, "cached parse result is unreadable");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// The parse result sections endpoints cannot substitute with OLAP data.
    async fn require_parse_result(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<ParseResult> {
        require_complete_job(&self.metadata, tenant_id, job_id).await?;
        self.parse_result(tenant_id, job_id)
            .await?
            .ok_or_else(|| ApiError::not_ready("parse result not available"))
    }

    pub async fn dashboard(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<DashboardResponse> {
        require_complete_job(&self.metadata, tenant_id, job_id).await?;

        let dashboard_key =
            TenantKey::prefixed("cache", tenant_id, &["dashboard", &job_id.to_string()]);
        if let Some(json) = self.cache.get(&dashboard_key).await? {
            if let Ok(cached) = serde_json::from_str::<DashboardResponse>(&json) {
                return Ok(cached);
            }
        }

        let parsed = self.parse_result(tenant_id, job_id).await?;

        let response = match parsed {
            Some(result) => self.compose(tenant_id, job_id, result).await?,
            None => self.compose(tenant_id, job_id, ParseResult::default()).await?,
        };

        if let Ok(json) = serde_json::to_string(&response) {
            let _ = self.cache.set(&dashboard_key, &json, DASHBOARD_TTL).await;
        }
        Ok(response)
    }

    /// Fill any section the analyzer report did not provide from the OLAP
    /// store. The health score is never synthesized.
    async fn compose(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        result: ParseResult,
    ) -> ApiResult<DashboardResponse> {
        let general = if result.general.total_lines > 0 {
            result.general.clone()
        } else {
            self.olap.general_stats(tenant_id, job_id).await?
        };

        let mut tops: [Vec<TopNEntry>; 4] = [
            result.top_api.clone(),
            result.top_sql.clone(),
            result.top_fltr.clone(),
            result.top_escl.clone(),
        ];
        for (i, log_type) in LogType::ALL.iter().enumerate() {
            if tops[i].is_empty() {
                tops[i] = self.olap.top_n(tenant_id, job_id, *log_type, 20).await?;
            }
        }
        let [top_api, top_sql, top_fltr, top_escl] = tops;

        let distribution = if general.total_lines > 0 {
            vec![
                TypeCountEntry { log_type: "API".into(), count: general.api_count },
                TypeCountEntry { log_type: "SQL".into(), count: general.sql_count },
                TypeCountEntry { log_type: "FLTR".into(), count: general.fltr_count },
                TypeCountEntry { log_type: "ESCL".into(), count: general.escl_count },
            ]
        } else {
            self.olap
                .distribution(tenant_id, job_id)
                .await?
                .into_iter()
                .map(|TypeCount { log_type, count }| TypeCountEntry {
                    log_type,
                    count: count as i64,
                })
                .collect()
        };

        let time_series = if result.time_series.is_empty() {
            self.olap.time_series(tenant_id, job_id, 60).await?
        } else {
            result.time_series
        };

        Ok(DashboardResponse {
            general,
            top_api,
            top_sql,
            top_fltr,
            top_escl,
            distribution,
            time_series,
        })
    }

    pub async fn aggregates(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Vec<GroupByTable>> {
        Ok(self.require_parse_result(tenant_id, job_id).await?.group_by)
    }

    pub async fn exceptions(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Exceptions> {
        Ok(self.require_parse_result(tenant_id, job_id).await?.exceptions)
    }

    pub async fn gaps(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<GapAnalysis> {
        Ok(self.require_parse_result(tenant_id, job_id).await?.gaps)
    }

    pub async fn threads(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Vec<ThreadStat>> {
        Ok(self.require_parse_result(tenant_id, job_id).await?.thread_stats)
    }

    pub async fn filter_complexity(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
    ) -> ApiResult<FilterComplexity> {
        Ok(self
            .require_parse_result(tenant_id, job_id)
            .await?
            .filter_complexity)
    }

    pub async fn queued_calls(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<Vec<TopNEntry>> {
        Ok(self.require_parse_result(tenant_id, job_id).await?.queued_calls)
    }

    /// Issued directly against the OLAP store; summary metrics are computed
    /// on the returned result set.
    pub async fn delayed_escalations(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        min_delay_ms: i64,
        limit: u64,
    ) -> ApiResult<DelayedEscalationsResponse> {
        require_complete_job(&self.metadata, tenant_id, job_id).await?;
        let escalations = self
            .olap
            .delayed_escalations(tenant_id, job_id, min_delay_ms, limit)
            .await?;

        let total = escalations.len();
        let max_delay_ms = escalations.iter().map(|e| e.delay_ms).max().unwrap_or(0);
        let avg_delay_ms = if total > 0 {
            escalations.iter().map(|e| e.delay_ms as f64).sum::<f64>() / total as f64
        } else {
            0.0
        };

        Ok(DelayedEscalationsResponse { escalations, total, avg_delay_ms, max_delay_ms })
    }
}
