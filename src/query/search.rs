//! KQL search, autocomplete and histogram over a completed job.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::kql;
use crate::parser::report_models::TimeSeriesPoint;
use crate::storage::{Cache, MetadataStore, OlapStore, SearchRequest, SearchResults, TenantKey};
use crate::utils::ApiResult;

use super::require_complete_job;

const SEARCH_TTL: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
    pub time_from: Option<chrono::DateTime<chrono::Utc>>,
    pub time_to: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_sort")]
    pub sort_by: String,
    /// `asc` or `desc`.
    #[serde(default = "default_order")]
    pub sort_order: String,
}

fn default_page() -> u64 {
    1
}
fn default_size() -> u64 {
    50
}
fn default_sort() -> String {
    "timestamp".to_string()
}
fn default_order() -> String {
    "desc".to_string()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AutocompleteResponse {
    /// Present when the query does not end in `field:`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSuggestion>>,
    /// Present when value suggestions were requested for a trailing field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldSuggestion {
    pub field: String,
    pub description: String,
}

pub struct SearchService {
    metadata: Arc<dyn MetadataStore>,
    olap: Arc<dyn OlapStore>,
    cache: Arc<dyn Cache>,
}

impl SearchService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        olap: Arc<dyn OlapStore>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self { metadata, olap, cache }
    }

    pub async fn search(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        params: &SearchParams,
    ) -> ApiResult<SearchResults> {
        require_complete_job(&self.metadata, tenant_id, job_id).await?;

        let plan = kql::compile(&params.q)?;
        let request = SearchRequest {
            plan,
            time_from: params.time_from,
            time_to: params.time_to,
            sort_by: params.sort_by.clone(),
            descending: !params.sort_order.eq_ignore_ascii_case("asc"),
            page: params.page,
            size: params.size,
        };

        let cache_key = TenantKey::prefixed(
            "cache",
            tenant_id,
            &["search", &search_hash(job_id, params)],
        );
        if let Some(json) = self.cache.get(&cache_key).await? {
            if let Ok(cached) = serde_json::from_str::<CachedResults>(&json) {
                return Ok(cached.into());
            }
        }

        let results = self.olap.search(tenant_id, job_id, &request).await?;
        if let Ok(json) = serde_json::to_string(&CachedResults::from(&results)) {
            let _ = self.cache.set(&cache_key, &json, SEARCH_TTL).await;
        }
        Ok(results)
    }

    pub async fn autocomplete(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        partial: &str,
    ) -> ApiResult<AutocompleteResponse> {
        require_complete_job(&self.metadata, tenant_id, job_id).await?;

        if let Some(spec) = kql::trailing_field(partial) {
            let values = self
                .olap
                .distinct_values(tenant_id, job_id, spec.name, 20)
                .await?;
            return Ok(AutocompleteResponse { fields: None, values: Some(values) });
        }

        let fields = kql::field_catalogue()
            .into_iter()
            .map(|(field, description)| FieldSuggestion {
                field: field.to_string(),
                description: description.to_string(),
            })
            .collect();
        Ok(AutocompleteResponse { fields: Some(fields), values: None })
    }

    pub async fn histogram(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        interval_secs: u32,
    ) -> ApiResult<Vec<TimeSeriesPoint>> {
        require_complete_job(&self.metadata, tenant_id, job_id).await?;
        self.olap.time_series(tenant_id, job_id, interval_secs).await
    }
}

fn search_hash(job_id: Uuid, params: &SearchParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_id.as_bytes());
    hasher.update(params.q.as_bytes());
    hasher.update(params.page.to_le_bytes());
    hasher.update(params.size.to_le_bytes());
    hasher.update(params.sort_by.as_bytes());
    hasher.update(params.sort_order.as_bytes());
    if let Some(from) = params.time_from {
        hasher.update(from.timestamp_millis().to_le_bytes());
    }
    if let Some(to) = params.time_to {
        hasher.update(to.timestamp_millis().to_le_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().take(16).map(|b| format!("{:02x}", b)).collect()
}

/// Serializable mirror of [`SearchResults`] for the 2-minute cache.
#[derive(Debug, Serialize, Deserialize)]
struct CachedResults {
    entries: Vec<crate::models::LogEntry>,
    total: u64,
    page: u64,
    size: u64,
}

impl From<&SearchResults> for CachedResults {
    fn from(r: &SearchResults) -> Self {
        Self { entries: r.entries.clone(), total: r.total, page: r.page, size: r.size }
    }
}

impl From<CachedResults> for SearchResults {
    fn from(c: CachedResults) -> Self {
        Self { entries: c.entries, total: c.total, page: c.page, size: c.size }
    }
}
