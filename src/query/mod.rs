//! Read-only query services composing the OLAP store and the cache.
//!
//! Every service gates on job state: `not_found` when the job does not exist
//! for the tenant, `not_ready` while it is anywhere short of `complete`.

pub mod dashboard;
pub mod search;
pub mod trace;

pub use dashboard::{DashboardResponse, DashboardService, DelayedEscalationsResponse};
pub use search::{SearchParams, SearchService};
pub use trace::{TraceNode, TraceResponse, TraceService};

use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AnalysisJob, JobStatus};
use crate::storage::MetadataStore;
use crate::utils::{ApiError, ApiResult};

/// Shared gate: the job must exist under this tenant and be `complete`.
pub(crate) async fn require_complete_job(
    metadata: &Arc<dyn MetadataStore>,
    tenant_id: Uuid,
    job_id: Uuid,
) -> ApiResult<AnalysisJob> {
    let job = metadata
        .get_job(tenant_id, job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;
    if job.status != JobStatus::Complete {
        return Err(ApiError::not_ready(job.status.as_str()));
    }
    Ok(job)
}
