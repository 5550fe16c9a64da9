//! Log file upload.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::middleware::TenantContext;
use crate::models::{detect_log_types, LogFile};
use crate::utils::ApiError;
use crate::AppState;

/// Upload cap; requests beyond it are rejected with 413 by the body limit
/// layer before they reach this handler.
pub const MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// How much of the file head is sniffed for log type detection.
const DETECT_SAMPLE_BYTES: usize = 64 * 1024;

/// Multipart upload; stores the blob and returns the `LogFile` record.
#[utoipa::path(
    post,
    path = "/api/v1/files/upload",
    responses(
        (status = 201, description = "File stored", body = LogFile),
        (status = 400, description = "No file part in the request"),
        (status = 413, description = "File exceeds 2 GB"),
    ),
    tag = "Files"
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file_part = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::validation(format!("invalid multipart body: {}", err)))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .unwrap_or("upload.log")
                .to_string();
            let content_type = field
                .content_type()
                .unwrap_or("text/plain")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::validation(format!("failed to read upload: {}", err)))?;
            file_part = Some((filename, content_type, bytes));
            break;
        }
    }

    let (filename, content_type, bytes) =
        file_part.ok_or_else(|| ApiError::validation("multipart field 'file' is required"))?;

    let sha256 = format!("{:x}", Sha256::digest(&bytes));
    let sample_len = bytes.len().min(DETECT_SAMPLE_BYTES);
    let log_types = detect_log_types(&String::from_utf8_lossy(&bytes[..sample_len]));

    let file_id = Uuid::new_v4();
    let blob_ref = state
        .blob
        .upload(ctx.tenant_id, file_id, &filename, bytes.clone())
        .await?;

    let log_file = LogFile {
        id: file_id,
        tenant_id: ctx.tenant_id,
        filename,
        size_bytes: bytes.len() as i64,
        bucket: blob_ref.bucket,
        object_key: blob_ref.key,
        content_type,
        sha256: Some(sha256),
        log_types,
        uploaded_at: Utc::now(),
    };
    state.metadata.insert_log_file(ctx.tenant_id, &log_file).await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        file_id = %log_file.id,
        size_bytes = log_file.size_bytes,
        "log file uploaded"
    );
    Ok((StatusCode::CREATED, Json(log_file)))
}
