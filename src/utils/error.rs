use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error with a closed set of stable kinds.
///
/// Design: uses thiserror for ergonomic error handling with context. Every
/// boundary in the system returns one of these kinds; the wire envelope is
/// `{"error": {"kind": ..., "message": ...}}` and is only present on failures.
#[derive(Error, Debug)]
pub enum ApiError {
    // Per-line parser rejections. Logged and counted, never surfaced to the
    // caller per line.
    #[error("Malformed line {line_number}")]
    MalformedLine { line_number: u64 },

    #[error("Unknown log type: {token}")]
    UnknownType { token: String },

    // Job-terminal subprocess outcomes
    #[error("Analyzer exited with status {exit_code}")]
    SubprocessFailed { exit_code: i32, stderr: String },

    #[error("Analyzer timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,

    // Query-side rejections
    #[error("Job is not ready: status is {status}")]
    NotReady { status: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // KQL errors
    #[error("Query parse error at column {column}: {message}")]
    ParseError { column: usize, message: String },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Range operator applied to non-numeric field: {0}")]
    RangeInvalid(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Infrastructure faults - auto-converted, reported as `internal`
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_ready(status: impl Into<String>) -> Self {
        Self::NotReady { status: status.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn parse_error(column: usize, message: impl Into<String>) -> Self {
        Self::ParseError { column, message: message.into() }
    }

    /// The stable kind string used in the wire envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedLine { .. } => "malformed_line",
            Self::UnknownType { .. } => "unknown_type",
            Self::SubprocessFailed { .. } => "subprocess_failed",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::NotReady { .. } => "not_ready",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::ParseError { .. } => "parse_error",
            Self::UnknownField(_) => "unknown_field",
            Self::RangeInvalid(_) => "range_invalid",
            Self::RateLimited { .. } => "rate_limited",
            Self::ValidationError(_) => "parse_error",
            Self::Internal(_) | Self::Database(_) | Self::Other(_) => "internal",
        }
    }

    /// Whether the underlying fault is a transient infrastructure error the
    /// pipeline may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_) | Self::Other(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotReady { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ParseError { .. }
            | Self::UnknownField(_)
            | Self::RangeInvalid(_)
            | Self::ValidationError(_)
            | Self::MalformedLine { .. }
            | Self::UnknownType { .. } => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::SubprocessFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Cancelled => StatusCode::CONFLICT,
            Self::Internal(_) | Self::Database(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// User-visible message. Infrastructure faults are collapsed so stack
    /// traces and driver diagnostics never reach the wire; the full error is
    /// logged where it occurred.
    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Database(_) | Self::Other(_) => {
                "An internal error occurred".to_string()
            }
            Self::SubprocessFailed { exit_code, .. } => {
                format!("Analyzer exited with status {}", exit_code)
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_) | Self::Database(_) | Self::Other(_)) {
            tracing::error!("internal error: {:#}", self);
        }

        let status = self.status_code();
        let envelope = ErrorEnvelope {
            error: ErrorBody { kind: self.kind().to_string(), message: self.public_message() },
        };

        let mut response = (status, Json(envelope)).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal(format!("JSON serialization error: {}", err))
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::internal(format!("Cache error: {}", err))
    }
}

impl From<clickhouse::error::Error> for ApiError {
    fn from(err: clickhouse::error::Error) -> Self {
        ApiError::internal(format!("OLAP error: {}", err))
    }
}

impl From<object_store::Error> for ApiError {
    fn from(err: object_store::Error) -> Self {
        ApiError::internal(format!("Blob store error: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
