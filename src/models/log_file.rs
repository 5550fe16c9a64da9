use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::LogType;

/// An uploaded raw log file. Created by the upload handler, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LogFile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub bucket: String,
    pub object_key: String,
    pub content_type: String,
    pub sha256: Option<String>,
    /// Log types detected by sniffing the first lines at upload time.
    #[sqlx(json)]
    pub log_types: Vec<LogType>,
    pub uploaded_at: DateTime<Utc>,
}

/// Detect which record types a file contains by scanning a prefix of it.
/// Only the leading type token is inspected per line.
pub fn detect_log_types(sample: &str) -> Vec<LogType> {
    let mut found = Vec::new();
    for line in sample.lines().take(500) {
        let Some(rest) = line.strip_prefix('<') else { continue };
        let Some(end) = rest.find('>') else { continue };
        if let Some(t) = LogType::parse(&rest[..end]) {
            if !found.contains(&t) {
                found.push(t);
            }
        }
        if found.len() == LogType::ALL.len() {
            break;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_types_from_prefix() {
        let sample = "<API > <TrID: a> x\n<SQL > <TrID: b> y\nnoise\n<API > z\n";
        assert_eq!(detect_log_types(sample), vec![LogType::Api, LogType::Sql]);
    }

    #[test]
    fn empty_sample_detects_nothing() {
        assert!(detect_log_types("").is_empty());
    }
}
