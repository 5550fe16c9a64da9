//! RemedyIQ library.
//!
//! Multi-tenant ingestion-and-query engine for BMC Remedy AR Server logs:
//! runs the external analyzer, parses its report and the raw lines, loads
//! entries into the OLAP store, and serves dashboard, search, trace and
//! streaming-chat APIs.

use std::sync::Arc;

pub mod ai;
pub mod config;
pub mod handlers;
pub mod jar;
pub mod kql;
pub mod middleware;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use utils::{ApiError, ApiResult, JwtUtil};

use ai::{ChatService, ConversationService};
use query::{DashboardService, SearchService, TraceService};
use storage::{BlobStore, Cache, MessageBus, MetadataStore, OlapStore};

/// Application shared state.
///
/// Rust's type system is the DI container: storage seams are trait objects so
/// tests swap in-memory fakes, services are plain structs behind Arc.
#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataStore>,
    pub olap: Arc<dyn OlapStore>,
    pub cache: Arc<dyn Cache>,
    pub blob: Arc<dyn BlobStore>,
    pub bus: Arc<dyn MessageBus>,

    pub dashboards: Arc<DashboardService>,
    pub traces: Arc<TraceService>,
    pub searches: Arc<SearchService>,
    pub conversations: Arc<ConversationService>,
    pub chat: Arc<ChatService>,

    pub jwt_util: Arc<JwtUtil>,
    pub config: Arc<Config>,
}
