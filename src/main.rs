use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use remedyiq::ai::{ChatService, ConversationService, LlmClient, LlmConfig};
use remedyiq::config::Config;
use remedyiq::jar::JarRunner;
use remedyiq::pipeline::{IngestionPipeline, PipelineConfig};
use remedyiq::query::{DashboardService, SearchService, TraceService};
use remedyiq::storage::{
    BlobStore, Cache, ClickHouseStore, MessageBus, MetadataStore, OlapStore, PgMetadataStore,
    RedisBus, RedisCache, S3BlobStore,
};
use remedyiq::utils::JwtUtil;
use remedyiq::{handlers, middleware, AppState};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,

        handlers::files::upload,

        handlers::analysis::create_analysis,
        handlers::analysis::list_analyses,
        handlers::analysis::get_analysis,
        handlers::analysis::cancel_analysis,

        handlers::dashboard::dashboard,
        handlers::dashboard::aggregates,
        handlers::dashboard::exceptions,
        handlers::dashboard::gaps,
        handlers::dashboard::threads,
        handlers::dashboard::filters,
        handlers::dashboard::queued_calls,
        handlers::dashboard::delayed_escalations,

        handlers::trace::trace,

        handlers::search::search,
        handlers::search::autocomplete,
        handlers::search::histogram,
        handlers::saved_search::list_saved_searches,
        handlers::saved_search::create_saved_search,
        handlers::saved_search::delete_saved_search,

        handlers::ai::list_conversations,
        handlers::ai::create_conversation,
        handlers::ai::get_conversation,
        handlers::ai::delete_conversation,
        handlers::ai::ai_stream,

        handlers::events::job_events,
    ),
    components(
        schemas(
            remedyiq::models::Tenant,
            remedyiq::models::LogFile,
            remedyiq::models::LogType,
            remedyiq::models::LogEntry,
            remedyiq::models::AnalysisJob,
            remedyiq::models::JobStatus,
            remedyiq::models::AnalysisOptions,
            remedyiq::models::CreateAnalysisRequest,
            remedyiq::models::Conversation,
            remedyiq::models::Message,
            remedyiq::models::MessageRole,
            remedyiq::models::MessageStatus,
            remedyiq::models::CreateConversationRequest,
            remedyiq::models::SavedSearch,
            remedyiq::models::CreateSavedSearchRequest,
            remedyiq::ai::Skill,
            remedyiq::ai::ChatRequest,
        )
    ),
    tags(
        (name = "Health", description = "Liveness and dependency status"),
        (name = "Files", description = "Log file upload"),
        (name = "Analysis", description = "Analysis job lifecycle"),
        (name = "Dashboard", description = "Dashboard sections for a completed job"),
        (name = "Trace", description = "Trace reconstruction"),
        (name = "Search", description = "KQL search and saved searches"),
        (name = "AI", description = "Conversations and the streaming assistant"),
        (name = "Events", description = "Job progress relay"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    let _log_guard = if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("remedyiq.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        Some(guard)
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    tracing::info!("RemedyIQ starting up (environment: {})", config.environment);

    // ── Storage adapters ──
    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.metadata.url)
        .await?;
    sqlx::migrate!().run(&pg_pool).await?;
    tracing::info!("Metadata store ready");

    let mut ch_client = clickhouse::Client::default()
        .with_url(&config.olap.url)
        .with_database(&config.olap.database);
    if let Some(user) = &config.olap.user {
        ch_client = ch_client.with_user(user);
    }
    if let Some(password) = &config.olap.password {
        ch_client = ch_client.with_password(password);
    }
    let clickhouse_store = ClickHouseStore::new(ch_client);
    clickhouse_store.ensure_schema().await?;
    tracing::info!("OLAP store ready");

    let metadata: Arc<dyn MetadataStore> = Arc::new(PgMetadataStore::new(pg_pool));
    let olap: Arc<dyn OlapStore> = Arc::new(clickhouse_store);
    let cache: Arc<dyn Cache> = Arc::new(RedisCache::connect(&config.cache.url).await?);
    let bus: Arc<dyn MessageBus> = Arc::new(RedisBus::connect(&config.bus.url).await?);
    let blob: Arc<dyn BlobStore> = Arc::new(S3BlobStore::connect(
        &config.blob.endpoint,
        &config.blob.bucket,
        &config.blob.access_key,
        &config.blob.secret_key,
        config.blob.use_tls,
    )?);
    tracing::info!("Cache, bus and blob store ready");

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        shutdown_signal.cancel();
    });

    if config.worker.mode {
        // Ingestion worker process: no HTTP surface beyond what the API
        // process serves elsewhere.
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&metadata),
            Arc::clone(&olap),
            Arc::clone(&cache),
            Arc::clone(&blob),
            Arc::clone(&bus),
            Arc::new(JarRunner::new(&config.jar.path)),
            PipelineConfig {
                default_heap_mb: config.jar.default_heap_mb,
                default_timeout_secs: config.jar.timeout_sec,
                batch_size: config.worker.batch_size,
                worker_slots: config.worker.slots,
            },
        ));
        pipeline.run_worker(shutdown).await;
        return Ok(());
    }

    // ── API process ──
    let jwt_util = Arc::new(JwtUtil::new(&config.auth.secret_key));

    let conversations = Arc::new(ConversationService::new(Arc::clone(&metadata)));
    let llm_client = Arc::new(LlmClient::new(LlmConfig {
        api_base: config.llm.api_base.clone(),
        api_key: config.llm.api_key.clone(),
        model: config.llm.model.clone(),
        max_tokens: config.llm.max_tokens,
        request_timeout: std::time::Duration::from_secs(config.llm.request_timeout_sec),
    }));
    tracing::info!("LLM client ready (model: {})", llm_client.model());

    let app_state = Arc::new(AppState {
        metadata: Arc::clone(&metadata),
        olap: Arc::clone(&olap),
        cache: Arc::clone(&cache),
        blob: Arc::clone(&blob),
        bus: Arc::clone(&bus),
        dashboards: Arc::new(DashboardService::new(
            Arc::clone(&metadata),
            Arc::clone(&olap),
            Arc::clone(&cache),
        )),
        traces: Arc::new(TraceService::new(Arc::clone(&metadata), Arc::clone(&olap))),
        searches: Arc::new(SearchService::new(
            Arc::clone(&metadata),
            Arc::clone(&olap),
            Arc::clone(&cache),
        )),
        conversations: Arc::clone(&conversations),
        chat: Arc::new(ChatService::new(
            Arc::clone(&metadata),
            Arc::clone(&cache),
            conversations,
            llm_client,
        )),
        jwt_util: Arc::clone(&jwt_util),
        config: Arc::new(config.clone()),
    });

    let auth_state = middleware::AuthState { jwt_util };

    let protected_routes = Router::new()
        .route("/api/v1/files/upload", post(handlers::files::upload))
        .route(
            "/api/v1/analysis",
            post(handlers::analysis::create_analysis).get(handlers::analysis::list_analyses),
        )
        .route("/api/v1/analysis/:job_id", get(handlers::analysis::get_analysis))
        .route("/api/v1/analysis/:job_id/cancel", post(handlers::analysis::cancel_analysis))
        .route("/api/v1/analysis/:job_id/dashboard", get(handlers::dashboard::dashboard))
        .route(
            "/api/v1/analysis/:job_id/dashboard/aggregates",
            get(handlers::dashboard::aggregates),
        )
        .route(
            "/api/v1/analysis/:job_id/dashboard/exceptions",
            get(handlers::dashboard::exceptions),
        )
        .route("/api/v1/analysis/:job_id/dashboard/gaps", get(handlers::dashboard::gaps))
        .route("/api/v1/analysis/:job_id/dashboard/threads", get(handlers::dashboard::threads))
        .route("/api/v1/analysis/:job_id/dashboard/filters", get(handlers::dashboard::filters))
        .route(
            "/api/v1/analysis/:job_id/dashboard/queued-calls",
            get(handlers::dashboard::queued_calls),
        )
        .route(
            "/api/v1/analysis/:job_id/dashboard/delayed-escalations",
            get(handlers::dashboard::delayed_escalations),
        )
        .route("/api/v1/analysis/:job_id/trace/:trace_id", get(handlers::trace::trace))
        .route("/api/v1/analysis/:job_id/search", get(handlers::search::search))
        .route("/api/v1/analysis/:job_id/autocomplete", get(handlers::search::autocomplete))
        .route("/api/v1/analysis/:job_id/histogram", get(handlers::search::histogram))
        .route(
            "/api/v1/search/saved",
            get(handlers::saved_search::list_saved_searches)
                .post(handlers::saved_search::create_saved_search),
        )
        .route(
            "/api/v1/search/saved/:id",
            axum::routing::delete(handlers::saved_search::delete_saved_search),
        )
        .route(
            "/api/v1/ai/conversations",
            get(handlers::ai::list_conversations).post(handlers::ai::create_conversation),
        )
        .route(
            "/api/v1/ai/conversations/:id",
            get(handlers::ai::get_conversation).delete(handlers::ai::delete_conversation),
        )
        .route("/api/v1/ai/stream", post(handlers::ai::ai_stream))
        .route("/api/v1/events/jobs", get(handlers::events::job_events))
        .layer(axum::extract::DefaultBodyLimit::max(handlers::files::MAX_UPLOAD_BYTES))
        .with_state(Arc::clone(&app_state))
        .layer(axum_middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let health_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .with_state(Arc::clone(&app_state));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(protected_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
