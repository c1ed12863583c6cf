//! secondlight-api - HTTP API server for Second Light

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use secondlight_analysis::{
    AnalysisConfig, AnalysisError, AnalysisPipeline, AnalysisStores, ExtractionError,
    ExtractionRegistry,
};
use secondlight_core::{
    defaults, DocumentRepository, KeyFindingRepository, RecommendationRepository,
    SessionRepository, SubscriptionRepository,
};
use secondlight_db::{Database, FilesystemBackend, PoolConfig};
use secondlight_inference::OpenAIBackend;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
struct ServerConfig {
    host: String,
    port: u16,
    database_url: String,
    allowed_origins: Vec<HeaderValue>,
    max_upload_bytes: usize,
    file_storage_path: String,
    public_base_url: String,
    signing_key: String,
    monthly_allowance: i64,
}

impl ServerConfig {
    /// Read configuration from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `DATABASE_URL` | `postgres://localhost/secondlight` |
    /// | `ALLOWED_ORIGINS` | `http://localhost:3000,http://localhost:5173` |
    /// | `MAX_UPLOAD_BYTES` | 25 MiB |
    /// | `FILE_STORAGE_PATH` | `/var/lib/secondlight/files` |
    /// | `PUBLIC_BASE_URL` | `http://localhost:3000` |
    /// | `STORAGE_SIGNING_KEY` | random per process |
    /// | `MONTHLY_REPORT_ALLOWANCE` | `30` |
    fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);

        let signing_key = std::env::var("STORAGE_SIGNING_KEY").unwrap_or_else(|_| {
            warn!("STORAGE_SIGNING_KEY not set; signed URLs will not survive a restart");
            format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        });

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/secondlight".to_string()),
            allowed_origins: parse_allowed_origins(
                &std::env::var("ALLOWED_ORIGINS").unwrap_or_default(),
            ),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::MAX_UPLOAD_BYTES),
            file_storage_path: std::env::var("FILE_STORAGE_PATH")
                .unwrap_or_else(|_| "/var/lib/secondlight/files".to_string()),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            signing_key,
            monthly_allowance: std::env::var("MONTHLY_REPORT_ALLOWANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::MONTHLY_REPORT_ALLOWANCE),
        }
    }
}

/// Parse a comma-separated origin list. Empty input yields the local defaults.
fn parse_allowed_origins(origins_str: &str) -> Vec<HeaderValue> {
    if origins_str.trim().is_empty() {
        return vec![
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:5173"),
        ];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    documents: Arc<dyn DocumentRepository>,
    key_findings: Arc<dyn KeyFindingRepository>,
    recommendations: Arc<dyn RecommendationRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    sessions: Arc<dyn SessionRepository>,
    storage: Arc<FilesystemBackend>,
    extraction: Arc<ExtractionRegistry>,
    pipeline: AnalysisPipeline,
    monthly_allowance: i64,
    /// `None` when running without a database.
    pool: Option<sqlx::PgPool>,
}

fn build_router(state: AppState, allowed_origins: Vec<HeaderValue>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/process-document", post(handlers::analysis::process_document))
        .route(
            "/api/v1/documents",
            post(handlers::documents::upload_document).get(handlers::documents::list_documents),
        )
        .route("/api/v1/documents/:id", get(handlers::documents::get_document))
        .route(
            "/api/v1/documents/:id/file",
            get(handlers::documents::get_document_file_url),
        )
        .route("/api/v1/subscription", get(handlers::subscription::get_subscription))
        .route("/files/*path", get(handlers::documents::serve_signed_file))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: logging::DEFAULT_FILTER)
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| secondlight_core::logging::DEFAULT_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("secondlight-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless asked for
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ServerConfig::from_env();

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // File storage
    let storage = FilesystemBackend::new(
        &config.file_storage_path,
        &config.public_base_url,
        config.signing_key.as_bytes(),
    );
    if let Err(e) = storage.validate().await {
        error!(path = %config.file_storage_path, error = %e, "File storage is not usable");
    }

    // Analysis Service
    let backend = OpenAIBackend::from_env()?;
    info!(model = backend.config().gen_model.as_str(), "Analysis service configured");

    // Text extraction tools
    let extraction = ExtractionRegistry::with_defaults();
    for (kind, available) in extraction.health_check_all().await {
        if !available {
            warn!(?kind, "Extraction tool not available; uploads of this kind will fail");
        }
    }

    let pipeline = AnalysisPipeline::new(
        AnalysisStores::from_database(&db),
        Arc::new(backend),
        AnalysisConfig::from_env(),
    );

    let state = AppState {
        documents: Arc::new(db.documents.clone()),
        key_findings: Arc::new(db.key_findings.clone()),
        recommendations: Arc::new(db.recommendations.clone()),
        subscriptions: Arc::new(db.subscriptions.clone()),
        sessions: Arc::new(db.sessions.clone()),
        storage: Arc::new(storage),
        extraction: Arc::new(extraction),
        pipeline,
        monthly_allowance: config.monthly_allowance,
        pool: Some(db.pool.clone()),
    };

    let app = build_router(state, config.allowed_origins.clone(), config.max_upload_bytes);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// HEALTH
// =============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => {
                secondlight_db::log_pool_metrics(pool);
                "connected"
            }
            Err(e) => {
                warn!(error = %e, "Health check database query failed");
                "unavailable"
            }
        },
        None => "not_configured",
    };

    Json(serde_json::json!({
        "status": if database == "unavailable" { "degraded" } else { "healthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
    }))
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// Extractor that requires a valid bearer session.
#[derive(Debug, Clone, Copy)]
struct RequireUser {
    user_id: Uuid,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

        match state.sessions.resolve_token(token).await? {
            Some(user_id) => Ok(RequireUser { user_id }),
            None => Err(ApiError::Unauthorized(
                "Invalid or expired token".to_string(),
            )),
        }
    }
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Internal(secondlight_core::Error),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    PaymentRequired(String),
    /// Upload could not be turned into text.
    Extraction(ExtractionError),
    /// `/process-document` failures keep their own body shape.
    Analysis(AnalysisError),
}

impl From<secondlight_core::Error> for ApiError {
    fn from(err: secondlight_core::Error) -> Self {
        use secondlight_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::DocumentNotFound(id) => ApiError::NotFound(format!("Document not found: {}", id)),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::QuotaExceeded(msg) => ApiError::PaymentRequired(msg),
            Error::InvalidTransition(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError::Analysis(err)
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        ApiError::Extraction(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::Analysis(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = serde_json::json!({
                    "success": false,
                    "error": err.to_string(),
                    "status": "error",
                });
                return (status, Json(body)).into_response();
            }
            ApiError::Extraction(err) => {
                let status = match err {
                    ExtractionError::PasswordRequired | ExtractionError::IncorrectPassword => {
                        StatusCode::UNAUTHORIZED
                    }
                    ExtractionError::Unreadable(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    ExtractionError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    ExtractionError::Tool(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let body = serde_json::json!({
                    "error": err.to_string(),
                    "code": err.code(),
                });
                return (status, Json(body)).into_response();
            }
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
        };

        let body = Json(serde_json::json!({
            "error": body,
        }));

        (status, body).into_response()
    }
}
