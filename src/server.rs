//! HTTP server for the chat endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a message with retrieved context |
//! | `OPTIONS` | `/chat` | CORS preflight, body `ok` |
//! | `GET` | `/usage` | Remaining quota per configured key |
//! | `GET` | `/health` | Health check (returns version) |
//!
//! # Chat Contract
//!
//! Request: `{ "message": "...", "chatHistory": [{ "isUser": true, "content": "..." }] }`
//!
//! | Status | Body | When |
//! |--------|------|------|
//! | 200 | `{ "success": true, "response": "...", "searchResults": n }` | answered, or apology after a provider error |
//! | 429 | `{ "error": "..." }` | the provider signalled rate limiting |
//! | 503 | `{ "error": "...not configured..." }` | no chat provider keys |
//! | 400 | `{ "error": "..." }` | `message` missing or blank |
//! | 500 | `{ "error": "..." }` | request body is not valid JSON |
//!
//! # CORS
//!
//! Any origin and the `authorization`, `x-client-info`, `apikey` and
//! `content-type` request headers. `/chat` allows `POST, OPTIONS`; the
//! other endpoints allow `GET`.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use unai_core::models::ChatTurn;

use crate::config::{Config, Secrets};
use crate::ledger::UsageLedger;
use crate::orchestrator::{local_offset, ChatOutcome, Orchestrator, Providers, Stores, NOT_CONFIGURED_MESSAGE};
use crate::sqlite_store::SqliteStore;
use crate::usage::{usage_report, KeyUsage};

const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const ALLOWED_METHODS: &str = "POST, OPTIONS";

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Read side of the usage ledger, for `/usage`.
    pub ledger: Arc<UsageLedger>,
    pub secrets: Arc<Secrets>,
}

/// Open the database, wire the pipeline and serve until Ctrl-C. Pending
/// usage writes are flushed before returning.
pub async fn run_server(config: &Config, secrets: Secrets) -> Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let stores = Stores::shared(store);
    let offset = local_offset();

    let (orchestrator, writer) = Orchestrator::from_config(
        config,
        &secrets,
        stores.clone(),
        Providers::from_config(config)?,
        offset,
    )?;
    let ledger = UsageLedger::from_config(stores.usage.clone(), config, offset)?;

    info!(
        groq_keys = secrets.groq.len(),
        gemini_keys = secrets.gemini.len(),
        embedding_keys = secrets.embedding.len(),
        "Loaded provider keys"
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        ledger: Arc::new(ledger),
        secrets: Arc::new(secrets),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "UNAi server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Server stopped; flushing usage log");
    let _ = writer.await;
    Ok(())
}

/// `/chat` sets its CORS headers itself so its preflight answers `ok`
/// with `POST, OPTIONS`; the read-only endpoints use a `CorsLayer`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ]);

    let chat: Router<AppState> = Router::new()
        .route("/chat", post(handle_chat).options(handle_options))
        .layer(middleware::map_response(chat_cors_headers));

    Router::new()
        .route("/usage", get(handle_usage))
        .route("/health", get(handle_health))
        .layer(cors)
        .merge(chat)
        .with_state(state)
}

async fn chat_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    response
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ============ OPTIONS /chat ============

async fn handle_options() -> &'static str {
    "ok"
}

// ============ POST /chat ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    message: Option<String>,
    #[serde(default)]
    chat_history: Option<Vec<ChatTurn>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    success: bool,
    response: String,
    search_results: usize,
}

async fn handle_chat(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let body: ChatBody = serde_json::from_slice(&body).map_err(|e| {
        error!(error = %e, "Rejected malformed chat request");
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let message = body
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "message is required"))?;
    let history = body.chat_history.unwrap_or_default();

    match state.orchestrator.chat(&message, &history).await {
        ChatOutcome::Answered {
            response,
            search_results,
        } => Ok(Json(ChatResponse {
            success: true,
            response,
            search_results,
        })
        .into_response()),
        ChatOutcome::RateLimited { message } => {
            Err(AppError::new(StatusCode::TOO_MANY_REQUESTS, message))
        }
        ChatOutcome::NotConfigured => Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            NOT_CONFIGURED_MESSAGE,
        )),
    }
}

// ============ GET /usage ============

#[derive(Serialize)]
struct UsageResponse {
    keys: Vec<KeyUsage>,
}

async fn handle_usage(State(state): State<AppState>) -> Result<Json<UsageResponse>, AppError> {
    let keys = usage_report(&state.ledger, &state.secrets, Utc::now())
        .await
        .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(UsageResponse { keys }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
