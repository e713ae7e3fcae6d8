//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question from the indexed materials |
//! | `POST` | `/chat/sessions` | Create a chat session |
//! | `GET`  | `/chat/sessions` | List sessions, most recently active first |
//! | `GET`  | `/chat/sessions/{id}` | Fetch one session |
//! | `PUT`  | `/chat/sessions/{id}` | Rename a session |
//! | `GET`  | `/chat/sessions/{id}/history` | Messages of a session, oldest first |
//! | `GET`  | `/materials` | List ingested materials |
//! | `DELETE` | `/materials/{id}` | Delete a material and rebuild the index |
//! | `GET`  | `/logs` | Most recent query logs |
//! | `GET`  | `/logs/{id}` | One query log |
//! | `GET`  | `/source/{chunk_id}` | Full text and metadata of a cited chunk |
//! | `POST` | `/admin/reindex` | Re-embed every chunk and swap the index |
//! | `POST` | `/admin/reset` | Delete all data |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "timeout", "message": "generation timed out after 60s", "retryable": true } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (504),
//! `upstream_error` (502), `internal` (500).
//!
//! # Scores
//!
//! `sources[].score` and `confidence` on `/ask` responses are cosine
//! similarities when reranking is off and cross-encoder relevance scores
//! when it is on. `score_kind` (`similarity` | `rerank`) says which.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::admin::{self, ReindexReport};
use crate::ask::{self, AskRequest, AskResponse};
use crate::chat::{self, NewSession};
use crate::error::AskError;
use crate::logs;
use crate::models::{ChatMessage, ChatSession, Material, QueryLog};
use crate::services::Services;
use crate::source::{self, SourceDetail};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    services: Services,
}

/// Build the router with every route and the CORS layer.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route(
            "/chat/sessions",
            post(handle_create_session).get(handle_list_sessions),
        )
        .route(
            "/chat/sessions/{id}",
            get(handle_get_session).put(handle_rename_session),
        )
        .route("/chat/sessions/{id}/history", get(handle_session_history))
        .route("/materials", get(handle_list_materials))
        .route("/materials/{id}", axum::routing::delete(handle_delete_material))
        .route("/logs", get(handle_recent_logs))
        .route("/logs/{id}", get(handle_get_log))
        .route("/source/{chunk_id}", get(handle_get_source))
        .route("/admin/reindex", post(handle_reindex))
        .route("/admin/reset", post(handle_reset))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { services })
}

/// Serve on an already-bound listener until the process is terminated.
pub async fn serve(listener: tokio::net::TcpListener, services: Services) -> anyhow::Result<()> {
    axum::serve(listener, router(services)).await?;
    Ok(())
}

/// Bind to `[server].bind` and serve.
pub async fn run_server(services: Services) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "HTTP server listening");
    serve(listener, services).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                retryable: self.retryable,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retryable: false,
        }
    }

    fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        let retryable = err.is_retryable();
        let message = err.to_string();
        let e = match err {
            AskError::InvalidRequest(_) => bad_request(message),
            AskError::SessionNotFound(_) => not_found(message),
            AskError::GenerationTimeout(_) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            AskError::Generation(_) | AskError::Retrieval(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
            AskError::Storage(_) => internal(message),
        };
        if retryable {
            e.retryable()
        } else {
            e
        }
    }
}

/// Maps plumbing errors. Validation failures are recognisable by message,
/// everything else is internal.
fn classify(err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    if msg.contains("must not be empty") || msg.contains("invalid") {
        bad_request(msg)
    } else {
        tracing::error!(error = %msg, "request failed");
        internal(msg)
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

// ============ POST /ask ============

/// Runs the pipeline on its own task so the audit record is written even if
/// the client goes away before the response is sent.
async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let request = json_body(body)?;
    let services = state.services.clone();
    let result = tokio::spawn(async move { ask::ask(&services, request).await })
        .await
        .map_err(|e| internal(format!("ask task failed: {}", e)))??;
    Ok(Json(result.response))
}

// ============ Chat sessions ============

async fn handle_create_session(
    State(state): State<AppState>,
    body: Option<Json<NewSession>>,
) -> Result<(StatusCode, Json<ChatSession>), AppError> {
    let title = body.and_then(|Json(b)| b.title);
    let session = chat::create_session(state.services.store.as_ref(), title)
        .await
        .map_err(classify)?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Deserialize)]
struct Paging {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_page_limit")]
    limit: i64,
}

fn default_page_limit() -> i64 {
    50
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(paging): Query<Paging>,
) -> Result<Json<Vec<ChatSession>>, AppError> {
    let sessions = chat::list_sessions(state.services.store.as_ref(), paging.skip, paging.limit)
        .await
        .map_err(classify)?;
    Ok(Json(sessions))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatSession>, AppError> {
    chat::get_session(state.services.store.as_ref(), &id)
        .await
        .map_err(classify)?
        .map(Json)
        .ok_or_else(|| not_found(format!("chat session not found: {}", id)))
}

#[derive(Deserialize)]
struct RenameBody {
    title: String,
}

async fn handle_rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<RenameBody>, JsonRejection>,
) -> Result<Json<ChatSession>, AppError> {
    let body = json_body(body)?;
    chat::rename_session(state.services.store.as_ref(), &id, &body.title)
        .await
        .map_err(classify)?
        .map(Json)
        .ok_or_else(|| not_found(format!("chat session not found: {}", id)))
}

async fn handle_session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    chat::session_history(state.services.store.as_ref(), &id)
        .await
        .map_err(classify)?
        .map(Json)
        .ok_or_else(|| not_found(format!("chat session not found: {}", id)))
}

// ============ Materials ============

async fn handle_list_materials(
    State(state): State<AppState>,
) -> Result<Json<Vec<Material>>, AppError> {
    let materials = state
        .services
        .store
        .list_materials()
        .await
        .map_err(classify)?;
    Ok(Json(materials))
}

async fn handle_delete_material(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ReindexReport>, AppError> {
    admin::delete_material(&state.services, id)
        .await
        .map_err(classify)?
        .map(Json)
        .ok_or_else(|| not_found(format!("material not found: {}", id)))
}

// ============ Query logs ============

#[derive(Deserialize)]
struct RecentQuery {
    #[serde(default = "default_page_limit")]
    limit: i64,
}

async fn handle_recent_logs(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<Vec<QueryLog>>, AppError> {
    let logs = logs::recent_logs(state.services.store.as_ref(), q.limit)
        .await
        .map_err(classify)?;
    Ok(Json(logs))
}

async fn handle_get_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<QueryLog>, AppError> {
    logs::get_log(state.services.store.as_ref(), id)
        .await
        .map_err(classify)?
        .map(Json)
        .ok_or_else(|| not_found(format!("query log not found: {}", id)))
}

// ============ Sources ============

async fn handle_get_source(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Json<SourceDetail>, AppError> {
    source::get_source(state.services.store.as_ref(), &chunk_id)
        .await
        .map_err(classify)?
        .map(Json)
        .ok_or_else(|| not_found(format!("chunk not found: {}", chunk_id)))
}

// ============ Admin ============

async fn handle_reindex(State(state): State<AppState>) -> Result<Json<ReindexReport>, AppError> {
    let report = admin::reindex(&state.services).await.map_err(classify)?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct ResetResponse {
    status: &'static str,
}

async fn handle_reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, AppError> {
    admin::reset(&state.services).await.map_err(classify)?;
    Ok(Json(ResetResponse { status: "reset" }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    vectors: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        vectors: state.services.index.len(),
    })
}
