use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{Category, VoteColumn};
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    cron_secret: Arc<str>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let cron_secret = Arc::from(pipeline.config().cron_secret.as_str());
        Self {
            pipeline,
            cron_secret,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/cron", get(cron))
        .route("/api/search", post(search))
        .route("/api/vote", post(vote))
        .route("/rpc/increment_vote", post(vote))
        .route("/api/feed", get(feed))
        .route("/api/vibe", get(vibe))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// `{error}` body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::Auth => StatusCode::UNAUTHORIZED,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &e {
            PipelineError::Auth => "Unauthorized".to_string(),
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if !secret.is_empty() && token == secret => Ok(()),
        _ => Err(PipelineError::Auth.into()),
    }
}

async fn cron(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&headers, &state.cron_secret)?;
    let outcome = state.pipeline.run_tick().await.map_err(|e| {
        tracing::error!(target: "api", error = %e, "phase failed");
        ApiError::from(e)
    })?;
    Ok(Json(outcome.to_json()))
}

#[derive(serde::Deserialize)]
struct SearchReq {
    #[serde(default)]
    keyword: String,
}

async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchReq>,
) -> Result<Response, ApiError> {
    let keyword = body.keyword.trim();
    if keyword.is_empty() {
        return Err(ApiError::bad_request("keyword is required"));
    }
    let outcome = state.pipeline.search(keyword).await?;
    Ok(Json(outcome).into_response())
}

#[derive(serde::Deserialize)]
struct VoteReq {
    row_id: String,
    column_name: String,
}

async fn vote(
    State(state): State<AppState>,
    Json(body): Json<VoteReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id: Uuid = body
        .row_id
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request("row_id must be a uuid"))?;
    let column: VoteColumn = body
        .column_name
        .parse()
        .map_err(|_| ApiError::bad_request("column_name must be likes or dislikes"))?;
    state.pipeline.vote(id, column).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(serde::Deserialize)]
struct FeedQuery {
    category: Option<String>,
}

async fn feed(
    State(state): State<AppState>,
    Query(q): Query<FeedQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let category = match q.category.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(c) if c.eq_ignore_ascii_case("all") => None,
        Some(c) => Some(
            c.parse::<Category>()
                .map_err(|e| ApiError::bad_request(e.to_string()))?,
        ),
    };
    let rows = state.pipeline.feed(category).await?;
    Ok(Json(json!({
        "category": category.map_or("All", Category::label),
        "items": rows,
    })))
}

async fn vibe(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = state.pipeline.vibe().await?;
    Ok(Json(json!(summary)))
}
