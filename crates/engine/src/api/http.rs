//! HTTP surface of the narrative runtime.
//!
//! Thin translation layer: parse the request, call the use case, map the
//! error taxonomy onto status codes. No runtime logic lives here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use reverie_domain::{NarrativeProgram, ValidationResult, WorldId};
use reverie_protocol::{
    AbortRequest, LegacyActionSelectRequest, LegacyActionSelectResponse, LegacyDialogueRequest,
    LegacyDialogueResponse, MigrationStatusResponse, NarrativeResponse, ResumeRequest,
    StartRequest,
};

use crate::app::App;
use crate::error::RuntimeError;

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/narrative/start", post(start))
        .route("/api/narrative/resume", post(resume))
        .route("/api/narrative/abort", post(abort))
        .route("/api/programs", post(publish_program))
        .route("/api/programs/validate", post(validate_program))
        .route("/api/worlds/{world_id}/migration-status", get(migration_status))
        .route("/api/dialogue", post(legacy_dialogue))
        .route("/api/action-select", post(legacy_action_select))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn health() -> &'static str {
    "OK"
}

async fn start(
    State(app): State<Arc<App>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<NarrativeResponse>, ApiError> {
    Ok(Json(app.start_narrative.execute(request).await?))
}

async fn resume(
    State(app): State<Arc<App>>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<NarrativeResponse>, ApiError> {
    Ok(Json(app.resume_narrative.execute(request).await?))
}

async fn abort(
    State(app): State<Arc<App>>,
    Json(request): Json<AbortRequest>,
) -> Result<Json<NarrativeResponse>, ApiError> {
    Ok(Json(app.abort_narrative.execute(request).await?))
}

async fn publish_program(
    State(app): State<Arc<App>>,
    Json(program): Json<NarrativeProgram>,
) -> Result<StatusCode, ApiError> {
    app.publish_program.execute(program).await?;
    Ok(StatusCode::CREATED)
}

async fn validate_program(
    State(app): State<Arc<App>>,
    Json(program): Json<NarrativeProgram>,
) -> Json<ValidationResult> {
    Json(app.validate_program.execute(&program))
}

async fn migration_status(
    State(app): State<Arc<App>>,
    Path(world_id): Path<Uuid>,
) -> Json<MigrationStatusResponse> {
    Json(app.migration_status.execute(WorldId::from_uuid(world_id)))
}

async fn legacy_dialogue(
    State(app): State<Arc<App>>,
    Json(request): Json<LegacyDialogueRequest>,
) -> Result<Json<LegacyDialogueResponse>, ApiError> {
    Ok(Json(app.legacy_dialogue.execute(request).await?))
}

async fn legacy_action_select(
    State(app): State<Arc<App>>,
    Json(request): Json<LegacyActionSelectRequest>,
) -> Result<Json<LegacyActionSelectResponse>, ApiError> {
    Ok(Json(app.legacy_action_select.execute(request).await?))
}

pub struct ApiError(RuntimeError);

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            RuntimeError::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                json!({ "error": self.0.to_string() }),
            ),
            RuntimeError::StaleChoice { .. }
            | RuntimeError::ConcurrentResume
            | RuntimeError::WrongState { .. } => (
                StatusCode::CONFLICT,
                json!({ "error": self.0.to_string() }),
            ),
            RuntimeError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "validation failed", "details": errors }),
            ),
            RuntimeError::NoAvailableChoice { fallback_line } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": self.0.to_string(), "fallback_line": fallback_line }),
            ),
            RuntimeError::CallStackOverflow { .. } | RuntimeError::StepBudgetExhausted { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": self.0.to_string() }),
            ),
            RuntimeError::Generation(_) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": self.0.to_string() }),
            ),
            RuntimeError::Repo(err) => {
                warn!(error = %err, "Storage error surfaced to the API");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
