//! HTTP surface for Support Graph.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /answer` – Run the support pipeline for `{"question": "..."}` and return the final
//!   state (`question`, `question_status`, `on_topic`, `documents`, `llm_output`, `prompt_used`,
//!   `answer_status`; unset fields are omitted).
//! - `GET /health` – Liveness probe.
//! - `GET /metrics` – Pipeline outcome counters.
//! - `GET /` and `GET /static/script.js` – The bundled chat page.
//!
//! Orchestration failures are logged with their stage and category and answered with a generic
//! `500 {"detail": "Failed to answer the question."}`.

use crate::metrics::MetricsSnapshot;
use crate::pipeline::{AgentState, PipelineError};
use crate::service::AnswerApi;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const INDEX_HTML: &str = include_str!("../static/index.html");
const SCRIPT_JS: &str = include_str!("../static/script.js");

/// Detail returned for every orchestration failure.
pub const FAILURE_DETAIL: &str = "Failed to answer the question.";

/// Build the HTTP router exposing the answering API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: AnswerApi + 'static,
{
    Router::new()
        .route("/", get(index_page))
        .route("/static/script.js", get(index_script))
        .route("/answer", post(answer_question::<S>))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for the `POST /answer` endpoint.
#[derive(Deserialize)]
struct AnswerRequest {
    /// Raw user question.
    question: String,
}

/// Answer a customer-support question.
async fn answer_question<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AgentState>, AppError>
where
    S: AnswerApi,
{
    let state = service.answer(request.question).await?;
    Ok(Json(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Return the pipeline outcome counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: AnswerApi,
{
    Json(service.metrics_snapshot())
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn index_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        SCRIPT_JS,
    )
}

struct AppError(PipelineError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(
            stage = self.0.stage().map(|stage| stage.as_str()),
            category = self.0.category(),
            error = %self.0,
            "Failed to answer the question"
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": FAILURE_DETAIL })),
        )
            .into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}
