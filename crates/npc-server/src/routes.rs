//! HTTP framing around the engine: `POST /chat`, `POST /memory/reset`,
//! `GET /health`. None of this is part of the engine's own contract — these
//! are thin adapters, grounded on `restflow-core/daemon/http/router.rs`'s
//! `Router::new().route(...).layer(...)` shape.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use npc_conversation::ConversationLog;
use npc_engine::{handle_message, Engine, IngestOutcome};

use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

pub struct AppState<L: ConversationLog> {
    pub engine: Arc<Engine<L>>,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
    pub persona_name: String,
}

pub fn build_router<L: ConversationLog + Send + Sync + 'static>(state: Arc<AppState<L>>) -> Router {
    Router::new()
        .route("/health", get(health::<L>))
        .route("/chat", post(chat::<L>))
        .route("/memory/reset", post(memory_reset::<L>))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub speaker: String,
    pub message: String,
    #[serde(default, rename = "avatarId")]
    pub avatar_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    persona: String,
    state: String,
    buffered_speakers: usize,
    uptime_secs: u64,
}

async fn health<L: ConversationLog + Send + Sync + 'static>(State(state): State<Arc<AppState<L>>>) -> impl IntoResponse {
    let engine_state = state.engine.state().await;
    Json(HealthResponse {
        status: "ok",
        persona: state.persona_name.clone(),
        state: format!("{:?}", engine_state),
        buffered_speakers: state.engine.buffer_total_len().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn chat<L: ConversationLog + Send + Sync + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let speaker = body.speaker.trim();
    let message = body.message.trim();
    if speaker.is_empty() || message.is_empty() {
        return Err(ApiError::bad_request("`speaker` and `message` are required and must be non-empty"));
    }
    let avatar_id = body.avatar_id.as_deref().map(str::trim).filter(|v| !v.is_empty()).unwrap_or(speaker);

    let now = current_epoch_ms();
    if !state.rate_limiter.allow(avatar_id, now).await {
        return Err(ApiError::too_many_requests("rate limit exceeded"));
    }

    match handle_message(state.engine.as_ref(), speaker, avatar_id, message, now).await? {
        IngestOutcome::Replied(reply) => Ok((StatusCode::OK, reply).into_response()),
        IngestOutcome::Declined => Ok(StatusCode::ACCEPTED.into_response()),
        IngestOutcome::Reset => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn memory_reset<L: ConversationLog + Send + Sync + 'static>(State(state): State<Arc<AppState<L>>>) -> impl IntoResponse {
    state.engine.reset(current_epoch_ms()).await;
    StatusCode::NO_CONTENT
}

fn current_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
