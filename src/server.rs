use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{EncodeRequest, EncodeResponse, ModelRegistry, PromptRequest, PromptResponse},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let state = AppState { config, registry };

    Router::new()
        .route("/ping/", get(ping))
        .route("/prompt/", post(prompt))
        .route("/prompt-streaming", post(prompt_streaming))
        .route("/encode", post(encode))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Reachability check: empty 200.
async fn ping() {}

/// Synchronous completion: the full generated message at once.
async fn prompt(
    State(state): State<AppState>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<PromptResponse>, ServiceError> {
    let message = state.registry.complete(request, &state.config).await?;
    Ok(Json(PromptResponse { message }))
}

/// Streaming completion: generated text fragments relayed as a raw byte
/// stream, no framing. Whatever the generation loop emits is forwarded as-is.
///
/// Request validation happens here: once the streamed 200 is committed, a
/// failure can only abort the body, not change the status code.
async fn prompt_streaming(
    State(state): State<AppState>,
    Json(request): Json<PromptRequest>,
) -> Result<Response, ServiceError> {
    if request.prompt.trim().is_empty() {
        return Err(ServiceError::BadRequest("prompt must not be empty".into()));
    }
    let rx = state.registry.stream(request, &state.config);
    Ok(Body::from_stream(ReceiverStream::new(rx)).into_response())
}

async fn encode(
    State(state): State<AppState>,
    Json(request): Json<EncodeRequest>,
) -> Result<Json<EncodeResponse>, ServiceError> {
    let embeddings = state.registry.encode(request.sentences).await?;
    Ok(Json(EncodeResponse { embeddings }))
}
