//! HTTP/WebSocket Handlers

use std::collections::BTreeMap;

use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use relay_core::{
    mcp::group_by_category, EngineSummary, ThinkingStep, ToolCatalogEntry, TurnRequest,
};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub engine: EngineSummary,
}

#[derive(Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
    /// `name/model` of the active adapter
    pub active: String,
}

#[derive(Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolCatalogEntry>,
    pub categories: BTreeMap<String, Vec<ToolCatalogEntry>>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub use_tools: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub is_error: bool,
    pub thinking_steps: Vec<ThinkingStep>,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/providers", get(list_providers))
        .route("/api/tools", get(list_tools))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(chat_stream_handler))
        .route("/api/clear", post(clear_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = state.engine.lock().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        engine: engine.summary().await,
    })
}

pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let engine = state.engine.lock().await;
    let config = engine.config();

    Json(ProvidersResponse {
        providers: engine.providers().names().into_iter().map(str::to_string).collect(),
        active: format!("{}/{}", config.provider, config.model),
    })
}

/// Tool catalog, flat and grouped by category
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    let tools = state.engine.lock().await.available_tools().await;

    Json(ToolsResponse {
        categories: group_by_category(&tools),
        total: tools.len(),
        tools,
    })
}

/// Main chat endpoint (non-streaming)
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    run_chat(&state, payload).await.map(Json)
}

/// Clear the conversation and buffered tool results
pub async fn clear_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.lock().await.clear_conversation();
    Json(json!({ "status": "cleared" }))
}

/// Switch provider if asked, run one turn, then trim history
async fn run_chat(state: &AppState, payload: ChatRequest) -> Result<ChatReply, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "EMPTY_MESSAGE",
            "Message cannot be empty",
        ));
    }

    let mut engine = state.engine.lock().await;

    let (current_provider, current_model) = {
        let config = engine.config();
        (config.provider.clone(), config.model.clone())
    };
    let target = payload
        .provider
        .as_deref()
        .map_or_else(|| current_provider.clone(), str::to_lowercase);
    let model_changed = payload.model.as_ref().is_some_and(|m| *m != current_model);

    if target != current_provider || model_changed {
        engine
            .switch_provider(&target, payload.model.as_deref())
            .map_err(|e| {
                tracing::error!(provider = %target, error = %e, "Provider switch failed");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "SWITCH_PROVIDER", e.user_message())
            })?;
    }

    let mut request = TurnRequest::new(payload.message);
    request.use_tools = payload.use_tools;
    request.temperature = payload.temperature;
    request.max_tokens = payload.max_tokens;

    let outcome = engine.run(request).await;
    engine.conversation_mut().retain_recent(state.history_window);

    let config = engine.config();
    Ok(ChatReply {
        response: outcome.text,
        is_error: outcome.is_error,
        thinking_steps: outcome.steps,
        provider: config.provider.clone(),
        model: config.model.clone(),
        timestamp: Utc::now(),
    })
}

/// WebSocket chat: one `step` frame per thinking step, then a `final` frame
pub async fn chat_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => continue,
        };

        let frames = match serde_json::from_str::<ChatRequest>(msg.as_str()) {
            Ok(request) => match run_chat(&state, request).await {
                Ok(reply) => reply_frames(reply),
                Err((_, Json(error))) => {
                    vec![json!({"type": "error", "error": error.error, "code": error.code})]
                }
            },
            Err(e) => {
                vec![json!({"type": "error", "error": e.to_string(), "code": "BAD_REQUEST"})]
            }
        };

        for frame in frames {
            if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                return;
            }
        }
    }
}

fn reply_frames(reply: ChatReply) -> Vec<serde_json::Value> {
    let mut frames: Vec<_> = reply
        .thinking_steps
        .iter()
        .map(|step| json!({"type": "step", "step": step}))
        .collect();

    frames.push(json!({
        "type": "final",
        "response": reply.response,
        "is_error": reply.is_error,
        "provider": reply.provider,
        "model": reply.model,
        "timestamp": reply.timestamp,
    }));
    frames
}
