//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    AlreadyStartedResponse, ChatRequest, ChatResponse, ConversationResponse, DeleteResponse,
    ErrorResponse, HealthResponse, TriggerRequest, TriggerResponse, WebhookResponse,
    DEFAULT_CONVERSATION_ID,
};
use super::AppState;
use crate::runtime::TriggerOutcome;
use crate::webhook::RawWebhook;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

/// Create the API router. Routes are served at the root and under `/api`.
pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/chat", post(chat))
        .route("/events/:user_id", get(events))
        .route("/webhook", post(webhook))
        .route("/trigger", post(trigger))
        .route("/health", get(health))
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        );

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .with_state(state)
}

// ============================================================
// Chat
// ============================================================

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Message is required".to_string()))?;
    let conversation_id = req
        .conversation_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_CONVERSATION_ID.to_string());

    let reply = state
        .orchestrator
        .chat(&conversation_id, &message)
        .await
        .map_err(|e| {
            tracing::error!(conv_id = %conversation_id, error = %e, "Chat failed");
            AppError::Internal("Something went wrong".to_string())
        })?;

    Ok(Json(ChatResponse {
        response: reply.response,
        conversation_id,
        success: reply.success,
        error: reply.error,
        email: reply.email,
    }))
}

// ============================================================
// Realtime Stream
// ============================================================

async fn events(State(state): State<AppState>, Path(user_id): Path<String>) -> impl IntoResponse {
    let subscription = state.orchestrator.notifier().connect(&user_id);
    let shutdown = state.orchestrator.shutdown_token().clone();
    sse_stream(subscription, state.ping_interval, shutdown)
}

// ============================================================
// Provider Callbacks
// ============================================================

async fn webhook(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<WebhookResponse>, AppError> {
    let raw = RawWebhook::from_json(body)
        .ok_or_else(|| AppError::BadRequest("Invalid webhook payload".to_string()))?;

    let ack = state.ingress.handle(raw).await;
    tracing::debug!(kind = ack.kind, outcomes = ack.outcomes.len(), "Webhook acknowledged");

    Ok(Json(WebhookResponse {
        success: true,
        message: "Webhook processed successfully".to_string(),
    }))
}

async fn trigger(
    State(state): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<Response, AppError> {
    let conversation_id = req
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("userId is required".to_string()))?;

    let outcome = state
        .orchestrator
        .trigger(&conversation_id)
        .await
        .map_err(|e| {
            tracing::error!(conv_id = %conversation_id, error = %e, "Trigger failed");
            AppError::Internal("Failed to trigger workflow".to_string())
        })?;

    match outcome {
        TriggerOutcome::Started {
            workflow_execution_id,
        } => Ok(Json(TriggerResponse {
            success: true,
            message: "Workflow triggered successfully.".to_string(),
            conversation_id,
            workflow_execution_id,
        })
        .into_response()),
        TriggerOutcome::AlreadyActive => Ok(Json(AlreadyStartedResponse {
            message: "Chat already started".to_string(),
            conversation_id,
        })
        .into_response()),
        TriggerOutcome::Failed(e) => {
            tracing::error!(conv_id = %conversation_id, error = %e, "Workflow trigger failed");
            Err(AppError::Internal("Failed to trigger workflow".to_string()))
        }
    }
}

// ============================================================
// Status and Conversations
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        agent_initialized: state.orchestrator.agent_ready(),
    })
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let snapshot = state
        .orchestrator
        .store()
        .snapshot(&id)
        .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
    Ok(Json(ConversationResponse::new(id, snapshot)))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let existed = state.orchestrator.clear(&id).await.map_err(|e| {
        tracing::error!(conv_id = %id, error = %e, "Clear failed");
        AppError::Internal("Something went wrong".to_string())
    })?;
    if !existed {
        return Err(AppError::NotFound("Conversation not found".to_string()));
    }
    Ok(Json(DeleteResponse { success: true }))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new(msg)),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::failed(msg),
            ),
        };

        (status, Json(body)).into_response()
    }
}
