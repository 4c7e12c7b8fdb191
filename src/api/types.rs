//! API request and response types

use crate::store::{ChatMessage, ConversationSnapshot, Escalation, EscalationStatus};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONVERSATION_ID: &str = "default";

/// Request to send a chat message
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    pub conversation_id: Option<String>,
}

/// Response for a chat message
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Request to start an escalation explicitly
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
    pub conversation_id: String,
    pub workflow_execution_id: String,
}

/// Returned when the conversation already has an active escalation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlreadyStartedResponse {
    pub message: String,
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub agent_initialized: bool,
}

/// Escalation record with its derived status
#[derive(Debug, Serialize)]
pub struct EscalationView {
    #[serde(flatten)]
    pub record: Escalation,
    pub status: EscalationStatus,
}

impl From<Escalation> for EscalationView {
    fn from(record: Escalation) -> Self {
        let status = record.status();
        Self { record, status }
    }
}

/// Conversation state for clients catching up after a reconnect
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
    pub escalation: Option<EscalationView>,
    pub past_escalations: Vec<EscalationView>,
    pub contact_email: Option<String>,
    pub awaiting_email: bool,
}

impl ConversationResponse {
    pub fn new(conversation_id: String, snapshot: ConversationSnapshot) -> Self {
        Self {
            conversation_id,
            messages: snapshot.messages,
            escalation: snapshot.escalation.map(EscalationView::from),
            past_escalations: snapshot
                .past_escalations
                .into_iter()
                .map(EscalationView::from)
                .collect(),
            contact_email: snapshot.contact_email,
            awaiting_email: snapshot.awaiting_email,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            success: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            success: Some(false),
        }
    }
}
