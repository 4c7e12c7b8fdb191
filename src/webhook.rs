//! Provider webhook ingress
//!
//! Callbacks arrive in any order and are always acknowledged. Each one is
//! classified, routed to its conversation through the workflow index, and
//! handed to the orchestrator as an escalation event.

use crate::escalation::{Event, Outcome};
use crate::runtime::{Orchestrator, RuntimeError};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

const INBOUND_MESSAGE: &str = "INBOUND_MESSAGE";
const NOTIFICATION_STATUS: &str = "NOTIFICATION_STATUS";
const CHAT_STARTED: &str = "CHAT_STARTED";
const SLACK_CHANNEL: &str = "SLACK";

/// Webhook body as sent by the provider. Every field is optional, and a
/// field of an unexpected type reads as absent without affecting the others.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWebhook {
    #[serde(default, deserialize_with = "lenient")]
    pub webhook_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<RawMessage>,
    #[serde(default, deserialize_with = "lenient")]
    pub chat_data: Option<RawChatData>,
    #[serde(default, deserialize_with = "lenient")]
    pub notification_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub workflow_execution_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub channel: Option<String>,
}

/// Channel message fields, named as the chat platform names them
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
    #[serde(default, alias = "threadTs", deserialize_with = "lenient")]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChatData {
    #[serde(default, deserialize_with = "lenient")]
    pub workflow_execution_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub chat_node_id: Option<String>,
}

impl RawWebhook {
    /// Read a webhook body. Only a non-object body is rejected.
    pub fn from_json(body: Value) -> Option<Self> {
        if !body.is_object() {
            return None;
        }
        match serde_json::from_value(body) {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable webhook fields");
                Some(Self::default())
            }
        }
    }
}

/// Deserialize a field, reading a value of the wrong type as `None`
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Classified webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// A human replied on a channel thread
    ChannelInboundMessage {
        workflow_execution_id: String,
        thread_ts: String,
        text: String,
    },
    /// A message was delivered on the channel
    ChannelStatus {
        workflow_execution_id: String,
        notification_id: String,
    },
    /// The chat session started
    SessionStatus {
        workflow_execution_id: String,
        chat_node_id: Option<String>,
    },
    Unknown,
}

impl WebhookEvent {
    pub fn classify(raw: &RawWebhook) -> Self {
        let chat_workflow = raw
            .chat_data
            .as_ref()
            .and_then(|c| c.workflow_execution_id.clone());
        let Some(workflow_execution_id) = raw
            .workflow_execution_id
            .clone()
            .or_else(|| chat_workflow.clone())
        else {
            return WebhookEvent::Unknown;
        };

        if raw.webhook_type.as_deref() == Some(INBOUND_MESSAGE) && chat_workflow.is_some() {
            let message = raw.message.as_ref();
            let thread_ts = message.and_then(|m| m.thread_ts.clone());
            let text = message.and_then(|m| m.text.clone());
            return match (thread_ts, text) {
                (Some(thread_ts), Some(text)) => WebhookEvent::ChannelInboundMessage {
                    workflow_execution_id,
                    thread_ts,
                    text,
                },
                _ => WebhookEvent::Unknown,
            };
        }

        if raw.webhook_type.as_deref() == Some(NOTIFICATION_STATUS)
            && raw.channel.as_deref() == Some(SLACK_CHANNEL)
        {
            if let Some(notification_id) = raw.notification_id.clone() {
                return WebhookEvent::ChannelStatus {
                    workflow_execution_id,
                    notification_id,
                };
            }
        }

        if raw.status.as_deref() == Some(CHAT_STARTED) && chat_workflow.is_some() {
            return WebhookEvent::SessionStatus {
                workflow_execution_id,
                chat_node_id: raw.chat_data.as_ref().and_then(|c| c.chat_node_id.clone()),
            };
        }

        WebhookEvent::Unknown
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::ChannelInboundMessage { .. } => "channel_inbound_message",
            WebhookEvent::ChannelStatus { .. } => "channel_status",
            WebhookEvent::SessionStatus { .. } => "session_status",
            WebhookEvent::Unknown => "unknown",
        }
    }

    /// Correlation id and the escalation event this webhook drives
    fn into_escalation_event(self) -> Option<(String, Event)> {
        match self {
            WebhookEvent::ChannelInboundMessage {
                workflow_execution_id,
                thread_ts,
                text,
            } => Some((
                workflow_execution_id.clone(),
                Event::ChannelReply {
                    workflow_execution_id,
                    thread_ts,
                    text,
                },
            )),
            WebhookEvent::ChannelStatus {
                workflow_execution_id,
                notification_id,
            } => Some((
                workflow_execution_id.clone(),
                Event::ChannelStatusReported {
                    workflow_execution_id,
                    notification_id,
                },
            )),
            WebhookEvent::SessionStatus {
                workflow_execution_id,
                chat_node_id,
            } => Some((
                workflow_execution_id.clone(),
                Event::ChannelStarted {
                    workflow_execution_id,
                    chat_node_id,
                },
            )),
            WebhookEvent::Unknown => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("no conversation for workflow {0}")]
    UnmatchedWorkflow(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Acknowledgement returned to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub kind: &'static str,
    /// Outcomes produced, empty when the webhook was ignored
    pub outcomes: Vec<Outcome>,
}

pub struct WebhookIngress {
    orchestrator: Arc<Orchestrator>,
}

impl WebhookIngress {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Handle one webhook. Never fails; problems are logged.
    pub async fn handle(&self, raw: RawWebhook) -> Ack {
        let event = WebhookEvent::classify(&raw);
        let kind = event.kind();

        let outcomes = match self.dispatch(event).await {
            Ok(outcomes) => outcomes,
            Err(IngressError::UnmatchedWorkflow(id)) => {
                tracing::warn!(kind, workflow_execution_id = %id, "Unmatched webhook dropped");
                Vec::new()
            }
            Err(IngressError::Runtime(RuntimeError::Rejected(e))) => {
                tracing::info!(kind, reason = %e, "Webhook ignored");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(kind, error = %e, "Webhook handling failed");
                Vec::new()
            }
        };

        Ack { kind, outcomes }
    }

    async fn dispatch(&self, event: WebhookEvent) -> Result<Vec<Outcome>, IngressError> {
        let Some((workflow_execution_id, event)) = event.into_escalation_event() else {
            tracing::debug!("Unclassified webhook acknowledged");
            return Ok(Vec::new());
        };

        let key = self
            .orchestrator
            .store()
            .resolve_conversation(&workflow_execution_id)
            .ok_or(IngressError::UnmatchedWorkflow(workflow_execution_id))?;

        Ok(self.orchestrator.apply(&key, event).await?)
    }
}
