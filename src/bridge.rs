//! Workflow provider bridge
//!
//! Thin adapter between orchestration intents and the external workflow /
//! notification provider. Every method maps to exactly one outbound request.

mod error;
mod siren;

pub use error::BridgeError;
pub use siren::SirenBridge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Request to start an escalation workflow for a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPayload {
    pub conversation_id: String,
    /// First user query, if the escalation came from the agent
    pub query: Option<String>,
}

/// Result of a successful escalation start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    pub workflow_execution_id: String,
}

/// A message for the human channel thread bound to a workflow execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPost {
    pub workflow_execution_id: String,
    /// Channel thread (chat node) once known; the provider default otherwise
    pub channel_thread_id: Option<String>,
    pub body: String,
}

/// Acknowledgement returned by the provider for a delivered message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

/// A reply posted on a channel thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadReply {
    pub text: String,
    pub thread_ts: String,
}

/// Outbound email sent through the provider's template engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub recipient: String,
    pub subject: String,
    pub content: String,
}

/// Outbound calls against the workflow provider
#[async_trait]
pub trait WorkflowBridge: Send + Sync {
    /// Trigger the escalation workflow. Fails with `ProviderUnavailable` when
    /// the provider is unreachable or returns no execution id.
    async fn start_escalation(
        &self,
        payload: &EscalationPayload,
    ) -> Result<StartReceipt, BridgeError>;

    /// Post a message on the human channel
    async fn post_to_channel(&self, post: &ChannelPost) -> Result<DeliveryReceipt, BridgeError>;

    /// Replies recorded for a provider notification, oldest first.
    /// Empty when nobody has replied yet.
    async fn fetch_thread_replies(
        &self,
        notification_id: &str,
    ) -> Result<Vec<ThreadReply>, BridgeError>;

    /// Send an email to the user
    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryReceipt, BridgeError>;
}

/// Logging wrapper for workflow bridges
pub struct LoggingBridge {
    inner: Arc<dyn WorkflowBridge>,
}

impl LoggingBridge {
    pub fn new(inner: Arc<dyn WorkflowBridge>) -> Self {
        Self { inner }
    }

    fn log<T>(call: &'static str, started: Instant, result: &Result<T, BridgeError>) {
        let duration_ms = started.elapsed().as_millis();
        match result {
            Ok(_) => tracing::info!(call, duration_ms = %duration_ms, "Provider call completed"),
            Err(e) => tracing::warn!(
                call,
                duration_ms = %duration_ms,
                error = %e,
                unavailable = e.is_unavailable(),
                "Provider call failed"
            ),
        }
    }
}

#[async_trait]
impl WorkflowBridge for LoggingBridge {
    async fn start_escalation(
        &self,
        payload: &EscalationPayload,
    ) -> Result<StartReceipt, BridgeError> {
        let started = Instant::now();
        let result = self.inner.start_escalation(payload).await;
        Self::log("start_escalation", started, &result);
        result
    }

    async fn post_to_channel(&self, post: &ChannelPost) -> Result<DeliveryReceipt, BridgeError> {
        let started = Instant::now();
        let result = self.inner.post_to_channel(post).await;
        Self::log("post_to_channel", started, &result);
        result
    }

    async fn fetch_thread_replies(
        &self,
        notification_id: &str,
    ) -> Result<Vec<ThreadReply>, BridgeError> {
        let started = Instant::now();
        let result = self.inner.fetch_thread_replies(notification_id).await;
        Self::log("fetch_thread_replies", started, &result);
        result
    }

    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryReceipt, BridgeError> {
        let started = Instant::now();
        let result = self.inner.send_email(email).await;
        Self::log("send_email", started, &result);
        result
    }
}
