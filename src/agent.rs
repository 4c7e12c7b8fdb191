//! Support agent capability
//!
//! The orchestrator treats the agent as a black box: given the conversation
//! window it returns a reply, optionally carrying a decision to escalate.

use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmService, ToolDefinition};
use crate::prompt::{build_system_prompt, escalation_note, KnowledgeBase, ESCALATE_TOOL_NAME};
use crate::store::{ChatMessage, EscalationStatus, Role};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const REPLY_MAX_TOKENS: u32 = 1024;
const TEXT_MAX_TOKENS: u32 = 512;

/// Reply used when the model escalates without saying anything
pub const DEFAULT_ESCALATION_REPLY: &str =
    "I've passed your request to our support team. Someone will get back to you shortly.";

/// Everything the agent sees for one turn
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub conversation_id: String,
    /// Conversation window, ending with the current user message
    pub history: Vec<ChatMessage>,
    pub escalation: Option<EscalationStatus>,
    pub contact_email: Option<String>,
}

/// Agent output for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    /// Query to hand to the support team, when the agent decided to escalate
    pub escalation: Option<String>,
}

impl AgentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            escalation: None,
        }
    }

    pub fn escalate(text: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            escalation: Some(query.into()),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("agent is not configured")]
    NotConfigured,
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent failure: {0}")]
    Failure(#[from] LlmError),
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce the reply for the latest user message
    async fn generate_reply(&self, context: &PromptContext) -> Result<AgentReply, AgentError>;

    /// Free-form completion of a single prompt
    async fn generate_text(&self, prompt: &str) -> Result<String, AgentError>;

    /// Whether the agent can serve requests
    fn is_ready(&self) -> bool;
}

/// Agent backed by an LLM service
pub struct LlmAgent {
    service: Option<Arc<dyn LlmService>>,
    knowledge_base: KnowledgeBase,
}

impl LlmAgent {
    pub fn new(service: Option<Arc<dyn LlmService>>, knowledge_base: KnowledgeBase) -> Self {
        Self {
            service,
            knowledge_base,
        }
    }

    fn service(&self) -> Result<&Arc<dyn LlmService>, AgentError> {
        self.service.as_ref().ok_or(AgentError::NotConfigured)
    }

    fn escalate_tool() -> ToolDefinition {
        ToolDefinition {
            name: ESCALATE_TOOL_NAME.to_string(),
            description: "Hand the conversation to the human customer support team. \
                          Pass the user's request in their own words."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The user's request for the support team"
                    }
                },
                "required": ["message"]
            }),
        }
    }

    fn build_request(&self, context: &PromptContext) -> LlmRequest {
        let messages = context
            .history
            .iter()
            .map(|m| match m.role {
                Role::User => LlmMessage::user(&m.content),
                Role::Assistant => LlmMessage::assistant(&m.content),
            })
            .collect();

        LlmRequest {
            system: vec![
                build_system_prompt(&self.knowledge_base),
                escalation_note(context.escalation, context.contact_email.as_deref()),
            ],
            messages,
            tools: vec![Self::escalate_tool()],
            max_tokens: Some(REPLY_MAX_TOKENS),
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    async fn generate_reply(&self, context: &PromptContext) -> Result<AgentReply, AgentError> {
        let service = self.service()?;
        let request = self.build_request(context);
        let response = service.complete(&request).await?;

        let text = response.text().trim().to_string();
        let escalation = response
            .tool_uses()
            .into_iter()
            .find(|(name, _)| *name == ESCALATE_TOOL_NAME)
            .map(|(_, input)| {
                input
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .or_else(|| last_user_message(&context.history))
                    .unwrap_or_default()
            });

        tracing::debug!(
            conv_id = %context.conversation_id,
            escalate = escalation.is_some(),
            "Agent produced reply"
        );

        Ok(match escalation {
            Some(query) if text.is_empty() => AgentReply::escalate(DEFAULT_ESCALATION_REPLY, query),
            Some(query) => AgentReply::escalate(text, query),
            None => AgentReply::text(text),
        })
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, AgentError> {
        let service = self.service()?;
        let response = service
            .complete(&LlmRequest::prompt(prompt, TEXT_MAX_TOKENS))
            .await?;
        Ok(response.text())
    }

    fn is_ready(&self) -> bool {
        self.service.is_some()
    }
}

fn last_user_message(history: &[ChatMessage]) -> Option<String> {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
}
