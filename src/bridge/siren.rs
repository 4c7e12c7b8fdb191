//! Siren workflow provider implementation

use super::{
    BridgeError, ChannelPost, DeliveryReceipt, EmailMessage, EscalationPayload, StartReceipt,
    ThreadReply, WorkflowBridge,
};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const EMAIL_CHANNEL: &str = "EMAIL";

/// HTTP client for the Siren REST API
pub struct SirenBridge {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    workflow_name: String,
    slack_channel: Option<String>,
    chat_node_id: Option<String>,
    email_template: String,
}

impl SirenBridge {
    pub fn new(config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url: format!("{}/api", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            workflow_name: config.workflow_name.clone(),
            slack_channel: config.slack_channel.clone(),
            chat_node_id: config.chat_node_id.clone(),
            email_template: config.email_template.clone(),
        })
    }

    async fn call<B, R>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<R, BridgeError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{endpoint}", self.base_url);
        tracing::debug!(%method, %url, "Calling workflow provider");

        let mut request = self.client.request(method, &url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::from_transport(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BridgeError::unavailable(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<SirenErrorBody>(&text)
                .ok()
                .and_then(SirenErrorBody::message)
                .unwrap_or(text);
            return Err(BridgeError::from_status(status.as_u16(), &message));
        }

        // Some endpoints answer 2xx with an empty body
        let text = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(text).map_err(|e| {
            BridgeError::unavailable(format!("Failed to parse provider response: {e}"))
        })
    }
}

#[async_trait]
impl WorkflowBridge for SirenBridge {
    async fn start_escalation(
        &self,
        payload: &EscalationPayload,
    ) -> Result<StartReceipt, BridgeError> {
        let request = TriggerWorkflowRequest {
            workflow_name: &self.workflow_name,
            data: json!({
                "conversationId": payload.conversation_id,
                "query": payload.query,
            }),
            notify: self
                .slack_channel
                .as_deref()
                .map(|slack| TriggerNotify { slack }),
        };

        let response: Envelope<TriggerWorkflowData> = self
            .call(Method::POST, "/v2/workflows/trigger", Some(&request))
            .await?;

        response
            .data
            .and_then(|d| d.workflow_execution_id)
            .filter(|id| !id.is_empty())
            .map(|workflow_execution_id| StartReceipt {
                workflow_execution_id,
            })
            .ok_or_else(|| BridgeError::unavailable("Workflow trigger returned no execution id"))
    }

    async fn post_to_channel(&self, post: &ChannelPost) -> Result<DeliveryReceipt, BridgeError> {
        let chat_node_id = post
            .channel_thread_id
            .as_deref()
            .or(self.chat_node_id.as_deref())
            .unwrap_or_default();

        let request = ChatMessageRequest {
            chat_node_id,
            workflow_execution_id: &post.workflow_execution_id,
            body: &post.body,
            subject: "",
            buttons: Vec::new(),
        };

        let response: Envelope<Value> = self
            .call(Method::POST, "/v1/chat/message", Some(&request))
            .await?;
        Ok(response.receipt())
    }

    async fn fetch_thread_replies(
        &self,
        notification_id: &str,
    ) -> Result<Vec<ThreadReply>, BridgeError> {
        let endpoint = format!("/v1/public/send-messages/{notification_id}/replies");
        let response: Envelope<Vec<SirenReply>> =
            self.call::<Value, _>(Method::GET, &endpoint, None).await?;

        Ok(response
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(SirenReply::into_thread_reply)
            .collect())
    }

    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryReceipt, BridgeError> {
        let request = SendMessageRequest {
            recipient_value: &email.recipient,
            channel: EMAIL_CHANNEL,
            template_name: &self.email_template,
            template_variables: json!({
                "subject": email.subject,
                "content": email.content,
            }),
        };

        let response: Envelope<Value> = self
            .call(Method::POST, "/v1/public/send-messages", Some(&request))
            .await?;
        Ok(response.receipt())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerWorkflowRequest<'a> {
    workflow_name: &'a str,
    data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    notify: Option<TriggerNotify<'a>>,
}

#[derive(Debug, Serialize)]
struct TriggerNotify<'a> {
    slack: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerWorkflowData {
    workflow_execution_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessageRequest<'a> {
    chat_node_id: &'a str,
    workflow_execution_id: &'a str,
    body: &'a str,
    subject: &'a str,
    buttons: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    recipient_value: &'a str,
    channel: &'a str,
    template_name: &'a str,
    template_variables: Value,
}

/// Provider responses wrap their payload in `data`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

impl Envelope<Value> {
    fn receipt(&self) -> DeliveryReceipt {
        let message_id = self.data.as_ref().and_then(|d| {
            ["notificationId", "messageId", "id"]
                .iter()
                .find_map(|k| d.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        });
        DeliveryReceipt { message_id }
    }
}

/// A thread message as the chat platform reports it. Replies carry both
/// their own `ts` and the parent's `thread_ts`; `ts` identifies the entry.
#[derive(Debug, Deserialize)]
struct SirenReply {
    text: Option<String>,
    ts: Option<String>,
    #[serde(alias = "threadTs")]
    thread_ts: Option<String>,
}

impl SirenReply {
    fn into_thread_reply(self) -> Option<ThreadReply> {
        Some(ThreadReply {
            text: self.text.unwrap_or_default(),
            thread_ts: self.ts.or(self.thread_ts)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SirenErrorBody {
    error: Option<Value>,
    message: Option<String>,
}

impl SirenErrorBody {
    fn message(self) -> Option<String> {
        match self.error {
            Some(Value::String(s)) => Some(s),
            Some(Value::Object(obj)) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => self.message,
        }
    }
}
