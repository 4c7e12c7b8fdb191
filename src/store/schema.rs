//! Conversation and escalation record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who authored a message in the conversation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Stored channel status of an escalation record.
///
/// `resolved` is never stored; see [`Escalation::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Workflow triggered, human channel not confirmed yet
    Pending,
    /// Provider confirmed the human channel started
    Started,
}

/// Externally visible escalation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Started,
    Resolved,
}

impl EscalationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::Started => "started",
            EscalationStatus::Resolved => "resolved",
        }
    }
}

/// A channel message awaiting a human reply, keyed by the provider's thread timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingThreadMessage {
    pub thread_ts: String,
    pub original_query: String,
    pub mail_sent: bool,
}

/// Escalation of one conversation to the human-staffed channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub workflow_execution_id: String,
    pub channel_thread_id: Option<String>,
    pub channel_status: ChannelStatus,
    pub contact_email: Option<String>,
    pub pending_thread_messages: Vec<PendingThreadMessage>,
    /// User messages waiting for the channel to (re)start, oldest first
    pub queued_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(workflow_execution_id: impl Into<String>, contact_email: Option<String>) -> Self {
        Self {
            workflow_execution_id: workflow_execution_id.into(),
            channel_thread_id: None,
            channel_status: ChannelStatus::Pending,
            contact_email,
            pending_thread_messages: Vec::new(),
            queued_messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Derived status: a started escalation whose tracked thread messages
    /// have all been mailed out is resolved.
    pub fn status(&self) -> EscalationStatus {
        match self.channel_status {
            ChannelStatus::Pending => EscalationStatus::Pending,
            ChannelStatus::Started
                if !self.pending_thread_messages.is_empty()
                    && self.pending_thread_messages.iter().all(|m| m.mail_sent) =>
            {
                EscalationStatus::Resolved
            }
            ChannelStatus::Started => EscalationStatus::Started,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() != EscalationStatus::Resolved
    }

    pub fn thread_message(&self, thread_ts: &str) -> Option<&PendingThreadMessage> {
        self.pending_thread_messages
            .iter()
            .find(|m| m.thread_ts == thread_ts)
    }

    /// Track a channel message. Returns false if the timestamp is already tracked.
    pub fn track_thread_message(&mut self, thread_ts: &str, original_query: &str) -> bool {
        if self.thread_message(thread_ts).is_some() {
            return false;
        }
        self.pending_thread_messages.push(PendingThreadMessage {
            thread_ts: thread_ts.to_string(),
            original_query: original_query.to_string(),
            mail_sent: false,
        });
        true
    }

    /// Replace the entry for `thread_ts` with a `mail_sent` copy.
    ///
    /// Remove and re-insert happen on the same `&mut`, so no reader sees both
    /// or neither.
    pub fn mark_mail_sent(&mut self, thread_ts: &str) -> bool {
        let Some(pos) = self
            .pending_thread_messages
            .iter()
            .position(|m| m.thread_ts == thread_ts)
        else {
            return false;
        };
        let mut entry = self.pending_thread_messages.remove(pos);
        entry.mail_sent = true;
        self.pending_thread_messages.push(entry);
        true
    }
}

/// In-memory conversation record
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub messages: VecDeque<ChatMessage>,
    pub escalation: Option<Escalation>,
    /// Records replaced by a later escalation, oldest first
    pub past_escalations: Vec<Escalation>,
    pub contact_email: Option<String>,
    pub awaiting_email: bool,
    /// Escalation query whose start failed and should be retried
    pub deferred_escalation: Option<String>,
}

impl Conversation {
    pub fn active_escalation(&self) -> Option<&Escalation> {
        self.escalation.as_ref().filter(|e| e.is_active())
    }
}
