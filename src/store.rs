//! In-memory conversation store
//!
//! Holds the message window and escalation record of every conversation,
//! plus the workflow index used to route provider webhooks back to a
//! conversation. All state lives for the lifetime of the process.

mod schema;

#[cfg(test)]
mod proptests;

pub use schema::*;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of messages kept per conversation
pub const DEFAULT_MAX_MESSAGES: usize = 20;

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<String, Conversation>,
    /// workflow execution id -> conversation key
    workflow_index: HashMap<String, String>,
}

/// Read-only copy of a conversation for API responses
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub messages: Vec<ChatMessage>,
    pub escalation: Option<Escalation>,
    pub past_escalations: Vec<Escalation>,
    pub contact_email: Option<String>,
    pub awaiting_email: bool,
}

/// Process-scoped conversation state, shared behind an `Arc`
pub struct ConversationStore {
    inner: Mutex<StoreInner>,
    max_messages: usize,
}

impl ConversationStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_messages: max_messages.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still guards consistent maps.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(dead_code)] // Used by tests and diagnostics
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    // ==================== Message Window ====================

    /// Append a message, creating the conversation if needed and evicting
    /// the oldest messages beyond the cap.
    pub fn append(&self, key: &str, role: Role, content: &str) {
        let mut inner = self.lock();
        let conv = inner.conversations.entry(key.to_string()).or_default();
        conv.messages.push_back(ChatMessage::new(role, content));
        while conv.messages.len() > self.max_messages {
            conv.messages.pop_front();
        }
    }

    /// Current message window in arrival order
    pub fn history(&self, key: &str) -> Vec<ChatMessage> {
        self.lock()
            .conversations
            .get(key)
            .map(|c| c.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[allow(dead_code)] // Used by tests and diagnostics
    pub fn message_count(&self, key: &str) -> usize {
        self.lock()
            .conversations
            .get(key)
            .map_or(0, |c| c.messages.len())
    }

    pub fn has_conversation(&self, key: &str) -> bool {
        self.lock().conversations.contains_key(key)
    }

    #[allow(dead_code)] // Used by tests and diagnostics
    pub fn conversation_ids(&self) -> Vec<String> {
        self.lock().conversations.keys().cloned().collect()
    }

    pub fn snapshot(&self, key: &str) -> Option<ConversationSnapshot> {
        self.lock()
            .conversations
            .get(key)
            .map(|c| ConversationSnapshot {
                messages: c.messages.iter().cloned().collect(),
                escalation: c.escalation.clone(),
                past_escalations: c.past_escalations.clone(),
                contact_email: c.contact_email.clone(),
                awaiting_email: c.awaiting_email,
            })
    }

    // ==================== Escalation Records ====================

    pub fn get_escalation(&self, key: &str) -> Option<Escalation> {
        self.lock()
            .conversations
            .get(key)
            .and_then(|c| c.escalation.clone())
    }

    /// Whether `key` has a pending or started escalation
    pub fn has_active_escalation(&self, key: &str) -> bool {
        self.lock()
            .conversations
            .get(key)
            .is_some_and(|c| c.active_escalation().is_some())
    }

    /// Replace the escalation record.
    ///
    /// A record for a different workflow execution supersedes the current
    /// one: the old record moves to `past_escalations` and its index entry
    /// is dropped.
    pub fn set_escalation(&self, key: &str, escalation: Escalation) {
        let mut inner = self.lock();
        Self::replace_escalation(&mut inner, key, escalation);
    }

    /// Install a freshly started escalation and index its workflow id under
    /// one lock, so webhook routing never sees a half-written entry.
    pub fn begin_escalation(&self, key: &str, escalation: Escalation) {
        let mut inner = self.lock();
        let workflow_id = escalation.workflow_execution_id.clone();
        Self::replace_escalation(&mut inner, key, escalation);
        inner.workflow_index.insert(workflow_id, key.to_string());
    }

    fn replace_escalation(inner: &mut StoreInner, key: &str, escalation: Escalation) {
        let conv = inner.conversations.entry(key.to_string()).or_default();
        let superseded = match conv.escalation.take() {
            Some(prev) if prev.workflow_execution_id != escalation.workflow_execution_id => {
                let prev_id = prev.workflow_execution_id.clone();
                conv.past_escalations.push(prev);
                Some(prev_id)
            }
            _ => None,
        };
        conv.escalation = Some(escalation);
        if let Some(prev_id) = superseded {
            if inner.workflow_index.get(&prev_id).map(String::as_str) == Some(key) {
                inner.workflow_index.remove(&prev_id);
            }
        }
    }

    #[allow(dead_code)] // Index writes normally go through begin_escalation
    pub fn index_workflow(&self, workflow_execution_id: &str, key: &str) {
        self.lock()
            .workflow_index
            .insert(workflow_execution_id.to_string(), key.to_string());
    }

    pub fn resolve_conversation(&self, workflow_execution_id: &str) -> Option<String> {
        self.lock().workflow_index.get(workflow_execution_id).cloned()
    }

    // ==================== Contact Details ====================

    /// Record the user's contact address on the conversation and on its
    /// current escalation record, if any.
    pub fn set_contact_email(&self, key: &str, email: &str) {
        let mut inner = self.lock();
        let conv = inner.conversations.entry(key.to_string()).or_default();
        conv.contact_email = Some(email.to_string());
        conv.awaiting_email = false;
        if let Some(esc) = conv.escalation.as_mut() {
            esc.contact_email = Some(email.to_string());
        }
    }

    pub fn contact_email(&self, key: &str) -> Option<String> {
        self.lock()
            .conversations
            .get(key)
            .and_then(|c| c.contact_email.clone())
    }

    pub fn set_awaiting_email(&self, key: &str, awaiting: bool) {
        let mut inner = self.lock();
        inner
            .conversations
            .entry(key.to_string())
            .or_default()
            .awaiting_email = awaiting;
    }

    pub fn is_awaiting_email(&self, key: &str) -> bool {
        self.lock()
            .conversations
            .get(key)
            .is_some_and(|c| c.awaiting_email)
    }

    // ==================== Deferred Escalations ====================

    pub fn set_deferred_escalation(&self, key: &str, query: &str) {
        let mut inner = self.lock();
        inner
            .conversations
            .entry(key.to_string())
            .or_default()
            .deferred_escalation = Some(query.to_string());
    }

    pub fn take_deferred_escalation(&self, key: &str) -> Option<String> {
        self.lock()
            .conversations
            .get_mut(key)
            .and_then(|c| c.deferred_escalation.take())
    }

    // ==================== Lifecycle ====================

    /// Remove a conversation and every workflow index entry pointing at it.
    /// Returns whether the conversation existed.
    pub fn clear(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let existed = inner.conversations.remove(key).is_some();
        inner.workflow_index.retain(|_, conv_key| conv_key != key);
        existed
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}
