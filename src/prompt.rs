//! System prompt construction for the support agent
//!
//! The prompt pins the agent to the knowledge base and tells it when to hand
//! the conversation to the human support channel.

use crate::store::EscalationStatus;
use serde::Serialize;
use std::fmt::Write;

/// Name of the tool the agent calls to hand a conversation to a human
pub const ESCALATE_TOOL_NAME: &str = "escalate_to_support";

/// Store facts the agent may rely on
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    pub name: String,
    pub domain: String,
    pub support_hours: String,
    pub return_policy: String,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            name: "Acme Electronics".to_string(),
            domain: "acme.com".to_string(),
            support_hours: "9am - 6pm IST".to_string(),
            return_policy: "30 days no-questions return policy".to_string(),
        }
    }
}

const INSTRUCTIONS: &str = r"Instructions:
- Answer only from the knowledge base. If the answer is not there, say so briefly.
- If the user asks to talk to a person, asks for a replacement or refund, or the problem needs a human, call the escalate_to_support tool with the user's request in their own words.
- Keep replies short and friendly.";

/// Build the system prompt for a conversation
pub fn build_system_prompt(kb: &KnowledgeBase) -> String {
    let kb_json = serde_json::to_string_pretty(&serde_json::json!({ "store": kb }))
        .unwrap_or_default();

    let mut prompt = format!(
        "You are a customer service agent for {} ({}).\nOnly use the information provided in the Knowledge Base (KB) JSON below.\n\nKnowledge Base (KB):\n{kb_json}\n\n",
        kb.name, kb.domain
    );
    prompt.push_str(INSTRUCTIONS);
    prompt
}

/// Describe the escalation state so the agent doesn't escalate twice
pub fn escalation_note(status: Option<EscalationStatus>, contact_email: Option<&str>) -> String {
    let mut note = String::from("Support status: ");
    match status {
        None => note.push_str("not escalated."),
        Some(EscalationStatus::Resolved) => {
            note.push_str("a previous request was resolved by the support team.");
        }
        Some(status) => {
            let _ = write!(note, "escalated to the support team ({}).", status.as_str());
        }
    }
    if let Some(email) = contact_email {
        let _ = write!(note, " Updates go to {email}.");
    }
    note
}
