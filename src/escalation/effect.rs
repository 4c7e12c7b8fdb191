//! Effects produced by escalation transitions

/// Notice pushed to the user when the support team answers a thread
pub const RESOLUTION_NOTICE: &str =
    "Your query has been resolved. Please check your email for the solution.";

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Trigger the provider workflow
    StartEscalation { query: Option<String> },

    /// Post messages on the channel in order, stopping at the first failure
    PostToChannel {
        workflow_execution_id: String,
        channel_thread_id: Option<String>,
        texts: Vec<String>,
    },

    /// Fetch replies for a channel notification and track the first one
    FetchThreadReplies {
        workflow_execution_id: String,
        notification_id: String,
    },

    /// Append to the conversation and push to the connected client
    NotifyUser { content: String, is_support: bool },

    /// Compose the resolution email and send it when a recipient is known
    ComposeAndMail {
        workflow_execution_id: String,
        thread_ts: String,
        original_query: String,
        reply_text: String,
        recipient: Option<String>,
    },

    /// Keep the query for a retry on the next user message
    DeferEscalation { query: String },

    /// Ask the user for an address to send updates to
    RequestContactEmail,
}

impl Effect {
    pub fn resolution_notice() -> Self {
        Effect::NotifyUser {
            content: RESOLUTION_NOTICE.to_string(),
            is_support: true,
        }
    }
}
