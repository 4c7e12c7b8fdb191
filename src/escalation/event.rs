//! Events that advance an escalation

use crate::bridge::BridgeError;

/// Events that trigger escalation transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Decisions
    /// The agent or an explicit trigger asked for a human
    EscalationRequested { query: Option<String> },

    // Bridge results
    EscalationStarted {
        workflow_execution_id: String,
        query: Option<String>,
    },
    EscalationStartFailed {
        query: Option<String>,
        error: BridgeError,
    },
    /// Channel posts stopped at the first failure; `unsent` keeps the
    /// failed message and everything after it, in order
    ChannelPostFailed {
        workflow_execution_id: String,
        unsent: Vec<String>,
        error: BridgeError,
    },
    /// First reply fetched for a channel notification
    ThreadMessageTracked {
        workflow_execution_id: String,
        thread_ts: String,
        original_query: String,
    },
    /// Resolution email went out for a thread message
    MailDispatched {
        workflow_execution_id: String,
        thread_ts: String,
    },

    // User
    /// Message from the user while an escalation may be in flight
    UserFollowUp { text: String },

    // Provider webhooks
    ChannelStarted {
        workflow_execution_id: String,
        chat_node_id: Option<String>,
    },
    ChannelStatusReported {
        workflow_execution_id: String,
        notification_id: String,
    },
    ChannelReply {
        workflow_execution_id: String,
        thread_ts: String,
        text: String,
    },
}

impl Event {
    /// Short name for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Event::EscalationRequested { .. } => "escalation_requested",
            Event::EscalationStarted { .. } => "escalation_started",
            Event::EscalationStartFailed { .. } => "escalation_start_failed",
            Event::ChannelPostFailed { .. } => "channel_post_failed",
            Event::ThreadMessageTracked { .. } => "thread_message_tracked",
            Event::MailDispatched { .. } => "mail_dispatched",
            Event::UserFollowUp { .. } => "user_follow_up",
            Event::ChannelStarted { .. } => "channel_started",
            Event::ChannelStatusReported { .. } => "channel_status_reported",
            Event::ChannelReply { .. } => "channel_reply",
        }
    }
}
