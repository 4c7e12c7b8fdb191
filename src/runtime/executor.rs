//! Per-conversation worker
//!
//! Runs the chat flow and the escalation transition loop for one key.
//! Effects that produce follow-up events are fed back in until the loop
//! settles.

use super::{ChatReply, Services, TriggerOutcome};
use crate::agent::{AgentError, PromptContext};
use crate::bridge::{BridgeError, ChannelPost, EmailMessage, EscalationPayload};
use crate::escalation::{
    transition, Effect, EscalationContext, Event, Outcome, RecordChange, TransitionError,
};
use crate::mail_composer::compose_resolution_mail;
use crate::notifier::PushEvent;
use crate::store::Role;
use regex::Regex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const EMAIL_VALIDATION_PROMPT: &str = "Please share a valid email address (for example: name@example.com) so our support team can follow up.";
pub const AGENT_ERROR_REPLY: &str = "I apologize, but I encountered an error while processing your request. Please try again.";
pub const EMAIL_REQUEST: &str =
    "Please share your email address so our support team can send you updates.";
pub const RELAY_ACK: &str = "Your message has been shared with our support team.";
pub const START_DEFERRED_NOTICE: &str =
    "I couldn't reach our support team just now. I'll try again with your next message.";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("valid email regex")
    })
}

/// First email address in `text`, if any
pub fn extract_email(text: &str) -> Option<&str> {
    email_regex().find(text).map(|m| m.as_str())
}

pub fn email_ack(email: &str) -> String {
    format!("Thanks! We'll send updates to {email}.")
}

/// Work accepted by a conversation worker
pub enum Command {
    Chat {
        text: String,
        reply: oneshot::Sender<ChatReply>,
    },
    Apply {
        event: Event,
        reply: oneshot::Sender<Result<Vec<Outcome>, TransitionError>>,
    },
    Trigger {
        reply: oneshot::Sender<TriggerOutcome>,
    },
    Clear {
        reply: oneshot::Sender<bool>,
    },
}

pub struct ConversationWorker {
    key: String,
    services: Arc<Services>,
    rx: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
}

impl ConversationWorker {
    pub fn new(
        key: String,
        services: Arc<Services>,
        rx: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key,
            services,
            rx,
            shutdown,
        }
    }

    /// Process commands until shutdown or retirement. A retiring worker
    /// closes its queue and finishes what it already accepted.
    pub async fn run(mut self, predecessor: Option<JoinHandle<()>>) {
        if let Some(previous) = predecessor {
            let _ = previous.await;
        }
        tracing::debug!(conv_id = %self.key, "Starting conversation worker");

        let idle = self.services.settings.worker_idle_timeout;
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                command = timeout(idle, self.rx.recv()) => match command {
                    Ok(Some(command)) => {
                        if matches!(command, Command::Clear { .. }) {
                            self.retire("cleared");
                        }
                        self.handle(command).await;
                    }
                    Ok(None) => break,
                    Err(_) => self.retire("idle"),
                },
            }
        }

        tracing::debug!(conv_id = %self.key, "Conversation worker stopped");
    }

    fn retire(&mut self, reason: &'static str) {
        tracing::debug!(conv_id = %self.key, reason, "Retiring conversation worker");
        self.rx.close();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Chat { text, reply } => {
                let result = self.chat(&text).await;
                let _ = reply.send(result);
            }
            Command::Apply { event, reply } => {
                let result = self.process_event(event).await;
                let _ = reply.send(result);
            }
            Command::Trigger { reply } => {
                let result = self.trigger().await;
                let _ = reply.send(result);
            }
            Command::Clear { reply } => {
                let existed = self.services.store.clear(&self.key);
                tracing::info!(conv_id = %self.key, existed, "Conversation cleared");
                let _ = reply.send(existed);
            }
        }
    }

    // ==================== Chat Flow ====================

    async fn chat(&mut self, text: &str) -> ChatReply {
        let store = Arc::clone(&self.services.store);

        if let Some(email) = extract_email(text) {
            store.set_contact_email(&self.key, email);
            let ack = email_ack(email);
            store.append(&self.key, Role::Assistant, &ack);
            tracing::info!(conv_id = %self.key, "Contact email captured");
            return ChatReply {
                email: Some(email.to_string()),
                ..ChatReply::ok(ack)
            };
        }

        if store.is_awaiting_email(&self.key) {
            return ChatReply {
                success: false,
                ..ChatReply::ok(EMAIL_VALIDATION_PROMPT)
            };
        }

        store.append(&self.key, Role::User, text);

        if let Some(query) = store.take_deferred_escalation(&self.key) {
            tracing::info!(conv_id = %self.key, "Retrying deferred escalation");
            if let Err(e) = self
                .process_event(Event::EscalationRequested { query: Some(query) })
                .await
            {
                tracing::debug!(conv_id = %self.key, error = %e, "Deferred escalation not started");
            }
        }

        if store.has_active_escalation(&self.key) {
            return match self
                .process_event(Event::UserFollowUp {
                    text: text.to_string(),
                })
                .await
            {
                Ok(_) => {
                    store.append(&self.key, Role::Assistant, RELAY_ACK);
                    ChatReply::ok(RELAY_ACK)
                }
                Err(e) => {
                    tracing::error!(conv_id = %self.key, error = %e, "Follow-up rejected");
                    ChatReply {
                        success: false,
                        error: Some(e.to_string()),
                        ..ChatReply::ok(AGENT_ERROR_REPLY)
                    }
                }
            };
        }

        self.agent_turn().await
    }

    async fn agent_turn(&mut self) -> ChatReply {
        let store = Arc::clone(&self.services.store);
        let context = PromptContext {
            conversation_id: self.key.clone(),
            history: store.history(&self.key),
            escalation: store.get_escalation(&self.key).map(|e| e.status()),
            contact_email: store.contact_email(&self.key),
        };

        let limit = self.services.settings.agent_timeout;
        let reply = match timeout(limit, self.services.agent.generate_reply(&context)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(limit)),
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(conv_id = %self.key, error = %e, "Agent failed");
                return ChatReply {
                    success: false,
                    error: Some(e.to_string()),
                    ..ChatReply::ok(AGENT_ERROR_REPLY)
                };
            }
        };

        let mut response = reply.text;
        if let Some(query) = reply.escalation {
            match self
                .process_event(Event::EscalationRequested { query: Some(query) })
                .await
            {
                Ok(outcomes) => {
                    if outcomes.iter().any(|o| matches!(o, Outcome::StartFailed(_))) {
                        response = format!("{response}\n\n{START_DEFERRED_NOTICE}");
                    } else if store.is_awaiting_email(&self.key) {
                        response = format!("{response}\n\n{EMAIL_REQUEST}");
                    }
                }
                Err(e) => {
                    tracing::debug!(conv_id = %self.key, error = %e, "Escalation not started");
                }
            }
        }

        store.append(&self.key, Role::Assistant, &response);
        ChatReply::ok(response)
    }

    async fn trigger(&mut self) -> TriggerOutcome {
        match self
            .process_event(Event::EscalationRequested { query: None })
            .await
        {
            Err(e) => {
                tracing::info!(conv_id = %self.key, error = %e, "Trigger ignored");
                TriggerOutcome::AlreadyActive
            }
            Ok(outcomes) => {
                let mut result = TriggerOutcome::Failed(BridgeError::unavailable(
                    "escalation did not start",
                ));
                for outcome in outcomes {
                    match outcome {
                        Outcome::Started {
                            workflow_execution_id,
                        } => {
                            result = TriggerOutcome::Started {
                                workflow_execution_id,
                            };
                        }
                        Outcome::StartFailed(e) => result = TriggerOutcome::Failed(e),
                        _ => {}
                    }
                }
                if matches!(result, TriggerOutcome::Started { .. })
                    && self.services.store.is_awaiting_email(&self.key)
                {
                    self.notify_user(EMAIL_REQUEST, false);
                }
                result
            }
        }
    }

    // ==================== Transition Loop ====================

    /// Apply `event` and every event its effects produce.
    ///
    /// Only the rejection of `event` itself is returned; follow-up events
    /// that no longer apply are logged and skipped.
    async fn process_event(&mut self, event: Event) -> Result<Vec<Outcome>, TransitionError> {
        let mut outcomes = Vec::new();
        let mut events_to_process = VecDeque::from([event]);
        let mut first = true;

        while let Some(current) = events_to_process.pop_front() {
            let kind = current.kind();
            let record = self.services.store.get_escalation(&self.key);
            let context = EscalationContext {
                contact_email: self.services.store.contact_email(&self.key),
            };

            let result = match transition(record.as_ref(), &context, current) {
                Ok(result) => result,
                Err(e) if first => {
                    tracing::debug!(conv_id = %self.key, event = kind, error = %e, "Event ignored");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(conv_id = %self.key, event = kind, error = %e, "Follow-up event ignored");
                    continue;
                }
            };
            first = false;

            match result.change {
                RecordChange::Unchanged => {}
                RecordChange::Begin(esc) => {
                    tracing::info!(
                        conv_id = %self.key,
                        workflow_execution_id = %esc.workflow_execution_id,
                        "Escalation started"
                    );
                    self.services.store.begin_escalation(&self.key, esc);
                }
                RecordChange::Update(esc) => self.services.store.set_escalation(&self.key, esc),
            }
            tracing::debug!(conv_id = %self.key, event = kind, outcome = ?result.outcome, "Transition applied");
            outcomes.push(result.outcome);

            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect).await {
                    events_to_process.push_back(generated);
                }
            }
        }

        Ok(outcomes)
    }

    async fn provider_call<T, F>(&self, call: F) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, BridgeError>>,
    {
        let limit = self.services.settings.provider_timeout;
        timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(BridgeError::unavailable(format!("timed out after {limit:?}"))))
    }

    fn notify_user(&self, content: &str, is_support: bool) {
        self.services
            .store
            .append(&self.key, Role::Assistant, content);
        self.services
            .notifier
            .send(&self.key, PushEvent::new_message(content, is_support));
    }

    #[allow(clippy::too_many_lines)]
    async fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        let bridge = Arc::clone(&self.services.bridge);

        match effect {
            Effect::StartEscalation { query } => {
                let payload = EscalationPayload {
                    conversation_id: self.key.clone(),
                    query: query.clone(),
                };
                Some(
                    match self.provider_call(bridge.start_escalation(&payload)).await {
                        Ok(receipt) => Event::EscalationStarted {
                            workflow_execution_id: receipt.workflow_execution_id,
                            query,
                        },
                        Err(error) => Event::EscalationStartFailed { query, error },
                    },
                )
            }

            Effect::PostToChannel {
                workflow_execution_id,
                channel_thread_id,
                texts,
            } => {
                for (i, text) in texts.iter().enumerate() {
                    let post = ChannelPost {
                        workflow_execution_id: workflow_execution_id.clone(),
                        channel_thread_id: channel_thread_id.clone(),
                        body: text.clone(),
                    };
                    match self.provider_call(bridge.post_to_channel(&post)).await {
                        Ok(receipt) => {
                            tracing::debug!(conv_id = %self.key, message_id = ?receipt.message_id, "Posted to channel");
                        }
                        Err(error) => {
                            tracing::warn!(conv_id = %self.key, error = %error, "Channel post failed");
                            return Some(Event::ChannelPostFailed {
                                workflow_execution_id,
                                unsent: texts[i..].to_vec(),
                                error,
                            });
                        }
                    }
                }
                None
            }

            Effect::FetchThreadReplies {
                workflow_execution_id,
                notification_id,
            } => match self
                .provider_call(bridge.fetch_thread_replies(&notification_id))
                .await
            {
                Ok(replies) => {
                    let Some(first) = replies.into_iter().next() else {
                        tracing::debug!(conv_id = %self.key, %notification_id, "No replies yet");
                        return None;
                    };
                    Some(Event::ThreadMessageTracked {
                        workflow_execution_id,
                        thread_ts: first.thread_ts,
                        original_query: first.text,
                    })
                }
                Err(error) => {
                    tracing::warn!(conv_id = %self.key, error = %error, "Fetching thread replies failed");
                    None
                }
            },

            Effect::NotifyUser {
                content,
                is_support,
            } => {
                self.notify_user(&content, is_support);
                None
            }

            Effect::ComposeAndMail {
                workflow_execution_id,
                thread_ts,
                original_query,
                reply_text,
                recipient,
            } => {
                let Some(recipient) = recipient else {
                    tracing::info!(conv_id = %self.key, %thread_ts, "No contact email, resolution mail skipped");
                    return None;
                };

                let mail = compose_resolution_mail(
                    self.services.agent.as_ref(),
                    &original_query,
                    &reply_text,
                    self.services.settings.agent_timeout,
                )
                .await;
                let email = EmailMessage {
                    recipient,
                    subject: mail.subject,
                    content: mail.content,
                };

                match self.provider_call(bridge.send_email(&email)).await {
                    Ok(_) => Some(Event::MailDispatched {
                        workflow_execution_id,
                        thread_ts,
                    }),
                    Err(error) => {
                        tracing::warn!(conv_id = %self.key, error = %error, "Resolution mail failed");
                        None
                    }
                }
            }

            Effect::DeferEscalation { query } => {
                self.services
                    .store
                    .set_deferred_escalation(&self.key, &query);
                None
            }

            Effect::RequestContactEmail => {
                self.services.store.set_awaiting_email(&self.key, true);
                None
            }
        }
    }
}
