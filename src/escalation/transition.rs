//! Pure escalation transition function
//!
//! Given the current record and an event, decide the new record and the
//! effects to run. No I/O happens here; the runtime executes effects and
//! feeds their results back in as events.

use super::{Effect, Event};
use crate::bridge::BridgeError;
use crate::store::{ChannelStatus, Escalation, EscalationStatus};
use thiserror::Error;

/// Conversation facts the transition needs besides the record itself
#[derive(Debug, Clone, Default)]
pub struct EscalationContext {
    pub contact_email: Option<String>,
}

/// How the stored record changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Unchanged,
    /// Install a new record and index its workflow id
    Begin(Escalation),
    /// Replace the record for the same workflow execution
    Update(Escalation),
}

/// What a transition achieved, reported back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    StartRequested,
    Started { workflow_execution_id: String },
    StartFailed(BridgeError),
    Queued,
    Relayed,
    ChannelOpened,
    FetchRequested,
    Tracked,
    ReplyReceived,
    MailSent,
    Resolved,
}

/// Result of a transition
#[derive(Debug)]
pub struct TransitionResult {
    pub change: RecordChange,
    pub effects: Vec<Effect>,
    pub outcome: Outcome,
}

impl TransitionResult {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            change: RecordChange::Unchanged,
            effects: vec![],
            outcome,
        }
    }

    pub fn with_change(mut self, change: RecordChange) -> Self {
        self.change = change;
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Events that don't apply to the current record. Nothing is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("escalation {0} is already active")]
    AlreadyActive(String),
    #[error("no active escalation")]
    NoActiveEscalation,
    #[error("workflow {0} does not match the current escalation")]
    WorkflowMismatch(String),
    #[error("channel already started")]
    AlreadyStarted,
    #[error("thread message {0} is already tracked")]
    AlreadyTracked(String),
    #[error("thread message {0} is not tracked")]
    UnknownThread(String),
    #[error("mail already sent for thread message {0}")]
    AlreadyMailed(String),
}

fn matching<'a>(
    record: Option<&'a Escalation>,
    workflow_execution_id: &str,
) -> Result<&'a Escalation, TransitionError> {
    match record {
        Some(esc) if esc.workflow_execution_id == workflow_execution_id => Ok(esc),
        Some(_) => Err(TransitionError::WorkflowMismatch(
            workflow_execution_id.to_string(),
        )),
        None => Err(TransitionError::NoActiveEscalation),
    }
}

fn ensure_inactive(record: Option<&Escalation>) -> Result<(), TransitionError> {
    match record.filter(|r| r.is_active()) {
        Some(active) => Err(TransitionError::AlreadyActive(
            active.workflow_execution_id.clone(),
        )),
        None => Ok(()),
    }
}

/// Pure transition function
pub fn transition(
    record: Option<&Escalation>,
    context: &EscalationContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Starting
        // ============================================================
        Event::EscalationRequested { query } => {
            ensure_inactive(record)?;
            Ok(TransitionResult::new(Outcome::StartRequested)
                .with_effect(Effect::StartEscalation { query }))
        }

        Event::EscalationStarted {
            workflow_execution_id,
            query,
        } => {
            ensure_inactive(record)?;
            let mut esc =
                Escalation::new(workflow_execution_id.clone(), context.contact_email.clone());
            esc.queued_messages
                .extend(query.filter(|q| !q.trim().is_empty()));

            let result = TransitionResult::new(Outcome::Started {
                workflow_execution_id,
            })
            .with_change(RecordChange::Begin(esc));

            Ok(if context.contact_email.is_none() {
                result.with_effect(Effect::RequestContactEmail)
            } else {
                result
            })
        }

        // Nothing is recorded; an unreachable provider keeps the query for a retry
        Event::EscalationStartFailed { query, error } => {
            let defer = error.is_unavailable();
            let result = TransitionResult::new(Outcome::StartFailed(error));
            Ok(match query {
                Some(query) if defer => result.with_effect(Effect::DeferEscalation { query }),
                _ => result,
            })
        }

        // ============================================================
        // User messages while escalated
        // ============================================================
        Event::UserFollowUp { text } => {
            let esc = record
                .filter(|r| r.is_active())
                .ok_or(TransitionError::NoActiveEscalation)?;

            match esc.channel_status {
                ChannelStatus::Pending => {
                    let mut next = esc.clone();
                    next.queued_messages.push(text);
                    Ok(TransitionResult::new(Outcome::Queued)
                        .with_change(RecordChange::Update(next)))
                }
                ChannelStatus::Started => {
                    Ok(TransitionResult::new(Outcome::Relayed).with_effect(
                        Effect::PostToChannel {
                            workflow_execution_id: esc.workflow_execution_id.clone(),
                            channel_thread_id: esc.channel_thread_id.clone(),
                            texts: vec![text],
                        },
                    ))
                }
            }
        }

        // Requeue ahead of anything queued since, then wait for the channel again
        Event::ChannelPostFailed {
            workflow_execution_id,
            unsent,
            ..
        } => {
            let esc = matching(record, &workflow_execution_id)?;
            if !esc.is_active() {
                return Err(TransitionError::NoActiveEscalation);
            }

            let mut next = esc.clone();
            let mut queued = unsent;
            queued.append(&mut next.queued_messages);
            next.queued_messages = queued;
            next.channel_status = ChannelStatus::Pending;
            Ok(TransitionResult::new(Outcome::Queued).with_change(RecordChange::Update(next)))
        }

        // ============================================================
        // Channel lifecycle
        // ============================================================
        Event::ChannelStarted {
            workflow_execution_id,
            chat_node_id,
        } => {
            let esc = matching(record, &workflow_execution_id)?;
            if esc.channel_status == ChannelStatus::Started {
                return Err(TransitionError::AlreadyStarted);
            }

            let mut next = esc.clone();
            next.channel_status = ChannelStatus::Started;
            if chat_node_id.is_some() {
                next.channel_thread_id = chat_node_id;
            }
            let texts = std::mem::take(&mut next.queued_messages);

            let mut result = TransitionResult::new(Outcome::ChannelOpened);
            if !texts.is_empty() {
                result = result.with_effect(Effect::PostToChannel {
                    workflow_execution_id: next.workflow_execution_id.clone(),
                    channel_thread_id: next.channel_thread_id.clone(),
                    texts,
                });
            }
            Ok(result.with_change(RecordChange::Update(next)))
        }

        Event::ChannelStatusReported {
            workflow_execution_id,
            notification_id,
        } => {
            matching(record, &workflow_execution_id)?;
            Ok(
                TransitionResult::new(Outcome::FetchRequested).with_effect(
                    Effect::FetchThreadReplies {
                        workflow_execution_id,
                        notification_id,
                    },
                ),
            )
        }

        Event::ThreadMessageTracked {
            workflow_execution_id,
            thread_ts,
            original_query,
        } => {
            let esc = matching(record, &workflow_execution_id)?;
            let mut next = esc.clone();
            if !next.track_thread_message(&thread_ts, &original_query) {
                return Err(TransitionError::AlreadyTracked(thread_ts));
            }
            Ok(TransitionResult::new(Outcome::Tracked).with_change(RecordChange::Update(next)))
        }

        // ============================================================
        // Replies and resolution
        // ============================================================
        Event::ChannelReply {
            workflow_execution_id,
            thread_ts,
            text,
        } => {
            let esc = matching(record, &workflow_execution_id)?;
            let entry = esc
                .thread_message(&thread_ts)
                .ok_or_else(|| TransitionError::UnknownThread(thread_ts.clone()))?;
            if entry.mail_sent {
                return Err(TransitionError::AlreadyMailed(thread_ts));
            }

            let recipient = esc
                .contact_email
                .clone()
                .or_else(|| context.contact_email.clone());

            Ok(TransitionResult::new(Outcome::ReplyReceived)
                .with_effect(Effect::resolution_notice())
                .with_effect(Effect::ComposeAndMail {
                    workflow_execution_id,
                    original_query: entry.original_query.clone(),
                    thread_ts,
                    reply_text: text,
                    recipient,
                }))
        }

        Event::MailDispatched {
            workflow_execution_id,
            thread_ts,
        } => {
            let esc = matching(record, &workflow_execution_id)?;
            match esc.thread_message(&thread_ts) {
                None => return Err(TransitionError::UnknownThread(thread_ts)),
                Some(entry) if entry.mail_sent => {
                    return Err(TransitionError::AlreadyMailed(thread_ts));
                }
                Some(_) => {}
            }

            let mut next = esc.clone();
            next.mark_mail_sent(&thread_ts);
            let outcome = if next.status() == EscalationStatus::Resolved {
                Outcome::Resolved
            } else {
                Outcome::MailSent
            };
            Ok(TransitionResult::new(outcome).with_change(RecordChange::Update(next)))
        }
    }
}
