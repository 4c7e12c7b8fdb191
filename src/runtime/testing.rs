//! Mock implementations for testing
//!
//! These mocks enable orchestration tests without real I/O.

use crate::agent::{Agent, AgentError, AgentReply, PromptContext};
use crate::bridge::{
    BridgeError, ChannelPost, DeliveryReceipt, EmailMessage, EscalationPayload, StartReceipt,
    ThreadReply, WorkflowBridge,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

// ============================================================================
// Mock Workflow Bridge
// ============================================================================

/// Bridge that records calls and answers from queued results
#[allow(dead_code)]
#[derive(Default)]
pub struct MockBridge {
    start_results: Mutex<VecDeque<Result<StartReceipt, BridgeError>>>,
    post_results: Mutex<VecDeque<Result<DeliveryReceipt, BridgeError>>>,
    email_results: Mutex<VecDeque<Result<DeliveryReceipt, BridgeError>>>,
    replies: Mutex<HashMap<String, Vec<ThreadReply>>>,
    start_delay: Option<Duration>,
    pub starts: Mutex<Vec<EscalationPayload>>,
    pub posts: Mutex<Vec<ChannelPost>>,
    pub fetches: Mutex<Vec<String>>,
    pub emails: Mutex<Vec<EmailMessage>>,
}

#[allow(dead_code)]
impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every start call, for timeout tests
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn queue_start(&self, result: Result<&str, BridgeError>) {
        self.start_results
            .lock()
            .unwrap()
            .push_back(result.map(|id| StartReceipt {
                workflow_execution_id: id.to_string(),
            }));
    }

    pub fn queue_post_error(&self, error: BridgeError) {
        self.post_results.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_email_error(&self, error: BridgeError) {
        self.email_results.lock().unwrap().push_back(Err(error));
    }

    pub fn set_replies(&self, notification_id: &str, replies: Vec<ThreadReply>) {
        self.replies
            .lock()
            .unwrap()
            .insert(notification_id.to_string(), replies);
    }

    pub fn posted_bodies(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.body.clone())
            .collect()
    }

    pub fn sent_emails(&self) -> Vec<EmailMessage> {
        self.emails.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowBridge for MockBridge {
    async fn start_escalation(
        &self,
        payload: &EscalationPayload,
    ) -> Result<StartReceipt, BridgeError> {
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        let count = {
            let mut starts = self.starts.lock().unwrap();
            starts.push(payload.clone());
            starts.len()
        };
        self.start_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(StartReceipt {
                    workflow_execution_id: format!("wf-{count}"),
                })
            })
    }

    async fn post_to_channel(&self, post: &ChannelPost) -> Result<DeliveryReceipt, BridgeError> {
        let result = self
            .post_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DeliveryReceipt::default()));
        if result.is_ok() {
            self.posts.lock().unwrap().push(post.clone());
        }
        result
    }

    async fn fetch_thread_replies(
        &self,
        notification_id: &str,
    ) -> Result<Vec<ThreadReply>, BridgeError> {
        self.fetches
            .lock()
            .unwrap()
            .push(notification_id.to_string());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(notification_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryReceipt, BridgeError> {
        let result = self
            .email_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DeliveryReceipt::default()));
        if result.is_ok() {
            self.emails.lock().unwrap().push(email.clone());
        }
        result
    }
}

// ============================================================================
// Mock Agent
// ============================================================================

/// Agent that returns queued replies
#[allow(dead_code)]
pub struct MockAgent {
    replies: Mutex<VecDeque<Result<AgentReply, AgentError>>>,
    texts: Mutex<VecDeque<Result<String, AgentError>>>,
    delay: Option<Duration>,
    barrier: Option<Arc<Barrier>>,
    ready: bool,
    pub contexts: Mutex<Vec<PromptContext>>,
    prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockAgent {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            texts: Mutex::new(VecDeque::new()),
            delay: None,
            barrier: None,
            ready: true,
            contexts: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Wait on a shared barrier before every reply
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn unready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn queue_reply(&self, reply: Result<AgentReply, AgentError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn queue_text(&self, text: Result<String, AgentError>) {
        self.texts.lock().unwrap().push_back(text);
    }

    pub fn text_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn recorded_contexts(&self) -> Vec<PromptContext> {
        self.contexts.lock().unwrap().clone()
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn generate_reply(&self, context: &PromptContext) -> Result<AgentReply, AgentError> {
        self.contexts.lock().unwrap().push(context.clone());
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AgentReply::text("How can I help?")))
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.texts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Update on your request".to_string()))
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

// ============================================================================
// Orchestration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;
    use crate::escalation::{Event, Outcome, TransitionError, RESOLUTION_NOTICE};
    use crate::notifier::Notifier;
    use crate::runtime::executor::{
        AGENT_ERROR_REPLY, EMAIL_REQUEST, EMAIL_VALIDATION_PROMPT, RELAY_ACK,
        START_DEFERRED_NOTICE,
    };
    use crate::runtime::{Orchestrator, RuntimeError, TriggerOutcome};
    use crate::store::{ChannelStatus, ConversationStore, EscalationStatus, Role};
    use futures::{FutureExt, StreamExt};
    use tokio_util::sync::CancellationToken;

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            max_messages: 20,
            provider_timeout: Duration::from_millis(500),
            agent_timeout: Duration::from_millis(500),
            worker_idle_timeout: Duration::from_secs(30),
        }
    }

    fn orchestrator(bridge: &Arc<MockBridge>, agent: &Arc<MockAgent>) -> Orchestrator {
        orchestrator_with(bridge, agent, settings())
    }

    fn orchestrator_with(
        bridge: &Arc<MockBridge>,
        agent: &Arc<MockAgent>,
        settings: RuntimeSettings,
    ) -> Orchestrator {
        Orchestrator::new(
            Arc::new(ConversationStore::new(settings.max_messages)),
            bridge.clone(),
            agent.clone(),
            Arc::new(Notifier::new()),
            settings,
            CancellationToken::new(),
        )
    }

    /// Drive `key` to a started escalation for `wf-1` with a known contact email
    async fn started_escalation(orch: &Orchestrator, key: &str) {
        orch.chat(key, "jane@example.com").await.unwrap();
        orch.apply(
            key,
            Event::EscalationStarted {
                workflow_execution_id: "wf-1".to_string(),
                query: None,
            },
        )
        .await
        .unwrap();
        orch.apply(
            key,
            Event::ChannelStarted {
                workflow_execution_id: "wf-1".to_string(),
                chat_node_id: Some("node-1".to_string()),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_plain_chat_reply() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        agent.queue_reply(Ok(AgentReply::text("We're open 9am - 6pm IST.")));
        let orch = orchestrator(&bridge, &agent);

        let reply = orch.chat("c1", "When are you open?").await.unwrap();

        assert!(reply.success);
        assert_eq!(reply.response, "We're open 9am - 6pm IST.");
        let history = orch.store().history("c1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert!(bridge.starts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agent_escalation_goes_pending_then_started() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_start(Ok("wf-123"));
        let agent = Arc::new(MockAgent::new());
        agent.queue_reply(Ok(AgentReply::escalate(
            "Connecting you with our team.",
            "I need a replacement",
        )));
        let orch = orchestrator(&bridge, &agent);

        let reply = orch.chat("c1", "I need a replacement").await.unwrap();
        assert!(reply.success);
        assert!(reply.response.starts_with("Connecting you with our team."));
        assert!(reply.response.ends_with(EMAIL_REQUEST));

        let esc = orch.store().get_escalation("c1").unwrap();
        assert_eq!(esc.workflow_execution_id, "wf-123");
        assert_eq!(esc.status(), EscalationStatus::Pending);
        assert_eq!(esc.queued_messages, vec!["I need a replacement"]);
        assert_eq!(orch.store().resolve_conversation("wf-123").as_deref(), Some("c1"));
        assert!(orch.store().is_awaiting_email("c1"));

        let outcomes = orch
            .apply(
                "c1",
                Event::ChannelStarted {
                    workflow_execution_id: "wf-123".to_string(),
                    chat_node_id: Some("node-7".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcomes, vec![Outcome::ChannelOpened]);

        let esc = orch.store().get_escalation("c1").unwrap();
        assert_eq!(esc.status(), EscalationStatus::Started);
        assert_eq!(esc.channel_thread_id.as_deref(), Some("node-7"));
        assert!(esc.queued_messages.is_empty());

        let posts = bridge.posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body, "I need a replacement");
        assert_eq!(posts[0].channel_thread_id.as_deref(), Some("node-7"));
    }

    #[tokio::test]
    async fn test_email_is_acknowledged() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);

        let reply = orch
            .chat("c1", "you can reach me at jane@example.com")
            .await
            .unwrap();

        assert!(reply.success);
        assert_eq!(reply.response, "Thanks! We'll send updates to jane@example.com.");
        assert_eq!(reply.email.as_deref(), Some("jane@example.com"));
        assert_eq!(
            orch.store().contact_email("c1").as_deref(),
            Some("jane@example.com")
        );
        assert!(agent.recorded_contexts().is_empty());
    }

    #[tokio::test]
    async fn test_awaiting_email_gets_validation_prompt() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        agent.queue_reply(Ok(AgentReply::escalate("Connecting you.", "refund please")));
        let orch = orchestrator(&bridge, &agent);

        orch.chat("c1", "refund please").await.unwrap();
        assert!(orch.store().is_awaiting_email("c1"));
        let before = orch.store().snapshot("c1").unwrap();

        let reply = orch.chat("c1", "not an email").await.unwrap();

        assert!(!reply.success);
        assert_eq!(reply.response, EMAIL_VALIDATION_PROMPT);
        let after = orch.store().snapshot("c1").unwrap();
        assert_eq!(after.messages, before.messages);
        assert_eq!(after.escalation, before.escalation);
        assert!(bridge.posts.lock().unwrap().is_empty());

        // The address unblocks the conversation and lands on the record
        orch.chat("c1", "jane@example.com").await.unwrap();
        assert!(!orch.store().is_awaiting_email("c1"));
        assert_eq!(
            orch.store()
                .get_escalation("c1")
                .unwrap()
                .contact_email
                .as_deref(),
            Some("jane@example.com")
        );
    }

    #[tokio::test]
    async fn test_follow_up_is_relayed_while_started() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        started_escalation(&orch, "c1").await;

        let reply = orch.chat("c1", "Any update on my order?").await.unwrap();

        assert_eq!(reply.response, RELAY_ACK);
        assert_eq!(bridge.posted_bodies(), vec!["Any update on my order?"]);
        assert!(agent.recorded_contexts().is_empty());
    }

    #[tokio::test]
    async fn test_post_failure_requeues_and_falls_back_to_pending() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        started_escalation(&orch, "c1").await;
        bridge.queue_post_error(BridgeError::unavailable("timeout"));

        let reply = orch.chat("c1", "hello?").await.unwrap();
        assert_eq!(reply.response, RELAY_ACK);

        let esc = orch.store().get_escalation("c1").unwrap();
        assert_eq!(esc.channel_status, ChannelStatus::Pending);
        assert_eq!(esc.queued_messages, vec!["hello?"]);

        // A later channel start flushes the requeued message
        orch.apply(
            "c1",
            Event::ChannelStarted {
                workflow_execution_id: "wf-1".to_string(),
                chat_node_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(bridge.posted_bodies(), vec!["hello?"]);
    }

    #[tokio::test]
    async fn test_duplicate_reply_sends_one_email() {
        let bridge = Arc::new(MockBridge::new());
        bridge.set_replies(
            "n-1",
            vec![ThreadReply {
                text: "I need a replacement".to_string(),
                thread_ts: "1700.1".to_string(),
            }],
        );
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        started_escalation(&orch, "c1").await;
        let mut stream = orch.notifier().connect("c1");

        let outcomes = orch
            .apply(
                "c1",
                Event::ChannelStatusReported {
                    workflow_execution_id: "wf-1".to_string(),
                    notification_id: "n-1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcomes, vec![Outcome::FetchRequested, Outcome::Tracked]);

        let reply = Event::ChannelReply {
            workflow_execution_id: "wf-1".to_string(),
            thread_ts: "1700.1".to_string(),
            text: "A replacement ships today".to_string(),
        };
        let outcomes = orch.apply("c1", reply.clone()).await.unwrap();
        assert_eq!(outcomes, vec![Outcome::ReplyReceived, Outcome::Resolved]);

        let second = orch.apply("c1", reply).await;
        assert!(matches!(
            second,
            Err(RuntimeError::Rejected(TransitionError::AlreadyMailed(_)))
        ));

        let emails = bridge.sent_emails();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].recipient, "jane@example.com");

        let notice = stream.next().await.unwrap();
        assert_eq!(notice.content, RESOLUTION_NOTICE);
        assert!(notice.is_support);
        assert!(stream.next().now_or_never().is_none());

        assert_eq!(
            orch.store().get_escalation("c1").unwrap().status(),
            EscalationStatus::Resolved
        );
    }

    #[tokio::test]
    async fn test_failed_email_leaves_thread_unsent() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_email_error(BridgeError::unavailable("down"));
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        started_escalation(&orch, "c1").await;
        orch.apply(
            "c1",
            Event::ThreadMessageTracked {
                workflow_execution_id: "wf-1".to_string(),
                thread_ts: "1.1".to_string(),
                original_query: "q".to_string(),
            },
        )
        .await
        .unwrap();

        let reply = Event::ChannelReply {
            workflow_execution_id: "wf-1".to_string(),
            thread_ts: "1.1".to_string(),
            text: "solved".to_string(),
        };
        let outcomes = orch.apply("c1", reply.clone()).await.unwrap();
        assert_eq!(outcomes, vec![Outcome::ReplyReceived]);
        assert_eq!(
            orch.store().get_escalation("c1").unwrap().status(),
            EscalationStatus::Started
        );

        // A redelivered reply gets another chance
        let outcomes = orch.apply("c1", reply).await.unwrap();
        assert_eq!(outcomes, vec![Outcome::ReplyReceived, Outcome::Resolved]);
        assert_eq!(bridge.sent_emails().len(), 1);
    }

    #[tokio::test]
    async fn test_event_for_unknown_workflow_is_rejected_without_mutation() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        started_escalation(&orch, "c1").await;
        let before = orch.store().get_escalation("c1");

        let result = orch
            .apply(
                "c1",
                Event::ChannelStarted {
                    workflow_execution_id: "wf-unknown".to_string(),
                    chat_node_id: None,
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(RuntimeError::Rejected(TransitionError::WorkflowMismatch(_)))
        ));
        assert_eq!(orch.store().get_escalation("c1"), before);
    }

    #[tokio::test]
    async fn test_start_failure_is_deferred_and_retried() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_start(Err(BridgeError::unavailable("connection refused")));
        bridge.queue_start(Ok("wf-9"));
        let agent = Arc::new(MockAgent::new());
        agent.queue_reply(Ok(AgentReply::escalate("Connecting you.", "I need a replacement")));
        let orch = orchestrator(&bridge, &agent);
        orch.chat("c1", "jane@example.com").await.unwrap();

        let reply = orch.chat("c1", "I need a replacement").await.unwrap();
        assert!(reply.response.ends_with(START_DEFERRED_NOTICE));
        assert!(orch.store().get_escalation("c1").is_none());

        let reply = orch.chat("c1", "hello?").await.unwrap();
        assert_eq!(reply.response, RELAY_ACK);

        let esc = orch.store().get_escalation("c1").unwrap();
        assert_eq!(esc.workflow_execution_id, "wf-9");
        assert_eq!(esc.queued_messages, vec!["I need a replacement", "hello?"]);
        assert_eq!(bridge.starts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_provider_timeout_counts_as_unavailable() {
        let bridge = Arc::new(MockBridge::new().with_start_delay(Duration::from_millis(200)));
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator_with(
            &bridge,
            &agent,
            RuntimeSettings {
                provider_timeout: Duration::from_millis(20),
                ..settings()
            },
        );

        let outcome = orch.trigger("c1").await.unwrap();

        assert!(matches!(
            outcome,
            TriggerOutcome::Failed(BridgeError::ProviderUnavailable(_))
        ));
        assert!(orch.store().get_escalation("c1").is_none());
    }

    #[tokio::test]
    async fn test_agent_failure_and_timeout_return_apology() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        agent.queue_reply(Err(AgentError::NotConfigured));
        let orch = orchestrator(&bridge, &agent);

        let reply = orch.chat("c1", "hi").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.response, AGENT_ERROR_REPLY);
        assert!(reply.error.is_some());
        // Only the user message was kept
        assert_eq!(orch.store().message_count("c1"), 1);

        let slow = Arc::new(MockAgent::new().with_delay(Duration::from_millis(200)));
        let orch = orchestrator_with(
            &bridge,
            &slow,
            RuntimeSettings {
                agent_timeout: Duration::from_millis(20),
                ..settings()
            },
        );
        let reply = orch.chat("c1", "hi").await.unwrap();
        assert!(!reply.success);
        assert!(reply.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_trigger_starts_once() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_start(Ok("wf-42"));
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        let mut stream = orch.notifier().connect("u1");

        let first = orch.trigger("u1").await.unwrap();
        assert_eq!(
            first,
            TriggerOutcome::Started {
                workflow_execution_id: "wf-42".to_string()
            }
        );
        assert_eq!(stream.next().await.unwrap().content, EMAIL_REQUEST);

        let second = orch.trigger("u1").await.unwrap();
        assert_eq!(second, TriggerOutcome::AlreadyActive);
        assert_eq!(bridge.starts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_rejected_by_provider() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_start(Err(BridgeError::rejected(404, "unknown workflow")));
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);

        let outcome = orch.trigger("u1").await.unwrap();
        assert!(matches!(
            outcome,
            TriggerOutcome::Failed(BridgeError::ProviderRejected { status: 404, .. })
        ));
        assert_eq!(orch.store().take_deferred_escalation("u1"), None);
    }

    #[tokio::test]
    async fn test_events_apply_in_acceptance_order() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        started_escalation(&orch, "c1").await;

        let mut pending = Vec::new();
        for i in 0..8 {
            let rx = orch
                .submit(
                    "c1",
                    Event::UserFollowUp {
                        text: format!("message {i}"),
                    },
                )
                .await
                .unwrap();
            pending.push(rx);
        }
        for rx in pending {
            assert_eq!(rx.await.unwrap().unwrap(), vec![Outcome::Relayed]);
        }

        let expected: Vec<_> = (0..8).map(|i| format!("message {i}")).collect();
        assert_eq!(bridge.posted_bodies(), expected);
    }

    #[tokio::test]
    async fn test_channel_start_between_follow_ups_keeps_order() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        orch.chat("c1", "jane@example.com").await.unwrap();
        orch.apply(
            "c1",
            Event::EscalationStarted {
                workflow_execution_id: "wf-1".to_string(),
                query: None,
            },
        )
        .await
        .unwrap();

        let before_start = orch
            .submit(
                "c1",
                Event::UserFollowUp {
                    text: "sent while pending".to_string(),
                },
            )
            .await
            .unwrap();
        let start = orch
            .submit(
                "c1",
                Event::ChannelStarted {
                    workflow_execution_id: "wf-1".to_string(),
                    chat_node_id: Some("node-1".to_string()),
                },
            )
            .await
            .unwrap();
        let after_start = orch
            .submit(
                "c1",
                Event::UserFollowUp {
                    text: "sent after start".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(before_start.await.unwrap().unwrap(), vec![Outcome::Queued]);
        assert_eq!(start.await.unwrap().unwrap(), vec![Outcome::ChannelOpened]);
        assert_eq!(after_start.await.unwrap().unwrap(), vec![Outcome::Relayed]);

        assert_eq!(
            bridge.posted_bodies(),
            vec!["sent while pending", "sent after start"]
        );
        let esc = orch.store().get_escalation("c1").unwrap();
        assert_eq!(esc.status(), EscalationStatus::Started);
        assert!(esc.queued_messages.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_run_in_parallel() {
        let bridge = Arc::new(MockBridge::new());
        // Both replies must be in flight at once to pass the barrier
        let agent = Arc::new(MockAgent::new().with_barrier(Arc::new(Barrier::new(2))));
        let orch = orchestrator(&bridge, &agent);

        let both = async { tokio::join!(orch.chat("a", "hi"), orch.chat("b", "hello")) };
        let (a, b) = tokio::time::timeout(Duration::from_secs(5), both)
            .await
            .expect("keys were serialized");

        assert!(a.unwrap().success);
        assert!(b.unwrap().success);
        assert_eq!(orch.worker_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_removes_conversation_and_index() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&bridge, &agent);
        started_escalation(&orch, "c1").await;

        assert!(orch.clear("c1").await.unwrap());
        assert_eq!(orch.worker_count(), 0);

        assert!(!orch.store().has_conversation("c1"));
        assert_eq!(orch.store().resolve_conversation("wf-1"), None);
        assert!(!orch.clear("c1").await.unwrap());

        // The key is usable again
        let reply = orch.chat("c1", "hi again").await.unwrap();
        assert!(reply.success);
        assert_eq!(orch.store().message_count("c1"), 2);
        assert_eq!(orch.worker_count(), 1);
    }

    #[tokio::test]
    async fn test_commands_queued_behind_clear_still_run() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new().with_delay(Duration::from_millis(20)));
        let orch = orchestrator(&bridge, &agent);
        orch.chat("c1", "first").await.unwrap();

        // Accepted by the retiring worker, then by its replacement
        let (cleared, before, after) = tokio::join!(
            orch.clear("c1"),
            orch.chat("c1", "queued behind clear"),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                orch.chat("c1", "sent later").await
            }
        );

        assert!(cleared.unwrap());
        assert!(before.unwrap().success);
        assert!(after.unwrap().success);
        let contents: Vec<_> = orch
            .store()
            .history("c1")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(
            contents,
            vec![
                "queued behind clear",
                "How can I help?",
                "sent later",
                "How can I help?"
            ]
        );
    }

    #[tokio::test]
    async fn test_idle_worker_retires_and_respawns() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator_with(
            &bridge,
            &agent,
            RuntimeSettings {
                worker_idle_timeout: Duration::from_millis(20),
                ..settings()
            },
        );

        orch.chat("c1", "hi").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orch.worker_count(), 0);

        let reply = orch.chat("c1", "still there?").await.unwrap();
        assert!(reply.success);
        assert_eq!(orch.store().message_count("c1"), 4);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let bridge = Arc::new(MockBridge::new());
        let agent = Arc::new(MockAgent::new());
        let token = CancellationToken::new();
        let orch = Orchestrator::new(
            Arc::new(ConversationStore::default()),
            bridge,
            agent,
            Arc::new(Notifier::new()),
            settings(),
            token.clone(),
        );

        token.cancel();
        assert!(matches!(
            orch.chat("c1", "hi").await,
            Err(RuntimeError::ShuttingDown)
        ));
    }
}
