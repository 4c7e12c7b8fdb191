//! Escalation orchestrator
//!
//! Owns one sequential worker per conversation key. Commands for a key are
//! applied in acceptance order; different keys proceed in parallel.

mod executor;

#[cfg(test)]
pub mod testing;

use crate::agent::Agent;
use crate::bridge::{BridgeError, WorkflowBridge};
use crate::config::RuntimeSettings;
use crate::escalation::{Event, Outcome, TransitionError};
use crate::notifier::Notifier;
use crate::store::ConversationStore;
use executor::{Command, ConversationWorker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WORKER_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("conversation worker unavailable")]
    WorkerUnavailable,
    #[error("runtime is shutting down")]
    ShuttingDown,
    #[error("event rejected: {0}")]
    Rejected(#[from] TransitionError),
}

/// Reply to a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub response: String,
    pub success: bool,
    pub error: Option<String>,
    /// Contact address captured from this message
    pub email: Option<String>,
}

impl ChatReply {
    fn ok(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            success: true,
            error: None,
            email: None,
        }
    }
}

/// Result of an explicit escalation trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started { workflow_execution_id: String },
    AlreadyActive,
    Failed(BridgeError),
}

/// Collaborators shared by every worker
pub(crate) struct Services {
    pub store: Arc<ConversationStore>,
    pub bridge: Arc<dyn WorkflowBridge>,
    pub agent: Arc<dyn Agent>,
    pub notifier: Arc<Notifier>,
    pub settings: RuntimeSettings,
}

/// A running or retiring worker
struct WorkerSlot {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

pub struct Orchestrator {
    services: Arc<Services>,
    workers: Mutex<HashMap<String, WorkerSlot>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        bridge: Arc<dyn WorkflowBridge>,
        agent: Arc<dyn Agent>,
        notifier: Arc<Notifier>,
        settings: RuntimeSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            services: Arc::new(Services {
                store,
                bridge,
                agent,
                notifier,
                settings,
            }),
            workers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.services.store
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.services.notifier
    }

    pub fn agent_ready(&self) -> bool {
        self.services.agent.is_ready()
    }

    /// Token cancelled when the service shuts down
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn lock_workers(&self) -> MutexGuard<'_, HashMap<String, WorkerSlot>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the worker queue for a key, spawning the worker if needed.
    ///
    /// A worker closes its queue when it retires. Its replacement waits for
    /// it to finish the commands it already accepted before taking new ones.
    fn worker(&self, key: &str) -> mpsc::Sender<Command> {
        let mut workers = self.lock_workers();
        if let Some(slot) = workers.get(key).filter(|slot| !slot.tx.is_closed()) {
            return slot.tx.clone();
        }

        let predecessor = workers.remove(key).map(|slot| slot.task);
        workers.retain(|_, slot| !(slot.tx.is_closed() && slot.task.is_finished()));

        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        let worker = ConversationWorker::new(
            key.to_string(),
            Arc::clone(&self.services),
            rx,
            self.shutdown.child_token(),
        );
        let task = tokio::spawn(worker.run(predecessor));
        workers.insert(
            key.to_string(),
            WorkerSlot {
                tx: tx.clone(),
                task,
            },
        );
        tx
    }

    /// Enqueue a command. Once this returns, the command's position in the
    /// key's order is fixed.
    async fn enqueue(&self, key: &str, mut command: Command) -> Result<(), RuntimeError> {
        // A worker that retired between lookup and send gets replaced once
        for _ in 0..2 {
            if self.shutdown.is_cancelled() {
                return Err(RuntimeError::ShuttingDown);
            }
            match self.worker(key).send(command).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => command = returned,
            }
        }
        Err(RuntimeError::WorkerUnavailable)
    }

    /// Accept an event for `key` and return a receiver for its outcomes
    pub async fn submit(
        &self,
        key: &str,
        event: Event,
    ) -> Result<oneshot::Receiver<Result<Vec<Outcome>, TransitionError>>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(key, Command::Apply { event, reply }).await?;
        Ok(rx)
    }

    /// Apply an event and wait for every outcome it led to
    pub async fn apply(&self, key: &str, event: Event) -> Result<Vec<Outcome>, RuntimeError> {
        let rx = self.submit(key, event).await?;
        Ok(rx.await.map_err(|_| RuntimeError::WorkerUnavailable)??)
    }

    /// Handle a user chat message
    pub async fn chat(&self, key: &str, text: &str) -> Result<ChatReply, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            key,
            Command::Chat {
                text: text.to_string(),
                reply,
            },
        )
        .await?;
        rx.await.map_err(|_| RuntimeError::WorkerUnavailable)
    }

    /// Explicitly start an escalation for `key`
    pub async fn trigger(&self, key: &str) -> Result<TriggerOutcome, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(key, Command::Trigger { reply }).await?;
        rx.await.map_err(|_| RuntimeError::WorkerUnavailable)
    }

    /// Drop a conversation with its index entries, after every command
    /// accepted before it, and retire its worker. Returns whether the
    /// conversation existed.
    pub async fn clear(&self, key: &str) -> Result<bool, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(key, Command::Clear { reply }).await?;
        rx.await.map_err(|_| RuntimeError::WorkerUnavailable)
    }

    #[cfg(test)]
    pub fn worker_count(&self) -> usize {
        self.lock_workers()
            .values()
            .filter(|slot| !slot.tx.is_closed())
            .count()
    }
}
