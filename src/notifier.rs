//! Realtime push to connected clients
//!
//! One outbound channel per user identity. A newer connection for the same
//! user replaces the older one; dropping the stream unregisters it.

use crate::store::Role;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

const CHANNEL_BUFFER: usize = 64;

/// Message pushed to the client stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub role: Role,
    pub content: String,
    pub is_support: bool,
    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn new_message(content: impl Into<String>, is_support: bool) -> Self {
        Self {
            event_type: "new_message".to_string(),
            role: Role::Assistant,
            content: content.into(),
            is_support,
            timestamp: Utc::now(),
        }
    }
}

struct Connection {
    id: Uuid,
    tx: mpsc::Sender<PushEvent>,
}

/// Registry of live client connections
#[derive(Default)]
pub struct Notifier {
    connections: Mutex<HashMap<String, Connection>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection for `user_id`, replacing any previous one
    pub fn connect(self: &Arc<Self>, user_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let id = Uuid::new_v4();

        if self
            .lock()
            .insert(user_id.to_string(), Connection { id, tx })
            .is_some()
        {
            tracing::debug!(user_id, "Replaced existing push connection");
        }
        tracing::info!(user_id, connection_id = %id, "Client connected");

        Subscription {
            rx,
            user_id: user_id.to_string(),
            connection_id: id,
            notifier: Arc::clone(self),
        }
    }

    /// Push an event. Dropped when nobody is connected or the client lags.
    pub fn send(&self, user_id: &str, event: PushEvent) {
        let connections = self.lock();
        let Some(conn) = connections.get(user_id) else {
            tracing::debug!(user_id, "No push connection, dropping event");
            return;
        };
        if let Err(e) = conn.tx.try_send(event) {
            tracing::warn!(user_id, error = %e, "Dropping push event");
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.lock().contains_key(user_id)
    }

    fn disconnect(&self, user_id: &str, connection_id: Uuid) {
        let mut connections = self.lock();
        // A newer connection may already own the slot
        if connections
            .get(user_id)
            .is_some_and(|c| c.id == connection_id)
        {
            connections.remove(user_id);
            tracing::info!(user_id, connection_id = %connection_id, "Client disconnected");
        }
    }
}

/// Stream of events for one connection. Unregisters on drop.
pub struct Subscription {
    rx: mpsc::Receiver<PushEvent>,
    user_id: String,
    connection_id: Uuid,
    notifier: Arc<Notifier>,
}

impl Stream for Subscription {
    type Item = PushEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.disconnect(&self.user_id, self.connection_id);
    }
}
