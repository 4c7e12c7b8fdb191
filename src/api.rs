//! HTTP API for the support relay

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::runtime::Orchestrator;
use crate::webhook::WebhookIngress;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub ingress: Arc<WebhookIngress>,
    /// Interval between `ping` events on open push streams
    pub ping_interval: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, ping_interval: Duration) -> Self {
        Self {
            ingress: Arc::new(WebhookIngress::new(orchestrator.clone())),
            orchestrator,
            ping_interval,
        }
    }
}
