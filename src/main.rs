//! Support Relay - customer support escalation service
//!
//! Answers customers with an LLM agent and hands conversations that need a
//! person to a human-staffed channel run by an external workflow provider.

mod agent;
mod api;
mod bridge;
mod config;
mod escalation;
mod llm;
mod mail_composer;
mod notifier;
mod prompt;
mod runtime;
mod store;
mod webhook;

use agent::LlmAgent;
use api::{create_router, AppState};
use bridge::{LoggingBridge, SirenBridge, WorkflowBridge};
use config::Config;
use notifier::Notifier;
use prompt::KnowledgeBase;
use runtime::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use store::ConversationStore;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "support_relay=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    if config.provider.api_key.is_none() {
        tracing::warn!("SIREN_API_KEY not set. Escalations will fail until it is configured.");
    }
    let siren: Arc<dyn WorkflowBridge> = Arc::new(SirenBridge::new(&config.provider)?);
    let bridge = Arc::new(LoggingBridge::new(siren));

    let llm_service = llm::from_config(&config.llm)?;
    if llm_service.is_none() {
        tracing::warn!("OPENAI_API_KEY not set. The agent will answer with an apology.");
    }
    let agent = Arc::new(LlmAgent::new(llm_service, KnowledgeBase::default()));

    let shutdown = CancellationToken::new();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ConversationStore::new(config.runtime.max_messages)),
        bridge,
        agent,
        Arc::new(Notifier::new()),
        config.runtime.clone(),
        shutdown.clone(),
    ));

    let state = AppState::new(orchestrator, config.ping_interval);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Support relay listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then stop the conversation workers
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    shutdown.cancel();
}
