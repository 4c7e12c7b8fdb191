//! Service configuration read from the environment

use crate::store::DEFAULT_MAX_MESSAGES;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_SIREN_BASE_URL: &str = "https://api.trysiren.io";
const DEFAULT_WORKFLOW_NAME: &str = "customer-support-chat";
const DEFAULT_EMAIL_TEMPLATE: &str = "Customer-Support-Agent";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub provider: ProviderConfig,
    pub llm: LlmConfig,
    pub runtime: RuntimeSettings,
    /// Interval between liveness pings on open push streams
    pub ping_interval: Duration,
}

/// Workflow provider (Siren) settings
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub workflow_name: String,
    pub slack_channel: Option<String>,
    /// Default chat node used until the provider reports the real one
    pub chat_node_id: Option<String>,
    pub email_template: String,
    pub request_timeout: Duration,
}

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub max_messages: usize,
    /// Upper bound on any single provider call
    pub provider_timeout: Duration,
    /// Upper bound on any single agent call
    pub agent_timeout: Duration,
    /// A conversation worker with no work for this long stops
    pub worker_idle_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            provider_timeout: Duration::from_secs(15),
            agent_timeout: Duration::from_secs(60),
            worker_idle_timeout: Duration::from_secs(600),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| {
            Duration::from_secs(get(key).and_then(|v| v.parse().ok()).unwrap_or(default))
        };

        let runtime_defaults = RuntimeSettings::default();
        let provider_timeout = secs(
            "PROVIDER_TIMEOUT_SECS",
            runtime_defaults.provider_timeout.as_secs(),
        );
        let agent_timeout = secs("AGENT_TIMEOUT_SECS", runtime_defaults.agent_timeout.as_secs());

        Self {
            port: get("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            provider: ProviderConfig {
                base_url: get("SIREN_API_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_SIREN_BASE_URL.to_string()),
                api_key: get("SIREN_API_KEY"),
                workflow_name: get("CHAT_WORKFLOW_NAME")
                    .unwrap_or_else(|| DEFAULT_WORKFLOW_NAME.to_string()),
                slack_channel: get("CHAT_WORKFLOW_SLACK_CHANNEL"),
                chat_node_id: get("CHAT_NODE_ID"),
                email_template: get("EMAIL_TEMPLATE_NAME")
                    .unwrap_or_else(|| DEFAULT_EMAIL_TEMPLATE.to_string()),
                request_timeout: provider_timeout,
            },
            llm: LlmConfig {
                api_key: get("OPENAI_API_KEY"),
                base_url: get("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                request_timeout: agent_timeout,
            },
            runtime: RuntimeSettings {
                max_messages: get("MAX_HISTORY_MESSAGES")
                    .and_then(|v| v.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(runtime_defaults.max_messages),
                provider_timeout,
                agent_timeout,
                worker_idle_timeout: secs(
                    "WORKER_IDLE_SECS",
                    runtime_defaults.worker_idle_timeout.as_secs(),
                ),
            },
            ping_interval: secs("SSE_PING_SECS", 30),
        }
    }
}
