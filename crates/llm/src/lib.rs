//! Completion clients and the fallback router used when no skill claims a
//! message.

pub mod providers;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mesh_config::LlmConfig;

pub use providers::{AzureOpenAiClient, OpenAiClient};
pub use templates::fallback_reply;

/// A single system + user exchange sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("provider {0} is not configured")]
    NotConfigured(String),
    #[error("provider {provider} timed out after {elapsed:?}")]
    Timeout { provider: String, elapsed: Duration },
    #[error("completion cancelled")]
    Cancelled,
    #[error("provider {provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("provider {0} returned no usable text")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A remote chat-completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;
    fn is_configured(&self) -> bool;
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Final fallback answer.  `provider` is `None` when the text came from a
/// static template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub provider: Option<String>,
}

impl Completion {
    pub fn is_template(&self) -> bool {
        self.provider.is_none()
    }
}

/// Tries each configured provider in order and falls back to a static
/// template when all of them fail.
#[derive(Clone)]
pub struct LlmRouter {
    clients: Vec<Arc<dyn CompletionClient>>,
    timeout: Duration,
}

impl LlmRouter {
    pub fn new(clients: Vec<Arc<dyn CompletionClient>>, timeout: Duration) -> Self {
        Self { clients, timeout }
    }

    /// Azure OpenAI first, then OpenAI, sharing one HTTP connection pool.
    pub fn from_config(config: &LlmConfig) -> Self {
        let http = reqwest::Client::new();
        Self::new(
            vec![
                Arc::new(AzureOpenAiClient::new(http.clone(), config)),
                Arc::new(OpenAiClient::new(http, config)),
            ],
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Provider names in try order with their configuration state.
    pub fn providers(&self) -> Vec<(String, bool)> {
        self.clients
            .iter()
            .map(|client| (client.name().to_string(), client.is_configured()))
            .collect()
    }

    /// Run the provider chain without the template fallback.  Returns the
    /// answering provider's name with its text, or the last error seen.
    pub async fn complete_with_fallback(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<(String, String), CompletionError> {
        let mut last_error = CompletionError::NotConfigured("any".to_string());

        for client in &self.clients {
            if !client.is_configured() {
                debug!(provider = client.name(), "skipping unconfigured provider");
                last_error = CompletionError::NotConfigured(client.name().to_string());
                continue;
            }

            match self.call_one(client.as_ref(), request, cancel).await {
                Ok(text) => return Ok((client.name().to_string(), text)),
                Err(CompletionError::Cancelled) => return Err(CompletionError::Cancelled),
                Err(err) => {
                    warn!(provider = client.name(), error = %err, "completion provider failed");
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    /// Always produces text: provider output when available, otherwise the
    /// keyword template for `request.user`.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Completion {
        match self.complete_with_fallback(request, cancel).await {
            Ok((provider, text)) => Completion {
                text,
                provider: Some(provider),
            },
            Err(err) => {
                debug!(error = %err, "using template reply");
                Completion {
                    text: fallback_reply(&request.user).to_string(),
                    provider: None,
                }
            }
        }
    }

    async fn call_one(
        &self,
        client: &dyn CompletionClient,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, CompletionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(CompletionError::Cancelled),
            result = tokio::time::timeout(self.timeout, client.complete(request)) => match result {
                Ok(inner) => inner,
                Err(_) => Err(CompletionError::Timeout {
                    provider: client.name().to_string(),
                    elapsed: self.timeout,
                }),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
