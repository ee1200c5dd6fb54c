//! HTTP clients for the chat-completion endpoints.
//!
//! Both providers speak the OpenAI chat format; they differ only in URL
//! layout and how the key is sent.

use async_trait::async_trait;
use serde_json::json;

use mesh_config::{AzureOpenAiConfig, LlmConfig, OpenAiConfig};

use crate::{CompletionClient, CompletionError, CompletionRequest};

// ── Azure OpenAI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AzureOpenAiClient {
    client: reqwest::Client,
    config: AzureOpenAiConfig,
    max_tokens: u32,
    temperature: f32,
}

impl AzureOpenAiClient {
    pub fn new(client: reqwest::Client, llm: &LlmConfig) -> Self {
        Self {
            client,
            config: llm.azure.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version,
        )
    }
}

#[async_trait]
impl CompletionClient for AzureOpenAiClient {
    fn name(&self) -> &str {
        "azure"
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let payload = json!({
            "messages": chat_messages(request),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("api-key", &self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        read_chat_response(self.name(), response).await
    }
}

// ── OpenAI ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, llm: &LlmConfig) -> Self {
        Self {
            client,
            config: llm.openai.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let payload = json!({
            "model": self.config.model,
            "messages": chat_messages(request),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        read_chat_response(self.name(), response).await
    }
}

// ── Shared wire handling ─────────────────────────────────────────────────────

fn chat_messages(request: &CompletionRequest) -> serde_json::Value {
    json!([
        {"role": "system", "content": request.system},
        {"role": "user", "content": request.user},
    ])
}

async fn read_chat_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<String, CompletionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CompletionError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: body.chars().take(300).collect(),
        });
    }

    let body: serde_json::Value = response.json().await?;
    extract_content(&body).ok_or_else(|| CompletionError::Malformed(provider.to_string()))
}

/// Pull `choices[0].message.content` out of a chat-completion body.
/// Blank content counts as missing.
pub(crate) fn extract_content(body: &serde_json::Value) -> Option<String> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(ToString::to_string)
}
