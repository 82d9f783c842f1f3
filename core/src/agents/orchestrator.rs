use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::claude::ClaudeBackend;
use super::config::AiRuntimeSelection;
use super::gemini::GeminiBackend;
use super::openai::OpenAiBackend;
use crate::errors::WhitetailError;
use crate::media::InlineImage;
use crate::models::{GroundingSource, LatLng, Provider};

/// Status callback handed down to backends. Cosmetic only.
pub type Progress<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// One conversational turn, already validated and with the image decoded.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub location: Option<LatLng>,
    pub thinking: bool,
}

/// A request that must come back as a single JSON document.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub prompt: String,
    pub system: &'static str,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Only honoured by backends with schema-constrained output.
    pub schema: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiReply {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

/// What every vendor integration has to offer.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Status line shown while the request is outstanding.
    fn consulting_message(&self) -> &'static str;

    async fn chat(
        &self,
        selection: &AiRuntimeSelection,
        turn: &ChatTurn,
        progress: Progress<'_>,
    ) -> Result<AiReply>;

    /// Returns the raw model text, expected to hold JSON.
    async fn structured(
        &self,
        selection: &AiRuntimeSelection,
        request: &StructuredRequest,
    ) -> Result<String>;
}

/// Capability table: one backend per provider.
pub struct AiOrchestrator {
    backends: HashMap<Provider, Arc<dyn ProviderBackend>>,
}

impl AiOrchestrator {
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(http_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self::empty()
            .with_backend(Arc::new(GeminiBackend::new(client.clone())))
            .with_backend(Arc::new(OpenAiBackend::new(client.clone())))
            .with_backend(Arc::new(ClaudeBackend::new(client)))
    }

    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register (or replace) the backend for its provider.
    pub fn with_backend(mut self, backend: Arc<dyn ProviderBackend>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    pub fn backend(&self, provider: Provider) -> Result<Arc<dyn ProviderBackend>> {
        self.backends
            .get(&provider)
            .cloned()
            .ok_or_else(|| anyhow!("no backend registered for {}", provider.label()))
    }
}

/// Shared HTTP client settings for every outbound call.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .user_agent("Whitetail-Advisor/0.1")
        .build()
        .context("failed to construct HTTP client")
}

/// Send a JSON body and decode a JSON reply, mapping non-2xx statuses to
/// [`WhitetailError::Transport`] with the response body attached.
pub(crate) async fn post_json(
    provider: Provider,
    request: RequestBuilder,
    payload: &Value,
) -> Result<Value> {
    let response = request
        .json(payload)
        .send()
        .await
        .with_context(|| format!("{} request could not be sent", provider.label()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(WhitetailError::Transport {
            provider,
            status: status.as_u16(),
            body,
        }
        .into());
    }
    response
        .json()
        .await
        .with_context(|| format!("{} returned a non-JSON body", provider.label()))
}
