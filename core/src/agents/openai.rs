use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::config::AiRuntimeSelection;
use super::orchestrator::{post_json, AiReply, ChatTurn, Progress, ProviderBackend, StructuredRequest};
use super::prompts::system_context;
use crate::models::Provider;

pub struct OpenAiBackend {
    client: Client,
}

impl OpenAiBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn complete(&self, selection: &AiRuntimeSelection, payload: &Value) -> Result<String> {
        let url = format!("{}/v1/chat/completions", selection.base_url);
        let request = self.client.post(url).bearer_auth(&selection.secret);
        let body = post_json(Provider::OpenAi, request, payload).await?;
        Ok(extract_content(&body))
    }
}

#[async_trait]
impl ProviderBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn consulting_message(&self) -> &'static str {
        "Consulting forestry models with OpenAI..."
    }

    async fn chat(
        &self,
        selection: &AiRuntimeSelection,
        turn: &ChatTurn,
        _progress: Progress<'_>,
    ) -> Result<AiReply> {
        let mut content = Vec::new();
        if !turn.prompt.trim().is_empty() {
            content.push(json!({ "type": "text", "text": turn.prompt }));
        }
        if let Some(image) = &turn.image {
            content.push(json!({ "type": "image_url", "image_url": { "url": image.data_url } }));
        }

        let payload = json!({
            "model": selection.model,
            "temperature": 0.4,
            "messages": [
                { "role": "system", "content": system_context(turn.location) },
                { "role": "user", "content": content },
            ],
        });

        let text = self.complete(selection, &payload).await?;
        Ok(AiReply {
            text,
            sources: Vec::new(),
        })
    }

    async fn structured(
        &self,
        selection: &AiRuntimeSelection,
        request: &StructuredRequest,
    ) -> Result<String> {
        let payload = json!({
            "model": selection.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": [{ "type": "text", "text": request.prompt }] },
            ],
        });
        self.complete(selection, &payload).await
    }
}

/// `message.content` is either a plain string or a list of typed parts.
fn extract_content(body: &Value) -> String {
    let content = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|part| part.get("text").and_then(Value::as_str).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
