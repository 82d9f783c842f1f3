use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::config::AiRuntimeSelection;
use super::orchestrator::{post_json, AiReply, ChatTurn, Progress, ProviderBackend, StructuredRequest};
use super::prompts::system_context;
use crate::models::Provider;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CHAT_MAX_TOKENS: u32 = 4096;
const THINKING_BUDGET: u32 = 2048;

pub struct ClaudeBackend {
    client: Client,
}

impl ClaudeBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn messages(&self, selection: &AiRuntimeSelection, payload: &Value) -> Result<String> {
        let url = format!("{}/v1/messages", selection.base_url);
        let request = self
            .client
            .post(url)
            .header("x-api-key", &selection.secret)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let body = post_json(Provider::Claude, request, payload).await?;
        Ok(collect_text(&body))
    }
}

#[async_trait]
impl ProviderBackend for ClaudeBackend {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn consulting_message(&self) -> &'static str {
        "Consulting the Anthropic field notes..."
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
            content.push(json!({
                "type": "image",
                "source": { "type": "base64", "media_type": image.mime_type, "data": image.data }
            }));
        }

        let mut payload = json!({
            "model": selection.model,
            "max_tokens": CHAT_MAX_TOKENS,
            "system": system_context(turn.location),
            "messages": [{ "role": "user", "content": content }],
        });
        // Extended thinking rejects a custom temperature.
        if turn.thinking {
            payload["thinking"] = json!({ "type": "enabled", "budget_tokens": THINKING_BUDGET });
        } else {
            payload["temperature"] = json!(0.4);
        }

        let text = self.messages(selection, &payload).await?;
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
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": request.prompt }]
            }],
        });
        self.messages(selection, &payload).await
    }
}

/// Text blocks joined by newlines; thinking and tool blocks are skipped.
fn collect_text(body: &Value) -> String {
    body.get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::parse_data_url;
    use crate::models::LatLng;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn selection(base_url: String) -> AiRuntimeSelection {
        AiRuntimeSelection {
            provider: Provider::Claude,
            model: "claude-3-5-sonnet-20241022".into(),
            secret: "anthropic-key".into(),
            base_url,
        }
    }

    #[tokio::test]
    async fn thinking_chat_attaches_budget_and_image_source() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "anthropic-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({
                "max_tokens": 4096,
                "thinking": { "type": "enabled", "budget_tokens": 2048 },
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "What is this plant?" },
                        { "type": "image", "source": { "type": "base64", "media_type": "image/png", "data": "iVBORw==" } }
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    { "type": "thinking", "thinking": "hmm" },
                    { "type": "text", "text": "Ragweed." },
                    { "type": "text", "text": "Deer love it." }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let turn = ChatTurn {
            prompt: "What is this plant?".into(),
            image: Some(parse_data_url("data:image/png;base64,iVBORw==").unwrap()),
            location: Some(LatLng::new(40.0, -80.0)),
            thinking: true,
        };
        let reply = ClaudeBackend::new(Client::new())
            .chat(&selection(server.uri()), &turn, &|_: &str| {})
            .await
            .unwrap();
        assert_eq!(reply.text, "Ragweed.\nDeer love it.");
        assert!(reply.sources.is_empty());
    }

    #[test]
    fn system_context_mentions_location() {
        let context = system_context(Some(LatLng::new(40.0, -80.0)));
        assert!(context.contains("latitude 40.0000"));
        assert!(context.ends_with("Be concise but thorough."));
    }

    #[test]
    fn collect_text_tolerates_missing_content() {
        assert_eq!(collect_text(&json!({})), "");
    }
}
