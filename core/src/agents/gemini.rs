use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::config::AiRuntimeSelection;
use super::orchestrator::{post_json, AiReply, ChatTurn, Progress, ProviderBackend, StructuredRequest};
use super::prompts::{location_line, SYSTEM_PROMPT};
use crate::models::{GroundingSource, Provider};

const THINKING_BUDGET: u32 = 32_768;

pub struct GeminiBackend {
    client: Client,
}

impl GeminiBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request(&self, selection: &AiRuntimeSelection) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            selection.base_url, selection.model
        );
        self.client
            .post(url)
            .query(&[("key", selection.secret.as_str())])
    }
}

#[async_trait]
impl ProviderBackend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn consulting_message(&self) -> &'static str {
        "Consulting field guides..."
    }

    async fn chat(
        &self,
        selection: &AiRuntimeSelection,
        turn: &ChatTurn,
        progress: Progress<'_>,
    ) -> Result<AiReply> {
        let mut parts = Vec::new();
        if turn.location.is_some() {
            parts.push(json!({ "text": location_line(turn.location) }));
        }
        if let Some(image) = &turn.image {
            parts.push(json!({
                "inlineData": { "mimeType": image.mime_type, "data": image.data }
            }));
        }
        if !turn.prompt.trim().is_empty() {
            parts.push(json!({ "text": turn.prompt }));
        }

        let mut payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "tools": [{ "google_search": {} }],
        });
        if turn.thinking {
            progress("Performing advanced analysis...");
            payload["generationConfig"] = json!({
                "thinkingConfig": { "thinkingBudget": THINKING_BUDGET }
            });
        }

        let body = post_json(Provider::Gemini, self.request(selection), &payload).await?;
        Ok(AiReply {
            text: extract_text(&body),
            sources: extract_sources(&body),
        })
    }

    async fn structured(
        &self,
        selection: &AiRuntimeSelection,
        request: &StructuredRequest,
    ) -> Result<String> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": request.schema,
                "temperature": request.temperature,
            }
        });
        let body = post_json(Provider::Gemini, self.request(selection), &payload).await?;
        Ok(extract_text(&body))
    }
}

fn first_candidate(body: &Value) -> Option<&Value> {
    body.get("candidates").and_then(|c| c.get(0))
}

/// Concatenate the visible text parts of the first candidate.
fn extract_text(body: &Value) -> String {
    first_candidate(body)
        .and_then(|cand| cand.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Web and maps grounding chunks that carry both a uri and a title.
fn extract_sources(body: &Value) -> Vec<GroundingSource> {
    let Some(chunks) = first_candidate(body)
        .and_then(|cand| cand.get("groundingMetadata"))
        .and_then(|meta| meta.get("groundingChunks"))
        .and_then(|chunks| chunks.as_array())
    else {
        return Vec::new();
    };

    chunks
        .iter()
        .filter_map(|chunk| {
            ["web", "maps"].iter().find_map(|kind| {
                let node = chunk.get(*kind)?;
                let uri = node.get("uri").and_then(Value::as_str).filter(|s| !s.is_empty())?;
                let title = node.get("title").and_then(Value::as_str).filter(|s| !s.is_empty())?;
                Some(GroundingSource {
                    uri: uri.to_string(),
                    title: title.to_string(),
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{catalogue, WhitetailError};
    use crate::media::parse_data_url;
    use crate::models::LatLng;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn selection(base_url: String) -> AiRuntimeSelection {
        AiRuntimeSelection {
            provider: Provider::Gemini,
            model: "gemini-2.5-flash".into(),
            secret: "test-key".into(),
            base_url,
        }
    }

    fn turn(thinking: bool) -> ChatTurn {
        ChatTurn {
            prompt: "How much clover should I plant?".into(),
            image: Some(parse_data_url("data:image/jpeg;base64,/9j/4AAQ").unwrap()),
            location: Some(LatLng::new(44.5, -89.5)),
            thinking,
        }
    }

    fn grounded_response() -> Value {
        json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "internal musing", "thought": true },
                        { "text": "Plant 2 acres " },
                        { "text": "of white clover." }
                    ]
                },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://extension.example/clover", "title": "Clover plots" } },
                        { "web": { "uri": "https://no-title.example" } },
                        { "maps": { "uri": "https://maps.example/place", "title": "Co-op" } },
                        { "retrievedContext": { "uri": "x", "title": "y" } }
                    ]
                }
            }]
        })
    }

    #[tokio::test]
    async fn chat_builds_parts_and_extracts_sources() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "The landowner is currently near latitude 44.5000 and longitude -89.5000." },
                        { "inlineData": { "mimeType": "image/jpeg", "data": "/9j/4AAQ" } },
                        { "text": "How much clover should I plant?" }
                    ]
                }],
                "tools": [{ "google_search": {} }],
                "generationConfig": { "thinkingConfig": { "thinkingBudget": 32768 } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(grounded_response()))
            .expect(1)
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(Client::new());
        let seen = std::sync::Mutex::new(Vec::new());
        let progress = |msg: &str| seen.lock().unwrap().push(msg.to_string());
        let reply = backend
            .chat(&selection(server.uri()), &turn(true), &progress)
            .await
            .unwrap();

        assert_eq!(reply.text, "Plant 2 acres of white clover.");
        assert_eq!(
            reply.sources,
            vec![
                GroundingSource {
                    uri: "https://extension.example/clover".into(),
                    title: "Clover plots".into()
                },
                GroundingSource {
                    uri: "https://maps.example/place".into(),
                    title: "Co-op".into()
                },
            ]
        );
        assert_eq!(seen.lock().unwrap().as_slice(), ["Performing advanced analysis..."]);
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(Client::new());
        let err = backend
            .chat(&selection(server.uri()), &turn(false), &|_: &str| {})
            .await
            .unwrap_err();
        match catalogue(&err) {
            Some(WhitetailError::Transport { status, body, .. }) => {
                assert_eq!(*status, 403);
                assert_eq!(body, "API key not valid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn structured_requests_json_mime_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "{\"ok\":true}" }] } }]
            })))
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(Client::new());
        let request = StructuredRequest {
            prompt: "give me json".into(),
            system: "json only",
            temperature: 0.2,
            max_tokens: 512,
            schema: json!({ "type": "OBJECT" }),
        };
        let text = backend
            .structured(&selection(server.uri()), &request)
            .await
            .unwrap();
        assert_eq!(text, "{\"ok\":true}");
    }

    #[test]
    fn missing_grounding_yields_no_sources() {
        assert!(extract_sources(&json!({ "candidates": [{}] })).is_empty());
        assert_eq!(extract_text(&json!({})), "");
    }
}
