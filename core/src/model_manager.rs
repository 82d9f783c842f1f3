//! High level AI model manager that turns chat, prediction and map-data
//! requests into provider calls and normalises whatever comes back.
//!
//! Callers never see vendor payloads: chat yields an [`AiReply`], predictions
//! a validated [`Prediction`], and map data a [`DeerDensity`] that is empty
//! rather than failing.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use crate::agents::prompts::{
    density_prompt, density_schema, prediction_prompt, prediction_schema, DENSITY_SYSTEM,
    EMPTY_INPUT_REPLY, PREDICTION_SYSTEM,
};
use crate::agents::{AiOrchestrator, AiReply, AiSettings, ChatTurn, Progress, StructuredRequest};
use crate::errors::WhitetailError;
use crate::logging::{EventLevel, EventLog};
use crate::media::parse_data_url;
use crate::models::{Confidence, DeerDensity, LatLng, MapBounds, Prediction, Provider};

/// Inputs for one conversational reply.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    /// `data:` URL of an attached image.
    pub image: Option<String>,
    pub thinking_mode: bool,
    pub location: Option<LatLng>,
    pub provider: Provider,
}

/// Owns the settings and the provider backends.
pub struct ModelManager {
    settings: AiSettings,
    orchestrator: AiOrchestrator,
    events: Arc<EventLog>,
}

impl ModelManager {
    pub fn new(settings: AiSettings, orchestrator: AiOrchestrator, events: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            orchestrator,
            events,
        })
    }

    pub fn settings(&self) -> &AiSettings {
        &self.settings
    }

    pub fn events(&self) -> Arc<EventLog> {
        self.events.clone()
    }

    /// Produce a `{text, sources}` reply. Empty input short-circuits to a
    /// canned prompt; image and key problems fail before any network call.
    pub async fn generate_response(
        &self,
        request: ChatRequest,
        progress: Progress<'_>,
    ) -> Result<AiReply> {
        let image = request.image.as_deref().filter(|s| !s.trim().is_empty());
        if request.prompt.trim().is_empty() && image.is_none() {
            return Ok(AiReply {
                text: EMPTY_INPUT_REPLY.to_string(),
                sources: Vec::new(),
            });
        }

        let provider = request.provider;
        let result = async {
            let image = image.map(parse_data_url).transpose()?;
            self.ensure_enabled(provider)?;
            let selection = self.settings.resolve_runtime(provider, request.thinking_mode)?;
            let backend = self.orchestrator.backend(provider)?;
            progress(backend.consulting_message());
            let turn = ChatTurn {
                prompt: request.prompt.clone(),
                image,
                location: request.location,
                thinking: request.thinking_mode,
            };
            let reply = backend.chat(&selection, &turn, progress).await?;
            progress("Formatting recommendations...");
            Ok::<_, anyhow::Error>(reply)
        }
        .await;

        match &result {
            Ok(reply) => self.log_invocation_success(provider, "chat", &reply.text),
            Err(err) => self.log_invocation_failure(provider, "chat", err),
        }
        result
    }

    /// Ask for a `{probability, confidence, reasoning}` verdict on a plan.
    pub async fn success_prediction(
        &self,
        plan: &str,
        location: Option<LatLng>,
        provider: Provider,
    ) -> Result<Prediction> {
        let request = StructuredRequest {
            prompt: prediction_prompt(plan, location),
            system: PREDICTION_SYSTEM,
            temperature: 0.2,
            max_tokens: 1024,
            schema: prediction_schema(),
        };
        let result = async {
            let text = self.structured(provider, &request).await?;
            parse_prediction(&text)
        }
        .await;

        match &result {
            Ok(prediction) => self.log_invocation_success(provider, "prediction", &prediction.reasoning),
            Err(err) => self.log_invocation_failure(provider, "prediction", err),
        }
        result
    }

    /// Synthetic density dataset for the viewport. Never fails: any problem
    /// is logged and an empty dataset returned.
    pub async fn deer_density(&self, bounds: &MapBounds, provider: Provider) -> DeerDensity {
        let request = StructuredRequest {
            prompt: density_prompt(bounds),
            system: DENSITY_SYSTEM,
            temperature: 0.3,
            max_tokens: 2048,
            schema: density_schema(),
        };
        let result = async {
            let text = self.structured(provider, &request).await?;
            parse_density(&text, bounds)
        }
        .await;

        match result {
            Ok(data) => data,
            Err(err) => {
                self.events.log_event(
                    EventLevel::Warn,
                    Some("MAP-0100"),
                    "ai.map",
                    "Failed to fetch deer density data",
                    Some("Rendering an empty overlay"),
                    Some(json!({
                        "provider": provider,
                        "error": format!("{err:#}"),
                    })),
                );
                DeerDensity::empty()
            }
        }
    }

    async fn structured(&self, provider: Provider, request: &StructuredRequest) -> Result<String> {
        self.ensure_enabled(provider)?;
        let selection = self.settings.resolve_runtime(provider, true)?;
        let backend = self.orchestrator.backend(provider)?;
        backend.structured(&selection, request).await
    }

    fn ensure_enabled(&self, provider: Provider) -> Result<()> {
        if self.settings.registry.contains(provider) {
            Ok(())
        } else {
            Err(WhitetailError::ProviderUnavailable { provider }.into())
        }
    }

    fn log_invocation_success(&self, provider: Provider, operation: &str, text: &str) {
        let preview = text.chars().take(200).collect::<String>();
        self.events.log_event(
            EventLevel::Info,
            Some("AI-0200"),
            "ai.runtime",
            "AI invocation succeeded",
            None,
            Some(json!({
                "provider": provider,
                "operation": operation,
                "preview": preview,
            })),
        );
    }

    fn log_invocation_failure(&self, provider: Provider, operation: &str, error: &anyhow::Error) {
        let code = crate::errors::catalogue(error).map(|e| e.code());
        self.events.log_event(
            EventLevel::Error,
            Some("AI-0201"),
            "ai.runtime",
            "AI provider invocation failed",
            crate::errors::catalogue(error).map(|e| e.explain()),
            Some(json!({
                "provider": provider,
                "operation": operation,
                "error_code": code,
                "error": format!("{error:#}"),
            })),
        );
    }
}

/// Strip a surrounding markdown code fence, if the model added one.
fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return text;
    };
    // Drop an info string such as `json` on the opening fence line.
    match inner.split_once('\n') {
        Some((info, body)) if !info.trim().contains(['{', '[']) => body.trim(),
        _ => inner.trim(),
    }
}

pub(crate) fn parse_json(text: &str) -> Result<Value> {
    let trimmed = strip_code_fence(text.trim());
    if trimmed.is_empty() {
        return Err(WhitetailError::EmptyResponse.into());
    }
    serde_json::from_str(trimmed).map_err(|_| WhitetailError::UnexpectedFormat.into())
}

/// Validate types, normalise confidence casing and keep probability in range.
pub fn parse_prediction(text: &str) -> Result<Prediction> {
    let value = parse_json(text)?;
    let probability = value
        .get("probability")
        .and_then(Value::as_f64)
        .filter(|p| p.is_finite());
    let reasoning = value.get("reasoning").and_then(Value::as_str);
    let confidence = value.get("confidence").and_then(Value::as_str);
    match (probability, confidence, reasoning) {
        (Some(probability), Some(confidence), Some(reasoning)) => Ok(Prediction {
            probability: probability.clamp(0.0, 100.0),
            confidence: Confidence::normalise(confidence),
            reasoning: reasoning.to_string(),
        }),
        _ => Err(WhitetailError::InvalidPrediction.into()),
    }
}

/// Strict typed decode, then clamp weights and drop out-of-view hotspots and
/// degenerate corridors.
pub fn parse_density(text: &str, bounds: &MapBounds) -> Result<DeerDensity> {
    let value = parse_json(text)?;
    let data: DeerDensity =
        serde_json::from_value(value).map_err(|_| WhitetailError::UnexpectedFormat)?;

    let hotspots = data
        .hotspots
        .into_iter()
        .filter(|h| h.lat.is_finite() && h.lng.is_finite() && h.weight.is_finite())
        .filter(|h| bounds.contains(h.lat, h.lng))
        .map(|mut h| {
            h.weight = h.weight.clamp(1.0, 5.0);
            h
        })
        .collect();
    let corridors = data
        .corridors
        .into_iter()
        .filter(|c| c.path.len() >= 2)
        .filter(|c| c.path.iter().all(|p| p.lat.is_finite() && p.lng.is_finite()))
        .collect();
    Ok(DeerDensity {
        hotspots,
        corridors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AiRuntimeSelection, ProviderBackend};
    use crate::errors::catalogue;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that counts calls and answers from a fixed script.
    struct ScriptedBackend {
        provider: Provider,
        chat_reply: Result<AiReply, u16>,
        structured_reply: Result<String, u16>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(provider: Provider) -> Self {
            Self {
                provider,
                chat_reply: Ok(AiReply {
                    text: "ok".into(),
                    sources: Vec::new(),
                }),
                structured_reply: Ok("{}".into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn fail(provider: Provider, status: u16) -> Self {
            Self {
                chat_reply: Err(status),
                structured_reply: Err(status),
                ..Self::new(provider)
            }
        }

        fn structured(provider: Provider, text: &str) -> Self {
            Self {
                structured_reply: Ok(text.to_string()),
                ..Self::new(provider)
            }
        }
    }

    #[async_trait]
    impl ProviderBackend for ScriptedBackend {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn consulting_message(&self) -> &'static str {
            "Consulting..."
        }

        async fn chat(
            &self,
            _selection: &AiRuntimeSelection,
            _turn: &ChatTurn,
            _progress: Progress<'_>,
        ) -> Result<AiReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.chat_reply.clone().map_err(|status| {
                WhitetailError::Transport {
                    provider: self.provider,
                    status,
                    body: "boom".into(),
                }
                .into()
            })
        }

        async fn structured(
            &self,
            _selection: &AiRuntimeSelection,
            _request: &StructuredRequest,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.structured_reply.clone().map_err(|status| {
                WhitetailError::Transport {
                    provider: self.provider,
                    status,
                    body: "boom".into(),
                }
                .into()
            })
        }
    }

    fn keyed_settings() -> AiSettings {
        let env: HashMap<String, String> = [
            ("GEMINI_API_KEY", "g"),
            ("OPENAI_API_KEY", "o"),
            ("ANTHROPIC_API_KEY", "c"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        AiSettings::from_env(&env)
    }

    fn manager_with(backends: Vec<Arc<ScriptedBackend>>, settings: AiSettings) -> Arc<ModelManager> {
        let orchestrator = backends
            .into_iter()
            .fold(AiOrchestrator::empty(), |o, b| o.with_backend(b));
        ModelManager::new(settings, orchestrator, Arc::new(EventLog::new()))
    }

    fn request(prompt: &str, image: Option<&str>, provider: Provider) -> ChatRequest {
        ChatRequest {
            prompt: prompt.into(),
            image: image.map(str::to_string),
            thinking_mode: false,
            location: None,
            provider,
        }
    }

    fn bounds() -> MapBounds {
        MapBounds {
            north: 45.0,
            south: 44.0,
            east: -89.0,
            west: -90.0,
        }
    }

    #[tokio::test]
    async fn empty_input_short_circuits_for_every_provider() {
        for provider in Provider::ALL {
            let backend = Arc::new(ScriptedBackend::new(provider));
            // No API keys at all: the canned reply must not depend on them.
            let manager = manager_with(vec![backend.clone()], AiSettings::from_env(&HashMap::new()));
            let reply = manager
                .generate_response(request("   ", None, provider), &|_: &str| {})
                .await
                .unwrap();
            assert_eq!(reply.text, EMPTY_INPUT_REPLY);
            assert!(reply.sources.is_empty());
            assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn malformed_image_fails_before_any_call() {
        for provider in Provider::ALL {
            let backend = Arc::new(ScriptedBackend::new(provider));
            let manager = manager_with(vec![backend.clone()], keyed_settings());
            let err = manager
                .generate_response(request("look", Some("not-a-data-url"), provider), &|_: &str| {})
                .await
                .unwrap_err();
            assert!(matches!(catalogue(&err), Some(WhitetailError::InvalidImage)));
            assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_call() {
        let backend = Arc::new(ScriptedBackend::new(Provider::OpenAi));
        let manager = manager_with(vec![backend.clone()], AiSettings::from_env(&HashMap::new()));
        let err = manager
            .generate_response(request("hello", None, Provider::OpenAi), &|_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(
            catalogue(&err),
            Some(WhitetailError::MissingApiKey { provider: Provider::OpenAi })
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.events().find_code("AI-0201").len(), 1);
    }

    #[tokio::test]
    async fn progress_reports_each_step() {
        let backend = Arc::new(ScriptedBackend::new(Provider::Claude));
        let manager = manager_with(vec![backend], keyed_settings());
        let seen = std::sync::Mutex::new(Vec::new());
        let progress = |msg: &str| seen.lock().unwrap().push(msg.to_string());
        let reply = manager
            .generate_response(request("hello", None, Provider::Claude), &progress)
            .await
            .unwrap();
        assert_eq!(reply.text, "ok");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["Consulting...", "Formatting recommendations..."]
        );
        assert_eq!(manager.events().find_code("AI-0200").len(), 1);
    }

    #[tokio::test]
    async fn disabled_provider_is_rejected() {
        let env: HashMap<String, String> = [
            ("VITE_AI_PROVIDERS".to_string(), "claude".to_string()),
            ("OPENAI_API_KEY".to_string(), "o".to_string()),
        ]
        .into_iter()
        .collect();
        let backend = Arc::new(ScriptedBackend::new(Provider::OpenAi));
        let manager = manager_with(vec![backend.clone()], AiSettings::from_env(&env));
        let err = manager
            .generate_response(request("hello", None, Provider::OpenAi), &|_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(
            catalogue(&err),
            Some(WhitetailError::ProviderUnavailable { .. })
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prediction_confidence_is_normalised() {
        let high = parse_prediction(r#"{"probability":72,"confidence":"HIGH","reasoning":"x"}"#).unwrap();
        assert_eq!(high.confidence, Confidence::High);
        assert_eq!(high.probability, 72.0);

        let weird = parse_prediction(r#"{"probability":72,"confidence":"weird","reasoning":"x"}"#).unwrap();
        assert_eq!(weird.confidence, Confidence::Medium);
    }

    #[test]
    fn prediction_type_errors_are_rejected() {
        let err = parse_prediction(r#"{"probability":"seventy","confidence":"High","reasoning":"x"}"#).unwrap_err();
        assert!(matches!(catalogue(&err), Some(WhitetailError::InvalidPrediction)));

        let err = parse_prediction(r#"{"probability":10,"confidence":3,"reasoning":"x"}"#).unwrap_err();
        assert!(matches!(catalogue(&err), Some(WhitetailError::InvalidPrediction)));
    }

    #[test]
    fn prediction_parse_errors_are_descriptive() {
        let err = parse_prediction("   ").unwrap_err();
        assert!(matches!(catalogue(&err), Some(WhitetailError::EmptyResponse)));
        let err = parse_prediction("probably 70%").unwrap_err();
        assert!(matches!(catalogue(&err), Some(WhitetailError::UnexpectedFormat)));
    }

    #[test]
    fn prediction_accepts_fenced_json_and_clamps() {
        let fenced = "```json\n{\"probability\":140,\"confidence\":\"low\",\"reasoning\":\"r\"}\n```";
        let prediction = parse_prediction(fenced).unwrap();
        assert_eq!(prediction.probability, 100.0);
        assert_eq!(prediction.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn prediction_round_trip_through_backend() {
        let backend = Arc::new(ScriptedBackend::structured(
            Provider::Gemini,
            r#"{"probability":55,"confidence":"medium","reasoning":"Needs more cover."}"#,
        ));
        let manager = manager_with(vec![backend], keyed_settings());
        let prediction = manager
            .success_prediction("Add cedar bedding", None, Provider::Gemini)
            .await
            .unwrap();
        assert_eq!(prediction.confidence, Confidence::Medium);
        assert_eq!(prediction.reasoning, "Needs more cover.");
    }

    #[tokio::test]
    async fn density_failures_yield_empty_dataset() {
        for provider in Provider::ALL {
            let backend = Arc::new(ScriptedBackend::fail(provider, 500));
            let manager = manager_with(vec![backend], keyed_settings());
            let data = manager.deer_density(&bounds(), provider).await;
            assert_eq!(data, DeerDensity::empty());
            assert_eq!(manager.events().find_code("MAP-0100").len(), 1);
        }

        let manager = manager_with(
            vec![Arc::new(ScriptedBackend::structured(Provider::OpenAi, "not json"))],
            keyed_settings(),
        );
        assert!(manager.deer_density(&bounds(), Provider::OpenAi).await.is_empty());

        let unkeyed = manager_with(
            vec![Arc::new(ScriptedBackend::new(Provider::Claude))],
            AiSettings::from_env(&HashMap::new()),
        );
        assert!(unkeyed.deer_density(&bounds(), Provider::Claude).await.is_empty());
    }

    #[test]
    fn density_is_normalised_to_bounds() {
        let text = r#"{
            "hotspots": [
                {"lat": 44.5, "lng": -89.5, "weight": 9},
                {"lat": 44.2, "lng": -89.1, "weight": 0.2},
                {"lat": 50.0, "lng": -89.5, "weight": 3}
            ],
            "corridors": [
                {"path": [{"lat": 44.1, "lng": -89.9}, {"lat": 44.9, "lng": -89.2}]},
                {"path": [{"lat": 44.1, "lng": -89.9}]}
            ]
        }"#;
        let data = parse_density(text, &bounds()).unwrap();
        assert_eq!(data.hotspots.len(), 2);
        assert_eq!(data.hotspots[0].weight, 5.0);
        assert_eq!(data.hotspots[1].weight, 1.0);
        assert_eq!(data.corridors.len(), 1);
    }

    #[test]
    fn density_keeps_hotspots_across_the_antimeridian() {
        let fiji = MapBounds {
            north: -16.0,
            south: -18.0,
            east: -178.0,
            west: 175.0,
        };
        let text = r#"{
            "hotspots": [
                {"lat": -17.0, "lng": 178.0, "weight": 3},
                {"lat": -17.5, "lng": -179.0, "weight": 2},
                {"lat": -17.5, "lng": 10.0, "weight": 2}
            ],
            "corridors": []
        }"#;
        let data = parse_density(text, &fiji).unwrap();
        let kept: Vec<_> = data.hotspots.iter().map(|h| h.lng).collect();
        assert_eq!(kept, [178.0, -179.0]);
    }

    #[test]
    fn density_shape_errors_are_rejected() {
        let err = parse_density(r#"{"hotspots": [{"lat": 44.5}], "corridors": []}"#, &bounds()).unwrap_err();
        assert!(matches!(catalogue(&err), Some(WhitetailError::UnexpectedFormat)));
    }
}
