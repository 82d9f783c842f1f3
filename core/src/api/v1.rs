//! Version 1 of the Tauri IPC API.
//!
//! Each `#[tauri::command]` is a thin wrapper over an [`ApiState`] method.
//! The methods validate input, delegate to the session controller or the
//! deer layer, and return JSON-friendly payloads, so the terminal front end
//! can drive the same surface without a webview.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tauri::State;
use time::OffsetDateTime;

use crate::agents::orchestrator::http_client;
use crate::agents::{AiOrchestrator, AiProviderInfo, AiSettings};
use crate::env::EnvSource;
use crate::geo::{Geocoder, GoogleGeocoder};
use crate::logging::{EventLog, EventRecord};
use crate::map_layer::{DeerLayer, DeerLayerView};
use crate::model_manager::ModelManager;
use crate::models::{ChatMessage, LatLng, MapBounds, Prediction, PropertyBoundary, Provider};
use crate::session::{ChatController, PredictionOutcome, SendOutcome, SessionSnapshot};

const DEFAULT_EVENT_LIMIT: usize = 50;

/// Shared state handed to each command.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<ChatController>,
    pub deer_layer: Arc<DeerLayer>,
}

impl ApiState {
    pub fn new(controller: Arc<ChatController>, deer_layer: Arc<DeerLayer>) -> Self {
        Self {
            controller,
            deer_layer,
        }
    }

    /// Wire settings, backends, the geocoder and both controllers from the
    /// environment.
    pub fn from_env(source: &dyn EnvSource) -> anyhow::Result<Self> {
        let settings = AiSettings::from_env(source);
        let client = http_client()?;
        let geocoder = settings
            .maps_api_key
            .clone()
            .map(|key| Arc::new(GoogleGeocoder::new(client.clone(), key)) as Arc<dyn Geocoder>);
        let models = ModelManager::new(
            settings,
            AiOrchestrator::with_client(client),
            Arc::new(EventLog::new()),
        );
        let controller = ChatController::new(models.clone(), geocoder);
        let deer_layer = DeerLayer::new(models, controller.active_provider());
        Ok(Self::new(controller, deer_layer))
    }

    pub fn events(&self) -> Arc<EventLog> {
        self.controller.models().events()
    }

    pub fn list_providers(&self) -> Vec<AiProviderInfo> {
        self.controller.models().settings().list_providers()
    }

    pub fn active_session(&self) -> SessionSnapshot {
        self.controller.snapshot()
    }

    pub async fn send_message(&self, input: SendMessageInput) -> SendMessageOutput {
        let (status, message) = match self.controller.send_message(&input.prompt, input.image).await {
            SendOutcome::Empty => (CommandStatus::Empty, None),
            SendOutcome::Busy => (CommandStatus::Busy, None),
            SendOutcome::Delivered(message) => (CommandStatus::Ok, Some(message)),
            SendOutcome::Failed(message) => (CommandStatus::Failed, Some(message)),
        };
        SendMessageOutput { status, message }
    }

    pub async fn request_prediction(&self, input: PredictionInput) -> PredictionOutput {
        let outcome = self
            .controller
            .request_prediction(&input.message_id, &input.plan)
            .await;
        match outcome {
            PredictionOutcome::Busy => PredictionOutput {
                status: CommandStatus::Busy,
                prediction: None,
                message: None,
            },
            PredictionOutcome::Attached(prediction) | PredictionOutcome::Unmatched(prediction) => {
                PredictionOutput {
                    status: CommandStatus::Ok,
                    prediction: Some(prediction),
                    message: None,
                }
            }
            PredictionOutcome::Failed(message) => PredictionOutput {
                status: CommandStatus::Failed,
                prediction: None,
                message: Some(message),
            },
        }
    }

    /// Resolve a provider id the user typed before any confirmation is shown.
    /// `None` means it is already active.
    pub fn switch_target(&self, raw: &str) -> Result<Option<Provider>, String> {
        let provider = raw.parse::<Provider>().map_err(|e| e.to_string())?;
        if !self.controller.models().settings().registry.contains(provider) {
            return Err(format!("{} is not enabled", provider.label()));
        }
        if provider == self.controller.active_provider() {
            return Ok(None);
        }
        Ok(Some(provider))
    }

    /// Switch the active provider and point the deer layer at it.
    pub fn switch_provider(&self, input: SwitchProviderInput) -> Result<SessionSnapshot, String> {
        let provider = input.provider.parse::<Provider>().map_err(|e| e.to_string())?;
        self.controller
            .switch_provider(provider, |_| input.confirmed)
            .map_err(|e| e.to_string())?;
        self.deer_layer.set_provider(self.controller.active_provider());
        Ok(self.controller.snapshot())
    }

    pub fn set_thinking_mode(&self, enabled: bool) -> bool {
        self.controller.set_thinking_mode(enabled);
        self.controller.thinking_mode()
    }

    pub fn set_location(&self, input: SetLocationInput) -> Result<(), String> {
        if let Some(loc) = input.location {
            if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lng) {
                return Err(format!("Coordinates out of range: {}, {}", loc.lat, loc.lng));
            }
        }
        self.controller.set_location(input.location);
        self.controller.set_location_error(input.error);
        Ok(())
    }

    /// Replace the hand-drawn boundary; `None` clears it.
    pub fn update_boundary(&self, path: Option<Vec<LatLng>>) -> Result<Option<PropertyBoundary>, String> {
        let boundary = match path {
            Some(path) if path.len() < 3 => {
                return Err("A boundary needs at least three points".to_string());
            }
            Some(path) => Some(PropertyBoundary::from_drawn(path)),
            None => None,
        };
        self.controller.update_boundary(boundary.clone());
        Ok(boundary)
    }

    pub async fn toggle_deer_layer(&self) -> DeerLayerView {
        self.deer_layer.toggle_visibility().await;
        self.deer_layer.view()
    }

    /// `west > east` is a viewport across the antimeridian, not an error.
    /// Must run inside the tokio runtime.
    pub fn viewport_idle(&self, bounds: MapBounds) -> Result<(), String> {
        let finite = [bounds.north, bounds.south, bounds.east, bounds.west]
            .iter()
            .all(|v| v.is_finite());
        if !finite || bounds.north < bounds.south {
            return Err("Invalid map bounds".to_string());
        }
        self.deer_layer.on_viewport_idle(bounds);
        Ok(())
    }

    pub fn layer_view(&self) -> DeerLayerView {
        self.deer_layer.view()
    }

    /// Most recent diagnostics first.
    pub fn list_events(&self, limit: Option<usize>) -> Vec<EventRecord> {
        self.events().recent(limit.unwrap_or(DEFAULT_EVENT_LIMIT))
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageInput {
    pub prompt: String,
    /// `data:` URL.
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Ok,
    Empty,
    Busy,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct SendMessageOutput {
    pub status: CommandStatus,
    pub message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionInput {
    pub message_id: String,
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct PredictionOutput {
    pub status: CommandStatus,
    pub prediction: Option<Prediction>,
    pub message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchProviderInput {
    pub provider: String,
    /// The user already accepted the data-loss warning.
    pub confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetLocationInput {
    pub location: Option<LatLng>,
    pub error: Option<String>,
}

/// Simple health-check endpoint for UI components.
#[tauri::command]
pub fn ping() -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "ts": OffsetDateTime::now_utc().unix_timestamp(),
    })
}

#[tauri::command]
pub fn list_providers(state: State<ApiState>) -> Vec<AiProviderInfo> {
    state.list_providers()
}

#[tauri::command]
pub fn active_session(state: State<ApiState>) -> SessionSnapshot {
    state.active_session()
}

#[tauri::command]
pub async fn send_message(
    state: State<'_, ApiState>,
    input: SendMessageInput,
) -> Result<SendMessageOutput, String> {
    Ok(state.send_message(input).await)
}

#[tauri::command]
pub async fn request_prediction(
    state: State<'_, ApiState>,
    input: PredictionInput,
) -> Result<PredictionOutput, String> {
    Ok(state.request_prediction(input).await)
}

#[tauri::command]
pub fn switch_provider(
    state: State<ApiState>,
    input: SwitchProviderInput,
) -> Result<SessionSnapshot, String> {
    state.switch_provider(input)
}

#[tauri::command]
pub fn set_thinking_mode(state: State<ApiState>, enabled: bool) -> bool {
    state.set_thinking_mode(enabled)
}

#[tauri::command]
pub fn set_location(state: State<ApiState>, input: SetLocationInput) -> Result<(), String> {
    state.set_location(input)
}

#[tauri::command]
pub fn update_boundary(
    state: State<ApiState>,
    path: Option<Vec<LatLng>>,
) -> Result<Option<PropertyBoundary>, String> {
    state.update_boundary(path)
}

#[tauri::command]
pub async fn toggle_deer_layer(state: State<'_, ApiState>) -> Result<DeerLayerView, String> {
    Ok(state.toggle_deer_layer().await)
}

/// Async so the debounce timer is spawned on the Tauri (tokio) runtime.
#[tauri::command]
pub async fn viewport_idle(state: State<'_, ApiState>, bounds: MapBounds) -> Result<(), String> {
    state.viewport_idle(bounds)
}

#[tauri::command]
pub fn deer_layer(state: State<ApiState>) -> DeerLayerView {
    state.layer_view()
}

/// Return recent runtime events for diagnostics.
#[tauri::command]
pub fn list_events(state: State<ApiState>, limit: Option<usize>) -> Vec<EventRecord> {
    state.list_events(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn state(pairs: &[(&str, &str)]) -> ApiState {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiState::from_env(&env).unwrap()
    }

    #[test]
    fn ping_reports_ok() {
        assert_eq!(ping()["ok"], true);
    }

    #[test]
    fn providers_follow_allow_list() {
        let state = state(&[("VITE_AI_PROVIDERS", "claude,openai"), ("OPENAI_API_KEY", "sk")]);
        let ids: Vec<_> = state.list_providers().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, [Provider::Claude, Provider::OpenAi]);
        assert_eq!(state.active_session().active_provider, Provider::Claude);
    }

    #[test]
    fn switch_provider_validates_and_respects_confirmation() {
        let state = state(&[]);
        let err = state
            .switch_provider(SwitchProviderInput {
                provider: "bard".into(),
                confirmed: true,
            })
            .unwrap_err();
        assert!(err.contains("bard"));

        let snapshot = state
            .switch_provider(SwitchProviderInput {
                provider: "openai".into(),
                confirmed: false,
            })
            .unwrap();
        assert_eq!(snapshot.active_provider, Provider::Gemini);

        let snapshot = state
            .switch_provider(SwitchProviderInput {
                provider: "OpenAI".into(),
                confirmed: true,
            })
            .unwrap();
        assert_eq!(snapshot.active_provider, Provider::OpenAi);
        assert_eq!(state.layer_view().provider, Provider::OpenAi);
    }

    #[test]
    fn switch_target_rejects_before_confirmation() {
        let state = state(&[("VITE_AI_PROVIDERS", "gemini,claude")]);
        assert!(state.switch_target("foo").unwrap_err().contains("foo"));
        assert!(state.switch_target("openai").is_err());
        assert_eq!(state.switch_target(" Gemini ").unwrap(), None);
        assert_eq!(state.switch_target("claude").unwrap(), Some(Provider::Claude));
        assert_eq!(state.active_session().active_provider, Provider::Gemini);
    }

    #[test]
    fn boundary_requires_three_points() {
        let state = state(&[]);
        let short = vec![LatLng::new(43.0, -91.0), LatLng::new(43.1, -91.0)];
        assert!(state.update_boundary(Some(short)).is_err());

        let square = vec![
            LatLng::new(43.0, -91.0),
            LatLng::new(43.0, -90.99),
            LatLng::new(43.01, -90.99),
            LatLng::new(43.01, -91.0),
        ];
        let boundary = state.update_boundary(Some(square)).unwrap().unwrap();
        assert!(boundary.area_acres > 0.0);
        assert_eq!(state.active_session().boundary, Some(boundary));

        assert_eq!(state.update_boundary(None).unwrap(), None);
        assert_eq!(state.active_session().boundary, None);
    }

    #[test]
    fn location_is_range_checked() {
        let state = state(&[]);
        let bad = SetLocationInput {
            location: Some(LatLng::new(123.0, 0.0)),
            error: None,
        };
        assert!(state.set_location(bad).is_err());
        let good = SetLocationInput {
            location: Some(LatLng::new(44.5, -89.5)),
            error: None,
        };
        state.set_location(good).unwrap();
        assert_eq!(state.active_session().location, Some(LatLng::new(44.5, -89.5)));
    }

    #[test]
    fn inverted_viewport_is_rejected() {
        let state = state(&[]);
        let bounds = MapBounds {
            north: 43.0,
            south: 44.0,
            east: -90.0,
            west: -91.0,
        };
        assert!(state.viewport_idle(bounds).is_err());
    }

    #[test]
    fn viewport_across_antimeridian_is_accepted() {
        let state = state(&[]);
        let bounds = MapBounds {
            north: -16.0,
            south: -18.0,
            east: -178.0,
            west: 175.0,
        };
        assert!(state.viewport_idle(bounds).is_ok());
    }

    #[tokio::test]
    async fn empty_send_reports_status_and_thinking_toggles() {
        let state = state(&[]);
        let output = state
            .send_message(SendMessageInput {
                prompt: "   ".into(),
                image: None,
            })
            .await;
        assert_eq!(output.status, CommandStatus::Empty);
        assert!(output.message.is_none());
        assert!(state.set_thinking_mode(true));
        assert!(state.active_session().thinking_mode);
    }

    #[tokio::test]
    async fn missing_key_failure_is_visible_in_events() {
        let state = state(&[]);
        let output = state
            .send_message(SendMessageInput {
                prompt: "How many food plots?".into(),
                image: None,
            })
            .await;
        assert_eq!(output.status, CommandStatus::Failed);
        assert!(output.message.unwrap().is_error);

        let events = state.list_events(Some(10));
        assert!(events.iter().any(|e| e.code.as_deref() == Some("AI-0201")));
        assert_eq!(state.list_events(Some(1)).len(), 1);
    }
}
