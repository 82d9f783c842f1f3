//! Per-provider conversation state and the user actions that mutate it.
//!
//! Each provider that has ever been active owns one [`ProviderChatState`].
//! User actions always land in the conversation of the provider that was
//! active when the action started, even if the user switches mid-request.
//! A single loading flag covers the whole controller, so at most one AI call
//! is in flight at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::WhitetailError;
use crate::geo::{build_property_context, format_boundary_context, Geocoder};
use crate::logging::EventLevel;
use crate::model_manager::{ChatRequest, ModelManager};
use crate::models::{ChatMessage, LatLng, Prediction, PropertyBoundary, Provider, ProviderChatState, Role};

pub const SWITCH_WARNING: &str = "Any data entered previously will be lost. Switching AI providers is fine, but understand your data with the previous AI will not carry over.";
const CHAT_FAILED: &str = "I seem to be having trouble connecting to my field notes right now. Please try again in a moment.";
const PREDICTION_FAILED: &str = "The prediction analysis failed. Please try again.";
const THINKING_STATUS: &str = "Dr. Whitetail is thinking...";
const PREDICTING_STATUS: &str = "Calculating success probability...";

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send.
    Empty,
    /// Another request is still outstanding.
    Busy,
    Delivered(ChatMessage),
    /// The apology message that was appended instead of a reply.
    Failed(ChatMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Busy,
    Attached(Prediction),
    /// The prediction succeeded but no message carried that id.
    Unmatched(Prediction),
    Failed(ChatMessage),
}

/// Read-only view of the active conversation for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub active_provider: Provider,
    pub provider_label: &'static str,
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub loading_message: String,
    pub thinking_mode: bool,
    pub location: Option<LatLng>,
    pub boundary: Option<PropertyBoundary>,
}

struct ControllerState {
    active: Provider,
    chats: HashMap<Provider, ProviderChatState>,
    loading: bool,
    loading_message: String,
    thinking_mode: bool,
    location: Option<LatLng>,
    location_error: Option<String>,
    boundary: Option<PropertyBoundary>,
}

impl ControllerState {
    fn fresh_chat(&self) -> ProviderChatState {
        ProviderChatState {
            session_id: Uuid::new_v4().to_string(),
            messages: welcome_messages(self.location, self.location_error.as_deref()),
        }
    }

    /// Returns true when a new conversation was created.
    fn activate(&mut self, provider: Provider) -> bool {
        if self.chats.contains_key(&provider) {
            return false;
        }
        let chat = self.fresh_chat();
        self.chats.insert(provider, chat);
        true
    }

    fn append(&mut self, provider: Provider, message: ChatMessage) {
        self.activate(provider);
        if let Some(chat) = self.chats.get_mut(&provider) {
            chat.messages.push(message);
        }
    }
}

pub fn welcome_messages(location: Option<LatLng>, location_error: Option<&str>) -> Vec<ChatMessage> {
    let coords = match location {
        Some(loc) => format!("{:.4}, {:.4}", loc.lat, loc.lng),
        None => "an unknown location".to_string(),
    };
    let mut messages = vec![ChatMessage::new(
        Role::Model,
        format!(
            "Dr. Elias Whitetail speaking. I see you're located near these coordinates: {coords}. I will automatically analyze the climate and soil data for your specific location to provide the best advice. Tell me your property size, current cover (woods, CRP, row crops), and your goals (trophy bucks, herd health, bow-hunting, etc.). You can also upload a photo of your property for analysis."
        ),
    )];
    if let Some(error) = location_error {
        messages.push(ChatMessage::error(
            Role::System,
            format!("Location Error: {error}. I'll still provide general advice, but for site-specific plans, location data is crucial."),
        ));
    }
    messages
}

/// Clears the loading flag however the request ends.
struct LoadingGuard<'a> {
    controller: &'a ChatController,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.controller.lock();
        state.loading = false;
        state.loading_message.clear();
    }
}

pub struct ChatController {
    models: Arc<ModelManager>,
    geocoder: Option<Arc<dyn Geocoder>>,
    state: Mutex<ControllerState>,
}

impl ChatController {
    /// Build a controller with the registry's default provider already active.
    pub fn new(models: Arc<ModelManager>, geocoder: Option<Arc<dyn Geocoder>>) -> Arc<Self> {
        let active = models.settings().registry.default_provider();
        let mut state = ControllerState {
            active,
            chats: HashMap::new(),
            loading: false,
            loading_message: String::new(),
            thinking_mode: false,
            location: None,
            location_error: None,
            boundary: None,
        };
        state.activate(active);
        Arc::new(Self {
            models,
            geocoder,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn models(&self) -> Arc<ModelManager> {
        self.models.clone()
    }

    pub fn active_provider(&self) -> Provider {
        self.lock().active
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn loading_message(&self) -> String {
        self.lock().loading_message.clone()
    }

    pub fn thinking_mode(&self) -> bool {
        self.lock().thinking_mode
    }

    pub fn location(&self) -> Option<LatLng> {
        self.lock().location
    }

    pub fn boundary(&self) -> Option<PropertyBoundary> {
        self.lock().boundary.clone()
    }

    pub fn chat_state(&self, provider: Provider) -> Option<ProviderChatState> {
        self.lock().chats.get(&provider).cloned()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let state = self.lock();
        state
            .chats
            .get(&state.active)
            .map(|chat| chat.messages.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        let chat = state.chats.get(&state.active);
        SessionSnapshot {
            active_provider: state.active,
            provider_label: state.active.label(),
            session_id: chat.map(|c| c.session_id.clone()).unwrap_or_default(),
            messages: chat.map(|c| c.messages.clone()).unwrap_or_default(),
            is_loading: state.loading,
            loading_message: state.loading_message.clone(),
            thinking_mode: state.thinking_mode,
            location: state.location,
            boundary: state.boundary.clone(),
        }
    }

    /// Create the provider's conversation if it has never been active.
    pub fn activate(&self, provider: Provider) -> bool {
        self.lock().activate(provider)
    }

    /// Only affects conversations created afterwards.
    pub fn set_location(&self, location: Option<LatLng>) {
        self.lock().location = location;
    }

    pub fn set_location_error(&self, error: Option<String>) {
        self.lock().location_error = error;
    }

    pub fn set_thinking_mode(&self, enabled: bool) {
        self.lock().thinking_mode = enabled;
    }

    /// Replaces any previous boundary.
    pub fn update_boundary(&self, boundary: Option<PropertyBoundary>) {
        self.lock().boundary = boundary;
    }

    fn set_loading_message(&self, message: &str) {
        self.lock().loading_message = message.to_string();
    }

    /// Change the active provider after the user confirms. Returns whether
    /// the active provider changed; no conversation is ever discarded.
    pub fn switch_provider(
        &self,
        next: Provider,
        confirm: impl FnOnce(&str) -> bool,
    ) -> anyhow::Result<bool> {
        if !self.models.settings().registry.contains(next) {
            return Err(WhitetailError::ProviderUnavailable { provider: next }.into());
        }
        let previous = self.active_provider();
        if previous == next || !confirm(SWITCH_WARNING) {
            return Ok(false);
        }
        {
            let mut state = self.lock();
            state.active = next;
            state.activate(next);
        }
        self.models.events().log_event(
            EventLevel::Info,
            Some("SES-0001"),
            "session",
            "Active provider switched",
            None,
            Some(json!({ "from": previous, "to": next })),
        );
        Ok(true)
    }

    /// Append the user's message, ask the active provider, append the reply
    /// (or an apology). Ignored while another request is outstanding.
    pub async fn send_message(&self, prompt: &str, image: Option<String>) -> SendOutcome {
        let image = image.filter(|i| !i.trim().is_empty());
        if prompt.trim().is_empty() && image.is_none() {
            return SendOutcome::Empty;
        }

        let (provider, location, thinking_mode, boundary) = {
            let mut state = self.lock();
            if state.loading {
                return SendOutcome::Busy;
            }
            state.loading = true;
            state.loading_message = THINKING_STATUS.to_string();
            let provider = state.active;
            let user_message = ChatMessage::new(Role::User, prompt).with_image(image.clone());
            state.append(provider, user_message);
            (provider, state.location, state.thinking_mode, state.boundary.clone())
        };
        let guard = LoadingGuard { controller: self };

        let events = self.models.events();
        let mut context_parts = Vec::new();
        if let Some(context) = build_property_context(self.geocoder.as_deref(), prompt, &events).await {
            context_parts.push(context);
        }
        if let Some(boundary) = &boundary {
            context_parts.push(format_boundary_context(boundary));
        }
        let augmented = if context_parts.is_empty() {
            prompt.to_string()
        } else {
            format!("{prompt}\n\n{}", context_parts.join("\n\n"))
        };

        let request = ChatRequest {
            prompt: augmented,
            image,
            thinking_mode,
            location,
            provider,
        };
        let progress = |message: &str| self.set_loading_message(message);
        let reply = self.models.generate_response(request, &progress).await;

        let outcome = match reply {
            Ok(reply) => {
                let message = ChatMessage::new(Role::Model, reply.text).with_sources(reply.sources);
                self.lock().append(provider, message.clone());
                SendOutcome::Delivered(message)
            }
            Err(err) => {
                events.log_event(
                    EventLevel::Error,
                    Some("SES-0100"),
                    "session",
                    "Error generating response",
                    None,
                    Some(json!({ "provider": provider, "error": format!("{err:#}") })),
                );
                let message = ChatMessage::error(Role::Model, CHAT_FAILED);
                self.lock().append(provider, message.clone());
                SendOutcome::Failed(message)
            }
        };
        drop(guard);
        outcome
    }

    /// Score a plan and attach the verdict to the message it came from.
    pub async fn request_prediction(&self, message_id: &str, plan: &str) -> PredictionOutcome {
        let (provider, location) = {
            let mut state = self.lock();
            if state.loading {
                return PredictionOutcome::Busy;
            }
            state.loading = true;
            state.loading_message = PREDICTING_STATUS.to_string();
            (state.active, state.location)
        };
        let guard = LoadingGuard { controller: self };

        let result = self.models.success_prediction(plan, location, provider).await;
        let outcome = match result {
            Ok(prediction) => {
                let attached = {
                    let mut state = self.lock();
                    state
                        .chats
                        .get_mut(&provider)
                        .and_then(|chat| chat.messages.iter_mut().find(|m| m.id == message_id))
                        .map(|message| message.prediction = Some(prediction.clone()))
                        .is_some()
                };
                if attached {
                    PredictionOutcome::Attached(prediction)
                } else {
                    PredictionOutcome::Unmatched(prediction)
                }
            }
            Err(err) => {
                self.models.events().log_event(
                    EventLevel::Error,
                    Some("SES-0101"),
                    "session",
                    "Error generating prediction",
                    None,
                    Some(json!({ "provider": provider, "error": format!("{err:#}") })),
                );
                let message = ChatMessage::error(Role::System, PREDICTION_FAILED);
                self.lock().append(provider, message.clone());
                PredictionOutcome::Failed(message)
            }
        };
        drop(guard);
        outcome
    }
}
