use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use super::providers::{seed, ProviderRegistry};
use crate::env::{read_first, EnvSource};
use crate::errors::WhitetailError;
use crate::models::Provider;

const MAPS_KEY_VARS: &[&str] = &[
    "VITE_GOOGLE_MAPS_API_KEY",
    "REACT_APP_GOOGLE_MAPS_API_KEY",
    "GOOGLE_MAPS_API_KEY",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderModels {
    pub fast: String,
    pub thinking: String,
}

impl ProviderModels {
    pub fn pick(&self, thinking: bool) -> &str {
        if thinking {
            &self.thinking
        } else {
            &self.fast
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub models: ProviderModels,
    pub base_url: String,
}

/// Public view of a provider, safe to hand to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct AiProviderInfo {
    pub id: Provider,
    pub display_name: &'static str,
    pub models: ProviderModels,
    pub has_credentials: bool,
    pub is_default: bool,
}

/// Everything needed to issue one request against one provider.
#[derive(Debug, Clone)]
pub struct AiRuntimeSelection {
    pub provider: Provider,
    pub model: String,
    pub secret: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub registry: ProviderRegistry,
    providers: HashMap<Provider, ProviderSettings>,
    pub maps_api_key: Option<String>,
}

impl AiSettings {
    pub fn from_env(source: &dyn EnvSource) -> Self {
        let providers = Provider::ALL
            .into_iter()
            .map(|provider| {
                let seed = seed(provider);
                let settings = ProviderSettings {
                    api_key: read_first(source, seed.key_vars),
                    models: ProviderModels {
                        fast: read_first(source, seed.model_vars)
                            .unwrap_or_else(|| seed.fast_model.to_string()),
                        thinking: read_first(source, seed.thinking_model_vars)
                            .unwrap_or_else(|| seed.thinking_model.to_string()),
                    },
                    base_url: read_first(source, seed.base_url_vars)
                        .unwrap_or_else(|| seed.base_url.to_string()),
                };
                (provider, settings)
            })
            .collect();
        Self {
            registry: ProviderRegistry::from_env(source),
            providers,
            maps_api_key: read_first(source, MAPS_KEY_VARS),
        }
    }

    pub fn provider(&self, provider: Provider) -> Option<&ProviderSettings> {
        self.providers.get(&provider)
    }

    pub fn list_providers(&self) -> Vec<AiProviderInfo> {
        self.registry
            .available()
            .iter()
            .filter_map(|&provider| {
                let settings = self.providers.get(&provider)?;
                Some(AiProviderInfo {
                    id: provider,
                    display_name: provider.label(),
                    models: settings.models.clone(),
                    has_credentials: settings.api_key.is_some(),
                    is_default: provider == self.registry.default_provider(),
                })
            })
            .collect()
    }

    /// Pick the model and credentials for a call. Fails before any network
    /// activity when the key is missing.
    pub fn resolve_runtime(&self, provider: Provider, thinking: bool) -> Result<AiRuntimeSelection> {
        let settings = self
            .providers
            .get(&provider)
            .ok_or(WhitetailError::MissingApiKey { provider })?;
        let secret = settings
            .api_key
            .clone()
            .ok_or(WhitetailError::MissingApiKey { provider })?;
        Ok(AiRuntimeSelection {
            provider,
            model: settings.models.pick(thinking).to_string(),
            secret,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }
}
