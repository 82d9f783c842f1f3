//! Static provider catalogue and the allow-list/default resolution.

use crate::env::{read_first, EnvSource};
use crate::models::Provider;

/// Built-in description of a provider before any environment overrides.
pub struct ProviderSeed {
    pub provider: Provider,
    pub base_url: &'static str,
    pub fast_model: &'static str,
    pub thinking_model: &'static str,
    pub key_vars: &'static [&'static str],
    pub model_vars: &'static [&'static str],
    pub thinking_model_vars: &'static [&'static str],
    pub base_url_vars: &'static [&'static str],
}

pub const PROVIDER_SEEDS: &[ProviderSeed] = &[
    ProviderSeed {
        provider: Provider::Gemini,
        base_url: "https://generativelanguage.googleapis.com",
        fast_model: "gemini-2.5-flash",
        thinking_model: "gemini-2.5-pro",
        key_vars: &[
            "REACT_APP_GEMINI_API_KEY",
            "VITE_GEMINI_API_KEY",
            "GEMINI_API_KEY",
            "API_KEY",
        ],
        model_vars: &["REACT_APP_GEMINI_MODEL", "VITE_GEMINI_MODEL", "GEMINI_MODEL"],
        thinking_model_vars: &[
            "REACT_APP_GEMINI_MODEL_THINKING",
            "VITE_GEMINI_MODEL_THINKING",
            "GEMINI_MODEL_THINKING",
        ],
        base_url_vars: &["GEMINI_BASE_URL"],
    },
    ProviderSeed {
        provider: Provider::OpenAi,
        base_url: "https://api.openai.com",
        fast_model: "gpt-4o-mini",
        thinking_model: "gpt-4o",
        key_vars: &[
            "REACT_APP_OPENAI_API_KEY",
            "VITE_OPENAI_API_KEY",
            "OPENAI_API_KEY",
        ],
        model_vars: &["REACT_APP_OPENAI_MODEL", "VITE_OPENAI_MODEL", "OPENAI_MODEL"],
        thinking_model_vars: &[
            "REACT_APP_OPENAI_MODEL_THINKING",
            "VITE_OPENAI_MODEL_THINKING",
            "OPENAI_MODEL_THINKING",
        ],
        base_url_vars: &["OPENAI_BASE_URL"],
    },
    ProviderSeed {
        provider: Provider::Claude,
        base_url: "https://api.anthropic.com",
        fast_model: "claude-3-5-sonnet-20241022",
        thinking_model: "claude-3-5-sonnet-20241022",
        key_vars: &[
            "REACT_APP_ANTHROPIC_API_KEY",
            "VITE_ANTHROPIC_API_KEY",
            "ANTHROPIC_API_KEY",
        ],
        model_vars: &[
            "REACT_APP_ANTHROPIC_MODEL",
            "VITE_ANTHROPIC_MODEL",
            "ANTHROPIC_MODEL",
        ],
        thinking_model_vars: &[
            "REACT_APP_ANTHROPIC_MODEL_THINKING",
            "VITE_ANTHROPIC_MODEL_THINKING",
            "ANTHROPIC_MODEL_THINKING",
        ],
        base_url_vars: &["ANTHROPIC_BASE_URL"],
    },
];

const PROVIDER_LIST_VARS: &[&str] = &["VITE_AI_PROVIDERS", "REACT_APP_AI_PROVIDERS"];
const DEFAULT_PROVIDER_VARS: &[&str] = &["REACT_APP_AI_PROVIDER", "VITE_AI_PROVIDER", "AI_PROVIDER"];

pub fn seed(provider: Provider) -> &'static ProviderSeed {
    PROVIDER_SEEDS
        .iter()
        .find(|s| s.provider == provider)
        .unwrap_or(&PROVIDER_SEEDS[0])
}

/// Which providers this deployment exposes, and which one starts active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistry {
    available: Vec<Provider>,
    default: Provider,
}

impl ProviderRegistry {
    pub fn from_env(source: &dyn EnvSource) -> Self {
        let list = read_first(source, PROVIDER_LIST_VARS);
        let default = read_first(source, DEFAULT_PROVIDER_VARS);
        Self::resolve(list.as_deref(), default.as_deref())
    }

    /// Unknown entries are dropped; an empty allow-list means every provider.
    /// The default must be a member of the allow-list.
    pub fn resolve(list: Option<&str>, default: Option<&str>) -> Self {
        let mut available = Vec::new();
        for provider in parse_provider_list(list.unwrap_or_default()) {
            if !available.contains(&provider) {
                available.push(provider);
            }
        }
        if available.is_empty() {
            available = Provider::ALL.to_vec();
        }
        let default = default
            .and_then(|raw| raw.parse::<Provider>().ok())
            .filter(|p| available.contains(p))
            .unwrap_or(available[0]);
        Self { available, default }
    }

    pub fn available(&self) -> &[Provider] {
        &self.available
    }

    pub fn default_provider(&self) -> Provider {
        self.default
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.available.contains(&provider)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::resolve(None, None)
    }
}

fn parse_provider_list(value: &str) -> impl Iterator<Item = Provider> + '_ {
    value.split(',').filter_map(|part| part.parse::<Provider>().ok())
}
