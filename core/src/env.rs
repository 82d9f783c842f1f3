use std::collections::HashMap;

/// Anything that can answer "what is the value of this variable".
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// First non-blank value among `keys`, checked in order.
pub fn read_first(source: &dyn EnvSource, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| source.var(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
