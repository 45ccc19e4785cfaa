use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub const CURRENT_CONFIG_VERSION: &str = "v1";

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_fallback_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct ModelRouterSettings {
    pub prefer_local: bool,
    pub ollama_host: String,
    /// Wall-clock bound for a single completion call. Every external model
    /// call is raced against this; nothing is allowed to hang.
    pub request_timeout_secs: u64,
    pub fallback_model: String,
}

impl Default for ModelRouterSettings {
    fn default() -> Self {
        Self {
            prefer_local: true,
            ollama_host: default_ollama_host(),
            request_timeout_secs: default_request_timeout_secs(),
            fallback_model: default_fallback_model(),
        }
    }
}

/// Identity used for commits the agent makes on the user's behalf.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "Reme Agent".to_string(),
            email: "agent@reme.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct MemorySettings {
    /// Notes always bundled into prompts.
    pub hot_limit: u64,
    /// Notes retrieved by relevance per query.
    pub warm_limit: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            hot_limit: 5,
            warm_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, Default)]
#[serde(default)]
pub struct Config {
    pub config_version: String,
    pub model: ModelRouterSettings,
    pub git: GitIdentity,
    pub memory: MemorySettings,
}

impl Config {
    pub fn from_raw(raw: &str) -> Config {
        match serde_json::from_str::<Config>(raw) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Invalid config file, using defaults: {}", err);
                Config::default()
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.config_version = CURRENT_CONFIG_VERSION.to_string();
        if self.model.request_timeout_secs == 0 {
            self.model.request_timeout_secs = default_request_timeout_secs();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_raw_falls_back_to_defaults() {
        let config = Config::from_raw("{not json");
        assert!(config.model.prefer_local);
        assert_eq!(config.memory.hot_limit, 5);
    }

    #[test]
    fn partial_raw_fills_missing_fields() {
        let config = Config::from_raw(r#"{ "model": { "prefer_local": false } }"#);
        assert!(!config.model.prefer_local);
        assert_eq!(config.model.request_timeout_secs, 15);
        assert_eq!(config.git.name, "Reme Agent");
    }

    #[test]
    fn normalized_stamps_version_and_repairs_timeout() {
        let mut config = Config::default();
        config.model.request_timeout_secs = 0;
        let normalized = config.normalized();
        assert_eq!(normalized.config_version, CURRENT_CONFIG_VERSION);
        assert_eq!(normalized.model.request_timeout_secs, 15);
    }
}
