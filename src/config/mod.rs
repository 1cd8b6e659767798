//! Client configuration.
//!
//! Configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//! The `.env` file is loaded by the binary at startup, so by the time these
//! loaders run it has already become part of the environment.
//!
//! # Example
//! ```rust,no_run
//! use waav_realtime::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variables underneath
//! let config = ClientConfig::from_file(&PathBuf::from("realtime.yaml"))?;
//! println!("Using model {}", config.session.model);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroizing;

pub mod pricing;
mod yaml;

pub use pricing::{
    CostInfo, DEFAULT_TOKEN_PRICING, TokenPricing, calculate_cost, get_token_pricing,
    list_priced_families, resolve_pricing,
};
pub use yaml::{OpenAIYaml, YamlConfig};

use crate::core::realtime::openai::{OpenAIRealtimeVoice, RealtimeSessionConfig};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "OPENAI_TOKEN";
pub const ENV_MODEL: &str = "OPENAI_REALTIME_MODEL";
pub const ENV_URL: &str = "OPENAI_REALTIME_URL";
pub const ENV_VOICE: &str = "OPENAI_REALTIME_VOICE";
pub const ENV_INSTRUCTIONS: &str = "OPENAI_REALTIME_INSTRUCTIONS";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("OpenAI API key not set (use OPENAI_API_KEY or openai.api_key)")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Resolved configuration for a client application
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: Zeroizing<String>,
    pub session: RealtimeSessionConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"[REDACTED]")
            .field("session", &self.session)
            .finish()
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingApiKey`] when neither `OPENAI_API_KEY`
    /// nor `OPENAI_TOKEN` is set, or [`ConfigError::Invalid`] when the
    /// resulting session configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let (api_key, session) = Self::env_layer();
        Self::finish(api_key, session)
    }

    /// Load configuration from a YAML file layered over the environment
    ///
    /// Keys present in the file win; omitted keys keep their environment or
    /// default value.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let (mut api_key, mut session) = Self::env_layer();

        if let Some(key) = yaml_config
            .openai
            .and_then(|o| o.api_key)
            .filter(|k| !k.trim().is_empty())
        {
            api_key = Some(key);
        }

        if let Some(overlay) = yaml_config.session {
            let mut base = serde_yaml::to_value(&session)?;
            yaml::merge_values(&mut base, overlay);
            session = serde_yaml::from_value(base)?;
        }

        if let Some(pricing) = yaml_config.pricing {
            session.pricing = Some(pricing);
        }

        Self::finish(api_key, session)
    }

    fn env_layer() -> (Option<String>, RealtimeSessionConfig) {
        let api_key = env_value(ENV_API_KEY).or_else(|| env_value(ENV_API_KEY_FALLBACK));

        let mut session = RealtimeSessionConfig::default();
        if let Some(model) = env_value(ENV_MODEL) {
            session.model = model;
        }
        if let Some(url) = env_value(ENV_URL) {
            session.connection.base_url = url;
        }
        if let Some(voice) = env_value(ENV_VOICE) {
            session.voice = OpenAIRealtimeVoice::from_str_or_default(&voice);
        }
        if let Some(instructions) = env_value(ENV_INSTRUCTIONS) {
            session.instructions = Some(instructions);
        }

        (api_key, session)
    }

    fn finish(api_key: Option<String>, session: RealtimeSessionConfig) -> Result<Self, ConfigError> {
        let api_key = api_key.ok_or(ConfigError::MissingApiKey)?;
        session
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self {
            api_key: Zeroizing::new(api_key),
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ALL_VARS: [&str; 6] = [
        ENV_API_KEY,
        ENV_API_KEY_FALLBACK,
        ENV_MODEL,
        ENV_URL,
        ENV_VOICE,
        ENV_INSTRUCTIONS,
    ];

    fn clear_env() {
        for var in ALL_VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    fn set_env(name: &str, value: &str) {
        unsafe {
            std::env::set_var(name, value);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        set_env(ENV_API_KEY, "sk-env");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api_key.as_str(), "sk-env");
        assert_eq!(config.session.model, "gpt-4o-realtime-preview");
        assert!(config.session.vad_enabled());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_token_fallback() {
        clear_env();
        set_env(ENV_API_KEY_FALLBACK, "sk-token");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api_key.as_str(), "sk-token");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_key() {
        clear_env();
        let result = ClientConfig::from_env();
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        set_env(ENV_API_KEY, "sk-env");
        set_env(ENV_MODEL, "gpt-4o-mini-realtime-preview");
        set_env(ENV_VOICE, "Shimmer");
        set_env(ENV_INSTRUCTIONS, "Be brief.");
        set_env(ENV_URL, "ws://localhost:9000/v1/realtime");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.session.model, "gpt-4o-mini-realtime-preview");
        assert_eq!(config.session.voice, OpenAIRealtimeVoice::Shimmer);
        assert_eq!(config.session.instructions.as_deref(), Some("Be brief."));
        assert_eq!(
            config.session.connection.base_url,
            "ws://localhost:9000/v1/realtime"
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_file_overrides_env() {
        clear_env();
        set_env(ENV_API_KEY, "sk-env");
        set_env(ENV_MODEL, "gpt-4o-mini-realtime-preview");
        set_env(ENV_INSTRUCTIONS, "From env.");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("realtime.yaml");
        fs::write(
            &path,
            r#"
openai:
  api_key: "sk-yaml"
session:
  voice: "echo"
  turn_detection: null
  connection:
    retry:
      max_attempts: 2
pricing:
  input_cost_per_1k: 0.01
  output_cost_per_1k: 0.02
"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.api_key.as_str(), "sk-yaml");
        // Env values survive where the file is silent
        assert_eq!(config.session.model, "gpt-4o-mini-realtime-preview");
        assert_eq!(config.session.instructions.as_deref(), Some("From env."));
        assert_eq!(config.session.voice, OpenAIRealtimeVoice::Echo);
        assert!(!config.session.vad_enabled());
        assert_eq!(config.session.connection.retry.max_attempts, 2);
        assert_eq!(config.session.connection.retry.initial_delay_ms, 1000);
        assert_eq!(config.session.pricing.unwrap().input_cost_per_1k, 0.01);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_session() {
        clear_env();
        set_env(ENV_API_KEY, "sk-env");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("realtime.yaml");
        fs::write(&path, "session:\n  temperature: 5.0\n").unwrap();

        let result = ClientConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        clear_env();
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ClientConfig {
            api_key: Zeroizing::new("sk-secret".to_string()),
            session: RealtimeSessionConfig::default(),
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
