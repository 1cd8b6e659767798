use serde::Deserialize;
use std::path::Path;

use super::ConfigError;
use super::pricing::TokenPricing;

/// Complete YAML configuration structure
///
/// Every section is optional. Values present here override environment
/// variables; anything left out keeps its environment or default value.
///
/// # Example YAML structure
/// ```yaml
/// openai:
///   api_key: "sk-..."
///
/// session:
///   model: "gpt-4o-realtime-preview"
///   voice: "shimmer"
///   instructions: "You are a concise assistant."
///   modalities: ["text"]
///   turn_detection: null
///   connection:
///     heartbeat_interval_ms: 15000
///     retry:
///       max_attempts: 3
///
/// pricing:
///   input_cost_per_1k: 0.06
///   output_cost_per_1k: 0.24
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub openai: Option<OpenAIYaml>,
    /// Partial `RealtimeSessionConfig`, merged key by key
    pub session: Option<serde_yaml::Value>,
    pub pricing: Option<TokenPricing>,
}

/// OpenAI credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
}

impl YamlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

/// Overlay `overlay` onto `base`, descending into mappings.
pub(crate) fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
