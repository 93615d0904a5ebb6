use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use stepwright_engine::AuthoringConfig;
use stepwright_llm::LlmConfig;

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub llm: LlmSection,
    #[serde(default)]
    pub authoring: AuthoringConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct LlmSection {
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Name of an environment variable holding the API key. Used when
    /// `api_key` is not set.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingSection {
    /// Directory for the daily JSON log file. Console only when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl LlmSection {
    pub fn to_llm_config(
        &self,
        model_override: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> LlmConfig {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| self.api_key_env.as_deref().and_then(&env));
        LlmConfig {
            base_url: self
                .endpoint
                .trim_end_matches('/')
                .trim_end_matches("/chat/completions")
                .to_string(),
            api_key,
            model: model_override.unwrap_or(&self.model).to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens.or(LlmConfig::default().max_tokens),
        }
    }
}

pub fn parse_config(content: &str) -> Result<CliConfig> {
    Ok(toml_edit::de::from_str(content)?)
}

pub fn load_config(path: &Path) -> Result<CliConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}
