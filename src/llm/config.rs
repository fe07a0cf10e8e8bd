//! Configuration for the LLM provider

use serde::{Deserialize, Serialize};

/// LLM provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    #[default]
    Azure,
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
}

impl LlmProviderType {
    /// Provider-specific environment variable consulted after `NLQUERY_LLM_API_KEY`
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            LlmProviderType::Azure => "AZURE_OPENAI_API_KEY",
            LlmProviderType::OpenAI => "OPENAI_API_KEY",
            LlmProviderType::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            LlmProviderType::Azure => None,
            LlmProviderType::OpenAI => Some("https://api.openai.com/v1"),
            LlmProviderType::Anthropic => Some("https://api.anthropic.com"),
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProviderType::Azure | LlmProviderType::OpenAI => "gpt-4o",
            LlmProviderType::Anthropic => "claude-sonnet-4-5-20250929",
        }
    }
}

pub const API_KEY_ENV_VAR: &str = "NLQUERY_LLM_API_KEY";

/// `[llm]` section of the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderType,

    /// Base URL; required for Azure, defaulted for the others
    pub endpoint: Option<String>,

    /// Azure deployment name
    pub deployment: Option<String>,

    /// Model name for OpenAI / Anthropic
    pub model: Option<String>,

    /// Azure REST API version
    pub api_version: String,

    /// Normally left unset and read from the environment
    pub api_key: Option<String>,

    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderType::Azure,
            endpoint: None,
            deployment: None,
            model: None,
            api_version: "2024-05-01-preview".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 800,
            timeout_seconds: 60,
        }
    }
}

impl LlmConfig {
    /// API key from config, then `NLQUERY_LLM_API_KEY`, then the provider's own variable
    pub fn api_key_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| lookup(API_KEY_ENV_VAR).filter(|key| !key.is_empty()))
            .or_else(|| lookup(self.provider.api_key_env_var()).filter(|key| !key.is_empty()))
    }

    pub fn resolved_endpoint(&self) -> Option<String> {
        self.endpoint
            .clone()
            .or_else(|| self.provider.default_endpoint().map(str::to_string))
            .map(|url| url.trim_end_matches('/').to_string())
    }

    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .or_else(|| match self.provider {
                LlmProviderType::Azure => self.deployment.clone(),
                _ => None,
            })
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    /// Validate configuration against the given environment lookup
    pub fn validate_with<F>(&self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key_with(&lookup).is_none() {
            return Err(format!(
                "LLM API key not found. Set {} or {}",
                API_KEY_ENV_VAR,
                self.provider.api_key_env_var()
            ));
        }

        if self.provider == LlmProviderType::Azure {
            if self.endpoint.as_deref().unwrap_or("").is_empty() {
                return Err("Azure OpenAI requires llm.endpoint (or NLQUERY_LLM_ENDPOINT)".to_string());
            }
            if self.deployment.as_deref().unwrap_or("").is_empty() {
                return Err(
                    "Azure OpenAI requires llm.deployment (or NLQUERY_LLM_DEPLOYMENT)".to_string(),
                );
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 2.0".to_string());
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("timeout_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}
