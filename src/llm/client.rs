//! Chat-completion clients for the supported LLM providers

use crate::llm::config::{LlmConfig, LlmProviderType};
use crate::llm::error::{LlmError, LlmResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const TOP_P: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

/// One message of a chat-completion conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A chat-completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send the conversation and return the assistant's reply text
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<String>;

    fn name(&self) -> &str;
}

/// Sampling parameters shared by every provider
#[derive(Debug, Clone, Copy)]
struct Sampling {
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
}

impl Sampling {
    fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_seconds,
        }
    }
}

fn http_client(timeout_secs: u64) -> LlmResult<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a JSON request and decode the JSON reply, mapping transport and status failures
async fn send_json<B, R>(request: RequestBuilder, body: &B, timeout_secs: u64) -> LlmResult<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let response = request.json(body).send().await.map_err(|e| {
        if e.is_timeout() {
            LlmError::Timeout { timeout_secs }
        } else {
            LlmError::Network(format!("Request failed: {e}"))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(LlmError::Api {
            status_code: status.as_u16(),
            message: error_text,
        });
    }

    let body = response.text().await?;
    decode(&body)
}

fn decode<R: DeserializeOwned>(body: &str) -> LlmResult<R> {
    Ok(serde_json::from_str(body)?)
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionResponse {
    fn into_text(self) -> LlmResult<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Provider("No choices in response".to_string()))
    }
}

/// OpenAI chat completions
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    sampling: Sampling,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, model: String, config: &LlmConfig) -> LlmResult<Self> {
        let sampling = Sampling::from_config(config);
        Ok(Self {
            client: http_client(sampling.timeout_secs)?,
            api_key,
            base_url,
            model,
            sampling,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: Some(&self.model),
            messages,
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
            top_p: TOP_P,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<String> {
        debug!(
            "[OpenAiProvider::complete] model: {}, max_tokens: {}, temperature: {}",
            self.model, self.sampling.max_tokens, self.sampling.temperature
        );
        let request = self.client.post(self.url()).bearer_auth(&self.api_key);
        let response: ChatCompletionResponse =
            send_json(request, &self.request_body(messages), self.sampling.timeout_secs).await?;
        response.into_text()
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

/// Azure OpenAI deployment
pub struct AzureOpenAiProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    deployment: String,
    api_version: String,
    sampling: Sampling,
}

impl AzureOpenAiProvider {
    pub fn new(
        api_key: String,
        endpoint: String,
        deployment: String,
        config: &LlmConfig,
    ) -> LlmResult<Self> {
        let sampling = Sampling::from_config(config);
        Ok(Self {
            client: http_client(sampling.timeout_secs)?,
            api_key,
            endpoint,
            deployment,
            api_version: config.api_version.clone(),
            sampling,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<String> {
        debug!(
            "[AzureOpenAiProvider::complete] deployment: {}, api-version: {}",
            self.deployment, self.api_version
        );
        let body = ChatCompletionRequest {
            model: None,
            messages,
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
            top_p: TOP_P,
        };
        let request = self.client.post(self.url()).header("api-key", &self.api_key);
        let response: ChatCompletionResponse =
            send_json(request, &body, self.sampling.timeout_secs).await?;
        response.into_text()
    }

    fn name(&self) -> &str {
        "Azure OpenAI"
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic messages API
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    sampling: Sampling,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: String, model: String, config: &LlmConfig) -> LlmResult<Self> {
        let sampling = Sampling::from_config(config);
        Ok(Self {
            client: http_client(sampling.timeout_secs)?,
            api_key,
            base_url,
            model,
            sampling,
        })
    }

    /// System messages travel in a top-level field, not in the message list
    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> AnthropicRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();

        AnthropicRequest {
            model: &self.model,
            max_tokens: self.sampling.max_tokens,
            // Anthropic caps temperature at 1.0
            temperature: self.sampling.temperature.min(1.0),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .collect(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<String> {
        debug!(
            "[AnthropicProvider::complete] model: {}, max_tokens: {}",
            self.model, self.sampling.max_tokens
        );
        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let response: AnthropicResponse =
            send_json(request, &self.request_body(messages), self.sampling.timeout_secs).await?;

        response
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| LlmError::Provider("No content in response".to_string()))
    }

    fn name(&self) -> &str {
        "Anthropic"
    }
}

/// Build the provider named by the configuration, reading the API key from the environment
pub fn create_llm_provider(config: &LlmConfig) -> LlmResult<Box<dyn LlmProvider>> {
    create_llm_provider_with(config, |name| std::env::var(name).ok())
}

pub fn create_llm_provider_with<F>(config: &LlmConfig, lookup: F) -> LlmResult<Box<dyn LlmProvider>>
where
    F: Fn(&str) -> Option<String>,
{
    let api_key = config.api_key_with(lookup).ok_or_else(|| {
        LlmError::Configuration(format!(
            "No API key for {:?}; set NLQUERY_LLM_API_KEY or {}",
            config.provider,
            config.provider.api_key_env_var()
        ))
    })?;

    let endpoint = config.resolved_endpoint().ok_or_else(|| {
        LlmError::Configuration("llm.endpoint is required for Azure OpenAI".to_string())
    })?;

    match config.provider {
        LlmProviderType::Azure => {
            let deployment = config.deployment.clone().ok_or_else(|| {
                LlmError::Configuration("llm.deployment is required for Azure OpenAI".to_string())
            })?;
            Ok(Box::new(AzureOpenAiProvider::new(
                api_key, endpoint, deployment, config,
            )?))
        }
        LlmProviderType::OpenAI => Ok(Box::new(OpenAiProvider::new(
            api_key,
            endpoint,
            config.resolved_model(),
            config,
        )?)),
        LlmProviderType::Anthropic => Ok(Box::new(AnthropicProvider::new(
            api_key,
            endpoint,
            config.resolved_model(),
            config,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are a database query assistant."),
            ChatMessage::user("list all students"),
        ]
    }

    fn with_key(name: &str) -> Option<String> {
        (name == "NLQUERY_LLM_API_KEY").then(|| "test-key".to_string())
    }

    #[test]
    fn test_chat_message_serialization() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_openai_request_body() {
        let provider = OpenAiProvider::new(
            "k".into(),
            "https://api.openai.com/v1".into(),
            "gpt-4o".into(),
            &LlmConfig::default(),
        )
        .unwrap();
        let messages = messages();
        let body = serde_json::to_value(provider.request_body(&messages)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(provider.url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_azure_url() {
        let provider = AzureOpenAiProvider::new(
            "k".into(),
            "https://example.openai.azure.com".into(),
            "gpt-4o".into(),
            &LlmConfig::default(),
        )
        .unwrap();
        assert_eq!(
            provider.url(),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-05-01-preview"
        );
    }

    #[test]
    fn test_anthropic_moves_system_prompt() {
        let provider = AnthropicProvider::new(
            "k".into(),
            "https://api.anthropic.com".into(),
            "claude".into(),
            &LlmConfig::default(),
        )
        .unwrap();
        let messages = messages();
        let body = serde_json::to_value(provider.request_body(&messages)).unwrap();
        assert_eq!(body["system"], "You are a database query assistant.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_empty_choices_is_provider_error() {
        let response: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(response.into_text(), Err(LlmError::Provider(_))));

        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "SELECT 1"}}]}"#,
        )
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "SELECT 1");
    }

    #[test]
    fn test_malformed_body_is_serialization_error() {
        let result: LlmResult<ChatCompletionResponse> = decode("<html>Bad Gateway</html>");
        assert!(matches!(result, Err(LlmError::Serialization(_))));
        assert!(!result.unwrap_err().is_retryable());
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = LlmConfig {
            provider: LlmProviderType::OpenAI,
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_provider_with(&config, |_| None),
            Err(LlmError::Configuration(_))
        ));
        let provider = create_llm_provider_with(&config, with_key).unwrap();
        assert_eq!(provider.name(), "OpenAI");
    }

    #[test]
    fn test_create_azure_provider_requires_endpoint() {
        let mut config = LlmConfig::default();
        assert!(matches!(
            create_llm_provider_with(&config, with_key),
            Err(LlmError::Configuration(_))
        ));
        config.endpoint = Some("https://example.openai.azure.com".into());
        config.deployment = Some("gpt-4o".into());
        let provider = create_llm_provider_with(&config, with_key).unwrap();
        assert_eq!(provider.name(), "Azure OpenAI");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let config = LlmConfig {
            provider: LlmProviderType::OpenAI,
            endpoint: Some("http://127.0.0.1:1".into()),
            timeout_seconds: 2,
            ..LlmConfig::default()
        };
        let provider = create_llm_provider_with(&config, with_key).unwrap();
        let err = provider.complete(&messages()).await.unwrap_err();
        assert!(matches!(err, LlmError::Network(_)), "got {err:?}");
        assert!(err.is_retryable());
    }
}
