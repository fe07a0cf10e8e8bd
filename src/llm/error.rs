//! Error types for LLM query generation

use thiserror::Error;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },

    #[error("Timeout error: request took longer than {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LlmError {
    /// Whether a later attempt could succeed; nothing retries automatically
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout { .. } => true,
            LlmError::Api { status_code, .. } => *status_code == 429 || *status_code >= 500,
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            LlmError::Provider(msg) => format!("The language model returned an unusable response: {msg}"),
            LlmError::Configuration(msg) => {
                format!("Configuration issue: {msg}. Check your config file or environment variables.")
            }
            LlmError::Schema(msg) => {
                format!("Schema introspection failed: {msg}. Ensure the database is reachable.")
            }
            LlmError::Network(msg) => format!("Network error: {msg}. Check your connection."),
            LlmError::Api {
                status_code: 401 | 403,
                ..
            } => "The LLM endpoint rejected the API key. Check NLQUERY_LLM_API_KEY.".to_string(),
            LlmError::Api {
                status_code,
                message,
            } => format!("LLM API error ({status_code}): {message}"),
            LlmError::Timeout { timeout_secs } => format!(
                "Request timed out after {timeout_secs} seconds. Try again or increase llm.timeout_seconds."
            ),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LlmError::Network("reset".into()), true)]
    #[case(LlmError::Timeout { timeout_secs: 30 }, true)]
    #[case(LlmError::Api { status_code: 429, message: "slow down".into() }, true)]
    #[case(LlmError::Api { status_code: 503, message: "busy".into() }, true)]
    #[case(LlmError::Api { status_code: 400, message: "bad".into() }, false)]
    #[case(LlmError::Configuration("no key".into()), false)]
    fn test_is_retryable(#[case] error: LlmError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_user_message_for_auth_failure() {
        let error = LlmError::Api {
            status_code: 401,
            message: "invalid key".into(),
        };
        assert!(error.user_message().contains("API key"));
    }
}
