//! Natural-language to query generation
//!
//! A [`QueryGenerator`] sends the question and the target schema to an
//! [`LlmProvider`] and extracts the runnable query from the reply. Validation
//! and execution are left to the caller.

pub mod client;
pub mod config;
pub mod error;
pub mod prompt;

pub use client::{ChatMessage, ChatRole, LlmProvider, create_llm_provider};
pub use config::{LlmConfig, LlmProviderType};
pub use error::{LlmError, LlmResult};
pub use prompt::PromptGenerator;

use crate::database::{DatabaseType, DatabaseTypeExt, Dialect};
use crate::extract::extract_query_for;
use crate::schema::Schema;
use tracing::{debug, info};

/// A query produced for one question, tagged with the dialect it must be validated in
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuery {
    pub dialect: Dialect,
    pub database_type: DatabaseType,
    pub text: String,
    pub raw_response: String,
}

impl GeneratedQuery {
    pub fn new(database_type: DatabaseType, text: String, raw_response: String) -> Self {
        Self {
            dialect: database_type.dialect(),
            database_type,
            text,
            raw_response,
        }
    }
}

pub struct QueryGenerator {
    provider: Box<dyn LlmProvider>,
}

impl QueryGenerator {
    pub fn new(provider: Box<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &LlmConfig) -> LlmResult<Self> {
        Ok(Self::new(create_llm_provider(config)?))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Ask the provider for a query answering `question` against `schema`
    pub async fn generate(
        &self,
        question: &str,
        schema: &Schema,
        database_type: DatabaseType,
    ) -> LlmResult<GeneratedQuery> {
        if question.trim().is_empty() {
            return Err(LlmError::Configuration("Question is empty".to_string()));
        }
        if schema.is_empty() {
            debug!("[QueryGenerator::generate] Schema is empty; the model gets no identifiers");
        }

        info!(
            "Generating {} query with {}",
            database_type,
            self.provider.name()
        );
        let messages = PromptGenerator::messages(question, database_type, schema);
        let response = self.provider.complete(&messages).await?;
        let text = extract_query_for(&response, database_type.dialect());
        debug!("[QueryGenerator::generate] Extracted query: {}", text);

        Ok(GeneratedQuery::new(database_type, text, response))
    }
}
