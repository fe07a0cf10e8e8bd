//! Prompt construction for query generation

use crate::database::{DatabaseType, DatabaseTypeExt, Dialect};
use crate::llm::client::ChatMessage;
use crate::schema::Schema;

/// Prompt generator for natural-language queries
pub struct PromptGenerator;

impl PromptGenerator {
    /// System prompt carrying the dialect rules and the schema as JSON
    pub fn system_prompt(database_type: DatabaseType, schema: &Schema) -> String {
        let name = database_type.display_name();
        let mut prompt = format!(
            "You are a database query assistant. Based on the provided database schema, \
             convert the user's natural language question into a single valid query.\n\
             The target database type is {name}.\n\n"
        );

        match database_type.dialect() {
            Dialect::Sql => {
                prompt.push_str(&format!(
                    "For {name} queries:\n\
                     - Use the table names and column names exactly as provided in the schema\n\
                     - Follow {name} syntax and conventions\n\
                     - Write literal values inline; do not use parameter placeholders\n"
                ));
            }
            Dialect::Document => {
                prompt.push_str(
                    "For MongoDB queries:\n\
                     - Use the collection names and field names exactly as provided in the schema\n\
                     - Start with db[\"collection_name\"]\n\
                     - Use only find, find_one, aggregate or count_documents\n\
                     - Write filters, projections and pipeline stages as JSON-style documents\n",
                );
            }
        }

        prompt.push_str(
            "\nReply with the query in a single fenced code block and nothing else.\n\nSchema:\n",
        );
        prompt.push_str(&schema.to_json_pretty());
        prompt
    }

    /// The `[system, user]` conversation sent to the provider
    pub fn messages(question: &str, database_type: DatabaseType, schema: &Schema) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(Self::system_prompt(database_type, schema)),
            ChatMessage::user(question),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::ChatRole;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.insert("students", vec!["id".to_string(), "name".to_string()]);
        schema
    }

    #[test]
    fn test_sql_prompt_names_dialect_and_schema() {
        let prompt = PromptGenerator::system_prompt(DatabaseType::PostgreSQL, &schema());
        assert!(prompt.contains("The target database type is PostgreSQL"));
        assert!(prompt.contains("\"students\""));
        assert!(prompt.contains("\"name\""));
        assert!(!prompt.contains("db[\"collection_name\"]"));
    }

    #[test]
    fn test_document_prompt_restricts_operations() {
        let prompt = PromptGenerator::system_prompt(DatabaseType::MongoDB, &schema());
        assert!(prompt.contains("db[\"collection_name\"]"));
        assert!(prompt.contains("aggregate"));
    }

    #[test]
    fn test_messages_are_system_then_user() {
        let messages =
            PromptGenerator::messages("list all students", DatabaseType::MySQL, &schema());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[1].content, "list all students");
    }
}
