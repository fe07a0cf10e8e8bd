//! One user's generate/execute workflow
//!
//! Every failure past generation is folded into a [`SessionOutcome`] so the
//! interface has a single result to display.

use crate::database::{DatabaseError, DatabaseType, DatabaseTypeExt, QueryEngine};
use crate::extract::extract_query_for;
use crate::llm::{GeneratedQuery, LlmError, LlmResult, QueryGenerator};
use crate::password_sanitizer::sanitize_text_for_logging;
use crate::schema::Schema;
use crate::table::{NormalizedTable, normalize};
use crate::validate::{ValidationError, validate};
use tracing::{debug, info, warn};

/// What happened when a query was run
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Table(NormalizedTable),
    NoResults,
    Rejected(ValidationError),
    Failed(String),
}

impl SessionOutcome {
    pub fn table(&self) -> Option<&NormalizedTable> {
        match self {
            SessionOutcome::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Table(_) | SessionOutcome::NoResults)
    }
}

pub struct Session {
    engine: Box<dyn QueryEngine>,
    generator: Option<QueryGenerator>,
    last_query: Option<GeneratedQuery>,
}

impl Session {
    pub fn new(engine: Box<dyn QueryEngine>, generator: QueryGenerator) -> Self {
        Self {
            engine,
            generator: Some(generator),
            last_query: None,
        }
    }

    /// Session for running user-supplied query text only
    pub fn without_generator(engine: Box<dyn QueryEngine>) -> Self {
        Self {
            engine,
            generator: None,
            last_query: None,
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        self.engine.database_type()
    }

    pub fn last_query(&self) -> Option<&GeneratedQuery> {
        self.last_query.as_ref()
    }

    pub async fn schema(&self) -> Result<Schema, DatabaseError> {
        self.engine.schema().await
    }

    /// Introspect the schema and generate a query, replacing any held query
    pub async fn generate(&mut self, question: &str) -> LlmResult<&GeneratedQuery> {
        self.last_query = None;
        let generator = self.generator.as_ref().ok_or_else(|| {
            LlmError::Configuration("No LLM provider is configured".to_string())
        })?;
        let schema = self
            .engine
            .schema()
            .await
            .map_err(|e| LlmError::Schema(e.to_string()))?;
        debug!(
            "[Session::generate] Schema has {} entities",
            schema.len()
        );

        let query = generator
            .generate(question, &schema, self.engine.database_type())
            .await?;
        Ok(self.last_query.insert(query))
    }

    /// Run the held query; it is consumed whether or not execution succeeds
    pub async fn execute(&mut self) -> SessionOutcome {
        match self.last_query.take() {
            Some(query) => self.run(&query).await,
            None => SessionOutcome::Failed("No query has been generated yet.".to_string()),
        }
    }

    /// Extract, validate and run query text supplied directly by the user
    pub async fn execute_text(&self, text: &str) -> SessionOutcome {
        let database_type = self.database_type();
        let extracted = extract_query_for(text, database_type.dialect());
        let query = GeneratedQuery::new(database_type, extracted, text.to_string());
        self.run(&query).await
    }

    async fn run(&self, query: &GeneratedQuery) -> SessionOutcome {
        if let Err(e) = validate(query) {
            warn!("Query rejected before execution: {}", e);
            return SessionOutcome::Rejected(e);
        }

        info!("Executing {} query", query.database_type);
        match self.engine.execute(&query.text).await {
            Ok(result) => {
                let table = normalize(result, query.dialect);
                debug!(
                    "[Session::run] Normalized {} rows x {} columns",
                    table.len(),
                    table.columns().len()
                );
                if table.is_empty() {
                    SessionOutcome::NoResults
                } else {
                    SessionOutcome::Table(table)
                }
            }
            Err(e) => {
                let message = sanitize_text_for_logging(&e.to_string());
                warn!("Query execution failed: {}", message);
                SessionOutcome::Failed(format!("Error executing query: {message}"))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::database::{DatabaseError, DatabaseType, ExecutionResult, QueryEngine};
    use crate::schema::Schema;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory engine returning a fixed schema and result
    pub struct FixtureEngine {
        pub database_type: DatabaseType,
        pub schema: Schema,
        pub result: Result<ExecutionResult, String>,
        pub executed: Mutex<Vec<String>>,
    }

    impl FixtureEngine {
        pub fn new(database_type: DatabaseType, schema: Schema, result: ExecutionResult) -> Self {
            Self {
                database_type,
                schema,
                result: Ok(result),
                executed: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(database_type: DatabaseType, schema: Schema, message: &str) -> Self {
            Self {
                database_type,
                schema,
                result: Err(message.to_string()),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QueryEngine for FixtureEngine {
        fn database_type(&self) -> DatabaseType {
            self.database_type
        }

        async fn schema(&self) -> Result<Schema, DatabaseError> {
            Ok(self.schema.clone())
        }

        async fn execute(&self, query: &str) -> Result<ExecutionResult, DatabaseError> {
            self.executed.lock().unwrap().push(query.to_string());
            self.result
                .clone()
                .map_err(DatabaseError::QueryError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixtureEngine;
    use super::*;
    use crate::database::{DatabaseType, ExecutionResult};
    use crate::llm::testing::ScriptedProvider;
    use crate::record;
    use crate::table::Cell;
    use crate::value::{Record, Value};
    use std::sync::Arc;

    fn students() -> Schema {
        let mut schema = Schema::new();
        schema.insert("students", vec!["id".to_string(), "name".to_string()]);
        schema
    }

    /// Shares the fixture so tests can inspect what was executed
    struct Shared(Arc<FixtureEngine>);

    #[async_trait::async_trait]
    impl QueryEngine for Shared {
        fn database_type(&self) -> DatabaseType {
            self.0.database_type()
        }

        async fn schema(&self) -> Result<Schema, DatabaseError> {
            self.0.schema().await
        }

        async fn execute(
            &self,
            query: &str,
        ) -> Result<crate::database::ExecutionResult, DatabaseError> {
            self.0.execute(query).await
        }
    }

    fn session(engine: FixtureEngine, reply: &str) -> (Session, Arc<FixtureEngine>) {
        let engine = Arc::new(engine);
        let generator = QueryGenerator::new(Box::new(ScriptedProvider::replying(reply)));
        (
            Session::new(Box::new(Shared(Arc::clone(&engine))), generator),
            engine,
        )
    }

    #[tokio::test]
    async fn test_list_student_names_end_to_end() {
        let engine = FixtureEngine::new(
            DatabaseType::MySQL,
            students(),
            ExecutionResult::Records(vec![
                record! { "name" => "Alice" },
                record! { "name" => "Bob" },
            ]),
        );
        let (mut session, engine) =
            session(engine, "```sql\nSELECT name FROM students;\n```");

        let query = session.generate("list all student names").await.unwrap();
        assert_eq!(query.text, "SELECT name FROM students;");
        assert!(validate(query).is_ok());

        let outcome = session.execute().await;
        let table = outcome.table().expect("table outcome");
        assert_eq!(table.columns(), ["name"]);
        assert_eq!(
            table.rows(),
            [
                vec![Cell::Text("Alice".to_string())],
                vec![Cell::Text("Bob".to_string())],
            ]
        );
        assert_eq!(
            engine.executed.lock().unwrap().as_slice(),
            ["SELECT name FROM students;"]
        );
        assert!(session.last_query().is_none());
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected_without_execution() {
        let engine = FixtureEngine::new(DatabaseType::PostgreSQL, students(), ExecutionResult::Empty);
        let (mut session, engine) = session(engine, "Sorry, I cannot help with that.");

        session.generate("who is the best student?").await.unwrap();
        let outcome = session.execute().await;
        assert!(matches!(outcome, SessionOutcome::Rejected(ValidationError::InvalidSql(_))));
        assert!(engine.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_becomes_message() {
        let engine =
            FixtureEngine::failing(DatabaseType::MySQL, students(), "Table 'students' doesn't exist");
        let (session, _) = session(engine, "");

        match session.execute_text("SELECT name FROM students").await {
            SessionOutcome::Failed(message) => assert!(message.contains("doesn't exist")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_result_is_no_results() {
        let engine =
            FixtureEngine::new(DatabaseType::MySQL, students(), ExecutionResult::Records(vec![]));
        let (session, _) = session(engine, "");
        assert_eq!(
            session.execute_text("SELECT name FROM students WHERE id = 0").await,
            SessionOutcome::NoResults
        );
    }

    #[tokio::test]
    async fn test_documents_without_fields_are_no_results() {
        let engine = FixtureEngine::new(
            DatabaseType::MongoDB,
            students(),
            ExecutionResult::Records(vec![Record::new(), Record::new()]),
        );
        let (session, _) = session(engine, "");
        assert_eq!(
            session
                .execute_text("db.students.find({}, {'_id': 0, 'missing': 1})")
                .await,
            SessionOutcome::NoResults
        );
    }

    #[tokio::test]
    async fn test_document_count_is_single_cell_table() {
        let engine = FixtureEngine::new(
            DatabaseType::MongoDB,
            students(),
            ExecutionResult::Rows(vec![Value::Int(2)]),
        );
        let (session, engine) = session(engine, "");

        let outcome = session
            .execute_text("```python\ncount = db[\"students\"].count_documents({})\n```")
            .await;
        let table = outcome.table().expect("table outcome");
        assert_eq!(table.columns(), ["Column_1"]);
        assert_eq!(table.rows(), [vec![Cell::Int(2)]]);
        assert_eq!(
            engine.executed.lock().unwrap().as_slice(),
            ["db[\"students\"].count_documents({})"]
        );
    }

    #[tokio::test]
    async fn test_generate_without_provider_is_configuration_error() {
        let engine = FixtureEngine::new(DatabaseType::MySQL, students(), ExecutionResult::Empty);
        let mut session = Session::without_generator(Box::new(engine));
        assert!(matches!(
            session.generate("list all students").await,
            Err(LlmError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_without_query() {
        let engine = FixtureEngine::new(DatabaseType::MySQL, students(), ExecutionResult::Empty);
        let (mut session, _) = session(engine, "");
        assert!(matches!(session.execute().await, SessionOutcome::Failed(_)));
    }
}
