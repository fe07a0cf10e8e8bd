//! Pre-execution checks for generated queries
//!
//! Both validators are fail-closed: anything that cannot be parsed is
//! rejected and never reaches a live database.

use crate::database::{DatabaseType, Dialect};
use crate::document_query::parse_document_query;
use crate::llm::GeneratedQuery;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect as SqlDialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::{Parser, ParserError};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No query was generated")]
    EmptyQuery,

    #[error("Invalid SQL query: {0}")]
    InvalidSql(String),

    #[error("Invalid MongoDB query: {0}")]
    InvalidDocumentQuery(String),
}

fn parse_statements(sql: &str, dialect: &dyn SqlDialect) -> Result<Vec<Statement>, ParserError> {
    Parser::parse_sql(dialect, sql)
}

/// Syntax check with the generic dialect; true iff at least one statement parses
pub fn validate_sql(sql: &str) -> bool {
    matches!(parse_statements(sql, &GenericDialect {}), Ok(statements) if !statements.is_empty())
}

/// Syntax check with the engine's own dialect, falling back to the generic one
pub fn validate_sql_for(sql: &str, database_type: DatabaseType) -> bool {
    check_sql(sql, database_type).is_ok()
}

fn check_sql(sql: &str, database_type: DatabaseType) -> Result<(), ValidationError> {
    if sql.trim().is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let native = match database_type {
        DatabaseType::MySQL => parse_statements(sql, &MySqlDialect {}),
        DatabaseType::PostgreSQL => parse_statements(sql, &PostgreSqlDialect {}),
        DatabaseType::MongoDB => parse_statements(sql, &GenericDialect {}),
    };

    let statements = match native {
        Ok(statements) => statements,
        Err(native_err) => {
            debug!(
                "[validate::check_sql] {} dialect rejected query, trying generic: {}",
                database_type, native_err
            );
            parse_statements(sql, &GenericDialect {})
                .map_err(|e| ValidationError::InvalidSql(e.to_string()))?
        }
    };

    if statements.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }
    Ok(())
}

/// True iff the text is a document query accepted by the closed grammar
pub fn validate_document_query(query: &str) -> bool {
    parse_document_query(query).is_ok()
}

/// Validate a generated query for its own dialect
pub fn validate(query: &GeneratedQuery) -> Result<(), ValidationError> {
    if query.text.trim().is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    match query.dialect {
        Dialect::Sql => check_sql(&query.text, query.database_type),
        Dialect::Document => parse_document_query(&query.text)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidDocumentQuery(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SELECT 1", true)]
    #[case("SELECT name FROM students;", true)]
    #[case("SELECT * FROM t WHERE a = 1; SELECT 2", true)]
    #[case("UPDATE t SET a = 1 WHERE id = 3", true)]
    #[case("", false)]
    #[case("   ", false)]
    #[case("SELECT 'unterminated", false)]
    #[case("SELEC name FROM students", false)]
    #[case("Sorry, I cannot help with that.", false)]
    #[case("db[\"students\"].find({})", false)]
    fn test_validate_sql(#[case] sql: &str, #[case] expected: bool) {
        assert_eq!(validate_sql(sql), expected);
    }

    #[rstest]
    #[case("SELECT `Name` FROM `city` LIMIT 5", DatabaseType::MySQL)]
    #[case("SELECT name::text FROM film LIMIT 5", DatabaseType::PostgreSQL)]
    #[case("SELECT Name FROM city", DatabaseType::PostgreSQL)]
    fn test_validate_sql_for_engine_dialect(#[case] sql: &str, #[case] db: DatabaseType) {
        assert!(validate_sql_for(sql, db));
    }

    #[test]
    fn test_validate_sql_for_rejects_garbage() {
        assert!(!validate_sql_for("SELECT name FROM WHERE id = 1", DatabaseType::MySQL));
        assert!(!validate_sql_for("", DatabaseType::PostgreSQL));
    }

    #[rstest]
    #[case("db[\"students\"].find({\"name\": \"Alice\"}, {\"_id\": 0})", true)]
    #[case("db.orders.aggregate([{\"$group\": {\"_id\": \"$status\"}}])", true)]
    #[case("db[\"x\"].drop()", false)]
    #[case("__import__('os')", false)]
    #[case("", false)]
    fn test_validate_document_query(#[case] query: &str, #[case] expected: bool) {
        assert_eq!(validate_document_query(query), expected);
    }

    fn generated(database_type: DatabaseType, text: &str) -> GeneratedQuery {
        GeneratedQuery::new(database_type, text.to_string(), text.to_string())
    }

    #[test]
    fn test_validate_dispatches_on_dialect() {
        assert!(validate(&generated(DatabaseType::MySQL, "SELECT 1")).is_ok());
        assert!(validate(&generated(DatabaseType::MongoDB, "db.users.find({})")).is_ok());

        assert!(matches!(
            validate(&generated(DatabaseType::MongoDB, "SELECT 1")),
            Err(ValidationError::InvalidDocumentQuery(_))
        ));
        assert!(matches!(
            validate(&generated(DatabaseType::PostgreSQL, "db.users.find({})")),
            Err(ValidationError::InvalidSql(_))
        ));
        assert_eq!(
            validate(&generated(DatabaseType::MySQL, "  ")),
            Err(ValidationError::EmptyQuery)
        );
    }
}
