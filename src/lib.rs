//! nlquery: natural-language questions in, validated database queries and
//! uniform result tables out.
//!
//! Pipeline: schema introspection, prompt construction, LLM call, query
//! extraction, validation, execution, normalization.

pub mod cli;
pub mod config;
pub mod database; // Engine-neutral types and the QueryEngine trait
pub mod database_mongodb; // MongoDB implementation
pub mod database_mysql; // MySQL implementation
pub mod database_postgresql; // PostgreSQL implementation
pub mod document_query;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod password_sanitizer;
pub mod schema;
pub mod session;
pub mod table;
pub mod validate;
pub mod value;

pub use config::Config;
pub use database::{ConnectionInfo, DatabaseError, DatabaseType, Dialect, ExecutionResult, QueryEngine};
pub use llm::{GeneratedQuery, QueryGenerator};
pub use schema::Schema;
pub use session::{Session, SessionOutcome};
pub use table::NormalizedTable;
