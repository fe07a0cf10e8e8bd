//! PostgreSQL implementation of the query engine
use crate::database::{
    ConnectionInfo, DatabaseError, DatabaseType, DatabaseTypeExt, ExecutionResult, QueryEngine,
    is_retrieval_statement, rows_affected_message,
};
use crate::schema::Schema;
use crate::value::{Record, Value};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Executor, Row};
use tracing::{debug, warn};

const SCHEMA_QUERY: &str = r#"
    SELECT c.relname AS table_name, a.attname AS column_name
    FROM pg_attribute a
    INNER JOIN pg_class c ON a.attrelid = c.oid
    INNER JOIN pg_namespace n ON c.relnamespace = n.oid
    WHERE c.relkind IN ('r', 'v', 'm', 'f', 'p')
      AND n.nspname = current_schema()
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY c.relname, a.attnum
"#;

/// PostgreSQL engine; holds connection details and connects per call
pub struct PostgreSQLEngine {
    connection_info: ConnectionInfo,
}

impl PostgreSQLEngine {
    pub fn new(connection_info: ConnectionInfo) -> Self {
        Self { connection_info }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let info = &self.connection_info;
        let mut options = PgConnectOptions::new()
            .host(info.host_or_default())
            .port(info.port_or_default())
            .username(
                info.username
                    .as_deref()
                    .unwrap_or_else(|| DatabaseType::PostgreSQL.default_username()),
            )
            .database(info.database_or_default());

        if let Some(ref password) = info.password {
            options = options.password(password);
        }

        if let Some(sslmode) = info.options.get("sslmode") {
            let ssl_mode = match sslmode.as_str() {
                "disable" => PgSslMode::Disable,
                "allow" => PgSslMode::Allow,
                "prefer" => PgSslMode::Prefer,
                "require" => PgSslMode::Require,
                "verify-ca" => PgSslMode::VerifyCa,
                "verify-full" => PgSslMode::VerifyFull,
                other => {
                    warn!("[PostgreSQLEngine] Unknown sslmode '{}', using prefer", other);
                    PgSslMode::Prefer
                }
            };
            options = options.ssl_mode(ssl_mode);
        }
        options
    }

    async fn connect(&self) -> Result<PgConnection, DatabaseError> {
        debug!(
            "[PostgreSQLEngine::connect] Connecting to: {}",
            self.connection_info.to_url(false)
        );
        PgConnection::connect_with(&self.connect_options())
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl QueryEngine for PostgreSQLEngine {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn schema(&self) -> Result<Schema, DatabaseError> {
        debug!("[PostgreSQLEngine::schema] Introspecting tables");
        let mut conn = self.connect().await?;
        let rows = conn
            .fetch_all(SCHEMA_QUERY)
            .await
            .map_err(|e| DatabaseError::SchemaError(e.to_string()))?;
        conn.close().await?;

        let mut schema = Schema::new();
        for row in &rows {
            let table: String = row.try_get(0)?;
            let column: String = row.try_get(1)?;
            schema.push_field(&table, column);
        }

        debug!("[PostgreSQLEngine::schema] Found {} tables", schema.len());
        Ok(schema)
    }

    async fn execute(&self, query: &str) -> Result<ExecutionResult, DatabaseError> {
        let mut conn = self.connect().await?;

        let result = if is_retrieval_statement(query) {
            debug!("[PostgreSQLEngine::execute] Fetching rows");
            let rows = conn.fetch_all(query).await?;
            let records = rows
                .iter()
                .map(row_to_record)
                .collect::<Result<Vec<_>, _>>()?;
            debug!(
                "[PostgreSQLEngine::execute] Query returned {} rows",
                records.len()
            );
            ExecutionResult::Records(records)
        } else {
            debug!("[PostgreSQLEngine::execute] Running statement in a transaction");
            let mut tx = conn.begin().await?;
            let done = (&mut *tx).execute(query).await?;
            tx.commit().await?;
            ExecutionResult::Message(rows_affected_message(done.rows_affected()))
        };

        conn.close().await?;
        Ok(result)
    }
}

fn row_to_record(row: &PgRow) -> Result<Record, DatabaseError> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        record.insert(column.name(), postgresql_value(row, index)?);
    }
    Ok(record)
}

/// Decode one PostgreSQL cell based on its type name
fn postgresql_value(row: &PgRow, column_index: usize) -> Result<Value, DatabaseError> {
    use sqlx::TypeInfo;
    use sqlx::ValueRef;

    if row.try_get_raw(column_index)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.column(column_index).type_info().name().to_string();
    let query_error = |e: sqlx::Error| DatabaseError::QueryError(e.to_string());

    let value = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            Value::Text(row.try_get::<String, _>(column_index).map_err(query_error)?)
        }
        "INT2" => Value::Int(row.try_get::<i16, _>(column_index).map_err(query_error)?.into()),
        "INT4" => Value::Int(row.try_get::<i32, _>(column_index).map_err(query_error)?.into()),
        "INT8" => Value::Int(row.try_get::<i64, _>(column_index).map_err(query_error)?),
        "OID" => Value::Int(
            row.try_get::<sqlx::postgres::types::Oid, _>(column_index)
                .map_err(query_error)?
                .0
                .into(),
        ),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(column_index).map_err(query_error)?.into()),
        "FLOAT8" => Value::Float(row.try_get::<f64, _>(column_index).map_err(query_error)?),
        "NUMERIC" => Value::Text(
            row.try_get::<sqlx::types::Decimal, _>(column_index)
                .map(|v| v.to_string())
                .or_else(|_| row.try_get::<String, _>(column_index))
                .map_err(query_error)?,
        ),
        "BOOL" => Value::Bool(row.try_get::<bool, _>(column_index).map_err(query_error)?),
        "TIMESTAMPTZ" => Value::DateTime(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_index)
                .map_err(query_error)?,
        ),
        "TIMESTAMP" => Value::Text(
            row.try_get::<chrono::NaiveDateTime, _>(column_index)
                .map_err(query_error)?
                .to_string(),
        ),
        "DATE" => Value::Text(
            row.try_get::<chrono::NaiveDate, _>(column_index)
                .map_err(query_error)?
                .to_string(),
        ),
        "TIME" => Value::Text(
            row.try_get::<chrono::NaiveTime, _>(column_index)
                .map_err(query_error)?
                .to_string(),
        ),
        "JSON" | "JSONB" => Value::from(
            row.try_get::<serde_json::Value, _>(column_index)
                .map_err(query_error)?,
        ),
        "UUID" => Value::Text(
            row.try_get::<sqlx::types::Uuid, _>(column_index)
                .map_err(query_error)?
                .to_string(),
        ),
        "BYTEA" => Value::Text(format!(
            "\\x{}",
            hex::encode(row.try_get::<Vec<u8>, _>(column_index).map_err(query_error)?)
        )),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => Value::Array(
            row.try_get::<Vec<String>, _>(column_index)
                .map_err(query_error)?
                .into_iter()
                .map(Value::Text)
                .collect(),
        ),
        "INT4[]" => Value::Array(
            row.try_get::<Vec<i32>, _>(column_index)
                .map_err(query_error)?
                .into_iter()
                .map(|v| Value::Int(v.into()))
                .collect(),
        ),
        "INT8[]" => Value::Array(
            row.try_get::<Vec<i64>, _>(column_index)
                .map_err(query_error)?
                .into_iter()
                .map(Value::Int)
                .collect(),
        ),
        // Enums, domains, intervals, geometric and network types
        _ => row
            .try_get_unchecked::<String, _>(column_index)
            .map(Value::Text)
            .map_err(|e| {
                DatabaseError::QueryError(format!(
                    "Unable to decode PostgreSQL type '{type_name}': {e}"
                ))
            })?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(url: &str) -> PostgreSQLEngine {
        PostgreSQLEngine::new(ConnectionInfo::parse_url(url).unwrap())
    }

    #[test]
    fn test_connect_options_use_defaults() {
        let options = engine("postgres://localhost").connect_options();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "postgres");
        assert_eq!(options.get_database(), Some("postgres"));
    }

    #[test]
    fn test_connect_options_from_url() {
        let options =
            engine("postgresql://reader:pw@pg.internal:6543/dvdrental?sslmode=disable").connect_options();
        assert_eq!(options.get_host(), "pg.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "reader");
        assert_eq!(options.get_database(), Some("dvdrental"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Disable));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let engine = engine("postgres://postgres@127.0.0.1:1/postgres?sslmode=disable");
        match engine.schema().await {
            Err(DatabaseError::ConnectionError(_)) => {}
            other => panic!("expected connection error, got {other:?}"),
        }
    }
}
