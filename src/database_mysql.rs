//! MySQL implementation of the query engine
use crate::database::{
    ConnectionInfo, DatabaseError, DatabaseType, DatabaseTypeExt, ExecutionResult, QueryEngine,
    is_retrieval_statement, rows_affected_message,
};
use crate::schema::Schema;
use crate::value::{Record, Value};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::types::Decimal;
use sqlx::{Column, Connection, Executor, Row};
use tracing::debug;

const SCHEMA_QUERY: &str = r#"
    SELECT TABLE_NAME, COLUMN_NAME
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME, ORDINAL_POSITION
"#;

/// MySQL engine; holds connection details and connects per call
pub struct MySqlEngine {
    connection_info: ConnectionInfo,
}

impl MySqlEngine {
    pub fn new(connection_info: ConnectionInfo) -> Self {
        Self { connection_info }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let info = &self.connection_info;
        let mut options = MySqlConnectOptions::new()
            .host(info.host_or_default())
            .port(info.port_or_default())
            .username(
                info.username
                    .as_deref()
                    .unwrap_or_else(|| DatabaseType::MySQL.default_username()),
            )
            .database(info.database_or_default());

        if let Some(ref password) = info.password {
            options = options.password(password);
        }
        if let Some(charset) = info.options.get("charset") {
            options = options.charset(charset);
        }
        options
    }

    async fn connect(&self) -> Result<MySqlConnection, DatabaseError> {
        debug!(
            "[MySqlEngine::connect] Connecting to: {}",
            self.connection_info.to_url(false)
        );
        MySqlConnection::connect_with(&self.connect_options())
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl QueryEngine for MySqlEngine {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn schema(&self) -> Result<Schema, DatabaseError> {
        debug!("[MySqlEngine::schema] Introspecting tables");
        let mut conn = self.connect().await?;
        let rows = conn
            .fetch_all(SCHEMA_QUERY)
            .await
            .map_err(|e| DatabaseError::SchemaError(e.to_string()))?;
        conn.close().await?;

        let mut schema = Schema::new();
        for row in &rows {
            schema.push_field(&text_column(row, 0), text_column(row, 1));
        }

        debug!("[MySqlEngine::schema] Found {} tables", schema.len());
        Ok(schema)
    }

    async fn execute(&self, query: &str) -> Result<ExecutionResult, DatabaseError> {
        let mut conn = self.connect().await?;

        let result = if is_retrieval_statement(query) {
            debug!("[MySqlEngine::execute] Fetching rows");
            let rows = conn.fetch_all(query).await?;
            let records = rows
                .iter()
                .map(row_to_record)
                .collect::<Result<Vec<_>, _>>()?;
            debug!("[MySqlEngine::execute] Query returned {} rows", records.len());
            ExecutionResult::Records(records)
        } else {
            debug!("[MySqlEngine::execute] Running statement in a transaction");
            let mut tx = conn.begin().await?;
            let done = (&mut *tx).execute(query).await?;
            tx.commit().await?;
            ExecutionResult::Message(rows_affected_message(done.rows_affected()))
        };

        conn.close().await?;
        Ok(result)
    }
}

/// information_schema columns come back as VARBINARY on some servers
fn text_column(row: &MySqlRow, index: usize) -> String {
    if let Ok(name) = row.try_get::<String, _>(index) {
        name
    } else {
        row.try_get::<Vec<u8>, _>(index)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    }
}

fn row_to_record(row: &MySqlRow) -> Result<Record, DatabaseError> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        record.insert(column.name(), mysql_value(row, index)?);
    }
    Ok(record)
}

/// Decode one MySQL cell, probing types from most to least likely
fn mysql_value(row: &MySqlRow, column_index: usize) -> Result<Value, DatabaseError> {
    use sqlx::TypeInfo;
    use sqlx::ValueRef;

    if let Ok(value_ref) = row.try_get_raw(column_index) {
        if value_ref.is_null() {
            return Ok(Value::Null);
        }
    }

    let type_name = row.column(column_index).type_info().name().to_string();

    if type_name == "BOOLEAN" {
        if let Ok(val) = row.try_get::<bool, _>(column_index) {
            return Ok(Value::Bool(val));
        }
    }

    if let Ok(val) = row.try_get::<i64, _>(column_index) {
        return Ok(Value::Int(val));
    }
    if let Ok(val) = row.try_get::<u64, _>(column_index) {
        return Ok(match i64::try_from(val) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Text(val.to_string()),
        });
    }
    if let Ok(val) = row.try_get::<f64, _>(column_index) {
        return Ok(Value::Float(val));
    }
    if let Ok(val) = row.try_get::<f32, _>(column_index) {
        return Ok(Value::Float(f64::from(val)));
    }
    if let Ok(val) = row.try_get::<Decimal, _>(column_index) {
        return Ok(Value::Text(val.to_string()));
    }
    if type_name == "JSON" {
        if let Ok(val) = row.try_get::<serde_json::Value, _>(column_index) {
            return Ok(Value::from(val));
        }
    }
    if let Ok(val) = row.try_get::<String, _>(column_index) {
        return Ok(Value::Text(val));
    }
    if let Ok(val) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_index) {
        return Ok(Value::DateTime(val));
    }
    if let Ok(val) = row.try_get::<chrono::NaiveDateTime, _>(column_index) {
        return Ok(Value::Text(val.format("%Y-%m-%d %H:%M:%S").to_string()));
    }
    if let Ok(val) = row.try_get::<chrono::NaiveDate, _>(column_index) {
        return Ok(Value::Text(val.format("%Y-%m-%d").to_string()));
    }
    if let Ok(val) = row.try_get::<chrono::NaiveTime, _>(column_index) {
        return Ok(Value::Text(val.format("%H:%M:%S").to_string()));
    }

    // MySQL sometimes sends temporal values as raw bytes
    if let Ok(bytes) = row.try_get::<Vec<u8>, _>(column_index) {
        return Ok(match String::from_utf8(bytes) {
            Ok(text) if !text.chars().any(char::is_control) => Value::Text(text),
            Ok(text) => Value::Text(format!("\\x{}", hex::encode(text.as_bytes()))),
            Err(e) => Value::Text(format!("\\x{}", hex::encode(e.into_bytes()))),
        });
    }

    Err(DatabaseError::QueryError(format!(
        "Unable to decode MySQL {type_name} value at column {column_index}"
    )))
}
