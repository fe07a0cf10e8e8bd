//! MongoDB implementation of the query engine
//!
//! Generated queries are parsed by [`crate::document_query`] and executed
//! through typed driver calls; nothing is evaluated.
use crate::database::{ConnectionInfo, DatabaseError, DatabaseType, ExecutionResult, QueryEngine};
use crate::document_query::{DocumentOperation, DocumentQuery, parse_document_query};
use crate::schema::Schema;
use crate::value::{Record, Value};
use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures_util::stream::TryStreamExt;
use mongodb::options::{ClientOptions, FindOneOptions, FindOptions};
use mongodb::{Client, Cursor, Database as MongoDatabase};
use std::time::Duration;
use tracing::debug;

/// MongoDB engine; holds connection details and creates a client per call
pub struct MongoDBEngine {
    connection_info: ConnectionInfo,
    server_selection_timeout: Duration,
}

impl MongoDBEngine {
    pub fn new(connection_info: ConnectionInfo, server_selection_timeout: Duration) -> Self {
        Self {
            connection_info,
            server_selection_timeout,
        }
    }

    async fn connect(&self) -> Result<(Client, MongoDatabase), DatabaseError> {
        let connection_string = self.connection_info.to_url(true);
        debug!(
            "[MongoDBEngine::connect] Connecting to: {}",
            self.connection_info.to_url(false)
        );

        let mut client_options = ClientOptions::parse(&connection_string).await.map_err(|e| {
            DatabaseError::ConnectionError(format!(
                "Failed to parse MongoDB connection string: {e}"
            ))
        })?;
        client_options.server_selection_timeout = Some(self.server_selection_timeout);
        client_options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        let client = Client::with_options(client_options).map_err(|e| {
            DatabaseError::ConnectionError(format!("Failed to create MongoDB client: {e}"))
        })?;
        let database = client.database(self.connection_info.database_or_default());

        database.run_command(doc! { "ping": 1 }).await.map_err(|e| {
            DatabaseError::ConnectionError(format!("Failed to connect to MongoDB: {e}"))
        })?;

        Ok((client, database))
    }

    async fn run(
        &self,
        database: &MongoDatabase,
        query: DocumentQuery,
    ) -> Result<ExecutionResult, DatabaseError> {
        let collection = database.collection::<Document>(&query.collection);

        match query.operation {
            DocumentOperation::Find {
                filter,
                projection,
                sort,
                skip,
                single: true,
                ..
            } => {
                debug!("[MongoDBEngine::run] find_one on {}", query.collection);
                let mut options = FindOneOptions::default();
                options.projection = projection;
                options.sort = sort;
                options.skip = skip;
                let found = collection.find_one(filter).with_options(options).await?;
                Ok(ExecutionResult::Records(
                    found.into_iter().map(document_to_record).collect(),
                ))
            }
            DocumentOperation::Find {
                filter,
                projection,
                sort,
                skip,
                limit,
                single: false,
            } => {
                debug!("[MongoDBEngine::run] find on {}", query.collection);
                let mut options = FindOptions::default();
                options.projection = projection;
                options.sort = sort;
                options.skip = skip;
                options.limit = limit;
                let cursor = collection.find(filter).with_options(options).await?;
                Ok(ExecutionResult::Records(collect_records(cursor).await?))
            }
            DocumentOperation::Aggregate { pipeline } => {
                debug!(
                    "[MongoDBEngine::run] aggregate on {} with {} stages",
                    query.collection,
                    pipeline.len()
                );
                let cursor = collection.aggregate(pipeline).await?;
                Ok(ExecutionResult::Records(collect_records(cursor).await?))
            }
            DocumentOperation::Count { filter } => {
                debug!("[MongoDBEngine::run] count_documents on {}", query.collection);
                let count = collection.count_documents(filter).await?;
                Ok(ExecutionResult::Rows(vec![Value::Int(
                    i64::try_from(count).unwrap_or(i64::MAX),
                )]))
            }
        }
    }
}

#[async_trait]
impl QueryEngine for MongoDBEngine {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDB
    }

    /// Field names come from the first document of each collection, minus `_id`
    async fn schema(&self) -> Result<Schema, DatabaseError> {
        debug!("[MongoDBEngine::schema] Sampling collections");
        let (client, database) = self.connect().await?;

        let mut names = database.list_collection_names().await.map_err(|e| {
            DatabaseError::SchemaError(format!("Failed to list collections: {e}"))
        })?;
        names.sort();

        let mut schema = Schema::new();
        for name in names {
            let sample = database
                .collection::<Document>(&name)
                .find_one(doc! {})
                .await
                .map_err(|e| {
                    DatabaseError::SchemaError(format!("Failed to sample '{name}': {e}"))
                })?;
            let fields = sample
                .map(|doc| doc.keys().filter(|k| *k != "_id").cloned().collect())
                .unwrap_or_default();
            schema.insert(name, fields);
        }

        client.shutdown().await;
        debug!("[MongoDBEngine::schema] Found {} collections", schema.len());
        Ok(schema)
    }

    async fn execute(&self, query: &str) -> Result<ExecutionResult, DatabaseError> {
        let parsed = parse_document_query(query)?;
        let (client, database) = self.connect().await?;
        let result = self.run(&database, parsed).await?;
        client.shutdown().await;
        Ok(result)
    }
}

async fn collect_records(mut cursor: Cursor<Document>) -> Result<Vec<Record>, DatabaseError> {
    let mut records = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        records.push(document_to_record(doc));
    }
    debug!("[MongoDBEngine] Cursor yielded {} documents", records.len());
    Ok(records)
}

fn document_to_record(doc: Document) -> Record {
    doc.into_iter()
        .map(|(key, value)| (key, bson_to_value(value)))
        .collect()
}

/// Convert a BSON value; identifiers and timestamps keep their own variants
fn bson_to_value(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::Int(i.into()),
        Bson::Int64(i) => Value::Int(i),
        Bson::Double(f) => Value::Float(f),
        Bson::String(s) => Value::Text(s),
        Bson::ObjectId(oid) => Value::ObjectId(oid.to_hex()),
        Bson::DateTime(dt) => chrono::DateTime::from_timestamp_millis(dt.timestamp_millis())
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(dt.to_string())),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_value).collect()),
        Bson::Document(doc) => Value::Document(document_to_record(doc)),
        Bson::Binary(bin) => Value::Text(format!("\\x{}", hex::encode(bin.bytes))),
        Bson::Timestamp(ts) => Value::Text(format!("Timestamp({}, {})", ts.time, ts.increment)),
        Bson::RegularExpression(re) => Value::Text(format!("/{}/{}", re.pattern, re.options)),
        other => Value::Text(other.to_string()),
    }
}
