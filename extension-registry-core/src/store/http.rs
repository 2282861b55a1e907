//! Document store client for a CocoDB-style JSON-over-HTTP API.
//!
//! Each operation is a `POST {endpoint}/<op>` carrying the table name and arguments; every
//! response carries an `isSuccess` flag. Typed conditions are rendered into the store's JSON-path
//! predicate syntax here and nowhere else.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::INDEX_FIELD_TYPE;
use crate::contract::{
    ClientError, DocumentStore, DuplicateKey, FieldEquals, StoredDocument, VersionCondition,
};

pub struct HttpDocumentStore {
    client: reqwest::Client,
    endpoint: String,
    auth_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreResponse {
    is_success: bool,
    #[serde(default)]
    documents: Vec<Value>,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(endpoint: impl Into<String>, auth_key: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        tracing::info!(endpoint = %endpoint, "Initialized HttpDocumentStore");
        HttpDocumentStore {
            client: reqwest::Client::new(),
            endpoint,
            auth_key: auth_key.into(),
        }
    }

    async fn call(&self, op: &str, body: Value) -> Result<StoreResponse, ClientError> {
        let url = format!("{}/{}", self.endpoint, op);
        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Basic {}", self.auth_key))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::error!(op, %status, "Document store request failed");
            return Err(format!("document store {op} failed with status {status}").into());
        }
        Ok(response.json::<StoreResponse>().await?)
    }

    fn into_stored(documents: Vec<Value>) -> Result<Vec<StoredDocument>, ClientError> {
        documents
            .into_iter()
            .map(|mut body| -> Result<StoredDocument, ClientError> {
                let id = body
                    .as_object_mut()
                    .and_then(|o| o.remove("documentId"))
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or("document store returned a document without documentId")?;
                Ok(StoredDocument {
                    document_id: id,
                    body,
                })
            })
            .collect()
    }
}

/// The store surfaces unique-index violations from the underlying database as a message.
fn is_duplicate_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("duplicate")
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `$.metadata.version='1.0.0'`
pub fn render_condition(condition: &VersionCondition) -> String {
    format!("$.metadata.version={}", quote(&condition.expected_version))
}

/// `$.syncPending=true`, `$.ownerRepo='https://...'`
pub fn render_filter(filter: &FieldEquals) -> String {
    let literal = match &filter.value {
        Value::String(s) => quote(s),
        other => other.to_string(),
    };
    format!("$.{}={}", filter.path, literal)
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn create_database(&self, name: &str) -> Result<(), ClientError> {
        let response = self.call("createDb", json!({ "databaseName": name })).await?;
        if response.is_success {
            Ok(())
        } else {
            Err(format!("createDb {name} failed: {}", response.message.unwrap_or_default()).into())
        }
    }

    async fn create_table(&self, table: &str) -> Result<(), ClientError> {
        let response = self.call("createTable", json!({ "tableName": table })).await?;
        if response.is_success {
            Ok(())
        } else {
            Err(format!("createTable {table} failed: {}", response.message.unwrap_or_default()).into())
        }
    }

    async fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<(), ClientError> {
        let response = self
            .call(
                "createIndex",
                json!({
                    "tableName": table,
                    "jsonField": field,
                    "dataType": INDEX_FIELD_TYPE,
                    "isUnique": unique,
                    "isNotNull": unique,
                }),
            )
            .await?;
        if response.is_success {
            Ok(())
        } else {
            Err(format!(
                "createIndex {table}.{field} failed: {}",
                response.message.unwrap_or_default()
            )
            .into())
        }
    }

    async fn get_by_index(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        let response = self
            .call(
                "getFromIndex",
                json!({ "tableName": table, "queryObject": { field: value } }),
            )
            .await?;
        if !response.is_success {
            return Err(format!(
                "getFromIndex on {table} failed: {}",
                response.message.unwrap_or_default()
            )
            .into());
        }
        Self::into_stored(response.documents)
    }

    async fn put(&self, table: &str, body: Value) -> Result<String, ClientError> {
        let response = self
            .call("put", json!({ "tableName": table, "document": body }))
            .await?;
        let message = response.message.unwrap_or_default();
        match (response.is_success, response.document_id) {
            (true, Some(id)) => Ok(id),
            (false, _) if is_duplicate_message(&message) => {
                Err(DuplicateKey::new(table, message).into())
            }
            _ => Err(format!("put into {table} failed: {message}").into()),
        }
    }

    async fn update(
        &self,
        table: &str,
        document_id: &str,
        body: Value,
        condition: Option<VersionCondition>,
    ) -> Result<bool, ClientError> {
        let mut request = json!({
            "tableName": table,
            "documentId": document_id,
            "document": body,
        });
        if let Some(condition) = &condition {
            request["condition"] = Value::String(render_condition(condition));
        }
        // The store reports a failed condition as an unsuccessful update.
        let response = self.call("update", request).await?;
        if !response.is_success
            && is_duplicate_message(response.message.as_deref().unwrap_or_default())
        {
            return Err(DuplicateKey::new(table, response.message.unwrap_or_default()).into());
        }
        if !response.is_success {
            tracing::debug!(table, document_id, ?condition, "Conditional update rejected by store");
        }
        Ok(response.is_success)
    }

    async fn increment(
        &self,
        table: &str,
        document_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), ClientError> {
        let response = self
            .call(
                "mathAdd",
                json!({
                    "tableName": table,
                    "documentId": document_id,
                    "jsonFieldsIncrements": { field: delta },
                }),
            )
            .await?;
        if response.is_success {
            Ok(())
        } else {
            Err(format!("increment of {field} on {document_id} failed").into())
        }
    }

    async fn query(
        &self,
        table: &str,
        filter: FieldEquals,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        let response = self
            .call(
                "query",
                json!({ "tableName": table, "queryString": render_filter(&filter) }),
            )
            .await?;
        if !response.is_success {
            return Err(format!("query on {table} failed").into());
        }
        Self::into_stored(response.documents)
    }
}
