use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::RegistryConfig;
use crate::contract::{
    ClientError, DocumentStore, DuplicateKey, FieldEquals, StoredDocument, VersionCondition,
};

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<String, Value>,
    unique_fields: Vec<String>,
}

impl Table {
    /// First unique field on which `body` collides with a document other than `skip_id`.
    fn collision(&self, body: &Value, skip_id: Option<&str>) -> Option<String> {
        self.unique_fields.iter().find_map(|field| {
            let value = body.get(field)?;
            self.rows
                .iter()
                .filter(|(id, _)| Some(id.as_str()) != skip_id)
                .any(|(_, other)| other.get(field) == Some(value))
                .then(|| format!("{field}={value}"))
        })
    }
}

/// Process-local document store with native compare-and-swap and unique indexes.
///
/// Backs tests and single-node development runs. Writes are counted so callers can assert that an
/// operation touched nothing.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    tables: Mutex<HashMap<String, Table>>,
    writes: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the registry tables and their unique indexes already in place.
    pub fn for_registry(config: &RegistryConfig) -> Self {
        let store = Self::default();
        {
            let mut tables = store.lock();
            for (table, field) in super::unique_indexes(config) {
                tables
                    .entry(table.to_string())
                    .or_default()
                    .unique_fields
                    .push(field.to_string());
            }
        }
        store
    }

    /// Number of successful put, update and increment calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw body of a document, bypassing the trait.
    pub fn raw(&self, table: &str, document_id: &str) -> Option<Value> {
        self.lock().get(table).and_then(|t| t.rows.get(document_id)).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Table>> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn stored_version(body: &Value) -> Option<&str> {
        body.get("metadata")?.get("version")?.as_str()
    }

    fn select(&self, table: &str, keep: impl Fn(&Value) -> bool) -> Vec<StoredDocument> {
        let tables = self.lock();
        let Some(t) = tables.get(table) else {
            return Vec::new();
        };
        t.rows
            .iter()
            .filter(|(_, body)| keep(body))
            .map(|(id, body)| StoredDocument {
                document_id: id.clone(),
                body: body.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_database(&self, _name: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn create_table(&self, table: &str) -> Result<(), ClientError> {
        self.lock().entry(table.to_string()).or_default();
        Ok(())
    }

    async fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<(), ClientError> {
        let mut tables = self.lock();
        let t = tables.entry(table.to_string()).or_default();
        if !unique || t.unique_fields.iter().any(|f| f == field) {
            return Ok(());
        }
        let mut seen = Vec::new();
        for body in t.rows.values() {
            if let Some(value) = body.get(field) {
                if seen.contains(&value) {
                    return Err(DuplicateKey::new(table, format!("{field}={value}")).into());
                }
                seen.push(value);
            }
        }
        t.unique_fields.push(field.to_string());
        Ok(())
    }

    async fn get_by_index(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        Ok(self.select(table, |body| {
            body.get(field).and_then(Value::as_str) == Some(value)
        }))
    }

    async fn put(&self, table: &str, body: Value) -> Result<String, ClientError> {
        let mut tables = self.lock();
        let t = tables.entry(table.to_string()).or_default();
        if let Some(detail) = t.collision(&body, None) {
            return Err(DuplicateKey::new(table, detail).into());
        }
        let id = uuid::Uuid::new_v4().to_string();
        t.rows.insert(id.clone(), body);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update(
        &self,
        table: &str,
        document_id: &str,
        body: Value,
        condition: Option<VersionCondition>,
    ) -> Result<bool, ClientError> {
        let mut tables = self.lock();
        let Some(t) = tables.get_mut(table) else {
            return Ok(false);
        };
        let Some(existing) = t.rows.get(document_id) else {
            return Ok(false);
        };
        if let Some(condition) = condition {
            if Self::stored_version(existing) != Some(condition.expected_version.as_str()) {
                return Ok(false);
            }
        }
        if let Some(detail) = t.collision(&body, Some(document_id)) {
            return Err(DuplicateKey::new(table, detail).into());
        }
        t.rows.insert(document_id.to_string(), body);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn increment(
        &self,
        table: &str,
        document_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), ClientError> {
        let mut tables = self.lock();
        let existing = tables
            .get_mut(table)
            .and_then(|t| t.rows.get_mut(document_id))
            .ok_or_else(|| format!("no document {document_id} in {table}"))?;
        let object = existing
            .as_object_mut()
            .ok_or_else(|| format!("document {document_id} is not an object"))?;
        let current = object.get(field).and_then(Value::as_i64).unwrap_or(0);
        object.insert(field.to_string(), Value::from(current + delta));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(
        &self,
        table: &str,
        filter: FieldEquals,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        Ok(self.select(table, |body| filter.matches(body)))
    }
}
