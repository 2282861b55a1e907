//! Typed access to the extension and release tables on top of a [`DocumentStore`].
//!
//! The store speaks JSON bodies; these helpers own the mapping to [`ExtensionDocument`] and
//! [`ReleaseRecord`], and make sure the store-assigned id never leaks into a written body.

mod http;
mod memory;

pub use http::{render_condition, render_filter, HttpDocumentStore};
pub use memory::InMemoryDocumentStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::{RegistryConfig, EXTENSION_ID_FIELD, RELEASE_REF_FIELD};
use crate::contract::{ClientError, DocumentStore, FieldEquals, StoredDocument, VersionCondition};
use crate::model::{ExtensionDocument, ReleaseRecord};

fn decode<T: DeserializeOwned>(stored: StoredDocument) -> Result<(String, T), ClientError> {
    let decoded = serde_json::from_value(stored.body)?;
    Ok((stored.document_id, decoded))
}

fn encode<T: Serialize>(doc: &T) -> Result<Value, ClientError> {
    Ok(serde_json::to_value(doc)?)
}

/// `(table, field)` pairs that must hold unique values: one extension document per id, one
/// release record per release ref.
pub fn unique_indexes(config: &RegistryConfig) -> [(&str, &'static str); 2] {
    [
        (config.extensions_table.as_str(), EXTENSION_ID_FIELD),
        (config.releases_table.as_str(), RELEASE_REF_FIELD),
    ]
}

/// Single-document lookup on a unique index. More than one match is a store inconsistency.
async fn get_unique(
    store: &dyn DocumentStore,
    table: &str,
    field: &str,
    value: &str,
) -> Result<Option<StoredDocument>, ClientError> {
    let mut documents = store.get_by_index(table, field, value).await?;
    match documents.len() {
        0 => Ok(None),
        1 => Ok(documents.pop()),
        n => Err(format!("{n} documents in {table} share unique key {field}={value}").into()),
    }
}

pub async fn get_extension(
    store: &dyn DocumentStore,
    config: &RegistryConfig,
    extension_id: &str,
) -> Result<Option<ExtensionDocument>, ClientError> {
    let Some(stored) = get_unique(store, &config.extensions_table, EXTENSION_ID_FIELD, extension_id).await? else {
        return Ok(None);
    };
    let (id, mut doc): (String, ExtensionDocument) = decode(stored)?;
    doc.document_id = Some(id);
    Ok(Some(doc))
}

pub async fn query_extensions(
    store: &dyn DocumentStore,
    config: &RegistryConfig,
    filter: FieldEquals,
) -> Result<Vec<ExtensionDocument>, ClientError> {
    let stored = store.query(&config.extensions_table, filter).await?;
    let mut documents = Vec::with_capacity(stored.len());
    for s in stored {
        let (id, mut doc): (String, ExtensionDocument) = decode(s)?;
        doc.document_id = Some(id);
        documents.push(doc);
    }
    Ok(documents)
}

/// Inserts a brand-new extension document and returns its id. Fails with
/// [`DuplicateKey`](crate::contract::DuplicateKey) when the id is already taken.
pub async fn insert_extension(
    store: &dyn DocumentStore,
    config: &RegistryConfig,
    doc: &ExtensionDocument,
) -> Result<String, ClientError> {
    store.put(&config.extensions_table, encode(doc)?).await
}

/// Compare-and-swap write of an existing extension document.
///
/// Succeeds only if the stored `metadata.version` still equals `expected_version`.
pub async fn update_extension_if(
    store: &dyn DocumentStore,
    config: &RegistryConfig,
    doc: &ExtensionDocument,
    expected_version: &str,
) -> Result<bool, ClientError> {
    let id = doc
        .document_id
        .as_deref()
        .ok_or("extension document has no document id")?;
    store
        .update(
            &config.extensions_table,
            id,
            encode(doc)?,
            Some(VersionCondition::new(expected_version)),
        )
        .await
}

pub async fn get_release(
    store: &dyn DocumentStore,
    config: &RegistryConfig,
    release_ref: &str,
) -> Result<Option<ReleaseRecord>, ClientError> {
    let Some(stored) = get_unique(store, &config.releases_table, RELEASE_REF_FIELD, release_ref).await? else {
        return Ok(None);
    };
    let (id, mut record): (String, ReleaseRecord) = decode(stored)?;
    record.document_id = Some(id);
    Ok(Some(record))
}

/// Inserts the record when it has no id yet, otherwise overwrites it. Returns the id.
///
/// An insert for a release ref that already has a record fails with
/// [`DuplicateKey`](crate::contract::DuplicateKey).
pub async fn save_release(
    store: &dyn DocumentStore,
    config: &RegistryConfig,
    record: &ReleaseRecord,
) -> Result<String, ClientError> {
    let body = encode(record)?;
    match record.document_id.as_deref() {
        None => store.put(&config.releases_table, body).await,
        Some(id) => {
            if store.update(&config.releases_table, id, body, None).await? {
                Ok(id.to_string())
            } else {
                Err(format!("release record {id} vanished during update").into())
            }
        }
    }
}
