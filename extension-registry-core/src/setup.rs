//! Provisioning of a stage's document store, and recovery of the extension table from the
//! published `registry.json`.
//!
//! Schema steps are idempotent from the caller's point of view: a store that already has the
//! database, table or index reports a failure, which is logged and skipped. Seeding never
//! overwrites a document that already exists, so running this against a live stage only fills
//! in extensions the store has lost.

use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::blob;
use crate::config::EXTENSION_ID_FIELD;
use crate::context::RegistryContext;
use crate::contract::DuplicateKey;
use crate::error::RegistryError;
use crate::model::ExtensionDocument;
use crate::store;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetupReport {
    /// Extensions inserted from the snapshot.
    pub seeded: Vec<String>,
    /// Extensions the store already had.
    pub existing: Vec<String>,
    /// Extensions that could not be read or written.
    pub failed: Vec<String>,
}

enum Seeded {
    Inserted,
    Existing,
    Failed,
}

pub async fn setup_stack(ctx: &RegistryContext) -> Result<SetupReport, RegistryError> {
    info!(database = %ctx.config.database, "[SETUP] Creating stack");
    create_schema(ctx).await;

    let registry = blob::read_registry(ctx.snapshots.as_ref(), &ctx.config)
        .await
        .map_err(|e| RegistryError::internal("reading registry snapshot for setup", e))?;
    info!(count = registry.len(), "[SETUP] Seeding extension table from registry snapshot");

    let seeds = registry
        .iter()
        .map(|(id, entry)| async move { (id.clone(), seed_one(ctx, id, entry).await) });
    let mut report = SetupReport::default();
    for (id, outcome) in join_all(seeds).await {
        match outcome {
            Seeded::Inserted => report.seeded.push(id),
            Seeded::Existing => report.existing.push(id),
            Seeded::Failed => report.failed.push(id),
        }
    }
    info!(
        seeded = report.seeded.len(),
        existing = report.existing.len(),
        failed = report.failed.len(),
        "[SETUP] Done"
    );
    Ok(report)
}

async fn create_schema(ctx: &RegistryContext) {
    let docs = ctx.docs.as_ref();
    let config = &ctx.config;
    if let Err(e) = docs.create_database(&config.database).await {
        warn!(database = %config.database, error = %e, "[SETUP] create database failed");
    }
    for (table, field) in store::unique_indexes(config) {
        if let Err(e) = docs.create_table(table).await {
            warn!(table = %table, error = %e, "[SETUP] create table failed");
        }
        if let Err(e) = docs.create_index(table, field, true).await {
            warn!(table = %table, field, error = %e, "[SETUP] create unique index failed");
        }
    }
}

async fn seed_one(ctx: &RegistryContext, id: &str, entry: &Value) -> Seeded {
    match store::get_extension(ctx.docs.as_ref(), &ctx.config, id).await {
        Ok(Some(_)) => return Seeded::Existing,
        Ok(None) => {}
        Err(e) => {
            error!(extension = %id, error = %e, "[SETUP][ERROR] Could not look up extension");
            return Seeded::Failed;
        }
    }

    let mut body = entry.clone();
    let Some(fields) = body.as_object_mut() else {
        error!(extension = %id, "[SETUP][ERROR] Registry entry is not an object");
        return Seeded::Failed;
    };
    fields.insert(EXTENSION_ID_FIELD.to_string(), Value::from(id));
    fields.insert("syncPending".to_string(), Value::Bool(false));
    let doc: ExtensionDocument = match serde_json::from_value(body) {
        Ok(doc) => doc,
        Err(e) => {
            error!(extension = %id, error = %e, "[SETUP][ERROR] Registry entry is not a valid extension document");
            return Seeded::Failed;
        }
    };

    match store::insert_extension(ctx.docs.as_ref(), &ctx.config, &doc).await {
        Ok(_) => Seeded::Inserted,
        Err(e) if DuplicateKey::is_duplicate(&e) => Seeded::Existing,
        Err(e) => {
            error!(extension = %id, error = %e, "[SETUP][ERROR] Error putting extension");
            Seeded::Failed
        }
    }
}
