//! Store → snapshot synchronisation.
//!
//! Drains every extension document flagged `syncPending` into the published artifacts:
//!   1. Query the store for pending documents (nothing pending: nothing is written anywhere).
//!   2. Read `registry.json` and `popularity.json`.
//!   3. Merge a trimmed, store-internal-free copy of each pending document into both maps.
//!   4. Write both maps, then bump `registry_version.json` by exactly one.
//!   5. Clear each pending flag with a compare-and-swap on the version that was read.
//!
//! Step 5 runs after the snapshot write on purpose. A flag whose clear loses the race stays set:
//! the document already holds a newer publish and the next pass picks it up again. Clear failures
//! are isolated per document.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Report type: [`SyncReport`]

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::blob;
use crate::context::RegistryContext;
use crate::contract::FieldEquals;
use crate::error::RegistryError;
use crate::model::{ExtensionDocument, SnapshotVersion};
use crate::store;
use crate::trim::trim_document;

/// What a synchronisation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Extensions written into the snapshot.
    pub synced: Vec<String>,
    /// Extensions whose pending flag was cleared.
    pub cleared: Vec<String>,
    /// Extensions left pending for the next pass.
    pub still_pending: Vec<String>,
    /// New snapshot version, `None` when nothing was pending.
    pub snapshot_version: Option<u64>,
}

/// Snapshot form of a document: internal fields stripped, trimmed by the configured policy.
pub fn snapshot_entry(doc: &ExtensionDocument, ctx: &RegistryContext) -> serde_json::Value {
    let mut value = doc.snapshot_value();
    trim_document(&mut value, &ctx.config.trim);
    value
}

pub async fn synchronise(ctx: &RegistryContext) -> Result<SyncReport, RegistryError> {
    info!("[SYNC] Syncing pending extension documents into the registry snapshot");

    let pending = store::query_extensions(
        ctx.docs.as_ref(),
        &ctx.config,
        FieldEquals::new("syncPending", true),
    )
    .await
    .map_err(|e| RegistryError::internal("querying syncPending extensions", e))?;

    if pending.is_empty() {
        debug!("[SYNC] Nothing to sync");
        return Ok(SyncReport::default());
    }
    info!(count = pending.len(), "[SYNC] Found pending extension documents");

    let mut registry = blob::read_registry(ctx.snapshots.as_ref(), &ctx.config)
        .await
        .map_err(|e| RegistryError::internal("reading registry snapshot", e))?;
    let mut popularity = blob::read_popularity(ctx.snapshots.as_ref(), &ctx.config)
        .await
        .map_err(|e| RegistryError::internal("reading popularity snapshot", e))?;

    let mut report = SyncReport::default();
    for doc in &pending {
        let name = doc.metadata.name.clone();
        debug!(extension = %name, version = %doc.metadata.version, "[SYNC] Updating registry entry");
        registry.insert(name.clone(), snapshot_entry(doc, ctx));
        popularity.insert(name.clone(), doc.popularity());
        report.synced.push(name);
    }

    blob::write_registry(ctx.snapshots.as_ref(), &ctx.config, &registry)
        .await
        .map_err(|e| RegistryError::internal("writing registry snapshot", e))?;
    blob::write_popularity(ctx.snapshots.as_ref(), &ctx.config, &popularity)
        .await
        .map_err(|e| RegistryError::internal("writing popularity snapshot", e))?;

    let current = blob::read_version(ctx.snapshots.as_ref(), &ctx.config)
        .await
        .map_err(|e| RegistryError::internal("reading registry version", e))?;
    let next = SnapshotVersion {
        version: current.version + 1,
    };
    blob::write_version(ctx.snapshots.as_ref(), &ctx.config, next)
        .await
        .map_err(|e| RegistryError::internal("writing registry version", e))?;
    info!(version = next.version, "[SYNC] Registry snapshot written");
    report.snapshot_version = Some(next.version);

    let clears = pending.into_iter().map(|doc| clear_pending(ctx, doc));
    for (name, cleared) in join_all(clears).await {
        if cleared {
            report.cleared.push(name);
        } else {
            report.still_pending.push(name);
        }
    }
    info!(
        cleared = report.cleared.len(),
        still_pending = report.still_pending.len(),
        "[SYNC] Pending flags updated"
    );
    Ok(report)
}

/// Clears one pending flag, conditioned on the version the document was read with.
///
/// The document is re-read right before the write and only `syncPending` changes on that copy,
/// so counters updated since the query are kept.
async fn clear_pending(ctx: &RegistryContext, doc: ExtensionDocument) -> (String, bool) {
    let name = doc.metadata.name.clone();
    let read_version = doc.metadata.version;
    let fresh = match store::get_extension(ctx.docs.as_ref(), &ctx.config, &doc.extension_id).await {
        Ok(Some(fresh)) if fresh.metadata.version == read_version => fresh,
        Ok(_) => {
            warn!(extension = %name, version = %read_version, "[SYNC] Newer publish landed during sync, leaving pending");
            return (name, false);
        }
        Err(e) => {
            error!(extension = %name, error = %e, "[SYNC][ERROR] Failed to re-read extension before clearing");
            return (name, false);
        }
    };
    let mut cleared = fresh;
    cleared.sync_pending = false;
    match store::update_extension_if(ctx.docs.as_ref(), &ctx.config, &cleared, &read_version).await {
        Ok(true) => (name, true),
        Ok(false) => {
            warn!(extension = %name, version = %read_version, "[SYNC] Newer publish landed during sync, leaving pending");
            (name, false)
        }
        Err(e) => {
            error!(extension = %name, error = %e, "[SYNC][ERROR] Failed to clear pending flag");
            (name, false)
        }
    }
}
