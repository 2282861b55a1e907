//! Counter refresh for the published snapshot.
//!
//! Patches `starCount` and `totalDownloads` of extensions already in `registry.json` without going
//! through a full sync. Documents with a publish in flight (`syncPending`) are left alone: the
//! synchroniser will bring their authoritative values. The snapshot version is never bumped.

use tracing::{debug, info, warn};

use crate::blob;
use crate::context::RegistryContext;
use crate::error::RegistryError;
use crate::store;
use crate::synchronise::snapshot_entry;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopularityReport {
    /// Extensions whose counters were patched.
    pub updated: Vec<String>,
    /// Extensions skipped because a sync is pending.
    pub skipped_pending: Vec<String>,
    /// Snapshot entries with no document behind them.
    pub missing: Vec<String>,
}

pub async fn refresh_popularity(ctx: &RegistryContext) -> Result<PopularityReport, RegistryError> {
    info!("[POPULARITY] Refreshing download and star counters");
    let mut registry = blob::read_registry(ctx.snapshots.as_ref(), &ctx.config)
        .await
        .map_err(|e| RegistryError::internal("reading registry snapshot", e))?;
    let mut popularity = blob::read_popularity(ctx.snapshots.as_ref(), &ctx.config)
        .await
        .map_err(|e| RegistryError::internal("reading popularity snapshot", e))?;

    let mut report = PopularityReport::default();
    let ids: Vec<String> = registry.keys().cloned().collect();
    for id in ids {
        let doc = match store::get_extension(ctx.docs.as_ref(), &ctx.config, &id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!(extension = %id, "[POPULARITY] No document for snapshot entry");
                report.missing.push(id);
                continue;
            }
            Err(e) => {
                warn!(extension = %id, error = %e, "[POPULARITY] Failed to read document, skipping");
                continue;
            }
        };
        if doc.sync_pending {
            debug!(extension = %id, "[POPULARITY] Sync pending, skipping");
            report.skipped_pending.push(id);
            continue;
        }

        let live = doc.popularity();
        let published = popularity.get(&id).copied().unwrap_or_default();
        let entry_counts = registry.get(&id).map(|entry| {
            (
                entry.get("totalDownloads").and_then(|v| v.as_u64()).unwrap_or(0),
                entry.get("starCount").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        });
        let unchanged = published == live
            && entry_counts == Some((live.total_downloads, live.star_count));
        if unchanged {
            continue;
        }

        debug!(
            extension = %id,
            total_downloads = live.total_downloads,
            star_count = live.star_count,
            "[POPULARITY] Counters changed"
        );
        registry.insert(id.clone(), snapshot_entry(&doc, ctx));
        popularity.insert(id.clone(), live);
        report.updated.push(id);
    }

    if report.updated.is_empty() {
        info!("[POPULARITY] No counter changes");
        return Ok(report);
    }

    blob::write_registry(ctx.snapshots.as_ref(), &ctx.config, &registry)
        .await
        .map_err(|e| RegistryError::internal("writing registry snapshot", e))?;
    blob::write_popularity(ctx.snapshots.as_ref(), &ctx.config, &popularity)
        .await
        .map_err(|e| RegistryError::internal("writing popularity snapshot", e))?;
    info!(updated = report.updated.len(), "[POPULARITY] Snapshot counters patched");
    Ok(report)
}
