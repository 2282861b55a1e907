//! Daily copy of the published artifacts into `archive/YYYY/MM/DD/`.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{ARCHIVE_FOLDER, POPULARITY_FILE, REGISTRY_FILE, REGISTRY_VERSION_FILE};
use crate::context::RegistryContext;
use crate::error::RegistryError;

pub fn archive_object_path(date: DateTime<Utc>, file_name: &str) -> String {
    format!("{ARCHIVE_FOLDER}/{}/{file_name}", date.format("%Y/%m/%d"))
}

/// Copies each artifact that exists. Returns the archive paths written.
pub async fn backup_registry(ctx: &RegistryContext) -> Result<Vec<String>, RegistryError> {
    let today = ctx.clock.now();
    let bucket = &ctx.config.bucket;
    let mut written = Vec::new();
    for file in [REGISTRY_FILE, REGISTRY_VERSION_FILE, POPULARITY_FILE] {
        let contents = ctx
            .snapshots
            .get(bucket, file)
            .await
            .map_err(|e| RegistryError::internal("reading artifact for backup", e))?;
        let Some(contents) = contents else {
            warn!(file, "[BACKUP] Artifact missing, nothing to back up");
            continue;
        };
        let target = archive_object_path(today, file);
        ctx.snapshots
            .put(bucket, &target, contents)
            .await
            .map_err(|e| RegistryError::internal("writing backup", e))?;
        written.push(target);
    }
    info!(files = written.len(), "[BACKUP] Registry backed up");
    Ok(written)
}
