use tracing::debug;

use crate::context::RegistryContext;
use crate::error::RegistryError;
use crate::store;

/// Counts one download of a published version.
pub async fn count_download(
    ctx: &RegistryContext,
    extension_name: &str,
    version: &str,
) -> Result<(), RegistryError> {
    let doc = store::get_extension(ctx.docs.as_ref(), &ctx.config, extension_name)
        .await
        .map_err(|e| RegistryError::internal("reading extension document", e))?
        .ok_or_else(|| RegistryError::NotFound(format!("No such extension: {extension_name}")))?;
    if !doc.has_version(version) {
        return Err(RegistryError::Validation(format!(
            "No such extension version: {extension_name}@{version}"
        )));
    }
    let document_id = doc
        .document_id
        .as_deref()
        .ok_or_else(|| RegistryError::Internal("extension document has no id".to_string()))?;
    ctx.docs
        .increment(&ctx.config.extensions_table, document_id, "totalDownloads", 1)
        .await
        .map_err(|e| RegistryError::internal("incrementing download count", e))?;
    debug!(extension = %extension_name, version = %version, "Download counted");
    Ok(())
}
