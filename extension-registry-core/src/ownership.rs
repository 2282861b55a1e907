//! Administrative transfer of an extension to another repository.

use serde_json::Value;
use tracing::{info, warn};

use crate::blob;
use crate::context::RegistryContext;
use crate::error::RegistryError;
use crate::github::{parse_repo_url, repo_url};
use crate::model::{ExtensionDocument, RepositoryLink};
use crate::store;
use crate::synchronise::synchronise;

const GITHUB_PREFIX: &str = "https://github.com/";

#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipChange {
    /// Document as it was before the transfer.
    pub old_entry: ExtensionDocument,
    /// Snapshot entry after the transfer.
    pub new_entry: Value,
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('/') && !segment.chars().any(char::is_whitespace)
}

/// Moves `extension_name` to `new_owner/new_repo`, syncs it, and notifies both repositories.
pub async fn change_ownership(
    ctx: &RegistryContext,
    extension_name: &str,
    new_owner: &str,
    new_repo: &str,
) -> Result<OwnershipChange, RegistryError> {
    if !valid_segment(new_owner) || !valid_segment(new_repo) {
        return Err(RegistryError::Validation(format!(
            "Invalid new owner/repo: {new_owner}/{new_repo}"
        )));
    }
    let mut doc = store::get_extension(ctx.docs.as_ref(), &ctx.config, extension_name)
        .await
        .map_err(|e| RegistryError::internal("reading extension document", e))?
        .ok_or_else(|| RegistryError::NotFound(format!("no such extension id: {extension_name}")))?;
    let old_entry = doc.clone();
    let new_owner_repo = repo_url(new_owner, new_repo);

    doc.owner = format!("github:{new_owner}");
    doc.owner_repo = new_owner_repo.clone();
    if doc.metadata.homepage.starts_with(GITHUB_PREFIX) {
        doc.metadata.homepage = new_owner_repo.clone();
    }
    doc.metadata.repository = Some(RepositoryLink {
        kind: "git".to_string(),
        url: format!("{new_owner_repo}.git"),
    });
    doc.sync_pending = true;

    let current_version = doc.metadata.version.clone();
    let written = store::update_extension_if(ctx.docs.as_ref(), &ctx.config, &doc, &current_version)
        .await
        .map_err(|e| RegistryError::internal("updating extension document", e))?;
    if !written {
        return Err(RegistryError::Conflict(format!(
            "Another update in progress? Failed to update extension {extension_name}"
        )));
    }
    info!(extension = %extension_name, from = %old_entry.owner_repo, to = %new_owner_repo, "Ownership changed, syncing");

    synchronise(ctx).await?;
    let new_entry = verify_snapshot_entry(ctx, &doc).await?;
    notify_owners(ctx, extension_name, &old_entry.owner_repo, &new_owner_repo).await;

    Ok(OwnershipChange {
        old_entry,
        new_entry,
    })
}

async fn verify_snapshot_entry(
    ctx: &RegistryContext,
    doc: &ExtensionDocument,
) -> Result<Value, RegistryError> {
    let mut registry = blob::read_registry(ctx.snapshots.as_ref(), &ctx.config)
        .await
        .map_err(|e| RegistryError::internal("reading registry snapshot", e))?;
    let name = &doc.metadata.name;
    let entry = registry.remove(name).unwrap_or(Value::Null);
    let repository_url = doc.metadata.repository.as_ref().map(|r| r.url.as_str());
    let matches = entry.get("owner").and_then(Value::as_str) == Some(doc.owner.as_str())
        && entry.get("ownerRepo").and_then(Value::as_str) == Some(doc.owner_repo.as_str())
        && entry
            .pointer("/metadata/repository/url")
            .and_then(Value::as_str)
            == repository_url;
    if !matches {
        return Err(RegistryError::Internal(format!(
            "registry.json update failed for: {name}"
        )));
    }
    Ok(entry)
}

async fn notify_owners(ctx: &RegistryContext, name: &str, old_owner_repo: &str, new_owner_repo: &str) {
    if old_owner_repo == new_owner_repo {
        return;
    }
    let notices = [
        (
            old_owner_repo,
            format!("[Extension Registry] Ownership Transferred. You no longer own the extension `{name}`."),
            format!("You no longer own the extension `{name}`.\n\nOwnership of this extension is now transferred from {old_owner_repo} to {new_owner_repo}."),
        ),
        (
            new_owner_repo,
            format!("[Extension Registry] Ownership Transferred: Gained ownership of `{name}`"),
            format!("You have gained ownership of the extension `{name}`.\n\nOwnership of this extension is now transferred from {old_owner_repo} to {new_owner_repo}."),
        ),
    ];
    for (url, title, body) in notices {
        let Some((owner, repo)) = parse_repo_url(url) else {
            warn!(url, "Cannot notify a non-GitHub repository");
            continue;
        };
        if let Err(e) = ctx.vcs.create_issue(&owner, &repo, &title, &body).await {
            warn!(owner = %owner, repo = %repo, error = %e, "Failed to file ownership transfer issue");
        }
    }
}
