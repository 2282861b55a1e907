//! Release intake: from a release reference to a published extension version.
//!
//! # Record states
//! - No record: a new `PROCESSING` record is created.
//! - `published`: terminal, the request is rejected.
//! - `PROCESSING` younger than the processing timeout: rejected with a retry hint.
//! - `PROCESSING` past the timeout, or `FAILED`: re-enters `PROCESSING`.
//!
//! # Validation, in order (first failure wins)
//! 1. the repository exists on the VCS host
//! 2. the release exists and is neither a draft nor a prerelease
//! 3. exactly one `extension.zip` asset, within the size limit
//! 4. a readable `package.json` with every required field
//! 5. an existing extension of that name belongs to the same owner
//! 6. the version is valid semver, new, and greater than the current one
//! 7. the repository has not published a different extension name before
//!
//! The document write is a compare-and-swap on the `metadata.version` that was read (step 5),
//! so of two concurrent publishes for one extension exactly one wins.

use semver::Version;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::blob;
use crate::config::EXTENSION_ASSET_NAME;
use crate::context::RegistryContext;
use crate::contract::{DuplicateKey, FieldEquals, RepoInfo};
use crate::error::RegistryError;
use crate::model::{
    ExtensionDocument, ExtensionMetadata, IssueRef, ReleaseRecord, ReleaseStatus, VersionEntry,
};
use crate::notify::IssueComment;
use crate::store;
use crate::synchronise::synchronise;

pub const RELEASE_REF_FORMAT_ERROR: &str =
    "Expected releaseRef of the form <org>/<repo>:refs/tags/<dfg>";

pub const RELEASE_NOT_FOUND_MESSAGE: &str =
    "Release not found. If this is a recent release, please wait for 1 minute before checking again.";

/// Fields `package.json` must declare.
pub const REQUIRED_MANIFEST_FIELDS: [&str; 8] = [
    "name",
    "title",
    "description",
    "homepage",
    "version",
    "author",
    "license",
    "engines",
];

/// `(owner, repo, tag)` of one VCS-host release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRef {
    pub owner: String,
    pub repo: String,
    pub tag: String,
}

impl ReleaseRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, tag: impl Into<String>) -> Self {
        ReleaseRef {
            owner: owner.into(),
            repo: repo.into(),
            tag: tag.into(),
        }
    }

    /// Parses `owner/repo:refs/tags/tag`.
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::Validation(RELEASE_REF_FORMAT_ERROR.to_string());

        let parts: Vec<&str> = input.split(':').collect();
        let [repo_part, tag_part] = parts.as_slice() else {
            return Err(invalid());
        };
        let repo_split: Vec<&str> = repo_part.split('/').collect();
        let tag_split: Vec<&str> = tag_part.split('/').collect();
        match (repo_split.as_slice(), tag_split.as_slice()) {
            ([owner, repo], ["refs", "tags", tag])
                if !owner.is_empty() && !repo.is_empty() && !tag.is_empty() =>
            {
                Ok(ReleaseRef::new(*owner, *repo, *tag))
            }
            _ => Err(invalid()),
        }
    }

    /// Unique key of the release record.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.owner, self.repo, self.tag)
    }

    /// Owner identity as stored on extension documents.
    pub fn owner_id(&self) -> String {
        format!("github:{}", self.owner)
    }
}

impl FromStr for ReleaseRef {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReleaseRef::parse(s)
    }
}

impl fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:refs/tags/{}", self.owner, self.repo, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub extension_name: String,
    pub version: String,
    /// True when this release created the extension.
    pub created: bool,
    pub tracking_issue: Option<IssueRef>,
}

/// A release that passed every check, ready to be written.
struct ValidatedRelease {
    document: ExtensionDocument,
    /// `metadata.version` read from the store; `None` for a brand-new extension.
    expected_version: Option<String>,
}

/// Publishes one release. Every error is also recorded on the release record and, when a
/// tracking issue exists, reported there.
pub async fn publish_release(
    ctx: &RegistryContext,
    release: &ReleaseRef,
) -> Result<PublishOutcome, RegistryError> {
    info!(release = %release, "[PUBLISH] Received release");
    let mut record = enter_processing(ctx, release).await?;
    record.document_id = Some(claim_record(ctx, release, &record).await?);

    if record.tracking_issue.is_none() {
        record.tracking_issue = open_tracking_issue(ctx, release).await;
        if record.tracking_issue.is_some() {
            store::save_release(ctx.docs.as_ref(), &ctx.config, &record)
                .await
                .map_err(|e| RegistryError::internal("saving tracking issue", e))?;
        }
    }

    // Removed on drop, whatever the outcome.
    let workdir = create_workdir(ctx).await?;
    let zip_path = workdir.path().join(EXTENSION_ASSET_NAME);

    let validated = match validate(ctx, release, &zip_path).await {
        Ok(v) => v,
        Err(e) => {
            record_failure(ctx, release, record, &e).await;
            return Err(e);
        }
    };
    if let Err(e) = commit_document(ctx, &validated).await {
        record_failure(ctx, release, record, &e).await;
        return Err(e);
    }

    let name = validated.document.metadata.name.clone();
    let version = validated.document.metadata.version.clone();
    record.status = ReleaseStatus::Published;
    record.published = true;
    record.published_extension_name = Some(name.clone());
    record.published_version = Some(version.clone());
    record.errors.clear();
    record.last_updated_at = ctx.clock.now();
    store::save_release(ctx.docs.as_ref(), &ctx.config, &record)
        .await
        .map_err(|e| RegistryError::internal("marking release record PUBLISHED", e))?;

    ctx.snapshots
        .upload_file(&ctx.config.bucket, &blob::archive_path(&name, &version), &zip_path)
        .await
        .map_err(|e| RegistryError::internal("uploading extension archive", e))?;
    drop(workdir);

    if let Err(e) = synchronise(ctx).await {
        warn!(extension = %name, error = %e, "[PUBLISH] Post-publish sync failed, the scheduled sync will retry");
    }

    if let Some(issue) = &record.tracking_issue {
        ctx.notifier.comment(IssueComment {
            owner: release.owner.clone(),
            repo: release.repo.clone(),
            issue_number: issue.number,
            body: format!("Extension `{name}` version `{version}` published successfully."),
        });
    }
    info!(extension = %name, version = %version, created = validated.expected_version.is_none(), "[PUBLISH] Release published");

    Ok(PublishOutcome {
        extension_name: name,
        version,
        created: validated.expected_version.is_none(),
        tracking_issue: record.tracking_issue,
    })
}

/// Current state of a release record.
pub async fn release_status(
    ctx: &RegistryContext,
    owner: &str,
    repo: &str,
    tag: &str,
) -> Result<ReleaseRecord, RegistryError> {
    let key = ReleaseRef::new(owner, repo, tag).key();
    store::get_release(ctx.docs.as_ref(), &ctx.config, &key)
        .await
        .map_err(|e| RegistryError::internal("reading release record", e))?
        .ok_or_else(|| RegistryError::NotFound(RELEASE_NOT_FOUND_MESSAGE.to_string()))
}

async fn enter_processing(
    ctx: &RegistryContext,
    release: &ReleaseRef,
) -> Result<ReleaseRecord, RegistryError> {
    let key = release.key();
    let now = ctx.clock.now();
    let existing = store::get_release(ctx.docs.as_ref(), &ctx.config, &key)
        .await
        .map_err(|e| RegistryError::internal("reading release record", e))?;

    let Some(mut record) = existing else {
        debug!(release = %key, "[PUBLISH] New release record");
        return Ok(ReleaseRecord::new_processing(key, now));
    };

    if record.published {
        return Err(RegistryError::Conflict(format!(
            "Release {key} is already published as {}@{}",
            record.published_extension_name.as_deref().unwrap_or("unknown"),
            record.published_version.as_deref().unwrap_or("unknown"),
        )));
    }

    if record.status == ReleaseStatus::Processing {
        let timeout = chrono::Duration::from_std(ctx.config.processing_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let age = now - record.last_updated_at;
        if age < timeout {
            let retry_after = (timeout - age).num_seconds().max(1);
            return Err(RegistryError::Conflict(format!(
                "Release {key} is already being processed. Please retry after {retry_after} seconds."
            )));
        }
        warn!(release = %key, age_secs = age.num_seconds(), "[PUBLISH] Recovering stale PROCESSING release");
    }

    record.status = ReleaseStatus::Processing;
    record.errors.clear();
    record.last_updated_at = now;
    Ok(record)
}

/// Persists the PROCESSING record. For a first attempt this is an insert on the unique
/// `releaseRef` index, so of two concurrent first attempts only one gets past this point.
async fn claim_record(
    ctx: &RegistryContext,
    release: &ReleaseRef,
    record: &ReleaseRecord,
) -> Result<String, RegistryError> {
    match store::save_release(ctx.docs.as_ref(), &ctx.config, record).await {
        Ok(id) => Ok(id),
        Err(e) if DuplicateKey::is_duplicate(&e) => {
            warn!(release = %release, "[PUBLISH] Another attempt created the release record first");
            Err(RegistryError::Conflict(format!(
                "Release {} is already being processed. Please retry after {} seconds.",
                release.key(),
                ctx.config.processing_timeout.as_secs().max(1)
            )))
        }
        Err(e) => Err(RegistryError::internal("saving PROCESSING release record", e)),
    }
}

async fn open_tracking_issue(ctx: &RegistryContext, release: &ReleaseRef) -> Option<IssueRef> {
    let title = format!("[Extension Publish] Release {}", release.tag);
    let body = format!(
        "Publishing release `{release}` to the extension registry. \
         Progress and any errors will be reported in this issue."
    );
    match ctx
        .vcs
        .create_issue(&release.owner, &release.repo, &title, &body)
        .await
    {
        Ok(issue) => Some(issue),
        Err(e) => {
            warn!(release = %release, error = %e, "[PUBLISH] Could not create tracking issue");
            None
        }
    }
}

async fn create_workdir(ctx: &RegistryContext) -> Result<tempfile::TempDir, RegistryError> {
    tokio::fs::create_dir_all(&ctx.config.download_dir)
        .await
        .map_err(|e| RegistryError::internal("creating download directory", e))?;
    tempfile::Builder::new()
        .prefix("release-")
        .tempdir_in(&ctx.config.download_dir)
        .map_err(|e| RegistryError::internal("creating release work directory", e))
}

async fn validate(
    ctx: &RegistryContext,
    release: &ReleaseRef,
    zip_path: &Path,
) -> Result<ValidatedRelease, RegistryError> {
    let ReleaseRef { owner, repo, tag } = release;

    // 1. repository
    let repo_info = ctx
        .vcs
        .get_repo(owner, repo)
        .await
        .map_err(|e| RegistryError::internal("fetching repository", e))?
        .ok_or_else(|| {
            RegistryError::NotFound(format!(
                "Repository {owner}/{repo} does not exist or is not accessible"
            ))
        })?;

    // 2. release
    let release_info = ctx
        .vcs
        .get_release(owner, repo, tag)
        .await
        .map_err(|e| RegistryError::internal("fetching release", e))?
        .ok_or_else(|| {
            RegistryError::NotFound(format!("Release {tag} not found in {owner}/{repo}"))
        })?;
    if release_info.draft {
        return Err(RegistryError::Validation(format!(
            "Release {tag} is a draft; draft releases cannot be published"
        )));
    }
    if release_info.prerelease {
        return Err(RegistryError::Validation(format!(
            "Release {tag} is a prerelease; prereleases cannot be published"
        )));
    }

    // 3. asset
    let mut assets = release_info
        .assets
        .iter()
        .filter(|a| a.name == EXTENSION_ASSET_NAME);
    let (Some(asset), None) = (assets.next(), assets.next()) else {
        return Err(RegistryError::Validation(format!(
            "Release {tag} must have exactly one asset named {EXTENSION_ASSET_NAME}"
        )));
    };
    let limit = ctx.config.extension_size_limit_bytes;
    if asset.size > limit {
        return Err(RegistryError::Validation(format!(
            "{EXTENSION_ASSET_NAME} is {} bytes, larger than the {} MB limit",
            asset.size,
            limit / (1024 * 1024)
        )));
    }
    ctx.vcs
        .download_asset(&asset.download_url, zip_path)
        .await
        .map_err(|e| RegistryError::internal("downloading release asset", e))?;

    // 4. manifest
    let metadata = read_metadata(zip_path).await?;
    let name = metadata.name.clone();
    info!(extension = %name, version = %metadata.version, "[PUBLISH] Read package.json");

    // 5. owner
    let existing = store::get_extension(ctx.docs.as_ref(), &ctx.config, &name)
        .await
        .map_err(|e| RegistryError::internal("reading extension document", e))?;
    let owner_id = release.owner_id();
    if let Some(doc) = &existing {
        if doc.owner != owner_id {
            return Err(RegistryError::Validation(format!(
                "Extension name {name} is already used by another publisher ({}); please choose a different name",
                doc.owner
            )));
        }
    }

    // 6. version
    check_version(&metadata.version, existing.as_ref())?;

    // 7. one name per repository
    let bound = store::query_extensions(
        ctx.docs.as_ref(),
        &ctx.config,
        FieldEquals::new("ownerRepo", repo_info.url.as_str()),
    )
    .await
    .map_err(|e| RegistryError::internal("querying extensions by repository", e))?;
    if let Some(other) = bound.iter().find(|d| d.extension_id != name) {
        return Err(RegistryError::Validation(format!(
            "Repository {} already publishes the extension {}; a repository can only publish one extension (found {name})",
            repo_info.url, other.extension_id
        )));
    }

    let verified = verified_org_markers(ctx, owner).await;
    Ok(build_document(ctx, release, &repo_info, metadata, existing, verified))
}

async fn read_metadata(zip_path: &Path) -> Result<ExtensionMetadata, RegistryError> {
    let raw = archive::read_manifest(zip_path)
        .await
        .map_err(|e| RegistryError::Validation(e.to_string()))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| RegistryError::Validation(format!("package.json is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(RegistryError::Validation(
            "package.json must contain a JSON object".to_string(),
        ));
    }
    let missing: Vec<&str> = REQUIRED_MANIFEST_FIELDS
        .iter()
        .copied()
        .filter(|field| value.get(field).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(RegistryError::Validation(format!(
            "package.json is missing required fields: {}",
            missing.join(", ")
        )));
    }
    let metadata: ExtensionMetadata = serde_json::from_value(value)
        .map_err(|e| RegistryError::Validation(format!("package.json has invalid fields: {e}")))?;
    check_name(&metadata.name)?;
    Ok(metadata)
}

/// The name becomes part of the archive path, so it must be a single plain path segment.
pub fn check_name(name: &str) -> Result<(), RegistryError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
    if plain {
        Ok(())
    } else {
        Err(RegistryError::Validation(format!(
            "Invalid extension name {name:?} in package.json; names may not be empty, start with '.', \
             or contain '..', slashes or whitespace"
        )))
    }
}

/// Smallest patch bump above `current`, used in rejection messages.
fn next_patch(current: &Version) -> Version {
    Version::new(current.major, current.minor, current.patch + 1)
}

pub fn check_version(
    version: &str,
    existing: Option<&ExtensionDocument>,
) -> Result<(), RegistryError> {
    let new = Version::parse(version).map_err(|_| {
        RegistryError::Validation(format!(
            "Invalid version {version} in package.json; expected a semantic version like 1.0.0"
        ))
    })?;
    let Some(doc) = existing else {
        return Ok(());
    };
    let current_raw = &doc.metadata.version;
    let Ok(current) = Version::parse(current_raw) else {
        warn!(extension = %doc.extension_id, version = %current_raw, "[PUBLISH] Stored version is not semver, only checking history");
        if doc.has_version(version) {
            return Err(RegistryError::Validation(format!(
                "Version {version} of {} is already published",
                doc.extension_id
            )));
        }
        return Ok(());
    };
    if doc.has_version(version) || new <= current {
        return Err(RegistryError::Validation(format!(
            "Version {version} of {} cannot be published: the version must be greater than {current} (for example {})",
            doc.extension_id,
            next_patch(&current)
        )));
    }
    Ok(())
}

/// Verification markers for a verified organisation. Any failure just means "not verified".
async fn verified_org_markers(ctx: &RegistryContext, owner: &str) -> Option<Vec<String>> {
    match ctx.vcs.get_org(owner).await {
        Ok(Some(org)) if org.verified => org.blog_url.map(|blog| vec![blog]),
        Ok(_) => None,
        Err(e) => {
            debug!(owner, error = %e, "[PUBLISH] Organisation lookup failed, skipping verification");
            None
        }
    }
}

fn build_document(
    ctx: &RegistryContext,
    release: &ReleaseRef,
    repo_info: &RepoInfo,
    metadata: ExtensionMetadata,
    existing: Option<ExtensionDocument>,
    verified: Option<Vec<String>>,
) -> ValidatedRelease {
    let entry = VersionEntry {
        version: metadata.version.clone(),
        published_at: ctx.clock.now(),
        engine_constraint: metadata.engines.clone(),
        downloads: 0,
    };
    match existing {
        None => ValidatedRelease {
            document: ExtensionDocument {
                extension_id: metadata.name.clone(),
                metadata,
                owner: release.owner_id(),
                owner_repo: repo_info.url.clone(),
                versions: vec![entry],
                total_downloads: 0,
                star_count: repo_info.star_count,
                ownership_verified: verified,
                sync_pending: true,
                document_id: None,
            },
            expected_version: None,
        },
        Some(mut doc) => {
            let expected = doc.metadata.version.clone();
            doc.metadata = metadata;
            doc.owner = release.owner_id();
            doc.owner_repo = repo_info.url.clone();
            doc.versions.push(entry);
            doc.star_count = repo_info.star_count;
            if verified.is_some() {
                doc.ownership_verified = verified;
            }
            doc.sync_pending = true;
            ValidatedRelease {
                document: doc,
                expected_version: Some(expected),
            }
        }
    }
}

async fn commit_document(
    ctx: &RegistryContext,
    validated: &ValidatedRelease,
) -> Result<(), RegistryError> {
    let doc = &validated.document;
    match &validated.expected_version {
        None => match store::insert_extension(ctx.docs.as_ref(), &ctx.config, doc).await {
            Ok(id) => {
                debug!(extension = %doc.extension_id, document_id = %id, "[PUBLISH] Inserted extension document");
                Ok(())
            }
            Err(e) if DuplicateKey::is_duplicate(&e) => {
                warn!(extension = %doc.extension_id, "[PUBLISH] Extension created by a concurrent publish");
                Err(publish_conflict(doc))
            }
            Err(e) => Err(RegistryError::internal("inserting extension document", e)),
        },
        Some(expected) => {
            // Downloads counted while this release was validated are carried over.
            let fresh = store::get_extension(ctx.docs.as_ref(), &ctx.config, &doc.extension_id)
                .await
                .map_err(|e| RegistryError::internal("re-reading extension document", e))?;
            let Some(fresh) = fresh.filter(|f| &f.metadata.version == expected) else {
                warn!(extension = %doc.extension_id, expected = %expected, "[PUBLISH] Version changed under us");
                return Err(publish_conflict(doc));
            };
            let mut doc = doc.clone();
            doc.document_id = fresh.document_id.clone();
            carry_download_counts(&mut doc, &fresh);

            let written =
                store::update_extension_if(ctx.docs.as_ref(), &ctx.config, &doc, expected)
                    .await
                    .map_err(|e| RegistryError::internal("updating extension document", e))?;
            if written {
                Ok(())
            } else {
                warn!(extension = %doc.extension_id, expected = %expected, "[PUBLISH] Version changed under us");
                Err(publish_conflict(&doc))
            }
        }
    }
}

fn publish_conflict(doc: &ExtensionDocument) -> RegistryError {
    RegistryError::Conflict(format!(
        "Could not publish {}@{}: did another release happen for this extension while this one was being published?",
        doc.extension_id, doc.metadata.version
    ))
}

fn carry_download_counts(doc: &mut ExtensionDocument, fresh: &ExtensionDocument) {
    doc.total_downloads = doc.total_downloads.max(fresh.total_downloads);
    for entry in &mut doc.versions {
        if let Some(current) = fresh.versions.iter().find(|v| v.version == entry.version) {
            entry.downloads = entry.downloads.max(current.downloads);
        }
    }
}

/// Best-effort: persists the failure and reports it on the tracking issue.
async fn record_failure(
    ctx: &RegistryContext,
    release: &ReleaseRef,
    mut record: ReleaseRecord,
    failure: &RegistryError,
) {
    warn!(release = %release, error = %failure, "[PUBLISH] Release rejected");
    let message = failure.public_message().to_string();
    record.status = ReleaseStatus::Failed;
    record.errors = vec![message.clone()];
    record.last_updated_at = ctx.clock.now();
    if let Err(e) = store::save_release(ctx.docs.as_ref(), &ctx.config, &record).await {
        error!(release = %release, error = %e, "[PUBLISH][ERROR] Could not mark release FAILED");
    }
    if let Some(issue) = &record.tracking_issue {
        ctx.notifier.comment(IssueComment {
            owner: release.owner.clone(),
            repo: release.repo.clone(),
            issue_number: issue.number,
            body: format!("Release `{release}` could not be published:\n\n- {message}"),
        });
    }
}
