//! Documents persisted in the store and the artifacts published to the snapshot bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Publisher-supplied descriptor, parsed from the extension's `package.json`.
///
/// Keys the registry does not interpret are kept verbatim in `extra` so that nothing the
/// publisher declared is lost on the way to the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    pub name: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub homepage: String,
    /// Either a plain string or an `{name, email, url}` object.
    pub author: Value,
    pub license: String,
    /// Engine compatibility constraint, e.g. `{"brackets": ">=0.34.0"}`.
    pub engines: Value,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub categories: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryLink>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryLink {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

/// One published version of an extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: String,
    pub published_at: DateTime<Utc>,
    pub engine_constraint: Value,
    #[serde(default)]
    pub downloads: u64,
}

/// Authoritative record for one published extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDocument {
    pub extension_id: String,
    pub metadata: ExtensionMetadata,
    pub owner: String,
    pub owner_repo: String,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    #[serde(default)]
    pub total_downloads: u64,
    #[serde(default)]
    pub star_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership_verified: Option<Vec<String>>,
    #[serde(default)]
    pub sync_pending: bool,
    /// Store-assigned identity. Never written into a stored body or a snapshot.
    #[serde(default, skip_serializing)]
    pub document_id: Option<String>,
}

impl ExtensionDocument {
    /// Copy of the document as it appears in the public snapshot: store-internal fields removed.
    pub fn snapshot_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("syncPending");
            map.remove("documentId");
        }
        value
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.metadata.version == version || self.versions.iter().any(|v| v.version == version)
    }

    pub fn popularity(&self) -> PopularityEntry {
        PopularityEntry {
            total_downloads: self.total_downloads,
            star_count: self.star_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Processing,
    Failed,
    Published,
}

/// Reference to a VCS-host issue used to report the progress of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    pub url: String,
}

/// Processing state of one `(owner, repo, tag)` release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRecord {
    pub release_ref: String,
    pub status: ReleaseStatus,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_issue: Option<IssueRef>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_extension_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_version: Option<String>,
    #[serde(default, skip_serializing)]
    pub document_id: Option<String>,
}

impl ReleaseRecord {
    pub fn new_processing(release_ref: String, now: DateTime<Utc>) -> Self {
        ReleaseRecord {
            release_ref,
            status: ReleaseStatus::Processing,
            errors: Vec::new(),
            tracking_issue: None,
            last_updated_at: now,
            published: false,
            published_extension_name: None,
            published_version: None,
            document_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularityEntry {
    #[serde(default)]
    pub total_downloads: u64,
    #[serde(default)]
    pub star_count: u64,
}

/// `registry.json`: extension name to trimmed document.
pub type RegistrySnapshot = BTreeMap<String, Value>;

/// `popularity.json`: extension name to counters.
pub type PopularitySnapshot = BTreeMap<String, PopularityEntry>;

/// `registry_version.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVersion {
    pub version: u64,
}
