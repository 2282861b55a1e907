//! # contract: interfaces to everything outside the registry core
//!
//! The core talks to three external systems and one ambient dependency:
//! - [`DocumentStore`]: the authoritative indexed document database.
//! - [`SnapshotStore`]: the blob bucket holding the published JSON artifacts and archives.
//! - [`VcsHost`]: the version-control host (repositories, releases, issues).
//! - [`Clock`]: wall-clock time, injected so timeouts and daily resets are testable.
//!
//! All traits are async (except [`Clock`]), object safe, and annotated for `mockall` so tests can
//! script exact interactions. Every client error is a boxed [`ClientError`]; the core decides
//! whether a failure is user-facing or internal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

pub use crate::error::ClientError;
use crate::model::IssueRef;

/// A document as returned by the store: its opaque identity plus the stored body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub document_id: String,
    pub body: Value,
}

/// Typed compare-and-swap condition: the stored `metadata.version` must equal `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCondition {
    pub expected_version: String,
}

impl VersionCondition {
    pub fn new(expected_version: impl Into<String>) -> Self {
        VersionCondition {
            expected_version: expected_version.into(),
        }
    }
}

/// A `put` or `update` rejected because another document already holds the same unique key.
///
/// Travels inside a [`ClientError`]; callers detect it with [`DuplicateKey::is_duplicate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate unique key in {table}: {detail}")]
pub struct DuplicateKey {
    pub table: String,
    pub detail: String,
}

impl DuplicateKey {
    pub fn new(table: impl Into<String>, detail: impl Into<String>) -> Self {
        DuplicateKey {
            table: table.into(),
            detail: detail.into(),
        }
    }

    pub fn is_duplicate(err: &ClientError) -> bool {
        err.downcast_ref::<DuplicateKey>().is_some()
    }
}

/// Equality predicate on a (dot separated) JSON path, e.g. `syncPending == true`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEquals {
    pub path: String,
    pub value: Value,
}

impl FieldEquals {
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldEquals {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Evaluates the predicate against a document body.
    pub fn matches(&self, body: &Value) -> bool {
        let mut current = body;
        for segment in self.path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        *current == self.value
    }
}

/// Indexed document database with conditional writes.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents whose indexed `field` equals `value`.
    async fn get_by_index(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, ClientError>;

    /// Creates the database if it does not exist yet.
    async fn create_database(&self, name: &str) -> Result<(), ClientError>;

    /// Creates a table if it does not exist yet.
    async fn create_table(&self, table: &str) -> Result<(), ClientError>;

    /// Indexes a top-level field. On a unique index, writes that would duplicate a value fail
    /// with [`DuplicateKey`].
    async fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<(), ClientError>;

    /// Unconditioned insert. Returns the store-assigned document id. Fails with [`DuplicateKey`]
    /// when a unique index already holds the body's value.
    async fn put(&self, table: &str, body: Value) -> Result<String, ClientError>;

    /// Replaces the document body.
    ///
    /// With a condition, the write only happens when the stored `metadata.version` matches.
    /// `Ok(false)` means the condition did not hold or the document no longer exists.
    async fn update(
        &self,
        table: &str,
        document_id: &str,
        body: Value,
        condition: Option<VersionCondition>,
    ) -> Result<bool, ClientError>;

    /// Atomically adds `delta` to a numeric top-level field.
    async fn increment(
        &self,
        table: &str,
        document_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), ClientError>;

    /// All documents matching the predicate.
    async fn query(
        &self,
        table: &str,
        filter: FieldEquals,
    ) -> Result<Vec<StoredDocument>, ClientError>;
}

/// Whole-object blob storage keyed by bucket and path.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Object contents, or `None` when no object exists at that path.
    async fn get(&self, bucket: &str, path: &str) -> Result<Option<Vec<u8>>, ClientError>;

    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<(), ClientError>;

    /// Uploads a local file, for archives too large to hold comfortably in memory.
    async fn upload_file(&self, bucket: &str, path: &str, local: &Path) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub url: String,
    pub star_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub size: u64,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub draft: bool,
    pub prerelease: bool,
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgInfo {
    pub verified: bool,
    pub blog_url: Option<String>,
}

/// Version-control host. Lookups return `Ok(None)` when the object does not exist.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait VcsHost: Send + Sync {
    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<RepoInfo>, ClientError>;

    async fn get_release(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<Option<ReleaseInfo>, ClientError>;

    async fn get_org(&self, name: &str) -> Result<Option<OrgInfo>, ClientError>;

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, ClientError>;

    async fn comment_on_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), ClientError>;

    /// Downloads a release asset to `dest`.
    async fn download_asset(&self, url: &str, dest: &Path) -> Result<(), ClientError>;

    /// Requests still available in the current rate-limit window.
    fn remaining_budget(&self) -> u64;
}

/// Source of the current time.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
