//! Shared fixtures for the registry integration tests.
//!
//! Every test gets real in-memory stores (so compare-and-swap behaves like the production store),
//! a manual clock, a scratch download dir, and a scripted `MockVcsHost`.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use extension_registry_core::blob::InMemorySnapshotStore;
use extension_registry_core::clock::ManualClock;
use extension_registry_core::config::RegistryConfig;
use extension_registry_core::contract::{
    ClientError, DocumentStore, FieldEquals, MockVcsHost, ReleaseAsset, ReleaseInfo, RepoInfo,
    StoredDocument, VersionCondition,
};
use extension_registry_core::model::{ExtensionDocument, ExtensionMetadata, IssueRef, VersionEntry};
use extension_registry_core::notify::Notifier;
use extension_registry_core::store::{self, InMemoryDocumentStore};
use extension_registry_core::RegistryContext;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub ctx: RegistryContext,
    pub docs: Arc<InMemoryDocumentStore>,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub clock: Arc<ManualClock>,
    _downloads: TempDir,
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
}

pub fn harness(vcs: MockVcsHost) -> Harness {
    harness_with_store(vcs, |docs| docs as Arc<dyn DocumentStore>)
}

/// Like [`harness`], but the context sees the in-memory store through `wrap`. Assertions still go
/// to the in-memory store directly.
pub fn harness_with_store(
    vcs: MockVcsHost,
    wrap: impl FnOnce(Arc<InMemoryDocumentStore>) -> Arc<dyn DocumentStore>,
) -> Harness {
    let downloads = tempfile::tempdir().expect("create download dir");
    let mut config = RegistryConfig::for_stage("test");
    config.download_dir = downloads.path().to_path_buf();
    let docs = Arc::new(InMemoryDocumentStore::for_registry(&config));
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));

    let ctx_docs = wrap(docs.clone());
    let ctx = RegistryContext::new(
        ctx_docs,
        snapshots.clone(),
        Arc::new(vcs),
        clock.clone(),
        config,
        Notifier::disabled(),
    );
    Harness {
        ctx,
        docs,
        snapshots,
        clock,
        _downloads: downloads,
    }
}

/// A second harness over the same snapshot bucket and clock, with an empty document store.
pub fn harness_over_snapshots(h: &Harness) -> Harness {
    let downloads = tempfile::tempdir().expect("create download dir");
    let mut config = (*h.ctx.config).clone();
    config.download_dir = downloads.path().to_path_buf();
    let docs = Arc::new(InMemoryDocumentStore::for_registry(&config));
    let ctx = RegistryContext::new(
        docs.clone(),
        h.snapshots.clone(),
        Arc::new(MockVcsHost::new()),
        h.clock.clone(),
        config,
        Notifier::disabled(),
    );
    Harness {
        ctx,
        docs,
        snapshots: h.snapshots.clone(),
        clock: h.clock.clone(),
        _downloads: downloads,
    }
}

pub fn manifest(name: &str, version: &str) -> Value {
    json!({
        "name": name,
        "title": "Test Extension",
        "description": "An extension used in tests",
        "homepage": "https://github.com/acme/tools",
        "version": version,
        "author": "Acme <dev@acme.test>",
        "license": "MIT",
        "engines": { "brackets": ">=1.0.0" },
        "keywords": ["testing"]
    })
}

pub fn metadata(name: &str, version: &str) -> ExtensionMetadata {
    serde_json::from_value(manifest(name, version)).expect("manifest fixture is valid metadata")
}

/// Builds a zip in memory from `(path, contents)` pairs; paths ending in `/` become directories.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (path, contents) in entries {
        if path.ends_with('/') {
            writer.add_directory(*path, options).expect("add dir");
        } else {
            writer.start_file(*path, options).expect("start file");
            writer.write_all(contents.as_bytes()).expect("write file");
        }
    }
    writer.finish().expect("finish zip").into_inner()
}

pub fn extension_zip(name: &str, version: &str) -> Vec<u8> {
    let manifest = manifest(name, version).to_string();
    zip_bytes(&[("package.json", &manifest), ("main.js", "define(function () {});")])
}

/// VCS host where `owner/repo` exists, the release is publishable and carries `archive`.
pub fn release_vcs(stars: u64, archive: Vec<u8>) -> MockVcsHost {
    let mut vcs = MockVcsHost::new();
    vcs.expect_get_repo().returning(move |owner, repo| {
        Ok(Some(RepoInfo {
            url: format!("https://github.com/{owner}/{repo}"),
            star_count: stars,
        }))
    });
    let size = archive.len() as u64;
    vcs.expect_get_release().returning(move |_, _, _| {
        Ok(Some(ReleaseInfo {
            draft: false,
            prerelease: false,
            assets: vec![ReleaseAsset {
                name: "extension.zip".to_string(),
                size,
                download_url: "https://downloads.test/extension.zip".to_string(),
            }],
        }))
    });
    vcs.expect_get_org().returning(|_| Ok(None));
    vcs.expect_create_issue().returning(|owner, repo, _, _| {
        Ok(IssueRef {
            number: 7,
            url: format!("https://github.com/{owner}/{repo}/issues/7"),
        })
    });
    vcs.expect_comment_on_issue().returning(|_, _, _, _| Ok(()));
    vcs.expect_download_asset().returning(move |_, dest| {
        std::fs::write(dest, &archive)?;
        Ok(())
    });
    vcs.expect_remaining_budget().return_const(5000u64);
    vcs
}

/// Inserts a document as a previous publish would have left it.
pub async fn seed_extension(
    h: &Harness,
    name: &str,
    version: &str,
    owner: &str,
    repo: &str,
    sync_pending: bool,
) -> String {
    let doc = ExtensionDocument {
        extension_id: name.to_string(),
        metadata: metadata(name, version),
        owner: format!("github:{owner}"),
        owner_repo: format!("https://github.com/{owner}/{repo}"),
        versions: vec![VersionEntry {
            version: version.to_string(),
            published_at: start_time(),
            engine_constraint: json!({ "brackets": ">=1.0.0" }),
            downloads: 0,
        }],
        total_downloads: 0,
        star_count: 0,
        ownership_verified: None,
        sync_pending,
        document_id: None,
    };
    store::insert_extension(h.docs.as_ref(), &h.ctx.config, &doc)
        .await
        .expect("seed extension")
}

pub async fn load_extension(h: &Harness, name: &str) -> ExtensionDocument {
    store::get_extension(h.docs.as_ref(), &h.ctx.config, name)
        .await
        .expect("read extension")
        .expect("extension exists")
}

pub fn read_object(h: &Harness, path: &str) -> Option<Value> {
    h.snapshots
        .object(&h.ctx.config.bucket, path)
        .map(|bytes| serde_json::from_slice(&bytes).expect("snapshot object is JSON"))
}

/// Document store that lets a competing writer bump `metadata.version` right before the first
/// conditional update reaches the real store.
pub struct RacingStore {
    pub inner: Arc<InMemoryDocumentStore>,
    pub competing_version: String,
    raced: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>, competing_version: &str) -> Self {
        RacingStore {
            inner,
            competing_version: competing_version.to_string(),
            raced: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DocumentStore for RacingStore {
    async fn create_database(&self, name: &str) -> Result<(), ClientError> {
        self.inner.create_database(name).await
    }

    async fn create_table(&self, table: &str) -> Result<(), ClientError> {
        self.inner.create_table(table).await
    }

    async fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<(), ClientError> {
        self.inner.create_index(table, field, unique).await
    }

    async fn get_by_index(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        self.inner.get_by_index(table, field, value).await
    }

    async fn put(&self, table: &str, body: Value) -> Result<String, ClientError> {
        self.inner.put(table, body).await
    }

    async fn update(
        &self,
        table: &str,
        document_id: &str,
        body: Value,
        condition: Option<VersionCondition>,
    ) -> Result<bool, ClientError> {
        if condition.is_some() && !self.raced.swap(true, Ordering::SeqCst) {
            let mut competing = self
                .inner
                .raw(table, document_id)
                .ok_or("racing document missing")?;
            competing["metadata"]["version"] = Value::from(self.competing_version.clone());
            self.inner.update(table, document_id, competing, None).await?;
        }
        self.inner.update(table, document_id, body, condition).await
    }

    async fn increment(
        &self,
        table: &str,
        document_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), ClientError> {
        self.inner.increment(table, document_id, field, delta).await
    }

    async fn query(
        &self,
        table: &str,
        filter: FieldEquals,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        self.inner.query(table, filter).await
    }
}

/// Document store that holds the first `parties` lookups on `field` at a barrier, so that many
/// concurrent publishes all observe the same "nothing there yet" before any of them writes.
pub struct LockstepStore {
    pub inner: Arc<InMemoryDocumentStore>,
    field: &'static str,
    barrier: tokio::sync::Barrier,
    waiting: std::sync::atomic::AtomicUsize,
    parties: usize,
}

impl LockstepStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>, field: &'static str, parties: usize) -> Self {
        LockstepStore {
            inner,
            field,
            barrier: tokio::sync::Barrier::new(parties),
            waiting: std::sync::atomic::AtomicUsize::new(0),
            parties,
        }
    }
}

#[async_trait]
impl DocumentStore for LockstepStore {
    async fn create_database(&self, name: &str) -> Result<(), ClientError> {
        self.inner.create_database(name).await
    }

    async fn create_table(&self, table: &str) -> Result<(), ClientError> {
        self.inner.create_table(table).await
    }

    async fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<(), ClientError> {
        self.inner.create_index(table, field, unique).await
    }

    async fn get_by_index(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        let found = self.inner.get_by_index(table, field, value).await?;
        if field == self.field && self.waiting.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait().await;
        }
        Ok(found)
    }

    async fn put(&self, table: &str, body: Value) -> Result<String, ClientError> {
        self.inner.put(table, body).await
    }

    async fn update(
        &self,
        table: &str,
        document_id: &str,
        body: Value,
        condition: Option<VersionCondition>,
    ) -> Result<bool, ClientError> {
        self.inner.update(table, document_id, body, condition).await
    }

    async fn increment(
        &self,
        table: &str,
        document_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), ClientError> {
        self.inner.increment(table, document_id, field, delta).await
    }

    async fn query(
        &self,
        table: &str,
        filter: FieldEquals,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        self.inner.query(table, filter).await
    }
}

/// Which read is followed by the extra downloads.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum AfterRead {
    /// The first `extensionId` index lookup.
    Lookup,
    /// The first query.
    Query,
}

/// Document store where `downloads` downloads are counted right after a chosen read returns, so
/// the caller holds a copy that predates them.
pub struct DownloadsAfterReadStore {
    pub inner: Arc<InMemoryDocumentStore>,
    after: AfterRead,
    downloads: i64,
    counted: AtomicBool,
}

impl DownloadsAfterReadStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>, after: AfterRead, downloads: i64) -> Self {
        DownloadsAfterReadStore {
            inner,
            after,
            downloads,
            counted: AtomicBool::new(false),
        }
    }

    async fn count_once(&self, table: &str, found: &[StoredDocument]) -> Result<(), ClientError> {
        if self.counted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for doc in found {
            self.inner
                .increment(table, &doc.document_id, "totalDownloads", self.downloads)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for DownloadsAfterReadStore {
    async fn create_database(&self, name: &str) -> Result<(), ClientError> {
        self.inner.create_database(name).await
    }

    async fn create_table(&self, table: &str) -> Result<(), ClientError> {
        self.inner.create_table(table).await
    }

    async fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<(), ClientError> {
        self.inner.create_index(table, field, unique).await
    }

    async fn get_by_index(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        let found = self.inner.get_by_index(table, field, value).await?;
        if self.after == AfterRead::Lookup && field == "extensionId" {
            self.count_once(table, &found).await?;
        }
        Ok(found)
    }

    async fn put(&self, table: &str, body: Value) -> Result<String, ClientError> {
        self.inner.put(table, body).await
    }

    async fn update(
        &self,
        table: &str,
        document_id: &str,
        body: Value,
        condition: Option<VersionCondition>,
    ) -> Result<bool, ClientError> {
        self.inner.update(table, document_id, body, condition).await
    }

    async fn increment(
        &self,
        table: &str,
        document_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), ClientError> {
        self.inner.increment(table, document_id, field, delta).await
    }

    async fn query(
        &self,
        table: &str,
        filter: FieldEquals,
    ) -> Result<Vec<StoredDocument>, ClientError> {
        let found = self.inner.query(table, filter).await?;
        if self.after == AfterRead::Query {
            self.count_once(table, &found).await?;
        }
        Ok(found)
    }
}
