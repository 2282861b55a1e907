mod common;

use common::*;
use extension_registry_core::contract::{DocumentStore, MockVcsHost};
use extension_registry_core::popularity::refresh_popularity;
use extension_registry_core::synchronise::synchronise;

/// Seeds and syncs two extensions, then returns the harness with a clean snapshot.
async fn synced_registry() -> Harness {
    let h = harness(MockVcsHost::new());
    seed_extension(&h, "acme.tools", "1.0.0", "acme", "tools", true).await;
    seed_extension(&h, "acme.lint", "0.1.0", "acme", "lint", true).await;
    synchronise(&h.ctx).await.expect("initial sync");
    h
}

async fn set_counters(h: &Harness, name: &str, downloads: u64, stars: u64, pending: bool) {
    let doc = load_extension(h, name).await;
    let id = doc.document_id.clone().expect("stored document has an id");
    let mut body = h.docs.raw(&h.ctx.config.extensions_table, &id).expect("raw body");
    body["totalDownloads"] = downloads.into();
    body["starCount"] = stars.into();
    body["syncPending"] = pending.into();
    h.docs
        .update(&h.ctx.config.extensions_table, &id, body, None)
        .await
        .expect("update counters");
}

#[tokio::test]
async fn test_pending_document_left_untouched() {
    let h = synced_registry().await;
    set_counters(&h, "acme.tools", 40, 3, true).await;
    let puts_before = h.snapshots.put_count();

    let report = refresh_popularity(&h.ctx).await.expect("refresh");

    assert_eq!(report.skipped_pending, vec!["acme.tools".to_string()]);
    assert!(report.updated.is_empty());
    assert_eq!(h.snapshots.put_count(), puts_before, "nothing changed, nothing written");
    let popularity = read_object(&h, "popularity.json").expect("popularity.json");
    assert_eq!(popularity["acme.tools"]["totalDownloads"], 0);
}

#[tokio::test]
async fn test_changed_counters_patched_without_version_bump() {
    let h = synced_registry().await;
    set_counters(&h, "acme.lint", 12, 5, false).await;

    let report = refresh_popularity(&h.ctx).await.expect("refresh");
    assert_eq!(report.updated, vec!["acme.lint".to_string()]);

    let popularity = read_object(&h, "popularity.json").expect("popularity.json");
    assert_eq!(popularity["acme.lint"]["totalDownloads"], 12);
    assert_eq!(popularity["acme.lint"]["starCount"], 5);
    let registry = read_object(&h, "registry.json").expect("registry.json");
    assert_eq!(registry["acme.lint"]["starCount"], 5);
    assert_eq!(registry["acme.tools"]["starCount"], 0);

    assert_eq!(
        read_object(&h, "registry_version.json").expect("version")["version"],
        1,
        "counter refresh never bumps the snapshot version"
    );
}

#[tokio::test]
async fn test_unchanged_counters_write_nothing() {
    let h = synced_registry().await;
    let puts_before = h.snapshots.put_count();

    let report = refresh_popularity(&h.ctx).await.expect("refresh");

    assert!(report.updated.is_empty());
    assert_eq!(h.snapshots.put_count(), puts_before);
}
