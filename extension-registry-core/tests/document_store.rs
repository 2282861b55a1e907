use extension_registry_core::config::RegistryConfig;
use extension_registry_core::contract::{DocumentStore, DuplicateKey, FieldEquals, VersionCondition};
use extension_registry_core::store::{render_condition, render_filter, InMemoryDocumentStore};
use serde_json::json;

const TABLE: &str = "registry_test.extensionDetails";

#[tokio::test]
async fn test_conditional_update_is_compare_and_swap() {
    let store = InMemoryDocumentStore::new();
    let id = store
        .put(TABLE, json!({ "extensionId": "acme.tools", "metadata": { "version": "1.0.0" } }))
        .await
        .expect("put");

    let first = store
        .update(
            TABLE,
            &id,
            json!({ "extensionId": "acme.tools", "metadata": { "version": "1.0.1" } }),
            Some(VersionCondition::new("1.0.0")),
        )
        .await
        .expect("first update");
    assert!(first, "condition held, write accepted");

    let second = store
        .update(
            TABLE,
            &id,
            json!({ "extensionId": "acme.tools", "metadata": { "version": "1.0.1" } }),
            Some(VersionCondition::new("1.0.0")),
        )
        .await
        .expect("second update");
    assert!(!second, "stale expected version, write refused");

    let missing = store
        .update(TABLE, "no-such-id", json!({}), None)
        .await
        .expect("update missing");
    assert!(!missing);
    assert_eq!(store.write_count(), 2);
}

#[tokio::test]
async fn test_index_lookup_query_and_increment() {
    let store = InMemoryDocumentStore::new();
    let id = store
        .put(TABLE, json!({ "extensionId": "acme.tools", "syncPending": true, "totalDownloads": 3 }))
        .await
        .expect("put");
    store
        .put(TABLE, json!({ "extensionId": "acme.lint", "syncPending": false }))
        .await
        .expect("put");

    let found = store
        .get_by_index(TABLE, "extensionId", "acme.tools")
        .await
        .expect("get_by_index");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].document_id, id);

    let pending = store
        .query(TABLE, FieldEquals::new("syncPending", true))
        .await
        .expect("query");
    assert_eq!(pending.len(), 1);

    store
        .increment(TABLE, &id, "totalDownloads", 1)
        .await
        .expect("increment");
    assert_eq!(store.raw(TABLE, &id).expect("raw")["totalDownloads"], 4);
}

#[test]
fn test_predicate_rendering_escapes_quotes() {
    assert_eq!(
        render_condition(&VersionCondition::new("1.0.0")),
        "$.metadata.version='1.0.0'"
    );
    assert_eq!(
        render_condition(&VersionCondition::new("1.0.0' OR '1'='1")),
        r"$.metadata.version='1.0.0\' OR \'1\'=\'1'"
    );
    assert_eq!(
        render_filter(&FieldEquals::new("syncPending", true)),
        "$.syncPending=true"
    );
    assert_eq!(
        render_filter(&FieldEquals::new("ownerRepo", "https://github.com/acme/tools")),
        "$.ownerRepo='https://github.com/acme/tools'"
    );
}

#[test]
fn test_field_equals_follows_dotted_paths() {
    let body = json!({ "metadata": { "name": "acme.tools" } });
    assert!(FieldEquals::new("metadata.name", "acme.tools").matches(&body));
    assert!(!FieldEquals::new("metadata.version", "1.0.0").matches(&body));
}

#[tokio::test]
async fn test_unique_index_rejects_duplicate_keys() {
    let config = RegistryConfig::for_stage("test");
    let store = InMemoryDocumentStore::for_registry(&config);
    let table = config.extensions_table.as_str();
    let id = store
        .put(table, json!({ "extensionId": "acme.tools", "metadata": { "version": "1.0.0" } }))
        .await
        .expect("first put");

    let err = store
        .put(table, json!({ "extensionId": "acme.tools", "metadata": { "version": "2.0.0" } }))
        .await
        .expect_err("second document with the same id");
    assert!(DuplicateKey::is_duplicate(&err), "unexpected error: {err}");

    let other = store
        .put(table, json!({ "extensionId": "acme.lint", "metadata": { "version": "1.0.0" } }))
        .await
        .expect("different id");
    let renamed = store
        .update(table, &other, json!({ "extensionId": "acme.tools" }), None)
        .await
        .expect_err("update onto a taken id");
    assert!(DuplicateKey::is_duplicate(&renamed));

    assert!(store
        .update(table, &id, json!({ "extensionId": "acme.tools", "metadata": { "version": "1.0.1" } }), None)
        .await
        .expect("rewrite own document"));
    assert_eq!(
        store
            .get_by_index(table, "extensionId", "acme.tools")
            .await
            .expect("lookup")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_unique_index_cannot_be_created_over_duplicates() {
    let store = InMemoryDocumentStore::new();
    for _ in 0..2 {
        store
            .put(TABLE, json!({ "extensionId": "acme.tools" }))
            .await
            .expect("no index yet");
    }

    let err = store
        .create_index(TABLE, "extensionId", true)
        .await
        .expect_err("existing duplicates");
    assert!(DuplicateKey::is_duplicate(&err));
    store
        .create_index(TABLE, "syncPending", false)
        .await
        .expect("non-unique index");
}
