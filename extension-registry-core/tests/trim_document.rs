use extension_registry_core::config::TrimPolicy;
use extension_registry_core::trim::{trim_document, I18N_KEY};
use serde_json::{json, Value};

struct TestCase {
    name: &'static str,
    input: Value,
    pointer: &'static str,
    expected_chars: usize,
}

fn chars_at(value: &Value, pointer: &str) -> usize {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("no string at {pointer}"))
        .chars()
        .count()
}

#[test]
fn test_field_limits() {
    let long = "x".repeat(2000);
    let cases = vec![
        TestCase {
            name: "title",
            input: json!({ "metadata": { "title": long } }),
            pointer: "/metadata/title",
            expected_chars: 64,
        },
        TestCase {
            name: "description",
            input: json!({ "metadata": { "description": "d".repeat(500) } }),
            pointer: "/metadata/description",
            expected_chars: 256,
        },
        TestCase {
            name: "author object fields inherit the person limit",
            input: json!({ "metadata": { "author": { "name": long, "url": long } } }),
            pointer: "/metadata/author/url",
            expected_chars: 128,
        },
        TestCase {
            name: "contributors array",
            input: json!({ "metadata": { "contributors": [long] } }),
            pointer: "/metadata/contributors/0",
            expected_chars: 128,
        },
        TestCase {
            name: "keyword entries",
            input: json!({ "metadata": { "keywords": ["k".repeat(60)] } }),
            pointer: "/metadata/keywords/0",
            expected_chars: 48,
        },
        TestCase {
            name: "other strings",
            input: json!({ "metadata": { "homepage": long } }),
            pointer: "/metadata/homepage",
            expected_chars: 1024,
        },
        TestCase {
            name: "short strings untouched",
            input: json!({ "metadata": { "title": "Tools" } }),
            pointer: "/metadata/title",
            expected_chars: 5,
        },
        TestCase {
            name: "multi-byte characters counted as characters",
            input: json!({ "metadata": { "title": "é".repeat(100) } }),
            pointer: "/metadata/title",
            expected_chars: 64,
        },
    ];

    let policy = TrimPolicy::default();
    for mut case in cases {
        trim_document(&mut case.input, &policy);
        assert_eq!(
            chars_at(&case.input, case.pointer),
            case.expected_chars,
            "case '{}'",
            case.name
        );
    }
}

#[test]
fn test_oversized_i18n_block_dropped() {
    let mut doc = json!({
        "metadata": {
            "name": "acme.tools",
            I18N_KEY: { "fr": { "description": "z".repeat(10_000) } }
        }
    });
    trim_document(&mut doc, &TrimPolicy::default());
    assert!(doc["metadata"].get(I18N_KEY).is_none());
    assert_eq!(doc["metadata"]["name"], "acme.tools");
}

#[test]
fn test_small_i18n_block_trimmed_and_long_locales_dropped() {
    let mut doc = json!({
        "metadata": {
            I18N_KEY: {
                "fr": { "title": "t".repeat(80) },
                "l".repeat(60): { "title": "never shown" }
            }
        }
    });
    trim_document(&mut doc, &TrimPolicy::default());
    let i18n = doc["metadata"][I18N_KEY].as_object().expect("i18n kept");
    assert_eq!(i18n.len(), 1, "overlong locale key dropped");
    assert_eq!(i18n["fr"]["title"].as_str().map(|t| t.chars().count()), Some(64));
}

#[test]
fn test_custom_policy_applies() {
    let policy = TrimPolicy {
        description: 10,
        ..TrimPolicy::default()
    };
    let mut doc = json!({ "metadata": { "description": "a fairly long description" } });
    trim_document(&mut doc, &policy);
    assert_eq!(doc["metadata"]["description"], "a fairly l");
}
