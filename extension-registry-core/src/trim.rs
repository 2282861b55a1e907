//! Size trimming applied to every document copy before it enters the public snapshot.
//!
//! Limits are chosen by the key a string lives under and are inherited into nested values:
//! `title`, `description`, `author`/`contributors` and `keywords`/`categories` have their own
//! limits, every other string gets the general limit. The `package-i18n` block is dropped when
//! its serialized form is too large, and locale keys longer than the tag limit are dropped.

use serde_json::Value;

use crate::config::TrimPolicy;

pub const I18N_KEY: &str = "package-i18n";

/// Trims a document copy in place.
pub fn trim_document(value: &mut Value, policy: &TrimPolicy) {
    trim_value(value, None, policy);
}

fn limit_for(key: &str, policy: &TrimPolicy) -> Option<usize> {
    match key {
        "title" => Some(policy.title),
        "description" => Some(policy.description),
        "author" | "contributors" => Some(policy.person),
        "keywords" | "categories" => Some(policy.tag),
        _ => None,
    }
}

/// `inherited` is the limit imposed by an enclosing key; `None` means the general limit.
fn trim_value(value: &mut Value, inherited: Option<usize>, policy: &TrimPolicy) {
    match value {
        Value::String(s) => truncate_chars(s, inherited.unwrap_or(policy.other)),
        Value::Array(items) => {
            for item in items.iter_mut() {
                trim_value(item, inherited, policy);
            }
        }
        Value::Object(map) => {
            let i18n_size = map
                .get(I18N_KEY)
                .map(|i18n| serde_json::to_vec(i18n).map(|b| b.len()).unwrap_or(usize::MAX));
            if let Some(size) = i18n_size.filter(|size| *size > policy.i18n_bytes) {
                tracing::debug!(size, "Dropping oversized i18n block from snapshot copy");
                map.remove(I18N_KEY);
            }
            for (key, child) in map.iter_mut() {
                if key == I18N_KEY {
                    trim_locales(child, policy);
                    continue;
                }
                // A limit set by an enclosing key wins over key names further down.
                let child_limit = inherited.or_else(|| limit_for(key, policy));
                trim_value(child, child_limit, policy);
            }
        }
        _ => {}
    }
}

fn trim_locales(i18n: &mut Value, policy: &TrimPolicy) {
    if let Value::Object(locales) = i18n {
        locales.retain(|locale, _| locale.chars().count() <= policy.tag);
        for entry in locales.values_mut() {
            trim_value(entry, None, policy);
        }
    } else {
        trim_value(i18n, None, policy);
    }
}

fn truncate_chars(s: &mut String, limit: usize) {
    if let Some((cut, _)) = s.char_indices().nth(limit) {
        s.truncate(cut);
    }
}
