//! Field-level comparison of mapped payloads.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

/// A field whose remote and cached values differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMismatch {
    pub external_id: String,
    pub field: String,
    /// `null` when the remote lacks the field.
    pub remote_value: Value,
    /// `null` when the cache lacks the field.
    pub cache_value: Value,
}

/// Compare two mapped payloads key by key, in key order.
pub(super) fn compare(external_id: &str, remote: &Value, cached: &Value) -> Vec<FieldMismatch> {
    match (remote.as_object(), cached.as_object()) {
        (Some(remote), Some(cached)) => {
            let fields: BTreeSet<&String> = remote.keys().chain(cached.keys()).collect();
            fields
                .into_iter()
                .filter_map(|field| {
                    let remote_value = remote.get(field).unwrap_or(&Value::Null);
                    let cache_value = cached.get(field).unwrap_or(&Value::Null);
                    (remote_value != cache_value).then(|| FieldMismatch {
                        external_id: external_id.to_string(),
                        field: field.clone(),
                        remote_value: remote_value.clone(),
                        cache_value: cache_value.clone(),
                    })
                })
                .collect()
        }
        _ if remote == cached => Vec::new(),
        _ => vec![FieldMismatch {
            external_id: external_id.to_string(),
            field: "*".to_string(),
            remote_value: remote.clone(),
            cache_value: cached.clone(),
        }],
    }
}
