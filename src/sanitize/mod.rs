//! # Sanitizer
//!
//! Produces a deterministic byte representation of a Kubernetes object such
//! that trivial server-side mutations never alter the output. This module
//! is a pure library with no I/O and no channel dependency — it is called
//! directly by the admission receiver, the watch manager, and the branch
//! worker's render step, never instantiated as a subsystem of its own.

use serde_json::Value;
use thiserror::Error;

/// Server-populated metadata fields stripped from every object.
const REMOVED_METADATA_FIELDS: &[&str] = &[
    "managedFields",
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "selfLink",
];

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("failed to marshal sanitized object to YAML: {0}")]
    Marshal(#[from] serde_yaml::Error),
}

/// Strips server-populated metadata and (by default) `status` from `obj`,
/// returning a new value. Does not sort or serialize; see [`marshal`] for
/// the byte-level canonical form.
///
/// By default `status` is removed entirely. Kinds whose status carries
/// meaningful desired state (some CRDs) are not handled generically here —
/// an implementer-provided allow-list would live at the call site, since
/// the set of such kinds is deployment-specific.
#[must_use]
pub fn sanitize(obj: &Value) -> Value {
    let mut v = obj.clone();
    if let Some(map) = v.as_object_mut() {
        map.remove("status");
        if let Some(metadata) = map.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in REMOVED_METADATA_FIELDS {
                metadata.remove(*field);
            }
            if let Some(annotations) = metadata.get_mut("annotations").and_then(Value::as_object_mut) {
                annotations.remove(LAST_APPLIED_ANNOTATION);
                if annotations.is_empty() {
                    metadata.remove("annotations");
                }
            }
        }
    }
    v
}

/// Renders a sanitized object to its canonical byte form: map keys sorted
/// lexicographically at every level, sequence order preserved, `\n` line
/// endings, no trailing whitespace.
pub fn marshal(sanitized: &Value) -> Result<Vec<u8>, SanitizeError> {
    let ordered = sort_keys(sanitized);
    let rendered = serde_yaml::to_string(&ordered)?;
    let normalized: String = rendered
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let mut bytes = normalized.into_bytes();
    bytes.push(b'\n');
    Ok(bytes)
}

/// Convenience: `marshal(sanitize(obj))`.
pub fn canonical_bytes(obj: &Value) -> Result<Vec<u8>, SanitizeError> {
    marshal(&sanitize(obj))
}

fn sort_keys(v: &Value) -> serde_yaml::Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut ordered = serde_yaml::Mapping::new();
            for key in keys {
                ordered.insert(
                    serde_yaml::Value::String(key.clone()),
                    sort_keys(&map[key]),
                );
            }
            serde_yaml::Value::Mapping(ordered)
        }
        Value::Array(items) => serde_yaml::Value::Sequence(items.iter().map(sort_keys).collect()),
        Value::String(s) => serde_yaml::Value::String(s.clone()),
        Value::Bool(b) => serde_yaml::Value::Bool(*b),
        Value::Number(n) => {
            let number = if let Some(i) = n.as_i64() {
                serde_yaml::Number::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_yaml::Number::from(u)
            } else {
                serde_yaml::Number::from(n.as_f64().unwrap_or_default())
            };
            serde_yaml::Value::Number(number)
        }
        Value::Null => serde_yaml::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_object() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "namespace": "app-a",
                "resourceVersion": "12345",
                "uid": "abc-123",
                "generation": 3,
                "creationTimestamp": "2026-01-01T00:00:00Z",
                "managedFields": [{"manager": "kubectl"}],
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{...}",
                    "team": "payments",
                },
            },
            "data": {"b": "2", "a": "1"},
        })
    }

    #[test]
    fn sanitize_strips_server_populated_metadata() {
        let sanitized = sanitize(&sample_object());
        let metadata = sanitized.get("metadata").unwrap();
        assert!(metadata.get("resourceVersion").is_none());
        assert!(metadata.get("uid").is_none());
        assert!(metadata.get("generation").is_none());
        assert!(metadata.get("creationTimestamp").is_none());
        assert!(metadata.get("managedFields").is_none());
        let annotations = metadata.get("annotations").unwrap();
        assert!(annotations.get("kubectl.kubernetes.io/last-applied-configuration").is_none());
        assert_eq!(annotations.get("team").unwrap(), "payments");
    }

    #[test]
    fn sanitize_removes_status_by_default() {
        let mut obj = sample_object();
        obj.as_object_mut()
            .unwrap()
            .insert("status".into(), json!({"phase": "Bound"}));
        let sanitized = sanitize(&obj);
        assert!(sanitized.get("status").is_none());
    }

    #[test]
    fn marshal_sorts_map_keys_lexicographically() {
        let bytes = marshal(&sanitize(&sample_object())).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let data_pos = text.find("data:").unwrap();
        let a_pos = text[data_pos..].find("a:").unwrap();
        let b_pos = text[data_pos..].find("b:").unwrap();
        assert!(a_pos < b_pos, "expected sorted keys, got:\n{text}");
    }

    #[test]
    fn marshal_is_byte_identical_regardless_of_source_key_order() {
        let a = json!({"metadata": {"name": "x"}, "data": {"k1": "v", "k2": "w"}});
        let b = json!({"data": {"k2": "w", "k1": "v"}, "metadata": {"name": "x"}});
        assert_eq!(
            marshal(&sanitize(&a)).unwrap(),
            marshal(&sanitize(&b)).unwrap()
        );
    }

    #[test]
    fn marshal_strips_trailing_whitespace_and_uses_lf() {
        let bytes = marshal(&sanitize(&sample_object())).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains('\r'));
        assert!(text.lines().all(|l| l == l.trim_end()));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn objects_differing_only_in_removed_fields_marshal_identically() {
        let mut a = sample_object();
        let mut b = sample_object();
        a.as_object_mut()
            .unwrap()
            .get_mut("metadata")
            .unwrap()
            .as_object_mut()
            .unwrap()
            .insert("resourceVersion".into(), json!("1"));
        b.as_object_mut()
            .unwrap()
            .get_mut("metadata")
            .unwrap()
            .as_object_mut()
            .unwrap()
            .insert("resourceVersion".into(), json!("999999"));
        assert_eq!(
            marshal(&sanitize(&a)).unwrap(),
            marshal(&sanitize(&b)).unwrap()
        );
    }

    #[test]
    fn marshal_round_trip_preserves_sanitized_body() {
        let sanitized = sanitize(&sample_object());
        let bytes = marshal(&sanitized).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let parsed: Value = serde_yaml::from_str(&text).unwrap();
        let reparsed_sanitized = sanitize(&parsed);
        assert_eq!(
            marshal(&reparsed_sanitized).unwrap(),
            marshal(&sanitize(&sanitized)).unwrap()
        );
    }
}
