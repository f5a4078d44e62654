//! Canonicalized, hashed configuration snapshot for audit/debug logging.
//!
//! Adapted from the layered-YAML-config hasher: instead of merging files,
//! this snapshots the already-loaded env-derived structs into one sorted
//! JSON document and hashes it, so two processes with identical effective
//! configuration produce identical `config_hash` values.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::secrets::is_secret_key;

#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub canonical_json: String,
    pub config_hash: String,
}

/// Serializes `value`, sorts object keys recursively, redacts any key that
/// looks secret-shaped, and hashes the result.
pub fn canonical_snapshot<T: Serialize>(value: &T) -> ConfigSnapshot {
    let raw = serde_json::to_value(value).expect("config snapshot must serialize");
    let redacted = redact(raw);
    let sorted = sort_keys(&redacted);
    let canonical_json = serde_json::to_string(&sorted).expect("canonical json must serialize");

    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    let config_hash = hex::encode(hasher.finalize());

    ConfigSnapshot {
        canonical_json,
        config_hash,
    }
}

fn redact(v: Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(
            map.into_iter()
            .map(|(k, v)| {
                    if is_secret_key(&k) {
                        (k, Value::String("<redacted>".to_string()))
                    } else {
                        (k, redact(v))
                    }
            })
            .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.into_iter().map(redact).collect()),
        other => other,
    }
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
