//! Merging of user supplied patches into generated objects.
//!
//! Objects are merged as JSON trees:
//!
//! * maps are merged key by key, recursively,
//! * a `null` value in the patch removes the key,
//! * lists whose items all carry a `name` (containers, volumes, env, ...)
//!   are merged item by item, matched on `name`, unmatched patch items are
//!   appended,
//! * every other list and scalar is replaced by the patch.
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize object to merge into"))]
    SerializeBase { source: serde_json::Error },

    #[snafu(display("merged object is not valid"))]
    DeserializeMerged { source: serde_json::Error },
}

/// Merges `patch` into `base`, following the rules in the module documentation.
pub fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => merge_maps(base, patch),
        (Value::Array(base), Value::Array(patch)) => {
            if is_named_list(&patch) && base.iter().all(has_name) {
                merge_named_lists(base, patch);
            } else {
                *base = patch;
            }
        }
        (base, patch) => *base = patch,
    }
}

/// Applies `patch` to a typed object.
pub fn patch_object<K>(object: &K, patch: &Value) -> Result<K, Error>
where
    K: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(object).context(SerializeBaseSnafu)?;
    merge(&mut merged, patch.clone());
    serde_json::from_value(merged).context(DeserializeMergedSnafu)
}

/// Returns `true` if every value set in `desired` is set to the same value
/// in `live`. Fields only present in `live`, such as server side defaults,
/// are ignored.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(desired), Value::Object(live)) => desired.iter().all(|(key, value)| {
            is_subset(value, live.get(key).unwrap_or(&Value::Null))
        }),
        (Value::Array(desired), Value::Array(live)) => {
            desired.len() == live.len()
                && desired
                    .iter()
                    .zip(live)
                    .all(|(desired, live)| is_subset(desired, live))
        }
        (Value::Object(desired), Value::Null) => desired.is_empty(),
        (Value::Array(desired), Value::Null) => desired.is_empty(),
        (desired, live) => desired == live,
    }
}

/// SHA-256 of the serialized `value`. Object keys are kept sorted by
/// [`Value`], so equal trees always give the same fingerprint.
pub fn fingerprint(value: &Value) -> String {
    format!("{:x}", Sha256::digest(value.to_string().as_bytes()))
}

fn merge_maps(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if value.is_null() {
            base.remove(&key);
            continue;
        }

        match base.get_mut(&key) {
            Some(existing) => merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

fn merge_named_lists(base: &mut Vec<Value>, patch: Vec<Value>) {
    for item in patch {
        let name = item.get("name").cloned();
        match base.iter().position(|existing| existing.get("name") == name.as_ref()) {
            Some(index) => {
                if let Some(existing) = base.get_mut(index) {
                    merge(existing, item);
                }
            }
            None => base.push(item),
        }
    }
}

fn has_name(item: &Value) -> bool {
    item.get("name").is_some_and(Value::is_string)
}

fn is_named_list(list: &[Value]) -> bool {
    !list.is_empty() && list.iter().all(has_name)
}
