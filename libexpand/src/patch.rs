//! Two-way JSON merge patches.
//!
//! The persistent-object store offers no transactions, so the reconciler
//! never writes a whole volume record back: it computes the minimal merge
//! patch between the unmodified record and a capacity-updated clone and
//! applies only that.  Concurrent edits to unrelated volume fields survive,
//! and re-applying the same patch is a no-op, which is what makes the
//! controller's multi-step update sequence safe to retry.
//!
//! Patches follow the RFC 7386 merge-patch shape: objects are diffed
//! recursively, removed keys become `null`, and any non-object value
//! replaces the target wholesale.

use serde_json::{Map, Value};

/// Compute the merge patch that transforms `old` into `new`.
///
/// Keys equal in both records are omitted; keys present only in `old` map to
/// `null` (removal).  Applying the result to `old` with
/// [`apply_merge_patch`] yields `new`.
pub fn create_merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value) => {
                        patch.insert(key.clone(), create_merge_patch(old_value, new_value));
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// Apply a merge patch to `target`, returning the patched document.
///
/// Idempotent: applying the same patch twice yields the same document as
/// applying it once.
pub fn apply_merge_patch(target: &Value, patch: &Value) -> Value {
    match patch {
        Value::Object(entries) => {
            let mut result = match target {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for (key, patch_value) in entries {
                if patch_value.is_null() {
                    result.remove(key);
                } else {
                    let base = result.get(key).unwrap_or(&Value::Null);
                    let merged = apply_merge_patch(base, patch_value);
                    result.insert(key.clone(), merged);
                }
            }
            Value::Object(result)
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_touches_only_changed_fields() {
        let old = json!({"name": "pv-a", "capacity": 1073741824, "claim_ref": {"namespace": "default", "name": "pvc-a"}});
        let new = json!({"name": "pv-a", "capacity": 2147483648u64, "claim_ref": {"namespace": "default", "name": "pvc-a"}});
        let patch = create_merge_patch(&old, &new);
        assert_eq!(patch, json!({"capacity": 2147483648u64}));
    }

    #[test]
    fn apply_reaches_new_document() {
        let old = json!({"name": "pv-a", "capacity": 1, "labels": {"tier": "fast"}});
        let new = json!({"name": "pv-a", "capacity": 2, "labels": {"tier": "slow"}});
        let patch = create_merge_patch(&old, &new);
        assert_eq!(apply_merge_patch(&old, &patch), new);
    }

    #[test]
    fn apply_is_idempotent() {
        let old = json!({"name": "pv-a", "capacity": 1});
        let new = json!({"name": "pv-a", "capacity": 2});
        let patch = create_merge_patch(&old, &new);
        let once = apply_merge_patch(&old, &patch);
        let twice = apply_merge_patch(&once, &patch);
        assert_eq!(once, twice);
        assert_eq!(once, new);
    }

    #[test]
    fn concurrent_edits_to_other_fields_survive() {
        let old = json!({"name": "pv-a", "capacity": 1, "labels": {"tier": "fast"}});
        let new = json!({"name": "pv-a", "capacity": 2, "labels": {"tier": "fast"}});
        let patch = create_merge_patch(&old, &new);

        // A concurrent writer changed labels after our snapshot was taken.
        let drifted = json!({"name": "pv-a", "capacity": 1, "labels": {"tier": "slow"}});
        let patched = apply_merge_patch(&drifted, &patch);
        assert_eq!(
            patched,
            json!({"name": "pv-a", "capacity": 2, "labels": {"tier": "slow"}})
        );
    }

    #[test]
    fn removed_keys_become_null() {
        let old = json!({"a": 1, "b": 2});
        let new = json!({"a": 1});
        let patch = create_merge_patch(&old, &new);
        assert_eq!(patch, json!({"b": null}));
        assert_eq!(apply_merge_patch(&old, &patch), new);
    }
}
