//! # Diff Codec
//!
//! Structural patches between two JSON documents, in the JSON Patch vocabulary
//! (`add`, `remove`, `replace`, `test`) with RFC 6901 pointer paths.
//!
//! Every `remove` and `replace` produced by [`diff`] is preceded by a `test`
//! asserting the pre-image value. That pre-image is what makes a patch
//! invertible: [`inverse`] reads it back to rebuild the original document.
//!
//! ```rust
//! use docshift::diff::{apply, diff, inverse};
//! use serde_json::json;
//!
//! let before = json!({"v": 1, "tags": ["a"]});
//! let after = json!({"v": 10, "tags": ["a", "b"]});
//!
//! let patch = diff(&before, &after);
//! assert_eq!(apply(&patch, &before).unwrap(), after);
//! assert_eq!(apply(&inverse(&patch).unwrap(), &after).unwrap(), before);
//! ```

pub mod pointer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single JSON Patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Test { path: String, value: Value },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Test { path, .. } => path,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Replace { .. } => "replace",
            Self::Test { .. } => "test",
        }
    }
}

/// An ordered list of operations, applied front to back.
pub type Patch = Vec<PatchOperation>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("Invalid JSON pointer: {0}")]
    InvalidPointer(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Array index out of bounds at {path}")]
    IndexOutOfBounds { path: String },

    #[error("Test failed at {path}: expected {expected}")]
    TestFailed { path: String, expected: Value },

    #[error("Operation `{op}` at {path} cannot be inverted without a preceding test")]
    Irreversible { op: &'static str, path: String },
}

/// Compute the patch turning `before` into `after`.
///
/// Identical documents produce an empty patch.
pub fn diff(before: &Value, after: &Value) -> Patch {
    let mut ops = Vec::new();
    diff_values("", before, after, &mut ops);
    ops
}

fn diff_values(path: &str, before: &Value, after: &Value, ops: &mut Patch) {
    if before == after {
        return;
    }

    match (before, after) {
        (Value::Object(a), Value::Object(b)) => diff_objects(path, a, b, ops),
        (Value::Array(a), Value::Array(b)) => diff_arrays(path, a, b, ops),
        _ => {
            ops.push(PatchOperation::Test {
                path: path.to_string(),
                value: before.clone(),
            });
            ops.push(PatchOperation::Replace {
                path: path.to_string(),
                value: after.clone(),
            });
        }
    }
}

fn diff_objects(path: &str, before: &Map<String, Value>, after: &Map<String, Value>, ops: &mut Patch) {
    for (key, old) in before {
        let child = pointer::join(path, key);
        match after.get(key) {
            Some(new) => diff_values(&child, old, new, ops),
            None => {
                ops.push(PatchOperation::Test {
                    path: child.clone(),
                    value: old.clone(),
                });
                ops.push(PatchOperation::Remove { path: child });
            }
        }
    }

    for (key, new) in after {
        if !before.contains_key(key) {
            ops.push(PatchOperation::Add {
                path: pointer::join(path, key),
                value: new.clone(),
            });
        }
    }
}

/// Arrays are compared after trimming their common prefix and suffix; the
/// differing middle is diffed position by position, then grown with `add`s or
/// shrunk with `remove`s from the highest index down.
fn diff_arrays(path: &str, before: &[Value], after: &[Value], ops: &mut Patch) {
    let prefix = before
        .iter()
        .zip(after.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = before.len().min(after.len()) - prefix;
    let suffix = before
        .iter()
        .rev()
        .zip(after.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let old_middle = &before[prefix..before.len() - suffix];
    let new_middle = &after[prefix..after.len() - suffix];
    let common = old_middle.len().min(new_middle.len());

    for offset in 0..common {
        let child = pointer::join(path, &(prefix + offset).to_string());
        diff_values(&child, &old_middle[offset], &new_middle[offset], ops);
    }

    if new_middle.len() > common {
        for (offset, value) in new_middle.iter().enumerate().skip(common) {
            ops.push(PatchOperation::Add {
                path: pointer::join(path, &(prefix + offset).to_string()),
                value: value.clone(),
            });
        }
    } else {
        for offset in (common..old_middle.len()).rev() {
            let child = pointer::join(path, &(prefix + offset).to_string());
            ops.push(PatchOperation::Test {
                path: child.clone(),
                value: old_middle[offset].clone(),
            });
            ops.push(PatchOperation::Remove { path: child });
        }
    }
}

/// Apply a patch to a copy of `document`.
///
/// The input is never modified; a failing operation aborts the whole patch.
pub fn apply(patch: &[PatchOperation], document: &Value) -> Result<Value, PatchError> {
    let mut target = document.clone();
    for operation in patch {
        apply_operation(&mut target, operation)?;
    }
    Ok(target)
}

fn apply_operation(target: &mut Value, operation: &PatchOperation) -> Result<(), PatchError> {
    match operation {
        PatchOperation::Add { path, value } => add(target, path, value.clone()),
        PatchOperation::Remove { path } => remove(target, path).map(|_| ()),
        PatchOperation::Replace { path, value } => {
            let slot = target
                .pointer_mut(path)
                .ok_or_else(|| PatchError::PathNotFound(path.clone()))?;
            *slot = value.clone();
            Ok(())
        }
        PatchOperation::Test { path, value } => {
            let current = target
                .pointer(path)
                .ok_or_else(|| PatchError::PathNotFound(path.clone()))?;
            if current == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed {
                    path: path.clone(),
                    expected: value.clone(),
                })
            }
        }
    }
}

fn add(target: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    if path.is_empty() {
        *target = value;
        return Ok(());
    }

    let (parent_path, token) = pointer::split_last(path)?;
    let parent = target
        .pointer_mut(parent_path)
        .ok_or_else(|| PatchError::PathNotFound(parent_path.to_string()))?;

    match parent {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index = pointer::parse_index(&token, path)?;
            if index > items.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                });
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

fn remove(target: &mut Value, path: &str) -> Result<Value, PatchError> {
    let (parent_path, token) = pointer::split_last(path)?;
    let parent = target
        .pointer_mut(parent_path)
        .ok_or_else(|| PatchError::PathNotFound(parent_path.to_string()))?;

    match parent {
        Value::Object(map) => map
            .remove(&token)
            .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
        Value::Array(items) => {
            let index = pointer::parse_index(&token, path)?;
            if index >= items.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                });
            }
            Ok(items.remove(index))
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

/// Invert a patch so that applying it to the patched document restores the
/// original.
///
/// Requires every `remove`/`replace` to be immediately preceded by a `test`
/// on the same path, which is what [`diff`] emits.
pub fn inverse(patch: &[PatchOperation]) -> Result<Patch, PatchError> {
    let mut inverted = Vec::with_capacity(patch.len() + patch.len() / 2);
    let mut cursor = patch.len();

    while cursor > 0 {
        cursor -= 1;
        match &patch[cursor] {
            PatchOperation::Add { path, value } => {
                if path.ends_with("/-") {
                    return Err(PatchError::Irreversible {
                        op: "add",
                        path: path.clone(),
                    });
                }
                inverted.push(PatchOperation::Test {
                    path: path.clone(),
                    value: value.clone(),
                });
                inverted.push(PatchOperation::Remove { path: path.clone() });
            }
            PatchOperation::Remove { path } => {
                let prior = preceding_test(patch, cursor, path, "remove")?;
                inverted.push(PatchOperation::Add {
                    path: path.clone(),
                    value: prior,
                });
                cursor -= 1;
            }
            PatchOperation::Replace { path, value } => {
                let prior = preceding_test(patch, cursor, path, "replace")?;
                inverted.push(PatchOperation::Test {
                    path: path.clone(),
                    value: value.clone(),
                });
                inverted.push(PatchOperation::Replace {
                    path: path.clone(),
                    value: prior,
                });
                cursor -= 1;
            }
            PatchOperation::Test { path, value } => {
                inverted.push(PatchOperation::Test {
                    path: path.clone(),
                    value: value.clone(),
                });
            }
        }
    }

    Ok(inverted)
}

fn preceding_test(
    patch: &[PatchOperation],
    index: usize,
    path: &str,
    op: &'static str,
) -> Result<Value, PatchError> {
    match index.checked_sub(1).map(|i| &patch[i]) {
        Some(PatchOperation::Test { path: test_path, value }) if test_path == path => {
            Ok(value.clone())
        }
        _ => Err(PatchError::Irreversible {
            op,
            path: path.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_pair() -> (Value, Value) {
        let before = json!({
            "a": [22],
            "lot": {"a": 33, "b": 32},
            "c": null,
            "d": 32,
            "f": [{"g": {"a": [1, 2, 3, 4]}}]
        });
        let after = json!({
            "a": true,
            "lot": {"b": 33, "a": 32},
            "c": null,
            "f": [{"g": {"b": {"a": {"c": [1, 2, 3, 4]}}}}]
        });
        (before, after)
    }

    #[test]
    fn test_identical_documents_produce_empty_patch() {
        assert!(diff(&json!({}), &json!({})).is_empty());

        let doc = json!({
            "a": {},
            "b": [{"c": null}, "wow"],
            "c": 33,
            "d": {"e": {"f": {"g": [null, null, null]}}}
        });
        assert!(diff(&doc, &doc.clone()).is_empty());
    }

    #[test]
    fn test_patch_updates_document() {
        let (before, after) = sample_pair();
        let patch = diff(&before, &after);
        assert_eq!(apply(&patch, &before).unwrap(), after);
    }

    #[test]
    fn test_inverse_reverts_document() {
        let (before, after) = sample_pair();
        let patch = diff(&before, &after);
        let reverted = apply(&inverse(&patch).unwrap(), &after).unwrap();
        assert_eq!(reverted, before);
    }

    #[test]
    fn test_replace_and_remove_are_guarded_by_test() {
        let (before, after) = sample_pair();
        let patch = diff(&before, &after);

        for (index, op) in patch.iter().enumerate() {
            if matches!(op, PatchOperation::Remove { .. } | PatchOperation::Replace { .. }) {
                let guard = &patch[index - 1];
                assert_eq!(guard.op_name(), "test");
                assert_eq!(guard.path(), op.path());
            }
        }
    }

    #[test]
    fn test_scalar_change_shape() {
        let patch = diff(&json!({"v": 1}), &json!({"v": 10}));
        assert_eq!(
            patch,
            vec![
                PatchOperation::Test {
                    path: "/v".into(),
                    value: json!(1)
                },
                PatchOperation::Replace {
                    path: "/v".into(),
                    value: json!(10)
                },
            ]
        );
    }

    #[test]
    fn test_array_insert_at_front_keeps_suffix() {
        let before = json!({"xs": [1, 2, 3]});
        let after = json!({"xs": [0, 1, 2, 3]});
        let patch = diff(&before, &after);
        assert_eq!(apply(&patch, &before).unwrap(), after);
        assert_eq!(apply(&inverse(&patch).unwrap(), &after).unwrap(), before);
    }

    #[test]
    fn test_array_shrink_round_trip() {
        let before = json!([1, 2, 3, 4, 5]);
        let after = json!([1, 5]);
        let patch = diff(&before, &after);
        assert_eq!(apply(&patch, &before).unwrap(), after);
        assert_eq!(apply(&inverse(&patch).unwrap(), &after).unwrap(), before);
    }

    #[test]
    fn test_root_type_change() {
        let before = json!({"a": 1});
        let after = json!([1, 2]);
        let patch = diff(&before, &after);
        assert_eq!(patch[0].path(), "");
        assert_eq!(apply(&patch, &before).unwrap(), after);
        assert_eq!(apply(&inverse(&patch).unwrap(), &after).unwrap(), before);
    }

    #[test]
    fn test_keys_needing_escape() {
        let before = json!({"a/b": 1, "m~n": {"x": 1}});
        let after = json!({"a/b": 2, "m~n": {}});
        let patch = diff(&before, &after);
        assert!(patch.iter().any(|op| op.path() == "/a~1b"));
        assert!(patch.iter().any(|op| op.path() == "/m~0n/x"));
        assert_eq!(apply(&patch, &before).unwrap(), after);
    }

    #[test]
    fn test_failed_test_operation_aborts() {
        let patch = diff(&json!({"v": 1}), &json!({"v": 2}));
        let err = apply(&patch, &json!({"v": 5})).unwrap_err();
        assert!(matches!(err, PatchError::TestFailed { .. }));
    }

    #[test]
    fn test_unguarded_replace_is_irreversible() {
        let patch = vec![PatchOperation::Replace {
            path: "/v".into(),
            value: json!(2),
        }];
        let err = inverse(&patch).unwrap_err();
        assert_eq!(
            err,
            PatchError::Irreversible {
                op: "replace",
                path: "/v".into()
            }
        );
    }

    #[test]
    fn test_serialized_shape() {
        let op = PatchOperation::Test {
            path: "/v".into(),
            value: json!(1),
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "test", "path": "/v", "value": 1})
        );
        let parsed: PatchOperation =
            serde_json::from_value(json!({"op": "remove", "path": "/d"})).unwrap();
        assert_eq!(parsed, PatchOperation::Remove { path: "/d".into() });
    }

    #[test]
    fn test_add_out_of_bounds() {
        let patch = vec![PatchOperation::Add {
            path: "/xs/5".into(),
            value: json!(1),
        }];
        assert!(matches!(
            apply(&patch, &json!({"xs": []})),
            Err(PatchError::IndexOutOfBounds { .. })
        ));
    }
}
