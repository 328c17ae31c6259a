//! JSON-Patch envelope types and RFC 6901 path utilities.
//!
//! The wire format is the RFC 6902 subset {add, replace, remove}; paths
//! are RFC 6901 JSON Pointers with `/-` meaning list-append and the
//! standard `~0`/`~1` escapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_schema::TypedValue;

use crate::error::{Result, StateError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// A wire patch: the value has already been shrunk to JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

/// An in-process patch as emitted by a state document: the value is
/// still rich and gets shrunk by the worker at publish time.
#[derive(Clone, Debug)]
pub struct DocumentPatch {
    pub op: PatchOp,
    pub path: String,
    pub value: Option<TypedValue>,
}

/// A revisioned batch of patches for one state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub state_name: String,
    pub rev: u64,
    pub base_rev: u64,
    pub ts: DateTime<Utc>,
    pub patches: Vec<Patch>,
}

/// Escape one reference token per RFC 6901: `~` → `~0`, `/` → `~1`.
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Reverse of [`escape_token`].
pub fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Append a token to a pointer path.
pub fn join_path(base: &str, token: &str) -> String {
    format!("{}/{}", base, escape_token(token))
}

/// Split a pointer into unescaped tokens. The root pointer yields none.
pub fn split_path(path: &str) -> Vec<String> {
    if path.is_empty() || path == "/" {
        return Vec::new();
    }
    path.trim_start_matches('/')
        .split('/')
        .map(unescape_token)
        .collect()
}

/// Apply wire patches to a JSON snapshot, in order. `old_value` is
/// stripped before application; it is advisory metadata only.
pub fn apply_patches(snapshot: &mut Value, patches: &[Patch]) -> Result<()> {
    let sanitized: Vec<Value> = patches
        .iter()
        .map(|patch| {
            let mut op = serde_json::json!({
                "op": patch.op,
                "path": patch.path,
            });
            if let Some(value) = &patch.value {
                op["value"] = value.clone();
            }
            op
        })
        .collect();

    let parsed: json_patch::Patch = serde_json::from_value(Value::Array(sanitized))
        .map_err(|e| StateError::PatchApply(e.to_string()))?;
    json_patch::patch(snapshot, &parsed).map_err(|e| StateError::PatchApply(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tokens_escape_per_rfc_6901() {
        assert_eq!(escape_token("a/b~c"), "a~1b~0c");
        assert_eq!(unescape_token("a~1b~0c"), "a/b~c");
        assert_eq!(join_path("/entries", "x/y"), "/entries/x~1y");
    }

    #[test]
    fn split_handles_root_and_escapes() {
        assert!(split_path("/").is_empty());
        assert_eq!(split_path("/a/0/-"), vec!["a", "0", "-"]);
        assert_eq!(split_path("/a~1b"), vec!["a/b"]);
    }

    #[test]
    fn apply_supports_the_op_subset_and_append() {
        let mut doc = json!({"counter": 1, "items": ["a"]});
        let patches = vec![
            Patch {
                op: PatchOp::Replace,
                path: "/counter".to_string(),
                value: Some(json!(3)),
                old_value: Some(json!(1)),
            },
            Patch {
                op: PatchOp::Add,
                path: "/items/-".to_string(),
                value: Some(json!("b")),
                old_value: None,
            },
            Patch {
                op: PatchOp::Remove,
                path: "/items/0".to_string(),
                value: None,
                old_value: None,
            },
        ];
        apply_patches(&mut doc, &patches).unwrap();
        assert_eq!(doc, json!({"counter": 3, "items": ["b"]}));
    }

    #[test]
    fn wire_patch_omits_empty_fields() {
        let patch = Patch {
            op: PatchOp::Remove,
            path: "/x".to_string(),
            value: None,
            old_value: None,
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, json!({"op": "remove", "path": "/x"}));
    }
}
