//! JSON deltas between IR versions
//!
//! Operations are addressed by JSON pointer (RFC 6901). Objects are diffed
//! key by key; arrays and scalars that differ are replaced whole.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Kind of a delta operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Add,
    Replace,
    Remove,
}

/// One change addressed by JSON pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaOp {
    pub op: DeltaKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl DeltaOp {
    pub fn add(path: String, value: Value) -> Self {
        Self {
            op: DeltaKind::Add,
            path,
            value: Some(value),
        }
    }

    pub fn replace(path: String, value: Value) -> Self {
        Self {
            op: DeltaKind::Replace,
            path,
            value: Some(value),
        }
    }

    pub fn remove(path: String) -> Self {
        Self {
            op: DeltaKind::Remove,
            path,
            value: None,
        }
    }
}

/// Operations turning `old` into `new`
pub fn diff(old: &Value, new: &Value) -> Vec<DeltaOp> {
    let mut ops = Vec::new();
    diff_at(String::new(), old, new, &mut ops);
    ops
}

fn diff_at(path: String, old: &Value, new: &Value, ops: &mut Vec<DeltaOp>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for (key, value) in before {
                let child = format!("{path}/{}", escape(key));
                match after.get(key) {
                    Some(next) => diff_at(child, value, next, ops),
                    None => ops.push(DeltaOp::remove(child)),
                }
            }
            for (key, value) in after {
                if !before.contains_key(key) {
                    ops.push(DeltaOp::add(format!("{path}/{}", escape(key)), value.clone()));
                }
            }
        }
        _ => ops.push(DeltaOp::replace(path, new.clone())),
    }
}

/// Applies `ops` to a copy of `document`
///
/// # Errors
/// Returns [`ProtocolError::Malformed`] if a path does not resolve or an
/// operation lacks its value.
pub fn apply(document: &Value, ops: &[DeltaOp]) -> Result<Value, ProtocolError> {
    let mut doc = document.clone();
    for op in ops {
        apply_one(&mut doc, op)?;
    }
    Ok(doc)
}

fn apply_one(doc: &mut Value, op: &DeltaOp) -> Result<(), ProtocolError> {
    let value = || {
        op.value
            .clone()
            .ok_or_else(|| malformed(format!("{:?} at '{}' has no value", op.op, op.path)))
    };

    if op.path.is_empty() {
        return match op.op {
            DeltaKind::Remove => Err(malformed("cannot remove the document root")),
            _ => {
                *doc = value()?;
                Ok(())
            }
        };
    }

    let (parent_path, last) = op
        .path
        .rsplit_once('/')
        .ok_or_else(|| malformed(format!("invalid pointer '{}'", op.path)))?;
    let key = unescape(last);
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| malformed(format!("no parent at '{parent_path}'")))?;

    match parent {
        Value::Object(map) => apply_to_object(map, &key, op, value),
        Value::Array(items) => apply_to_array(items, &key, op, value),
        _ => Err(malformed(format!("'{parent_path}' is not a container"))),
    }
}

fn apply_to_object(
    map: &mut Map<String, Value>,
    key: &str,
    op: &DeltaOp,
    value: impl Fn() -> Result<Value, ProtocolError>,
) -> Result<(), ProtocolError> {
    match op.op {
        DeltaKind::Add => {
            map.insert(key.to_string(), value()?);
        }
        DeltaKind::Replace => {
            let slot = map
                .get_mut(key)
                .ok_or_else(|| malformed(format!("nothing to replace at '{}'", op.path)))?;
            *slot = value()?;
        }
        DeltaKind::Remove => {
            map.remove(key)
                .ok_or_else(|| malformed(format!("nothing to remove at '{}'", op.path)))?;
        }
    }
    Ok(())
}

fn apply_to_array(
    items: &mut Vec<Value>,
    key: &str,
    op: &DeltaOp,
    value: impl Fn() -> Result<Value, ProtocolError>,
) -> Result<(), ProtocolError> {
    if key == "-" && op.op == DeltaKind::Add {
        items.push(value()?);
        return Ok(());
    }
    let index: usize = key
        .parse()
        .map_err(|_| malformed(format!("invalid array index '{key}'")))?;
    match op.op {
        DeltaKind::Add if index <= items.len() => items.insert(index, value()?),
        DeltaKind::Replace if index < items.len() => items[index] = value()?,
        DeltaKind::Remove if index < items.len() => {
            items.remove(index);
        }
        _ => return Err(malformed(format!("index {index} out of bounds at '{}'", op.path))),
    }
    Ok(())
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn malformed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::Malformed(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_then_apply_reaches_target() {
        let old = json!({
            "type": "Button",
            "props": {"label": "Go", "size": "m", "a/b": 1},
            "children": [1, 2]
        });
        let new = json!({
            "type": "Button",
            "props": {"label": "Stop", "color": "red", "a/b": 2},
            "children": [1, 2, 3]
        });

        let ops = diff(&old, &new);
        assert!(ops.iter().any(|o| o.op == DeltaKind::Remove && o.path == "/props/size"));
        assert!(ops.iter().any(|o| o.op == DeltaKind::Add && o.path == "/props/color"));
        assert!(ops.iter().any(|o| o.path == "/props/a~1b"));
        assert_eq!(apply(&old, &ops).unwrap(), new);
    }

    #[test]
    fn test_identical_documents_have_no_ops() {
        let doc = json!({"a": [1, {"b": null}]});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn test_root_replacement() {
        let ops = diff(&json!(1), &json!({"x": 1}));
        assert_eq!(ops, vec![DeltaOp::replace(String::new(), json!({"x": 1}))]);
        assert_eq!(apply(&json!(1), &ops).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn test_array_operations() {
        let doc = json!({"items": ["a", "c"]});
        let ops = vec![
            DeltaOp::add("/items/1".into(), json!("b")),
            DeltaOp::add("/items/-".into(), json!("d")),
            DeltaOp::remove("/items/0".into()),
        ];
        assert_eq!(apply(&doc, &ops).unwrap(), json!({"items": ["b", "c", "d"]}));
    }

    #[test]
    fn test_bad_paths_are_malformed() {
        let doc = json!({"a": 1});
        let missing = apply(&doc, &[DeltaOp::replace("/b".into(), json!(2))]);
        assert!(matches!(missing, Err(ProtocolError::Malformed(_))));

        let no_parent = apply(&doc, &[DeltaOp::add("/x/y".into(), json!(2))]);
        assert!(matches!(no_parent, Err(ProtocolError::Malformed(_))));

        let no_value = apply(
            &doc,
            &[DeltaOp {
                op: DeltaKind::Add,
                path: "/c".into(),
                value: None,
            }],
        );
        assert!(matches!(no_value, Err(ProtocolError::Malformed(_))));
    }
}
