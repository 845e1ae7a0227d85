//! Sender identifiers arrive as bare strings, numbers, `{id}`, `{_id}`,
//! `{userId}` or populated user documents. Every identity comparison goes
//! through [`normalize_sender_id`] so all of them collapse to one string.

use serde_json::Value;

use crate::domain::UserId;

const ID_FIELDS: [&str; 5] = ["_id", "id", "userId", "user_id", "$oid"];
const MAX_DEPTH: usize = 4;

pub fn normalize_sender_id(raw: &Value) -> Option<UserId> {
    normalize_at_depth(raw, 0)
}

/// Normalizes an id that is already known to be a plain string.
pub fn normalize_str(raw: &str) -> Option<UserId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(UserId(trimmed.to_string()))
    }
}

fn normalize_at_depth(raw: &Value, depth: usize) -> Option<UserId> {
    if depth > MAX_DEPTH {
        return None;
    }
    match raw {
        Value::String(s) => normalize_str(s),
        Value::Number(n) => Some(UserId(n.to_string())),
        Value::Object(map) => {
            for field in ID_FIELDS {
                if let Some(inner) = map.get(field) {
                    if let Some(id) = normalize_at_depth(inner, depth + 1) {
                        return Some(id);
                    }
                }
            }
            if map.is_empty() {
                None
            } else {
                // serde_json maps are sorted, so this is stable for equal objects.
                serde_json::to_string(raw).ok().map(UserId)
            }
        }
        Value::Null | Value::Bool(_) | Value::Array(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn collapses_common_shapes_to_one_id() {
        let expected = Some(UserId::from("u-42"));
        assert_eq!(normalize_sender_id(&json!("u-42")), expected);
        assert_eq!(normalize_sender_id(&json!("  u-42 ")), expected);
        assert_eq!(normalize_sender_id(&json!({ "id": "u-42" })), expected);
        assert_eq!(normalize_sender_id(&json!({ "_id": "u-42" })), expected);
        assert_eq!(
            normalize_sender_id(&json!({ "_id": { "$oid": "u-42" }, "name": "Ana" })),
            expected
        );
        assert_eq!(
            normalize_sender_id(&json!({ "userId": "u-42", "avatar": null })),
            expected
        );
    }

    #[test]
    fn prefers_mongo_style_id_over_plain_id() {
        assert_eq!(
            normalize_sender_id(&json!({ "id": "b", "_id": "a" })),
            Some(UserId::from("a"))
        );
    }

    #[test]
    fn numbers_and_opaque_objects_are_stable() {
        assert_eq!(normalize_sender_id(&json!(17)), Some(UserId::from("17")));
        let first = normalize_sender_id(&json!({ "handle": "x", "guest": true }));
        let second = normalize_sender_id(&json!({ "guest": true, "handle": "x" }));
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_empty_shapes() {
        assert_eq!(normalize_sender_id(&json!(null)), None);
        assert_eq!(normalize_sender_id(&json!("   ")), None);
        assert_eq!(normalize_sender_id(&json!({})), None);
        assert_eq!(normalize_sender_id(&json!([1, 2])), None);
    }
}
