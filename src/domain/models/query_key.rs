//! Cache keys derived from an endpoint name and its arguments.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Identity of one cached query: endpoint name plus normalized arguments.
///
/// Arguments are normalized before they are rendered, so logically equal
/// argument sets (different member order, omitted vs. `null` members) map to
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    endpoint: Arc<str>,
    args: Arc<str>,
}

impl QueryKey {
    /// Build a key from any serializable argument value.
    pub fn new<A: Serialize + ?Sized>(endpoint: &str, args: &A) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(args)?;
        Ok(Self::from_value(endpoint, &value))
    }

    /// Build a key from already-serialized arguments.
    pub fn from_value(endpoint: &str, args: &Value) -> Self {
        let canonical = canonical_json(&normalize(args));
        Self {
            endpoint: Arc::from(endpoint),
            args: Arc::from(canonical.as_str()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Canonical JSON rendering of the normalized arguments.
    pub fn args(&self) -> &str {
        &self.args
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.args)
    }
}

/// Recursively drop `null` object members. Arrays keep their nulls since
/// position is meaningful there.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Render JSON with object members sorted by name, independent of how the
/// `serde_json` map type orders them.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            let body = members
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical_json(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_member_order_does_not_change_key() {
        let a = QueryKey::from_value("getUsers", &json!({"page": 1, "limit": 10}));
        let b = QueryKey::from_value("getUsers", &json!({"limit": 10, "page": 1}));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"getUsers({"limit":10,"page":1})"#);
    }

    #[test]
    fn test_null_members_are_dropped() {
        let a = QueryKey::from_value("getUsers", &json!({"page": 1, "role": null}));
        let b = QueryKey::from_value("getUsers", &json!({"page": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_objects_are_normalized() {
        let a = QueryKey::from_value("search", &json!({"filter": {"b": 2, "a": [1, {"y": 1, "x": null}]}}));
        let b = QueryKey::from_value("search", &json!({"filter": {"a": [1, {"y": 1}], "b": 2}}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_endpoint_is_part_of_identity() {
        let a = QueryKey::from_value("getUsers", &json!("1"));
        let b = QueryKey::from_value("getUser", &json!("1"));
        assert_ne!(a, b);
        assert_eq!(b.endpoint(), "getUser");
        assert_eq!(b.args(), r#""1""#);
    }

    #[test]
    fn test_key_from_serializable_struct() {
        #[derive(Serialize)]
        struct Args {
            page: u32,
            search: Option<String>,
        }

        let key = QueryKey::new("getUsers", &Args { page: 2, search: None }).unwrap();
        assert_eq!(key.args(), r#"{"page":2}"#);
    }

    proptest! {
        #[test]
        fn prop_key_ignores_member_order(entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)) {
            let forward: Map<String, Value> = entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let mut reversed = Map::new();
            for (k, v) in entries.iter().rev() {
                reversed.insert(k.clone(), json!(v));
            }

            let a = QueryKey::from_value("endpoint", &Value::Object(forward));
            let b = QueryKey::from_value("endpoint", &Value::Object(reversed));
            prop_assert_eq!(a, b);
        }
    }
}
