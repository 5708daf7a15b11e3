//! Translation of HTTP commands into backend message bodies.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Output elements requested for REST searches.
pub const SEARCH_ELEMENTS: [&str; 5] = ["startTime", "elapsedTime", "count", "attributes", "records"];

/// Message type used by REST table searches.
pub const SEARCH_TYPE: &str = "search";

/// Body for a Droonga passthrough command.
///
/// Object bodies gain `timeout` and `type: "droonga-<type>"`; any other JSON
/// value is forwarded untouched.
pub fn droonga_body(message_type: &str, body: Value, timeout_ms: i64) -> Value {
    match body {
        Value::Object(mut object) => {
            object.insert("timeout".to_string(), Value::from(timeout_ms));
            object.insert("type".to_string(), Value::from(format!("droonga-{message_type}")));
            Value::Object(object)
        }
        other => other,
    }
}

/// Query parameters of a GET passthrough as a JSON object.
pub fn query_object(params: HashMap<String, String>) -> Value {
    let object: Map<String, Value> = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    Value::Object(object)
}

/// Name of the query result for `table` (`Store` → `stores`).
pub fn result_name(table: &str) -> String {
    let lower = table.to_lowercase();
    if lower.ends_with('s') {
        lower
    } else {
        format!("{lower}s")
    }
}

/// Body of a REST search over `table`.
pub fn search_body(table: &str, query: Option<&str>) -> Value {
    let mut search = Map::new();
    search.insert("source".to_string(), Value::from(table));
    if let Some(query) = query {
        search.insert("condition".to_string(), json!({ "query": query }));
    }
    search.insert(
        "output".to_string(),
        json!({ "elements": SEARCH_ELEMENTS, "attributes": [] }),
    );

    let mut queries = Map::new();
    queries.insert(result_name(table), Value::Object(search));
    json!({ "queries": queries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn droonga_body_is_annotated() {
        let body = droonga_body(
            "search",
            json!({ "queries": { "source": "table" } }),
            1000,
        );
        assert_eq!(
            body,
            json!({
                "queries": { "source": "table" },
                "timeout": 1000,
                "type": "droonga-search"
            })
        );
    }

    #[test]
    fn non_object_body_is_untouched() {
        assert_eq!(droonga_body("search", json!([1, 2]), 1000), json!([1, 2]));
    }

    #[test]
    fn search_body_for_table() {
        assert_eq!(
            search_body("Store", Some("NY")),
            json!({
                "queries": {
                    "stores": {
                        "source": "Store",
                        "condition": { "query": "NY" },
                        "output": {
                            "elements": ["startTime", "elapsedTime", "count", "attributes", "records"],
                            "attributes": []
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn search_without_query_has_no_condition() {
        let body = search_body("Users", None);
        assert!(body["queries"]["users"].get("condition").is_none());
        assert_eq!(body["queries"]["users"]["source"], "Users");
    }
}
