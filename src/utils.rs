use serde_json::{Map, Value};

pub const WILDCARD: &str = "*";

/// `query` must already be lowercased.
pub fn matches_query(content: &str, query: &str) -> bool {
    query.is_empty() || query == WILDCARD || content.to_lowercase().contains(query)
}

/// Keeps only the top-level members of `value` named in `names`.
pub fn select_fields(value: &Value, names: &[String]) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    let selected: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| names.iter().any(|n| n == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(selected)
}

/// Splits a `$select` parameter such as `"name, fields"`.
pub fn parse_select(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
