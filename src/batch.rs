use crate::document::{Document, extract_key};
use crate::error::Error;
use crate::storage::DocumentRepository;
use serde::Serialize;
use serde_json::{Map, Value};

/// Reserved field carrying the per-item action.
pub const ACTION_FIELD: &str = "@search.action";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchAction {
    Upload,
    Merge,
    MergeOrUpload,
    Delete,
}

impl BatchAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(BatchAction::Upload),
            "merge" => Some(BatchAction::Merge),
            "mergeOrUpload" => Some(BatchAction::MergeOrUpload),
            "delete" => Some(BatchAction::Delete),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchItemResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    fn succeeded(key: &str) -> Self {
        BatchItemResult {
            key: Some(key.to_string()),
            status: true,
            error: None,
        }
    }

    fn failed(key: Option<&str>, error: impl Into<String>) -> Self {
        BatchItemResult {
            key: key.map(str::to_string),
            status: false,
            error: Some(error.into()),
        }
    }

    fn from_write(key: &str, outcome: Result<(), Error>) -> Self {
        match outcome {
            Ok(()) => Self::succeeded(key),
            Err(e) => Self::failed(Some(key), e.to_string()),
        }
    }
}

/// Applies each item in order. Item failures are recorded in the returned
/// results and never stop the remaining items.
pub async fn execute_batch(
    docs: &dyn DocumentRepository,
    index_name: &str,
    key_field: &str,
    items: &[Map<String, Value>],
) -> Vec<BatchItemResult> {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(execute_item(docs, index_name, key_field, item).await);
    }
    results
}

async fn execute_item(
    docs: &dyn DocumentRepository,
    index_name: &str,
    key_field: &str,
    item: &Map<String, Value>,
) -> BatchItemResult {
    let Some(marker) = item.get(ACTION_FIELD).and_then(Value::as_str) else {
        return BatchItemResult::failed(None, "Missing @search.action");
    };
    let Some(action) = BatchAction::parse(marker) else {
        let key = extract_key(item, key_field).ok();
        return BatchItemResult::failed(key, "Unknown action");
    };
    let key = match extract_key(item, key_field) {
        Ok(key) => key,
        Err(e) => return BatchItemResult::failed(None, item_message(&e)),
    };

    match action {
        BatchAction::Upload | BatchAction::MergeOrUpload => {
            let outcome = match Document::from_fields(index_name, key, item) {
                Ok(doc) => docs.upsert(doc).await,
                Err(e) => Err(e),
            };
            BatchItemResult::from_write(key, outcome)
        }
        BatchAction::Merge => {
            let existing = match docs.find(index_name, key).await {
                Ok(existing) => existing,
                Err(Error::DocumentNotFound) => {
                    return BatchItemResult::failed(Some(key), "Not found for merge");
                }
                Err(e) => return BatchItemResult::failed(Some(key), e.to_string()),
            };
            let mut merged = existing.fields().unwrap_or_default();
            merge_fields(&mut merged, item, key_field);
            let outcome = match Document::from_fields(index_name, key, &merged) {
                Ok(doc) => docs.upsert(doc).await,
                Err(e) => Err(e),
            };
            BatchItemResult::from_write(key, outcome)
        }
        BatchAction::Delete => {
            let outcome = docs.delete(index_name, key).await.map(|_| ());
            BatchItemResult::from_write(key, outcome)
        }
    }
}

/// Shallow overlay of `incoming` onto `target`, leaving the action marker and
/// key field untouched.
pub fn merge_fields(target: &mut Map<String, Value>, incoming: &Map<String, Value>, key_field: &str) {
    for (name, value) in incoming {
        if name != ACTION_FIELD && name != key_field {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn item_message(e: &Error) -> String {
    match e {
        Error::MissingKeyField => "Missing key field".to_string(),
        Error::KeyTypeError => "Key field must be string".to_string(),
        other => other.to_string(),
    }
}
