use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document. `content` is the JSON payload exactly as written.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub index_name: String,
    pub key: String,
    pub content: String,
}

impl Document {
    pub fn from_fields(
        index_name: impl Into<String>,
        key: impl Into<String>,
        fields: &Map<String, Value>,
    ) -> Result<Self> {
        Ok(Document {
            index_name: index_name.into(),
            key: key.into(),
            content: serde_json::to_string(fields)?,
        })
    }

    pub fn fields(&self) -> Option<Map<String, Value>> {
        serde_json::from_str(&self.content).ok()
    }
}

/// On-disk form of a document inside an index's `.bin` file.
#[derive(Serialize, Deserialize)]
pub struct PersistedDocument {
    pub key: String,
    pub data: Vec<u8>,
}

/// Returns the document's key value, which must be a string.
pub fn extract_key<'a>(document: &'a Map<String, Value>, key_field: &str) -> Result<&'a str> {
    match document.get(key_field) {
        None => Err(Error::MissingKeyField),
        Some(Value::String(key)) => Ok(key),
        Some(_) => Err(Error::KeyTypeError),
    }
}
