use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;

const MAX_INDEX_NAME_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_false")]
    pub key: bool,
}

fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Typed view of an index schema. Extra descriptor attributes (type,
/// searchable, ...) are kept only in the raw payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn parse(raw: &Value) -> Result<Self> {
        Schema::deserialize(raw).map_err(|e| Error::SchemaParseError(e.to_string()))
    }

    /// First key-marked field in declaration order.
    pub fn key_field(&self) -> Result<&str> {
        self.fields
            .iter()
            .find(|f| f.key)
            .map(|f| f.name.as_str())
            .filter(|name| !name.is_empty())
            .ok_or(Error::MissingKeyField)
    }
}

pub fn resolve_key_field(raw: &Value) -> Result<String> {
    Schema::parse(raw)?.key_field().map(str::to_owned)
}

#[derive(Clone, Debug)]
pub struct Index {
    pub name: String,
    pub schema: Schema,
    /// Payload as submitted, returned verbatim on reads.
    pub raw: Value,
}

impl Index {
    /// Validates `raw` and caches its parsed schema.
    pub fn new(name: impl Into<String>, raw: Value) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        match raw.get("fields") {
            Some(Value::Array(fields)) if !fields.is_empty() => {}
            Some(Value::Array(_)) | None => {
                return Err(Error::InvalidSchema("fields required in schema".into()));
            }
            Some(_) => return Err(Error::InvalidSchema("fields must be an array".into())),
        }
        let schema = Schema::parse(&raw).map_err(|e| Error::InvalidSchema(e.to_string()))?;

        let mut seen = HashSet::new();
        for field in &schema.fields {
            if field.name.is_empty() {
                return Err(Error::InvalidSchema("field name must not be empty".into()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate field name: {}",
                    field.name
                )));
            }
        }

        Ok(Index { name, schema, raw })
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_INDEX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !name.starts_with(['-', '_']);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSchema(format!("invalid index name: {name:?}")))
    }
}
