use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("index already exists")]
    AlreadyExists,

    #[error("index not found")]
    IndexNotFound,

    #[error("document not found")]
    DocumentNotFound,

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("missing key field")]
    MissingKeyField,

    #[error("key field must be string")]
    KeyTypeError,

    #[error("schema parse error: {0}")]
    SchemaParseError(String),

    /// Passthrough from the storage layer.
    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}
