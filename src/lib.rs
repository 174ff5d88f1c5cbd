//! Emulator for a cloud search-index management API: index CRUD, keyed
//! document writes, batch actions and substring search over a file-backed
//! store.

pub mod api;
pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod service;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
