use crate::document::{Document, PersistedDocument};
use crate::error::{Error, Result};
use crate::index::Index;
use async_trait::async_trait;
use log::{info, warn};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

const SCHEMA_SUFFIX: &str = ".schema.json";
const DOCUMENTS_SUFFIX: &str = ".bin";

#[async_trait]
pub trait IndexRepository: Send + Sync {
    async fn create(&self, index: Index) -> Result<()>;
    async fn replace(&self, index: Index) -> Result<()>;
    async fn exists(&self, name: &str) -> Result<bool>;
    async fn find_by_name(&self, name: &str) -> Result<Index>;
    async fn list(&self) -> Result<Vec<Index>>;
    /// Removes the index together with all of its documents.
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Creates or replaces the document at `(index_name, key)`.
    async fn upsert(&self, doc: Document) -> Result<()>;
    async fn find(&self, index_name: &str, key: &str) -> Result<Document>;
    /// Returns whether a document was removed.
    async fn delete(&self, index_name: &str, key: &str) -> Result<bool>;
    async fn list(&self, index_name: &str) -> Result<Vec<Document>>;
    async fn count(&self, index_name: &str) -> Result<usize>;
}

struct StoredIndex {
    index: Index,
    docs: BTreeMap<String, String>,
}

/// Index and document records held in memory and, when opened on a
/// directory, written through to disk on every mutation.
pub struct Store {
    data_dir: Option<PathBuf>,
    indexes: RwLock<BTreeMap<String, StoredIndex>>,
}

impl Store {
    pub fn in_memory() -> Self {
        Store {
            data_dir: None,
            indexes: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).await?;
        let indexes = load_indexes(&data_dir).await?;
        info!(
            "loaded {} index(es) from {}",
            indexes.len(),
            data_dir.display()
        );
        Ok(Store {
            data_dir: Some(data_dir),
            indexes: RwLock::new(indexes),
        })
    }

    async fn persist_documents(&self, stored: &StoredIndex) -> Result<()> {
        match &self.data_dir {
            Some(dir) => persist_documents(dir, &stored.index.name, &stored.docs).await,
            None => Ok(()),
        }
    }

    async fn persist_schema(&self, index: &Index) -> Result<()> {
        match &self.data_dir {
            Some(dir) => persist_schema(dir, index).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IndexRepository for Store {
    async fn create(&self, index: Index) -> Result<()> {
        let mut map = self.indexes.write().await;
        if map.contains_key(&index.name) {
            return Err(Error::AlreadyExists);
        }
        let stored = StoredIndex {
            index,
            docs: BTreeMap::new(),
        };
        // The schema file marks the index as present on reload, so it goes last.
        self.persist_documents(&stored).await?;
        self.persist_schema(&stored.index).await?;
        map.insert(stored.index.name.clone(), stored);
        Ok(())
    }

    async fn replace(&self, index: Index) -> Result<()> {
        let mut map = self.indexes.write().await;
        let stored = map.get_mut(&index.name).ok_or(Error::IndexNotFound)?;
        self.persist_schema(&index).await?;
        stored.index = index;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.indexes.read().await.contains_key(name))
    }

    async fn find_by_name(&self, name: &str) -> Result<Index> {
        let map = self.indexes.read().await;
        map.get(name)
            .map(|stored| stored.index.clone())
            .ok_or(Error::IndexNotFound)
    }

    async fn list(&self) -> Result<Vec<Index>> {
        let map = self.indexes.read().await;
        Ok(map.values().map(|stored| stored.index.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut map = self.indexes.write().await;
        if !map.contains_key(name) {
            return Err(Error::IndexNotFound);
        }
        if let Some(dir) = &self.data_dir {
            remove_if_present(&dir.join(format!("{name}{DOCUMENTS_SUFFIX}"))).await?;
            remove_if_present(&dir.join(format!("{name}{SCHEMA_SUFFIX}"))).await?;
        }
        map.remove(name);
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for Store {
    async fn upsert(&self, doc: Document) -> Result<()> {
        let mut map = self.indexes.write().await;
        let stored = map.get_mut(&doc.index_name).ok_or(Error::IndexNotFound)?;
        let previous = stored.docs.insert(doc.key.clone(), doc.content);
        if let Err(e) = self.persist_documents(stored).await {
            match previous {
                Some(content) => stored.docs.insert(doc.key, content),
                None => stored.docs.remove(&doc.key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn find(&self, index_name: &str, key: &str) -> Result<Document> {
        let map = self.indexes.read().await;
        let stored = map.get(index_name).ok_or(Error::IndexNotFound)?;
        stored
            .docs
            .get(key)
            .map(|content| Document {
                index_name: index_name.to_string(),
                key: key.to_string(),
                content: content.clone(),
            })
            .ok_or(Error::DocumentNotFound)
    }

    async fn delete(&self, index_name: &str, key: &str) -> Result<bool> {
        let mut map = self.indexes.write().await;
        let stored = map.get_mut(index_name).ok_or(Error::IndexNotFound)?;
        let Some(content) = stored.docs.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist_documents(stored).await {
            stored.docs.insert(key.to_string(), content);
            return Err(e);
        }
        Ok(true)
    }

    async fn list(&self, index_name: &str) -> Result<Vec<Document>> {
        let map = self.indexes.read().await;
        let stored = map.get(index_name).ok_or(Error::IndexNotFound)?;
        Ok(stored
            .docs
            .iter()
            .map(|(key, content)| Document {
                index_name: index_name.to_string(),
                key: key.clone(),
                content: content.clone(),
            })
            .collect())
    }

    async fn count(&self, index_name: &str) -> Result<usize> {
        let map = self.indexes.read().await;
        map.get(index_name)
            .map(|stored| stored.docs.len())
            .ok_or(Error::IndexNotFound)
    }
}

async fn load_indexes(data_dir: &Path) -> Result<BTreeMap<String, StoredIndex>> {
    let mut map = BTreeMap::new();
    let mut entries = fs::read_dir(data_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_suffix(SCHEMA_SUFFIX))
        else {
            continue;
        };

        let index = match load_schema(&path, name).await {
            Ok(index) => index,
            Err(e) => {
                warn!("skipping index file {}: {e}", path.display());
                continue;
            }
        };
        let docs = load_documents(data_dir, name).await;
        map.insert(name.to_string(), StoredIndex { index, docs });
    }

    Ok(map)
}

async fn load_schema(path: &Path, name: &str) -> Result<Index> {
    let bytes = fs::read(path).await?;
    let raw = serde_json::from_slice(&bytes)?;
    Index::new(name, raw)
}

async fn load_documents(data_dir: &Path, name: &str) -> BTreeMap<String, String> {
    let path = data_dir.join(format!("{name}{DOCUMENTS_SUFFIX}"));
    let content = match fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!("failed to read {}: {e}", path.display());
            return BTreeMap::new();
        }
    };
    match bincode::deserialize::<Vec<PersistedDocument>>(&content) {
        Ok(raw_docs) => raw_docs
            .into_iter()
            .map(|d| (d.key, String::from_utf8_lossy(&d.data).into_owned()))
            .collect(),
        Err(e) => {
            warn!("failed to decode {}: {e}", path.display());
            BTreeMap::new()
        }
    }
}

async fn persist_documents(
    data_dir: &Path,
    name: &str,
    docs: &BTreeMap<String, String>,
) -> Result<()> {
    let path = data_dir.join(format!("{name}{DOCUMENTS_SUFFIX}"));
    let raw: Vec<PersistedDocument> = docs
        .iter()
        .map(|(key, content)| PersistedDocument {
            key: key.clone(),
            data: content.as_bytes().to_vec(),
        })
        .collect();
    let bytes = bincode::serialize(&raw)?;
    fs::write(path, bytes).await?;
    Ok(())
}

async fn persist_schema(data_dir: &Path, index: &Index) -> Result<()> {
    let path = data_dir.join(format!("{}{SCHEMA_SUFFIX}", index.name));
    let bytes = serde_json::to_vec(&index.raw)?;
    fs::write(path, bytes).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
