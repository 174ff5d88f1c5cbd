use crate::batch::{BatchItemResult, execute_batch};
use crate::document::{Document, extract_key};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::storage::{DocumentRepository, IndexRepository};
use crate::utils::{matches_query, select_fields};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub document_count: usize,
    /// Not tracked by the store; always zero.
    pub storage_size: u64,
}

#[derive(Clone)]
pub struct IndexService {
    indexes: Arc<dyn IndexRepository>,
    docs: Arc<dyn DocumentRepository>,
}

impl IndexService {
    pub fn new(indexes: Arc<dyn IndexRepository>, docs: Arc<dyn DocumentRepository>) -> Self {
        IndexService { indexes, docs }
    }

    pub async fn create_index(&self, name: &str, raw: Value) -> Result<Index> {
        if self.indexes.exists(name).await? {
            return Err(Error::AlreadyExists);
        }
        let index = Index::new(name, raw)?;
        self.indexes.create(index.clone()).await?;
        Ok(index)
    }

    /// Replaces the schema of an existing index. Stored documents are kept.
    pub async fn update_index(&self, name: &str, raw: Value) -> Result<Index> {
        if !self.indexes.exists(name).await? {
            return Err(Error::IndexNotFound);
        }
        if let Some(body_name) = raw.get("name").and_then(Value::as_str) {
            if body_name != name {
                return Err(Error::InvalidSchema(format!(
                    "index name {body_name:?} does not match {name:?}"
                )));
            }
        }
        let index = Index::new(name, raw)?;
        self.indexes.replace(index.clone()).await?;
        Ok(index)
    }

    pub async fn delete_index(&self, name: &str) -> Result<()> {
        self.indexes.delete(name).await
    }

    pub async fn get_index(&self, name: &str) -> Result<Value> {
        Ok(self.indexes.find_by_name(name).await?.raw)
    }

    /// Raw schemas of every index, optionally projected onto `select`.
    pub async fn list_indexes(&self, select: Option<&[String]>) -> Result<Vec<Value>> {
        let indexes = self.indexes.list().await?;
        Ok(indexes
            .into_iter()
            .map(|index| match select {
                Some(names) => select_fields(&index.raw, names),
                None => index.raw,
            })
            .collect())
    }

    pub async fn stats(&self, name: &str) -> Result<IndexStats> {
        if !self.indexes.exists(name).await? {
            return Err(Error::IndexNotFound);
        }
        Ok(IndexStats {
            document_count: self.docs.count(name).await?,
            storage_size: 0,
        })
    }
}

#[derive(Clone)]
pub struct DocumentService {
    docs: Arc<dyn DocumentRepository>,
    indexes: Arc<dyn IndexRepository>,
}

impl DocumentService {
    pub fn new(docs: Arc<dyn DocumentRepository>, indexes: Arc<dyn IndexRepository>) -> Self {
        DocumentService { docs, indexes }
    }

    async fn key_field(&self, index_name: &str) -> Result<String> {
        let index = self.indexes.find_by_name(index_name).await?;
        index.schema.key_field().map(str::to_owned)
    }

    async fn ensure_index(&self, index_name: &str) -> Result<()> {
        if self.indexes.exists(index_name).await? {
            Ok(())
        } else {
            Err(Error::IndexNotFound)
        }
    }

    pub async fn add_or_update(&self, index_name: &str, doc: &Map<String, Value>) -> Result<()> {
        let key_field = self.key_field(index_name).await?;
        let key = extract_key(doc, &key_field)?;
        self.docs
            .upsert(Document::from_fields(index_name, key, doc)?)
            .await
    }

    /// Fails as a whole only when the index is missing or declares no key
    /// field; otherwise returns one result per item.
    pub async fn batch(
        &self,
        index_name: &str,
        items: &[Map<String, Value>],
    ) -> Result<Vec<BatchItemResult>> {
        let key_field = self.key_field(index_name).await?;
        Ok(execute_batch(self.docs.as_ref(), index_name, &key_field, items).await)
    }

    pub async fn get_document(&self, index_name: &str, key: &str) -> Result<Map<String, Value>> {
        self.ensure_index(index_name).await?;
        let doc = self.docs.find(index_name, key).await?;
        serde_json::from_str(&doc.content)
            .map_err(|e| Error::StorageError(format!("invalid document json: {e}")))
    }

    pub async fn count(&self, index_name: &str) -> Result<usize> {
        self.ensure_index(index_name).await?;
        self.docs.count(index_name).await
    }

    /// Documents whose stored payload contains `query`, ignoring case.
    /// Rows that no longer decode are left out.
    pub async fn search(&self, index_name: &str, query: &str) -> Result<Vec<Map<String, Value>>> {
        self.ensure_index(index_name).await?;
        let query = query.to_lowercase();
        Ok(self
            .docs
            .list(index_name)
            .await?
            .iter()
            .filter(|doc| matches_query(&doc.content, &query))
            .filter_map(Document::fields)
            .collect())
    }
}
