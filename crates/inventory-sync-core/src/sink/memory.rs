//! In-memory [`IndexSink`] used for dry runs and tests.
//!
//! Documents live in a `BTreeMap`, so enumeration order is the id order and
//! stable across pages.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::IndexSink;
use crate::models::MergedRecord;

#[derive(Debug, Default)]
pub struct InMemorySink {
    docs: RwLock<BTreeMap<String, MergedRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing set of documents.
    pub fn with_docs(docs: impl IntoIterator<Item = (String, MergedRecord)>) -> Self {
        Self {
            docs: RwLock::new(docs.into_iter().collect()),
        }
    }

    pub fn get(&self, id: &str) -> Option<MergedRecord> {
        self.docs.read().ok().and_then(|d| d.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.docs
            .read()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IndexSink for InMemorySink {
    async fn upsert(&self, id: &str, doc: &MergedRecord) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow!("in-memory sink lock poisoned"))?;
        docs.insert(id.to_string(), doc.clone());
        Ok(())
    }

    async fn enumerate_keys(&self, offset: usize, page_size: usize) -> Result<Vec<String>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("in-memory sink lock poisoned"))?;
        Ok(docs.keys().skip(offset).take(page_size).cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow!("in-memory sink lock poisoned"))?;
        docs.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> MergedRecord {
        serde_json::from_value(serde_json::json!({
            "computer_name": name,
            "exists_in_ocs": false,
            "exists_in_ad": true,
            "@timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let sink = InMemorySink::new();
        sink.upsert("PC01", &doc("PC01")).await.unwrap();
        let mut updated = doc("PC01");
        updated.exists_in_ocs = true;
        sink.upsert("PC01", &updated).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert!(sink.get("PC01").unwrap().exists_in_ocs);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let sink = InMemorySink::with_docs(vec![("PC01".to_string(), doc("PC01"))]);
        sink.delete("nope").await.unwrap();
        sink.delete("PC01").await.unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_enumerate_offset_past_end() {
        let sink = InMemorySink::with_docs(vec![("A".to_string(), doc("A"))]);
        assert!(sink.enumerate_keys(5, 10).await.unwrap().is_empty());
        assert_eq!(sink.ids(), vec!["A"]);
    }
}
