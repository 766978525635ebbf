//! Document-store seam.
//!
//! Documents live in named collections, keyed by id, with a range-queryable
//! timestamp. The production deployment fronts a managed document store;
//! [`MemoryStore`] backs tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

/// Errors from the store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// One persisted document.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    /// Range-query key.
    pub timestamp: DateTime<Utc>,
    pub fields: Value,
}

/// Write/query interface keyed by collection name, document id, and a
/// range-queryable timestamp field.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or overwrite a document.
    async fn put(
        &self,
        collection: &str,
        id: &str,
        timestamp: DateTime<Utc>,
        fields: Value,
    ) -> Result<(), StoreError>;

    /// Fetch a single document by id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Documents with `from <= timestamp <= to`, ascending, optionally
    /// truncated to `limit`.
    async fn query_range(
        &self,
        collection: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError>;
}

/// In-memory store: collections of id-keyed documents behind one lock.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, StoredDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(
        &self,
        collection: &str,
        id: &str,
        timestamp: DateTime<Utc>,
        fields: Value,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let _ = collections.entry(collection.to_string()).or_default().insert(
            id.to_string(),
            StoredDocument {
                id: id.to_string(),
                timestamp,
                fields,
            },
        );
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn query_range(
        &self,
        collection: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let collections = self.collections.read();
        let mut matched: Vec<StoredDocument> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|d| d.timestamp >= from && d.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryStore::new();
        store
            .put("Cap", "Cap_1", ts(100), json!({"gcsUri": "gs://b/o.jpg"}))
            .await
            .unwrap();
        let doc = store.get("Cap", "Cap_1").await.unwrap().unwrap();
        assert_eq!(doc.fields["gcsUri"], "gs://b/o.jpg");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("Cap", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_same_id() {
        let store = MemoryStore::new();
        store.put("Cap", "x", ts(1), json!({"v": 1})).await.unwrap();
        store.put("Cap", "x", ts(2), json!({"v": 2})).await.unwrap();
        assert_eq!(store.count("Cap"), 1);
        let doc = store.get("Cap", "x").await.unwrap().unwrap();
        assert_eq!(doc.fields["v"], 2);
    }

    #[tokio::test]
    async fn range_query_is_inclusive_and_ascending() {
        let store = MemoryStore::new();
        for (id, secs) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            store.put("Ai", id, ts(secs), json!({})).await.unwrap();
        }
        let docs = store.query_range("Ai", ts(20), ts(30), None).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn range_query_respects_limit() {
        let store = MemoryStore::new();
        for (id, secs) in [("a", 10), ("b", 20), ("c", 30)] {
            store.put("Cap", id, ts(secs), json!({})).await.unwrap();
        }
        let docs = store
            .query_range("Cap", ts(0), ts(100), Some(2))
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a");
    }

    #[tokio::test]
    async fn range_query_on_missing_collection_is_empty() {
        let store = MemoryStore::new();
        let docs = store
            .query_range("nope", ts(0), ts(100), None)
            .await
            .unwrap();
        assert!(docs.is_empty());
    }
}
