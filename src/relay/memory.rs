//! In-process relay store
//!
//! Keeps documents in memory and fans changes out to subscribers over
//! unbounded channels. Collections keep insertion order, and a new
//! collection subscriber first receives every existing document as
//! `Added`, so candidates written before a peer subscribes are not lost.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ChangeFeed, ChangeKind, CollectionPath, Document, DocumentChange, DocumentFeed, DocumentPath,
    Fields, RelayStore,
};
use crate::error::StoreError;
use crate::utils::random_id;

#[derive(Default)]
struct StoreState {
    /// Documents per collection, in insertion order
    collections: HashMap<CollectionPath, Vec<Document>>,
    doc_watchers: HashMap<DocumentPath, Vec<mpsc::UnboundedSender<Option<Document>>>>,
    collection_watchers: HashMap<CollectionPath, Vec<mpsc::UnboundedSender<DocumentChange>>>,
}

impl StoreState {
    fn find(&self, path: &DocumentPath) -> Option<&Document> {
        self.collections
            .get(path.parent())
            .and_then(|docs| docs.iter().find(|d| &d.path == path))
    }

    /// Inserts or replaces and notifies watchers
    fn write(&mut self, doc: Document) {
        let docs = self.collections.entry(doc.path.parent().clone()).or_default();
        let kind = match docs.iter_mut().find(|d| d.path == doc.path) {
            Some(existing) => {
                *existing = doc.clone();
                ChangeKind::Modified
            }
            None => {
                docs.push(doc.clone());
                ChangeKind::Added
            }
        };

        if let Some(watchers) = self.doc_watchers.get_mut(&doc.path) {
            watchers.retain(|tx| tx.send(Some(doc.clone())).is_ok());
        }
        if let Some(watchers) = self.collection_watchers.get_mut(doc.path.parent()) {
            let change = DocumentChange {
                kind,
                doc: doc.clone(),
            };
            watchers.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }
}

/// Relay store living in this process; clones share the same data
#[derive(Clone, Default)]
pub struct MemoryRelayStore {
    state: Arc<Mutex<StoreState>>,
    fail_writes: Arc<Mutex<Option<String>>>,
    operations: Arc<AtomicUsize>,
}

impl MemoryRelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `Rejected(reason)`;
    /// `None` restores normal behaviour
    pub fn fail_writes(&self, reason: Option<&str>) {
        *self.fail_writes.lock() = reason.map(str::to_string);
    }

    /// Number of store calls made so far
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Documents of a collection in insertion order
    pub fn documents(&self, collection: &CollectionPath) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Live subscriber count for a document or collection path
    pub fn subscriber_count(&self, path: &str) -> usize {
        let state = self.state.lock();
        let docs = state
            .doc_watchers
            .iter()
            .filter(|(p, _)| p.to_string() == path)
            .map(|(_, w)| w.iter().filter(|tx| !tx.is_closed()).count())
            .sum::<usize>();
        let colls = state
            .collection_watchers
            .iter()
            .filter(|(p, _)| p.as_str() == path)
            .map(|(_, w)| w.iter().filter(|tx| !tx.is_closed()).count())
            .sum::<usize>();
        docs + colls
    }

    fn count(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        match self.fail_writes.lock().as_ref() {
            Some(reason) => Err(StoreError::Rejected(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RelayStore for MemoryRelayStore {
    async fn create_document(
        &self,
        collection: &CollectionPath,
    ) -> Result<DocumentPath, StoreError> {
        self.count();
        Ok(collection.doc(random_id()))
    }

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.count();
        Ok(self.state.lock().find(doc).cloned())
    }

    async fn set_document(&self, doc: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.count();
        self.check_writable()?;
        debug!(path = %doc, "set document");
        self.state.lock().write(Document {
            path: doc.clone(),
            fields,
        });
        Ok(())
    }

    async fn update_document(
        &self,
        doc: &DocumentPath,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.count();
        self.check_writable()?;
        let mut state = self.state.lock();
        let mut merged = state
            .find(doc)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(doc.to_string()))?;
        for (key, value) in fields {
            merged.fields.insert(key, value);
        }
        debug!(path = %doc, "update document");
        state.write(merged);
        Ok(())
    }

    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<DocumentPath, StoreError> {
        self.count();
        self.check_writable()?;
        let path = collection.doc(random_id());
        self.state.lock().write(Document {
            path: path.clone(),
            fields,
        });
        Ok(path)
    }

    async fn subscribe_document(&self, doc: &DocumentPath) -> Result<DocumentFeed, StoreError> {
        self.count();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let _ = tx.send(state.find(doc).cloned());
        state.doc_watchers.entry(doc.clone()).or_default().push(tx);
        Ok(rx)
    }

    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<ChangeFeed, StoreError> {
        self.count();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if let Some(docs) = state.collections.get(collection) {
            for doc in docs {
                let _ = tx.send(DocumentChange {
                    kind: ChangeKind::Added,
                    doc: doc.clone(),
                });
            }
        }
        state
            .collection_watchers
            .entry(collection.clone())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
