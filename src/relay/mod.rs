//! Signaling relay store
//!
//! A document store with collections, documents and sub-collections, used
//! only to exchange call records and candidates. Subscriptions are channel
//! receivers; dropping one unsubscribes.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;

use crate::error::StoreError;

pub use memory::MemoryRelayStore;

pub type Fields = Map<String, Value>;

/// Slash-separated path of a collection, e.g. `calls` or
/// `calls/abc123/offerCandidates`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

/// A document inside a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl CollectionPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DocumentPath {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> &CollectionPath {
        &self.collection
    }

    /// Sub-collection scoped to this document
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection.0, self.id, name))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Snapshot of one document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a collection change feed
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// Snapshots of one document; `None` while it does not exist
pub type DocumentFeed = mpsc::UnboundedReceiver<Option<Document>>;

/// Changes to one collection
pub type ChangeFeed = mpsc::UnboundedReceiver<DocumentChange>;

#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Allocates a fresh document id in `collection` without writing it
    async fn create_document(&self, collection: &CollectionPath)
        -> Result<DocumentPath, StoreError>;

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Writes the whole document, creating it if needed
    async fn set_document(&self, doc: &DocumentPath, fields: Fields) -> Result<(), StoreError>;

    /// Merges fields into an existing document; `NotFound` if absent
    async fn update_document(&self, doc: &DocumentPath, fields: Fields)
        -> Result<(), StoreError>;

    /// Appends a document with a generated id
    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<DocumentPath, StoreError>;

    /// Feed starts with the current snapshot
    async fn subscribe_document(&self, doc: &DocumentPath) -> Result<DocumentFeed, StoreError>;

    /// Feed starts with every existing document reported as `Added`
    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<ChangeFeed, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_paths() {
        let calls = CollectionPath::root("calls");
        let call = calls.doc("abc123");
        assert_eq!(call.to_string(), "calls/abc123");
        assert_eq!(
            call.collection("offerCandidates").as_str(),
            "calls/abc123/offerCandidates"
        );
        assert_eq!(call.parent(), &calls);
        assert_eq!(call.id(), "abc123");
    }
}
