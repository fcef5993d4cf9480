#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use relaycall::mock::{MockMediaSource, MockNetwork};
use relaycall::relay::{
    ChangeFeed, CollectionPath, Document, DocumentFeed, DocumentPath, Fields,
};
use relaycall::{CallNegotiator, MemoryRelayStore, NegotiatorConfig, RelayStore, StoreError};

pub struct Harness {
    pub network: MockNetwork,
    pub store: MemoryRelayStore,
}

impl Harness {
    pub fn new() -> Self {
        relaycall::logger::init();
        Self {
            network: MockNetwork::new(),
            store: MemoryRelayStore::new(),
        }
    }

    pub fn peer(&self, name: &str) -> CallNegotiator {
        self.peer_with_media(MockMediaSource::new(name))
    }

    pub fn peer_with_media(&self, media: MockMediaSource) -> CallNegotiator {
        self.build(Arc::new(self.store.clone()), media)
    }

    /// A peer whose store calls go through `quirks` on the shared store
    pub fn quirky_peer(&self, name: &str, quirks: StoreQuirks) -> CallNegotiator {
        let store = QuirkyStore {
            inner: self.store.clone(),
            quirks,
        };
        self.build(Arc::new(store), MockMediaSource::new(name))
    }

    fn build(&self, store: Arc<dyn RelayStore>, media: MockMediaSource) -> CallNegotiator {
        CallNegotiator::new(
            store,
            Arc::new(self.network.factory()),
            Arc::new(media),
            NegotiatorConfig::default(),
        )
        .unwrap()
    }
}

/// Polls `cond` until it holds, failing the test after a few seconds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Lets background tasks run for a moment
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn sorted_ids(negotiator: &CallNegotiator) -> Vec<String> {
    let mut ids = negotiator
        .current_remote_stream()
        .map(|s| s.track_ids())
        .unwrap_or_default();
    ids.sort();
    ids
}

/// Misbehaviours a real relay can show
#[derive(Debug, Clone, Default)]
pub struct StoreQuirks {
    /// Every collection change is delivered twice
    pub doubled_feeds: bool,
    /// Appends land only after this delay
    pub add_delay: Option<Duration>,
    /// Updates stall for this long and are then rejected
    pub failing_update_after: Option<Duration>,
}

pub struct QuirkyStore {
    inner: MemoryRelayStore,
    quirks: StoreQuirks,
}

#[async_trait]
impl RelayStore for QuirkyStore {
    async fn create_document(
        &self,
        collection: &CollectionPath,
    ) -> Result<DocumentPath, StoreError> {
        self.inner.create_document(collection).await
    }

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.inner.get_document(doc).await
    }

    async fn set_document(&self, doc: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.inner.set_document(doc, fields).await
    }

    async fn update_document(
        &self,
        doc: &DocumentPath,
        fields: Fields,
    ) -> Result<(), StoreError> {
        if let Some(delay) = self.quirks.failing_update_after {
            tokio::time::sleep(delay).await;
            return Err(StoreError::Rejected("update timed out".into()));
        }
        self.inner.update_document(doc, fields).await
    }

    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<DocumentPath, StoreError> {
        if let Some(delay) = self.quirks.add_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.add_document(collection, fields).await
    }

    async fn subscribe_document(&self, doc: &DocumentPath) -> Result<DocumentFeed, StoreError> {
        self.inner.subscribe_document(doc).await
    }

    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<ChangeFeed, StoreError> {
        let mut feed = self.inner.subscribe_collection(collection).await?;
        if !self.quirks.doubled_feeds {
            return Ok(feed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(change) = feed.recv().await {
                if tx.send(change.clone()).is_err() || tx.send(change).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
