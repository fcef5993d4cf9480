//! Peer transport abstraction
//!
//! The negotiator drives a [`PeerTransport`] through offer/answer without
//! knowing whether it is backed by the `webrtc` crate or by the in-memory
//! mock. Everything the transport reports asynchronously arrives on one
//! event channel, taken once per connection handle.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::media::{MediaStream, MediaTrack};
use crate::peer::types::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local candidate was gathered
    LocalCandidate(IceCandidate),
    /// Local gathering finished
    GatheringComplete,
    /// A remote track arrived
    Track(Arc<dyn MediaTrack>),
    ConnectionState(ConnectionState),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Identifies this connection handle in logs and tests
    fn id(&self) -> &str;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn has_remote_description(&self) -> bool;

    /// Late and duplicate candidates must be tolerated
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        stream: &MediaStream,
    ) -> Result<(), TransportError>;

    /// Hands out the event channel. Returns `None` after the first call.
    fn take_events(&self) -> Option<TransportEvents>;

    /// Releases all resources. Idempotent, never fails.
    fn close(&self);
}

/// Creates a fresh connection handle for each session
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
