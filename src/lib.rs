//! Two-party call negotiation over a document-store signaling relay.
//!
//! A [`CallNegotiator`] opens local media, then either creates a call record
//! holding an offer or answers an existing one, and trickles ICE candidates
//! through the record's mailboxes until the peers connect.

pub mod call;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod mock;
pub mod negotiator;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod utils;

pub use call::CallRecord;
pub use config::NegotiatorConfig;
pub use error::{CallError, ConfigError, MediaError, StoreError, TransportError};
pub use media::{MediaSource, MediaStream, MediaTrack, StreamSlot, TrackKind};
pub use negotiator::{CallNegotiator, StreamWatch};
pub use peer::{NegotiationState, Role};
pub use relay::{MemoryRelayStore, RelayStore};
