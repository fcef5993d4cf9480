pub mod connection;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{
    RtcLocalTrack, RtcRemoteTrack, RtcTransport, RtcTransportFactory, SampleMediaSource,
};
pub use state::{NegotiationState, Role};
pub use transport::{
    ConnectionState, PeerTransport, TransportEvent, TransportEvents, TransportFactory,
};
pub use types::{IceCandidate, IceServerKind, SdpType, ServerConfig, SessionDescription};
