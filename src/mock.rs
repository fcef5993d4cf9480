//! In-memory transport and media for tests and single-process demos
//!
//! A [`MockNetwork`] links every [`MockTransport`] it creates. Session
//! descriptions carry the id of the transport that produced them, so once a
//! transport has both descriptions and at least one remote candidate it can
//! find its peer and "receive" the peer's local tracks, the way a real
//! connection starts delivering media after ICE succeeds.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{MediaError, TransportError};
use crate::media::{MediaSource, MediaStream, MediaTrack, TrackKind};
use crate::peer::transport::{
    ConnectionState, PeerTransport, TransportEvent, TransportEvents, TransportFactory,
};
use crate::peer::types::{IceCandidate, SdpType, SessionDescription};
use crate::utils::random_id;

// ============================================================================
// Mock media
// ============================================================================

#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: TrackKind,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// True if `track` is a [`MockTrack`] that has been stopped
pub fn is_stopped(track: &dyn MediaTrack) -> bool {
    track
        .as_any()
        .downcast_ref::<MockTrack>()
        .map(MockTrack::is_stopped)
        .unwrap_or(false)
}

/// Produces a stream with one audio and one video track named after `label`
pub struct MockMediaSource {
    label: String,
    unavailable: bool,
}

impl MockMediaSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unavailable: false,
        }
    }

    /// A source whose device cannot be opened
    pub fn unavailable(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn open_local_stream(&self) -> Result<Arc<MediaStream>, MediaError> {
        if self.unavailable {
            return Err(MediaError::DeviceUnavailable(self.label.clone()));
        }
        let tracks: Vec<Arc<dyn MediaTrack>> = vec![
            MockTrack::new(format!("{}-audio", self.label), TrackKind::Audio),
            MockTrack::new(format!("{}-video", self.label), TrackKind::Video),
        ];
        Ok(Arc::new(MediaStream::from_tracks(
            format!("{}-local", self.label),
            tracks,
        )))
    }
}

// ============================================================================
// Mock network
// ============================================================================

/// Behaviour of transports created by a network
#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Candidates emitted after each local description
    pub candidates: usize,
    pub fail_create_offer: bool,
    pub fail_create_answer: bool,
    pub fail_set_remote: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            candidates: 2,
            fail_create_offer: false,
            fail_create_answer: false,
            fail_set_remote: false,
        }
    }
}

#[derive(Default)]
struct NetworkState {
    transports: HashMap<String, Arc<MockTransport>>,
    options: MockOptions,
}

/// Registry linking mock transports; clones share the registry
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies to transports created from now on
    pub fn set_options(&self, options: MockOptions) {
        self.state.lock().options = options;
    }

    pub fn factory(&self) -> MockTransportFactory {
        MockTransportFactory {
            network: self.clone(),
        }
    }

    pub fn transport(&self, id: &str) -> Option<Arc<MockTransport>> {
        self.state.lock().transports.get(id).cloned()
    }

    pub fn transport_count(&self) -> usize {
        self.state.lock().transports.len()
    }

    pub fn is_closed(&self, id: &str) -> bool {
        self.transport(id).map(|t| t.is_closed()).unwrap_or(false)
    }

    fn register(&self) -> Arc<MockTransport> {
        let mut state = self.state.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            id: format!("mock-{}", random_id()),
            network: Arc::downgrade(&self.state),
            options: state.options.clone(),
            peer: Mutex::new(PeerState::default()),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        });
        state
            .transports
            .insert(transport.id.clone(), transport.clone());
        transport
    }
}

pub struct MockTransportFactory {
    network: MockNetwork,
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport: Arc<dyn PeerTransport> = self.network.register();
        Ok(transport)
    }
}

// ============================================================================
// Mock transport
// ============================================================================

#[derive(Default)]
struct PeerState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    local_tracks: Vec<Arc<dyn MediaTrack>>,
    remote_candidates: Vec<IceCandidate>,
    set_remote_calls: usize,
    delivered: bool,
    closed: bool,
}

pub struct MockTransport {
    id: String,
    network: Weak<Mutex<NetworkState>>,
    options: MockOptions,
    peer: Mutex<PeerState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<TransportEvents>>,
}

impl MockTransport {
    pub fn is_closed(&self) -> bool {
        self.peer.lock().closed
    }

    /// How many times a remote description was offered to this transport
    pub fn set_remote_calls(&self) -> usize {
        self.peer.lock().set_remote_calls
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.peer.lock().remote_candidates.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.peer.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.peer.lock().remote.clone()
    }

    fn sdp(&self, kind: SdpType) -> String {
        let kind = match kind {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        };
        format!("v=0\r\no=mock {} {}\r\ns=-\r\n", self.id, kind)
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.peer.lock().closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn gather(&self) {
        for n in 0..self.options.candidates {
            self.emit(TransportEvent::LocalCandidate(IceCandidate {
                candidate: format!(
                    "candidate:{n} 1 udp 2122260223 10.0.0.{} {} typ host",
                    n + 2,
                    50000 + n
                ),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: Some(self.id.clone()),
            }));
        }
        self.emit(TransportEvent::GatheringComplete);
    }

    /// Delivers the peer's tracks once both descriptions and a remote
    /// candidate are in place
    fn try_connect(&self) {
        let peer_id = {
            let peer = self.peer.lock();
            if peer.delivered
                || peer.closed
                || peer.local.is_none()
                || peer.remote_candidates.is_empty()
            {
                return;
            }
            match peer.remote.as_ref().and_then(|d| transport_id_of(&d.sdp)) {
                Some(id) => id,
                None => return,
            }
        };

        let Some(network) = self.network.upgrade() else {
            return;
        };
        let Some(other) = network.lock().transports.get(&peer_id).cloned() else {
            debug!(transport = %self.id, peer = %peer_id, "peer transport not found");
            return;
        };
        let tracks = other.peer.lock().local_tracks.clone();

        {
            let mut peer = self.peer.lock();
            if peer.delivered {
                return;
            }
            peer.delivered = true;
        }

        self.emit(TransportEvent::ConnectionState(ConnectionState::Connected));
        for track in tracks {
            let mirrored: Arc<dyn MediaTrack> = MockTrack::new(track.id(), track.kind());
            self.emit(TransportEvent::Track(mirrored));
        }
    }
}

fn transport_id_of(sdp: &str) -> Option<String> {
    sdp.lines()
        .find_map(|line| line.strip_prefix("o=mock "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

#[async_trait]
impl PeerTransport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        if self.options.fail_create_offer {
            return Err(TransportError::Description("offer generation failed".into()));
        }
        Ok(SessionDescription::offer(self.sdp(SdpType::Offer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        if self.options.fail_create_answer {
            return Err(TransportError::Description("answer generation failed".into()));
        }
        let has_offer = matches!(
            self.peer.lock().remote.as_ref().map(|d| d.sdp_type),
            Some(SdpType::Offer)
        );
        if !has_offer {
            return Err(TransportError::Description("no remote offer".into()));
        }
        Ok(SessionDescription::answer(self.sdp(SdpType::Answer)))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        {
            let mut peer = self.peer.lock();
            if peer.closed {
                return Err(TransportError::Closed);
            }
            if peer.local.is_some() {
                return Err(TransportError::Description(
                    "local description already set".into(),
                ));
            }
            peer.local = Some(desc);
        }
        self.gather();
        self.try_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        {
            let mut peer = self.peer.lock();
            if peer.closed {
                return Err(TransportError::Closed);
            }
            peer.set_remote_calls += 1;
            if self.options.fail_set_remote {
                return Err(TransportError::Description("remote description rejected".into()));
            }
            if peer.remote.is_some() {
                return Err(TransportError::Description(
                    "remote description already set".into(),
                ));
            }
            if transport_id_of(&desc.sdp).is_none() {
                return Err(TransportError::Description("unparseable sdp".into()));
            }
            peer.remote = Some(desc);
        }
        self.try_connect();
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.peer.lock().remote.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        {
            let mut peer = self.peer.lock();
            if peer.closed {
                return Err(TransportError::Closed);
            }
            if peer.remote.is_none() {
                return Err(TransportError::Candidate(
                    "remote description not set".into(),
                ));
            }
            peer.remote_candidates.push(candidate);
        }
        self.try_connect();
        Ok(())
    }

    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        _stream: &MediaStream,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        if track.as_any().downcast_ref::<MockTrack>().is_none() {
            return Err(TransportError::UnsupportedTrack(track.id()));
        }
        self.peer.lock().local_tracks.push(track);
        Ok(())
    }

    fn take_events(&self) -> Option<TransportEvents> {
        self.events_rx.lock().take()
    }

    fn close(&self) {
        let mut peer = self.peer.lock();
        if !peer.closed {
            debug!(transport = %self.id, "closing mock transport");
            peer.closed = true;
        }
    }
}
