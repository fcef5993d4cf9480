//! [`PeerTransport`] backed by the `webrtc` crate

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::NegotiatorConfig;
use crate::error::{MediaError, TransportError};
use crate::media::{MediaSource, MediaStream, MediaTrack, TrackKind};
use crate::peer::transport::{
    ConnectionState, PeerTransport, TransportEvent, TransportEvents, TransportFactory,
};
use crate::peer::types::{IceCandidate, SdpType, ServerConfig, SessionDescription};
use crate::utils::{add_ice_url_scheme, random_id};

/// Builds the peer connection configuration
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let built = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    built.map_err(|e| TransportError::Description(e.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(TransportError::Description(format!(
            "unexpected description type {other}"
        ))),
    }
}

fn map_state(st: RTCPeerConnectionState) -> ConnectionState {
    match st {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

/// Creates one `RTCPeerConnection` per session
pub struct RtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcTransportFactory {
    pub fn new(config: &NegotiatorConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
        }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport: Arc<dyn PeerTransport> = RtcTransport::connect(&self.ice_servers).await?;
        Ok(transport)
    }
}

pub struct RtcTransport {
    id: String,
    pc: Arc<RTCPeerConnection>,
    events: Mutex<Option<TransportEvents>>,
    closed: AtomicBool,
}

impl RtcTransport {
    pub async fn connect(servers: &[ServerConfig]) -> Result<Arc<Self>, TransportError> {
        let failed = |e: webrtc::Error| TransportError::ConnectionFailed(e.to_string());

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(failed)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(failed)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(servers))
                .await
                .map_err(failed)?,
        );
        let id = format!("rtc-{}", random_id());
        let (tx, rx) = mpsc::unbounded_channel();

        let cand_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let event = match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => Some(TransportEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => {
                        warn!("Failed to serialize local candidate: {}", e);
                        None
                    }
                },
                None => {
                    debug!("ICE candidate gathering completed (null candidate received)");
                    Some(TransportEvent::GatheringComplete)
                }
            };
            if let Some(event) = event {
                let _ = cand_tx.send(event);
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        let state_tx = tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("Peer connection state changed to: {:?}", st);
            let _ = state_tx.send(TransportEvent::ConnectionState(map_state(st)));
            Box::pin(async {})
        }));

        let track_tx = tx;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            info!(track = %track.id(), kind = %track.kind(), "remote track arrived");
            let remote: Arc<dyn MediaTrack> = Arc::new(RtcRemoteTrack::new(track));
            let _ = track_tx.send(TransportEvent::Track(remote));
            Box::pin(async {})
        }));

        debug!(transport = %id, servers = servers.len(), "created peer connection");
        Ok(Arc::new(Self {
            id,
            pc,
            events: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        }))
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        from_rtc(answer)
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        stream: &MediaStream,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let Some(local) = track.as_any().downcast_ref::<RtcLocalTrack>() else {
            return Err(TransportError::UnsupportedTrack(track.id()));
        };
        let sender = self
            .pc
            .add_track(local.sample_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(track = %local.id(), stream = %stream.id(), "local track attached");

        // RTCP has to be drained for interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    fn take_events(&self) -> Option<TransportEvents> {
        self.events.lock().take()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pc = self.pc.clone();
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = pc.close().await {
                        warn!(transport = %id, "error closing peer connection: {}", e);
                    }
                });
            }
            Err(_) => warn!(transport = %id, "no runtime to close peer connection on"),
        }
    }
}

/// Outgoing track fed with encoded samples by the application
pub struct RtcLocalTrack {
    track: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    stopped: AtomicBool,
}

impl RtcLocalTrack {
    pub fn opus(stream_id: &str) -> Arc<Self> {
        Self::with_codec(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Audio,
            stream_id,
        )
    }

    pub fn vp8(stream_id: &str) -> Arc<Self> {
        Self::with_codec(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            TrackKind::Video,
            stream_id,
        )
    }

    fn with_codec(codec: RTCRtpCodecCapability, kind: TrackKind, stream_id: &str) -> Arc<Self> {
        let track = TrackLocalStaticSample::new(
            codec,
            format!("{}-{}", kind, random_id()),
            stream_id.to_owned(),
        );
        Arc::new(Self {
            track: Arc::new(track),
            kind,
            stopped: AtomicBool::new(false),
        })
    }

    /// Handle for writing media samples
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for RtcLocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcLocalTrack")
            .field("id", &self.track.id())
            .field("kind", &self.kind)
            .finish()
    }
}

impl MediaTrack for RtcLocalTrack {
    fn id(&self) -> String {
        self.track.id().to_owned()
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

/// Incoming track reported by the peer connection
pub struct RtcRemoteTrack {
    track: Arc<TrackRemote>,
    stopped: AtomicBool,
}

impl RtcRemoteTrack {
    fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            track,
            stopped: AtomicBool::new(false),
        }
    }

    /// Handle for reading RTP packets
    pub fn remote(&self) -> Arc<TrackRemote> {
        self.track.clone()
    }
}

impl fmt::Debug for RtcRemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcRemoteTrack")
            .field("id", &self.track.id())
            .finish()
    }
}

impl MediaTrack for RtcRemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn kind(&self) -> TrackKind {
        match self.track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Local stream of one Opus and one VP8 sample track
#[derive(Default)]
pub struct SampleMediaSource;

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn open_local_stream(&self) -> Result<Arc<MediaStream>, MediaError> {
        let stream_id = format!("local-{}", random_id());
        let tracks: Vec<Arc<dyn MediaTrack>> = vec![
            RtcLocalTrack::opus(&stream_id),
            RtcLocalTrack::vp8(&stream_id),
        ];
        Ok(Arc::new(MediaStream::from_tracks(stream_id, tracks)))
    }
}
