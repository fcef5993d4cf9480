//! Call negotiator
//!
//! Each participant runs one [`CallNegotiator`]. The caller writes an offer
//! into a fresh call record and waits for the answer; the callee reads the
//! offer, writes the answer, and both sides trade ICE candidates through the
//! record's two mailboxes. The negotiator owns at most one connection handle
//! at a time; [`CallNegotiator::hangup`] releases it together with every
//! subscription and background task bound to it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::call::{
    answer_fields, calls_collection, normalize_call_id, offer_fields, CallPaths, CallRecord,
};
use crate::config::NegotiatorConfig;
use crate::error::CallError;
use crate::logger::{dump_candidate, report_connection_state};
use crate::media::{MediaSource, MediaStream, StreamSlot};
use crate::peer::ice::{analyze_candidates, apply_candidates};
use crate::peer::state::{NegotiationState, Role};
use crate::peer::transport::{
    ConnectionState, PeerTransport, TransportEvent, TransportEvents, TransportFactory,
};
use crate::relay::{DocumentFeed, RelayStore};
use crate::session::CallSession;
use crate::signaling;

pub type StreamWatch = watch::Receiver<Option<Arc<MediaStream>>>;

/// State shared between the negotiator and its background tasks
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn RelayStore>,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaSource>,
    config: NegotiatorConfig,
    session: Mutex<Option<CallSession>>,
    generations: AtomicU64,
    local_stream: StreamSlot,
    remote_stream: StreamSlot,
}

impl Shared {
    /// Runs `f` on the session if it is still the one numbered `generation`
    pub(crate) fn with_session<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut CallSession) -> R,
    ) -> Option<R> {
        let mut guard = self.session.lock();
        match guard.as_mut() {
            Some(session) if session.generation == generation => Some(f(session)),
            _ => None,
        }
    }

    fn attach_task(&self, generation: u64, handle: JoinHandle<()>) {
        let mut guard = self.session.lock();
        match guard.as_mut() {
            Some(session) if session.generation == generation => session.track_task(handle),
            _ => handle.abort(),
        }
    }

    /// Session id and connection handle, if a call may start now
    fn ready_session(&self) -> Result<(u64, Arc<dyn PeerTransport>), CallError> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(CallError::NotInitialized)?;
        if !session.state.accepts_call() || session.role.is_some() {
            return Err(CallError::InvalidState(session.state));
        }
        Ok((session.generation, session.transport.clone()))
    }

    /// Binds the session to a call. Local candidates stay buffered until the
    /// outbox is opened.
    fn begin_call(
        &self,
        generation: u64,
        role: Role,
        paths: &CallPaths,
    ) -> Result<(), CallError> {
        let mut guard = self.session.lock();
        let session = match guard.as_mut() {
            Some(s) if s.generation == generation => s,
            _ => return Err(CallError::NotInitialized),
        };
        if session.role.is_some() {
            return Err(CallError::InvalidState(session.state));
        }
        debug!(call_id = paths.call_id(), role = %role, "binding session to call");
        session.role = Some(role);
        session.call = Some(paths.clone());
        Ok(())
    }

    /// Tears down the current session. With `Some(generation)` only that
    /// session is torn down.
    fn teardown(&self, generation: Option<u64>) {
        let session = {
            let mut guard = self.session.lock();
            match (guard.as_ref(), generation) {
                (Some(current), Some(g)) if current.generation != g => return,
                _ => guard.take(),
            }
        };

        if let Some(session) = session {
            info!(
                call_id = session.call_id().unwrap_or("-"),
                transport = session.transport.id(),
                "hanging up"
            );
            session.shutdown();
        }
        if let Some(local) = self.local_stream.replace(None) {
            local.stop_all();
        }
        self.remote_stream.replace(None);
    }
}

/// Drives one participant's side of a call
pub struct CallNegotiator {
    shared: Arc<Shared>,
}

impl CallNegotiator {
    pub fn new(
        store: Arc<dyn RelayStore>,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaSource>,
        config: NegotiatorConfig,
    ) -> Result<Self, CallError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                transports,
                media,
                config,
                session: Mutex::new(None),
                generations: AtomicU64::new(0),
                local_stream: StreamSlot::new(),
                remote_stream: StreamSlot::new(),
            }),
        })
    }

    pub fn config(&self) -> &NegotiatorConfig {
        &self.shared.config
    }

    pub fn state(&self) -> NegotiationState {
        self.shared
            .session
            .lock()
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn role(&self) -> Option<Role> {
        self.shared.session.lock().as_ref().and_then(|s| s.role)
    }

    /// Id of the call this negotiator created or joined
    pub fn call_id(&self) -> Option<String> {
        self.shared
            .session
            .lock()
            .as_ref()
            .and_then(|s| s.call_id().map(str::to_string))
    }

    /// Id of the open connection handle
    pub fn connection_id(&self) -> Option<String> {
        self.shared
            .session
            .lock()
            .as_ref()
            .map(|s| s.transport.id().to_string())
    }

    pub fn local_stream(&self) -> StreamWatch {
        self.shared.local_stream.subscribe()
    }

    pub fn remote_stream(&self) -> StreamWatch {
        self.shared.remote_stream.subscribe()
    }

    pub fn current_local_stream(&self) -> Option<Arc<MediaStream>> {
        self.shared.local_stream.current()
    }

    pub fn current_remote_stream(&self) -> Option<Arc<MediaStream>> {
        self.shared.remote_stream.current()
    }

    /// Opens local media and a fresh connection handle.
    ///
    /// Any previous session is hung up first, so at most one handle is ever
    /// open.
    pub async fn setup_media_sources(&self) -> Result<(), CallError> {
        if self.shared.session.lock().is_some() {
            info!("replacing existing session");
            self.hangup();
        }

        let local = self.shared.media.open_local_stream().await?;
        let transport = match self.shared.transports.create().await {
            Ok(t) => t,
            Err(e) => {
                local.stop_all();
                return Err(e.into());
            }
        };

        let attached = attach_local_tracks(transport.as_ref(), &local).await;
        let events = attached.and_then(|()| {
            transport.take_events().ok_or_else(|| {
                CallError::NegotiationFailure("transport events already taken".into())
            })
        });
        let events = match events {
            Ok(events) => events,
            Err(e) => {
                transport.close();
                local.stop_all();
                return Err(e);
            }
        };

        let remote = Arc::new(MediaStream::new());
        let generation = self.shared.generations.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            transport = transport.id(),
            tracks = local.len(),
            "media sources ready"
        );

        let previous = self.shared.session.lock().replace(CallSession::new(
            generation,
            transport,
            local.clone(),
            remote.clone(),
        ));
        if let Some(previous) = previous {
            previous.shutdown();
        }
        self.shared.local_stream.replace(Some(local));
        self.shared.remote_stream.replace(Some(remote));

        let pump = tokio::spawn(pump_transport_events(
            Arc::downgrade(&self.shared),
            generation,
            events,
        ));
        self.shared.attach_task(generation, pump);
        Ok(())
    }

    /// Starts a call as the caller and returns its id.
    ///
    /// Fails with `NegotiationFailure` if the offer cannot be produced or
    /// stored; the session is then torn down and must be set up again.
    pub async fn create_call(&self) -> Result<String, CallError> {
        let shared = &self.shared;
        let (generation, transport) = shared.ready_session()?;

        let record = shared
            .store
            .create_document(&calls_collection(&shared.config))
            .await?;
        let paths = CallPaths::new(record, &shared.config);
        let call_id = paths.call_id().to_string();
        info!(call_id = %call_id, "creating call");

        shared.begin_call(generation, Role::Caller, &paths)?;

        let negotiated = async {
            let offer = transport.create_offer().await?;
            transport.set_local_description(offer.clone()).await?;
            // Both feeds exist before the offer is visible to anyone
            let answers = shared.store.subscribe_document(&paths.record).await?;
            let candidates = shared
                .store
                .subscribe_collection(&paths.answer_candidates)
                .await?;
            shared
                .store
                .set_document(&paths.record, offer_fields(&offer))
                .await?;
            Ok::<_, CallError>((answers, candidates))
        }
        .await;

        let (answers, candidates) = match negotiated {
            Ok(feeds) => feeds,
            Err(e) => {
                warn!(call_id = %call_id, "call creation failed: {}", e);
                shared.teardown(Some(generation));
                return Err(e);
            }
        };

        let weak = Arc::downgrade(shared);
        let started = shared.with_session(generation, |s| {
            s.state = Role::Caller.sent_state();
            signaling::open_outbox(&shared.store, s, paths.outbox(Role::Caller));
            s.track_task(tokio::spawn(watch_for_answer(
                weak.clone(),
                generation,
                answers,
            )));
            s.track_task(tokio::spawn(signaling::pump_remote_candidates(
                weak, generation, candidates,
            )));
        });
        if started.is_none() {
            return Err(hung_up(&call_id));
        }

        info!(call_id = %call_id, "offer sent");
        Ok(call_id)
    }

    /// Joins an existing call as the callee.
    ///
    /// Failures before the connection handle is touched (bad id, missing
    /// record, record already answered) leave the session ready for another
    /// attempt. Later failures tear it down.
    pub async fn answer_call(&self, call_id: &str) -> Result<(), CallError> {
        let call_id = normalize_call_id(call_id)
            .ok_or_else(|| CallError::InvalidArgument(call_id.to_string()))?;
        let shared = &self.shared;
        let (generation, transport) = shared.ready_session()?;

        let paths = CallPaths::for_id(call_id, &shared.config);
        let doc = shared
            .store
            .get_document(&paths.record)
            .await?
            .ok_or_else(|| CallError::CallNotFound(call_id.to_string()))?;
        let record = CallRecord::from_document(&doc).map_err(|e| {
            warn!(call_id, "unreadable call record: {}", e);
            CallError::CallNotFound(call_id.to_string())
        })?;
        let offer = record
            .offer
            .ok_or_else(|| CallError::CallNotFound(call_id.to_string()))?;
        if record.answer.is_some() {
            return Err(CallError::AlreadyAnswered(call_id.to_string()));
        }

        info!(call_id, "answering call");
        shared.begin_call(generation, Role::Callee, &paths)?;

        let negotiated = async {
            transport.set_remote_description(offer).await?;
            let early = shared
                .with_session(generation, |s| {
                    s.remote_claimed = true;
                    s.pending_remote.release()
                })
                .unwrap_or_default();
            apply_candidates(transport.as_ref(), early).await;
            let answer = transport.create_answer().await?;
            transport.set_local_description(answer.clone()).await?;
            shared
                .store
                .update_document(&paths.record, answer_fields(&answer))
                .await?;
            let candidates = shared
                .store
                .subscribe_collection(&paths.offer_candidates)
                .await?;
            Ok::<_, CallError>(candidates)
        }
        .await;

        let candidates = match negotiated {
            Ok(feed) => feed,
            Err(e) => {
                warn!(call_id, "answering failed: {}", e);
                shared.teardown(Some(generation));
                return Err(e);
            }
        };

        // Candidates go out only once the answer is on record, so a failed
        // attempt leaves nothing in the mailbox for the caller to apply
        let weak = Arc::downgrade(shared);
        let started = shared.with_session(generation, |s| {
            s.state = Role::Callee.sent_state();
            signaling::open_outbox(&shared.store, s, paths.outbox(Role::Callee));
            s.track_task(tokio::spawn(signaling::pump_remote_candidates(
                weak, generation, candidates,
            )));
        });
        if started.is_none() {
            return Err(hung_up(call_id));
        }

        info!(call_id, "answer sent");
        Ok(())
    }

    /// Closes the connection, stops local tracks and clears both stream
    /// slots. Safe to call at any time, any number of times.
    pub fn hangup(&self) {
        self.shared.teardown(None);
    }
}

impl Drop for CallNegotiator {
    fn drop(&mut self) {
        self.shared.teardown(None);
    }
}

fn hung_up(call_id: &str) -> CallError {
    CallError::NegotiationFailure(format!("call {call_id} was hung up during negotiation"))
}

async fn attach_local_tracks(
    transport: &dyn PeerTransport,
    local: &MediaStream,
) -> Result<(), CallError> {
    for track in local.tracks() {
        debug!(track = %track.id(), kind = %track.kind(), "adding local track");
        transport.add_track(track, local).await?;
    }
    Ok(())
}

/// Routes transport events into the session until it ends
async fn pump_transport_events(weak: Weak<Shared>, generation: u64, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(shared) = weak.upgrade() else {
            break;
        };

        let live = match event {
            TransportEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                let store = shared.store.clone();
                shared
                    .with_session(generation, |s| {
                        match s.route_local_candidate(candidate.clone()) {
                            Some(mailbox) => {
                                let write = signaling::publish_candidate(store, mailbox, candidate);
                                s.track_task(write);
                            }
                            None => debug!("outbox not open yet, holding local candidate"),
                        }
                    })
                    .is_some()
            }
            TransportEvent::GatheringComplete => shared
                .with_session(generation, |s| {
                    debug!("ICE candidate gathering completed");
                    analyze_candidates(&s.gathered);
                })
                .is_some(),
            TransportEvent::Track(track) => {
                match shared.with_session(generation, |s| s.remote_stream.clone()) {
                    Some(remote) => {
                        info!(track = %track.id(), kind = %track.kind(), "remote track arrived");
                        if remote.add_track(track) {
                            shared.remote_stream.touch();
                        }
                        true
                    }
                    None => false,
                }
            }
            TransportEvent::ConnectionState(state) => shared
                .with_session(generation, |s| {
                    report_connection_state(s.call_id(), state);
                    if state == ConnectionState::Connected {
                        s.state = s.state.after_connected();
                    }
                })
                .is_some(),
        };

        if !live {
            break;
        }
    }
}

/// Caller side: applies the first answer that shows up on the call record
async fn watch_for_answer(weak: Weak<Shared>, generation: u64, mut feed: DocumentFeed) {
    while let Some(snapshot) = feed.recv().await {
        let Some(doc) = snapshot else {
            continue;
        };
        let Some(shared) = weak.upgrade() else {
            break;
        };

        let answer = match CallRecord::from_document(&doc) {
            Ok(record) => record.answer,
            Err(e) => {
                warn!("ignoring call record update: {}", e);
                continue;
            }
        };
        let Some(answer) = answer else {
            continue;
        };

        let claim = shared.with_session(generation, |s| {
            if s.remote_claimed {
                None
            } else {
                s.remote_claimed = true;
                Some(s.transport.clone())
            }
        });
        let transport = match claim {
            None => break,
            Some(None) => {
                debug!(call_id = doc.id(), "answer already applied, ignoring update");
                continue;
            }
            Some(Some(transport)) => transport,
        };

        if transport.has_remote_description().await {
            debug!(call_id = doc.id(), "remote description already set");
            continue;
        }

        match transport.set_remote_description(answer).await {
            Ok(()) => {
                info!(call_id = doc.id(), "answer applied");
                let pending = shared.with_session(generation, |s| {
                    s.state = s.state.after_remote_progress();
                    s.pending_remote.release()
                });
                match pending {
                    Some(pending) => {
                        apply_candidates(transport.as_ref(), pending).await;
                    }
                    None => break,
                }
            }
            Err(e) => warn!(call_id = doc.id(), "failed to apply answer: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockMediaSource, MockNetwork};
    use crate::relay::MemoryRelayStore;

    fn negotiator(network: &MockNetwork, store: &MemoryRelayStore, name: &str) -> CallNegotiator {
        CallNegotiator::new(
            Arc::new(store.clone()),
            Arc::new(network.factory()),
            Arc::new(MockMediaSource::new(name)),
            NegotiatorConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_call_requires_media() {
        let network = MockNetwork::new();
        let store = MemoryRelayStore::new();
        let caller = negotiator(&network, &store, "a");
        assert!(matches!(
            caller.create_call().await,
            Err(CallError::NotInitialized)
        ));
        assert_eq!(caller.state(), NegotiationState::Idle);
    }

    #[tokio::test]
    async fn setup_publishes_streams() {
        let network = MockNetwork::new();
        let store = MemoryRelayStore::new();
        let caller = negotiator(&network, &store, "a");
        caller.setup_media_sources().await.unwrap();

        assert_eq!(caller.state(), NegotiationState::MediaReady);
        assert_eq!(caller.current_local_stream().map(|s| s.len()), Some(2));
        assert_eq!(caller.current_remote_stream().map(|s| s.len()), Some(0));
        assert!(caller.connection_id().is_some());
    }

    #[tokio::test]
    async fn second_setup_replaces_the_connection() {
        let network = MockNetwork::new();
        let store = MemoryRelayStore::new();
        let caller = negotiator(&network, &store, "a");
        caller.setup_media_sources().await.unwrap();
        let first = caller.connection_id().unwrap();
        let first_local = caller.current_local_stream().unwrap();

        caller.setup_media_sources().await.unwrap();
        let second = caller.connection_id().unwrap();
        assert_ne!(first, second);
        assert!(network.is_closed(&first));
        assert!(first_local
            .tracks()
            .iter()
            .all(|t| crate::mock::is_stopped(t.as_ref())));
    }

    #[tokio::test]
    async fn a_negotiator_cannot_create_two_calls_on_one_connection() {
        let network = MockNetwork::new();
        let store = MemoryRelayStore::new();
        let caller = negotiator(&network, &store, "a");
        caller.setup_media_sources().await.unwrap();
        caller.create_call().await.unwrap();
        assert!(matches!(
            caller.create_call().await,
            Err(CallError::InvalidState(NegotiationState::OfferSent))
        ));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let network = MockNetwork::new();
        let config = NegotiatorConfig {
            calls_collection: String::new(),
            ..Default::default()
        };
        let result = CallNegotiator::new(
            Arc::new(MemoryRelayStore::new()),
            Arc::new(network.factory()),
            Arc::new(MockMediaSource::new("a")),
            config,
        );
        assert!(matches!(result, Err(CallError::Config(_))));
    }
}
