use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::call::CallPaths;
use crate::media::MediaStream;
use crate::peer::ice::PendingCandidates;
use crate::peer::state::{NegotiationState, Role};
use crate::peer::transport::PeerTransport;
use crate::peer::types::IceCandidate;
use crate::relay::CollectionPath;

/// Everything one negotiator owns between `setup_media_sources` and `hangup`
pub struct CallSession {
    /// Distinguishes this session from earlier ones so stale tasks can tell
    /// they outlived it
    pub generation: u64,
    pub transport: Arc<dyn PeerTransport>,
    pub local_stream: Arc<MediaStream>,
    pub remote_stream: Arc<MediaStream>,
    pub state: NegotiationState,
    pub role: Option<Role>,
    pub call: Option<CallPaths>,
    /// Mailbox local candidates are appended to, once this side's
    /// description is on record
    pub outbox: Option<CollectionPath>,
    /// Local candidates gathered before the outbox was known
    pub unsent: Vec<IceCandidate>,
    /// Every local candidate gathered so far
    pub gathered: Vec<IceCandidate>,
    /// Remote candidates waiting for the remote description
    pub pending_remote: PendingCandidates,
    /// Set once the remote description has been claimed for application
    pub remote_claimed: bool,
    /// Mailbox entry ids already handled
    pub seen_remote: HashSet<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl CallSession {
    pub fn new(
        generation: u64,
        transport: Arc<dyn PeerTransport>,
        local_stream: Arc<MediaStream>,
        remote_stream: Arc<MediaStream>,
    ) -> Self {
        Self {
            generation,
            transport,
            local_stream,
            remote_stream,
            state: NegotiationState::MediaReady,
            role: None,
            call: None,
            outbox: None,
            unsent: Vec::new(),
            gathered: Vec::new(),
            pending_remote: PendingCandidates::new(),
            remote_claimed: false,
            seen_remote: HashSet::new(),
            tasks: Vec::new(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call.as_ref().map(|c| c.call_id())
    }

    /// Ties a background task to this session's lifetime
    pub fn track_task(&mut self, handle: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(handle);
    }

    /// Directs local candidates to `mailbox` and returns the ones gathered
    /// before it was known
    pub fn open_outbox(&mut self, mailbox: CollectionPath) -> Vec<IceCandidate> {
        self.outbox = Some(mailbox);
        std::mem::take(&mut self.unsent)
    }

    /// Records a gathered candidate; returns the mailbox to publish it to,
    /// or `None` if it was buffered
    pub fn route_local_candidate(&mut self, candidate: IceCandidate) -> Option<CollectionPath> {
        self.gathered.push(candidate.clone());
        match &self.outbox {
            Some(mailbox) => Some(mailbox.clone()),
            None => {
                self.unsent.push(candidate);
                None
            }
        }
    }

    /// Marks a mailbox entry as handled; false if it was seen before
    pub fn first_sighting(&mut self, entry_id: &str) -> bool {
        self.seen_remote.insert(entry_id.to_string())
    }

    /// Aborts background tasks, closes the connection and stops local
    /// tracks. Never fails.
    pub fn shutdown(mut self) {
        debug!(
            generation = self.generation,
            tasks = self.tasks.len(),
            "shutting down call session"
        );
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.transport.close();
        self.local_stream.stop_all();
    }
}
