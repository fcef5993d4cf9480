//! Candidate mailboxes
//!
//! Local candidates are appended to this side's mailbox one write at a time,
//! without waiting and without retry. The other side's mailbox is consumed
//! as a change feed; entries are de-duplicated by document id, so a store
//! that replays existing entries on subscription is handled the same as one
//! that only reports new ones.

use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::call::{candidate_fields, candidate_from_document};
use crate::logger::dump_candidate;
use crate::negotiator::Shared;
use crate::peer::transport::PeerTransport;
use crate::peer::types::IceCandidate;
use crate::relay::{ChangeFeed, ChangeKind, CollectionPath, RelayStore};
use crate::session::CallSession;

/// Appends one local candidate to `mailbox` in the background.
/// A failed write is logged and the candidate is lost. The returned handle
/// belongs to the session so hangup can cancel writes still in flight.
pub fn publish_candidate(
    store: Arc<dyn RelayStore>,
    mailbox: CollectionPath,
    candidate: IceCandidate,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match store
            .add_document(&mailbox, candidate_fields(&candidate))
            .await
        {
            Ok(entry) => debug!(entry = %entry, "published local candidate"),
            Err(e) => warn!(mailbox = %mailbox, "dropping local candidate: {}", e),
        }
    })
}

/// Points the session's local candidates at `mailbox` and publishes the ones
/// held back so far
pub(crate) fn open_outbox(
    store: &Arc<dyn RelayStore>,
    session: &mut CallSession,
    mailbox: &CollectionPath,
) {
    for candidate in session.open_outbox(mailbox.clone()) {
        let write = publish_candidate(store.clone(), mailbox.clone(), candidate);
        session.track_task(write);
    }
}

enum Admission {
    Duplicate,
    Queued,
    Apply(Arc<dyn PeerTransport>, IceCandidate),
}

/// Feeds the remote mailbox into the transport until the session ends
pub(crate) async fn pump_remote_candidates(
    weak: Weak<Shared>,
    generation: u64,
    mut feed: ChangeFeed,
) {
    while let Some(change) = feed.recv().await {
        if change.kind != ChangeKind::Added {
            continue;
        }
        let Some(shared) = weak.upgrade() else {
            break;
        };

        let candidate = match candidate_from_document(&change.doc) {
            Ok(c) => c,
            Err(e) => {
                warn!("skipping mailbox entry: {}", e);
                continue;
            }
        };
        dump_candidate("REMOTE", &candidate);

        let entry_id = change.doc.id();
        let admission = shared.with_session(generation, |s| {
            if !s.first_sighting(entry_id) {
                return Admission::Duplicate;
            }
            match s.pending_remote.admit(candidate) {
                Some(c) => Admission::Apply(s.transport.clone(), c),
                None => Admission::Queued,
            }
        });

        let (transport, candidate) = match admission {
            None => break,
            Some(Admission::Duplicate) => {
                debug!(entry = entry_id, "ignoring duplicate mailbox entry");
                continue;
            }
            Some(Admission::Queued) => {
                debug!("Remote description not set yet, queuing candidate");
                continue;
            }
            Some(Admission::Apply(transport, candidate)) => (transport, candidate),
        };

        match transport.add_ice_candidate(candidate).await {
            Ok(()) => {
                shared.with_session(generation, |s| {
                    s.state = s.state.after_remote_progress();
                });
            }
            Err(e) => warn!("Failed to add ICE candidate: {}", e),
        }
    }
}
