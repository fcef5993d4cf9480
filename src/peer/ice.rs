use crate::peer::transport::PeerTransport;
use crate::peer::types::{CandidateKind, IceCandidate};
use tracing::{debug, info, warn};

/// Remote candidates received before the remote description was applied
#[derive(Debug, Default)]
pub struct PendingCandidates {
    ready: bool,
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate back if it can be applied now, otherwise
    /// queues it
    pub fn admit(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.ready {
            Some(candidate)
        } else {
            self.queue.push(candidate);
            None
        }
    }

    /// Marks the remote description as applied and drains the queue
    pub fn release(&mut self) -> Vec<IceCandidate> {
        self.ready = true;
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Adds candidates to the transport, logging and skipping failures.
/// Returns how many were accepted.
pub async fn apply_candidates(
    transport: &dyn PeerTransport,
    candidates: Vec<IceCandidate>,
) -> usize {
    let mut applied = 0;
    for candidate in candidates {
        debug!("Applying pending candidate: {}", candidate.candidate);
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!("Failed to apply pending candidate: {}", e),
        }
    }
    applied
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

/// Counts candidate types and warns when no relay candidate was gathered
pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate.kind() {
            CandidateKind::Host => summary.host += 1,
            CandidateKind::ServerReflexive => summary.srflx += 1,
            CandidateKind::Relay => summary.relay += 1,
            CandidateKind::PeerReflexive | CandidateKind::Unknown => summary.other += 1,
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        warn!("No TURN relay candidates found, connection through NAT may fail");
    }
    summary
}
