use std::fmt;

/// Where a negotiator sits in the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    /// No connection handle
    #[default]
    Idle,
    /// Local media attached to a fresh connection handle
    MediaReady,
    /// Caller: offer persisted, waiting for an answer
    OfferSent,
    /// Callee: answer persisted, waiting for remote candidates
    AnswerSent,
    /// Both descriptions applied, candidates flowing
    Negotiating,
    /// Reported by the transport
    Connected,
}

/// Which side of the call this negotiator plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

impl NegotiationState {
    /// Whether a call can be started or joined from this state
    pub fn accepts_call(self) -> bool {
        self == NegotiationState::MediaReady
    }

    /// State after the remote side's description (caller) or first remote
    /// candidate (callee) has been applied
    pub fn after_remote_progress(self) -> Self {
        match self {
            NegotiationState::OfferSent | NegotiationState::AnswerSent => {
                NegotiationState::Negotiating
            }
            other => other,
        }
    }

    /// State after the transport reported connectivity
    pub fn after_connected(self) -> Self {
        match self {
            NegotiationState::Idle | NegotiationState::MediaReady => self,
            _ => NegotiationState::Connected,
        }
    }
}

impl Role {
    pub fn sent_state(self) -> NegotiationState {
        match self {
            Role::Caller => NegotiationState::OfferSent,
            Role::Callee => NegotiationState::AnswerSent,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::MediaReady => "media ready",
            NegotiationState::OfferSent => "offer sent",
            NegotiationState::AnswerSent => "answer sent",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Connected => "connected",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => f.write_str("caller"),
            Role::Callee => f.write_str("callee"),
        }
    }
}
