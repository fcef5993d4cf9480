use thiserror::Error;

use crate::peer::state::NegotiationState;

/// Errors surfaced by the call negotiator's public operations
#[derive(Debug, Error)]
pub enum CallError {
    /// The operation needs a connection handle and none is open
    #[error("peer connection not initialized")]
    NotInitialized,

    #[error("invalid call id: {0}")]
    InvalidArgument(String),

    /// The call record, or its offer, does not exist
    #[error("call not found: {0}")]
    CallNotFound(String),

    /// The call record already carries an answer
    #[error("call {0} has already been answered")]
    AlreadyAnswered(String),

    #[error("operation not allowed while {0}")]
    InvalidState(NegotiationState),

    /// A store or transport step of the offer/answer sequence was rejected
    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("media unavailable: {0}")]
    MediaUnavailable(#[from] MediaError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<StoreError> for CallError {
    fn from(e: StoreError) -> Self {
        CallError::NegotiationFailure(e.to_string())
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        CallError::NegotiationFailure(e.to_string())
    }
}

/// Errors from the relay store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("malformed document {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Errors from the peer transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("session description rejected: {0}")]
    Description(String),
    #[error("ice candidate rejected: {0}")]
    Candidate(String),
    #[error("track not supported by this transport: {0}")]
    UnsupportedTrack(String),
    #[error("connection closed")]
    Closed,
}

/// Errors from the media capture collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("permission denied")]
    PermissionDenied,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ice server {0}: url cannot be empty")]
    EmptyUrl(String),
    #[error("ice server {0}: turn servers require username and credential")]
    MissingTurnCredentials(String),
    #[error("collection name cannot be empty or contain '/': {0:?}")]
    BadCollection(String),
    #[error("parse error: {0}")]
    Parse(String),
}
