use thiserror::Error;

/// Connection-level failures. Never fatal: the attempt is aborted and the
/// session stays usable for a new one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Not connected to a peer")]
    NotConnected,

    #[error("Connection dropped: {0}")]
    Dropped(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Call signaling failed: {0}")]
    Signaling(String),
}

/// Malformed or out-of-contract inbound envelope. Dropped and logged.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Peer may not modify message {0}")]
    NotAuthor(String),

    #[error("Duplicate message id: {0}")]
    Duplicate(String),
}

/// Identity problems. Only `RegistrationFailed` is fatal; name problems
/// are reported and the old name is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Peer registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Display name must not be empty")]
    EmptyName,

    #[error("Name store error: {0}")]
    NameStore(String),
}
