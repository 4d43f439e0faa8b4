use thiserror::Error;

use huddle_media::{MediaError, NegotiationError, RecordingError};
use huddle_shared::error::{IdentityError, ProtocolError, TransportError};
use huddle_shared::invite::InviteError;

use crate::call::CallError;
use crate::chat::ChatError;

const PERMISSION_GUIDANCE: &str =
    "Allow camera, microphone and screen access for this app in your system settings, then try again.";
const DEVICE_GUIDANCE: &str = "Connect a camera and microphone, then try again.";

/// Everything a session operation can fail with. Only a failed registration
/// stops the session; the rest are reported and the session carries on.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Device unavailable: {0}")]
    Device(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Call(CallError),

    #[error(transparent)]
    Invite(#[from] InviteError),

    #[error("Cannot connect to yourself")]
    SelfConnect,

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for SessionError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::PermissionDenied(what) => SessionError::Permission(what),
            MediaError::NoDevice(what) => SessionError::Device(what),
            other => SessionError::Call(CallError::Media(other)),
        }
    }
}

impl From<CallError> for SessionError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Media(e) => e.into(),
            CallError::Transport(e) | CallError::Negotiation(NegotiationError::Transport(e)) => {
                SessionError::Transport(e)
            }
            other => SessionError::Call(other),
        }
    }
}

impl From<RecordingError> for SessionError {
    fn from(e: RecordingError) -> Self {
        SessionError::Call(CallError::Recording(e))
    }
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Identity(IdentityError::RegistrationFailed(_))
        )
    }

    /// What the user can do about it, when there is something.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            SessionError::Permission(_) => Some(PERMISSION_GUIDANCE),
            SessionError::Device(_) => Some(DEVICE_GUIDANCE),
            _ => None,
        }
    }
}
