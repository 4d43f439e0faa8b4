//! User-facing notices. Every state change and every surfaced error is
//! pushed here for whatever front end drives the session.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;

use huddle_net::ConnectionState;
use huddle_shared::types::{MessageId, PeerId};

use crate::call::CallState;
use crate::roster::Participant;

pub const EVENT_REGISTERED: &str = "registered";
pub const EVENT_CONNECTION_CHANGED: &str = "connection-changed";
pub const EVENT_REMOTE_RENAMED: &str = "remote-renamed";
pub const EVENT_MESSAGE_ADDED: &str = "message-added";
pub const EVENT_MESSAGE_UPDATED: &str = "message-updated";
pub const EVENT_CALL_STATE_CHANGED: &str = "call-state-changed";
pub const EVENT_SCREEN_SHARE_CHANGED: &str = "screen-share-changed";
pub const EVENT_RECORDING_CHANGED: &str = "recording-changed";
pub const EVENT_FILE_SAVED: &str = "file-saved";
pub const EVENT_ROSTER_CHANGED: &str = "roster-changed";
pub const EVENT_WARNING: &str = "warning";
pub const EVENT_ERROR: &str = "error";

/// Serializes as a flat JSON object whose `event` field is [`SessionNotice::name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionNotice {
    Registered {
        peer_id: PeerId,
        join_link: Option<String>,
    },
    ConnectionChanged {
        state: ConnectionState,
        remote: Option<PeerId>,
    },
    RemoteRenamed {
        name: String,
    },
    MessageAdded {
        id: MessageId,
    },
    MessageUpdated {
        id: MessageId,
    },
    CallStateChanged {
        state: CallState,
        remote: Option<PeerId>,
    },
    ScreenShareChanged {
        sharing: bool,
    },
    RecordingChanged {
        recording: bool,
        saved_to: Option<PathBuf>,
    },
    FileSaved {
        path: PathBuf,
    },
    RosterChanged {
        participants: Vec<Participant>,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
        guidance: Option<&'static str>,
        fatal: bool,
    },
}

impl SessionNotice {
    pub fn name(&self) -> &'static str {
        match self {
            SessionNotice::Registered { .. } => EVENT_REGISTERED,
            SessionNotice::ConnectionChanged { .. } => EVENT_CONNECTION_CHANGED,
            SessionNotice::RemoteRenamed { .. } => EVENT_REMOTE_RENAMED,
            SessionNotice::MessageAdded { .. } => EVENT_MESSAGE_ADDED,
            SessionNotice::MessageUpdated { .. } => EVENT_MESSAGE_UPDATED,
            SessionNotice::CallStateChanged { .. } => EVENT_CALL_STATE_CHANGED,
            SessionNotice::ScreenShareChanged { .. } => EVENT_SCREEN_SHARE_CHANGED,
            SessionNotice::RecordingChanged { .. } => EVENT_RECORDING_CHANGED,
            SessionNotice::FileSaved { .. } => EVENT_FILE_SAVED,
            SessionNotice::RosterChanged { .. } => EVENT_ROSTER_CHANGED,
            SessionNotice::Warning { .. } => EVENT_WARNING,
            SessionNotice::Error { .. } => EVENT_ERROR,
        }
    }

    /// JSON payload for a front end.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn emit_notice(tx: &mpsc::UnboundedSender<SessionNotice>, notice: SessionNotice) {
    let event = notice.name();
    if tx.send(notice).is_err() {
        tracing::debug!(event, "Notice receiver dropped");
    }
}
