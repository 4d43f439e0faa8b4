//! Seam to the substrate's media-call side: placing, answering and closing
//! calls, and swapping the track a sender transmits.

use huddle_shared::error::TransportError;
use huddle_shared::types::{CallId, PeerId};

use crate::stream::{MediaStream, MediaTrack};

pub trait CallTransport: Send + Sync {
    /// Place a call carrying `local`. The remote stream arrives later as
    /// [`CallSignal::RemoteStream`].
    fn place_call(&self, remote: &PeerId, local: &MediaStream) -> Result<CallId, TransportError>;

    /// Answer an inbound call with `local`.
    fn answer_call(&self, call: &CallId, local: &MediaStream) -> Result<(), TransportError>;

    /// Hang up or refuse. Unknown calls are ignored.
    fn close_call(&self, call: &CallId);

    /// Swap the outgoing track of the same kind in place, on the same
    /// transceiver, without a renegotiation round.
    fn replace_track(&self, call: &CallId, track: &MediaTrack) -> Result<(), TransportError>;
}

/// Notifications sent *from* the substrate about calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSignal {
    /// A remote peer is calling us.
    Incoming { call: CallId, remote: PeerId },
    /// The remote side's media arrived.
    RemoteStream { call: CallId, stream: MediaStream },
    /// The call was closed (either side).
    Closed { call: CallId },
    /// The call broke.
    Failed { call: CallId, reason: String },
}

impl CallSignal {
    pub fn call(&self) -> &CallId {
        match self {
            CallSignal::Incoming { call, .. }
            | CallSignal::RemoteStream { call, .. }
            | CallSignal::Closed { call }
            | CallSignal::Failed { call, .. } => call,
        }
    }
}
