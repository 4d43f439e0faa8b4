//! Seam to the peer-to-peer substrate that provides peer registration and
//! reliable, ordered data channels.
//!
//! The substrate is driven through [`DataTransport`] and reports back by
//! pushing [`ChannelEvent`]s into the session's event queue. Delivery on a
//! single channel is in send order; the chat protocol relies on that.

use async_trait::async_trait;

use huddle_shared::error::TransportError;
use huddle_shared::types::{ChannelId, PeerId};

#[async_trait]
pub trait DataTransport: Send + Sync {
    /// Register with the broker and obtain the local peer id.
    async fn register(&self) -> Result<PeerId, TransportError>;

    /// Start opening a reliable ordered channel to `remote`. The outcome
    /// arrives later as [`ChannelEvent::Open`] or [`ChannelEvent::Failed`].
    fn open_channel(&self, remote: &PeerId) -> Result<ChannelId, TransportError>;

    /// Send one text frame on an open channel.
    fn send(&self, channel: &ChannelId, payload: &str) -> Result<(), TransportError>;

    /// Tear the channel down. Unknown or already-closed channels are ignored.
    fn close_channel(&self, channel: &ChannelId);
}

/// Notifications sent *from* the substrate about data channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A remote peer opened a channel to us.
    Inbound { channel: ChannelId, remote: PeerId },
    /// The channel is ready for traffic.
    Open { channel: ChannelId },
    /// One frame, in send order.
    Data { channel: ChannelId, payload: String },
    /// The channel closed (either side).
    Closed { channel: ChannelId },
    /// The channel failed to open or broke.
    Failed { channel: ChannelId, reason: String },
}

impl ChannelEvent {
    pub fn channel(&self) -> &ChannelId {
        match self {
            ChannelEvent::Inbound { channel, .. }
            | ChannelEvent::Open { channel }
            | ChannelEvent::Data { channel, .. }
            | ChannelEvent::Closed { channel }
            | ChannelEvent::Failed { channel, .. } => channel,
        }
    }
}
