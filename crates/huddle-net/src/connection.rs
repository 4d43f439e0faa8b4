//! The single direct connection to a remote participant.
//!
//! At most one [`Connection`] exists at a time. The manager owns its channel
//! handle exclusively and is the only place that tears it down.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use huddle_shared::error::TransportError;
use huddle_shared::types::{ChannelId, PeerId};

use crate::transport::{ChannelEvent, DataTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub remote_id: PeerId,
    pub channel: ChannelId,
    pub state: ConnectionState,
    /// Whether the remote side initiated this connection.
    pub inbound: bool,
}

/// What a channel event meant for the active connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// An inbound connection was adopted and is waiting for `Open`.
    Accepted { remote: PeerId },
    /// An inbound connection was turned away because we are busy.
    Refused { remote: PeerId },
    /// The connection is ready; announce ourselves.
    Opened { remote: PeerId },
    /// A frame for the chat dispatcher.
    Data(String),
    /// The connection closed.
    Closed { remote: PeerId },
    /// Opening failed or the connection broke.
    Failed { remote: PeerId, error: TransportError },
    /// Event for a channel that is not (or no longer) ours.
    Ignored,
}

pub struct ConnectionManager {
    transport: Arc<dyn DataTransport>,
    connection: Option<Connection>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn DataTransport>) -> Self {
        Self {
            transport,
            connection: None,
        }
    }

    /// Open a reliable ordered channel to `remote`, replacing whatever
    /// connection we had. No retry on failure.
    pub fn connect_to(&mut self, remote: &PeerId) -> Result<(), TransportError> {
        if let Some(existing) = &self.connection {
            if existing.remote_id == *remote && existing.state != ConnectionState::Closed {
                debug!(remote = %remote.short(), "Already connected or connecting");
                return Ok(());
            }
        }
        self.close();

        info!(remote = %remote.short(), "Opening connection");
        let channel = self.transport.open_channel(remote).map_err(|e| {
            warn!(remote = %remote.short(), error = %e, "Failed to open channel");
            e
        })?;

        self.connection = Some(Connection {
            remote_id: remote.clone(),
            channel,
            state: ConnectionState::Connecting,
            inbound: false,
        });
        Ok(())
    }

    /// Fold one substrate event into the connection state.
    pub fn handle_event(&mut self, event: ChannelEvent) -> ConnectionUpdate {
        match event {
            ChannelEvent::Inbound { channel, remote } => self.accept(channel, remote),
            ChannelEvent::Open { channel } => match self.active_mut(&channel) {
                Some(conn) => {
                    conn.state = ConnectionState::Open;
                    info!(remote = %conn.remote_id.short(), inbound = conn.inbound, "Connection open");
                    ConnectionUpdate::Opened {
                        remote: conn.remote_id.clone(),
                    }
                }
                None => Self::stale(&channel),
            },
            ChannelEvent::Data { channel, payload } => match self.active_mut(&channel) {
                Some(conn) if conn.state == ConnectionState::Open => ConnectionUpdate::Data(payload),
                Some(_) => {
                    warn!(channel = %channel, "Data before open, dropping");
                    ConnectionUpdate::Ignored
                }
                None => Self::stale(&channel),
            },
            ChannelEvent::Closed { channel } => match self.take_active(&channel) {
                Some(conn) => {
                    info!(remote = %conn.remote_id.short(), "Connection closed");
                    ConnectionUpdate::Closed {
                        remote: conn.remote_id,
                    }
                }
                None => Self::stale(&channel),
            },
            ChannelEvent::Failed { channel, reason } => match self.take_active(&channel) {
                Some(conn) => {
                    self.transport.close_channel(&conn.channel);
                    warn!(remote = %conn.remote_id.short(), reason = %reason, "Connection failed");
                    let error = match conn.state {
                        ConnectionState::Open => TransportError::Dropped(reason),
                        _ => TransportError::PeerUnavailable(reason),
                    };
                    ConnectionUpdate::Failed {
                        remote: conn.remote_id,
                        error,
                    }
                }
                None => Self::stale(&channel),
            },
        }
    }

    fn accept(&mut self, channel: ChannelId, remote: PeerId) -> ConnectionUpdate {
        if let Some(existing) = &self.connection {
            if existing.remote_id != remote {
                warn!(
                    remote = %remote.short(),
                    current = %existing.remote_id.short(),
                    "Refusing inbound connection while busy"
                );
                self.transport.close_channel(&channel);
                return ConnectionUpdate::Refused { remote };
            }
            debug!(remote = %remote.short(), "Same peer reconnected, replacing channel");
            self.transport.close_channel(&existing.channel);
        }

        info!(remote = %remote.short(), "Accepting inbound connection");
        self.connection = Some(Connection {
            remote_id: remote.clone(),
            channel,
            state: ConnectionState::Connecting,
            inbound: true,
        });
        ConnectionUpdate::Accepted { remote }
    }

    /// Send one frame. Fails unless the connection is open.
    pub fn send(&self, payload: &str) -> Result<(), TransportError> {
        match &self.connection {
            Some(conn) if conn.state == ConnectionState::Open => {
                self.transport.send(&conn.channel, payload)
            }
            _ => Err(TransportError::NotConnected),
        }
    }

    /// Tear the connection down. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.transport.close_channel(&conn.channel);
            info!(remote = %conn.remote_id.short(), "Connection closed locally");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn remote_id(&self) -> Option<&PeerId> {
        self.connection.as_ref().map(|c| &c.remote_id)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    fn active_mut(&mut self, channel: &ChannelId) -> Option<&mut Connection> {
        self.connection.as_mut().filter(|c| c.channel == *channel)
    }

    fn take_active(&mut self, channel: &ChannelId) -> Option<Connection> {
        if self.connection.as_ref().is_some_and(|c| c.channel == *channel) {
            self.connection.take()
        } else {
            None
        }
    }

    fn stale(channel: &ChannelId) -> ConnectionUpdate {
        debug!(channel = %channel, "Event for inactive channel");
        ConnectionUpdate::Ignored
    }
}
