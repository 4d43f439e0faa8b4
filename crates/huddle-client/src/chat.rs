//! The chat log and its wire protocol.
//!
//! Local changes are applied to the log first and return the envelope that
//! carries the same change to the peer. Message ids are created by the
//! author and never change, so nothing needs reconciling afterwards.
//!
//! Inbound envelopes go through [`ChatLog::receive`]. Anything malformed or
//! out of contract comes back as a [`ProtocolError`] and leaves the log
//! untouched.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use huddle_shared::error::ProtocolError;
use huddle_shared::protocol::{Envelope, Reaction};
use huddle_shared::types::{MessageId, Sender};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyText,

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("Only the author can change message {0}")]
    NotAuthor(MessageId),

    #[error("Message {0} was deleted")]
    Deleted(MessageId),

    #[error("File is {size} bytes, the limit is {max} bytes")]
    FileTooLarge { size: u64, max: usize },

    #[error("Message {0} has no attachment")]
    NoAttachment(MessageId),

    #[error("Message {0} is a local notice")]
    LocalOnly(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    File,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub file: Option<FileAttachment>,
    pub reactions: Vec<Reaction>,
    pub is_edited: bool,
    pub is_deleted: bool,
}

impl ChatMessage {
    fn new(id: MessageId, sender: Sender, kind: MessageKind) -> Self {
        Self {
            id,
            sender,
            timestamp: Utc::now(),
            kind,
            text: None,
            file: None,
            reactions: Vec::new(),
            is_edited: false,
            is_deleted: false,
        }
    }
}

/// What an inbound envelope did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The peer announced a display name.
    Renamed(String),
    /// A new peer message was appended.
    Appended(MessageId),
    /// An existing message changed.
    Updated(MessageId),
    /// Valid, but nothing to do.
    Unchanged,
}

#[derive(Debug)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    max_file_size: usize,
}

impl ChatLog {
    pub fn new(max_file_size: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_file_size,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == *id)
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == *id)
    }

    // -- Local changes --

    /// Append a text message. Blank text is refused.
    pub fn send_text(&mut self, text: &str) -> Result<(MessageId, Envelope), ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyText);
        }
        let id = MessageId::generate();
        let mut message = ChatMessage::new(id.clone(), Sender::SelfPeer, MessageKind::Text);
        message.text = Some(text.to_string());
        self.messages.push(message);
        debug!(id = %id, "Text message appended");
        let envelope = Envelope::Message {
            id: id.clone(),
            text: text.to_string(),
        };
        Ok((id, envelope))
    }

    /// Append a file message. The whole file travels in one envelope, so
    /// anything over the size limit is refused here.
    pub fn send_file(
        &mut self,
        name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<(MessageId, Envelope), ChatError> {
        if data.len() > self.max_file_size {
            return Err(ChatError::FileTooLarge {
                size: data.len() as u64,
                max: self.max_file_size,
            });
        }
        let id = MessageId::generate();
        let envelope = Envelope::File {
            id: id.clone(),
            file_name: name.to_string(),
            file_size: data.len() as u64,
            file_type: mime_type.to_string(),
            data: data.to_vec(),
        };
        let mut message = ChatMessage::new(id.clone(), Sender::SelfPeer, MessageKind::File);
        message.file = Some(FileAttachment {
            name: name.to_string(),
            size: data.len() as u64,
            mime_type: mime_type.to_string(),
            data,
        });
        self.messages.push(message);
        debug!(id = %id, file = %name, "File message appended");
        Ok((id, envelope))
    }

    /// Toggle our reaction on a message. Returns the full resulting list.
    pub fn toggle_reaction(&mut self, id: &MessageId, emoji: &str) -> Result<Envelope, ChatError> {
        let message = self.live_mut(id)?;
        if message.kind == MessageKind::System {
            return Err(ChatError::LocalOnly(id.clone()));
        }
        toggle(&mut message.reactions, Sender::SelfPeer, emoji);
        Ok(Envelope::Reaction {
            message_id: id.clone(),
            reactions: message.reactions.clone(),
        })
    }

    /// Replace the text of one of our messages.
    pub fn edit(&mut self, id: &MessageId, text: &str) -> Result<Envelope, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyText);
        }
        let message = self.live_mut(id)?;
        if message.sender != Sender::SelfPeer || message.kind != MessageKind::Text {
            return Err(ChatError::NotAuthor(id.clone()));
        }
        message.text = Some(text.to_string());
        message.is_edited = true;
        Ok(Envelope::Edit {
            message_id: id.clone(),
            text: text.to_string(),
        })
    }

    /// Tombstone one of our messages. `None` when it already was one.
    pub fn delete(&mut self, id: &MessageId) -> Result<Option<Envelope>, ChatError> {
        let message = self
            .get_mut(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.clone()))?;
        if message.sender != Sender::SelfPeer || message.kind == MessageKind::System {
            return Err(ChatError::NotAuthor(id.clone()));
        }
        if !tombstone(message) {
            return Ok(None);
        }
        Ok(Some(Envelope::Delete {
            message_id: id.clone(),
        }))
    }

    /// Local-only notice. Never transmitted.
    pub fn push_system(&mut self, text: impl Into<String>) -> MessageId {
        let id = MessageId::generate();
        let mut message = ChatMessage::new(id.clone(), Sender::SelfPeer, MessageKind::System);
        message.text = Some(text.into());
        self.messages.push(message);
        id
    }

    pub fn attachment(&self, id: &MessageId) -> Result<&FileAttachment, ChatError> {
        let message = self
            .get(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.clone()))?;
        message
            .file
            .as_ref()
            .ok_or_else(|| ChatError::NoAttachment(id.clone()))
    }

    fn live_mut(&mut self, id: &MessageId) -> Result<&mut ChatMessage, ChatError> {
        let message = self
            .get_mut(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.clone()))?;
        if message.is_deleted {
            return Err(ChatError::Deleted(id.clone()));
        }
        Ok(message)
    }

    // -- Inbound --

    /// Decode one frame and apply it.
    pub fn receive(&mut self, payload: &str) -> Result<Inbound, ProtocolError> {
        let envelope = Envelope::from_json(payload)?;
        debug!(kind = envelope.kind(), "Envelope received");
        self.apply(envelope)
    }

    pub fn apply(&mut self, envelope: Envelope) -> Result<Inbound, ProtocolError> {
        match envelope {
            Envelope::Name { name } => Ok(Inbound::Renamed(name)),

            Envelope::Message { id, text } => {
                self.ensure_new(&id)?;
                let mut message = ChatMessage::new(id.clone(), Sender::Peer, MessageKind::Text);
                message.text = Some(text);
                self.messages.push(message);
                Ok(Inbound::Appended(id))
            }

            Envelope::File {
                id,
                file_name,
                file_size,
                file_type,
                data,
            } => {
                self.ensure_new(&id)?;
                if data.len() as u64 != file_size {
                    warn!(
                        id = %id,
                        declared = file_size,
                        actual = data.len(),
                        "File size mismatch, using received length"
                    );
                }
                let mut message = ChatMessage::new(id.clone(), Sender::Peer, MessageKind::File);
                message.file = Some(FileAttachment {
                    name: file_name,
                    size: data.len() as u64,
                    mime_type: file_type,
                    data: Bytes::from(data),
                });
                self.messages.push(message);
                Ok(Inbound::Appended(id))
            }

            Envelope::Reaction {
                message_id,
                reactions,
            } => {
                let message = self.target_mut(&message_id)?;
                if message.is_deleted {
                    debug!(id = %message_id, "Reaction on deleted message ignored");
                    return Ok(Inbound::Unchanged);
                }
                message.reactions = from_peer_view(reactions);
                Ok(Inbound::Updated(message_id))
            }

            Envelope::Edit { message_id, text } => {
                let message = self.peer_authored_mut(&message_id)?;
                if message.is_deleted || message.kind != MessageKind::Text {
                    debug!(id = %message_id, "Edit of deleted or non-text message ignored");
                    return Ok(Inbound::Unchanged);
                }
                message.text = Some(text);
                message.is_edited = true;
                Ok(Inbound::Updated(message_id))
            }

            Envelope::Delete { message_id } => {
                let message = self.peer_authored_mut(&message_id)?;
                if tombstone(message) {
                    Ok(Inbound::Updated(message_id))
                } else {
                    Ok(Inbound::Unchanged)
                }
            }
        }
    }

    fn ensure_new(&self, id: &MessageId) -> Result<(), ProtocolError> {
        if self.get(id).is_some() {
            return Err(ProtocolError::Duplicate(id.to_string()));
        }
        Ok(())
    }

    fn target_mut(&mut self, id: &MessageId) -> Result<&mut ChatMessage, ProtocolError> {
        self.get_mut(id)
            .ok_or_else(|| ProtocolError::UnknownMessage(id.to_string()))
    }

    fn peer_authored_mut(&mut self, id: &MessageId) -> Result<&mut ChatMessage, ProtocolError> {
        let message = self.target_mut(id)?;
        if message.sender != Sender::Peer {
            return Err(ProtocolError::NotAuthor(id.to_string()));
        }
        Ok(message)
    }
}

/// Toggle `sender`'s reaction: same emoji removes it, another emoji replaces
/// it, none yet appends it.
pub fn toggle(reactions: &mut Vec<Reaction>, sender: Sender, emoji: &str) {
    match reactions.iter().position(|r| r.sender == sender) {
        Some(i) if reactions[i].emoji == emoji => {
            reactions.remove(i);
        }
        Some(i) => reactions[i].emoji = emoji.to_string(),
        None => reactions.push(Reaction {
            emoji: emoji.to_string(),
            sender,
        }),
    }
}

/// A list as the peer sent it, rewritten to our point of view with at most
/// one entry per sender (last one wins).
fn from_peer_view(reactions: Vec<Reaction>) -> Vec<Reaction> {
    let mut out: Vec<Reaction> = Vec::with_capacity(reactions.len());
    for reaction in reactions {
        let sender = reaction.sender.flipped();
        match out.iter_mut().find(|r| r.sender == sender) {
            Some(existing) => existing.emoji = reaction.emoji,
            None => out.push(Reaction {
                emoji: reaction.emoji,
                sender,
            }),
        }
    }
    out
}

/// Clear content and mark deleted. Returns `false` if already a tombstone.
fn tombstone(message: &mut ChatMessage) -> bool {
    if message.is_deleted {
        return false;
    }
    message.text = None;
    message.file = None;
    message.is_deleted = true;
    true
}
