use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{MessageId, Sender};

/// Every envelope exchanged over the data channel. JSON, discriminated by
/// `type`; both ends depend on these exact field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Sender's current display name.
    Name { name: String },

    /// New text message.
    Message { id: MessageId, text: String },

    /// Full reaction list of a message after a toggle (not a delta).
    #[serde(rename_all = "camelCase")]
    Reaction {
        message_id: MessageId,
        reactions: Vec<Reaction>,
    },

    /// Replacement text for an existing message.
    #[serde(rename_all = "camelCase")]
    Edit { message_id: MessageId, text: String },

    /// Tombstone an existing message.
    #[serde(rename_all = "camelCase")]
    Delete { message_id: MessageId },

    /// Whole file in one envelope. `data` travels as a JSON array of bytes.
    #[serde(rename_all = "camelCase")]
    File {
        id: MessageId,
        file_name: String,
        file_size: u64,
        file_type: String,
        data: Vec<u8>,
    },
}

/// One reaction. `sender` is relative to whoever holds the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub sender: Sender,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Name { .. } => "name",
            Envelope::Message { .. } => "message",
            Envelope::Reaction { .. } => "reaction",
            Envelope::Edit { .. } => "edit",
            Envelope::Delete { .. } => "delete",
            Envelope::File { .. } => "file",
        }
    }
}
