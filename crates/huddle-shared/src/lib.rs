pub mod constants;
pub mod error;
pub mod format;
pub mod invite;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, ProtocolError, TransportError};
pub use protocol::{Envelope, Reaction};
pub use types::{CallId, ChannelId, MessageId, PeerId, Sender};
