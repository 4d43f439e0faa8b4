// Direct peer connection layer: the data-channel seam and its lifecycle.

pub mod connection;
pub mod transport;

pub use connection::{Connection, ConnectionManager, ConnectionState, ConnectionUpdate};
pub use transport::{ChannelEvent, DataTransport};
