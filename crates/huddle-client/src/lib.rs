pub mod call;
pub mod chat;
pub mod config;
pub mod downloads;
pub mod error;
pub mod events;
pub mod identity;
pub mod loopback;
pub mod roster;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use call::{CallController, CallError, CallState, CallSummary, MediaPurpose, MediaTicket};
pub use chat::{ChatError, ChatLog, ChatMessage, FileAttachment, MessageKind};
pub use config::SessionConfig;
pub use error::SessionError;
pub use events::SessionNotice;
pub use identity::{NameStore, PeerIdentity};
pub use roster::{Avatar, Participant};
pub use session::{Session, SessionCommand, SessionEvent, Substrate};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("huddle_client=debug,huddle_net=debug,huddle_media=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
