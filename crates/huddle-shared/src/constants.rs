/// Application name
pub const APP_NAME: &str = "Huddle";

/// Query parameter carrying the host's peer id in a join link
pub const ROOM_QUERY_PARAM: &str = "room";

/// Default join link base
pub const DEFAULT_LINK_BASE: &str = "http://localhost:5173/video-call";

/// Remote display name until the peer announces one
pub const DEFAULT_REMOTE_NAME: &str = "Peer";

/// Prefix of generated local display names
pub const DEFAULT_NAME_PREFIX: &str = "Participant";

/// Maximum file transfer size in bytes (50 MiB). Files travel as one envelope.
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Public STUN servers handed to the transport
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Recorder container preferences
pub const RECORDING_MIME_PREFERRED: &str = "video/webm; codecs=vp9";
pub const RECORDING_MIME_FALLBACK: &str = "video/webm";

/// Recorder chunk interval in milliseconds
pub const RECORDING_TIMESLICE_MS: u64 = 1000;

/// Prefix of saved recording artifacts
pub const RECORDING_FILE_PREFIX: &str = "video-call";
