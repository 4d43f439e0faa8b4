//! Session configuration loaded from environment variables.
//!
//! Every setting has a default so a session can start with zero
//! configuration.

use std::path::PathBuf;

use directories::{ProjectDirs, UserDirs};

use huddle_media::MediaConstraints;
use huddle_shared::constants::{DEFAULT_ICE_SERVERS, DEFAULT_LINK_BASE, MAX_FILE_SIZE};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name to use instead of the stored or generated one.
    /// Env: `HUDDLE_DISPLAY_NAME`
    pub display_name: Option<String>,

    /// Join link opened at startup. Its `room` is dialed once the local id
    /// is known.
    /// Env: `HUDDLE_JOIN_LINK`
    pub join_link: Option<String>,

    /// Base URL of generated join links.
    /// Env: `HUDDLE_LINK_BASE`
    /// Default: `http://localhost:5173/video-call`
    pub link_base: String,

    /// Where received files and recordings are saved.
    /// Env: `HUDDLE_DOWNLOAD_DIR`
    /// Default: the user's download folder, else `./downloads`.
    pub download_dir: PathBuf,

    /// STUN/TURN servers handed to the transport.
    /// Env: `HUDDLE_ICE_SERVERS` (comma separated)
    pub ice_servers: Vec<String>,

    /// Largest file accepted for transfer, in bytes.
    /// Env: `HUDDLE_MAX_FILE_SIZE`
    /// Default: 50 MiB
    pub max_file_size: usize,

    /// Camera and microphone capture settings.
    /// Env: `HUDDLE_VIDEO_WIDTH`, `HUDDLE_VIDEO_HEIGHT`
    pub constraints: MediaConstraints,

    /// File holding the chosen display name. `None` disables persistence.
    pub name_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            join_link: None,
            link_base: DEFAULT_LINK_BASE.to_string(),
            download_dir: default_download_dir(),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            max_file_size: MAX_FILE_SIZE,
            constraints: MediaConstraints::default(),
            name_file: ProjectDirs::from("org", "huddle", "huddle")
                .map(|dirs| dirs.config_dir().join("display-name")),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("HUDDLE_DISPLAY_NAME") {
            if !name.trim().is_empty() {
                config.display_name = Some(name);
            }
        }

        if let Ok(link) = std::env::var("HUDDLE_JOIN_LINK") {
            if !link.trim().is_empty() {
                config.join_link = Some(link);
            }
        }

        if let Ok(base) = std::env::var("HUDDLE_LINK_BASE") {
            config.link_base = base;
        }

        if let Ok(dir) = std::env::var("HUDDLE_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }

        if let Ok(val) = std::env::var("HUDDLE_ICE_SERVERS") {
            let servers = parse_list(&val);
            if servers.is_empty() {
                tracing::warn!(value = %val, "Empty HUDDLE_ICE_SERVERS, using default");
            } else {
                config.ice_servers = servers;
            }
        }

        if let Ok(val) = std::env::var("HUDDLE_MAX_FILE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_file_size = n,
                _ => tracing::warn!(value = %val, "Invalid HUDDLE_MAX_FILE_SIZE, using default"),
            }
        }

        let mut video = config.constraints.video.clone().unwrap_or_default();
        if let Ok(val) = std::env::var("HUDDLE_VIDEO_WIDTH") {
            match parse_dimension(&val) {
                Some(w) => video.width = w,
                None => tracing::warn!(value = %val, "Invalid HUDDLE_VIDEO_WIDTH, using default"),
            }
        }
        if let Ok(val) = std::env::var("HUDDLE_VIDEO_HEIGHT") {
            match parse_dimension(&val) {
                Some(h) => video.height = h,
                None => tracing::warn!(value = %val, "Invalid HUDDLE_VIDEO_HEIGHT, using default"),
            }
        }
        config.constraints.video = Some(video);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn default_download_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_dimension(val: &str) -> Option<u32> {
    val.trim().parse::<u32>().ok().filter(|n| *n > 0)
}
