use async_trait::async_trait;
use thiserror::Error;

use crate::stream::MediaStream;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Access denied: {0}")]
    PermissionDenied(String),

    #[error("No capture device available: {0}")]
    NoDevice(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Video capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Microphone processing switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// What to ask the camera/microphone for. `None` means the kind is not wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: Option<VideoConfig>,
    pub audio: Option<AudioConfig>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConfig::default()),
            audio: Some(AudioConfig::default()),
        }
    }
}

/// One pending acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRequest {
    /// Camera and microphone.
    UserMedia(MediaConstraints),
    /// Screen/window capture, video only.
    Display,
}

/// Platform capture devices. Both calls may suspend on a permission prompt.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;

    async fn display_media(&self) -> Result<MediaStream, MediaError>;
}

/// Run `request` against `devices`.
pub async fn acquire(
    devices: &dyn MediaDevices,
    request: &MediaRequest,
) -> Result<MediaStream, MediaError> {
    match request {
        MediaRequest::UserMedia(constraints) => devices.user_media(constraints).await,
        MediaRequest::Display => devices.display_media().await,
    }
}
