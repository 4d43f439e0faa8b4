use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Camera,
    Microphone,
    Display,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(pub Uuid);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one captured or received track.
///
/// Clones share state: disabling or stopping a track through any handle is
/// visible through every other, including the one the transport is sending.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: TrackId,
    kind: TrackKind,
    source: TrackSource,
    label: String,
    enabled: Arc<AtomicBool>,
    ended: Arc<watch::Sender<bool>>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, source: TrackSource, label: impl Into<String>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            id: TrackId(Uuid::new_v4()),
            kind,
            source,
            label: label.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            ended: Arc::new(ended),
        }
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Mute/unmute without renegotiation. A disabled video track sends black,
    /// a disabled audio track sends silence.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// End the track for good. Fires every `ended_signal` subscriber.
    pub fn stop(&self) {
        if !self.ended.send_replace(true) {
            debug!(track = %self.id, kind = ?self.kind, source = ?self.source, "Track stopped");
        }
    }

    pub fn is_live(&self) -> bool {
        !*self.ended.borrow()
    }

    /// Resolves (`true`) once the track ends, whoever ends it.
    pub fn ended_signal(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaTrack {}

/// An ordered set of tracks captured together (or received together).
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaStream {}
