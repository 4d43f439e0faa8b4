//! Chooses what the outgoing tracks carry: camera or screen, enabled or not.
//!
//! The negotiator never owns the call's local stream; it borrows it from the
//! call controller to flip flags or swap tracks. It does own the display
//! stream while a screen share is running.
//!
//! Invariant: exactly one outgoing video source at any time (camera XOR
//! screen).

use std::mem;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use huddle_shared::error::TransportError;
use huddle_shared::types::CallId;

use crate::signaling::CallTransport;
use crate::stream::{MediaStream, TrackId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Screen share already running")]
    AlreadySharing,

    #[error("Stream has no video track")]
    NoVideoTrack,

    #[error("Track replacement failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    Camera,
    Screen,
}

/// Notifications raised by media listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// The OS-level "stop sharing" control ended a display track.
    DisplayEnded { track: TrackId },
}

struct ScreenShare {
    stream: MediaStream,
    track: TrackId,
    listener: JoinHandle<()>,
}

pub struct MediaTrackNegotiator {
    video_enabled: bool,
    audio_enabled: bool,
    screen: Option<ScreenShare>,
    events: mpsc::UnboundedSender<MediaEvent>,
}

impl MediaTrackNegotiator {
    pub fn new(events: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self {
            video_enabled: true,
            audio_enabled: true,
            screen: None,
            events,
        }
    }

    /// Flip the camera track's `enabled` flag. Returns the new state.
    /// With no stream yet, flips the preference applied on acquisition.
    pub fn toggle_video(&mut self, local: Option<&MediaStream>) -> bool {
        self.video_enabled = !self.video_enabled;
        if let Some(track) = local.and_then(MediaStream::video_track) {
            track.set_enabled(self.video_enabled);
        }
        debug!(enabled = self.video_enabled, "Video toggled");
        self.video_enabled
    }

    /// Flip the microphone track's `enabled` flag. Returns the new state.
    pub fn toggle_audio(&mut self, local: Option<&MediaStream>) -> bool {
        self.audio_enabled = !self.audio_enabled;
        if let Some(track) = local.and_then(MediaStream::audio_track) {
            track.set_enabled(self.audio_enabled);
        }
        debug!(enabled = self.audio_enabled, "Audio toggled");
        self.audio_enabled
    }

    /// Bring a freshly captured camera stream in line with the toggles.
    pub fn apply_preferences(&self, stream: &MediaStream) {
        if let Some(track) = stream.video_track() {
            track.set_enabled(self.video_enabled);
        }
        if let Some(track) = stream.audio_track() {
            track.set_enabled(self.audio_enabled);
        }
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn outgoing_source(&self) -> VideoSource {
        if self.screen.is_some() {
            VideoSource::Screen
        } else {
            VideoSource::Camera
        }
    }

    /// What the local preview shows: the display while sharing, else `local`.
    pub fn preview<'a>(&'a self, local: &'a MediaStream) -> &'a MediaStream {
        self.screen.as_ref().map(|s| &s.stream).unwrap_or(local)
    }

    /// Swap the display's video track into the outgoing sender and watch for
    /// the OS ending it. On any failure the display stream is stopped.
    pub fn start_screen_share(
        &mut self,
        display: MediaStream,
        call: &CallId,
        transport: &dyn CallTransport,
    ) -> Result<(), NegotiationError> {
        if self.screen.is_some() {
            display.stop_all();
            return Err(NegotiationError::AlreadySharing);
        }

        let Some(track) = display.video_track().cloned() else {
            display.stop_all();
            return Err(NegotiationError::NoVideoTrack);
        };

        if let Err(e) = transport.replace_track(call, &track) {
            warn!(error = %e, "Could not switch sender to screen");
            display.stop_all();
            return Err(e.into());
        }

        let mut ended = track.ended_signal();
        let events = self.events.clone();
        let track_id = track.id().clone();
        let listener = tokio::spawn(async move {
            let fired = ended.wait_for(|e| *e).await.is_ok();
            if fired {
                let _ = events.send(MediaEvent::DisplayEnded { track: track_id });
            }
        });

        info!(track = %track.id(), "Screen share started");
        self.screen = Some(ScreenShare {
            stream: display,
            track: track.id().clone(),
            listener,
        });
        Ok(())
    }

    /// Stop sharing and put the camera track from `local` back on the
    /// sender. Returns `false` if no share was running.
    pub fn stop_screen_share(
        &mut self,
        local: &MediaStream,
        call: &CallId,
        transport: &dyn CallTransport,
    ) -> Result<bool, NegotiationError> {
        let Some(share) = self.dispose_screen() else {
            return Ok(false);
        };
        info!(track = %share, "Screen share stopped");

        match local.video_track() {
            Some(camera) => transport.replace_track(call, camera)?,
            None => return Err(NegotiationError::NoVideoTrack),
        }
        Ok(true)
    }

    /// Listener fired: only acts if `track` is the display we are sending.
    pub fn on_display_ended(
        &mut self,
        track: &TrackId,
        local: &MediaStream,
        call: &CallId,
        transport: &dyn CallTransport,
    ) -> Result<bool, NegotiationError> {
        match &self.screen {
            Some(share) if share.track == *track => {
                info!(track = %track, "Display capture ended by the system, reverting to camera");
                self.stop_screen_share(local, call, transport)
            }
            _ => {
                debug!(track = %track, "Stale display-ended event");
                Ok(false)
            }
        }
    }

    /// Replace the camera stream with a freshly captured one after a share.
    /// The old stream is stopped only once the new tracks are on the senders.
    pub fn restore_camera(
        &mut self,
        fresh: MediaStream,
        local: &mut MediaStream,
        call: &CallId,
        transport: &dyn CallTransport,
    ) -> Result<(), NegotiationError> {
        if self.screen.is_some() {
            debug!("Sharing resumed before the camera came back, discarding capture");
            fresh.stop_all();
            return Ok(());
        }

        self.apply_preferences(&fresh);
        for track in fresh.tracks() {
            if let Err(e) = transport.replace_track(call, track) {
                warn!(error = %e, "Could not restore fresh camera, keeping original");
                for original in local.tracks() {
                    let _ = transport.replace_track(call, original);
                }
                fresh.stop_all();
                return Err(e.into());
            }
        }

        let old = mem::replace(local, fresh);
        old.stop_all();
        info!("Camera restored");
        Ok(())
    }

    /// Drop any share and return the toggles to their defaults.
    pub fn reset(&mut self) {
        if let Some(track) = self.dispose_screen() {
            debug!(track = %track, "Screen share disposed");
        }
        self.video_enabled = true;
        self.audio_enabled = true;
    }

    fn dispose_screen(&mut self) -> Option<TrackId> {
        let share = self.screen.take()?;
        share.listener.abort();
        share.stream.stop_all();
        Some(share.track)
    }
}

impl Drop for MediaTrackNegotiator {
    fn drop(&mut self) {
        self.dispose_screen();
    }
}
