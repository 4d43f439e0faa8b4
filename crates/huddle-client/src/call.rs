//! The one call of a session and everything it owns while it lasts: local
//! and remote streams, the duration timer, the ringtone, the negotiator and
//! the recorder.
//!
//! Capture is never awaited here. Operations that need camera, microphone
//! or display hand back a [`MediaTicket`]; the session runs the request and
//! feeds the outcome to [`CallController::complete_media`]. Only the latest
//! ticket is honored, so a result that arrives after the user moved on is
//! stopped and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use huddle_media::{
    CallSignal, CallTransport, MediaConstraints, MediaError, MediaEvent, MediaRequest,
    MediaStream, MediaTrackNegotiator, NegotiationError, RecordedArtifact, RecordingError,
    RecordingService, Ringtone, RingtoneOutput,
};
use huddle_shared::error::TransportError;
use huddle_shared::types::{CallId, PeerId};

#[derive(Error, Debug)]
pub enum CallError {
    #[error("A call is already in progress ({0:?})")]
    Busy(CallState),

    #[error("No incoming call to answer")]
    NotRinging,

    #[error("No active call")]
    NotActive,

    #[error("Media unavailable: {0}")]
    Media(#[from] MediaError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Recording(#[from] RecordingError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Idle,
    Dialing,
    Ringing,
    Active,
    Ended,
}

#[derive(Debug, Default)]
pub struct Call {
    pub state: CallState,
    pub remote_id: Option<PeerId>,
    pub call_id: Option<CallId>,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
}

/// Why media is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPurpose {
    Dial,
    Answer,
    ShareScreen,
    RestoreCamera,
}

/// A capture request the session must run and report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTicket {
    pub id: u64,
    pub purpose: MediaPurpose,
    pub request: MediaRequest,
}

/// Result of a completed capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOutcome {
    /// Local media is up and the call was placed.
    Dialing,
    /// The inbound call was answered; the call is active.
    Answered,
    ScreenShareStarted,
    CameraRestored,
    /// The ticket was superseded; the capture was stopped.
    Stale,
}

/// What a call signal did.
#[derive(Debug)]
pub enum CallUpdate {
    Ringing { remote: PeerId },
    /// Inbound call turned away because we are busy.
    Refused { remote: PeerId },
    Connected { remote: PeerId },
    RemoteStreamReplaced,
    /// The caller hung up before we answered.
    Missed { remote: PeerId },
    Ended(CallSummary),
    Failed {
        summary: CallSummary,
        error: TransportError,
    },
    Ignored,
}

/// What was left when a call ended.
#[derive(Debug, Default)]
pub struct CallSummary {
    pub remote: Option<PeerId>,
    pub duration_seconds: u64,
    pub recording: Option<RecordedArtifact>,
    pub recording_error: Option<RecordingError>,
}

/// Counts whole seconds from the moment a call goes active.
struct CallTimer {
    seconds: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl CallTimer {
    fn start() -> Self {
        let seconds = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seconds);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });
        Self { seconds, task }
    }

    fn elapsed(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct CallController {
    transport: Arc<dyn CallTransport>,
    constraints: MediaConstraints,
    call: Call,
    negotiator: MediaTrackNegotiator,
    recording: RecordingService,
    ringer: Arc<dyn RingtoneOutput>,
    ringtone: Option<Ringtone>,
    timer: Option<CallTimer>,
    pending: Option<MediaTicket>,
    next_ticket: u64,
}

impl CallController {
    pub fn new(
        transport: Arc<dyn CallTransport>,
        constraints: MediaConstraints,
        negotiator: MediaTrackNegotiator,
        recording: RecordingService,
        ringer: Arc<dyn RingtoneOutput>,
    ) -> Self {
        Self {
            transport,
            constraints,
            call: Call::default(),
            negotiator,
            recording,
            ringer,
            ringtone: None,
            timer: None,
            pending: None,
            next_ticket: 0,
        }
    }

    // -- Accessors --

    pub fn state(&self) -> CallState {
        self.call.state
    }

    pub fn call(&self) -> &Call {
        &self.call
    }

    pub fn remote_id(&self) -> Option<&PeerId> {
        self.call.remote_id.as_ref()
    }

    /// Seconds since the call went active, or the last call's final count.
    pub fn duration_seconds(&self) -> u64 {
        self.timer
            .as_ref()
            .map(CallTimer::elapsed)
            .unwrap_or(self.call.duration_seconds)
    }

    /// What the local preview shows: the display while sharing, else camera.
    pub fn preview_stream(&self) -> Option<&MediaStream> {
        self.call
            .local_stream
            .as_ref()
            .map(|local| self.negotiator.preview(local))
    }

    pub fn negotiator(&self) -> &MediaTrackNegotiator {
        &self.negotiator
    }

    pub fn recording(&self) -> &RecordingService {
        &self.recording
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn is_ringing(&self) -> bool {
        self.ringtone.as_ref().is_some_and(Ringtone::is_playing)
    }

    pub fn pending(&self) -> Option<&MediaTicket> {
        self.pending.as_ref()
    }

    // -- User operations --

    /// `Idle -> Dialing`. Camera and microphone are requested next; the call
    /// is placed once they arrive.
    pub fn start_call(&mut self, remote: PeerId) -> Result<MediaTicket, CallError> {
        if self.call.state != CallState::Idle {
            return Err(CallError::Busy(self.call.state));
        }
        info!(remote = %remote.short(), "Dialing");
        self.call.state = CallState::Dialing;
        self.call.remote_id = Some(remote);
        Ok(self.issue(
            MediaPurpose::Dial,
            MediaRequest::UserMedia(self.constraints.clone()),
        ))
    }

    /// Answer the ringing call. Media is requested first; the call stays
    /// `Ringing` until it arrives.
    pub fn accept_call(&mut self) -> Result<MediaTicket, CallError> {
        let answering = matches!(&self.pending, Some(t) if t.purpose == MediaPurpose::Answer);
        if self.call.state != CallState::Ringing || answering {
            return Err(CallError::NotRinging);
        }
        info!("Accepting call");
        Ok(self.issue(
            MediaPurpose::Answer,
            MediaRequest::UserMedia(self.constraints.clone()),
        ))
    }

    /// `Ringing -> Idle` without touching any capture device.
    pub fn reject_call(&mut self) -> Result<(), CallError> {
        if self.call.state != CallState::Ringing {
            return Err(CallError::NotRinging);
        }
        if let Some(call) = &self.call.call_id {
            self.transport.close_call(call);
        }
        info!("Call rejected");
        self.reset();
        Ok(())
    }

    /// Hang up and release everything. A no-op without a call; a ringing
    /// call is rejected instead.
    pub fn end_call(&mut self) -> Option<CallSummary> {
        match self.call.state {
            CallState::Idle | CallState::Ended => None,
            CallState::Ringing => {
                let _ = self.reject_call();
                None
            }
            CallState::Dialing | CallState::Active => Some(self.teardown(true)),
        }
    }

    pub fn toggle_video(&mut self) -> bool {
        self.negotiator.toggle_video(self.call.local_stream.as_ref())
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.negotiator.toggle_audio(self.call.local_stream.as_ref())
    }

    /// Start or stop sharing. Starting needs a display capture; stopping puts
    /// the camera back at once and asks for a fresh camera capture.
    pub fn toggle_screen_share(&mut self) -> Result<MediaTicket, CallError> {
        let Some((call, local)) = active_parts(&self.call) else {
            return Err(CallError::NotActive);
        };

        if self.negotiator.is_screen_sharing() {
            self.negotiator
                .stop_screen_share(local, call, self.transport.as_ref())?;
            Ok(self.restore_ticket())
        } else {
            Ok(self.issue(MediaPurpose::ShareScreen, MediaRequest::Display))
        }
    }

    pub fn start_recording(&mut self) -> Result<(), CallError> {
        let Some((_, local)) = active_parts(&self.call) else {
            return Err(CallError::NotActive);
        };
        self.recording.start(local)?;
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<RecordedArtifact, CallError> {
        Ok(self.recording.stop()?)
    }

    /// Pull recorder chunks delivered so far into the buffer.
    pub fn collect_recording(&mut self) {
        self.recording.collect();
    }

    // -- Completions and signals --

    /// Continue the operation that issued `ticket` with its capture result.
    pub fn complete_media(
        &mut self,
        ticket: u64,
        result: Result<MediaStream, MediaError>,
    ) -> Result<MediaOutcome, CallError> {
        let purpose = match &self.pending {
            Some(t) if t.id == ticket => t.purpose,
            _ => {
                debug!(ticket, "Stale media result, discarding");
                if let Ok(stream) = result {
                    stream.stop_all();
                }
                return Ok(MediaOutcome::Stale);
            }
        };
        self.pending = None;

        match purpose {
            MediaPurpose::Dial => self.finish_dial(result),
            MediaPurpose::Answer => self.finish_answer(result),
            MediaPurpose::ShareScreen => self.finish_share(result),
            MediaPurpose::RestoreCamera => self.finish_restore(result),
        }
    }

    fn finish_dial(
        &mut self,
        result: Result<MediaStream, MediaError>,
    ) -> Result<MediaOutcome, CallError> {
        let (CallState::Dialing, Some(remote)) = (self.call.state, self.call.remote_id.clone())
        else {
            return Ok(discard(result));
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "No local media, call aborted");
                self.reset();
                return Err(e.into());
            }
        };

        self.negotiator.apply_preferences(&stream);
        match self.transport.place_call(&remote, &stream) {
            Ok(call) => {
                info!(remote = %remote.short(), call = %call, "Call placed");
                self.call.call_id = Some(call);
                self.call.local_stream = Some(stream);
                Ok(MediaOutcome::Dialing)
            }
            Err(e) => {
                error!(remote = %remote.short(), error = %e, "Failed to place call");
                stream.stop_all();
                self.reset();
                Err(e.into())
            }
        }
    }

    fn finish_answer(
        &mut self,
        result: Result<MediaStream, MediaError>,
    ) -> Result<MediaOutcome, CallError> {
        let (CallState::Ringing, Some(call)) = (self.call.state, self.call.call_id.clone()) else {
            return Ok(discard(result));
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "No local media, rejecting call");
                self.reject_call()?;
                return Err(e.into());
            }
        };

        self.negotiator.apply_preferences(&stream);
        if let Err(e) = self.transport.answer_call(&call, &stream) {
            error!(call = %call, error = %e, "Failed to answer call");
            stream.stop_all();
            self.transport.close_call(&call);
            self.reset();
            return Err(e.into());
        }

        self.ringtone = None;
        self.call.local_stream = Some(stream);
        self.go_active();
        Ok(MediaOutcome::Answered)
    }

    fn finish_share(
        &mut self,
        result: Result<MediaStream, MediaError>,
    ) -> Result<MediaOutcome, CallError> {
        let (CallState::Active, Some(call)) = (self.call.state, self.call.call_id.clone()) else {
            return Ok(discard(result));
        };
        let display = result.map_err(|e| {
            warn!(error = %e, "Display capture failed, staying on camera");
            CallError::from(e)
        })?;
        self.negotiator
            .start_screen_share(display, &call, self.transport.as_ref())?;
        Ok(MediaOutcome::ScreenShareStarted)
    }

    fn finish_restore(
        &mut self,
        result: Result<MediaStream, MediaError>,
    ) -> Result<MediaOutcome, CallError> {
        let (CallState::Active, Some(call), Some(local)) = (
            self.call.state,
            self.call.call_id.as_ref(),
            self.call.local_stream.as_mut(),
        ) else {
            return Ok(discard(result));
        };
        let fresh = result.map_err(|e| {
            warn!(error = %e, "Camera reacquisition failed, keeping original track");
            CallError::from(e)
        })?;
        self.negotiator
            .restore_camera(fresh, local, call, self.transport.as_ref())?;

        if self.recording.is_recording() && self.recording.source() != Some(&*local) {
            if let Err(e) = self.recording.rebind(local) {
                warn!(error = %e, "Recorder lost the camera, stopping recording");
                if let Ok(artifact) = self.recording.stop() {
                    info!(file = %artifact.file_name, "Partial recording saved");
                }
                return Err(e.into());
            }
        }
        Ok(MediaOutcome::CameraRestored)
    }

    /// Fold one call signal into the state machine.
    pub fn on_signal(&mut self, signal: CallSignal) -> CallUpdate {
        if let CallSignal::Incoming { call, remote } = signal {
            return self.on_incoming(call, remote);
        }
        if self.call.call_id.as_ref() != Some(signal.call()) {
            debug!(call = %signal.call(), "Signal for unknown call ignored");
            if let CallSignal::RemoteStream { stream, .. } = signal {
                stream.stop_all();
            }
            return CallUpdate::Ignored;
        }

        match signal {
            CallSignal::Incoming { .. } => CallUpdate::Ignored,
            CallSignal::RemoteStream { stream, .. } => match self.call.state {
                CallState::Dialing => {
                    self.call.remote_stream = Some(stream);
                    self.go_active();
                    match self.call.remote_id.clone() {
                        Some(remote) => CallUpdate::Connected { remote },
                        None => CallUpdate::Ignored,
                    }
                }
                CallState::Active => {
                    debug!("Remote stream replaced");
                    self.call.remote_stream = Some(stream);
                    CallUpdate::RemoteStreamReplaced
                }
                _ => CallUpdate::Ignored,
            },
            CallSignal::Closed { .. } => match self.call.state {
                CallState::Ringing => {
                    let remote = self.call.remote_id.clone();
                    info!("Caller hung up before answer");
                    self.reset();
                    remote
                        .map(|remote| CallUpdate::Missed { remote })
                        .unwrap_or(CallUpdate::Ignored)
                }
                CallState::Dialing | CallState::Active => {
                    info!("Remote ended the call");
                    CallUpdate::Ended(self.teardown(false))
                }
                _ => CallUpdate::Ignored,
            },
            CallSignal::Failed { reason, .. } => match self.call.state {
                CallState::Ringing | CallState::Dialing | CallState::Active => {
                    error!(reason = %reason, "Call failed");
                    let summary = self.teardown(true);
                    CallUpdate::Failed {
                        summary,
                        error: TransportError::Dropped(reason),
                    }
                }
                _ => CallUpdate::Ignored,
            },
        }
    }

    fn on_incoming(&mut self, call: CallId, remote: PeerId) -> CallUpdate {
        if self.call.state != CallState::Idle {
            warn!(
                remote = %remote.short(),
                state = ?self.call.state,
                "Refusing inbound call while busy"
            );
            self.transport.close_call(&call);
            return CallUpdate::Refused { remote };
        }
        info!(remote = %remote.short(), call = %call, "Incoming call");
        self.call.state = CallState::Ringing;
        self.call.call_id = Some(call);
        self.call.remote_id = Some(remote.clone());
        self.ringtone = Some(Ringtone::start(Arc::clone(&self.ringer)));
        CallUpdate::Ringing { remote }
    }

    /// A media listener fired. Returns a camera ticket when the screen share
    /// was ended from outside.
    pub fn on_media_event(&mut self, event: MediaEvent) -> Result<Option<MediaTicket>, CallError> {
        match event {
            MediaEvent::DisplayEnded { track } => {
                let Some((call, local)) = active_parts(&self.call) else {
                    return Ok(None);
                };
                let reverted = self.negotiator.on_display_ended(
                    &track,
                    local,
                    call,
                    self.transport.as_ref(),
                )?;
                Ok(reverted.then(|| self.restore_ticket()))
            }
        }
    }

    // -- Internals --

    fn issue(&mut self, purpose: MediaPurpose, request: MediaRequest) -> MediaTicket {
        self.next_ticket += 1;
        let ticket = MediaTicket {
            id: self.next_ticket,
            purpose,
            request,
        };
        if let Some(previous) = self.pending.replace(ticket.clone()) {
            debug!(ticket = previous.id, "Superseded pending media request");
        }
        ticket
    }

    fn restore_ticket(&mut self) -> MediaTicket {
        self.issue(
            MediaPurpose::RestoreCamera,
            MediaRequest::UserMedia(self.constraints.clone()),
        )
    }

    fn go_active(&mut self) {
        self.call.state = CallState::Active;
        self.call.started_at = Some(Utc::now());
        self.call.duration_seconds = 0;
        self.timer = Some(CallTimer::start());
        info!(
            remote = %self.call.remote_id.as_ref().map(PeerId::short).unwrap_or("?"),
            "Call active"
        );
    }

    /// `Active -> Ended -> Idle`. Recording is finalized before any track is
    /// stopped so the last chunk still makes it into the artifact.
    fn teardown(&mut self, close_transport: bool) -> CallSummary {
        self.call.state = CallState::Ended;
        let mut summary = CallSummary {
            remote: self.call.remote_id.clone(),
            duration_seconds: self.duration_seconds(),
            ..Default::default()
        };

        if close_transport {
            if let Some(call) = &self.call.call_id {
                self.transport.close_call(call);
            }
        }

        if self.recording.is_recording() {
            match self.recording.stop() {
                Ok(artifact) => summary.recording = Some(artifact),
                Err(e) => {
                    error!(error = %e, "Recording could not be saved");
                    summary.recording_error = Some(e);
                }
            }
        }

        info!(duration = summary.duration_seconds, "Call ended");
        self.reset();
        self.call.duration_seconds = summary.duration_seconds;
        summary
    }

    /// Release everything and return to `Idle`. Safe to repeat.
    fn reset(&mut self) {
        self.negotiator.reset();
        if let Some(local) = self.call.local_stream.take() {
            local.stop_all();
        }
        if let Some(remote) = self.call.remote_stream.take() {
            remote.stop_all();
        }
        self.timer = None;
        self.ringtone = None;
        self.pending = None;
        self.call = Call::default();
    }
}

/// Call id and local stream of an active call.
fn active_parts(call: &Call) -> Option<(&CallId, &MediaStream)> {
    if call.state != CallState::Active {
        return None;
    }
    Some((call.call_id.as_ref()?, call.local_stream.as_ref()?))
}

fn discard(result: Result<MediaStream, MediaError>) -> MediaOutcome {
    if let Ok(stream) = result {
        stream.stop_all();
    }
    MediaOutcome::Stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use huddle_media::{
        ArtifactSink, MediaTrack, Recorder, RecorderFactory, TrackKind, TrackSource, VideoSource,
    };
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeCalls {
        placed: Mutex<Vec<PeerId>>,
        answered: Mutex<Vec<CallId>>,
        closed: Mutex<Vec<CallId>>,
        replaced: Mutex<Vec<MediaTrack>>,
        fail_place: bool,
    }

    impl CallTransport for FakeCalls {
        fn place_call(&self, remote: &PeerId, _local: &MediaStream) -> Result<CallId, TransportError> {
            if self.fail_place {
                return Err(TransportError::PeerUnavailable(remote.to_string()));
            }
            self.placed.lock().unwrap().push(remote.clone());
            Ok(CallId::new())
        }
        fn answer_call(&self, call: &CallId, _local: &MediaStream) -> Result<(), TransportError> {
            self.answered.lock().unwrap().push(call.clone());
            Ok(())
        }
        fn close_call(&self, call: &CallId) {
            self.closed.lock().unwrap().push(call.clone());
        }
        fn replace_track(&self, _call: &CallId, track: &MediaTrack) -> Result<(), TransportError> {
            self.replaced.lock().unwrap().push(track.clone());
            Ok(())
        }
    }

    struct NullRecorder;
    impl Recorder for NullRecorder {
        fn stop(&mut self) {}
    }

    #[derive(Default)]
    struct Chunks(Mutex<Option<mpsc::UnboundedSender<Bytes>>>);
    impl RecorderFactory for Chunks {
        fn create(
            &self,
            _stream: &MediaStream,
            _mime_type: &str,
            _timeslice: Duration,
            chunks: mpsc::UnboundedSender<Bytes>,
        ) -> Result<Box<dyn Recorder>, MediaError> {
            *self.0.lock().unwrap() = Some(chunks);
            Ok(Box::new(NullRecorder))
        }
    }

    struct NoDisk;
    impl ArtifactSink for NoDisk {
        fn save(&self, file_name: &str, _data: &[u8]) -> std::io::Result<PathBuf> {
            Ok(PathBuf::from(file_name))
        }
    }

    #[derive(Default)]
    struct Bell(Mutex<Vec<&'static str>>);
    impl RingtoneOutput for Bell {
        fn start_loop(&self) {
            self.0.lock().unwrap().push("start");
        }
        fn stop(&self) {
            self.0.lock().unwrap().push("stop");
        }
    }

    struct Rig {
        controller: CallController,
        calls: Arc<FakeCalls>,
        chunks: Arc<Chunks>,
        bell: Arc<Bell>,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    }

    fn rig_with(calls: FakeCalls) -> Rig {
        let calls = Arc::new(calls);
        let chunks = Arc::new(Chunks::default());
        let bell = Arc::new(Bell::default());
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let controller = CallController::new(
            calls.clone(),
            MediaConstraints::default(),
            MediaTrackNegotiator::new(media_tx),
            RecordingService::new(chunks.clone(), Arc::new(NoDisk)),
            bell.clone(),
        );
        Rig {
            controller,
            calls,
            chunks,
            bell,
            media_rx,
        }
    }

    fn rig() -> Rig {
        rig_with(FakeCalls::default())
    }

    fn camera() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video, TrackSource::Camera, "cam"),
            MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "mic"),
        ])
    }

    fn display() -> MediaStream {
        MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            TrackSource::Display,
            "screen",
        )])
    }

    fn remote() -> PeerId {
        PeerId::new("bob")
    }

    /// Dial and connect; returns the local camera stream.
    fn active(rig: &mut Rig) -> MediaStream {
        let ticket = rig.controller.start_call(remote()).unwrap();
        let local = camera();
        rig.controller
            .complete_media(ticket.id, Ok(local.clone()))
            .unwrap();
        let call = rig.controller.call().call_id.clone().unwrap();
        let update = rig.controller.on_signal(CallSignal::RemoteStream {
            call,
            stream: camera(),
        });
        assert!(matches!(update, CallUpdate::Connected { .. }));
        local
    }

    #[tokio::test]
    async fn test_dial_then_remote_stream_goes_active() {
        let mut rig = rig();
        let ticket = rig.controller.start_call(remote()).unwrap();
        assert_eq!(ticket.purpose, MediaPurpose::Dial);
        assert_eq!(rig.controller.state(), CallState::Dialing);
        assert!(matches!(
            rig.controller.start_call(remote()),
            Err(CallError::Busy(CallState::Dialing))
        ));

        let outcome = rig.controller.complete_media(ticket.id, Ok(camera())).unwrap();
        assert_eq!(outcome, MediaOutcome::Dialing);
        assert_eq!(rig.calls.placed.lock().unwrap().as_slice(), &[remote()]);

        let call = rig.controller.call().call_id.clone().unwrap();
        rig.controller.on_signal(CallSignal::RemoteStream {
            call,
            stream: camera(),
        });
        assert_eq!(rig.controller.state(), CallState::Active);
        assert!(rig.controller.call().started_at.is_some());
        assert_eq!(rig.controller.duration_seconds(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_while_dialing_reverts() {
        let mut rig = rig();
        let ticket = rig.controller.start_call(remote()).unwrap();
        let err = rig
            .controller
            .complete_media(ticket.id, Err(MediaError::PermissionDenied("camera".into())))
            .unwrap_err();
        assert!(matches!(err, CallError::Media(MediaError::PermissionDenied(_))));
        assert_eq!(rig.controller.state(), CallState::Idle);
        assert!(rig.calls.placed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_place_failure_stops_local_media() {
        let mut rig = rig_with(FakeCalls {
            fail_place: true,
            ..Default::default()
        });
        let ticket = rig.controller.start_call(remote()).unwrap();
        let local = camera();
        assert!(rig
            .controller
            .complete_media(ticket.id, Ok(local.clone()))
            .is_err());
        assert!(!local.is_live());
        assert_eq!(rig.controller.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_incoming_reject_never_requests_media() {
        let mut rig = rig();
        let call = CallId::new();
        let update = rig.controller.on_signal(CallSignal::Incoming {
            call: call.clone(),
            remote: remote(),
        });
        assert!(matches!(update, CallUpdate::Ringing { .. }));
        assert_eq!(rig.controller.state(), CallState::Ringing);
        assert!(rig.controller.is_ringing());

        rig.controller.reject_call().unwrap();
        assert_eq!(rig.controller.state(), CallState::Idle);
        assert!(rig.controller.pending().is_none());
        assert_eq!(rig.calls.closed.lock().unwrap().as_slice(), &[call]);
        assert_eq!(rig.bell.0.lock().unwrap().as_slice(), &["start", "stop"]);
    }

    #[tokio::test]
    async fn test_accept_answers_and_stops_ringtone() {
        let mut rig = rig();
        let call = CallId::new();
        rig.controller.on_signal(CallSignal::Incoming {
            call: call.clone(),
            remote: remote(),
        });
        let ticket = rig.controller.accept_call().unwrap();
        assert!(matches!(rig.controller.accept_call(), Err(CallError::NotRinging)));
        assert_eq!(rig.controller.state(), CallState::Ringing);

        let outcome = rig.controller.complete_media(ticket.id, Ok(camera())).unwrap();
        assert_eq!(outcome, MediaOutcome::Answered);
        assert_eq!(rig.controller.state(), CallState::Active);
        assert_eq!(rig.calls.answered.lock().unwrap().as_slice(), &[call]);
        assert!(!rig.controller.is_ringing());
    }

    #[tokio::test]
    async fn test_accept_without_device_rejects() {
        let mut rig = rig();
        rig.controller.on_signal(CallSignal::Incoming {
            call: CallId::new(),
            remote: remote(),
        });
        let ticket = rig.controller.accept_call().unwrap();
        let err = rig
            .controller
            .complete_media(ticket.id, Err(MediaError::NoDevice("camera".into())))
            .unwrap_err();
        assert!(matches!(err, CallError::Media(MediaError::NoDevice(_))));
        assert_eq!(rig.controller.state(), CallState::Idle);
        assert_eq!(rig.calls.closed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_incoming_while_busy_refused() {
        let mut rig = rig();
        active(&mut rig);
        let other = CallId::new();
        let update = rig.controller.on_signal(CallSignal::Incoming {
            call: other.clone(),
            remote: PeerId::new("carol"),
        });
        assert!(matches!(update, CallUpdate::Refused { .. }));
        assert_eq!(rig.controller.state(), CallState::Active);
        assert!(rig.calls.closed.lock().unwrap().contains(&other));
    }

    #[tokio::test]
    async fn test_end_call_idle_is_noop() {
        let mut rig = rig();
        assert!(rig.controller.end_call().is_none());
        assert_eq!(rig.controller.state(), CallState::Idle);
        assert!(rig.controller.end_call().is_none());
    }

    #[tokio::test]
    async fn test_end_call_stops_everything() {
        let mut rig = rig();
        let local = active(&mut rig);
        rig.controller.toggle_video();

        let summary = rig.controller.end_call().unwrap();
        assert_eq!(summary.remote, Some(remote()));
        assert!(!local.is_live());
        assert_eq!(rig.controller.state(), CallState::Idle);
        assert!(rig.controller.negotiator().is_video_enabled());
        assert!(rig.controller.end_call().is_none());
    }

    #[tokio::test]
    async fn test_remote_close_ends_without_closing_again() {
        let mut rig = rig();
        active(&mut rig);
        let call = rig.controller.call().call_id.clone().unwrap();
        let update = rig.controller.on_signal(CallSignal::Closed { call });
        assert!(matches!(update, CallUpdate::Ended(_)));
        assert!(rig.calls.closed.lock().unwrap().is_empty());
        assert_eq!(rig.controller.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_caller_hangs_up_while_ringing() {
        let mut rig = rig();
        let call = CallId::new();
        rig.controller.on_signal(CallSignal::Incoming {
            call: call.clone(),
            remote: remote(),
        });
        let update = rig.controller.on_signal(CallSignal::Closed { call });
        assert!(matches!(update, CallUpdate::Missed { .. }));
        assert_eq!(rig.controller.state(), CallState::Idle);
        assert!(!rig.controller.is_ringing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_counts_seconds_while_active() {
        let mut rig = rig();
        active(&mut rig);
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(1001)).await;
        }
        assert_eq!(rig.controller.duration_seconds(), 3);

        let summary = rig.controller.end_call().unwrap();
        assert_eq!(summary.duration_seconds, 3);
        assert_eq!(rig.controller.duration_seconds(), 3);
    }

    #[tokio::test]
    async fn test_toggle_video_parity() {
        let mut rig = rig();
        let local = active(&mut rig);
        for n in 1..=6 {
            let enabled = rig.controller.toggle_video();
            assert_eq!(enabled, n % 2 == 0);
            assert_eq!(local.video_track().unwrap().is_enabled(), enabled);
        }
    }

    #[tokio::test]
    async fn test_os_stop_sharing_reverts_to_camera() {
        let mut rig = rig();
        let local = active(&mut rig);

        let ticket = rig.controller.toggle_screen_share().unwrap();
        assert_eq!(ticket.request, MediaRequest::Display);
        let screen = display();
        rig.controller
            .complete_media(ticket.id, Ok(screen.clone()))
            .unwrap();
        assert_eq!(rig.controller.negotiator().outgoing_source(), VideoSource::Screen);
        assert_eq!(rig.controller.preview_stream(), Some(&screen));

        screen.stop_all();
        let event = rig.media_rx.recv().await.unwrap();
        let restore = rig.controller.on_media_event(event).unwrap().unwrap();
        assert_eq!(restore.purpose, MediaPurpose::RestoreCamera);
        assert_eq!(rig.controller.negotiator().outgoing_source(), VideoSource::Camera);
        assert_eq!(
            rig.calls.replaced.lock().unwrap().last(),
            local.video_track()
        );
        assert_eq!(rig.controller.preview_stream(), Some(&local));
    }

    #[tokio::test]
    async fn test_manual_unshare_restores_fresh_camera() {
        let mut rig = rig();
        let old = active(&mut rig);
        rig.controller.toggle_audio();

        let share = rig.controller.toggle_screen_share().unwrap();
        rig.controller.complete_media(share.id, Ok(display())).unwrap();
        let restore = rig.controller.toggle_screen_share().unwrap();
        assert_eq!(restore.purpose, MediaPurpose::RestoreCamera);

        let fresh = camera();
        let outcome = rig
            .controller
            .complete_media(restore.id, Ok(fresh.clone()))
            .unwrap();
        assert_eq!(outcome, MediaOutcome::CameraRestored);
        assert!(!old.is_live());
        assert_eq!(rig.controller.call().local_stream.as_ref(), Some(&fresh));
        assert!(!fresh.audio_track().unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_stale_ticket_is_stopped() {
        let mut rig = rig();
        active(&mut rig);
        let first = rig.controller.toggle_screen_share().unwrap();
        let second = rig.controller.toggle_screen_share().unwrap();
        assert_ne!(first.id, second.id);

        let late = display();
        let outcome = rig.controller.complete_media(first.id, Ok(late.clone())).unwrap();
        assert_eq!(outcome, MediaOutcome::Stale);
        assert!(!late.is_live());
    }

    #[tokio::test]
    async fn test_end_call_stops_recording_first() {
        let mut rig = rig();
        active(&mut rig);
        rig.controller.start_recording().unwrap();
        let tx = rig.chunks.0.lock().unwrap().clone().unwrap();
        for chunk in ["c1", "c2", "c3"] {
            tx.send(Bytes::from(chunk)).unwrap();
        }

        let summary = rig.controller.end_call().unwrap();
        let artifact = summary.recording.unwrap();
        assert_eq!(&artifact.data[..], b"c1c2c3");
        assert!(!rig.controller.is_recording());
    }

    #[tokio::test]
    async fn test_recording_follows_restored_camera() {
        let mut rig = rig();
        let old = active(&mut rig);
        rig.controller.start_recording().unwrap();
        assert_eq!(rig.controller.recording().source(), Some(&old));
        let before = rig.chunks.0.lock().unwrap().clone().unwrap();
        before.send(Bytes::from_static(b"c1")).unwrap();

        let share = rig.controller.toggle_screen_share().unwrap();
        rig.controller.complete_media(share.id, Ok(display())).unwrap();
        let restore = rig.controller.toggle_screen_share().unwrap();
        let fresh = camera();
        rig.controller
            .complete_media(restore.id, Ok(fresh.clone()))
            .unwrap();

        let source = rig.controller.recording().source().unwrap();
        assert_eq!(source, &fresh);
        assert!(source.is_live());
        assert!(rig.controller.is_recording());

        let after = rig.chunks.0.lock().unwrap().clone().unwrap();
        after.send(Bytes::from_static(b"c2")).unwrap();
        let artifact = rig.controller.end_call().unwrap().recording.unwrap();
        assert_eq!(&artifact.data[..], b"c1c2");
    }

    #[tokio::test]
    async fn test_recording_needs_active_call() {
        let mut rig = rig();
        assert!(matches!(
            rig.controller.start_recording(),
            Err(CallError::NotActive)
        ));
    }
}
