//! In-process substrate. Peers registered on one [`LoopbackHub`] open
//! channels and place calls to each other without a network, and synthetic
//! devices stand in for camera, microphone and screen.
//!
//! Used by the demo binary and the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use huddle_media::{
    CallSignal, CallTransport, MediaConstraints, MediaDevices, MediaError, MediaStream,
    MediaTrack, Recorder, RecorderFactory, TrackKind, TrackSource,
};
use huddle_net::{ChannelEvent, DataTransport};
use huddle_shared::error::TransportError;
use huddle_shared::types::{CallId, ChannelId, PeerId};

use crate::session::SessionEvent;

#[derive(Default)]
struct HubState {
    peers: HashMap<PeerId, mpsc::UnboundedSender<SessionEvent>>,
    channels: HashMap<ChannelId, (PeerId, PeerId)>,
    calls: HashMap<CallId, LoopCall>,
    refuse_registration: bool,
}

impl HubState {
    fn deliver(&self, to: &PeerId, event: SessionEvent) {
        match self.peers.get(to) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!(peer = %to.short(), "Peer queue closed");
                }
            }
            None => debug!(peer = %to.short(), "No such peer"),
        }
    }
}

struct LoopCall {
    caller: PeerId,
    callee: PeerId,
    /// Tracks each end is currently transmitting.
    senders: HashMap<PeerId, Vec<MediaTrack>>,
}

impl LoopCall {
    fn other(&self, me: &PeerId) -> &PeerId {
        if *me == self.caller {
            &self.callee
        } else {
            &self.caller
        }
    }
}

/// Shared switchboard. Cheap to clone.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A transport endpoint whose events land in `events`.
    pub fn endpoint(&self, events: mpsc::UnboundedSender<SessionEvent>) -> Arc<LoopbackEndpoint> {
        Arc::new(LoopbackEndpoint {
            hub: self.clone(),
            events,
            me: Mutex::new(None),
        })
    }

    /// Make the broker turn away new registrations.
    pub fn refuse_registrations(&self, refuse: bool) {
        self.lock().refuse_registration = refuse;
    }

    /// Break a channel as if the network dropped it.
    pub fn sever(&self, channel: &ChannelId) {
        let mut state = self.lock();
        if let Some((a, b)) = state.channels.remove(channel) {
            info!(channel = %channel, "Severing channel");
            for end in [a, b] {
                state.deliver(
                    &end,
                    SessionEvent::Channel(ChannelEvent::Failed {
                        channel: channel.clone(),
                        reason: "network dropped".into(),
                    }),
                );
            }
        }
    }

    /// The video track `from` is sending on `call`.
    pub fn outgoing_video(&self, call: &CallId, from: &PeerId) -> Option<MediaTrack> {
        self.lock()
            .calls
            .get(call)?
            .senders
            .get(from)?
            .iter()
            .find(|t| t.kind() == TrackKind::Video)
            .cloned()
    }

    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }
}

/// One peer's view of the hub.
pub struct LoopbackEndpoint {
    hub: LoopbackHub,
    events: mpsc::UnboundedSender<SessionEvent>,
    me: Mutex<Option<PeerId>>,
}

impl LoopbackEndpoint {
    fn me(&self) -> Result<PeerId, TransportError> {
        self.me
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn notify(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Own queue closed");
        }
    }
}

#[async_trait]
impl DataTransport for LoopbackEndpoint {
    async fn register(&self) -> Result<PeerId, TransportError> {
        let mut state = self.hub.lock();
        if state.refuse_registration {
            return Err(TransportError::Signaling("broker refused registration".into()));
        }
        let id = PeerId::new(Uuid::new_v4().simple().to_string());
        state.peers.insert(id.clone(), self.events.clone());
        *self.me.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(id.clone());
        debug!(peer = %id.short(), "Peer registered on loopback");
        Ok(id)
    }

    fn open_channel(&self, remote: &PeerId) -> Result<ChannelId, TransportError> {
        let me = self.me()?;
        let channel = ChannelId::new();
        let mut state = self.hub.lock();

        if !state.peers.contains_key(remote) {
            self.notify(SessionEvent::Channel(ChannelEvent::Failed {
                channel: channel.clone(),
                reason: format!("peer {} unavailable", remote.short()),
            }));
            return Ok(channel);
        }

        state
            .channels
            .insert(channel.clone(), (me.clone(), remote.clone()));
        state.deliver(
            remote,
            SessionEvent::Channel(ChannelEvent::Inbound {
                channel: channel.clone(),
                remote: me,
            }),
        );
        state.deliver(
            remote,
            SessionEvent::Channel(ChannelEvent::Open {
                channel: channel.clone(),
            }),
        );
        self.notify(SessionEvent::Channel(ChannelEvent::Open {
            channel: channel.clone(),
        }));
        Ok(channel)
    }

    fn send(&self, channel: &ChannelId, payload: &str) -> Result<(), TransportError> {
        let me = self.me()?;
        let state = self.hub.lock();
        let (a, b) = state
            .channels
            .get(channel)
            .ok_or(TransportError::NotConnected)?;
        let other = if *a == me { b } else { a };
        state.deliver(
            other,
            SessionEvent::Channel(ChannelEvent::Data {
                channel: channel.clone(),
                payload: payload.to_string(),
            }),
        );
        Ok(())
    }

    fn close_channel(&self, channel: &ChannelId) {
        let Ok(me) = self.me() else { return };
        let mut state = self.hub.lock();
        if let Some((a, b)) = state.channels.remove(channel) {
            let other = if a == me { b } else { a };
            state.deliver(
                &other,
                SessionEvent::Channel(ChannelEvent::Closed {
                    channel: channel.clone(),
                }),
            );
        }
    }
}

/// What the far end receives: fresh tracks of the same kinds.
fn received_view(tracks: &[MediaTrack]) -> MediaStream {
    MediaStream::new(
        tracks
            .iter()
            .map(|t| MediaTrack::new(t.kind(), TrackSource::Remote, t.label()))
            .collect(),
    )
}

impl CallTransport for LoopbackEndpoint {
    fn place_call(&self, remote: &PeerId, local: &MediaStream) -> Result<CallId, TransportError> {
        let me = self.me()?;
        let mut state = self.hub.lock();
        if !state.peers.contains_key(remote) {
            return Err(TransportError::PeerUnavailable(remote.to_string()));
        }
        let call = CallId::new();
        state.calls.insert(
            call.clone(),
            LoopCall {
                caller: me.clone(),
                callee: remote.clone(),
                senders: HashMap::from([(me.clone(), local.tracks().to_vec())]),
            },
        );
        state.deliver(
            remote,
            SessionEvent::Call(CallSignal::Incoming {
                call: call.clone(),
                remote: me,
            }),
        );
        Ok(call)
    }

    fn answer_call(&self, call: &CallId, local: &MediaStream) -> Result<(), TransportError> {
        let me = self.me()?;
        let mut state = self.hub.lock();
        let entry = state
            .calls
            .get_mut(call)
            .ok_or_else(|| TransportError::Signaling(format!("unknown call {call}")))?;
        entry.senders.insert(me.clone(), local.tracks().to_vec());

        let caller = entry.caller.clone();
        let to_callee = received_view(entry.senders.get(&caller).map(Vec::as_slice).unwrap_or(&[]));
        let to_caller = received_view(local.tracks());

        state.deliver(
            &me,
            SessionEvent::Call(CallSignal::RemoteStream {
                call: call.clone(),
                stream: to_callee,
            }),
        );
        state.deliver(
            &caller,
            SessionEvent::Call(CallSignal::RemoteStream {
                call: call.clone(),
                stream: to_caller,
            }),
        );
        Ok(())
    }

    fn close_call(&self, call: &CallId) {
        let Ok(me) = self.me() else { return };
        let mut state = self.hub.lock();
        if let Some(entry) = state.calls.remove(call) {
            let other = entry.other(&me).clone();
            state.deliver(
                &other,
                SessionEvent::Call(CallSignal::Closed { call: call.clone() }),
            );
        }
    }

    fn replace_track(&self, call: &CallId, track: &MediaTrack) -> Result<(), TransportError> {
        let me = self.me()?;
        let mut state = self.hub.lock();
        let senders = state
            .calls
            .get_mut(call)
            .and_then(|entry| entry.senders.get_mut(&me))
            .ok_or_else(|| TransportError::Signaling(format!("no sender on call {call}")))?;
        match senders.iter_mut().find(|t| t.kind() == track.kind()) {
            Some(slot) => *slot = track.clone(),
            None => senders.push(track.clone()),
        }
        debug!(call = %call, source = ?track.source(), "Sender track replaced");
        Ok(())
    }
}

/// Camera, microphone and screen that exist only in memory.
#[derive(Debug, Default)]
pub struct SyntheticDevices {
    deny_user_media: AtomicBool,
    no_devices: AtomicBool,
    deny_display: AtomicBool,
    requests: AtomicUsize,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer camera/microphone prompts with "denied".
    pub fn deny_user_media(&self, deny: bool) {
        self.deny_user_media.store(deny, Ordering::SeqCst);
    }

    /// Pretend no camera or microphone is plugged in.
    pub fn unplug(&self, unplugged: bool) {
        self.no_devices.store(unplugged, Ordering::SeqCst);
    }

    pub fn deny_display(&self, deny: bool) {
        self.deny_display.store(deny, Ordering::SeqCst);
    }

    /// How many capture requests were made, granted or not.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_user_media.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("camera and microphone".into()));
        }
        if self.no_devices.load(Ordering::SeqCst) {
            return Err(MediaError::NoDevice("camera and microphone".into()));
        }

        let mut tracks = Vec::with_capacity(2);
        if let Some(video) = &constraints.video {
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                TrackSource::Camera,
                format!("Synthetic camera {}x{}", video.width, video.height),
            ));
        }
        if constraints.audio.is_some() {
            tracks.push(MediaTrack::new(
                TrackKind::Audio,
                TrackSource::Microphone,
                "Synthetic microphone",
            ));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn display_media(&self) -> Result<MediaStream, MediaError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_display.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("screen".into()));
        }
        Ok(MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            TrackSource::Display,
            "Synthetic screen",
        )]))
    }
}

/// Recorders whose chunks are pushed by hand.
#[derive(Debug, Default)]
pub struct ManualRecorders {
    vp9_unsupported: bool,
    current: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl ManualRecorders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_vp9() -> Self {
        Self {
            vp9_unsupported: true,
            ..Self::default()
        }
    }

    /// Deliver one chunk from the running recorder. `false` if none runs.
    pub fn push_chunk(&self, chunk: impl Into<Bytes>) -> bool {
        let current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match current.as_ref() {
            Some(tx) => tx.send(chunk.into()).is_ok(),
            None => false,
        }
    }
}

struct ManualRecorder;

impl Recorder for ManualRecorder {
    fn stop(&mut self) {}
}

impl RecorderFactory for ManualRecorders {
    fn create(
        &self,
        _stream: &MediaStream,
        mime_type: &str,
        _timeslice: Duration,
        chunks: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn Recorder>, MediaError> {
        if self.vp9_unsupported && mime_type.contains("vp9") {
            return Err(MediaError::Unsupported(mime_type.to_string()));
        }
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(chunks);
        Ok(Box::new(ManualRecorder))
    }
}
