//! Media side of a call: tracks and streams, capture devices, call signaling,
//! source negotiation (camera vs. screen), local recording and the ringtone.

pub mod devices;
pub mod negotiator;
pub mod recording;
pub mod ringtone;
pub mod signaling;
pub mod stream;

pub use devices::{
    acquire, AudioConfig, MediaConstraints, MediaDevices, MediaError, MediaRequest, VideoConfig,
};
pub use negotiator::{MediaEvent, MediaTrackNegotiator, NegotiationError, VideoSource};
pub use recording::{
    ArtifactSink, RecordedArtifact, Recorder, RecorderFactory, RecordingError, RecordingService,
    RecordingState,
};
pub use ringtone::{Ringtone, RingtoneOutput, SilentRingtone};
pub use signaling::{CallSignal, CallTransport};
pub use stream::{MediaStream, MediaTrack, TrackId, TrackKind, TrackSource};
