//! Local recording of the call's outgoing stream.
//!
//! Chunks are delivered by the recorder over a channel and kept in arrival
//! order; `stop` concatenates them into a single artifact and saves it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use huddle_shared::constants::{
    RECORDING_FILE_PREFIX, RECORDING_MIME_FALLBACK, RECORDING_MIME_PREFERRED,
    RECORDING_TIMESLICE_MS,
};

use crate::devices::MediaError;
use crate::stream::MediaStream;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("No recorder available: {0}")]
    Unavailable(#[from] MediaError),

    #[error("Failed to save {file_name}: {source}")]
    Save {
        file_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A running encoder attached to a stream.
pub trait Recorder: Send {
    /// Flush the final chunk (if any) into the chunk channel and finish.
    fn stop(&mut self);
}

/// Creates recorders. Fails with [`MediaError::Unsupported`] for a container
/// or codec the platform cannot produce.
pub trait RecorderFactory: Send + Sync {
    fn create(
        &self,
        stream: &MediaStream,
        mime_type: &str,
        timeslice: Duration,
        chunks: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Box<dyn Recorder>, MediaError>;
}

/// Where finished files go: a download folder or equivalent.
pub trait ArtifactSink: Send + Sync {
    fn save(&self, file_name: &str, data: &[u8]) -> std::io::Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

/// Memory-only buffer of one recording. Discarded after save.
#[derive(Debug)]
pub struct RecordingSession {
    pub chunks: Vec<Bytes>,
    pub state: RecordingState,
}

#[derive(Debug, Clone)]
pub struct RecordedArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
    pub saved_to: PathBuf,
}

struct ActiveRecorder {
    recorder: Box<dyn Recorder>,
    stream: MediaStream,
    mime_type: String,
    chunks_rx: mpsc::UnboundedReceiver<Bytes>,
}

pub struct RecordingService {
    factory: Arc<dyn RecorderFactory>,
    sink: Arc<dyn ArtifactSink>,
    session: RecordingSession,
    active: Option<ActiveRecorder>,
}

impl RecordingService {
    pub fn new(factory: Arc<dyn RecorderFactory>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            factory,
            sink,
            session: RecordingSession {
                chunks: Vec::new(),
                state: RecordingState::Idle,
            },
            active: None,
        }
    }

    /// Attach a recorder to `stream`, preferring VP9 and falling back to
    /// plain WebM.
    pub fn start(&mut self, stream: &MediaStream) -> Result<(), RecordingError> {
        if self.active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let timeslice = Duration::from_millis(RECORDING_TIMESLICE_MS);
        let (tx, rx) = mpsc::unbounded_channel();
        let (recorder, mime_type) = match self.factory.create(
            stream,
            RECORDING_MIME_PREFERRED,
            timeslice,
            tx.clone(),
        ) {
            Ok(r) => (r, RECORDING_MIME_PREFERRED),
            Err(e) => {
                debug!(error = %e, "Preferred codec unavailable, falling back");
                let r = self
                    .factory
                    .create(stream, RECORDING_MIME_FALLBACK, timeslice, tx)?;
                (r, RECORDING_MIME_FALLBACK)
            }
        };

        self.session.chunks.clear();
        self.session.state = RecordingState::Recording;
        self.active = Some(ActiveRecorder {
            recorder,
            stream: stream.clone(),
            mime_type: mime_type.to_string(),
            chunks_rx: rx,
        });
        info!(mime = mime_type, "Recording started");
        Ok(())
    }

    /// Move a running recording onto `stream`, keeping the chunks captured
    /// so far. The new recorder uses the same container as the old one.
    pub fn rebind(&mut self, stream: &MediaStream) -> Result<(), RecordingError> {
        let Some(active) = self.active.as_mut() else {
            return Err(RecordingError::NotRecording);
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = self.factory.create(
            stream,
            &active.mime_type,
            Duration::from_millis(RECORDING_TIMESLICE_MS),
            tx,
        )?;

        active.recorder.stop();
        drain_chunks(&mut active.chunks_rx, &mut self.session.chunks);
        active.recorder = recorder;
        active.chunks_rx = rx;
        active.stream = stream.clone();
        info!(
            stream = %stream.id(),
            kept_chunks = self.session.chunks.len(),
            "Recording moved to new stream"
        );
        Ok(())
    }

    /// Stream the running recorder captures.
    pub fn source(&self) -> Option<&MediaStream> {
        self.active.as_ref().map(|a| &a.stream)
    }

    /// Move delivered chunks into the buffer. Empty chunks are skipped.
    pub fn collect(&mut self) {
        if let Some(active) = self.active.as_mut() {
            drain_chunks(&mut active.chunks_rx, &mut self.session.chunks);
        }
    }

    /// Finalize, concatenate chunks in arrival order and save the artifact
    /// as `video-call-<unix-millis>.webm`.
    pub fn stop(&mut self) -> Result<RecordedArtifact, RecordingError> {
        let Some(mut active) = self.active.take() else {
            return Err(RecordingError::NotRecording);
        };
        active.recorder.stop();
        drain_chunks(&mut active.chunks_rx, &mut self.session.chunks);

        let chunks = std::mem::take(&mut self.session.chunks);
        self.session.state = RecordingState::Idle;

        let mut data = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }
        let data = data.freeze();

        let file_name = format!(
            "{}-{}.webm",
            RECORDING_FILE_PREFIX,
            Utc::now().timestamp_millis()
        );
        let saved_to = self
            .sink
            .save(&file_name, &data)
            .map_err(|source| {
                warn!(file = %file_name, error = %source, "Failed to save recording");
                RecordingError::Save {
                    file_name: file_name.clone(),
                    source,
                }
            })?;

        info!(
            file = %file_name,
            chunks = chunks.len(),
            bytes = data.len(),
            "Recording saved"
        );
        Ok(RecordedArtifact {
            file_name,
            mime_type: active.mime_type,
            data,
            saved_to,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.session.state == RecordingState::Recording
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }
}

fn drain_chunks(rx: &mut mpsc::UnboundedReceiver<Bytes>, into: &mut Vec<Bytes>) {
    while let Ok(chunk) = rx.try_recv() {
        if !chunk.is_empty() {
            into.push(chunk);
        }
    }
}
