//! The session: the one owner of identity, connection, chat and call state,
//! and the single place transport and media events are dispatched.
//!
//! The substrate pushes [`SessionEvent`]s into one queue. Front ends drive
//! the session either by calling its methods directly or by sending
//! [`SessionCommand`]s to [`Session::run`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use huddle_media::{
    acquire, ArtifactSink, CallSignal, CallTransport, MediaDevices, MediaError, MediaEvent,
    MediaStream, MediaTrackNegotiator, RecordedArtifact, RecorderFactory, RecordingService,
    RingtoneOutput,
};
use huddle_net::{ChannelEvent, ConnectionManager, ConnectionState, ConnectionUpdate, DataTransport};
use huddle_shared::constants::{DEFAULT_REMOTE_NAME, RECORDING_TIMESLICE_MS};
use huddle_shared::error::TransportError;
use huddle_shared::format::format_call_duration;
use huddle_shared::invite::{InviteError, JoinLink};
use huddle_shared::protocol::Envelope;
use huddle_shared::types::{MessageId, PeerId};

use crate::call::{CallController, CallState, CallSummary, CallUpdate, MediaOutcome, MediaPurpose, MediaTicket};
use crate::chat::{ChatError, ChatLog, Inbound};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{emit_notice, SessionNotice};
use crate::identity::{resolve_display_name, NameStore, PeerIdentity};
use crate::roster::{participants, Participant, RosterInputs};

/// Everything the substrate reports back.
#[derive(Debug)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    Call(CallSignal),
    Media(MediaEvent),
    /// A capture requested through a [`MediaTicket`] finished.
    MediaReady {
        ticket: u64,
        result: Result<MediaStream, MediaError>,
    },
}

/// User intents for [`Session::run`].
#[derive(Debug)]
pub enum SessionCommand {
    ConnectTo(PeerId),
    Disconnect,
    Rename(String),
    SendText(String),
    SendFile(PathBuf),
    React { id: MessageId, emoji: String },
    Edit { id: MessageId, text: String },
    Delete { id: MessageId },
    SaveFile { id: MessageId },
    StartCall,
    AcceptCall,
    RejectCall,
    EndCall,
    ToggleVideo,
    ToggleAudio,
    ToggleScreenShare,
    StartRecording,
    StopRecording,
    Shutdown,
}

/// The pieces a session runs on.
pub struct Substrate {
    pub data: Arc<dyn DataTransport>,
    pub calls: Arc<dyn CallTransport>,
    pub devices: Arc<dyn MediaDevices>,
    pub recorders: Arc<dyn RecorderFactory>,
    pub ringtone: Arc<dyn RingtoneOutput>,
    pub downloads: Arc<dyn ArtifactSink>,
}

pub struct Session {
    config: SessionConfig,
    identity: PeerIdentity,
    names: Option<NameStore>,
    remote_name: String,
    connection: ConnectionManager,
    chat: ChatLog,
    call: CallController,
    devices: Arc<dyn MediaDevices>,
    downloads: Arc<dyn ArtifactSink>,
    events: mpsc::UnboundedSender<SessionEvent>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    roster: Vec<Participant>,
    forwarder: JoinHandle<()>,
}

impl Session {
    /// Register with the substrate and set everything up. `events` is the
    /// sending half of the queue the substrate reports into.
    ///
    /// Fails only when registration fails; nothing else is fatal.
    pub async fn start(
        config: SessionConfig,
        substrate: Substrate,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionNotice>), SessionError> {
        let (notices, notices_rx) = mpsc::unbounded_channel();

        let names = config.name_file.as_ref().map(NameStore::at);
        let display_name = resolve_display_name(config.display_name.as_deref(), names.as_ref());
        let identity = PeerIdentity::register(substrate.data.as_ref(), display_name)
            .await
            .map_err(|e| {
                error!(error = %e, "Session cannot start");
                SessionError::from(e)
            })?;

        let (media_tx, mut media_rx) = mpsc::unbounded_channel();
        let forward = events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = media_rx.recv().await {
                if forward.send(SessionEvent::Media(event)).is_err() {
                    break;
                }
            }
        });

        let call = CallController::new(
            substrate.calls,
            config.constraints.clone(),
            MediaTrackNegotiator::new(media_tx),
            RecordingService::new(substrate.recorders, Arc::clone(&substrate.downloads)),
            substrate.ringtone,
        );

        info!(
            peer_id = %identity.self_id(),
            name = %identity.display_name(),
            ice_servers = ?config.ice_servers,
            "Session started"
        );

        let mut session = Self {
            chat: ChatLog::new(config.max_file_size),
            connection: ConnectionManager::new(substrate.data),
            remote_name: DEFAULT_REMOTE_NAME.to_string(),
            devices: substrate.devices,
            downloads: substrate.downloads,
            roster: Vec::new(),
            config,
            identity,
            names,
            call,
            events,
            notices,
            forwarder,
        };

        let join_link = match session.join_link() {
            Ok(link) => Some(link.to_string()),
            Err(e) => {
                warn!(error = %e, "Cannot build join link");
                None
            }
        };
        session.emit(SessionNotice::Registered {
            peer_id: session.identity.self_id().clone(),
            join_link,
        });
        session.refresh_roster();

        if let Some(link) = session.config.join_link.clone() {
            session.auto_join(&link);
        }

        Ok((session, notices_rx))
    }

    /// Dispatch commands and events until shut down.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let mut collect = tokio::time::interval(Duration::from_millis(RECORDING_TIMESLICE_MS));

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(e) = self.execute(command).await {
                            self.report(&e);
                        }
                    }
                },

                Some(event) = events.recv() => self.handle_event(event),

                _ = collect.tick() => self.call.collect_recording(),
            }
        }

        self.shutdown();
        info!("Session loop stopped");
    }

    async fn execute(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        debug!(?command, "Command");
        match command {
            SessionCommand::ConnectTo(remote) => self.connect_to(remote),
            SessionCommand::Disconnect => {
                self.disconnect();
                Ok(())
            }
            SessionCommand::Rename(name) => self.rename(&name),
            SessionCommand::SendText(text) => self.send_text(&text).map(drop),
            SessionCommand::SendFile(path) => self.send_file(&path).await.map(drop),
            SessionCommand::React { id, emoji } => self.react(&id, &emoji),
            SessionCommand::Edit { id, text } => self.edit(&id, &text),
            SessionCommand::Delete { id } => self.delete(&id),
            SessionCommand::SaveFile { id } => self.save_file(&id).map(drop),
            SessionCommand::StartCall => self.start_call(),
            SessionCommand::AcceptCall => self.accept_call(),
            SessionCommand::RejectCall => self.reject_call(),
            SessionCommand::EndCall => {
                self.end_call();
                Ok(())
            }
            SessionCommand::ToggleVideo => {
                self.toggle_video();
                Ok(())
            }
            SessionCommand::ToggleAudio => {
                self.toggle_audio();
                Ok(())
            }
            SessionCommand::ToggleScreenShare => self.toggle_screen_share(),
            SessionCommand::StartRecording => self.start_recording(),
            SessionCommand::StopRecording => self.stop_recording().map(drop),
            SessionCommand::Shutdown => Ok(()),
        }
    }

    // -- Accessors --

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn self_id(&self) -> &PeerId {
        self.identity.self_id()
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn call(&self) -> &CallController {
        &self.call
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Link that lets someone else dial us.
    pub fn join_link(&self) -> Result<JoinLink, InviteError> {
        JoinLink::for_peer(&self.config.link_base, self.identity.self_id())
    }

    pub fn roster(&self) -> Vec<Participant> {
        participants(RosterInputs {
            identity: Some(&self.identity),
            connection_state: self.connection.state(),
            connection_remote: self.connection.remote_id(),
            call_state: self.call.state(),
            call_remote: self.call.remote_id(),
            remote_name: &self.remote_name,
        })
    }

    // -- Connection --

    pub fn connect_to(&mut self, remote: PeerId) -> Result<(), SessionError> {
        if remote == *self.identity.self_id() {
            return Err(SessionError::SelfConnect);
        }
        if self
            .connection
            .remote_id()
            .is_some_and(|current| *current != remote)
        {
            self.disconnect();
        }
        let result = self.connection.connect_to(&remote);
        self.emit_connection();
        self.refresh_roster();
        result.map_err(Into::into)
    }

    pub fn disconnect(&mut self) {
        if self.connection.connection().is_some() {
            self.connection.close();
            self.on_disconnected();
        }
    }

    fn auto_join(&mut self, link: &str) {
        match JoinLink::room_of(link) {
            Ok(room) if room == *self.identity.self_id() => {
                debug!("Join link points at ourselves, not connecting");
            }
            Ok(room) => {
                info!(room = %room.short(), "Joining from link");
                if let Err(e) = self.connect_to(room) {
                    self.report(&e);
                }
            }
            Err(e) => self.report(&e.into()),
        }
    }

    // -- Identity --

    /// Change our display name, remember it and tell the peer.
    pub fn rename(&mut self, name: &str) -> Result<(), SessionError> {
        let envelope = self.identity.rename(name)?;
        if let Some(names) = &self.names {
            if let Err(e) = names.save(self.identity.display_name()) {
                warn!(error = %e, "Could not store display name");
            }
        }
        if self.connection.is_open() {
            if let Err(e) = self.transmit(&envelope) {
                self.report(&e);
            }
        }
        self.refresh_roster();
        Ok(())
    }

    // -- Chat --

    pub fn send_text(&mut self, text: &str) -> Result<MessageId, SessionError> {
        self.require_open()?;
        let (id, envelope) = self.chat.send_text(text)?;
        self.emit(SessionNotice::MessageAdded { id: id.clone() });
        self.transmit(&envelope)?;
        Ok(id)
    }

    /// Read a file from disk and send it whole.
    pub async fn send_file(&mut self, path: &Path) -> Result<MessageId, SessionError> {
        self.require_open()?;
        let size = tokio::fs::metadata(path).await?.len();
        if size > self.config.max_file_size as u64 {
            return Err(ChatError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            }
            .into());
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let data = tokio::fs::read(path).await?;
        self.send_file_bytes(&name, &mime_type, Bytes::from(data))
    }

    pub fn send_file_bytes(
        &mut self,
        name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<MessageId, SessionError> {
        self.require_open()?;
        let (id, envelope) = self.chat.send_file(name, mime_type, data)?;
        info!(id = %id, file = %name, "Sending file");
        self.emit(SessionNotice::MessageAdded { id: id.clone() });
        self.transmit(&envelope)?;
        Ok(id)
    }

    pub fn react(&mut self, id: &MessageId, emoji: &str) -> Result<(), SessionError> {
        let envelope = self.chat.toggle_reaction(id, emoji)?;
        self.emit(SessionNotice::MessageUpdated { id: id.clone() });
        self.transmit_if_open(&envelope)
    }

    pub fn edit(&mut self, id: &MessageId, text: &str) -> Result<(), SessionError> {
        let envelope = self.chat.edit(id, text)?;
        self.emit(SessionNotice::MessageUpdated { id: id.clone() });
        self.transmit_if_open(&envelope)
    }

    pub fn delete(&mut self, id: &MessageId) -> Result<(), SessionError> {
        match self.chat.delete(id)? {
            Some(envelope) => {
                self.emit(SessionNotice::MessageUpdated { id: id.clone() });
                self.transmit_if_open(&envelope)
            }
            None => Ok(()),
        }
    }

    /// Write an attachment to the download folder under its own name.
    pub fn save_file(&mut self, id: &MessageId) -> Result<PathBuf, SessionError> {
        let file = self.chat.attachment(id)?;
        let path = self.downloads.save(&file.name, &file.data)?;
        self.emit(SessionNotice::FileSaved { path: path.clone() });
        Ok(path)
    }

    // -- Call --

    /// Call the peer we are connected to.
    pub fn start_call(&mut self) -> Result<(), SessionError> {
        let Some(remote) = self
            .connection
            .remote_id()
            .filter(|_| self.connection.is_open())
            .cloned()
        else {
            return Err(TransportError::NotConnected.into());
        };
        let ticket = self.call.start_call(remote)?;
        self.emit_call_state();
        self.fulfil(ticket);
        self.refresh_roster();
        Ok(())
    }

    pub fn accept_call(&mut self) -> Result<(), SessionError> {
        let ticket = self.call.accept_call()?;
        self.fulfil(ticket);
        Ok(())
    }

    pub fn reject_call(&mut self) -> Result<(), SessionError> {
        self.call.reject_call()?;
        self.emit_call_state();
        self.refresh_roster();
        Ok(())
    }

    /// Hang up. Safe to call at any time.
    pub fn end_call(&mut self) {
        let before = self.call.state();
        match self.call.end_call() {
            Some(summary) => self.after_call(summary),
            None if before != self.call.state() => self.emit_call_state(),
            None => debug!("No call to end"),
        }
        self.refresh_roster();
    }

    pub fn toggle_video(&mut self) -> bool {
        self.call.toggle_video()
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.call.toggle_audio()
    }

    pub fn toggle_screen_share(&mut self) -> Result<(), SessionError> {
        let ticket = self.call.toggle_screen_share()?;
        if ticket.purpose == MediaPurpose::RestoreCamera {
            self.emit(SessionNotice::ScreenShareChanged { sharing: false });
        }
        self.fulfil(ticket);
        Ok(())
    }

    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        self.call.start_recording()?;
        self.emit(SessionNotice::RecordingChanged {
            recording: true,
            saved_to: None,
        });
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<RecordedArtifact, SessionError> {
        let artifact = self.call.stop_recording()?;
        self.emit(SessionNotice::RecordingChanged {
            recording: false,
            saved_to: Some(artifact.saved_to.clone()),
        });
        Ok(artifact)
    }

    /// Run a capture request off the dispatcher; the result comes back as
    /// [`SessionEvent::MediaReady`].
    fn fulfil(&self, ticket: MediaTicket) {
        let devices = Arc::clone(&self.devices);
        let events = self.events.clone();
        debug!(ticket = ticket.id, purpose = ?ticket.purpose, "Requesting media");
        tokio::spawn(async move {
            let result = acquire(devices.as_ref(), &ticket.request).await;
            if events
                .send(SessionEvent::MediaReady {
                    ticket: ticket.id,
                    result,
                })
                .is_err()
            {
                debug!(ticket = ticket.id, "Session gone before media arrived");
            }
        });
    }

    fn after_call(&mut self, summary: CallSummary) {
        self.chat.push_system(format!(
            "Call ended ({})",
            format_call_duration(summary.duration_seconds)
        ));
        self.emit(SessionNotice::CallStateChanged {
            state: CallState::Ended,
            remote: summary.remote.clone(),
        });
        if let Some(artifact) = summary.recording {
            self.emit(SessionNotice::RecordingChanged {
                recording: false,
                saved_to: Some(artifact.saved_to),
            });
        }
        if let Some(e) = summary.recording_error {
            self.report(&e.into());
        }
        self.emit_call_state();
    }

    // -- Events --

    /// Fold one substrate event into the session.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Channel(event) => self.on_channel(event),
            SessionEvent::Call(signal) => self.on_call_signal(signal),
            SessionEvent::Media(event) => match self.call.on_media_event(event) {
                Ok(Some(ticket)) => {
                    self.emit(SessionNotice::ScreenShareChanged { sharing: false });
                    self.fulfil(ticket);
                }
                Ok(None) => {}
                Err(e) => self.report(&e.into()),
            },
            SessionEvent::MediaReady { ticket, result } => self.on_media_ready(ticket, result),
        }
        self.refresh_roster();
    }

    fn on_channel(&mut self, event: ChannelEvent) {
        match self.connection.handle_event(event) {
            ConnectionUpdate::Accepted { .. } => self.emit_connection(),
            ConnectionUpdate::Refused { remote } => self.emit(SessionNotice::Warning {
                message: format!("Refused connection from {}: already connected", remote.short()),
            }),
            ConnectionUpdate::Opened { remote } => {
                let envelope = self.identity.name_envelope();
                if let Err(e) = self.transmit(&envelope) {
                    self.report(&e);
                }
                self.chat
                    .push_system(format!("Connected to {}", remote.short()));
                self.emit_connection();
            }
            ConnectionUpdate::Data(payload) => self.on_data(&payload),
            ConnectionUpdate::Closed { .. } => self.on_disconnected(),
            ConnectionUpdate::Failed { error, .. } => {
                self.emit_connection();
                self.report(&error.into());
            }
            ConnectionUpdate::Ignored => {}
        }
    }

    fn on_disconnected(&mut self) {
        self.remote_name = DEFAULT_REMOTE_NAME.to_string();
        self.chat.push_system("Disconnected");
        self.emit_connection();
    }

    fn on_data(&mut self, payload: &str) {
        match self.chat.receive(payload) {
            Ok(Inbound::Renamed(name)) => {
                let name = name.trim();
                if name.is_empty() {
                    return;
                }
                info!(name = %name, "Peer renamed");
                self.remote_name = name.to_string();
                self.emit(SessionNotice::RemoteRenamed {
                    name: self.remote_name.clone(),
                });
            }
            Ok(Inbound::Appended(id)) => self.emit(SessionNotice::MessageAdded { id }),
            Ok(Inbound::Updated(id)) => self.emit(SessionNotice::MessageUpdated { id }),
            Ok(Inbound::Unchanged) => {}
            Err(e) => warn!(error = %e, "Dropping inbound envelope"),
        }
    }

    fn on_call_signal(&mut self, signal: CallSignal) {
        match self.call.on_signal(signal) {
            CallUpdate::Ringing { .. } | CallUpdate::Connected { .. } => self.emit_call_state(),
            CallUpdate::Refused { remote } => self.emit(SessionNotice::Warning {
                message: format!("Refused call from {}: already in a call", remote.short()),
            }),
            CallUpdate::Missed { remote } => {
                self.chat
                    .push_system(format!("Missed call from {}", remote.short()));
                self.emit_call_state();
            }
            CallUpdate::Ended(summary) => self.after_call(summary),
            CallUpdate::Failed { summary, error } => {
                self.after_call(summary);
                self.report(&error.into());
            }
            CallUpdate::RemoteStreamReplaced | CallUpdate::Ignored => {}
        }
    }

    fn on_media_ready(&mut self, ticket: u64, result: Result<MediaStream, MediaError>) {
        let before = self.call.state();
        match self.call.complete_media(ticket, result) {
            Ok(MediaOutcome::ScreenShareStarted) => {
                self.emit(SessionNotice::ScreenShareChanged { sharing: true })
            }
            Ok(outcome) => debug!(?outcome, "Media request completed"),
            Err(e) => self.report(&e.into()),
        }
        if self.call.state() != before {
            self.emit_call_state();
        }
    }

    // -- Helpers --

    fn require_open(&self) -> Result<(), SessionError> {
        if self.connection.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotConnected.into())
        }
    }

    fn transmit(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let payload = envelope.to_json()?;
        debug!(kind = envelope.kind(), bytes = payload.len(), "Envelope sent");
        self.connection.send(&payload)?;
        Ok(())
    }

    fn transmit_if_open(&self, envelope: &Envelope) -> Result<(), SessionError> {
        if self.connection.is_open() {
            self.transmit(envelope)
        } else {
            debug!(kind = envelope.kind(), "Not connected, change kept local");
            Ok(())
        }
    }

    /// Log an error and turn it into a notice.
    fn report(&self, e: &SessionError) {
        if e.is_fatal() {
            error!(error = %e, "Fatal session error");
        } else {
            warn!(error = %e, "Session error");
        }
        self.emit(SessionNotice::Error {
            message: e.to_string(),
            guidance: e.guidance(),
            fatal: e.is_fatal(),
        });
    }

    fn emit(&self, notice: SessionNotice) {
        emit_notice(&self.notices, notice);
    }

    fn emit_connection(&self) {
        self.emit(SessionNotice::ConnectionChanged {
            state: self.connection.state(),
            remote: self.connection.remote_id().cloned(),
        });
    }

    fn emit_call_state(&self) {
        self.emit(SessionNotice::CallStateChanged {
            state: self.call.state(),
            remote: self.call.remote_id().cloned(),
        });
    }

    fn refresh_roster(&mut self) {
        let roster = self.roster();
        if roster != self.roster {
            self.roster = roster.clone();
            self.emit(SessionNotice::RosterChanged {
                participants: roster,
            });
        }
    }

    /// End any call and close the connection.
    pub fn shutdown(&mut self) {
        self.end_call();
        if self.connection.state() != ConnectionState::Closed {
            self.connection.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
