//! Two sessions wired together through the loopback substrate.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use huddle_client::downloads::FsDownloads;
use huddle_client::loopback::{LoopbackEndpoint, LoopbackHub, ManualRecorders, SyntheticDevices};
use huddle_client::{
    CallState, MessageKind, Session, SessionConfig, SessionError, SessionEvent, SessionNotice,
    Substrate,
};
use huddle_media::{SilentRingtone, TrackSource, VideoSource};
use huddle_net::{ConnectionState, DataTransport};
use huddle_shared::types::{MessageId, PeerId, Sender};

struct Peer {
    session: Session,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    endpoint: Arc<LoopbackEndpoint>,
    devices: Arc<SyntheticDevices>,
    recorders: Arc<ManualRecorders>,
    dir: TempDir,
}

impl Peer {
    fn id(&self) -> PeerId {
        self.session.self_id().clone()
    }

    fn drain_notices(&mut self) -> Vec<SessionNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}

async fn try_peer(
    hub: &LoopbackHub,
    name: &str,
    tweak: impl FnOnce(&mut SessionConfig),
) -> Result<Peer, SessionError> {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SessionConfig {
        display_name: Some(name.to_string()),
        name_file: None,
        download_dir: dir.path().join("downloads"),
        ..SessionConfig::default()
    };
    tweak(&mut config);

    let (events_tx, events) = mpsc::unbounded_channel();
    let endpoint = hub.endpoint(events_tx.clone());
    let devices = Arc::new(SyntheticDevices::new());
    let recorders = Arc::new(ManualRecorders::new());
    let substrate = Substrate {
        data: endpoint.clone(),
        calls: endpoint.clone(),
        devices: devices.clone(),
        recorders: recorders.clone(),
        ringtone: Arc::new(SilentRingtone),
        downloads: Arc::new(FsDownloads::new(config.download_dir.clone())),
    };
    let (session, notices) = Session::start(config, substrate, events_tx).await?;
    Ok(Peer {
        session,
        events,
        notices,
        endpoint,
        devices,
        recorders,
        dir,
    })
}

async fn peer(hub: &LoopbackHub, name: &str) -> Peer {
    try_peer(hub, name, |_| {}).await.unwrap()
}

/// Deliver queued events and let spawned capture requests finish.
async fn settle(peers: &mut [&mut Peer]) {
    for _ in 0..20 {
        for p in peers.iter_mut() {
            while let Ok(event) = p.events.try_recv() {
                p.session.handle_event(event);
            }
        }
        tokio::task::yield_now().await;
    }
}

async fn connected(hub: &LoopbackHub) -> (Peer, Peer) {
    let mut a = peer(hub, "Ada Lovelace").await;
    let mut b = peer(hub, "Bob").await;
    a.session.connect_to(b.id()).unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert!(a.session.connection().is_open());
    assert!(b.session.connection().is_open());
    (a, b)
}

async fn in_call(hub: &LoopbackHub) -> (Peer, Peer) {
    let (mut a, mut b) = connected(hub).await;
    a.session.start_call().unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(b.session.call().state(), CallState::Ringing);
    b.session.accept_call().unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.call().state(), CallState::Active);
    assert_eq!(b.session.call().state(), CallState::Active);
    (a, b)
}

#[tokio::test]
async fn test_raw_message_lands_once_on_peer() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;

    let channel = a.session.connection().connection().unwrap().channel.clone();
    a.endpoint
        .send(&channel, r#"{"type":"message","id":"m1","text":"hi"}"#)
        .unwrap();
    settle(&mut [&mut a, &mut b]).await;

    let from_peer: Vec<_> = b
        .session
        .chat()
        .messages()
        .iter()
        .filter(|m| m.sender == Sender::Peer && m.kind == MessageKind::Text)
        .collect();
    assert_eq!(from_peer.len(), 1);
    assert_eq!(from_peer[0].id, MessageId::from("m1"));
    assert_eq!(from_peer[0].text.as_deref(), Some("hi"));
}

#[tokio::test]
async fn test_names_exchanged_on_open_and_rename() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;
    assert_eq!(b.session.remote_name(), "Ada Lovelace");
    assert_eq!(a.session.remote_name(), "Bob");

    a.session.rename("Ada").unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(b.session.remote_name(), "Ada");
    assert!(b
        .drain_notices()
        .contains(&SessionNotice::RemoteRenamed { name: "Ada".into() }));

    let roster = b.session.roster();
    assert_eq!(roster.len(), 2);
    assert!(roster[0].is_self);
    assert_eq!(roster[1].name, "Ada");
    assert_eq!(roster[1].avatar.initials, "A");
}

#[tokio::test]
async fn test_chat_changes_converge() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;

    let id = a.session.send_text("helo").unwrap();
    settle(&mut [&mut a, &mut b]).await;

    b.session.react(&id, "👍").unwrap();
    settle(&mut [&mut a, &mut b]).await;
    let reactions = &a.session.chat().get(&id).unwrap().reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].sender, Sender::Peer);

    a.session.edit(&id, "hello").unwrap();
    settle(&mut [&mut a, &mut b]).await;
    let on_b = b.session.chat().get(&id).unwrap();
    assert_eq!(on_b.text.as_deref(), Some("hello"));
    assert!(on_b.is_edited);

    a.session.delete(&id).unwrap();
    a.session.delete(&id).unwrap();
    settle(&mut [&mut a, &mut b]).await;
    let on_a = a.session.chat().get(&id).unwrap();
    let on_b = b.session.chat().get(&id).unwrap();
    assert!(on_a.is_deleted && on_b.is_deleted);
    assert!(on_b.text.is_none());
}

#[tokio::test]
async fn test_file_sent_and_saved() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;

    let path = a.dir.path().join("notes.txt");
    std::fs::write(&path, b"meeting at noon").unwrap();
    let id = a.session.send_file(&path).await.unwrap();
    settle(&mut [&mut a, &mut b]).await;

    let file = b.session.chat().attachment(&id).unwrap();
    assert_eq!(file.name, "notes.txt");
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(file.size, 15);

    let saved = b.session.save_file(&id).unwrap();
    assert_eq!(saved.file_name().unwrap(), "notes.txt");
    assert_eq!(std::fs::read(&saved).unwrap(), b"meeting at noon");
}

#[tokio::test]
async fn test_file_over_limit_not_sent() {
    let hub = LoopbackHub::new();
    let mut a = try_peer(&hub, "Ada", |c| c.max_file_size = 4).await.unwrap();
    let mut b = peer(&hub, "Bob").await;
    a.session.connect_to(b.id()).unwrap();
    settle(&mut [&mut a, &mut b]).await;

    let path = a.dir.path().join("big.bin");
    std::fs::write(&path, b"12345").unwrap();
    let err = a.session.send_file(&path).await.unwrap_err();
    assert!(matches!(err, SessionError::Chat(_)));
    settle(&mut [&mut a, &mut b]).await;
    assert!(b
        .session
        .chat()
        .messages()
        .iter()
        .all(|m| m.kind != MessageKind::File));
}

#[tokio::test]
async fn test_inbound_call_rejected_without_media() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;

    a.session.start_call().unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.call().state(), CallState::Dialing);
    assert_eq!(b.session.call().state(), CallState::Ringing);

    b.session.reject_call().unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(b.session.call().state(), CallState::Idle);
    assert_eq!(a.session.call().state(), CallState::Idle);
    assert_eq!(b.devices.requests(), 0);
}

#[tokio::test]
async fn test_os_stop_sharing_reverts_to_camera() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = in_call(&hub).await;
    let call = a.session.call().call().call_id.clone().unwrap();

    a.session.toggle_screen_share().unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.call().negotiator().outgoing_source(), VideoSource::Screen);
    assert_eq!(
        hub.outgoing_video(&call, &a.id()).unwrap().source(),
        TrackSource::Display
    );

    let display = a.session.call().preview_stream().unwrap().clone();
    display.stop_all();
    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(a.session.call().negotiator().outgoing_source(), VideoSource::Camera);
    let sent = hub.outgoing_video(&call, &a.id()).unwrap();
    assert_eq!(sent.source(), TrackSource::Camera);
    assert!(sent.is_live());
    assert_eq!(a.session.call().state(), CallState::Active);
    assert!(a
        .drain_notices()
        .contains(&SessionNotice::ScreenShareChanged { sharing: false }));
}

#[tokio::test]
async fn test_display_denied_keeps_camera() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = in_call(&hub).await;
    a.devices.deny_display(true);
    a.drain_notices();

    a.session.toggle_screen_share().unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.call().negotiator().outgoing_source(), VideoSource::Camera);
    assert_eq!(a.session.call().state(), CallState::Active);
    assert!(a.drain_notices().iter().any(|n| matches!(
        n,
        SessionNotice::Error {
            guidance: Some(_),
            fatal: false,
            ..
        }
    )));
}

#[tokio::test]
async fn test_remote_hangup_and_recording_saved() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = in_call(&hub).await;

    a.session.start_recording().unwrap();
    for chunk in ["c1", "c2", "c3"] {
        assert!(a.recorders.push_chunk(chunk));
    }

    b.session.end_call();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.call().state(), CallState::Idle);
    assert_eq!(b.session.call().state(), CallState::Idle);

    let saved_to = a
        .drain_notices()
        .into_iter()
        .find_map(|n| match n {
            SessionNotice::RecordingChanged {
                recording: false,
                saved_to,
            } => saved_to,
            _ => None,
        })
        .unwrap();
    assert!(saved_to.starts_with(a.dir.path()));
    assert_eq!(std::fs::read(&saved_to).unwrap(), b"c1c2c3");
    assert!(a
        .session
        .chat()
        .messages()
        .iter()
        .any(|m| m.kind == MessageKind::System
            && m.text.as_deref().is_some_and(|t| t.starts_with("Call ended"))));
}

#[tokio::test]
async fn test_end_call_when_idle_is_noop() {
    let hub = LoopbackHub::new();
    let mut a = peer(&hub, "Ada").await;
    a.drain_notices();
    a.session.end_call();
    a.session.end_call();
    assert_eq!(a.session.call().state(), CallState::Idle);
    assert!(a.drain_notices().is_empty());
}

#[tokio::test]
async fn test_permission_denied_returns_to_idle() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;
    a.devices.deny_user_media(true);

    a.session.start_call().unwrap();
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.call().state(), CallState::Idle);
    assert_eq!(b.session.call().state(), CallState::Idle);
    assert!(a.drain_notices().iter().any(|n| matches!(
        n,
        SessionNotice::Error {
            guidance: Some(_),
            ..
        }
    )));
}

#[tokio::test]
async fn test_busy_peer_refuses_third_connection() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;
    let mut c = peer(&hub, "Cy").await;

    c.session.connect_to(a.id()).unwrap();
    settle(&mut [&mut a, &mut b, &mut c]).await;

    assert_eq!(a.session.connection().remote_id(), Some(&b.id()));
    assert!(a.session.connection().is_open());
    assert_eq!(c.session.connection().state(), ConnectionState::Closed);
    assert!(a
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::Warning { .. })));
}

#[tokio::test]
async fn test_join_link_connects_automatically() {
    let hub = LoopbackHub::new();
    let mut host = peer(&hub, "Host").await;
    let link = host.session.join_link().unwrap().to_string();
    assert!(link.contains(&format!("room={}", host.id())));

    let mut guest = try_peer(&hub, "Guest", |c| c.join_link = Some(link))
        .await
        .unwrap();
    settle(&mut [&mut host, &mut guest]).await;
    assert_eq!(guest.session.connection().remote_id(), Some(&host.id()));
    assert!(host.session.connection().is_open());
}

#[tokio::test]
async fn test_dropped_connection_is_reported() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;
    let channel = a.session.connection().connection().unwrap().channel.clone();
    a.drain_notices();

    hub.sever(&channel);
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.connection().state(), ConnectionState::Closed);
    assert_eq!(b.session.connection().state(), ConnectionState::Closed);
    assert!(a
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::Error { fatal: false, .. })));
    assert!(a.session.send_text("anyone?").is_err());
}

#[tokio::test]
async fn test_registration_failure_is_fatal() {
    let hub = LoopbackHub::new();
    hub.refuse_registrations(true);
    let Err(err) = try_peer(&hub, "Ada", |_| {}).await else {
        panic!("session should not start");
    };
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_blank_rename_is_refused_but_not_fatal() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;

    let err = a.session.rename("   ").unwrap_err();
    assert!(!err.is_fatal());
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.session.identity().display_name(), "Ada Lovelace");
    assert_eq!(b.session.remote_name(), "Ada Lovelace");
    assert!(a.session.connection().is_open());
}

#[tokio::test]
async fn test_switching_peer_forgets_previous_remote() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected(&hub).await;
    assert_eq!(a.session.remote_name(), "Bob");

    a.session.connect_to(PeerId::new("ghost")).unwrap();
    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(a.session.connection().state(), ConnectionState::Closed);
    assert_eq!(a.session.remote_name(), "Peer");
    assert!(a
        .session
        .chat()
        .messages()
        .iter()
        .any(|m| m.kind == MessageKind::System && m.text.as_deref() == Some("Disconnected")));
    assert_eq!(a.session.roster().len(), 1);
    assert_eq!(b.session.connection().state(), ConnectionState::Closed);
}
