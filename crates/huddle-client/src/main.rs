//! # huddle
//!
//! Runs two participants in one process over the loopback substrate: the
//! host publishes a join link, the guest opens it, they chat, call, share a
//! screen and hang up. Every notice is logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use huddle_client::downloads::FsDownloads;
use huddle_client::loopback::{LoopbackHub, ManualRecorders, SyntheticDevices};
use huddle_client::{init_tracing, Session, SessionCommand, SessionConfig, SessionNotice, Substrate};
use huddle_media::SilentRingtone;

struct Participant {
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
    link: Option<String>,
}

async fn spawn_participant(
    label: &'static str,
    hub: &LoopbackHub,
    config: SessionConfig,
) -> anyhow::Result<Participant> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let endpoint = hub.endpoint(events_tx.clone());
    let substrate = Substrate {
        data: endpoint.clone(),
        calls: endpoint,
        devices: Arc::new(SyntheticDevices::new()),
        recorders: Arc::new(ManualRecorders::new()),
        ringtone: Arc::new(SilentRingtone),
        downloads: Arc::new(FsDownloads::new(config.download_dir.clone())),
    };

    let (session, mut notices) = Session::start(config, substrate, events_tx).await?;
    let link = session.join_link().ok().map(|l| l.to_string());

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match &notice {
                SessionNotice::Error { message, guidance, .. } => {
                    tracing::warn!(who = label, %message, guidance = ?guidance, "Error notice")
                }
                other => match other.to_json() {
                    Ok(payload) => info!(who = label, event = other.name(), %payload, "Notice"),
                    Err(e) => tracing::warn!(who = label, error = %e, "Unserializable notice"),
                },
            }
        }
    });

    let (commands, commands_rx) = mpsc::channel(32);
    let task = tokio::spawn(session.run(commands_rx, events_rx));
    Ok(Participant {
        commands,
        task,
        link,
    })
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting huddle demo v{}", env!("CARGO_PKG_VERSION"));

    let config = SessionConfig::from_env();
    info!(?config, "Loaded configuration");

    let hub = LoopbackHub::new();
    let host = spawn_participant("host", &hub, config.clone()).await?;
    let link = host
        .link
        .clone()
        .ok_or_else(|| anyhow::anyhow!("host has no join link"))?;
    info!(%link, "Share this link");

    let guest_config = SessionConfig {
        display_name: Some("Guest".into()),
        join_link: Some(link),
        name_file: None,
        ..config
    };
    let guest = spawn_participant("guest", &hub, guest_config).await?;
    pause().await;

    guest
        .commands
        .send(SessionCommand::SendText("hi, can you hear me?".into()))
        .await?;
    host.commands.send(SessionCommand::StartCall).await?;
    pause().await;
    guest.commands.send(SessionCommand::AcceptCall).await?;
    pause().await;

    host.commands.send(SessionCommand::ToggleScreenShare).await?;
    pause().await;
    host.commands.send(SessionCommand::ToggleScreenShare).await?;
    pause().await;

    host.commands.send(SessionCommand::EndCall).await?;
    pause().await;

    for participant in [host, guest] {
        participant.commands.send(SessionCommand::Shutdown).await?;
        participant.task.await?;
    }
    info!("Demo finished");
    Ok(())
}
