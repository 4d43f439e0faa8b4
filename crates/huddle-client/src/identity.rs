//! Who we are to the transport: the registered peer id plus a display name
//! that survives restarts.

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info, warn};

use huddle_net::DataTransport;
use huddle_shared::constants::DEFAULT_NAME_PREFIX;
use huddle_shared::error::IdentityError;
use huddle_shared::protocol::Envelope;
use huddle_shared::types::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    self_id: PeerId,
    display_name: String,
}

impl PeerIdentity {
    /// Register with the transport. Failure here is fatal for the session.
    pub async fn register(
        transport: &dyn DataTransport,
        display_name: String,
    ) -> Result<Self, IdentityError> {
        let self_id = transport.register().await.map_err(|e| {
            warn!(error = %e, "Peer registration failed");
            IdentityError::RegistrationFailed(e.to_string())
        })?;
        info!(peer_id = %self_id, name = %display_name, "Registered");
        Ok(Self {
            self_id,
            display_name,
        })
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Set a new display name. Returns the `name` envelope to announce it.
    pub fn rename(&mut self, name: &str) -> Result<Envelope, IdentityError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IdentityError::EmptyName);
        }
        debug!(old = %self.display_name, new = %name, "Display name changed");
        self.display_name = name.to_string();
        Ok(self.name_envelope())
    }

    pub fn name_envelope(&self) -> Envelope {
        Envelope::Name {
            name: self.display_name.clone(),
        }
    }
}

/// Plain-text file holding the last chosen display name.
#[derive(Debug, Clone)]
pub struct NameStore {
    path: PathBuf,
}

impl NameStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<String> {
        let name = std::fs::read_to_string(&self.path).ok()?;
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn save(&self, name: &str) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IdentityError::NameStore(e.to_string()))?;
        }
        std::fs::write(&self.path, name).map_err(|e| IdentityError::NameStore(e.to_string()))
    }
}

/// Configured name, else stored name, else a fresh `Participant NNN` that is
/// stored for next time.
pub fn resolve_display_name(configured: Option<&str>, store: Option<&NameStore>) -> String {
    if let Some(name) = configured.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = store.and_then(NameStore::load) {
        return name;
    }

    let name = generate_display_name();
    if let Some(store) = store {
        if let Err(e) = store.save(&name) {
            warn!(path = %store.path().display(), error = %e, "Could not store display name");
        }
    }
    name
}

pub fn generate_display_name() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1000);
    format!("{DEFAULT_NAME_PREFIX} {n}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use huddle_shared::error::TransportError;
    use huddle_shared::types::ChannelId;

    struct Broker(Result<PeerId, TransportError>);

    #[async_trait]
    impl DataTransport for Broker {
        async fn register(&self) -> Result<PeerId, TransportError> {
            self.0.clone()
        }
        fn open_channel(&self, _remote: &PeerId) -> Result<ChannelId, TransportError> {
            Err(TransportError::NotConnected)
        }
        fn send(&self, _channel: &ChannelId, _payload: &str) -> Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }
        fn close_channel(&self, _channel: &ChannelId) {}
    }

    #[tokio::test]
    async fn test_register_and_rename() {
        let broker = Broker(Ok(PeerId::new("abc")));
        let mut identity = PeerIdentity::register(&broker, "Ann".into()).await.unwrap();
        assert_eq!(identity.self_id().as_str(), "abc");

        let envelope = identity.rename("  Bea ").unwrap();
        assert_eq!(identity.display_name(), "Bea");
        assert_eq!(envelope, Envelope::Name { name: "Bea".into() });

        assert_eq!(identity.rename("   "), Err(IdentityError::EmptyName));
        assert_eq!(identity.display_name(), "Bea");
    }

    #[tokio::test]
    async fn test_registration_failure_is_identity_error() {
        let broker = Broker(Err(TransportError::Signaling("broker down".into())));
        let err = PeerIdentity::register(&broker, "Ann".into())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::RegistrationFailed(_)));
    }

    #[test]
    fn test_generated_name_is_stored_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = NameStore::at(dir.path().join("nested/name"));

        let first = resolve_display_name(None, Some(&store));
        assert!(first.starts_with("Participant "));
        assert_eq!(store.load().as_deref(), Some(first.as_str()));
        assert_eq!(resolve_display_name(None, Some(&store)), first);
        assert_eq!(resolve_display_name(Some(" Cy "), Some(&store)), "Cy");
    }

    #[test]
    fn test_generated_name_range() {
        for _ in 0..50 {
            let name = generate_display_name();
            let n: u32 = name.trim_start_matches("Participant ").parse().unwrap();
            assert!(n < 1000);
        }
    }
}
