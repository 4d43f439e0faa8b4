use url::Url;

use crate::constants::ROOM_QUERY_PARAM;
use crate::types::PeerId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("Invalid join link: {0}")]
    InvalidUrl(String),

    #[error("Join link has no room")]
    MissingRoom,
}

/// Shareable link that lets a second participant dial the host.
/// The host's peer id rides in the `room` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinLink {
    url: Url,
}

impl JoinLink {
    /// Build the link for `peer` under `base`, replacing any existing `room`.
    pub fn for_peer(base: &str, peer: &PeerId) -> Result<Self, InviteError> {
        let mut url = Url::parse(base).map_err(|e| InviteError::InvalidUrl(e.to_string()))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != ROOM_QUERY_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(ROOM_QUERY_PARAM, peer.as_str());
        }
        Ok(Self { url })
    }

    pub fn parse(link: &str) -> Result<Self, InviteError> {
        let url = Url::parse(link.trim()).map_err(|e| InviteError::InvalidUrl(e.to_string()))?;
        Ok(Self { url })
    }

    /// The peer id encoded in the link, if any.
    pub fn room(&self) -> Result<PeerId, InviteError> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == ROOM_QUERY_PARAM)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PeerId)
            .ok_or(InviteError::MissingRoom)
    }

    /// Shorthand for `parse(link)?.room()`.
    pub fn room_of(link: &str) -> Result<PeerId, InviteError> {
        Self::parse(link)?.room()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl std::fmt::Display for JoinLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
