//! Derived participant list. Recomputed from session state, never stored
//! on its own.

use serde::Serialize;

use huddle_net::ConnectionState;
use huddle_shared::types::PeerId;

use crate::call::CallState;
use crate::identity::PeerIdentity;

const AVATAR_COLORS: &[&str] = &[
    "bg-blue-500",
    "bg-green-500",
    "bg-purple-500",
    "bg-pink-500",
    "bg-orange-500",
    "bg-teal-500",
    "bg-indigo-500",
    "bg-red-500",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Avatar {
    pub initials: String,
    pub color: &'static str,
}

impl Avatar {
    pub fn for_name(name: &str) -> Self {
        let initials: String = name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect();
        let initials = if initials.is_empty() {
            "?".to_string()
        } else {
            initials
        };
        let hash = name
            .chars()
            .fold(0usize, |acc, c| acc.wrapping_mul(31).wrapping_add(c as usize));
        Self {
            initials,
            color: AVATAR_COLORS[hash % AVATAR_COLORS.len()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: PeerId,
    pub name: String,
    pub avatar: Avatar,
    pub is_online: bool,
    pub is_self: bool,
}

/// Everything the roster depends on.
#[derive(Debug, Clone, Copy)]
pub struct RosterInputs<'a> {
    pub identity: Option<&'a PeerIdentity>,
    pub connection_state: ConnectionState,
    pub connection_remote: Option<&'a PeerId>,
    pub call_state: CallState,
    pub call_remote: Option<&'a PeerId>,
    pub remote_name: &'a str,
}

/// Self first (once registered), then the remote while connected or while a
/// call is being placed, ringing or running.
pub fn participants(inputs: RosterInputs<'_>) -> Vec<Participant> {
    let mut roster = Vec::with_capacity(2);

    if let Some(identity) = inputs.identity {
        roster.push(Participant {
            id: identity.self_id().clone(),
            name: identity.display_name().to_string(),
            avatar: Avatar::for_name(identity.display_name()),
            is_online: true,
            is_self: true,
        });
    }

    let connected = inputs.connection_state == ConnectionState::Open;
    let in_call = matches!(
        inputs.call_state,
        CallState::Dialing | CallState::Ringing | CallState::Active
    );
    let remote = if in_call {
        inputs.call_remote.or(inputs.connection_remote)
    } else if connected {
        inputs.connection_remote
    } else {
        None
    };

    if let Some(remote) = remote {
        roster.push(Participant {
            id: remote.clone(),
            name: inputs.remote_name.to_string(),
            avatar: Avatar::for_name(inputs.remote_name),
            is_online: true,
            is_self: false,
        });
    }

    roster
}
