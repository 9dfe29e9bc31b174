//! Ephemeral who-is-here state, one entry per connection. Overwritten on
//! every update, dropped on disconnect or timeout, never persisted.
use schedule::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::PeerId;

/// What a peer shares about itself with the rest of the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    pub user_id: String,
    pub display_name: String,
    pub role: Capability,
}

#[derive(Debug, Clone)]
pub struct PeerAwareness {
    pub peer_id: PeerId,
    pub state: AwarenessState,
    pub last_renewed: chrono::DateTime<chrono::Utc>,
}

/// Tracks awareness for all peers in one room.
#[derive(Debug, Clone, Default)]
pub struct AwarenessTracker {
    peers: HashMap<PeerId, PeerAwareness>,
}

impl AwarenessTracker {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Insert or overwrite a peer's state and renew its timestamp.
    pub fn update(&mut self, peer_id: PeerId, state: AwarenessState) {
        self.peers.insert(
            peer_id,
            PeerAwareness {
                peer_id,
                state,
                last_renewed: chrono::Utc::now(),
            },
        );
    }

    pub fn remove(&mut self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerAwareness> {
        self.peers.get(peer_id)
    }

    pub fn all(&self) -> Vec<&PeerAwareness> {
        self.peers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop peers that have not renewed within `ttl`; returns who was dropped.
    pub fn sweep_stale(&mut self, ttl: chrono::Duration) -> Vec<PeerId> {
        let now = chrono::Utc::now();
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| now - p.last_renewed > ttl)
            .map(|p| p.peer_id)
            .collect();
        for peer_id in &stale {
            self.peers.remove(peer_id);
        }
        stale
    }
}

/// Awareness change relayed to the rest of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AwarenessUpdate {
    #[serde(rename = "peer_joined")]
    PeerJoined { peer_id: PeerId, state: AwarenessState },

    #[serde(rename = "state_changed")]
    StateChanged { peer_id: PeerId, state: AwarenessState },

    #[serde(rename = "peer_left")]
    PeerLeft { peer_id: PeerId },
}
