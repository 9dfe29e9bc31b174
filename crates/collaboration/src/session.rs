//! Room registry and relay. Connections are addressed by a namespace plus a
//! room name; rooms come into being on first attach, live in process memory,
//! and are garbage-collected when the last peer leaves. The manager relays
//! operations between peers and keeps a replica per room only so late
//! joiners can be brought up to date.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::{
    AwarenessState, AwarenessTracker, AwarenessUpdate, CollaborationError, DocOperation, PeerId,
    Result, RoomDocument, SyncMessage, VectorClock,
};

/// Leading path segment every collaboration connection must use.
pub const COLLAB_NAMESPACE: &str = "collaboration";

/// Room joined when the path names no room explicitly.
pub const DEFAULT_ROOM: &str = "shared-rules";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Resolve a room from a connection's request path, e.g.
    /// `/collaboration/manage-rules`. Unknown namespaces are rejected.
    pub fn from_request_path(path: &str) -> Result<Self> {
        let path = path.split('?').next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.first().copied() != Some(COLLAB_NAMESPACE) {
            return Err(CollaborationError::TransportRejected(format!(
                "unknown collaboration namespace in path {path:?}"
            )));
        }
        Ok(Self(
            segments.get(1).copied().unwrap_or(DEFAULT_ROOM).to_string(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type PeerSender = mpsc::UnboundedSender<SyncMessage>;

struct Room {
    doc: RoomDocument,
    peers: HashMap<PeerId, PeerSender>,
    awareness: AwarenessTracker,
}

impl Room {
    fn new() -> Self {
        Self {
            // The relay's replica gets its own peer id; it never edits.
            doc: RoomDocument::new(PeerId::new()),
            peers: HashMap::new(),
            awareness: AwarenessTracker::new(),
        }
    }

    fn broadcast(&self, message: &SyncMessage, exclude: Option<PeerId>) {
        for (peer_id, tx) in &self.peers {
            if Some(*peer_id) == exclude {
                continue;
            }
            if tx.send(message.clone()).is_err() {
                // Peer is mid-disconnect; detach will clean it up.
                warn!(peer = %peer_id, "failed to relay to peer");
            }
        }
    }
}

/// Shared registry of live rooms.
pub struct SessionManager {
    rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bring a peer into a room, creating the room if needed. Replies with
    /// the operations the peer is missing and announces it to the others.
    pub async fn attach(
        &self,
        room_id: &RoomId,
        peer_id: PeerId,
        state: AwarenessState,
        since: &VectorClock,
        tx: PeerSender,
    ) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.clone()).or_insert_with(|| {
            info!(room = %room_id, "creating room");
            Room::new()
        });

        let missing = room.doc.operations_since(since);
        let connected = SyncMessage::Connected {
            room: room_id.clone(),
            peer_id,
            missing,
            vector_clock: room.doc.vector_clock().clone(),
        };
        tx.send(connected)
            .map_err(|_| CollaborationError::ChannelClosed(peer_id.to_string()))?;

        let joined = SyncMessage::Awareness {
            update: AwarenessUpdate::PeerJoined {
                peer_id,
                state: state.clone(),
            },
        };
        room.broadcast(&joined, None);

        room.peers.insert(peer_id, tx);
        room.awareness.update(peer_id, state);
        info!(room = %room_id, peer = %peer_id, peers = room.peers.len(), "peer attached");
        Ok(())
    }

    /// Apply an update to the room replica and relay it to everyone else.
    pub async fn handle_update(
        &self,
        room_id: &RoomId,
        from: PeerId,
        operations: Vec<DocOperation>,
    ) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| CollaborationError::RoomNotFound(room_id.to_string()))?;
        room.doc.apply_remote_batch(operations.clone());
        room.broadcast(&SyncMessage::Update { operations }, Some(from));
        Ok(())
    }

    pub async fn handle_sync_request(
        &self,
        room_id: &RoomId,
        since: &VectorClock,
    ) -> Result<SyncMessage> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(room_id)
            .ok_or_else(|| CollaborationError::RoomNotFound(room_id.to_string()))?;
        Ok(SyncMessage::SyncResponse {
            operations: room.doc.operations_since(since),
            vector_clock: room.doc.vector_clock().clone(),
        })
    }

    /// Record an awareness change and relay it. Not applied to the document.
    pub async fn handle_awareness(
        &self,
        room_id: &RoomId,
        from: PeerId,
        update: AwarenessUpdate,
    ) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| CollaborationError::RoomNotFound(room_id.to_string()))?;
        match &update {
            AwarenessUpdate::PeerJoined { peer_id, state }
            | AwarenessUpdate::StateChanged { peer_id, state } => {
                room.awareness.update(*peer_id, state.clone());
            }
            AwarenessUpdate::PeerLeft { peer_id } => {
                room.awareness.remove(peer_id);
            }
        }
        room.broadcast(&SyncMessage::Awareness { update }, Some(from));
        Ok(())
    }

    /// Drop a peer, tell the room, and garbage-collect the room when it was
    /// the last one. Returns true when the room was removed.
    pub async fn detach(&self, room_id: &RoomId, peer_id: PeerId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        room.peers.remove(&peer_id);
        room.awareness.remove(&peer_id);
        room.broadcast(
            &SyncMessage::Awareness {
                update: AwarenessUpdate::PeerLeft { peer_id },
            },
            None,
        );
        info!(room = %room_id, peer = %peer_id, "peer detached");
        if room.peers.is_empty() {
            rooms.remove(room_id);
            info!(room = %room_id, "room empty, garbage-collected");
            return true;
        }
        false
    }

    /// Clear awareness entries that have not been renewed within `ttl` and
    /// tell each room. Connections themselves are left alone.
    pub async fn sweep_awareness(&self, ttl: chrono::Duration) {
        let mut rooms = self.rooms.write().await;
        for (room_id, room) in rooms.iter_mut() {
            for peer_id in room.awareness.sweep_stale(ttl) {
                debug!(room = %room_id, peer = %peer_id, "awareness timed out");
                room.broadcast(
                    &SyncMessage::Awareness {
                        update: AwarenessUpdate::PeerLeft { peer_id },
                    },
                    None,
                );
            }
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn peer_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.peers.len())
            .unwrap_or(0)
    }

    pub async fn awareness_of(&self, room_id: &RoomId) -> Vec<(PeerId, AwarenessState)> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| {
                r.awareness
                    .all()
                    .into_iter()
                    .map(|p| (p.peer_id, p.state.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_path_resolves_namespace_and_name() {
        let room = RoomId::from_request_path("/collaboration/manage-rules").unwrap();
        assert_eq!(room.as_str(), "manage-rules");

        let with_query = RoomId::from_request_path("/collaboration/manage-rules?token=abc").unwrap();
        assert_eq!(with_query.as_str(), "manage-rules");

        let default = RoomId::from_request_path("/collaboration").unwrap();
        assert_eq!(default.as_str(), DEFAULT_ROOM);
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        for path in ["/api/rules", "/", "", "/collab/manage-rules"] {
            assert!(matches!(
                RoomId::from_request_path(path),
                Err(CollaborationError::TransportRejected(_))
            ));
        }
    }
}
