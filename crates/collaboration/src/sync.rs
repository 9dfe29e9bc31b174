//! Wire protocol for room synchronization: a state-vector exchange on
//! connect, then incremental update broadcasts. The server only relays;
//! merge logic lives in each peer's document replica.
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    AwarenessState, AwarenessUpdate, DocOperation, DocSnapshot, EntryId, PeerId, RoomDocument,
    RoomId, VectorClock,
};

/// Messages exchanged between a peer and the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    /// First message on a connection: who is joining and what it has seen.
    #[serde(rename = "connect")]
    Connect {
        peer_id: PeerId,
        state: AwarenessState,
        vector_clock: VectorClock,
    },

    /// Server reply carrying the operations the joiner is missing plus the
    /// server replica's state vector, so the joiner can push back its own
    /// unseen operations.
    #[serde(rename = "connected")]
    Connected {
        room: RoomId,
        peer_id: PeerId,
        missing: Vec<DocOperation>,
        vector_clock: VectorClock,
    },

    /// Incremental document change, relayed to every other peer in the room.
    #[serde(rename = "update")]
    Update { operations: Vec<DocOperation> },

    #[serde(rename = "sync_request")]
    SyncRequest { since: VectorClock },

    #[serde(rename = "sync_response")]
    SyncResponse {
        operations: Vec<DocOperation>,
        vector_clock: VectorClock,
    },

    #[serde(rename = "awareness")]
    Awareness { update: AwarenessUpdate },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,
}

/// Peer-side protocol driver: owns a document replica and turns local edits
/// into outbound messages and inbound messages into replica changes.
pub struct SyncClient {
    room: RoomId,
    doc: RoomDocument,
    state: AwarenessState,
    snapshot_tx: watch::Sender<DocSnapshot>,
}

impl SyncClient {
    pub fn new(room: RoomId, state: AwarenessState) -> Self {
        let doc = RoomDocument::new(PeerId::new());
        let (snapshot_tx, _) = watch::channel(doc.snapshot());
        Self {
            room,
            doc,
            state,
            snapshot_tx,
        }
    }

    /// Observe the document: a fresh plain snapshot is published after every
    /// applied change, local or remote.
    pub fn subscribe(&self) -> watch::Receiver<DocSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.doc.snapshot());
    }

    pub fn peer_id(&self) -> PeerId {
        self.doc.peer()
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn document(&self) -> &RoomDocument {
        &self.doc
    }

    pub fn snapshot(&self) -> DocSnapshot {
        self.doc.snapshot()
    }

    /// Opening handshake message.
    pub fn hello(&self) -> SyncMessage {
        SyncMessage::Connect {
            peer_id: self.peer_id(),
            state: self.state.clone(),
            vector_clock: self.doc.vector_clock().clone(),
        }
    }

    pub fn set_draft(&mut self, value: &str) -> Option<SyncMessage> {
        let operations = self.doc.set_draft(value);
        self.publish();
        if operations.is_empty() {
            None
        } else {
            Some(SyncMessage::Update { operations })
        }
    }

    pub fn insert_text(&mut self, pos: usize, text: &str) -> Option<SyncMessage> {
        let op = self.doc.insert_text(pos, text);
        self.publish();
        op.map(|op| SyncMessage::Update { operations: vec![op] })
    }

    pub fn delete_text(&mut self, pos: usize, len: usize) -> Option<SyncMessage> {
        let op = self.doc.delete_text(pos, len);
        self.publish();
        op.map(|op| SyncMessage::Update { operations: vec![op] })
    }

    pub fn push_entry(&mut self, text: &str, author: &str) -> SyncMessage {
        let op = self.doc.push_entry(text, author);
        self.publish();
        SyncMessage::Update {
            operations: vec![op],
        }
    }

    pub fn remove_entry(&mut self, entry_id: EntryId) -> Option<SyncMessage> {
        let op = self.doc.remove_entry(entry_id);
        self.publish();
        op.map(|op| SyncMessage::Update { operations: vec![op] })
    }

    /// Awareness renewal; also used to announce state changes.
    pub fn renew_presence(&self) -> SyncMessage {
        SyncMessage::Awareness {
            update: AwarenessUpdate::StateChanged {
                peer_id: self.peer_id(),
                state: self.state.clone(),
            },
        }
    }

    /// Feed one inbound message; returns the messages to send back.
    pub fn handle_message(&mut self, message: SyncMessage) -> Vec<SyncMessage> {
        match message {
            SyncMessage::Connected {
                missing,
                vector_clock,
                ..
            } => {
                self.doc.apply_remote_batch(missing);
                self.publish();
                // Second half of the exchange: push what the server lacks.
                let push_back = self.doc.operations_since(&vector_clock);
                if push_back.is_empty() {
                    Vec::new()
                } else {
                    vec![SyncMessage::Update {
                        operations: push_back,
                    }]
                }
            }
            SyncMessage::Update { operations } => {
                self.doc.apply_remote_batch(operations);
                self.publish();
                Vec::new()
            }
            SyncMessage::SyncResponse { operations, .. } => {
                self.doc.apply_remote_batch(operations);
                self.publish();
                Vec::new()
            }
            SyncMessage::SyncRequest { since } => vec![SyncMessage::SyncResponse {
                operations: self.doc.operations_since(&since),
                vector_clock: self.doc.vector_clock().clone(),
            }],
            SyncMessage::Ping => vec![SyncMessage::Pong],
            _ => Vec::new(),
        }
    }
}
