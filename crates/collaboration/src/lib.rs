//! Real-time collaboration core for SmartSchedule.
//! One CRDT document per room (a shared rules draft plus an ordered entry
//! queue), ephemeral awareness, and a session manager that relays updates
//! between peers without interpreting document contents.
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod operations;
pub use operations::*;

mod document;
pub use document::*;

mod awareness;
pub use awareness::*;

mod sync;
pub use sync::*;

mod session;
pub use session::*;

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("transport rejected: {0}")]
    TransportRejected(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("peer channel closed: {0}")]
    ChannelClosed(String),
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

/// Peer identifier: one per connection, not per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub uuid::Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lamport timestamp for ordering concurrent edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LamportClock(pub u64);

impl LamportClock {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn tick(&mut self) {
        self.0 += 1;
    }

    pub fn update(&mut self, other: LamportClock) {
        self.0 = self.0.max(other.0) + 1;
    }
}

impl Default for LamportClock {
    fn default() -> Self {
        Self::new()
    }
}
