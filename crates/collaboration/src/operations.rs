//! Document operations replicated between peers. Every mutation of a room
//! document is one of these, tagged with its origin peer, a per-peer sequence
//! number and a Lamport clock.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{LamportClock, PeerId};

/// Identity of one character element in the draft sequence. Runs inserted by
/// one operation occupy consecutive counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElemId {
    pub peer: PeerId,
    pub counter: u64,
}

/// Identity of one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub uuid::Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// A structured entry in the shared queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub text: String,
    pub author: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Unique operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

/// One replicated mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocOperation {
    pub id: OperationId,

    /// Peer that created the operation.
    pub peer: PeerId,

    /// Per-peer sequence number; replicas apply a peer's operations in order.
    pub seq: u64,

    /// Lamport timestamp: the tiebreak for concurrent edits.
    pub clock: LamportClock,

    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub kind: OperationKind,

    /// Operations that created this operation's anchor or targets. A replica
    /// holds an operation back until all of these have been applied.
    pub parents: Vec<OperationId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationKind {
    /// Insert a run of characters after `anchor` (None = head of draft).
    /// Characters take ids `start.counter..start.counter + len`.
    #[serde(rename = "insert_draft")]
    InsertDraft {
        anchor: Option<ElemId>,
        start: ElemId,
        text: String,
    },

    /// Tombstone draft characters.
    #[serde(rename = "delete_draft")]
    DeleteDraft { targets: Vec<ElemId> },

    /// Append an entry to the shared queue.
    #[serde(rename = "push_entry")]
    PushEntry { entry: QueueEntry },

    /// Remove a queue entry by id; a no-op if already removed.
    #[serde(rename = "remove_entry")]
    RemoveEntry { entry_id: EntryId },
}

/// Append-only log of applied operations.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    pub operations: Vec<DocOperation>,
    ids: HashSet<OperationId>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied operation. Duplicates are ignored.
    pub fn add_operation(&mut self, op: DocOperation) {
        if self.ids.insert(op.id) {
            self.operations.push(op);
        }
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_deduplicates_by_id() {
        let mut log = OperationLog::new();
        let op = DocOperation {
            id: OperationId::new(),
            peer: PeerId::new(),
            seq: 1,
            clock: LamportClock(1),
            timestamp: chrono::Utc::now(),
            kind: OperationKind::RemoveEntry {
                entry_id: EntryId::new(),
            },
            parents: Vec::new(),
        };
        log.add_operation(op.clone());
        log.add_operation(op.clone());
        assert_eq!(log.len(), 1);
        assert!(log.contains(&op.id));
    }
}
