//! CRDT document for a collaboration room: a shared rules draft (character
//! sequence with tombstone deletes) and an ordered queue of structured
//! entries. Operation-based: replicas exchange operations and integrate them
//! deterministically, so any delivery order converges.
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::{
    DocOperation, ElemId, EntryId, LamportClock, OperationId, OperationKind, OperationLog, PeerId,
    QueueEntry,
};

/// Per-peer operation counts, exchanged on connect so a late joiner receives
/// only what it is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorClock {
    clocks: HashMap<PeerId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self {
            clocks: HashMap::new(),
        }
    }

    pub fn get(&self, peer: PeerId) -> u64 {
        *self.clocks.get(&peer).unwrap_or(&0)
    }

    /// Record that `seq` operations from `peer` have been applied.
    pub fn observe(&mut self, peer: PeerId, seq: u64) {
        let current = self.clocks.entry(peer).or_insert(0);
        *current = (*current).max(seq);
    }

    /// Take the pointwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (peer, &count) in &other.clocks {
            let current = self.clocks.entry(*peer).or_insert(0);
            *current = (*current).max(count);
        }
    }

    /// True when neither clock dominates the other.
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        let peers: HashSet<_> = self.clocks.keys().chain(other.clocks.keys()).collect();

        let mut less = false;
        let mut greater = false;

        for peer in peers {
            let self_val = self.get(*peer);
            let other_val = other.get(*peer);
            if self_val < other_val {
                less = true;
            }
            if self_val > other_val {
                greater = true;
            }
        }

        less && greater
    }
}

/// One character of the draft. Deleted characters remain as tombstones so
/// concurrent operations can still anchor on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftElem {
    id: ElemId,
    clock: LamportClock,
    ch: char,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct QueueElem {
    entry: QueueEntry,
    clock: LamportClock,
    peer: PeerId,
}

/// Plain view of the document, re-derived for observers after every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocSnapshot {
    pub draft: String,
    pub queue: Vec<QueueEntry>,
}

/// A replica of one room's shared document.
#[derive(Debug, Clone)]
pub struct RoomDocument {
    peer: PeerId,
    clock: LamportClock,
    log: OperationLog,
    vector_clock: VectorClock,
    elems: Vec<DraftElem>,
    queue: Vec<QueueElem>,
    elem_origin: HashMap<ElemId, OperationId>,
    entry_origin: HashMap<EntryId, OperationId>,
    /// Operations received before their dependencies; applied once ready.
    pending: Vec<DocOperation>,
    next_counter: u64,
}

impl RoomDocument {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            clock: LamportClock::new(),
            log: OperationLog::new(),
            vector_clock: VectorClock::new(),
            elems: Vec::new(),
            queue: Vec::new(),
            elem_origin: HashMap::new(),
            entry_origin: HashMap::new(),
            pending: Vec::new(),
            next_counter: 0,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    pub fn snapshot(&self) -> DocSnapshot {
        DocSnapshot {
            draft: self
                .elems
                .iter()
                .filter(|e| !e.deleted)
                .map(|e| e.ch)
                .collect(),
            queue: self.queue.iter().map(|q| q.entry.clone()).collect(),
        }
    }

    pub fn draft(&self) -> String {
        self.snapshot().draft
    }

    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        self.queue.iter().map(|q| q.entry.clone()).collect()
    }

    /// Replace the whole draft in one local transaction: tombstone everything
    /// currently visible, then insert the new value at the head. Concurrent
    /// remote insertions are not touched and survive the replace.
    pub fn set_draft(&mut self, new_value: &str) -> Vec<DocOperation> {
        let mut ops = Vec::new();
        let visible: Vec<ElemId> = self
            .elems
            .iter()
            .filter(|e| !e.deleted)
            .map(|e| e.id)
            .collect();
        if !visible.is_empty() {
            let parents = self.origins_of(&visible);
            ops.push(self.create_local_op(OperationKind::DeleteDraft { targets: visible }, parents));
        }
        if !new_value.is_empty() {
            ops.push(self.local_insert(None, new_value));
        }
        ops
    }

    /// Insert at a visible character position (clamped to the draft length).
    pub fn insert_text(&mut self, pos: usize, text: &str) -> Option<DocOperation> {
        if text.is_empty() {
            return None;
        }
        let visible: Vec<ElemId> = self
            .elems
            .iter()
            .filter(|e| !e.deleted)
            .map(|e| e.id)
            .collect();
        let pos = pos.min(visible.len());
        let anchor = if pos == 0 {
            None
        } else {
            Some(visible[pos - 1])
        };
        Some(self.local_insert(anchor, text))
    }

    /// Tombstone `len` visible characters starting at `pos`.
    pub fn delete_text(&mut self, pos: usize, len: usize) -> Option<DocOperation> {
        let targets: Vec<ElemId> = self
            .elems
            .iter()
            .filter(|e| !e.deleted)
            .skip(pos)
            .take(len)
            .map(|e| e.id)
            .collect();
        if targets.is_empty() {
            return None;
        }
        let parents = self.origins_of(&targets);
        Some(self.create_local_op(OperationKind::DeleteDraft { targets }, parents))
    }

    pub fn push_entry(&mut self, text: &str, author: &str) -> DocOperation {
        let entry = QueueEntry {
            id: EntryId::new(),
            text: text.to_string(),
            author: author.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.create_local_op(OperationKind::PushEntry { entry }, Vec::new())
    }

    /// Remove a queue entry. Returns None without error when the id is
    /// already gone, so concurrent removals stay quiet.
    pub fn remove_entry(&mut self, entry_id: EntryId) -> Option<DocOperation> {
        if !self.queue.iter().any(|q| q.entry.id == entry_id) {
            return None;
        }
        let parents = self.entry_origin.get(&entry_id).copied().into_iter().collect();
        Some(self.create_local_op(OperationKind::RemoveEntry { entry_id }, parents))
    }

    /// Integrate an operation from another replica. Out-of-order delivery is
    /// fine: operations wait until their origin-peer sequence and parents
    /// have been applied. Re-delivery is ignored.
    pub fn apply_remote(&mut self, op: DocOperation) {
        if self.log.contains(&op.id) {
            return;
        }
        self.clock.update(op.clock);
        if !self.is_ready(&op) {
            self.pending.push(op);
            return;
        }
        self.apply(&op);
        self.drain_pending();
    }

    pub fn apply_remote_batch(&mut self, operations: Vec<DocOperation>) {
        for op in operations {
            self.apply_remote(op);
        }
    }

    /// Operations the holder of `since` has not seen yet, in local
    /// application order (a valid causal order).
    pub fn operations_since(&self, since: &VectorClock) -> Vec<DocOperation> {
        self.log
            .operations
            .iter()
            .filter(|op| op.seq > since.get(op.peer))
            .cloned()
            .collect()
    }

    /// Fold another replica's history into this one.
    pub fn merge(&mut self, other: &RoomDocument) {
        self.apply_remote_batch(other.log.operations.to_vec());
    }

    pub fn operation_count(&self) -> usize {
        self.log.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn origins_of(&self, targets: &[ElemId]) -> Vec<OperationId> {
        let mut parents: Vec<OperationId> = Vec::new();
        for target in targets {
            if let Some(origin) = self.elem_origin.get(target) {
                if !parents.contains(origin) {
                    parents.push(*origin);
                }
            }
        }
        parents
    }

    fn local_insert(&mut self, anchor: Option<ElemId>, text: &str) -> DocOperation {
        let start = ElemId {
            peer: self.peer,
            counter: self.next_counter,
        };
        self.next_counter += text.chars().count() as u64;
        let parents = anchor
            .and_then(|a| self.elem_origin.get(&a).copied())
            .into_iter()
            .collect();
        self.create_local_op(
            OperationKind::InsertDraft {
                anchor,
                start,
                text: text.to_string(),
            },
            parents,
        )
    }

    fn create_local_op(&mut self, kind: OperationKind, parents: Vec<OperationId>) -> DocOperation {
        self.clock.tick();
        let op = DocOperation {
            id: OperationId::new(),
            peer: self.peer,
            seq: self.vector_clock.get(self.peer) + 1,
            clock: self.clock,
            timestamp: chrono::Utc::now(),
            kind,
            parents,
        };
        self.apply(&op);
        op
    }

    fn is_ready(&self, op: &DocOperation) -> bool {
        op.seq == self.vector_clock.get(op.peer) + 1
            && op.parents.iter().all(|p| self.log.contains(p))
    }

    fn drain_pending(&mut self) {
        let mut progressed = true;
        while progressed {
            progressed = false;
            let pending = std::mem::take(&mut self.pending);
            let mut remaining = Vec::new();
            for op in pending {
                if self.log.contains(&op.id) {
                    progressed = true;
                } else if self.is_ready(&op) {
                    self.apply(&op);
                    progressed = true;
                } else {
                    remaining.push(op);
                }
            }
            self.pending = remaining;
        }
    }

    fn apply(&mut self, op: &DocOperation) {
        match &op.kind {
            OperationKind::InsertDraft {
                anchor,
                start,
                text,
            } => self.integrate_insert(op, *anchor, *start, text),
            OperationKind::DeleteDraft { targets } => {
                for target in targets {
                    if let Some(elem) = self.elems.iter_mut().find(|e| e.id == *target) {
                        elem.deleted = true;
                    }
                }
            }
            OperationKind::PushEntry { entry } => self.integrate_push(op, entry.clone()),
            OperationKind::RemoveEntry { entry_id } => {
                if let Some(pos) = self.queue.iter().position(|q| q.entry.id == *entry_id) {
                    self.queue.remove(pos);
                }
            }
        }
        self.log.add_operation(op.clone());
        self.vector_clock.observe(op.peer, op.seq);
    }

    fn integrate_insert(
        &mut self,
        op: &DocOperation,
        anchor: Option<ElemId>,
        start: ElemId,
        text: &str,
    ) {
        let mut idx = match anchor {
            None => 0,
            // Parent gating guarantees the anchor has been integrated.
            Some(a) => match self.elems.iter().position(|e| e.id == a) {
                Some(i) => i + 1,
                None => self.elems.len(),
            },
        };
        // Concurrent runs after the same anchor order by (clock, peer),
        // higher first. An operation's clock is always greater than its
        // anchor's, which keeps this scan deterministic on every replica.
        let new_key = (op.clock, op.peer);
        while idx < self.elems.len() {
            let existing = &self.elems[idx];
            if (existing.clock, existing.id.peer) > new_key {
                idx += 1;
            } else {
                break;
            }
        }
        for (offset, ch) in text.chars().enumerate() {
            let id = ElemId {
                peer: start.peer,
                counter: start.counter + offset as u64,
            };
            self.elems.insert(
                idx + offset,
                DraftElem {
                    id,
                    clock: op.clock,
                    ch,
                    deleted: false,
                },
            );
            self.elem_origin.insert(id, op.id);
        }
    }

    fn integrate_push(&mut self, op: &DocOperation, entry: QueueEntry) {
        let entry_id = entry.id;
        let new_key = (op.clock, op.peer);
        let pos = self
            .queue
            .iter()
            .position(|q| (q.clock, q.peer) > new_key)
            .unwrap_or(self.queue.len());
        self.queue.insert(
            pos,
            QueueElem {
                entry,
                clock: op.clock,
                peer: op.peer,
            },
        );
        self.entry_origin.insert(entry_id, op.id);
    }
}
