//! Fixed-capacity node storage shared by all search threads.
//!
//! Slots are `OnceLock`s: a node is fully built before it becomes visible,
//! and readers never see a half-initialised node. Capacity is fixed at
//! construction so slot addresses never move while threads hold references.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use crate::node::{NodeId, SearchNode};

pub struct Arena {
    slots: Vec<OnceLock<SearchNode>>,
    next: AtomicU32,
}

impl Arena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            next: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots handed out.
    pub fn len(&self) -> usize {
        (self.next.load(Ordering::Acquire) as usize).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `n` in the next free slot; `None` when full.
    pub fn push(&self, n: SearchNode) -> Option<NodeId> {
        let id = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                ((i as usize) < self.slots.len()).then_some(i + 1)
            })
            .ok()?;
        // Each id is handed out once, so the slot is empty.
        let _ = self.slots[id as usize].set(n);
        Some(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&SearchNode> {
        self.slots.get(id as usize)?.get()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SearchNode)> {
        self.slots[..self.len()]
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.get().map(|n| (i as NodeId, n)))
    }

    /// Drop every node, keeping the slot allocation.
    pub fn clear(&mut self) {
        let used = self.len();
        for slot in &mut self.slots[..used] {
            slot.take();
        }
        *self.next.get_mut() = 0;
    }
}
