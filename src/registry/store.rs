//! # Registry store: the ordered entry list and its gate.
//!
//! ## Architecture
//! ```text
//!               RwLock<Store>  (task-fair: a waiting writer blocks new readers)
//!                     │
//!   read  ◄───────────┼───────────► write
//!   iteration steps   │             register / deregister
//!   find_exact        │             (exclusive, after readers drain)
//!                     ▼
//!   slots: Vec<Slot>  sorted by Position (key ↑, priority ↓, tombstone, seq ↓)
//!   parked: Vec<Arc<Node>>  deregistered while pinned (PendingFree)
//! ```
//!
//! ## Rules
//! - Iteration steps hold the read side only while scanning; no lock is held
//!   between steps or while a caller works with a returned entry.
//! - A pin is taken under the read side, so a writer never observes a pin in
//!   the middle of being taken.
//! - A node deregistered while pinned moves to `parked` and the call reports
//!   `InUse`; the last unpin reclaims it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};

use super::iter::{Entry, Filter, Iter};
use super::key::{Class, Id, Key, Position, Priority, Scan, Type};
use super::payload::Payload;

/// Shared registration record; survives detachment while pinned.
pub(crate) struct Node {
    pub(crate) key: Key,
    pub(crate) payload: Payload,
    pins: AtomicUsize,
    detached: AtomicBool,
}

impl Node {
    fn new(key: Key, payload: Payload) -> Self {
        Self {
            key,
            payload,
            pins: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, AtomicOrdering::SeqCst);
    }

    /// Drops one pin. Returns `true` when this was the last pin of a
    /// deregistered node, which the caller must then reclaim.
    #[inline]
    pub(crate) fn unpin(&self) -> bool {
        let prev = self.pins.fetch_sub(1, AtomicOrdering::SeqCst);
        debug_assert!(prev > 0, "unpin of an unpinned registry entry");
        prev == 1 && self.detached.load(AtomicOrdering::SeqCst)
    }

    #[inline]
    fn pins(&self) -> usize {
        self.pins.load(AtomicOrdering::SeqCst)
    }
}

struct Slot {
    priority: Priority,
    seq: u64,
    node: Arc<Node>,
}

impl Slot {
    #[inline]
    fn position(&self) -> Position {
        Position {
            key: self.node.key,
            priority: self.priority,
            tombstone: self.node.payload.is_tombstone(),
            seq: self.seq,
        }
    }
}

/// One successful iteration step.
pub(crate) struct Step {
    pub(crate) entry: Entry,
    pub(crate) position: Position,
    pub(crate) pinned: Option<Arc<Node>>,
}

#[derive(Default)]
struct Store {
    slots: Vec<Slot>,
    parked: Vec<Arc<Node>>,
    seq: u64,
}

impl Store {
    /// Index range of the run of entries registered at `key`.
    fn run(&self, key: Key) -> (usize, usize) {
        let lo = self.slots.partition_point(|s| s.node.key < key);
        let hi = lo + self.slots[lo..].partition_point(|s| s.node.key == key);
        (lo, hi)
    }

    fn occupied(&self, key: Key) -> bool {
        let (lo, hi) = self.run(key);
        lo != hi
    }

    fn find_slot(&self, key: Key, payload: &Payload) -> Option<usize> {
        let (lo, hi) = self.run(key);
        (lo..hi).find(|&i| self.slots[i].node.payload.same_as(payload))
    }

    /// Inserts a registration, or moves an identical one to its new priority.
    fn insert(&mut self, key: Key, payload: Payload, priority: Priority) -> Result<()> {
        self.slots.try_reserve(1)?;

        let node = match self.find_slot(key, &payload) {
            Some(idx) => {
                let old = self.slots.remove(idx);
                trace!(%key, from = old.priority, to = priority, "registry entry reprioritised");
                old.node
            }
            None => {
                trace!(%key, priority, tombstone = payload.is_tombstone(), "registry entry added");
                Arc::new(Node::new(key, payload))
            }
        };

        self.seq += 1;
        let slot = Slot {
            priority,
            seq: self.seq,
            node,
        };
        let pos = slot.position();
        let idx = self.slots.partition_point(|s| s.position() < pos);
        self.slots.insert(idx, slot);
        Ok(())
    }

    /// Forgets parked nodes whose pins are already gone.
    fn sweep(&mut self) {
        self.parked.retain(|n| n.pins() > 0);
    }
}

/// Priority-ordered `(Class, Type, Id)` discovery store.
///
/// ### Properties
/// - **Visible entry**: the first entry of a key's run (highest priority,
///   newest within the tier), unless it is a tombstone.
/// - **Tombstones**: a tombstone leads its priority tier, so it hides every
///   entry of equal or lower priority, including ones registered after it.
/// - **Reprioritisation**: registering an identical `(key, payload, len)`
///   moves the existing entry instead of duplicating it.
/// - **Pinning**: entries returned by [`Iter::lock_next`] cannot be reclaimed
///   until the iterator moves on.
pub struct Registry {
    store: RwLock<Store>,
    iterators: AtomicUsize,
}

impl Registry {
    /// Creates an empty registry sized from the configuration.
    pub fn new(cfg: &Config) -> Self {
        Self {
            store: RwLock::new(Store {
                slots: Vec::with_capacity(cfg.registry_capacity),
                ..Store::default()
            }),
            iterators: AtomicUsize::new(0),
        }
    }

    /// Registers `payload` at `key` with `priority`.
    ///
    /// If the identical `(key, payload, len)` is already registered it is
    /// detached and reinserted at the new priority; it becomes the newest entry
    /// of that priority tier.
    pub fn register(&self, key: Key, payload: Payload, priority: Priority) -> Result<()> {
        let mut store = self.store.write();
        store.sweep();
        store.insert(key, payload, priority)
    }

    /// Registers at the first unused id of `(class, ty)`, starting at `hint`.
    ///
    /// The scan wraps around the id space. Returns the chosen id, or
    /// [`Error::Memory`] when every id is taken.
    pub fn register_with_fresh_id(
        &self,
        class: Class,
        ty: Type,
        hint: Id,
        scan: Scan,
        payload: Payload,
        priority: Priority,
    ) -> Result<Id> {
        let mut store = self.store.write();
        store.sweep();

        let mut id = hint;
        while store.occupied(Key::new(class, ty, id)) {
            id = scan.step(id);
            if id == hint {
                return Err(Error::Memory);
            }
        }
        store.insert(Key::new(class, ty, id), payload, priority)?;
        Ok(id)
    }

    /// Removes the registration of `payload` at `key`.
    ///
    /// ### Returns
    /// - `Ok(())`: removed, the payload may be released.
    /// - `Err(InUse)`: removed from discovery but still pinned; keep the
    ///   payload alive until a later call returns `Ok` (or `UnknownKey`, which
    ///   means the last unpin already reclaimed it).
    /// - `Err(UnknownKey)`: no such registration.
    pub fn deregister(&self, key: Key, payload: &Payload) -> Result<()> {
        let mut store = self.store.write();
        store.parked.try_reserve(1)?;

        if let Some(idx) = store.find_slot(key, payload) {
            let node = store.slots.remove(idx).node;
            node.detached.store(true, AtomicOrdering::SeqCst);
            if node.pins() > 0 {
                debug!(%key, "registry entry deregistered while pinned");
                store.parked.push(node);
                return Err(Error::InUse);
            }
            trace!(%key, "registry entry removed");
            return Ok(());
        }

        let parked = store
            .parked
            .iter()
            .position(|n| n.key == key && n.payload.same_as(payload));
        match parked {
            Some(idx) if store.parked[idx].pins() > 0 => Err(Error::InUse),
            Some(idx) => {
                store.parked.swap_remove(idx);
                trace!(%key, "parked registry entry released");
                Ok(())
            }
            None => Err(Error::UnknownKey),
        }
    }

    /// Returns the visible payload at `key`.
    pub fn find_exact(&self, key: Key) -> Result<Payload> {
        let store = self.store.read();
        let (lo, hi) = store.run(key);
        match store.slots[lo..hi].first() {
            Some(slot) if !slot.node.payload.is_tombstone() => Ok(slot.node.payload.clone()),
            _ => Err(Error::UnknownKey),
        }
    }

    /// Iterates every entry matching `filter`.
    pub fn find(&self, filter: Filter) -> Iter<'_> {
        Iter::new(self, filter)
    }

    /// Iterates the whole registry.
    pub fn find_all(&self) -> Iter<'_> {
        self.find(Filter::all())
    }

    /// Iterates every entry of `class`.
    pub fn find_by_class(&self, class: Class) -> Iter<'_> {
        self.find(Filter::class(class))
    }

    /// Iterates every entry of `(class, ty)`.
    pub fn find_by_type(&self, class: Class, ty: Type) -> Iter<'_> {
        self.find(Filter::ty(class, ty))
    }

    /// Number of discoverable entries, tombstones included.
    pub fn len(&self) -> usize {
        self.store.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of deregistered entries still waiting for their pins to drop.
    pub fn pending_free(&self) -> usize {
        self.store.read().parked.len()
    }

    /// Number of live iterators.
    pub fn iterators(&self) -> usize {
        self.iterators.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn iterator_opened(&self) {
        self.iterators.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn iterator_closed(&self) {
        self.iterators.fetch_sub(1, AtomicOrdering::Relaxed);
    }

    /// Finds the next entry after `after` that passes `filter`.
    ///
    /// A tombstone hides the rest of its run from the scan.
    pub(crate) fn advance(
        &self,
        filter: &Filter,
        after: Option<&Position>,
        pin: bool,
    ) -> Option<Step> {
        let store = self.store.read();
        let start = match after {
            Some(last) => store.slots.partition_point(|s| s.position() <= *last),
            None => store
                .slots
                .partition_point(|s| filter.is_before(s.node.key)),
        };

        let mut hidden: Option<Key> = None;
        for slot in &store.slots[start..] {
            let key = slot.node.key;
            if filter.is_past(key) {
                break;
            }
            if !filter.matches_key(key) || hidden == Some(key) {
                continue;
            }
            if slot.node.payload.is_tombstone() {
                hidden = Some(key);
                continue;
            }
            if !filter.matches_priority(slot.priority) {
                continue;
            }

            let pinned = pin.then(|| {
                slot.node.pin();
                Arc::clone(&slot.node)
            });
            return Some(Step {
                entry: Entry {
                    key,
                    priority: slot.priority,
                    payload: slot.node.payload.clone(),
                },
                position: slot.position(),
                pinned,
            });
        }
        None
    }

    /// Drops a parked node after its last unpin.
    pub(crate) fn reclaim(&self, node: &Arc<Node>) {
        let mut store = self.store.write();
        store
            .parked
            .retain(|n| !Arc::ptr_eq(n, node) || n.pins() > 0);
        trace!(key = %node.key, "parked registry entry reclaimed");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.read();
        f.debug_struct("Registry")
            .field("entries", &store.slots.len())
            .field("parked", &store.parked.len())
            .field("iterators", &self.iterators())
            .finish()
    }
}
