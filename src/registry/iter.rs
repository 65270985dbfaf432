//! Filtered cursors over the registry.
//!
//! An [`Iter`] remembers the position of the last entry it returned, not a
//! pointer into the list, so registrations and deregistrations made between two
//! steps never invalidate it: the next step seeks to the first entry ordered
//! after that position.

use std::cmp::Ordering;
use std::sync::Arc;

use super::key::{Class, Id, Key, Position, Priority, Type};
use super::payload::Payload;
use super::store::{Node, Registry};

/// Snapshot of one registry entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: Key,
    pub priority: Priority,
    pub payload: Payload,
}

/// Which entries an iterator visits.
///
/// `class`, `ty` and `id` narrow the key; the scan is bounded when they form a
/// prefix (`class`, then `ty`, then `id`). `priority` selects a single tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filter {
    pub class: Option<Class>,
    pub ty: Option<Type>,
    pub id: Option<Id>,
    pub priority: Option<Priority>,
}

impl Filter {
    pub const fn all() -> Self {
        Self {
            class: None,
            ty: None,
            id: None,
            priority: None,
        }
    }

    pub const fn class(class: Class) -> Self {
        Self {
            class: Some(class),
            ..Self::all()
        }
    }

    pub const fn ty(class: Class, ty: Type) -> Self {
        Self {
            class: Some(class),
            ty: Some(ty),
            ..Self::all()
        }
    }

    pub const fn with_id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }

    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Compares `key` against the contiguous key prefix of the filter.
    fn prefix_cmp(&self, key: Key) -> Ordering {
        let Some(class) = self.class else {
            return Ordering::Equal;
        };
        let ord = key.class.cmp(&class);
        let Some(ty) = self.ty else { return ord };
        let ord = ord.then(key.ty.cmp(&ty));
        match self.id {
            Some(id) => ord.then(key.id.cmp(&id)),
            None => ord,
        }
    }

    #[inline]
    pub(crate) fn is_before(&self, key: Key) -> bool {
        self.prefix_cmp(key) == Ordering::Less
    }

    #[inline]
    pub(crate) fn is_past(&self, key: Key) -> bool {
        self.prefix_cmp(key) == Ordering::Greater
    }

    pub(crate) fn matches_key(&self, key: Key) -> bool {
        self.class.map_or(true, |c| c == key.class)
            && self.ty.map_or(true, |t| t == key.ty)
            && self.id.map_or(true, |i| i == key.id)
    }

    #[inline]
    pub(crate) fn matches_priority(&self, priority: Priority) -> bool {
        self.priority.map_or(true, |p| p == priority)
    }
}

/// Resumable iteration state, detached from any pin.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    filter: Filter,
    last: Option<Position>,
    dead: bool,
}

/// Cursor over the registry.
///
/// - [`Iterator::next`] returns the next matching entry.
/// - [`Iter::lock_next`] does the same and pins the entry until the next step,
///   [`Iter::restart`], or drop; a pinned entry can be deregistered (the
///   deregister reports `InUse`) but is not reclaimed while pinned.
///
/// An iterator belongs to one thread of control at a time; `&mut self` on
/// every step enforces that.
pub struct Iter<'r> {
    registry: &'r Registry,
    cursor: Cursor,
    pinned: Option<Arc<Node>>,
}

impl<'r> Iter<'r> {
    pub(crate) fn new(registry: &'r Registry, filter: Filter) -> Self {
        Self::resume(
            registry,
            Cursor {
                filter,
                last: None,
                dead: false,
            },
        )
    }

    /// Continues from a saved cursor without inheriting its pin.
    pub(crate) fn resume(registry: &'r Registry, cursor: Cursor) -> Self {
        registry.iterator_opened();
        Self {
            registry,
            cursor,
            pinned: None,
        }
    }

    pub(crate) fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Returns the next entry and pins it.
    pub fn lock_next(&mut self) -> Option<Entry> {
        self.step(true)
    }

    /// Releases any pin and rewinds to the start of the filter range.
    pub fn restart(&mut self) {
        self.release();
        self.cursor.last = None;
        self.cursor.dead = false;
    }

    /// True once a step found nothing more.
    pub fn is_dead(&self) -> bool {
        self.cursor.dead
    }

    pub fn filter(&self) -> &Filter {
        &self.cursor.filter
    }

    fn step(&mut self, pin: bool) -> Option<Entry> {
        self.release();
        if self.cursor.dead {
            return None;
        }
        match self
            .registry
            .advance(&self.cursor.filter, self.cursor.last.as_ref(), pin)
        {
            Some(step) => {
                self.cursor.last = Some(step.position);
                self.pinned = step.pinned;
                Some(step.entry)
            }
            None => {
                self.cursor.dead = true;
                None
            }
        }
    }

    fn release(&mut self) {
        if let Some(node) = self.pinned.take() {
            if node.unpin() {
                self.registry.reclaim(&node);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pinned_node(&self) -> Option<Arc<Node>> {
        self.pinned.clone()
    }
}

impl Iterator for Iter<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.step(false)
    }
}

impl Drop for Iter<'_> {
    fn drop(&mut self) {
        self.release();
        self.registry.iterator_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn reg_with(entries: &[(u32, u32, u32, Priority)]) -> Registry {
        let reg = Registry::default();
        for &(c, t, i, p) in entries {
            let payload = Payload::new(Arc::new((c, t, i, p)));
            reg.register(Key::new(Class(c), Type(t), Id(i)), payload, p)
                .unwrap();
        }
        reg
    }

    #[test]
    fn test_filters_bound_the_scan() {
        let reg = reg_with(&[(1, 1, 1, 0), (1, 2, 1, 0), (1, 2, 2, 0), (2, 1, 1, 0)]);

        assert_eq!(reg.find_all().count(), 4);
        assert_eq!(reg.find_by_class(Class(1)).count(), 3);
        assert_eq!(reg.find_by_type(Class(1), Type(2)).count(), 2);
        assert_eq!(
            reg.find(Filter::ty(Class(1), Type(2)).with_id(Id(2)))
                .count(),
            1
        );
        assert_eq!(reg.find_by_class(Class(3)).count(), 0);
    }

    #[test]
    fn test_priority_filter_selects_one_tier() {
        let reg = reg_with(&[(1, 1, 1, 5), (1, 1, 1, 0), (1, 1, 2, 5)]);
        let hits: Vec<_> = reg
            .find(Filter::class(Class(1)).with_priority(5))
            .map(|e| e.key.id)
            .collect();
        assert_eq!(hits, vec![Id(1), Id(2)]);
    }

    #[test]
    fn test_iteration_survives_mutation_between_steps() {
        let reg = reg_with(&[(1, 1, 1, 0), (1, 1, 3, 0)]);
        let mut it = reg.find_by_class(Class(1));
        assert_eq!(it.next().map(|e| e.key.id), Some(Id(1)));

        reg.register(
            Key::new(Class(1), Type(1), Id(2)),
            Payload::new(Arc::new(2u8)),
            0,
        )
        .unwrap();

        assert_eq!(it.next().map(|e| e.key.id), Some(Id(2)));
        assert_eq!(it.next().map(|e| e.key.id), Some(Id(3)));
        assert!(it.next().is_none());
        assert!(it.is_dead());
        assert!(it.next().is_none());
    }

    #[test]
    fn test_restart_rewinds_and_releases_pin() {
        let reg = reg_with(&[(1, 1, 1, 0)]);
        let mut it = reg.find_all();
        assert!(it.lock_next().is_some());
        assert!(it.pinned_node().is_some());
        assert!(it.next().is_none());

        it.restart();
        assert!(it.pinned_node().is_none());
        assert!(!it.is_dead());
        assert!(it.next().is_some());
    }

    #[test]
    fn test_iterator_count_tracks_live_cursors() {
        let reg = reg_with(&[(1, 1, 1, 0)]);
        let a = reg.find_all();
        let b = reg.find_all();
        assert_eq!(reg.iterators(), 2);
        drop(a);
        drop(b);
        assert_eq!(reg.iterators(), 0);
    }
}
