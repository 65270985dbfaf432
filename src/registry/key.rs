//! Registry keys and ordering positions.

use std::cmp::Ordering;
use std::fmt;

/// Coarse namespace of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Class(pub u32);

impl Class {
    /// Published API tables.
    pub const API: Class = Class(0x4150_4900);
    /// Event handlers, keyed by event type.
    pub const EVENT: Class = Class(0x4556_4e00);
    /// Timeline contexts, keyed by timeline reference.
    pub const TIMELINE: Class = Class(0x544c_0000);
}

/// Second key component; an event type for [`Class::EVENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type(pub u32);

/// Third key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u32);

/// Ordering weight within a key; higher comes first.
pub type Priority = i32;

/// Full `(Class, Type, Id)` registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub class: Class,
    pub ty: Type,
    pub id: Id,
}

impl Key {
    #[inline]
    pub const fn new(class: Class, ty: Type, id: Id) -> Self {
        Self { class, ty, id }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/{:#x}/{}", self.class.0, self.ty.0, self.id.0)
    }
}

/// Direction used by `register_with_fresh_id` when looking for a free id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Up,
    Down,
}

impl Scan {
    #[inline]
    pub(crate) fn step(self, id: Id) -> Id {
        match self {
            Scan::Up => Id(id.0.wrapping_add(1)),
            Scan::Down => Id(id.0.wrapping_sub(1)),
        }
    }
}

/// Place of an entry in the total order of the registry.
///
/// Ascending key, then descending priority, then tombstones ahead of live
/// entries, then descending registration sequence (newest first inside a
/// priority tier). A tombstone therefore leads every entry of its own tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub key: Key,
    pub priority: Priority,
    pub tombstone: bool,
    pub seq: u64,
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| other.tombstone.cmp(&self.tombstone))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(id: u32, priority: Priority, seq: u64) -> Position {
        Position {
            key: Key::new(Class(1), Type(1), Id(id)),
            priority,
            tombstone: false,
            seq,
        }
    }

    #[test]
    fn test_position_orders_priority_descending_then_newest() {
        assert!(pos(1, 10, 1) < pos(1, 0, 2));
        assert!(pos(1, 0, 9) < pos(1, 0, 3));
        assert!(pos(1, -5, 9) < pos(2, 100, 1));
    }

    #[test]
    fn test_tombstone_leads_its_priority_tier() {
        let tomb = Position {
            tombstone: true,
            ..pos(1, 5, 1)
        };
        assert!(tomb < pos(1, 5, 2));
        assert!(pos(1, 6, 0) < tomb);
        assert!(tomb < pos(1, 4, 9));
    }

    #[test]
    fn test_scan_wraps() {
        assert_eq!(Scan::Up.step(Id(u32::MAX)), Id(0));
        assert_eq!(Scan::Down.step(Id(0)), Id(u32::MAX));
    }
}
