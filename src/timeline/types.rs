//! Timeline identifiers, states and the start request builder.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::{Payload, Priority, Type};

/// Extent end marking a timeline whose total is not known.
pub const INDETERMINATE: f64 = f64::INFINITY;

/// Unique, non-zero handle of a live timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimelineRef(NonZeroU32);

impl TimelineRef {
    #[inline]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Registry type under which this timeline's contexts live.
    #[inline]
    pub(crate) fn context_type(self) -> Type {
        Type(self.get())
    }
}

impl fmt::Display for TimelineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tl#{}", self.0)
    }
}

/// Kind of tracked entity (job, page, cache, device, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelineType(pub u32);

/// Unit of a timeline's extent and progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unit(pub u32);

impl Unit {
    pub const NONE: Unit = Unit(0);
}

/// Lifecycle state of a timeline.
///
/// ```text
/// Start ─► End   ─► Ending   ─► Ended
///   │       (objected: back to Start)
///   └────► Abort ─► Aborting ─► Aborted
///           (objected: stays Abort)
/// ```
/// `Ended` and `Aborted` are only observed inside the final events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Start,
    End,
    Abort,
    Ending,
    Aborting,
    Ended,
    Aborted,
}

impl State {
    #[inline]
    pub fn is_negotiating(self) -> bool {
        matches!(self, State::Ending | State::Aborting)
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Ended | State::Aborted)
    }
}

/// Extent and progress of a timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub start: f64,
    pub end: f64,
    pub progress: f64,
    pub unit: Unit,
}

impl Progress {
    #[inline]
    pub fn is_indeterminate(&self) -> bool {
        is_indeterminate(self.end)
    }
}

#[inline]
pub(crate) fn is_indeterminate(end: f64) -> bool {
    end == INDETERMINATE
}

pub(crate) fn validate_extent(start: f64, end: f64) -> Result<()> {
    if !start.is_finite() || end.is_nan() {
        return Err(Error::syntax("extent must be numeric with a finite start"));
    }
    if start > end {
        return Err(Error::syntax("extent start after end"));
    }
    Ok(())
}

/// Everything `start` needs to create a timeline.
///
/// ## Example
/// ```rust
/// use ripcore::{TimelineSpec, TimelineType, Unit};
///
/// let spec = TimelineSpec::new(TimelineType(1))
///     .with_extent(0.0, 12.0)
///     .with_unit(Unit(2))
///     .with_priority(5)
///     .with_title("job 42");
/// assert_eq!(spec.priority(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct TimelineSpec {
    pub(crate) ty: TimelineType,
    pub(crate) parent: Option<TimelineRef>,
    pub(crate) start: f64,
    pub(crate) end: f64,
    pub(crate) unit: Unit,
    pub(crate) priority: Priority,
    pub(crate) context: Option<Payload>,
    pub(crate) title: Option<Arc<str>>,
}

impl TimelineSpec {
    /// Root timeline of `ty` with an indeterminate extent and priority 0.
    pub fn new(ty: TimelineType) -> Self {
        Self {
            ty,
            parent: None,
            start: 0.0,
            end: INDETERMINATE,
            unit: Unit::NONE,
            priority: 0,
            context: None,
            title: None,
        }
    }

    pub fn with_parent(mut self, parent: TimelineRef) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_extent(mut self, start: f64, end: f64) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Owner context, stored as context id 0 for the timeline's lifetime.
    pub fn with_context(mut self, context: Payload) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_title(mut self, title: impl Into<Arc<str>>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn parent(&self) -> Option<TimelineRef> {
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_validation() {
        assert!(validate_extent(0.0, 1.0).is_ok());
        assert!(validate_extent(3.0, INDETERMINATE).is_ok());
        assert!(validate_extent(2.0, 1.0).is_err());
        assert!(validate_extent(f64::NAN, 1.0).is_err());
        assert!(validate_extent(0.0, f64::NAN).is_err());
        assert!(validate_extent(f64::NEG_INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_zero_is_not_a_reference() {
        assert!(TimelineRef::new(0).is_none());
        assert_eq!(TimelineRef::new(9).map(TimelineRef::get), Some(9));
    }
}
