//! # Handler abstraction and function-backed handler implementation.
//!
//! This module defines the [`Handle`] trait, a function-backed implementation
//! [`HandlerFn`], and [`Handler`], the registration handle the dispatcher stores
//! in the registry.
//!
//! A [`Handler`] is the `(callback, context, priority)` record: the callback and
//! its context are the [`Handle`] implementor, the priority orders the chain.
//! Cloning a `Handler` keeps its identity, so the same value registers,
//! reprioritises and deregisters one subscription.
//!
//! ## Example
//! ```rust
//! use ripcore::{Handler, HandlerFn, Outcome, Event};
//!
//! let h = Handler::new(
//!     HandlerFn::arc("audit", |_ev: &mut Event<'_>| Outcome::Continue),
//!     10,
//! );
//! assert_eq!(h.name(), "audit");
//! assert_eq!(h.priority(), 10);
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::registry::{Payload, Priority};

use super::event::Event;

/// What a handler tells the dispatcher after seeing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stop the chain; the event is handled.
    Claim,
    /// Let lower handlers see the event.
    Continue,
    /// Same as [`Outcome::Continue`] in a plain chain. After the handler has
    /// called [`Event::tail`], it reports the event as unhandled whatever the
    /// tail returned.
    ForceUnclaimed,
}

/// # Event subscriber.
///
/// Called synchronously on the publishing thread, with no registry or timeline
/// lock held, so implementations may register or deregister handlers, publish
/// nested events, or start and end timelines.
///
/// ### Implementation requirements
/// - Return promptly; the publisher waits for the whole chain.
/// - Do not call `safe_deregister_handler` on yourself from inside
///   `on_event`: your own pin is what it waits for.
pub trait Handle: Send + Sync + 'static {
    /// Processes one event.
    fn on_event(&self, event: &mut Event<'_>) -> Outcome;

    /// Returns the handler name used in logs.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a handler implementation.
pub type HandleRef = Arc<dyn Handle>;

/// Function-backed handler.
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F>
where
    F: Fn(&mut Event<'_>) -> Outcome + Send + Sync + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> Handle for HandlerFn<F>
where
    F: Fn(&mut Event<'_>) -> Outcome + Send + Sync + 'static,
{
    fn on_event(&self, event: &mut Event<'_>) -> Outcome {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) struct HandlerRecord {
    pub(crate) handle: HandleRef,
    priority: AtomicI32,
}

/// Registration handle for one subscription.
#[derive(Clone)]
pub struct Handler {
    record: Arc<HandlerRecord>,
}

impl Handler {
    pub fn new(handle: HandleRef, priority: Priority) -> Self {
        Self {
            record: Arc::new(HandlerRecord {
                handle,
                priority: AtomicI32::new(priority),
            }),
        }
    }

    /// Shorthand for `Handler::new(HandlerFn::arc(name, f), priority)`.
    pub fn from_fn<F>(name: impl Into<Cow<'static, str>>, priority: Priority, f: F) -> Self
    where
        F: Fn(&mut Event<'_>) -> Outcome + Send + Sync + 'static,
    {
        Self::new(HandlerFn::arc(name, f), priority)
    }

    pub fn name(&self) -> &str {
        self.record.handle.name()
    }

    pub fn priority(&self) -> Priority {
        self.record.priority.load(AtomicOrdering::Relaxed)
    }

    /// Changes the priority used by the next `register_handler` call.
    ///
    /// Registering an already registered handler again moves it to this
    /// priority.
    pub fn set_priority(&self, priority: Priority) {
        self.record
            .priority
            .store(priority, AtomicOrdering::Relaxed);
    }

    pub(crate) fn payload(&self) -> Payload {
        Payload::new(Arc::clone(&self.record))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name())
            .field("priority", &self.priority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named;

    impl Handle for Named {
        fn on_event(&self, _event: &mut Event<'_>) -> Outcome {
            Outcome::Claim
        }
    }

    #[test]
    fn test_clone_keeps_identity() {
        let h = Handler::from_fn("h", 0, |_| Outcome::Continue);
        let c = h.clone();
        assert!(h.payload().same_as(&c.payload()));
        c.set_priority(7);
        assert_eq!(h.priority(), 7);

        let other = Handler::from_fn("h", 0, |_| Outcome::Continue);
        assert!(!h.payload().same_as(&other.payload()));
    }

    #[test]
    fn test_default_name_is_type_name() {
        let h = Handler::new(Arc::new(Named), 0);
        assert!(h.name().ends_with("Named"));
    }
}
