//! # Event delivered to a handler.
//!
//! An [`Event`] lives for one handler call. It carries the event type, the
//! dispatch id shared by every handler of the same `publish`, mutable access to
//! the published message, and the position of the current handler in the chain
//! so that [`Event::tail`] can run the rest of the chain from inside it.
//!
//! ## Tail dispatch
//! ```text
//! publish(T) ──► H1 ──► H2.on_event ──────────────────────► (chain finished)
//!                          │  before
//!                          ├─► ev.tail() ──► H3 ──► H4 ──► Delivery
//!                          │  after (sees the aggregate outcome)
//!                          └─► return Continue | ForceUnclaimed | Claim
//! ```
//! The outer chain position is never moved by a tail call: the tail runs on a
//! fresh cursor resumed after the current handler, dropped on every exit path.

use std::any::Any;

use crate::registry::{Cursor, Iter, Priority, Type};

use super::dispatcher::Dispatcher;

/// Aggregate result of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A handler claimed the event.
    Handled,
    /// Every handler let the event through (or one forced this result).
    Unhandled,
}

impl Delivery {
    #[inline]
    pub fn is_handled(self) -> bool {
        matches!(self, Delivery::Handled)
    }
}

/// One event, as seen by one handler.
pub struct Event<'a> {
    ty: Type,
    dispatch_id: u32,
    priority: Priority,
    message: &'a mut (dyn Any + 'static),
    dispatcher: &'a Dispatcher,
    resume: Cursor,
    tail: Option<Delivery>,
}

impl<'a> Event<'a> {
    pub(crate) fn new(
        ty: Type,
        dispatch_id: u32,
        priority: Priority,
        message: &'a mut (dyn Any + 'static),
        dispatcher: &'a Dispatcher,
        resume: Cursor,
    ) -> Self {
        Self {
            ty,
            dispatch_id,
            priority,
            message,
            dispatcher,
            resume,
            tail: None,
        }
    }

    #[inline]
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Id shared by all handlers called for the same `publish`.
    #[inline]
    pub fn dispatch_id(&self) -> u32 {
        self.dispatch_id
    }

    /// Priority the current handler is registered at.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Typed read access to the message.
    pub fn message<M: Any>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Typed write access to the message; later handlers see the change.
    pub fn message_mut<M: Any>(&mut self) -> Option<&mut M> {
        self.message.downcast_mut::<M>()
    }

    /// Runs every handler after this one and returns their aggregate result.
    ///
    /// Once called, the outer chain is finished: when the current handler
    /// returns, the dispatcher does not call the remaining handlers again.
    /// Calling `tail` twice returns the first result.
    pub fn tail(&mut self) -> Delivery {
        if let Some(done) = self.tail {
            return done;
        }
        let iter = Iter::resume(self.dispatcher.registry(), self.resume);
        let done = self
            .dispatcher
            .run_chain(self.ty, self.dispatch_id, &mut *self.message, iter);
        self.tail = Some(done);
        done
    }

    /// Result of [`Event::tail`], if it was called.
    pub(crate) fn tail_result(&self) -> Option<Delivery> {
        self.tail
    }
}

impl std::fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("ty", &self.ty)
            .field("dispatch_id", &self.dispatch_id)
            .field("priority", &self.priority)
            .field("tail", &self.tail)
            .finish()
    }
}
