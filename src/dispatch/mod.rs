//! # Event dispatcher.
//!
//! Publish/subscribe with claim/continue semantics and re-entrant tail
//! dispatch, stored entirely in the [`Registry`](crate::Registry).
//!
//! ## Contents
//! - [`Dispatcher`] handler registration, `publish`, `publish_tail`
//! - [`Handle`] / [`HandlerFn`] / [`Handler`] subscribers and their registration handle
//! - [`Event`] / [`Delivery`] / [`Outcome`] what a handler sees, returns, and what `publish` reports
//!
//! ## Implementing a handler
//! ```rust
//! use std::sync::Arc;
//! use ripcore::{Config, Dispatcher, Event, Handle, Handler, Outcome, Registry, Type};
//!
//! struct Counter(std::sync::atomic::AtomicUsize);
//!
//! impl Handle for Counter {
//!     fn on_event(&self, _event: &mut Event<'_>) -> Outcome {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         Outcome::Continue
//!     }
//!
//!     fn name(&self) -> &str { "counter" }
//! }
//!
//! let dispatcher = Dispatcher::new(Arc::new(Registry::default()), Config::default());
//! let counter = Arc::new(Counter(Default::default()));
//! dispatcher.register_handler(Type(7), &Handler::new(counter.clone(), 0)).unwrap();
//!
//! assert!(!dispatcher.publish(Type(7), &mut ()).is_handled());
//! assert_eq!(counter.0.load(std::sync::atomic::Ordering::Relaxed), 1);
//! ```

mod dispatcher;
mod event;
mod handler;

pub use dispatcher::Dispatcher;
pub use event::{Delivery, Event};
pub use handler::{Handle, HandleRef, Handler, HandlerFn, Outcome};
