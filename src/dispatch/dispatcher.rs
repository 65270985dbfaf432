//! # Dispatcher: ordered publish/subscribe on top of the registry.
//!
//! Handlers are registry entries under [`Class::EVENT`]; the event type is the
//! entry type and every handler of a type shares id 0, so the registry order of
//! that run *is* the call order.
//!
//! ## Architecture
//! ```text
//! publish(ty, &mut msg)
//!   └─► dispatch_id = next (wrapping, never 0)
//!   └─► Iter(Class::EVENT, ty)
//!         loop lock_next():                       (pin only this handler)
//!           ├─► handler.on_event(&mut Event)      (no lock held)
//!           │       ├─ Claim            ─► Handled, stop
//!           │       ├─ Continue         ─► next handler
//!           │       └─ ForceUnclaimed   ─► next handler
//!           └─► after a tail call the chain is finished:
//!                 Continue ─► tail result, ForceUnclaimed ─► Unhandled
//! ```
//!
//! ## Rules
//! - Call order is priority-descending, newest first within a priority.
//! - A handler is pinned only while its own callback runs: it may deregister
//!   itself (reported `InUse`) or any other handler (immediate).
//! - A handler deregistered before the chain reaches it is not called.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::{Class, Id, Iter, Key, Registry, Type};
use crate::runtime::api;

use super::event::{Delivery, Event};
use super::handler::{Handler, HandlerRecord, Outcome};

/// Event dispatcher.
pub struct Dispatcher {
    registry: Arc<Registry>,
    cfg: Config,
    dispatch_seq: AtomicU32,
}

impl Dispatcher {
    /// Creates a dispatcher over an explicit registry.
    pub fn new(registry: Arc<Registry>, cfg: Config) -> Self {
        Self {
            registry,
            cfg,
            dispatch_seq: AtomicU32::new(0),
        }
    }

    /// Creates a dispatcher over the registry published in `registry`.
    ///
    /// Fails with [`Error::UnknownKey`] when no registry API is published.
    pub fn discover(registry: &Registry, cfg: Config) -> Result<Self> {
        let registry = api::lookup::<Registry>(registry, api::REGISTRY, api::REGISTRY_VERSION)?;
        Ok(Self::new(registry, cfg))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    fn key(ty: Type) -> Key {
        Key::new(Class::EVENT, ty, Id(0))
    }

    /// Subscribes `handler` to `ty` at `handler.priority()`.
    ///
    /// Registering the same handler again moves it to its current priority.
    pub fn register_handler(&self, ty: Type, handler: &Handler) -> Result<()> {
        trace!(
            ty = ty.0,
            handler = handler.name(),
            priority = handler.priority(),
            "register handler"
        );
        self.registry
            .register(Self::key(ty), handler.payload(), handler.priority())
    }

    /// Registers every `(type, handler)` pair, or none of them.
    ///
    /// On the first failure the pairs already registered by this call are
    /// deregistered again and the failure is returned.
    pub fn register_handlers(&self, batch: &[(Type, Handler)]) -> Result<()> {
        for (done, (ty, handler)) in batch.iter().enumerate() {
            if let Err(e) = self.register_handler(*ty, handler) {
                warn!(
                    failed = done,
                    error = e.as_label(),
                    "handler batch rolled back"
                );
                self.roll_back(&batch[..done]);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Deregisters `registered` newest first. Returns how many pairs could not
    /// be removed; each one is logged.
    fn roll_back(&self, registered: &[(Type, Handler)]) -> usize {
        let mut stuck = 0;
        for (ty, handler) in registered.iter().rev() {
            if let Err(e) = self.safe_deregister_handler(*ty, handler) {
                warn!(
                    ty = ty.0,
                    handler = handler.name(),
                    error = e.as_label(),
                    "handler not rolled back"
                );
                stuck += 1;
            }
        }
        stuck
    }

    /// Unsubscribes `handler` from `ty`.
    ///
    /// `Err(InUse)` means the handler is running right now; it will not be
    /// called again, but its state must stay alive until it returns.
    pub fn deregister_handler(&self, ty: Type, handler: &Handler) -> Result<()> {
        trace!(ty = ty.0, handler = handler.name(), "deregister handler");
        self.registry.deregister(Self::key(ty), &handler.payload())
    }

    /// Deregisters every pair; reports `InUse` if any was busy, otherwise the
    /// first other failure.
    pub fn deregister_handlers(&self, batch: &[(Type, Handler)]) -> Result<()> {
        let mut result = Ok(());
        for (ty, handler) in batch {
            match self.deregister_handler(*ty, handler) {
                Ok(()) => {}
                Err(Error::InUse) => result = Err(Error::InUse),
                Err(e) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    /// Deregisters `handler` and waits until no call of it is in flight.
    ///
    /// Must not be called by the handler itself from inside its callback.
    pub fn safe_deregister_handler(&self, ty: Type, handler: &Handler) -> Result<()> {
        let mut busy = false;
        loop {
            match self.deregister_handler(ty, handler) {
                Ok(()) => return Ok(()),
                Err(Error::InUse) => {
                    if !busy {
                        debug!(handler = handler.name(), "waiting for running handler");
                        busy = true;
                    }
                    self.cfg.backoff();
                }
                // The last unpin reclaimed it while we were waiting.
                Err(Error::UnknownKey) if busy => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Delivers `message` to every handler of `ty` until one claims it.
    pub fn publish<M: Any>(&self, ty: Type, message: &mut M) -> Delivery {
        let dispatch_id = self.next_dispatch_id();
        trace!(ty = ty.0, dispatch_id, "publish");
        let iter = self.registry.find_by_type(Class::EVENT, ty);
        self.run_chain(ty, dispatch_id, message, iter)
    }

    /// Runs the rest of the chain from inside a handler.
    ///
    /// Same as [`Event::tail`].
    pub fn publish_tail(&self, event: &mut Event<'_>) -> Delivery {
        event.tail()
    }

    fn next_dispatch_id(&self) -> u32 {
        loop {
            let id = self
                .dispatch_seq
                .fetch_add(1, AtomicOrdering::Relaxed)
                .wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    pub(crate) fn run_chain(
        &self,
        ty: Type,
        dispatch_id: u32,
        message: &mut (dyn Any + 'static),
        mut iter: Iter<'_>,
    ) -> Delivery {
        while let Some(entry) = iter.lock_next() {
            let Some(record) = entry.payload.downcast::<HandlerRecord>() else {
                warn!(ty = ty.0, "non-handler entry in event class skipped");
                continue;
            };

            let mut event = Event::new(
                ty,
                dispatch_id,
                entry.priority,
                &mut *message,
                self,
                iter.cursor(),
            );
            let outcome = record.handle.on_event(&mut event);

            match (outcome, event.tail_result()) {
                (Outcome::Claim, _) => {
                    trace!(
                        ty = ty.0,
                        dispatch_id,
                        handler = record.handle.name(),
                        "claimed"
                    );
                    return Delivery::Handled;
                }
                (Outcome::Continue, Some(tail)) => return tail,
                (Outcome::ForceUnclaimed, Some(_)) => return Delivery::Unhandled,
                (_, None) => {}
            }
        }
        Delivery::Unhandled
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::registry::Payload;

    const TY: Type = Type(0x100);

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Registry::default()), Config::default())
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        priority: i32,
        outcome: Outcome,
    ) -> Handler {
        let log = Arc::clone(log);
        Handler::from_fn(name, priority, move |_| {
            log.lock().unwrap().push(name);
            outcome
        })
    }

    #[test]
    fn test_handlers_run_in_priority_order() {
        let d = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        let h3 = recorder(&log, "h3", -10, Outcome::Continue);
        let h1 = recorder(&log, "h1", 10, Outcome::Continue);
        let h2 = recorder(&log, "h2", 0, Outcome::Continue);
        for h in [&h3, &h1, &h2] {
            d.register_handler(TY, h).unwrap();
        }

        assert_eq!(d.publish(TY, &mut ()), Delivery::Unhandled);
        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2", "h3"]);

        log.lock().unwrap().clear();
        h2.set_priority(50);
        d.register_handler(TY, &h2).unwrap();
        d.publish(TY, &mut ());
        assert_eq!(*log.lock().unwrap(), vec!["h2", "h1", "h3"]);
    }

    #[test]
    fn test_newest_first_within_priority() {
        let d = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.register_handler(TY, &recorder(&log, "old", 0, Outcome::Continue))
            .unwrap();
        d.register_handler(TY, &recorder(&log, "new", 0, Outcome::Continue))
            .unwrap();
        d.publish(TY, &mut ());
        assert_eq!(*log.lock().unwrap(), vec!["new", "old"]);
    }

    #[test]
    fn test_claim_stops_chain() {
        let d = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.register_handler(TY, &recorder(&log, "a", 2, Outcome::Continue))
            .unwrap();
        d.register_handler(TY, &recorder(&log, "b", 1, Outcome::Claim))
            .unwrap();
        d.register_handler(TY, &recorder(&log, "c", 0, Outcome::Continue))
            .unwrap();

        assert_eq!(d.publish(TY, &mut ()), Delivery::Handled);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_unclaimed_runs_every_handler_once() {
        let d = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.register_handler(TY, &recorder(&log, "a", 0, Outcome::Continue))
            .unwrap();
        d.register_handler(TY, &recorder(&log, "b", 0, Outcome::ForceUnclaimed))
            .unwrap();
        assert_eq!(d.publish(TY, &mut ()), Delivery::Unhandled);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(d.publish(Type(0x999), &mut ()), Delivery::Unhandled);
    }

    #[test]
    fn test_handlers_edit_message() {
        let d = dispatcher();
        d.register_handler(
            TY,
            &Handler::from_fn("double", 1, |ev| {
                *ev.message_mut::<u32>().unwrap() *= 2;
                Outcome::Continue
            }),
        )
        .unwrap();
        d.register_handler(
            TY,
            &Handler::from_fn("inc", 0, |ev| {
                *ev.message_mut::<u32>().unwrap() += 1;
                Outcome::Continue
            }),
        )
        .unwrap();

        let mut n = 5u32;
        d.publish(TY, &mut n);
        assert_eq!(n, 11);
    }

    #[test]
    fn test_tail_wraps_rest_of_chain() {
        let d = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        d.register_handler(
            TY,
            &Handler::from_fn("wrap", 10, move |ev| {
                l.lock().unwrap().push("before");
                let inner = ev.tail();
                l.lock().unwrap().push(if inner.is_handled() {
                    "after:handled"
                } else {
                    "after:unhandled"
                });
                Outcome::Continue
            }),
        )
        .unwrap();
        d.register_handler(TY, &recorder(&log, "inner", 0, Outcome::Claim))
            .unwrap();
        d.register_handler(TY, &recorder(&log, "never", -1, Outcome::Continue))
            .unwrap();

        assert_eq!(d.publish(TY, &mut ()), Delivery::Handled);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before", "inner", "after:handled"]
        );
    }

    #[test]
    fn test_force_unclaimed_after_tail_overrides_result() {
        let d = dispatcher();
        d.register_handler(
            TY,
            &Handler::from_fn("mask", 10, |ev| {
                assert!(ev.tail().is_handled());
                Outcome::ForceUnclaimed
            }),
        )
        .unwrap();
        d.register_handler(TY, &Handler::from_fn("claim", 0, |_| Outcome::Claim))
            .unwrap();
        assert_eq!(d.publish(TY, &mut ()), Delivery::Unhandled);
    }

    #[test]
    fn test_tail_does_not_rerun_outer_chain() {
        let d = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.register_handler(
            TY,
            &Handler::from_fn("wrap", 10, |ev| {
                ev.tail();
                ev.tail();
                Outcome::Continue
            }),
        )
        .unwrap();
        d.register_handler(TY, &recorder(&log, "inner", 0, Outcome::Continue))
            .unwrap();
        assert_eq!(d.publish(TY, &mut ()), Delivery::Unhandled);
        assert_eq!(*log.lock().unwrap(), vec!["inner"]);
    }

    #[test]
    fn test_dispatch_id_shared_within_publish() {
        let d = dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for p in [1, 0] {
            let s = Arc::clone(&seen);
            d.register_handler(
                TY,
                &Handler::from_fn("id", p, move |ev| {
                    s.lock().unwrap().push(ev.dispatch_id());
                    Outcome::Continue
                }),
            )
            .unwrap();
        }
        d.publish(TY, &mut ());
        d.publish(TY, &mut ());
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[2], seen[3]);
        assert_ne!(seen[0], seen[2]);
        assert!(seen.iter().all(|&id| id != 0));
    }

    #[test]
    fn test_handler_deregisters_itself_and_others() {
        let d = Arc::new(dispatcher());
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim = recorder(&log, "victim", 0, Outcome::Continue);

        let slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));
        let (d2, v2, s2) = (Arc::clone(&d), victim.clone(), Arc::clone(&slot));
        let selfish = Handler::from_fn("selfish", 10, move |_| {
            let me = s2.lock().unwrap().clone().unwrap();
            assert_eq!(d2.deregister_handler(TY, &me), Err(Error::InUse));
            assert_eq!(d2.deregister_handler(TY, &v2), Ok(()));
            Outcome::Continue
        });
        *slot.lock().unwrap() = Some(selfish.clone());

        d.register_handler(TY, &selfish).unwrap();
        d.register_handler(TY, &victim).unwrap();

        assert_eq!(d.publish(TY, &mut ()), Delivery::Unhandled);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(d.registry().find_by_type(Class::EVENT, TY).count(), 0);
        assert_eq!(d.registry().pending_free(), 0);

        // Break the handler -> slot -> handler cycle.
        slot.lock().unwrap().take();
    }

    #[test]
    fn test_batch_register_and_deregister() {
        let d = dispatcher();
        let a = Handler::from_fn("a", 0, |_| Outcome::Continue);
        let b = Handler::from_fn("b", 0, |_| Outcome::Continue);
        d.register_handlers(&[(TY, a.clone()), (Type(2), b.clone())])
            .unwrap();
        assert_eq!(d.registry().len(), 2);

        d.deregister_handlers(&[(TY, a.clone()), (Type(2), b.clone())])
            .unwrap();
        assert!(d.registry().is_empty());
        assert_eq!(
            d.deregister_handlers(&[(TY, a)]),
            Err(Error::UnknownKey)
        );
    }

    #[test]
    fn test_roll_back_reports_pairs_it_could_not_remove() {
        let d = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        let kept = recorder(&log, "kept", 0, Outcome::Continue);
        let gone = recorder(&log, "gone", 0, Outcome::Continue);
        d.register_handler(TY, &kept).unwrap();

        let stuck = d.roll_back(&[(TY, kept), (Type(0x101), gone)]);
        assert_eq!(stuck, 1);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_safe_deregister_waits_for_running_handler() {
        use std::sync::mpsc;
        use std::thread;

        let d = Arc::new(dispatcher());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let slow = Handler::from_fn("slow", 0, move |_| {
            entered_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            Outcome::Continue
        });
        d.register_handler(TY, &slow).unwrap();

        let d2 = Arc::clone(&d);
        let publisher = thread::spawn(move || d2.publish(TY, &mut ()));
        entered_rx.recv().unwrap();

        let (d3, s3) = (Arc::clone(&d), slow.clone());
        let waiter = thread::spawn(move || d3.safe_deregister_handler(TY, &s3));
        release_tx.send(()).unwrap();

        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(publisher.join().unwrap(), Delivery::Unhandled);
        assert_eq!(d.registry().pending_free(), 0);
    }

    #[test]
    fn test_foreign_payload_in_event_class_is_skipped() {
        let d = dispatcher();
        d.registry()
            .register(
                Key::new(Class::EVENT, TY, Id(0)),
                Payload::new(Arc::new(1u8)),
                100,
            )
            .unwrap();
        d.register_handler(TY, &Handler::from_fn("claim", 0, |_| Outcome::Claim))
            .unwrap();
        assert_eq!(d.publish(TY, &mut ()), Delivery::Handled);
    }
}
