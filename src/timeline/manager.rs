//! # Timeline manager.
//!
//! [`Timelines`] owns the forest and publishes lifecycle events through a
//! [`Dispatcher`]. One mutex guards the forest; it is never held while
//! handlers run.
//!
//! ## Checkout
//! ```text
//! lock ─► node.usage += 1, snapshot message ─► unlock
//!      ─► publish(event, &mut message)            (handlers may end the node)
//!      ─► lock ─► commit if still linked ─► unlock
//!      ─► Checkout::drop: usage -= 1, free if unlinked and unused
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::registry::{Class, Id, Key, Payload, Priority, Registry};
use crate::runtime::api;

use super::events::{self, TimelineMessage};
use super::forest::Forest;
use super::types::{
    is_indeterminate, validate_extent, Progress, State, TimelineRef, TimelineSpec, TimelineType,
};

/// Timeline lifecycle manager.
pub struct Timelines {
    pub(super) forest: Mutex<Forest>,
    pub(super) dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    pub(super) cfg: Config,
}

/// Holds one `usage` count on a node; releases it on drop.
///
/// Must never be dropped while the forest lock is held.
pub(super) struct Checkout<'t> {
    timelines: &'t Timelines,
    reference: TimelineRef,
}

impl<'t> Checkout<'t> {
    /// Takes over a count already added under the lock.
    pub(super) fn adopt(timelines: &'t Timelines, reference: TimelineRef) -> Self {
        Self {
            timelines,
            reference,
        }
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        let freed = self.timelines.forest.lock().release(self.reference);
        drop(freed);
    }
}

impl Timelines {
    pub fn new(dispatcher: Arc<Dispatcher>, registry: Arc<Registry>, cfg: Config) -> Self {
        Self {
            forest: Mutex::new(Forest::with_capacity(cfg.timeline_capacity)),
            dispatcher,
            registry,
            cfg,
        }
    }

    /// Creates a manager over the registry and dispatcher published in
    /// `registry`.
    pub fn discover(registry: &Registry, cfg: Config) -> Result<Self> {
        let shared = api::lookup::<Registry>(registry, api::REGISTRY, api::REGISTRY_VERSION)?;
        let dispatcher =
            api::lookup::<Dispatcher>(registry, api::DISPATCHER, api::DISPATCHER_VERSION)?;
        Ok(Self::new(dispatcher, shared, cfg))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Number of live (linked) timelines.
    pub fn len(&self) -> usize {
        self.forest.lock().linked()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn context_key(reference: TimelineRef, id: Id) -> Key {
        Key::new(Class::TIMELINE, reference.context_type(), id)
    }

    /// Snapshot of a linked node with one usage count held.
    pub(super) fn checkout(
        &self,
        reference: TimelineRef,
    ) -> Result<(TimelineMessage, Checkout<'_>)> {
        let message = {
            let mut forest = self.forest.lock();
            let node = forest.get_mut(reference)?;
            node.usage += 1;
            node.message()
        };
        Ok((message, Checkout::adopt(self, reference)))
    }

    // ---- Lifecycle ----

    /// Starts a timeline and announces it with [`START`](crate::timeline::START).
    ///
    /// ### Errors
    /// - `Syntax` for an invalid extent
    /// - `UnknownKey` if the parent is gone or already finalised
    /// - `Vetoed` if a handler claimed `START`; nothing of the timeline remains
    pub fn start(&self, spec: TimelineSpec) -> Result<TimelineRef> {
        validate_extent(spec.start, spec.end)?;

        let mut message = self.forest.lock().attach(&spec)?;
        let reference = message.reference;
        let checkout = Checkout::adopt(self, reference);

        if let Some(context) = spec.context.clone() {
            let key = Self::context_key(reference, Id(0));
            if let Err(e) = self.registry.register(key, context, 0) {
                self.discard(reference);
                return Err(e);
            }
        }

        trace!(timeline = %reference, ty = spec.ty.0, priority = spec.priority, "start");
        let delivery = self.dispatcher.publish(events::START, &mut message);
        if delivery.is_handled() {
            debug!(timeline = %reference, "start vetoed");
            self.discard(reference);
            drop(checkout);
            return Err(Error::Vetoed);
        }
        Ok(reference)
    }

    /// Ends a timeline and its whole subtree.
    ///
    /// ### Errors
    /// - `UnknownKey` if the timeline is gone
    /// - `InUse` if a child of equal or higher priority is alive, a handler
    ///   objected to `ENDING`, or an end/abort is already in flight
    pub fn end(&self, reference: TimelineRef) -> Result<()> {
        self.terminate(reference, super::negotiate::Action::End, None, None)
    }

    /// Aborts a timeline and its whole subtree.
    ///
    /// A postponed abort stays pending: a later `end` on the same timeline is
    /// carried out as an abort. A successful abort is forwarded to the parent
    /// when the parent's priority is below the acting priority.
    pub fn abort(&self, reference: TimelineRef, reason: Option<&str>) -> Result<()> {
        self.terminate(
            reference,
            super::negotiate::Action::Abort,
            None,
            reason.map(Arc::from),
        )
    }

    /// Removes a vetoed timeline and anything attached to it meanwhile.
    fn discard(&self, reference: TimelineRef) {
        let (doomed, freed) = {
            let mut forest = self.forest.lock();
            let doomed = forest.post_order(reference);
            let freed: Vec<_> = doomed.iter().filter_map(|r| forest.unlink(*r)).collect();
            (doomed, freed)
        };
        for r in &doomed {
            self.drop_contexts(*r);
        }
        drop(freed);
    }

    /// Deregisters every context registered for `reference`.
    pub(super) fn drop_contexts(&self, reference: TimelineRef) {
        let contexts: Vec<_> = self
            .registry
            .find_by_type(Class::TIMELINE, reference.context_type())
            .collect();
        for entry in contexts {
            if let Err(e) = self.registry.deregister(entry.key, &entry.payload) {
                warn!(
                    timeline = %reference,
                    key = %entry.key,
                    error = e.as_label(),
                    "context not released"
                );
            }
        }
    }

    // ---- Attributes ----

    /// Changes the title after announcing it with [`TITLE`](crate::timeline::TITLE).
    ///
    /// Handlers may rewrite or clear `message.title`; the committed title is
    /// whatever the message holds after dispatch. A claim vetoes the change.
    pub fn set_title(&self, reference: TimelineRef, title: Option<&str>) -> Result<()> {
        let (mut message, _checkout) = self.checkout(reference)?;
        message.title = title.map(Arc::from);
        let delivery = self.dispatcher.publish(events::TITLE, &mut message);
        if delivery.is_handled() {
            return Err(Error::Vetoed);
        }
        if let Some(node) = self.forest.lock().node_mut(reference) {
            node.title = message.title;
        }
        Ok(())
    }

    pub fn get_title(&self, reference: TimelineRef) -> Result<Option<Arc<str>>> {
        Ok(self.forest.lock().get(reference)?.title.clone())
    }

    /// Sets the extent; a change is announced with [`EXTENT`](crate::timeline::EXTENT).
    pub fn set_extent(&self, reference: TimelineRef, start: f64, end: f64) -> Result<()> {
        validate_extent(start, end)?;
        let (mut message, _checkout) = self.checkout(reference)?;
        if message.start == start && message.end == end {
            return Ok(());
        }
        message.start = start;
        message.end = end;
        self.dispatcher.publish(events::EXTENT, &mut message);
        if let Some(node) = self.forest.lock().node_mut(reference) {
            node.start = start;
            node.end = end;
        }
        Ok(())
    }

    /// Sets progress, widening a determinate extent to include it.
    pub fn set_progress(&self, reference: TimelineRef, progress: f64) -> Result<()> {
        if !progress.is_finite() {
            return Err(Error::syntax("progress must be finite"));
        }
        let (mut message, _checkout) = self.checkout(reference)?;
        let (start, end) = if is_indeterminate(message.end) {
            (message.start, message.end)
        } else {
            (message.start.min(progress), message.end.max(progress))
        };
        message.start = start;
        message.end = end;
        message.progress = progress;
        self.dispatcher.publish(events::PROGRESS, &mut message);
        if let Some(node) = self.forest.lock().node_mut(reference) {
            node.start = start;
            node.end = end;
            node.progress = progress;
        }
        Ok(())
    }

    pub fn get_progress(&self, reference: TimelineRef) -> Result<Progress> {
        let forest = self.forest.lock();
        let node = forest.get(reference)?;
        Ok(Progress {
            start: node.start,
            end: node.end,
            progress: node.progress,
            unit: node.unit,
        })
    }

    // ---- Queries ----

    /// Nearest strict ancestor of type `ty`.
    pub fn get_ancestor(&self, reference: TimelineRef, ty: TimelineType) -> Result<TimelineRef> {
        self.forest.lock().find_type(reference, ty, false)
    }

    /// The timeline itself if it is of type `ty`, otherwise the nearest
    /// ancestor that is.
    pub fn of_type(&self, reference: TimelineRef, ty: TimelineType) -> Result<TimelineRef> {
        self.forest.lock().find_type(reference, ty, true)
    }

    pub fn get_parent(&self, reference: TimelineRef) -> Result<Option<TimelineRef>> {
        Ok(self.forest.lock().get(reference)?.parent)
    }

    pub fn get_type(&self, reference: TimelineRef) -> Result<TimelineType> {
        Ok(self.forest.lock().get(reference)?.ty)
    }

    pub fn get_priority(&self, reference: TimelineRef) -> Result<Priority> {
        Ok(self.forest.lock().get(reference)?.priority)
    }

    pub fn get_state(&self, reference: TimelineRef) -> Result<State> {
        Ok(self.forest.lock().get(reference)?.state)
    }

    pub fn get_children(&self, reference: TimelineRef) -> Result<Vec<TimelineRef>> {
        Ok(self.forest.lock().get(reference)?.children.clone())
    }

    // ---- Contexts ----

    /// Attaches (or with `None`, removes) context `id` of a timeline.
    ///
    /// Id 0 is the owner context given at start and cannot be replaced.
    pub fn set_context(
        &self,
        reference: TimelineRef,
        id: Id,
        context: Option<Payload>,
    ) -> Result<()> {
        if id == Id(0) {
            return Err(Error::syntax("owner context is fixed at start"));
        }
        self.forest.lock().get(reference)?;
        self.replace_context(reference, id, context)
    }

    /// Swaps the registry entry of a context. The timeline may finish while
    /// this runs, so a new entry is withdrawn again if it outlived it.
    fn replace_context(
        &self,
        reference: TimelineRef,
        id: Id,
        context: Option<Payload>,
    ) -> Result<()> {
        let key = Self::context_key(reference, id);
        if let Ok(previous) = self.registry.find_exact(key) {
            match self.registry.deregister(key, &previous) {
                Ok(()) | Err(Error::InUse) | Err(Error::UnknownKey) => {}
                Err(e) => return Err(e),
            }
        }
        let Some(context) = context else {
            return Ok(());
        };
        self.registry.register(key, context.clone(), 0)?;

        if self.forest.lock().get(reference).is_err() {
            match self.registry.deregister(key, &context) {
                Ok(()) | Err(Error::UnknownKey) => {}
                Err(e) => warn!(
                    timeline = %reference,
                    %key,
                    error = e.as_label(),
                    "late context not released"
                ),
            }
            return Err(Error::UnknownKey);
        }
        Ok(())
    }

    pub fn get_context(&self, reference: TimelineRef, id: Id) -> Result<Payload> {
        self.forest.lock().get(reference)?;
        self.registry.find_exact(Self::context_key(reference, id))
    }
}

impl std::fmt::Debug for Timelines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timelines")
            .field("live", &self.len())
            .field("cfg", &self.cfg)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dispatch::{Handler, Outcome};
    use crate::timeline::{TimelineType, Unit, INDETERMINATE};

    const JOB: TimelineType = TimelineType(1);
    const STEP: TimelineType = TimelineType(2);

    fn manager() -> Timelines {
        let registry = Arc::new(Registry::default());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Config::default()));
        Timelines::new(dispatcher, registry, Config::default())
    }

    #[test]
    fn test_start_records_attributes() {
        let tl = manager();
        let root = tl
            .start(
                TimelineSpec::new(JOB)
                    .with_extent(0.0, 10.0)
                    .with_unit(Unit(3))
                    .with_priority(4)
                    .with_title("build"),
            )
            .unwrap();
        let child = tl.start(TimelineSpec::new(STEP).with_parent(root)).unwrap();

        assert_eq!(tl.get_type(root).unwrap(), JOB);
        assert_eq!(tl.get_priority(root).unwrap(), 4);
        assert_eq!(tl.get_state(root).unwrap(), State::Start);
        assert_eq!(tl.get_title(root).unwrap().as_deref(), Some("build"));
        assert_eq!(tl.get_parent(child).unwrap(), Some(root));
        assert_eq!(tl.get_children(root).unwrap(), vec![child]);
        let p = tl.get_progress(root).unwrap();
        assert_eq!(
            (p.start, p.end, p.progress, p.unit),
            (0.0, 10.0, 0.0, Unit(3))
        );
        assert!(tl.get_progress(child).unwrap().is_indeterminate());
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn test_start_rejects_bad_input() {
        let tl = manager();
        let bad = TimelineSpec::new(JOB).with_extent(5.0, 1.0);
        assert!(matches!(tl.start(bad), Err(Error::Syntax { .. })));

        let ghost = TimelineRef::new(77).unwrap();
        assert_eq!(
            tl.start(TimelineSpec::new(JOB).with_parent(ghost))
                .unwrap_err(),
            Error::UnknownKey
        );
        assert!(tl.is_empty());
    }

    #[test]
    fn test_start_veto_leaves_nothing() {
        let tl = manager();
        let veto = Handler::from_fn("veto", 0, |_| Outcome::Claim);
        tl.dispatcher()
            .register_handler(events::START, &veto)
            .unwrap();

        let spec = TimelineSpec::new(JOB)
            .with_context(Payload::new(Arc::new(1u8)));
        assert_eq!(tl.start(spec).unwrap_err(), Error::Vetoed);
        assert!(tl.is_empty());
        assert_eq!(tl.registry.find_by_class(Class::TIMELINE).count(), 0);
    }

    #[test]
    fn test_title_handlers_can_rewrite_or_veto() {
        let tl = manager();
        let root = tl.start(TimelineSpec::new(JOB)).unwrap();
        let upper = Handler::from_fn("upper", 0, |ev| {
            if let Some(msg) = ev.message_mut::<TimelineMessage>() {
                msg.title = msg.title.as_deref().map(|t| Arc::from(t.to_uppercase()));
            }
            Outcome::Continue
        });
        tl.dispatcher()
            .register_handler(events::TITLE, &upper)
            .unwrap();

        tl.set_title(root, Some("compile")).unwrap();
        assert_eq!(tl.get_title(root).unwrap().as_deref(), Some("COMPILE"));

        let veto = Handler::from_fn("veto", 10, |_| Outcome::Claim);
        tl.dispatcher()
            .register_handler(events::TITLE, &veto)
            .unwrap();
        assert_eq!(tl.set_title(root, None).unwrap_err(), Error::Vetoed);
        assert_eq!(tl.get_title(root).unwrap().as_deref(), Some("COMPILE"));
    }

    #[test]
    fn test_extent_event_only_on_change() {
        let tl = manager();
        let root = tl
            .start(TimelineSpec::new(JOB).with_extent(0.0, 4.0))
            .unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let h = Handler::from_fn("extent", 0, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            Outcome::Claim
        });
        tl.dispatcher()
            .register_handler(events::EXTENT, &h)
            .unwrap();

        tl.set_extent(root, 0.0, 4.0).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        tl.set_extent(root, 1.0, 8.0).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let p = tl.get_progress(root).unwrap();
        assert_eq!((p.start, p.end), (1.0, 8.0));
        assert!(tl.set_extent(root, 2.0, f64::NAN).is_err());
    }

    #[test]
    fn test_progress_widens_determinate_extent() {
        let tl = manager();
        let fixed = tl
            .start(TimelineSpec::new(JOB).with_extent(2.0, 4.0))
            .unwrap();
        tl.set_progress(fixed, 6.0).unwrap();
        tl.set_progress(fixed, 1.0).unwrap();
        let p = tl.get_progress(fixed).unwrap();
        assert_eq!((p.start, p.end, p.progress), (1.0, 6.0, 1.0));

        let open = tl
            .start(TimelineSpec::new(JOB).with_extent(3.0, INDETERMINATE))
            .unwrap();
        tl.set_progress(open, 50.0).unwrap();
        let p = tl.get_progress(open).unwrap();
        assert_eq!((p.start, p.end, p.progress), (3.0, INDETERMINATE, 50.0));
        assert!(tl.set_progress(open, f64::NAN).is_err());
    }

    #[test]
    fn test_ancestor_queries() {
        let tl = manager();
        let job = tl.start(TimelineSpec::new(JOB)).unwrap();
        let step = tl.start(TimelineSpec::new(STEP).with_parent(job)).unwrap();
        let sub = tl.start(TimelineSpec::new(STEP).with_parent(step)).unwrap();

        assert_eq!(tl.get_ancestor(sub, STEP).unwrap(), step);
        assert_eq!(tl.get_ancestor(sub, JOB).unwrap(), job);
        assert_eq!(tl.of_type(sub, STEP).unwrap(), sub);
        assert_eq!(tl.get_ancestor(job, JOB).unwrap_err(), Error::UnknownKey);
        assert_eq!(tl.of_type(job, JOB).unwrap(), job);
    }

    #[test]
    fn test_contexts() {
        let tl = manager();
        let owner = Payload::new(Arc::new(String::from("owner")));
        let root = tl
            .start(TimelineSpec::new(JOB).with_context(owner))
            .unwrap();

        let got = tl.get_context(root, Id(0)).unwrap();
        assert_eq!(got.downcast::<String>().unwrap().as_str(), "owner");
        assert!(matches!(
            tl.set_context(root, Id(0), None),
            Err(Error::Syntax { .. })
        ));

        tl.set_context(root, Id(5), Some(Payload::new(Arc::new(1u32))))
            .unwrap();
        tl.set_context(root, Id(5), Some(Payload::new(Arc::new(2u32))))
            .unwrap();
        assert_eq!(
            *tl
                .get_context(root, Id(5))
                .unwrap()
                .downcast::<u32>()
                .unwrap(),
            2
        );

        tl.set_context(root, Id(5), None).unwrap();
        assert_eq!(tl.get_context(root, Id(5)).unwrap_err(), Error::UnknownKey);
        assert_eq!(tl.get_context(root, Id(6)).unwrap_err(), Error::UnknownKey);
    }

    #[test]
    fn test_context_registered_after_finish_is_withdrawn() {
        let tl = manager();
        let root = tl.start(TimelineSpec::new(JOB)).unwrap();
        tl.end(root).unwrap();

        // A set_context that passed its liveness check just before the end.
        let late = Payload::new(Arc::new(7u32));
        assert_eq!(
            tl.replace_context(root, Id(3), Some(late)).unwrap_err(),
            Error::UnknownKey
        );
        assert_eq!(
            tl.registry
                .find_by_type(Class::TIMELINE, root.context_type())
                .count(),
            0
        );
        assert!(tl.registry.is_empty());
    }
}
