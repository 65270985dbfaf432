//! # Logging handler for timeline events.
//!
//! [`LogHandler`] emits one `tracing` event per timeline event. It never
//! claims, so installing it changes no outcome.
//!
//! ## Output format
//! ```text
//! [start] timeline=tl#1 type=1 parent=None priority=0 title=Some("job")
//! [ending] timeline=tl#1 state=Ending
//! [aborted] timeline=tl#2 state=Aborted reason=Some("disk gone")
//! [progress] timeline=tl#1 progress=3 start=0 end=10
//! ```
//!
//! ## Example
//! ```rust
//! # use ripcore::{Config, Core, LogHandler};
//! let core = Core::new(Config::default()).unwrap();
//! LogHandler::install(core.dispatcher(), i32::MAX).unwrap();
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::dispatch::{Dispatcher, Event, Handle, Handler, Outcome};
use crate::error::Result;
use crate::registry::{Priority, Type};
use crate::timeline::{self, TimelineMessage};

/// Timeline event logger.
///
/// Enabled via the `logging` feature. Register it at a high priority to see
/// events before a handler claims them.
pub struct LogHandler;

impl LogHandler {
    /// Subscribes a `LogHandler` to every timeline event at `priority`.
    ///
    /// Returns the registrations so the caller can remove them with
    /// [`Dispatcher::deregister_handlers`].
    pub fn install(dispatcher: &Dispatcher, priority: Priority) -> Result<Vec<(Type, Handler)>> {
        let handler = Handler::new(Arc::new(LogHandler), priority);
        let batch: Vec<_> = timeline::ALL_EVENTS
            .iter()
            .map(|ty| (*ty, handler.clone()))
            .collect();
        dispatcher.register_handlers(&batch)?;
        Ok(batch)
    }
}

impl Handle for LogHandler {
    fn on_event(&self, event: &mut Event<'_>) -> Outcome {
        let label = timeline::event_label(event.ty());
        let Some(m) = event.message::<TimelineMessage>() else {
            debug!(
                event = label,
                dispatch = event.dispatch_id(),
                "non-timeline message"
            );
            return Outcome::Continue;
        };
        match event.ty() {
            timeline::START => info!(
                "[{label}] timeline={} type={} parent={:?} priority={} title={:?}",
                m.reference,
                m.ty.0,
                m.parent.map(|p| p.get()),
                m.priority,
                m.title
            ),
            timeline::ABORTING | timeline::ABORTED => info!(
                "[{label}] timeline={} state={:?} reason={:?}",
                m.reference, m.state, m.reason
            ),
            timeline::TITLE => info!("[{label}] timeline={} title={:?}", m.reference, m.title),
            timeline::EXTENT | timeline::PROGRESS => debug!(
                "[{label}] timeline={} progress={} start={} end={}",
                m.reference, m.progress, m.start, m.end
            ),
            _ => info!("[{label}] timeline={} state={:?}", m.reference, m.state),
        }
        Outcome::Continue
    }

    fn name(&self) -> &str {
        "log"
    }
}
