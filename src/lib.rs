//! # ripcore
//!
//! **ripcore** is the in-process core of a resource-oriented runtime: a
//! discovery registry, a synchronous event dispatcher built on it, and a
//! timeline manager that tracks long-lived activities and negotiates their end
//! with everyone who cares.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Timelines (lifecycle manager)                                    │
//! │  - forest of TimelineRef nodes (type, priority, extent, title)    │
//! │  - start / end / abort with subtree negotiation                   │
//! │  - contexts stored as (TIMELINE, ref, id) registry entries        │
//! └──────┬───────────────────────────────────────────────┬────────────┘
//!        │ publish START/ENDING/ENDED/...                │ contexts
//!        ▼                                               │
//! ┌──────────────────────────────────────┐               │
//! │  Dispatcher                          │               │
//! │  - handlers at (EVENT, type, 0)      │               │
//! │  - priority order, claim, tail calls │               │
//! └──────┬───────────────────────────────┘               │
//!        │ resumable pinned iteration                    │
//!        ▼                                               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Registry: (Class, Type, Id) ─► [payloads by priority, newest 1st]│
//! │  - API tables at (API, api-id, version)                           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! start(spec) ─► START ─┬─ claimed ─► Vetoed
//!                       └─► Start ─► end/abort
//!                                      ├─ guard: child priority >= acting ─► InUse
//!                                      ├─ ENDING/ABORTING per node (objection ─► InUse, revert)
//!                                      └─ ENDED/ABORTED leaf-first ─► unlinked, contexts dropped
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                      |
//! |-------------------|----------------------------------------------------------|-----------------------------------------|
//! | **Registry**      | Priority-ordered discovery store with pinning iterators. | [`Registry`], [`Iter`], [`Payload`]     |
//! | **Dispatch**      | Ordered, claimable, synchronous publish/subscribe.       | [`Dispatcher`], [`Handle`], [`Handler`] |
//! | **Timelines**     | Hierarchical lifecycles with negotiated end and abort.   | [`Timelines`], [`TimelineSpec`]         |
//! | **Discovery**     | Versioned API tables published in the registry.          | [`Core`], [`runtime::api`]              |
//! | **Errors**        | One error enum for every layer.                          | [`Error`]                               |
//! | **Configuration** | Capacities, backoff and negotiation limits.              | [`Config`]                              |
//!
//! ## Optional features
//! - `logging` _(default)_: exports [`LogHandler`], which traces every timeline event.
//!
//! ## Example
//! ```rust
//! use ripcore::{timeline, Config, Core, Handler, Outcome, TimelineMessage, TimelineSpec, TimelineType};
//!
//! const JOB: TimelineType = TimelineType(1);
//!
//! let core = Core::new(Config::default())?;
//!
//! // Refuse to end jobs that are not done yet.
//! let guard = Handler::from_fn("unfinished", 10, |ev| {
//!     match ev.message::<TimelineMessage>() {
//!         Some(m) if m.progress < m.end => Outcome::Claim,
//!         _ => Outcome::Continue,
//!     }
//! });
//! core.dispatcher().register_handler(timeline::ENDING, &guard)?;
//!
//! let tl = core.timelines();
//! let job = tl.start(TimelineSpec::new(JOB).with_extent(0.0, 2.0).with_title("build"))?;
//! assert!(tl.end(job).is_err());
//!
//! tl.set_progress(job, 2.0)?;
//! tl.end(job)?;
//! # Ok::<(), ripcore::Error>(())
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod timeline;

#[cfg(feature = "logging")]
mod handlers;

// ---- Public re-exports ----

pub use config::Config;
pub use dispatch::{Delivery, Dispatcher, Event, Handle, HandleRef, Handler, HandlerFn, Outcome};
pub use error::{Error, Result};
pub use registry::{
    Class, Data, Entry, Filter, Id, Iter, Key, Payload, Priority, Registry, Scan, Type,
};
pub use runtime::{Core, CoreBuilder};
pub use timeline::{
    Progress, State, TimelineMessage, TimelineRef, TimelineSpec, TimelineType, Timelines, Unit,
    INDETERMINATE,
};

#[cfg(feature = "logging")]
pub use handlers::LogHandler;
