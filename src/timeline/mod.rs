//! # Timeline lifecycle manager.
//!
//! A timeline is a node in a forest of long-lived activities (jobs, pages,
//! caches, devices). Each one carries a type, a priority, an extent with
//! progress and an optional title; contexts hang off it in the registry.
//! Every change is announced through the dispatcher with a
//! [`TimelineMessage`] so that handlers can react, rewrite or object.
//!
//! ## Lifecycle
//! ```text
//! start(spec) ──► START ──┬─ claimed ─► Vetoed, nothing remains
//!                         └─► Start
//!                              ├─ set_title ─► TITLE (editable, vetoable)
//!                              ├─ set_extent ─► EXTENT
//!                              ├─ set_progress ─► PROGRESS
//!                              ├─ end   ─► ENDING  per node ─► ENDED   leaf-first
//!                              └─ abort ─► ABORTING per node ─► ABORTED leaf-first
//! ```
//!
//! ## Rules
//! - A timeline cannot finish while a child of equal or higher priority lives.
//! - Finishing a timeline finishes its subtree; each node may object.
//! - A postponed abort stays pending; a postponed end does not.
//! - References are never reused while the timeline is alive.

mod events;
mod forest;
mod manager;
mod negotiate;
mod types;

pub use events::{
    label as event_label, TimelineMessage, ABORTED, ABORTING, ALL as ALL_EVENTS, ENDED, ENDING,
    EXTENT, PROGRESS, START, TITLE,
};
pub use manager::Timelines;
pub use types::{Progress, State, TimelineRef, TimelineSpec, TimelineType, Unit, INDETERMINATE};
