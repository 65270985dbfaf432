//! # Resource Discovery Registry.
//!
//! A priority-ordered, multi-reader/single-writer associative store keyed by
//! `(Class, Type, Id)` triples. Everything else in the crate is built on it:
//! dispatcher handlers, timeline contexts and published API tables are all
//! registry entries.
//!
//! ## Contents
//! - [`Registry`] the store (register, deregister, exact lookup, iteration)
//! - [`Iter`] / [`Filter`] filtered, resumable cursors with optional pinning
//! - [`Key`] / [`Class`] / [`Type`] / [`Id`] / [`Priority`] keys and ordering
//! - [`Payload`] shared, type-erased registration data; tombstones
//!
//! ## Ordering
//! ```text
//! (1,1,1) p=10 seq=4 ─► (1,1,1) p=0 seq=7 ─► (1,1,1) p=0 seq=2 ─► (1,1,2) p=3 ...
//!  └── visible ──┘        └ newest of tier ┘    └ older of tier ┘
//! ```

mod iter;
mod key;
mod payload;
mod store;

pub use iter::{Entry, Filter, Iter};
pub use key::{Class, Id, Key, Priority, Scan, Type};
pub use payload::{Data, Payload};
pub use store::Registry;

pub(crate) use iter::Cursor;
