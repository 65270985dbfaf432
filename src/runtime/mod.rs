//! Runtime wiring and API discovery.
//!
//! - [`api`]: publish, look up and withdraw versioned API tables in the registry;
//! - [`Core`]: creates the registry, dispatcher and timeline manager and
//!   publishes them.

pub mod api;
mod context;

pub use context::{Core, CoreBuilder};
