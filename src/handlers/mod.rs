//! Built-in handlers.
//!
//! - [`LogHandler`]: traces every timeline event _(feature `logging`)_.

mod log;

pub use log::LogHandler;
