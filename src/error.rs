//! Error type shared by the registry, the dispatcher and the timeline manager.
//!
//! All three layers report failures through one [`Error`] enum:
//!
//! - [`Error::UnknownKey`]: lookup or deregistration found nothing matching.
//! - [`Error::Syntax`]: invalid arguments (programmer error, always locally detectable).
//! - [`Error::InUse`]: advisory: the requested change is still converging.
//! - [`Error::Memory`]: allocation failure; the caller abandons the operation.
//! - [`Error::Vetoed`]: a handler claimed a `START` or `TITLE` event.
//!
//! `InUse` is not a failure of the structural request. A deregister that reports
//! `InUse` has already removed the entry from discovery; an `end` that reports
//! `InUse` will still happen once children or objecting handlers let it. What the
//! caller must do is keep associated resources alive a little longer.

use thiserror::Error;

/// Shorthand for results produced by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// # Errors produced by the registry, dispatcher and timeline layers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Nothing matched the requested key, reference or payload.
    #[error("unknown key")]
    UnknownKey,

    /// Arguments were invalid.
    #[error("invalid arguments: {reason}")]
    Syntax {
        /// What was wrong with the arguments.
        reason: &'static str,
    },

    /// The entry or timeline is pinned, pending on children, or objected to.
    #[error("in use")]
    InUse,

    /// Allocation failed.
    #[error("out of memory")]
    Memory,

    /// A handler claimed the announcement, so the change did not happen.
    #[error("vetoed by handler")]
    Vetoed,
}

impl Error {
    /// Builds a [`Error::Syntax`] with the given reason.
    #[inline]
    pub(crate) fn syntax(reason: &'static str) -> Self {
        Error::Syntax { reason }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use ripcore::Error;
    ///
    /// assert_eq!(Error::InUse.as_label(), "in_use");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::UnknownKey => "unknown_key",
            Error::Syntax { .. } => "syntax",
            Error::InUse => "in_use",
            Error::Memory => "memory",
            Error::Vetoed => "vetoed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            Error::Syntax { reason } => format!("syntax: {reason}"),
            other => other.to_string(),
        }
    }

    /// Indicates whether the error only means "not finished yet".
    ///
    /// # Example
    /// ```
    /// use ripcore::Error;
    ///
    /// assert!(Error::InUse.is_in_use());
    /// assert!(!Error::UnknownKey.is_in_use());
    /// ```
    pub fn is_in_use(&self) -> bool {
        matches!(self, Error::InUse)
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::Memory
    }
}
