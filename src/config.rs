//! # Global configuration.
//!
//! Provides [`Config`], the centralized settings for a [`Core`](crate::Core).
//!
//! ## Sentinel values
//! - `deregister_backoff = 0s` → `thread::yield_now` between safe-deregister retries
//! - `max_negotiation_rounds = 0` → unlimited whole-subtree renegotiation

use std::time::Duration;

/// Configuration for the registry, dispatcher and timeline manager.
///
/// ## Field semantics
/// - `registry_capacity`: entries reserved up front in the registry
/// - `timeline_capacity`: initial size of the timeline reference index
/// - `deregister_backoff`: pause between `safe_deregister_handler` retries (`0s` = yield)
/// - `max_negotiation_rounds`: rounds before an end/abort gives up with `InUse` (`0` = unlimited)
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of registry entries reserved at construction.
    pub registry_capacity: usize,

    /// Initial capacity of the timeline reference index.
    pub timeline_capacity: usize,

    /// Pause between retries while a pinned handler drains.
    ///
    /// - `Duration::ZERO` = `std::thread::yield_now()`
    /// - `> 0` = `std::thread::sleep(deregister_backoff)`
    pub deregister_backoff: Duration,

    /// Whole-subtree renegotiation limit for `end`/`abort`.
    ///
    /// A round is repeated when the subtree changed while handlers were being
    /// consulted. When the limit is reached the call reports `InUse` and the
    /// subtree reverts.
    pub max_negotiation_rounds: usize,
}

impl Config {
    /// Returns the negotiation round limit as an `Option`.
    ///
    /// - `None` → unlimited
    /// - `Some(n)` → at most `n` rounds
    #[inline]
    pub fn negotiation_limit(&self) -> Option<usize> {
        if self.max_negotiation_rounds == 0 {
            None
        } else {
            Some(self.max_negotiation_rounds)
        }
    }

    /// Waits once between safe-deregister retries.
    #[inline]
    pub(crate) fn backoff(&self) {
        if self.deregister_backoff.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.deregister_backoff);
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `registry_capacity = 256`
    /// - `timeline_capacity = 64`
    /// - `deregister_backoff = 0s` (yield)
    /// - `max_negotiation_rounds = 0` (unlimited)
    fn default() -> Self {
        Self {
            registry_capacity: 256,
            timeline_capacity: 64,
            deregister_backoff: Duration::ZERO,
            max_negotiation_rounds: 0,
        }
    }
}
