//! Process-wide (well: pipeline-run-wide) cancellation flag (spec.md §5).
//!
//! "One shared boolean `canceled` readable without locking. Every blocking
//! operation long enough to matter ... checks it and returns `CANCELED`
//! promptly." Cancellation is idempotent and absorbing within a run
//! (spec.md §3 invariant 6).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheap, `Clone`-able handle to a single shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Idempotent: calling this more than once has no
    /// additional effect (spec.md §5).
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Reads the flag without locking.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
