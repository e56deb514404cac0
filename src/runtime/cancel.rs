//! Cooperative cancellation for transfer workers
//!
//! Raising the signal stops workers from taking new units; units already in
//! flight run to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag
///
/// Clones observe the same flag. Workers poll it between units.
#[derive(Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Create a new, unraised signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; returns false if it was already raised
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
