// crates/core/src/token.rs
//! Cooperative cancellation flag shared between a registry entry and its
//! running pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-writer-many-reader cancellation flag.
///
/// The state transition is monotonic: `false → true` once, never back.
/// Cloning is cheap and every clone observes the same flag. Any caller may
/// request cancellation; the running pipeline polls the flag at stage
/// boundaries and never has the backing storage exposed for direct writes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, not-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent and safe from any number of
    /// concurrent callers.
    pub fn cancel(&self) {
        // Release pairs with the Acquire in `is_cancelled` so a reader that
        // sees `true` also sees everything the canceller did before.
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    ///
    /// Reflects every `cancel` call that happened-before this read; once it
    /// returns `true` it returns `true` for the rest of the token's lifetime.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
