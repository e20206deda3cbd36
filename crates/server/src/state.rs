// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use quantline_core::RequestRegistry;

use crate::mailer::Mailer;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Active analysis runs and their cancellation tokens.
    pub registry: Arc<RequestRegistry>,
    /// Outbound email transport for the /analysis/email route.
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(mailer: Arc<dyn Mailer>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            registry: Arc::new(RequestRegistry::new()),
            mailer,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
