//! Shared application state for the sandbox service.

use std::sync::Arc;
use std::time::Duration;

use analyst::io::subprocess::SubprocessBackend;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Executes jobs; each call owns its own scratch directory.
    pub backend: Arc<SubprocessBackend>,
    /// Wall-clock bound applied to every job.
    pub timeout: Duration,
}

impl AppState {
    pub fn new(backend: SubprocessBackend, timeout: Duration) -> Self {
        Self {
            backend: Arc::new(backend),
            timeout,
        }
    }
}
