//! Shutdown coordination via `CancellationToken`.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Coordinates shutdown of the listener and every module session.
///
/// Sessions hold child tokens, so one [`shutdown`](Self::shutdown) closes all
/// of them.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token the listener and sessions watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting connections and end every session. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }
}
