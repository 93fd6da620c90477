//! Shutdown coordination.
//!
//! One [`CancellationToken`] is shared by the HTTP listener and the turn
//! service; cancelling it stops accepting connections and cancels every
//! live turn, which closes the open SSE streams.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates shutdown across the server's tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the shared token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve on Ctrl-C or when shutdown is triggered elsewhere, then fire.
    pub async fn wait_for_signal(&self) {
        tokio::select! {
            biased;
            () = self.token.cancelled() => {}
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for ctrl-c");
                    return;
                }
                info!("ctrl-c received");
            }
        }
        self.shutdown();
    }

    /// Fire the token, then wait up to `timeout` for `handles` to finish.
    ///
    /// Returns `false` when the wait timed out.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        info!(
            tasks = handles.len(),
            timeout_secs = timeout.as_secs(),
            "draining server tasks"
        );
        let drained = tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok();
        if !drained {
            warn!(?timeout, "shutdown timed out with tasks still running");
        }
        drained
    }
}
