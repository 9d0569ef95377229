//! Deferred shutdown sequencing.
//!
//! A shutdown request (signal or API call) only flips an atomic state flag;
//! the actual teardown runs on the scheduler after a short defer, never in
//! the caller's context. Repeated requests while a shutdown is already in
//! flight are ignored, so the engine unload sequence runs at most once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ServiceRegistry;
use crate::transport::Transport;

/// Delay between the shutdown request and the start of teardown.
pub const SHUTDOWN_DEFER: Duration = Duration::from_millis(500);

/// Executive lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    /// Normal operation.
    Running = 0,
    /// A shutdown has been requested; teardown is scheduled.
    ShutdownRequested = 1,
    /// Teardown is underway or complete.
    Exiting = 2,
}

/// Runs the one-shot shutdown sequence: unload every engine in priority
/// order, then finalize the transport.
pub struct ShutdownSequencer {
    state: AtomicU8,
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn Transport>,
    done: CancellationToken,
}

impl ShutdownSequencer {
    pub fn new(registry: Arc<ServiceRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Running as u8),
            registry,
            transport,
            done: CancellationToken::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ShutdownState {
        match self.state.load(Ordering::Acquire) {
            0 => ShutdownState::Running,
            1 => ShutdownState::ShutdownRequested,
            _ => ShutdownState::Exiting,
        }
    }

    /// Token cancelled once teardown has finished.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Requests shutdown; safe to call from any task, any number of times.
    ///
    /// The first call schedules teardown after [`SHUTDOWN_DEFER`]; later
    /// calls are no-ops.
    pub fn request_shutdown(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(
                ShutdownState::Running as u8,
                ShutdownState::ShutdownRequested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        info!(defer_ms = SHUTDOWN_DEFER.as_millis() as u64, "shutdown requested");

        let sequencer = self.clone();
        tokio::spawn(async move {
            sleep(SHUTDOWN_DEFER).await;
            sequencer.begin_exit().await;
        });
    }

    async fn begin_exit(&self) {
        self.state
            .store(ShutdownState::Exiting as u8, Ordering::Release);

        // Engine exit hooks may block; keep them off the async workers.
        let registry = self.registry.clone();
        let unload = tokio::task::spawn_blocking(move || registry.unlink_all()).await;
        if unload.is_err() {
            warn!("engine unload task panicked during shutdown");
        }

        if let Err(error) = self.transport.finalize().await {
            warn!(%error, "transport finalize failed during shutdown");
        }

        info!("shutdown sequence complete");
        self.done.cancel();
    }
}
