//! Sync-subsystem enumeration over loaded engines.

use std::sync::Arc;

use conclave_core::engine::SyncCallbacks;

use crate::registry::ServiceRegistry;

/// Walks the loaded engines in ascending slot order for the recovery
/// barrier protocol.
///
/// The enumeration index counts occupied slots, skipping empty ones, so the
/// protocol sees a dense sequence even when service ids are sparse. The
/// order is stable for a fixed loaded set; engines loaded or unloaded
/// between calls shift later indices.
pub struct SyncEnumerator {
    registry: Arc<ServiceRegistry>,
}

impl SyncEnumerator {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Sync hooks of the `n`-th loaded engine, or `None` past the end.
    pub fn callbacks(&self, n: usize) -> Option<SyncCallbacks> {
        self.registry.nth_loaded(n)
    }
}
