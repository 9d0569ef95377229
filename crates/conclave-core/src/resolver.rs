//! Engine component resolution.
//!
//! The registry loads engines through the [`EngineResolver`] boundary: a
//! name and version are resolved to an opaque [`PluginHandle`] plus a
//! descriptor, and the handle is released exactly once when the engine is
//! unloaded. [`StaticResolver`] is the in-process implementation: factories
//! are registered up front, keyed by `(name, version)`, and resolution
//! hands out tracked handles so outstanding references can be audited.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::engine::ServiceEngine;
use crate::error::ResolveError;

/// Opaque reference to a loaded engine implementation.
///
/// Exclusively owned by its registry entry; ownership transfers back to the
/// resolver on [`EngineResolver::release`] and the handle must not be used
/// afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(u64);

impl PluginHandle {
    /// Raw handle value, for mirroring into the object store.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Entry point of one engine component: produces its descriptor.
pub trait EngineFactory: Send + Sync {
    /// Returns a fresh descriptor for this engine.
    fn service_engine(&self) -> ServiceEngine;
}

impl<F> EngineFactory for F
where
    F: Fn() -> ServiceEngine + Send + Sync,
{
    fn service_engine(&self) -> ServiceEngine {
        self()
    }
}

/// Resolves a named, versioned engine component to an implementation.
pub trait EngineResolver: Send + Sync {
    /// Resolves `(name, version)` to a handle and a descriptor.
    fn resolve(
        &self,
        name: &str,
        version: u32,
    ) -> Result<(PluginHandle, ServiceEngine), ResolveError>;

    /// Releases a handle obtained from [`EngineResolver::resolve`].
    fn release(&self, handle: PluginHandle);
}

#[derive(Default)]
struct ResolverInner {
    factories: HashMap<(String, u32), Arc<dyn EngineFactory>>,
    live: HashMap<u64, (String, u32)>,
    next_handle: u64,
    released: u64,
}

/// In-process resolver over statically registered factories.
#[derive(Default)]
pub struct StaticResolver {
    inner: Mutex<ResolverInner>,
}

impl StaticResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `(name, version)`, replacing any previous
    /// registration for that key.
    pub fn register(&self, name: impl Into<String>, version: u32, factory: Arc<dyn EngineFactory>) {
        let mut inner = self.inner.lock();
        inner.factories.insert((name.into(), version), factory);
    }

    /// Number of handles resolved but not yet released.
    pub fn live_handles(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Total number of handles released so far.
    pub fn released_count(&self) -> u64 {
        self.inner.lock().released
    }
}

impl EngineResolver for StaticResolver {
    fn resolve(
        &self,
        name: &str,
        version: u32,
    ) -> Result<(PluginHandle, ServiceEngine), ResolveError> {
        let mut inner = self.inner.lock();
        let factory = inner
            .factories
            .get(&(name.to_string(), version))
            .cloned()
            .ok_or_else(|| ResolveError::UnknownComponent {
                name: name.to_string(),
                version,
            })?;
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.live.insert(handle, (name.to_string(), version));
        drop(inner);
        Ok((PluginHandle(handle), factory.service_engine()))
    }

    fn release(&self, handle: PluginHandle) {
        let mut inner = self.inner.lock();
        if inner.live.remove(&handle.0).is_none() {
            warn!(handle = handle.0, "release of unknown engine handle");
            return;
        }
        inner.released += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ServiceEngine;

    fn quorum_factory() -> Arc<dyn EngineFactory> {
        Arc::new(|| ServiceEngine::builder(3, "conclave_quorum").priority(1).build())
    }

    #[test]
    fn resolves_a_registered_component() {
        let resolver = StaticResolver::new();
        resolver.register("conclave_quorum", 0, quorum_factory());

        let (handle, engine) = resolver.resolve("conclave_quorum", 0).unwrap();
        assert_eq!(engine.id, 3);
        assert_eq!(resolver.live_handles(), 1);

        resolver.release(handle);
        assert_eq!(resolver.live_handles(), 0);
        assert_eq!(resolver.released_count(), 1);
    }

    #[test]
    fn version_is_part_of_the_key() {
        let resolver = StaticResolver::new();
        resolver.register("conclave_quorum", 1, quorum_factory());

        let err = resolver.resolve("conclave_quorum", 0).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownComponent {
                name: "conclave_quorum".into(),
                version: 0,
            }
        );
    }

    #[test]
    fn each_resolve_hands_out_a_distinct_handle() {
        let resolver = StaticResolver::new();
        resolver.register("conclave_quorum", 0, quorum_factory());

        let (first, _) = resolver.resolve("conclave_quorum", 0).unwrap();
        let (second, _) = resolver.resolve("conclave_quorum", 0).unwrap();
        assert_ne!(first, second);
        assert_eq!(resolver.live_handles(), 2);
    }

    #[test]
    fn double_release_is_ignored() {
        let resolver = StaticResolver::new();
        resolver.register("conclave_quorum", 0, quorum_factory());

        let (handle, _) = resolver.resolve("conclave_quorum", 0).unwrap();
        resolver.release(handle);
        resolver.release(handle);
        assert_eq!(resolver.released_count(), 1);
    }
}
