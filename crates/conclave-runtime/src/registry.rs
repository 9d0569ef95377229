//! Service-engine registry.
//!
//! Owns the mapping from numeric service id to loaded engine: a bounded
//! slot table holding each engine's descriptor, its plugin handle, and the
//! object-store mirror handles. All mutation goes through registry methods;
//! there is no ambient global state. Steady-state operation is
//! single-threaded, so the internal mutex is uncontended except for the
//! one documented shutdown race, where the teardown task calls
//! [`ServiceRegistry::unlink_all`] from its own thread.
//!
//! Lifecycle hooks run with the registry lock held and must not call back
//! into the registry.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use conclave_core::engine::{
    ConfchgHook, EndianConvert, ExecHandler, MembershipChange, RingId, ServiceEngine,
    SyncCallbacks, VoidHook,
};
use conclave_core::error::ServiceError;
use conclave_core::resolver::{EngineResolver, PluginHandle};
use conclave_core::store::{ObjectHandle, ObjectStore, ROOT, Value};

/// Upper bound on simultaneously loaded engines; descriptor ids must be
/// below this.
pub const SERVICE_SLOT_MAX: usize = 64;

/// Built-in engines linked at bootstrap when default services are enabled.
const DEFAULT_ENGINES: [(&str, u32); 6] = [
    ("conclave_evs", 0),
    ("conclave_cfg", 0),
    ("conclave_cpg", 0),
    ("conclave_confdb", 0),
    ("conclave_pload", 0),
    ("conclave_quorum", 0),
];

/// Short name used for the statistics namespace: the last `_`-delimited
/// segment of the component name (`conclave_quorum` -> `quorum`).
fn short_name(name: &str) -> &str {
    name.rsplit_once('_').map_or(name, |(_, suffix)| suffix)
}

/// One occupied registry slot.
struct LoadedEngine {
    engine: ServiceEngine,
    version: u32,
    plugin: PluginHandle,
    /// `internal_configuration/service` mirror record.
    svc_obj: ObjectHandle,
    /// `runtime/services/<short>` statistics record.
    stats_obj: ObjectHandle,
    /// Per-function counter records, indexed like the function table.
    fn_stats: Vec<ObjectHandle>,
}

struct RegistryInner {
    slots: Vec<Option<LoadedEngine>>,
    internal_config: ObjectHandle,
    stats_services: ObjectHandle,
    ring_id: RingId,
}

/// Resolution outcome for one inbound routing header.
pub(crate) enum Route {
    /// No engine loaded at the service id; the message is dropped.
    Unloaded,
    /// Engine loaded but the function id is past its table.
    NoSuchFunction {
        engine: String,
        table_len: usize,
    },
    /// Resolved function-table entry.
    Function {
        handler: ExecHandler,
        endian_convert: Option<EndianConvert>,
    },
}

/// Registry of loaded service engines.
pub struct ServiceRegistry {
    resolver: Arc<dyn EngineResolver>,
    store: Arc<ObjectStore>,
    inner: Mutex<RegistryInner>,
}

impl ServiceRegistry {
    /// Creates an empty registry, establishing the `internal_configuration`
    /// and `runtime/services` mirror roots in the store.
    pub fn new(
        resolver: Arc<dyn EngineResolver>,
        store: Arc<ObjectStore>,
    ) -> Result<Self, ServiceError> {
        let internal_config = store.create(ROOT, "internal_configuration")?;
        let runtime = match store.first(ROOT, "runtime") {
            Some(handle) => handle,
            None => store.create(ROOT, "runtime")?,
        };
        let stats_services = store.create(runtime, "services")?;

        let mut slots = Vec::with_capacity(SERVICE_SLOT_MAX);
        slots.resize_with(SERVICE_SLOT_MAX, || None);

        Ok(Self {
            resolver,
            store,
            inner: Mutex::new(RegistryInner {
                slots,
                internal_config,
                stats_services,
                ring_id: RingId::default(),
            }),
        })
    }

    /// Resolves `(name, version)` and loads the engine it produces.
    ///
    /// `config_init` and `exec_init` run in that order; if either fails the
    /// load is unwound (handle released, slot never published) and
    /// [`ServiceError::Lifecycle`] is returned. A descriptor whose id slot
    /// is already occupied fails with [`ServiceError::DuplicateId`],
    /// leaving the incumbent untouched.
    pub fn link(&self, name: &str, version: u32) -> Result<u16, ServiceError> {
        let (plugin, engine) = self.resolver.resolve(name, version).map_err(|source| {
            error!(engine = name, version, "service engine failed to load");
            ServiceError::PluginLoad {
                name: name.to_string(),
                version,
                source,
            }
        })?;

        let id = engine.id;
        let mut inner = self.inner.lock();

        if usize::from(id) >= SERVICE_SLOT_MAX {
            self.resolver.release(plugin);
            return Err(ServiceError::InvalidId {
                name: engine.name,
                id,
            });
        }
        if let Some(occupant) = &inner.slots[usize::from(id)] {
            self.resolver.release(plugin);
            return Err(ServiceError::DuplicateId {
                name: engine.name,
                id,
                occupant: occupant.engine.name.clone(),
            });
        }

        for (hook_name, hook) in [
            ("config_init", &engine.config_init),
            ("exec_init", &engine.exec_init),
        ] {
            let Some(hook) = hook else { continue };
            if let Err(reason) = hook() {
                error!(
                    engine = %engine.name,
                    hook = hook_name,
                    %reason,
                    "lifecycle hook failed, unwinding load"
                );
                self.resolver.release(plugin);
                return Err(ServiceError::Lifecycle {
                    name: engine.name.clone(),
                    hook: hook_name,
                    reason,
                });
            }
        }

        // Mirror identity and zeroed per-function counters for external
        // inspection. The registry entry stays authoritative.
        let svc_obj = self.store.create(inner.internal_config, "service")?;
        self.store
            .key_set(svc_obj, "name", Value::Str(name.to_string()))?;
        self.store.key_set(svc_obj, "ver", Value::U32(version))?;
        self.store
            .key_set(svc_obj, "handle", Value::U64(plugin.raw()))?;
        self.store.key_set(svc_obj, "service_id", Value::U16(id))?;

        let stats_obj = self.store.create(inner.stats_services, short_name(name))?;
        self.store
            .key_set(stats_obj, "service_id", Value::U16(id))?;

        let mut fn_stats = Vec::with_capacity(engine.functions.len());
        for fn_idx in 0..engine.functions.len() {
            let obj = self.store.create(stats_obj, &fn_idx.to_string())?;
            self.store.key_set(obj, "tx", Value::U64(0))?;
            self.store.key_set(obj, "rx", Value::U64(0))?;
            fn_stats.push(obj);
        }

        info!(engine = %engine.name, id, "service engine initialized");

        inner.slots[usize::from(id)] = Some(LoadedEngine {
            engine,
            version,
            plugin,
            svc_obj,
            stats_obj,
            fn_stats,
        });
        Ok(id)
    }

    /// Unloads every engine whose priority is at or above `threshold`,
    /// visiting priority tiers in descending order and slots in ascending
    /// id order within a tier.
    pub fn unlink_priority(&self, threshold: u32) {
        if threshold == 0 {
            info!("unloading all service engines");
        } else {
            info!(threshold, "unloading service engines at or above priority");
        }

        let mut inner = self.inner.lock();
        let Some(max) = inner.slots.iter().flatten().map(|e| e.engine.priority).max() else {
            return;
        };
        if max < threshold {
            return;
        }

        for tier in (threshold..=max).rev() {
            for id in 0..SERVICE_SLOT_MAX {
                let Some(entry) = &inner.slots[id] else {
                    continue;
                };
                if entry.engine.priority != tier {
                    continue;
                }
                info!(
                    engine = %entry.engine.name,
                    version = entry.version,
                    "unloading service engine"
                );
                // exec_exit runs before the slot is cleared and before the
                // plugin handle is released.
                if let Some(exit) = &entry.engine.exec_exit {
                    exit();
                }
                let Some(entry) = inner.slots[id].take() else {
                    continue;
                };
                self.resolver.release(entry.plugin);
                if let Err(err) = self.store.destroy(entry.svc_obj) {
                    debug!(%err, "service mirror record already gone");
                }
                if let Err(err) = self.store.destroy(entry.stats_obj) {
                    debug!(%err, "service stats record already gone");
                }
            }
        }
    }

    /// Unloads every engine. Priorities are non-negative, so this is
    /// `unlink_priority(0)`.
    pub fn unlink_all(&self) {
        self.unlink_priority(0);
    }

    /// Unloads the named engine's whole priority tier and every tier above
    /// it. This is the coarse reconfiguration protocol, not a
    /// single-engine removal.
    ///
    /// The statistics-namespace record for the short name is destroyed
    /// first, whether or not the engine itself is found.
    pub fn unlink_and_exit(&self, name: &str, version: u32) -> Result<(), ServiceError> {
        {
            let inner = self.inner.lock();
            if let Some(obj) = self.store.first(inner.stats_services, short_name(name)) {
                let _ = self.store.destroy(obj);
            }
        }

        let priority = {
            let inner = self.inner.lock();
            inner
                .slots
                .iter()
                .flatten()
                .find(|e| e.engine.name == name && e.version == version)
                .map(|e| e.engine.priority)
        };

        match priority {
            Some(priority) => {
                self.unlink_priority(priority);
                Ok(())
            }
            None => Err(ServiceError::NotFound {
                name: name.to_string(),
                version,
            }),
        }
    }

    /// Bootstraps the engine set: links every persisted `service` record
    /// found at the store root, then the built-in defaults unless the
    /// `system/defaultservices` key holds `"no"`.
    ///
    /// Individual link failures are logged and skipped so a partially
    /// broken engine list does not take down startup.
    pub fn defaults_link_and_init(&self) {
        for obj in self.store.find(ROOT, "service") {
            let Some(name) = self
                .store
                .key_get(obj, "name")
                .and_then(|v| v.as_str().map(str::to_string))
            else {
                warn!("persisted service record without a name, skipping");
                continue;
            };
            let version = self
                .store
                .key_get(obj, "ver")
                .and_then(|v| v.as_u32())
                .unwrap_or(0);
            if let Err(err) = self.link(&name, version) {
                error!(engine = %name, version, %err, "failed to link configured service engine");
            }
        }

        if !self.default_services_requested() {
            debug!("default services disabled by configuration");
            return;
        }

        for (name, version) in DEFAULT_ENGINES {
            if let Err(err) = self.link(name, version) {
                error!(engine = name, version, %err, "failed to link default service engine");
            }
        }
    }

    /// Whether default services should be linked. Absence of the
    /// `system/defaultservices` key means enabled; only the literal value
    /// `"no"` disables.
    fn default_services_requested(&self) -> bool {
        let Some(system) = self.store.first(ROOT, "system") else {
            return true;
        };
        match self.store.key_get(system, "defaultservices") {
            Some(value) => value.as_str() != Some("no"),
            None => true,
        }
    }

    /// Fans a membership change out to every loaded engine's `confchg`
    /// hook, ascending id order, and records the new ring id.
    pub fn confchg(&self, change: &MembershipChange) {
        let hooks: Vec<ConfchgHook> = {
            let mut inner = self.inner.lock();
            inner.ring_id = change.ring_id;
            inner
                .slots
                .iter()
                .flatten()
                .filter_map(|e| e.engine.confchg.clone())
                .collect()
        };
        for hook in hooks {
            hook(change);
        }
    }

    /// The most recently observed ring id.
    pub fn ring_id(&self) -> RingId {
        self.inner.lock().ring_id
    }

    /// Triggers every loaded engine's diagnostic dump hook.
    pub fn dump(&self) {
        let hooks: Vec<VoidHook> = {
            let inner = self.inner.lock();
            inner
                .slots
                .iter()
                .flatten()
                .filter_map(|e| e.engine.exec_dump.clone())
                .collect()
        };
        debug!(engines = hooks.len(), "dumping service engine state");
        for hook in hooks {
            hook();
        }
    }

    /// Sync hooks of the `n`-th occupied slot in ascending id order, or
    /// `None` once `n` walks past the loaded set.
    pub fn nth_loaded(&self, n: usize) -> Option<SyncCallbacks> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .nth(n)
            .map(|e| e.engine.sync_callbacks())
    }

    /// Ids of all loaded engines, ascending.
    pub fn loaded_ids(&self) -> Vec<u16> {
        let inner = self.inner.lock();
        (0..SERVICE_SLOT_MAX as u16)
            .filter(|id| inner.slots[usize::from(*id)].is_some())
            .collect()
    }

    /// Whether an engine occupies `service_id`.
    pub fn is_loaded(&self, service_id: u16) -> bool {
        usize::from(service_id) < SERVICE_SLOT_MAX
            && self.inner.lock().slots[usize::from(service_id)].is_some()
    }

    pub(crate) fn route(&self, service_id: u16, function_id: u16) -> Route {
        if usize::from(service_id) >= SERVICE_SLOT_MAX {
            return Route::Unloaded;
        }
        let inner = self.inner.lock();
        let Some(entry) = &inner.slots[usize::from(service_id)] else {
            return Route::Unloaded;
        };
        match entry.engine.functions.get(usize::from(function_id)) {
            Some(function) => Route::Function {
                handler: function.handler.clone(),
                endian_convert: function.endian_convert.clone(),
            },
            None => Route::NoSuchFunction {
                engine: entry.engine.name.clone(),
                table_len: entry.engine.functions.len(),
            },
        }
    }

    /// Bumps the received-message counter for one function.
    pub(crate) fn bump_rx(&self, service_id: u16, function_id: u16) {
        self.bump_counter(service_id, function_id, "rx");
    }

    /// Bumps the transmitted-message counter for one function.
    pub(crate) fn bump_tx(&self, service_id: u16, function_id: u16) {
        self.bump_counter(service_id, function_id, "tx");
    }

    fn bump_counter(&self, service_id: u16, function_id: u16, key: &str) {
        if usize::from(service_id) >= SERVICE_SLOT_MAX {
            return;
        }
        let obj = {
            let inner = self.inner.lock();
            inner.slots[usize::from(service_id)]
                .as_ref()
                .and_then(|e| e.fn_stats.get(usize::from(function_id)).copied())
        };
        if let Some(obj) = obj
            && let Err(err) = self.store.key_inc_u64(obj, key)
        {
            debug!(%err, key, "stats counter update failed");
        }
    }

    /// Mirror-counter value, for inspection and tests.
    pub fn counter(&self, service_id: u16, function_id: u16, key: &str) -> Option<u64> {
        if usize::from(service_id) >= SERVICE_SLOT_MAX {
            return None;
        }
        let obj = {
            let inner = self.inner.lock();
            inner.slots[usize::from(service_id)]
                .as_ref()
                .and_then(|e| e.fn_stats.get(usize::from(function_id)).copied())
        }?;
        self.store.key_get(obj, key).and_then(|v| v.as_u64())
    }
}
