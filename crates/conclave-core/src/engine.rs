//! Service-engine descriptors and the hooks they expose.
//!
//! A service engine is a pluggable component providing one piece of cluster
//! functionality (quorum, group messaging, ...). Its descriptor is pure
//! data: the identity the registry indexes by, a priority controlling
//! teardown order, an ordered table of dispatchable functions, and a set
//! of optional lifecycle hooks. Hooks are reference-counted so read-only
//! consumers (the sync enumerator, the dispatcher) can hold clones without
//! pinning the whole descriptor.

use std::fmt;
use std::sync::Arc;

use crate::header::RoutingHeader;

/// Identity of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the current membership ring epoch.
///
/// Opaque to the executive: it is stored only so the most recent value can
/// be handed through to engines on reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingId {
    /// Representative node of the ring.
    pub representative: NodeId,
    /// Monotonic ring sequence number.
    pub seq: u64,
}

/// Kind of membership change delivered to engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChangeKind {
    /// A regular (stable) configuration.
    Regular,
    /// A transitional configuration during ring formation.
    Transitional,
}

/// A membership/ring reconfiguration notification fanned out to every
/// loaded engine's `confchg` hook.
#[derive(Debug, Clone)]
pub struct MembershipChange {
    /// Regular or transitional configuration.
    pub kind: MembershipChangeKind,
    /// Current members of the ring.
    pub members: Vec<NodeId>,
    /// Nodes that left since the previous configuration.
    pub left: Vec<NodeId>,
    /// Nodes that joined since the previous configuration.
    pub joined: Vec<NodeId>,
    /// Epoch identity of the new ring.
    pub ring_id: RingId,
}

/// Handler invoked for one routed message: decoded header, the full
/// message bytes (header included), and the sending node.
pub type ExecHandler = Arc<dyn Fn(&RoutingHeader, &[u8], NodeId) + Send + Sync>;

/// In-place normalization of a foreign-order message. Runs after the
/// routing header itself has been swapped, before the handler.
pub type EndianConvert = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

/// Fallible lifecycle hook (`config_init`, `exec_init`).
pub type InitHook = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Infallible lifecycle hook (`exec_exit`, `exec_dump`, most sync hooks).
pub type VoidHook = Arc<dyn Fn() + Send + Sync>;

/// Membership-change hook.
pub type ConfchgHook = Arc<dyn Fn(&MembershipChange) + Send + Sync>;

/// Sync-round progress hook; returns `true` while the engine has more
/// synchronization work to do.
pub type SyncProcessHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// One dispatchable entry in an engine's function table.
#[derive(Clone)]
pub struct EngineFunction {
    /// Mandatory message handler.
    pub handler: ExecHandler,
    /// Optional endian-conversion function; required for any function that
    /// receives cross-endian traffic.
    pub endian_convert: Option<EndianConvert>,
}

/// Sync hooks of one loaded engine, as handed to the external membership
/// synchronization driver during ring reconfiguration.
#[derive(Clone, Default)]
pub struct SyncCallbacks {
    /// Engine name, for diagnostics.
    pub name: String,
    /// Called when a sync round starts.
    pub sync_init: Option<VoidHook>,
    /// Called repeatedly while the engine reports outstanding work.
    pub sync_process: Option<SyncProcessHook>,
    /// Called when the round's state becomes authoritative.
    pub sync_activate: Option<VoidHook>,
    /// Called when the round is abandoned.
    pub sync_abort: Option<VoidHook>,
}

impl fmt::Debug for SyncCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCallbacks")
            .field("name", &self.name)
            .field("sync_init", &self.sync_init.is_some())
            .field("sync_process", &self.sync_process.is_some())
            .field("sync_activate", &self.sync_activate.is_some())
            .field("sync_abort", &self.sync_abort.is_some())
            .finish()
    }
}

/// A service engine descriptor.
///
/// Produced by an [`EngineFactory`](crate::resolver::EngineFactory) and
/// owned exclusively by the registry once loaded. The `id` determines the
/// registry slot and forms the high half of every routing header addressed
/// to this engine.
#[derive(Clone)]
pub struct ServiceEngine {
    /// Registry slot and routing identity, unique among loaded engines.
    pub id: u16,
    /// Component name, also the resolver key together with the version.
    pub name: String,
    /// Teardown ordering key; higher values unload first.
    pub priority: u32,
    /// Ordered table of dispatchable functions.
    pub functions: Vec<EngineFunction>,
    /// Configuration-phase initialization, called before `exec_init`.
    pub config_init: Option<InitHook>,
    /// Executive initialization, called at most once per load.
    pub exec_init: Option<InitHook>,
    /// Executive teardown, called at most once per unload.
    pub exec_exit: Option<VoidHook>,
    /// Diagnostic dump trigger.
    pub exec_dump: Option<VoidHook>,
    /// Membership/ring-change notification.
    pub confchg: Option<ConfchgHook>,
    /// Sync-round start hook.
    pub sync_init: Option<VoidHook>,
    /// Sync-round progress hook.
    pub sync_process: Option<SyncProcessHook>,
    /// Sync-round activation hook.
    pub sync_activate: Option<VoidHook>,
    /// Sync-round abort hook.
    pub sync_abort: Option<VoidHook>,
}

impl ServiceEngine {
    /// Starts building a descriptor with the given identity.
    pub fn builder(id: u16, name: impl Into<String>) -> ServiceEngineBuilder {
        ServiceEngineBuilder::new(id, name)
    }

    /// Clones out the sync hooks for the enumeration contract.
    pub fn sync_callbacks(&self) -> SyncCallbacks {
        SyncCallbacks {
            name: self.name.clone(),
            sync_init: self.sync_init.clone(),
            sync_process: self.sync_process.clone(),
            sync_activate: self.sync_activate.clone(),
            sync_abort: self.sync_abort.clone(),
        }
    }
}

impl fmt::Debug for ServiceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEngine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("functions", &self.functions.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServiceEngine`] descriptors.
pub struct ServiceEngineBuilder {
    engine: ServiceEngine,
}

impl ServiceEngineBuilder {
    fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            engine: ServiceEngine {
                id,
                name: name.into(),
                priority: 0,
                functions: Vec::new(),
                config_init: None,
                exec_init: None,
                exec_exit: None,
                exec_dump: None,
                confchg: None,
                sync_init: None,
                sync_process: None,
                sync_activate: None,
                sync_abort: None,
            },
        }
    }

    /// Sets the teardown priority (higher unloads first).
    pub fn priority(mut self, priority: u32) -> Self {
        self.engine.priority = priority;
        self
    }

    /// Appends a function-table entry without an endian converter.
    pub fn function<H>(mut self, handler: H) -> Self
    where
        H: Fn(&RoutingHeader, &[u8], NodeId) + Send + Sync + 'static,
    {
        self.engine.functions.push(EngineFunction {
            handler: Arc::new(handler),
            endian_convert: None,
        });
        self
    }

    /// Appends a function-table entry with an endian converter.
    pub fn function_with_converter<H, C>(mut self, handler: H, convert: C) -> Self
    where
        H: Fn(&RoutingHeader, &[u8], NodeId) + Send + Sync + 'static,
        C: Fn(&mut [u8]) + Send + Sync + 'static,
    {
        self.engine.functions.push(EngineFunction {
            handler: Arc::new(handler),
            endian_convert: Some(Arc::new(convert)),
        });
        self
    }

    /// Sets the `config_init` hook.
    pub fn config_init<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.engine.config_init = Some(Arc::new(hook));
        self
    }

    /// Sets the `exec_init` hook.
    pub fn exec_init<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.engine.exec_init = Some(Arc::new(hook));
        self
    }

    /// Sets the `exec_exit` hook.
    pub fn exec_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.exec_exit = Some(Arc::new(hook));
        self
    }

    /// Sets the `exec_dump` hook.
    pub fn exec_dump<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.exec_dump = Some(Arc::new(hook));
        self
    }

    /// Sets the membership-change hook.
    pub fn confchg<F>(mut self, hook: F) -> Self
    where
        F: Fn(&MembershipChange) + Send + Sync + 'static,
    {
        self.engine.confchg = Some(Arc::new(hook));
        self
    }

    /// Sets the `sync_init` hook.
    pub fn sync_init<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.sync_init = Some(Arc::new(hook));
        self
    }

    /// Sets the `sync_process` hook.
    pub fn sync_process<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.engine.sync_process = Some(Arc::new(hook));
        self
    }

    /// Sets the `sync_activate` hook.
    pub fn sync_activate<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.sync_activate = Some(Arc::new(hook));
        self
    }

    /// Sets the `sync_abort` hook.
    pub fn sync_abort<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.sync_abort = Some(Arc::new(hook));
        self
    }

    /// Finishes the descriptor.
    pub fn build(self) -> ServiceEngine {
        self.engine
    }
}
