//! Conclave Core - data model and boundary traits for the cluster executive.
//!
//! This crate defines:
//! - The service-engine descriptor and its lifecycle/sync hooks (`engine`)
//! - The routing-header wire codec shared by senders and receivers (`header`)
//! - The engine resolution boundary and an in-process resolver (`resolver`)
//! - The hierarchical object store used as an introspection mirror (`store`)
//! - The error taxonomy and named process exit reasons (`error`)
//!
//! The executive itself (registry, dispatcher, shutdown sequencing) lives in
//! `conclave-runtime`; this crate carries no orchestration.

pub mod engine;
pub mod error;
pub mod header;
pub mod resolver;
pub mod store;

// Re-exports
pub use engine::{
    ConfchgHook, EndianConvert, EngineFunction, ExecHandler, InitHook, MembershipChange,
    MembershipChangeKind, NodeId, RingId, ServiceEngine, ServiceEngineBuilder, SyncCallbacks,
    SyncProcessHook, VoidHook,
};
pub use error::{ExitReason, ResolveError, ServiceError, StoreError};
pub use header::{HEADER_LEN, RoutingHeader, pack_id};
pub use resolver::{EngineFactory, EngineResolver, PluginHandle, StaticResolver};
pub use store::{ObjectHandle, ObjectStore, ROOT, Value};
