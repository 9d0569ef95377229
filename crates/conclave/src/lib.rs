//! # Conclave
//!
//! A service-engine registry and message dispatch core for cluster nodes.
//!
//! ## Overview
//!
//! Conclave hosts pluggable service engines inside one node executive.
//! Each engine claims a numeric service id and a table of message
//! functions; the dispatcher routes every multicast the node receives to
//! exactly one function of exactly one engine, or drops it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐    ┌────────────┐    ┌───────────────────────────────┐
//! │ Transport │───▶│ Dispatcher │───▶│ ServiceRegistry (slot table)  │
//! │  (group)  │    │ (coalesce, │    │   engine id 0: evs            │
//! └───────────┘    │  swab)     │    │   engine id 2: cpg            │
//!                  └────────────┘    │   engine id n: ...            │
//!                                    └───────────────────────────────┘
//! ```
//!
//! - **Executive**: wires config, registry, transport, and shutdown
//! - **ServiceRegistry**: load/unload engines by name and version
//! - **Dispatcher**: routing header decode, fragment coalescing, byte-order
//!   correction
//! - **ShutdownSequencer**: deferred, one-shot teardown in priority order
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conclave::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = Arc::new(StaticResolver::new());
//!     resolver.register("conclave_echo", 0, Arc::new(|| {
//!         ServiceEngine::builder(8, "conclave_echo")
//!             .function(|header, msg, nodeid| {
//!                 tracing::info!(%nodeid, len = msg.len(), "echo");
//!             })
//!             .build()
//!     }));
//!
//!     let executive = Executive::new(ExecConfig::load()?, resolver)?;
//!     let reason = executive.run().await?;
//!     std::process::exit(reason.code());
//! }
//! ```

pub use conclave_core as core;
pub use conclave_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Executive - main entry point
    pub use conclave_runtime::{ExecConfig, Executive, Guarantee, ShutdownState};

    // Engine descriptors and resolution
    pub use conclave_core::engine::{
        MembershipChange, MembershipChangeKind, NodeId, RingId, ServiceEngine,
        ServiceEngineBuilder, SyncCallbacks,
    };
    pub use conclave_core::resolver::{EngineFactory, EngineResolver, StaticResolver};

    // Wire format
    pub use conclave_core::header::{HEADER_LEN, RoutingHeader, pack_id};

    // Errors and exit reasons
    pub use conclave_core::error::{ExitReason, ServiceError};
    pub use conclave_runtime::{RuntimeError, RuntimeResult};

    // Registry and sync enumeration
    pub use conclave_runtime::{ServiceRegistry, SyncEnumerator};
}
