//! Conclave Runtime - the cluster node executive.
//!
//! This crate provides:
//! - The service engine registry (`ServiceRegistry`)
//! - Inbound message dispatch (`Dispatcher`)
//! - The group transport seam (`Transport`, `LoopbackTransport`)
//! - Deferred shutdown sequencing (`ShutdownSequencer`)
//! - Sync-subsystem enumeration (`SyncEnumerator`)
//! - Configuration and logging setup
//!
//! ```ignore
//! use std::sync::Arc;
//! use conclave_runtime::{ExecConfig, Executive};
//! use conclave_core::resolver::StaticResolver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = Arc::new(StaticResolver::new());
//!     // resolver.register(...) engine factories here.
//!
//!     let executive = Executive::new(ExecConfig::load()?, resolver)?;
//!     let reason = executive.run().await?;
//!     std::process::exit(reason.code());
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod shutdown;
pub mod sync;
pub mod transport;

pub use config::{EngineRef, ExecConfig, LogFormat, LoggingConfig};
pub use dispatch::{Dispatcher, MESSAGE_SIZE_MAX};
pub use error::{ConfigError, RuntimeError, RuntimeResult, TransportError};
pub use registry::{SERVICE_SLOT_MAX, ServiceRegistry};
pub use runtime::Executive;
pub use shutdown::{SHUTDOWN_DEFER, ShutdownSequencer, ShutdownState};
pub use sync::SyncEnumerator;
pub use transport::{Delivery, GroupId, Guarantee, LoopbackTransport, Transport};
