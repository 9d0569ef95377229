//! Runtime error types.

use conclave_core::error::{ExitReason, ServiceError, StoreError};
use thiserror::Error;

/// Failure to assemble the executive configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The figment provider chain failed to extract a config.
    #[error("configuration could not be read: {0}")]
    Extract(#[from] Box<figment::Error>),
}

/// Failure on the group transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been finalized; no further traffic is accepted.
    #[error("transport already finalized")]
    Finalized,
    /// The delivery channel closed underneath the transport.
    #[error("delivery channel closed")]
    ChannelClosed,
}

/// Top-level executive failure.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A service engine failed to load or initialize.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The group transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RuntimeError {
    /// Maps the failure onto the process exit reason.
    pub fn exit_reason(&self) -> ExitReason {
        match self {
            RuntimeError::Config(_) => ExitReason::ConfigRead,
            RuntimeError::Service(ServiceError::Store(StoreError::NoSuchObject(_)))
            | RuntimeError::Service(ServiceError::Store(StoreError::CannotDestroyRoot)) => {
                ExitReason::StoreInit
            }
            RuntimeError::Service(_) => ExitReason::ServiceInit,
            RuntimeError::Transport(_) => ExitReason::PoolInit,
        }
    }
}

/// Convenience alias for executive results.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::error::ResolveError;

    #[test]
    fn exit_reasons_follow_the_failure_class() {
        let service = RuntimeError::Service(ServiceError::PluginLoad {
            name: "conclave_missing".into(),
            version: 0,
            source: ResolveError::UnknownComponent {
                name: "conclave_missing".into(),
                version: 0,
            },
        });
        assert_eq!(service.exit_reason(), ExitReason::ServiceInit);
        assert_eq!(service.exit_reason().code(), 3);

        let transport = RuntimeError::Transport(TransportError::Finalized);
        assert_eq!(transport.exit_reason(), ExitReason::PoolInit);
    }
}
