//! Error taxonomy and named process exit reasons.

use thiserror::Error;

use crate::store::ObjectHandle;

/// Failure to resolve a named, versioned engine component.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No factory is registered under the requested name/version.
    #[error("no engine component registered for '{name}' version {version}")]
    UnknownComponent {
        /// Requested component name.
        name: String,
        /// Requested component version.
        version: u32,
    },
}

/// Errors from object-store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed object does not exist (or was destroyed).
    #[error("no such object: {0:?}")]
    NoSuchObject(ObjectHandle),

    /// The addressed key does not exist on the object.
    #[error("no such key '{key}' on {object:?}")]
    NoSuchKey {
        /// Object carrying the lookup.
        object: ObjectHandle,
        /// Missing key name.
        key: String,
    },

    /// The key exists but holds a different value type.
    #[error("key '{key}' on {object:?} has a different value type")]
    TypeMismatch {
        /// Object carrying the lookup.
        object: ObjectHandle,
        /// Offending key name.
        key: String,
    },

    /// The root object cannot be destroyed.
    #[error("the root object cannot be destroyed")]
    CannotDestroyRoot,
}

/// Errors from service registry operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The resolver could not produce an implementation for the requested
    /// name/version.
    #[error("engine '{name}' version {version} failed to load: {source}")]
    PluginLoad {
        /// Requested engine name.
        name: String,
        /// Requested engine version.
        version: u32,
        /// Underlying resolver failure.
        #[source]
        source: ResolveError,
    },

    /// The descriptor reports an id outside the registry slot table.
    #[error("engine '{name}' reports out-of-range id {id}")]
    InvalidId {
        /// Offending engine name.
        name: String,
        /// Out-of-range id.
        id: u16,
    },

    /// A loaded engine already occupies the descriptor's id slot.
    #[error("engine '{name}' reports id {id}, already occupied by '{occupant}'")]
    DuplicateId {
        /// Engine that failed to load.
        name: String,
        /// Contested slot id.
        id: u16,
        /// Engine currently holding the slot.
        occupant: String,
    },

    /// A `config_init` or `exec_init` hook returned failure; the load was
    /// unwound.
    #[error("engine '{name}' {hook} failed: {reason}")]
    Lifecycle {
        /// Engine whose hook failed.
        name: String,
        /// Which hook failed.
        hook: &'static str,
        /// Engine-reported reason.
        reason: String,
    },

    /// Unload requested for a name/version that is not loaded.
    #[error("engine '{name}' version {version} is not loaded")]
    NotFound {
        /// Requested engine name.
        name: String,
        /// Requested engine version.
        version: u32,
    },

    /// The introspection mirror rejected an update.
    #[error("object store mirror: {0}")]
    Store(#[from] StoreError),
}

/// Named process completion reasons.
///
/// Fatal startup errors and the shutdown sequencer report through this
/// enumeration rather than a bare success/failure flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Clean shutdown through the sequencer.
    Shutdown,
    /// Fatal configuration error at startup.
    ConfigRead,
    /// The object store could not be initialized.
    StoreInit,
    /// Default or configured engines could not be initialized.
    ServiceInit,
    /// Scratch/pool allocation failed at startup.
    PoolInit,
}

impl ExitReason {
    /// Process exit status code for this reason.
    pub fn code(self) -> i32 {
        match self {
            Self::Shutdown => 0,
            Self::ConfigRead => 1,
            Self::StoreInit => 2,
            Self::ServiceInit => 3,
            Self::PoolInit => 4,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Shutdown => "shutdown",
            Self::ConfigRead => "configuration read failure",
            Self::StoreInit => "object store initialization failure",
            Self::ServiceInit => "service engine initialization failure",
            Self::PoolInit => "pool initialization failure",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(ExitReason::Shutdown.code(), 0);
        assert_eq!(ExitReason::ConfigRead.code(), 1);
        assert_eq!(ExitReason::PoolInit.code(), 4);
    }

    #[test]
    fn service_error_messages_name_the_engine() {
        let err = ServiceError::NotFound {
            name: "conclave_quorum".into(),
            version: 0,
        };
        assert!(err.to_string().contains("conclave_quorum"));
    }
}
