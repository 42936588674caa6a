//! Bridge error taxonomy: ordering errors, lookup errors, marshalling errors and host faults.

/// Failure reported by the host runtime seam.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("thread attach failed: {0}")]
    AttachFailed(String),
    #[error("invocation failed: {0}")]
    Invocation(String),
}

/// Error returned by bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("no event handlers registered")]
    Unregistered,
    #[error("event handlers already registered")]
    AlreadyRegistered,
    #[error("host runtime not initialized")]
    Uninitialized,
    #[error("host runtime already initialized")]
    AlreadyInitialized,
    #[error("network not started")]
    NotStarted,
    #[error("network already started")]
    AlreadyStarted,
    #[error("lookup failed for {target}: {source}")]
    LookupFailed {
        target: String,
        #[source]
        source: HostError,
    },
    #[error("invalid rpc req/resp flag: {0}")]
    InvalidRpcKind(i32),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

impl BridgeError {
    /// Lifecycle ordering violations. These are programming errors, never transient.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            BridgeError::Uninitialized
                | BridgeError::AlreadyInitialized
                | BridgeError::NotStarted
                | BridgeError::AlreadyStarted
        )
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
