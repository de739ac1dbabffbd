//! Error types for the session controller

use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a tunnel session
#[derive(Debug, Error)]
pub enum Error {
    /// The user or platform declined the tunnel permission
    #[error("tunnel permission denied")]
    PermissionDenied,

    /// A permission request is already in flight
    #[error("a permission request is already pending")]
    RequestAlreadyPending,

    /// The platform failed to create the tunnel device
    #[error("tunnel device establish failed: {0}")]
    DeviceEstablishFailed(String),

    /// The device descriptor did not become ready within the wait budget
    #[error("timed out waiting for tunnel descriptor")]
    DescriptorTimeout,

    /// No packet-processing engine is attached to the session
    #[error("no engine available")]
    EngineUnavailable,

    /// The engine rejected the session configuration
    #[error("engine refused to start the session")]
    EngineConnectFailed,

    /// The engine accepted the session but failed to take over the descriptor
    #[error("engine activation failed: {0}")]
    EngineActivationFailed(String),

    /// A call into the engine adapter failed at the boundary
    #[error("engine adapter call failed: {0}")]
    AdapterCall(String),

    /// Device-layer error
    #[error("tunnel device error: {0}")]
    Tun(#[from] tunlink_tun::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the session should report a plain refusal rather than a fault
    ///
    /// Refusals (denied permission, a second request while one is pending)
    /// leave the session where it was; faults run the failure path.
    pub fn is_refusal(&self) -> bool {
        matches!(self, Error::PermissionDenied | Error::RequestAlreadyPending)
    }
}
