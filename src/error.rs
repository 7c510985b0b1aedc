use std::path::PathBuf;

/// Errors that can occur when loading or driving the EyeLogic client API.
///
/// Per-call outcomes of `connect`, `request_tracking` and `calibrate` are
/// *not* errors; they are returned as [`crate::ConnectResult`] and friends.
/// Only conditions outside the documented protocol end up here.
#[derive(Debug, thiserror::Error)]
pub enum EyeLogicError {
    #[error("EyeLogic native library not found at {}", path.display())]
    LibraryNotFound { path: PathBuf },

    #[error("Failed to load EyeLogic native library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    #[error("Native library is missing symbol `{0}`")]
    MissingSymbol(&'static str),

    #[error("Client name contains an interior NUL byte")]
    InvalidClientName,

    #[error("Client is already initialized")]
    AlreadyInitialized,

    #[error("Another EyeLogic session is already active in this process")]
    SessionAlreadyActive,

    #[error("Native init failed with code {0}")]
    InitFailed(i32),

    #[error("Protocol violation: {operation} returned undefined code {code}")]
    ProtocolViolation { operation: &'static str, code: i32 },

    #[error("Timeout waiting for event")]
    Timeout,

    #[error("Event stream stopped")]
    StreamStopped,

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}
