use thiserror::Error;
use tokio::task::JoinError;

/// Why a single client connection was closed abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Framing violation, idle timeout or socket failure.
    #[error(transparent)]
    Wire(#[from] slotid_wire::Error),

    /// The allocator rejected a command that has no status byte to report
    /// it with, or its store failed.
    #[error(transparent)]
    Allocator(#[from] slotid::Error),

    #[error("allocator task failed: {0}")]
    Task(#[from] JoinError),
}

impl ConnectionError {
    /// Violations are the peer's fault and logged at `warn`; everything else
    /// is ours.
    pub const fn is_protocol_violation(&self) -> bool {
        match self {
            Self::Wire(err) => err.is_protocol_violation(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("server is not paused")]
    NotPaused,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Allocator(#[from] slotid::Error),

    #[error("allocator task failed: {0}")]
    Task(#[from] JoinError),
}
