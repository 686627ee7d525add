//! Error types for the wire protocol.
//!
//! ## Error Cases
//! - `Io`: the socket failed or the peer went away mid-frame.
//! - `UnknownCommand`: a request started with a byte that names no command.
//! - `ShortFrame`: the stream ended before a fixed-length field was complete.
//! - `Exhausted`: the server reported that no free ID remains.
//! - `UnexpectedResponse`: a response byte did not match the protocol.
//! - `Timeout`: the peer stayed silent past a deadline.

use crate::Command;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for both ends of the wire protocol.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request started with a byte that is not a known command.
    #[error("invalid command byte {0:#04x}")]
    UnknownCommand(u8),

    /// The stream ended before a fixed-length field was complete.
    #[error("{command}: short frame, expected {expected} bytes but received {received}")]
    ShortFrame {
        command: Command,
        expected: usize,
        received: usize,
    },

    /// The server has no free ID left to hand out.
    #[error("id space is exhausted")]
    Exhausted,

    /// A response byte did not match what the protocol allows.
    #[error("{command}: unexpected response byte {byte:#04x}")]
    UnexpectedResponse { command: Command, byte: u8 },

    /// The peer did not send anything before the deadline.
    #[error("timed out waiting for peer")]
    Timeout,
}

impl Error {
    /// Whether this error means the framing of the stream can no longer be
    /// trusted.
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand(_) | Self::ShortFrame { .. } | Self::UnexpectedResponse { .. }
        )
    }
}
