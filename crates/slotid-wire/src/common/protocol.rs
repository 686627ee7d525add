//! # Wire format
//!
//! A request is one command byte followed by a fixed-length argument. All
//! multi-byte integers are 8-byte little-endian.
//!
//! | Byte   | Command            | Argument  | Response                          |
//! |--------|--------------------|-----------|-----------------------------------|
//! | `0x00` | `Generate`         | -         | `0x00` + 8-byte ID, or `0x01`     |
//! | `0x01` | `Allocate`         | 8-byte ID | -                                 |
//! | `0x02` | `Free`             | 8-byte ID | -                                 |
//! | `0x03` | `FreeAll`          | -         | -                                 |
//! | `0x04` | `IsAllocated`      | 8-byte ID | 1 byte, `1` or `0`                |
//! | `0x05` | `AllocatedIdCount` | -         | 8-byte count                      |
//! | `0x06` | `Ping`             | -         | 1 byte, [`PONG`]                  |
//! | `0x08` | `Disconnect`       | -         | connection closed                 |
//!
//! `0x07` is reserved for the pong reply and is not a valid request. There is
//! no resynchronization: a malformed frame ends the connection.

use crate::{Error, Result};
use core::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size in bytes of an encoded ID or count.
pub const ID_SIZE: usize = core::mem::size_of::<u64>();

/// Reply byte for [`Command::Ping`].
pub const PONG: u8 = 0x07;

/// A request's leading byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Generate = 0x00,
    Allocate = 0x01,
    Free = 0x02,
    FreeAll = 0x03,
    IsAllocated = 0x04,
    AllocatedIdCount = 0x05,
    Ping = 0x06,
    Disconnect = 0x08,
}

impl Command {
    /// Length of the argument that follows the command byte.
    pub const fn argument_len(self) -> usize {
        match self {
            Self::Allocate | Self::Free | Self::IsAllocated => ID_SIZE,
            _ => 0,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Allocate => "allocate",
            Self::Free => "free",
            Self::FreeAll => "freeAll",
            Self::IsAllocated => "isAllocated",
            Self::AllocatedIdCount => "allocatedIDCount",
            Self::Ping => "ping",
            Self::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x00 => Self::Generate,
            0x01 => Self::Allocate,
            0x02 => Self::Free,
            0x03 => Self::FreeAll,
            0x04 => Self::IsAllocated,
            0x05 => Self::AllocatedIdCount,
            0x06 => Self::Ping,
            0x08 => Self::Disconnect,
            other => return Err(Error::UnknownCommand(other)),
        })
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command as Self
    }
}

/// Leading byte of a [`Command::Generate`] response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GenerateStatus {
    Ok = 0x00,
    Exhausted = 0x01,
}

/// A fully decoded request frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Generate,
    Allocate { id: u64 },
    Free { id: u64 },
    FreeAll,
    IsAllocated { id: u64 },
    AllocatedIdCount,
    Ping,
    Disconnect,
}

impl Request {
    pub const fn command(&self) -> Command {
        match self {
            Self::Generate => Command::Generate,
            Self::Allocate { .. } => Command::Allocate,
            Self::Free { .. } => Command::Free,
            Self::FreeAll => Command::FreeAll,
            Self::IsAllocated { .. } => Command::IsAllocated,
            Self::AllocatedIdCount => Command::AllocatedIdCount,
            Self::Ping => Command::Ping,
            Self::Disconnect => Command::Disconnect,
        }
    }

    /// Encodes the request as one frame.
    pub fn encode(&self) -> Vec<u8> {
        let command = self.command();
        let mut frame = Vec::with_capacity(1 + command.argument_len());
        frame.push(u8::from(command));
        if let Self::Allocate { id } | Self::Free { id } | Self::IsAllocated { id } = self {
            frame.extend_from_slice(&id.to_le_bytes());
        }
        frame
    }
}

/// A response frame written by the server.
///
/// Commands that have no reply (`Allocate`, `Free`, `FreeAll`,
/// `Disconnect`) have no variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Response {
    Generated { id: u64 },
    Exhausted,
    Allocated(bool),
    Count(u64),
    Pong,
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::Generated { id } => {
                let mut frame = Vec::with_capacity(1 + ID_SIZE);
                frame.push(GenerateStatus::Ok as u8);
                frame.extend_from_slice(&id.to_le_bytes());
                frame
            }
            Self::Exhausted => vec![GenerateStatus::Exhausted as u8],
            Self::Allocated(allocated) => vec![u8::from(allocated)],
            Self::Count(count) => count.to_le_bytes().to_vec(),
            Self::Pong => vec![PONG],
        }
    }
}

/// Reads exactly `N` bytes belonging to `command`.
///
/// # Errors
///
/// Returns [`Error::ShortFrame`] if the stream ends first, or [`Error::Io`]
/// if the read fails.
pub async fn read_fixed<R, const N: usize>(reader: &mut R, command: Command) -> Result<[u8; N]>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0_u8; N];
    let mut received = 0;
    while received < N {
        let n = reader.read(&mut buf[received..]).await?;
        if n == 0 {
            return Err(Error::ShortFrame {
                command,
                expected: N,
                received,
            });
        }
        received += n;
    }
    Ok(buf)
}

/// Reads an 8-byte little-endian integer belonging to `command`.
///
/// # Errors
///
/// See [`read_fixed`].
pub async fn read_u64<R>(reader: &mut R, command: Command) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let bytes = read_fixed::<R, ID_SIZE>(reader, command).await?;
    Ok(u64::from_le_bytes(bytes))
}

/// Reads the next command byte.
///
/// Returns `Ok(None)` if the peer closed the stream cleanly between frames.
///
/// # Errors
///
/// Returns [`Error::UnknownCommand`] for a byte that names no command.
pub async fn read_command<R>(reader: &mut R) -> Result<Option<Command>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut byte = [0_u8; 1];
    if reader.read(&mut byte).await? == 0 {
        return Ok(None);
    }
    Command::try_from(byte[0]).map(Some)
}

/// Reads the argument that follows `command` and assembles the request.
///
/// # Errors
///
/// Returns [`Error::ShortFrame`] if the argument is cut off.
pub async fn read_request<R>(reader: &mut R, command: Command) -> Result<Request>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(match command {
        Command::Generate => Request::Generate,
        Command::Allocate => Request::Allocate {
            id: read_u64(reader, command).await?,
        },
        Command::Free => Request::Free {
            id: read_u64(reader, command).await?,
        },
        Command::FreeAll => Request::FreeAll,
        Command::IsAllocated => Request::IsAllocated {
            id: read_u64(reader, command).await?,
        },
        Command::AllocatedIdCount => Request::AllocatedIdCount,
        Command::Ping => Request::Ping,
        Command::Disconnect => Request::Disconnect,
    })
}
