//! Async client for the slotid server.
//!
//! [`Client`] mirrors the wire protocol one call per command. The connection
//! sits behind a mutex so that exactly one request is in flight at a time,
//! matching the server's strict request/response discipline. Nothing is
//! retried; callers decide whether to [`Client::reconnect`].

use crate::{Command, Error, GenerateStatus, PONG, Request, Result, read_fixed, read_u64};
use std::net::SocketAddr;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, ToSocketAddrs},
    sync::Mutex,
};

/// A connection to a slotid server.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> slotid_wire::Result<()> {
/// let client = slotid_wire::Client::connect("127.0.0.1:49152").await?;
/// let id = client.generate().await?;
/// assert!(client.is_allocated(id).await?);
/// client.free(id).await?;
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    addr: SocketAddr,
    stream: Mutex<TcpStream>,
}

impl Client {
    /// Dials the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the connection cannot be established.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = dial(addr).await?;
        let addr = stream.peer_addr()?;
        Ok(Self {
            addr,
            stream: Mutex::new(stream),
        })
    }

    /// Address of the server this client dials.
    pub const fn server_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Asks the server for a fresh ID.
    ///
    /// # Errors
    ///
    /// - [`Error::Exhausted`] if the server has no free ID left.
    /// - [`Error::UnexpectedResponse`] for an unknown status byte.
    /// - [`Error::Io`] / [`Error::ShortFrame`] on transport failures.
    pub async fn generate(&self) -> Result<u64> {
        let command = Command::Generate;
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::Generate).await?;

        let [status] = read_fixed::<_, 1>(&mut *stream, command).await?;
        match status {
            s if s == GenerateStatus::Ok as u8 => read_u64(&mut *stream, command).await,
            s if s == GenerateStatus::Exhausted as u8 => Err(Error::Exhausted),
            byte => Err(Error::UnexpectedResponse { command, byte }),
        }
    }

    /// Reserves `id`.
    ///
    /// The protocol has no reply for this command: if the server rejects the
    /// reservation it logs the failure and closes the connection, which the
    /// next call on this client observes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the request cannot be written.
    pub async fn allocate(&self, id: u64) -> Result<()> {
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::Allocate { id }).await
    }

    /// Releases `id`. Same reply semantics as [`Self::allocate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the request cannot be written.
    pub async fn free(&self, id: u64) -> Result<()> {
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::Free { id }).await
    }

    /// Releases every ID on the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the request cannot be written.
    pub async fn free_all(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::FreeAll).await
    }

    /// Returns whether `id` is allocated.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedResponse`] for a reply other than `0` or `1`.
    /// - [`Error::Io`] / [`Error::ShortFrame`] on transport failures.
    pub async fn is_allocated(&self, id: u64) -> Result<bool> {
        let command = Command::IsAllocated;
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::IsAllocated { id }).await?;

        match read_fixed::<_, 1>(&mut *stream, command).await? {
            [0] => Ok(false),
            [1] => Ok(true),
            [byte] => Err(Error::UnexpectedResponse { command, byte }),
        }
    }

    /// Number of IDs currently allocated on the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] / [`Error::ShortFrame`] on transport failures.
    pub async fn allocated_count(&self) -> Result<u64> {
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::AllocatedIdCount).await?;
        read_u64(&mut *stream, Command::AllocatedIdCount).await
    }

    /// Verifies the connection is alive.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedResponse`] if the reply is not [`PONG`].
    /// - [`Error::Io`] / [`Error::ShortFrame`] if the link is down.
    pub async fn ping(&self) -> Result<()> {
        let command = Command::Ping;
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::Ping).await?;

        match read_fixed::<_, 1>(&mut *stream, command).await? {
            [PONG] => Ok(()),
            [byte] => Err(Error::UnexpectedResponse { command, byte }),
        }
    }

    /// Re-dials the server, but only if a [`Self::ping`] fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the new connection cannot be established.
    pub async fn reconnect(&self) -> Result<()> {
        if self.ping().await.is_ok() {
            return Ok(());
        }

        let stream = dial(self.addr).await?;
        *self.stream.lock().await = stream;
        Ok(())
    }

    /// Tells the server to close the connection and shuts down the write half.
    ///
    /// The client can be revived afterwards with [`Self::reconnect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the request cannot be written.
    pub async fn disconnect(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        send(&mut stream, Request::Disconnect).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

async fn dial<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    // Frames are tiny and strictly request/response.
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn send(stream: &mut TcpStream, request: Request) -> Result<()> {
    stream.write_all(&request.encode()).await?;
    Ok(())
}
