//! Per-connection protocol handler.
//!
//! A connection is a loop of strict request/response frames. Each request is
//! read under the idle deadline, dispatched to the shared allocator on the
//! blocking pool, and answered with at most one response frame.

use super::{error::ConnectionError, telemetry};
use slotid::{Allocator, IdStore};
use slotid_wire::{Request, Response, read_command, read_request};
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    task::JoinError,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// Cheaply cloneable handle to the allocator shared by every connection.
pub struct SharedAllocator<S> {
    inner: Arc<Allocator<S>>,
}

impl<S> Clone for SharedAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> SharedAllocator<S>
where
    S: IdStore + Send + 'static,
{
    pub fn new(allocator: Allocator<S>) -> Self {
        Self {
            inner: Arc::new(allocator),
        }
    }

    pub fn get(&self) -> &Allocator<S> {
        &self.inner
    }

    /// Runs `f` on tokio's blocking pool.
    ///
    /// Store calls may block on network I/O while the allocator lock is held,
    /// so they never run on a runtime worker.
    pub async fn call<T, F>(&self, f: F) -> Result<slotid::Result<T>, JoinError>
    where
        F: FnOnce(&Allocator<S>) -> slotid::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let allocator = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&allocator)).await
    }
}

enum Reply {
    Send(Response),
    Silent,
    Close,
}

/// Serves one client until it disconnects, idles out, misbehaves, or `token`
/// is cancelled.
///
/// Returns `Ok(())` for a clean close: `disconnect`, EOF between frames, or
/// cancellation while waiting for the next request.
pub async fn serve_connection<IO, S>(
    mut io: IO,
    allocator: SharedAllocator<S>,
    idle_timeout: Duration,
    token: CancellationToken,
) -> Result<(), ConnectionError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: IdStore + Send + 'static,
{
    loop {
        let request = tokio::select! {
            biased;

            () = token.cancelled() => {
                tracing::debug!("connection cancelled by server");
                return Ok(());
            }
            read = timeout(idle_timeout, next_request(&mut io)) => {
                read.map_err(|_| slotid_wire::Error::Timeout)??
            }
        };

        let Some(request) = request else {
            tracing::debug!("peer closed the connection");
            return Ok(());
        };

        telemetry::increment_commands(request.command());
        tracing::trace!(?request, "dispatching");

        match dispatch(&allocator, request).await? {
            Reply::Send(response) => {
                timeout(idle_timeout, write_response(&mut io, response))
                    .await
                    .map_err(|_| slotid_wire::Error::Timeout)??;
            }
            Reply::Silent => {}
            Reply::Close => {
                tracing::debug!("peer requested disconnect");
                return Ok(());
            }
        }
    }
}

/// Reads one full request, or `None` on EOF before the command byte.
async fn next_request<R>(reader: &mut R) -> slotid_wire::Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let Some(command) = read_command(reader).await? else {
        return Ok(None);
    };
    read_request(reader, command).await.map(Some)
}

async fn write_response<W>(writer: &mut W, response: Response) -> slotid_wire::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&response.encode()).await?;
    writer.flush().await?;
    Ok(())
}

async fn dispatch<S>(
    allocator: &SharedAllocator<S>,
    request: Request,
) -> Result<Reply, ConnectionError>
where
    S: IdStore + Send + 'static,
{
    let reply = match request {
        Request::Generate => match allocator.call(|a| a.generate()).await? {
            Ok(id) => {
                telemetry::increment_ids_generated();
                Reply::Send(Response::Generated { id })
            }
            Err(slotid::Error::Exhausted) => {
                tracing::debug!("ID space exhausted");
                Reply::Send(Response::Exhausted)
            }
            Err(err) => return Err(err.into()),
        },
        Request::Allocate { id } => {
            allocator.call(move |a| a.allocate(id)).await??;
            Reply::Silent
        }
        Request::Free { id } => {
            allocator.call(move |a| a.free(id)).await??;
            Reply::Silent
        }
        Request::FreeAll => {
            allocator.call(|a| a.free_all()).await??;
            Reply::Silent
        }
        Request::IsAllocated { id } => {
            let allocated = allocator.call(move |a| a.is_allocated(id)).await??;
            Reply::Send(Response::Allocated(allocated))
        }
        Request::AllocatedIdCount => {
            let count = allocator.call(|a| a.allocated_count()).await??;
            Reply::Send(Response::Count(count))
        }
        Request::Ping => Reply::Send(Response::Pong),
        Request::Disconnect => Reply::Close,
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotid::{IdRange, LocalStore};
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};
    use tokio::task::JoinHandle;

    fn allocator(min: u64, max: u64) -> SharedAllocator<LocalStore> {
        let range = IdRange::new(min, max).unwrap();
        let store = LocalStore::new(range.size()).unwrap();
        SharedAllocator::new(Allocator::new(store, range).unwrap())
    }

    fn spawn_handler(
        allocator: SharedAllocator<LocalStore>,
        token: CancellationToken,
    ) -> (DuplexStream, JoinHandle<Result<(), ConnectionError>>) {
        let (client, server) = duplex(256);
        let handle = tokio::spawn(serve_connection(
            server,
            allocator,
            Duration::from_secs(10),
            token,
        ));
        (client, handle)
    }

    async fn roundtrip<const N: usize>(client: &mut DuplexStream, request: &[u8]) -> [u8; N] {
        client.write_all(request).await.unwrap();
        let mut buf = [0u8; N];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn generate_on_fresh_space_returns_zero() {
        let (mut client, handle) = spawn_handler(allocator(0, 16), CancellationToken::new());

        let reply: [u8; 9] = roundtrip(&mut client, &[0x00]).await;
        assert_eq!(reply, [0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let reply: [u8; 9] = roundtrip(&mut client, &[0x00]).await;
        assert_eq!(reply, [0, 1, 0, 0, 0, 0, 0, 0, 0]);

        client.write_all(&[0x08]).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn exhaustion_keeps_the_connection_open() {
        let (mut client, handle) = spawn_handler(allocator(100, 101), CancellationToken::new());

        let reply: [u8; 9] = roundtrip(&mut client, &[0x00]).await;
        assert_eq!(reply, Response::Generated { id: 100 }.encode()[..]);

        let reply: [u8; 1] = roundtrip(&mut client, &[0x00]).await;
        assert_eq!(reply, [0x01]);

        let reply: [u8; 1] = roundtrip(&mut client, &[0x06]).await;
        assert_eq!(reply, [0x07]);

        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn allocate_query_and_count() {
        let shared = allocator(10, 20);
        let (mut client, handle) = spawn_handler(shared.clone(), CancellationToken::new());

        client.write_all(&Request::Allocate { id: 15 }.encode()).await.unwrap();
        let reply: [u8; 1] =
            roundtrip(&mut client, &Request::IsAllocated { id: 15 }.encode()).await;
        assert_eq!(reply, [1]);

        let reply: [u8; 8] = roundtrip(&mut client, &[0x05]).await;
        assert_eq!(u64::from_le_bytes(reply), 1);

        client.write_all(&Request::Free { id: 15 }.encode()).await.unwrap();
        let reply: [u8; 1] =
            roundtrip(&mut client, &Request::IsAllocated { id: 15 }.encode()).await;
        assert_eq!(reply, [0]);

        client.write_all(&[0x01]).await.unwrap();
        client.write_all(&12u64.to_le_bytes()).await.unwrap();
        client.write_all(&[0x03]).await.unwrap();
        let reply: [u8; 8] = roundtrip(&mut client, &[0x05]).await;
        assert_eq!(u64::from_le_bytes(reply), 0);

        drop(client);
        handle.await.unwrap().unwrap();
        assert_eq!(shared.get().allocated_count(), Ok(0));
    }

    #[tokio::test]
    async fn unknown_command_closes_the_connection() {
        let (mut client, handle) = spawn_handler(allocator(0, 16), CancellationToken::new());

        client.write_all(&[0xFF]).await.unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Wire(slotid_wire::Error::UnknownCommand(0xFF))
        ));
        assert!(err.is_protocol_violation());

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pong_byte_is_not_a_request() {
        let (mut client, handle) = spawn_handler(allocator(0, 16), CancellationToken::new());

        client.write_all(&[0x07]).await.unwrap();
        assert!(matches!(
            handle.await.unwrap(),
            Err(ConnectionError::Wire(slotid_wire::Error::UnknownCommand(0x07)))
        ));
    }

    #[tokio::test]
    async fn truncated_argument_is_a_framing_error() {
        let (mut client, handle) = spawn_handler(allocator(0, 16), CancellationToken::new());

        client.write_all(&[0x01, 3, 0, 0]).await.unwrap();
        client.shutdown().await.unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn domain_errors_close_the_connection() {
        let shared = allocator(0, 16);
        let (mut client, handle) = spawn_handler(shared.clone(), CancellationToken::new());

        client.write_all(&Request::Allocate { id: 3 }.encode()).await.unwrap();
        client.write_all(&Request::Allocate { id: 3 }.encode()).await.unwrap();
        assert!(matches!(
            handle.await.unwrap(),
            Err(ConnectionError::Allocator(slotid::Error::AlreadyAllocated { id: 3 }))
        ));

        let (mut client, handle) = spawn_handler(shared.clone(), CancellationToken::new());
        client.write_all(&Request::Free { id: 16 }.encode()).await.unwrap();
        assert!(matches!(
            handle.await.unwrap(),
            Err(ConnectionError::Allocator(slotid::Error::OutOfRange { id: 16, .. }))
        ));
        assert_eq!(shared.get().allocated_count(), Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out() {
        let (_client, server) = duplex(64);
        let result = serve_connection(
            server,
            allocator(0, 16),
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(ConnectionError::Wire(slotid_wire::Error::Timeout))
        ));
    }

    #[tokio::test]
    async fn cancellation_closes_cleanly() {
        let token = CancellationToken::new();
        let (mut client, handle) = spawn_handler(allocator(0, 16), token.clone());

        let reply: [u8; 1] = roundtrip(&mut client, &[0x06]).await;
        assert_eq!(reply, [0x07]);

        token.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_buffered_request() {
        let shared = allocator(0, 16);
        let token = CancellationToken::new();
        token.cancel();

        let (mut client, server) = duplex(64);
        client.write_all(&[0x00]).await.unwrap();
        let result = serve_connection(
            server,
            shared.clone(),
            Duration::from_secs(10),
            token,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(shared.get().allocated_count(), Ok(0));
    }
}
