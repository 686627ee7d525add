use super::{
    connection::{SharedAllocator, serve_connection},
    error::{ConnectionError, ServerError},
    telemetry,
};
use slotid::{Allocator, IdStore};
use std::{
    net::SocketAddr,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    Paused,
}

/// Accepts clients and serves them from one shared allocator.
///
/// ```text
///            run            pause
///  Stopped ──────► Running ──────► Paused
///     ▲               ▲   resume     │
///     │               └──────────────┘
///     └────────── stop (any state) ──┘
/// ```
///
/// Pausing only stops the accept loop: live connections keep being served and
/// allocations are kept. [`Self::shutdown`] cancels every connection but
/// leaves the store alone, which is what a process exit wants when the store
/// is shared. [`Self::stop`] also frees every ID.
pub struct IdServer<S> {
    allocator: SharedAllocator<S>,
    idle_timeout: Duration,
    state: watch::Sender<ServerState>,
    // Replaced on every run so a stopped server can be started again.
    shutdown: Mutex<CancellationToken>,
    // True from the moment `run` starts until its accept loop has exited.
    accepting: watch::Sender<bool>,
    connections: TaskTracker,
}

/// Clears the accepting flag even if the `run` future is dropped.
struct AcceptLoop<'a>(&'a watch::Sender<bool>);

impl Drop for AcceptLoop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl<S> IdServer<S>
where
    S: IdStore + Send + 'static,
{
    pub fn new(allocator: Allocator<S>, idle_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        let (accepting, _) = watch::channel(false);
        Self {
            allocator: SharedAllocator::new(allocator),
            idle_timeout,
            state,
            shutdown: Mutex::new(CancellationToken::new()),
            accepting,
            connections: TaskTracker::new(),
        }
    }

    pub fn allocator(&self) -> &Allocator<S> {
        self.allocator.get()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Serves `listener` until [`Self::shutdown`] or [`Self::stop`] is called,
    /// then waits for every connection task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] unless the server is stopped
    /// and a previous accept loop has fully exited.
    pub async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        let (token, accept_loop) = {
            let mut current = self.lock_shutdown();
            if *self.accepting.borrow() {
                return Err(ServerError::AlreadyRunning);
            }
            let started = self.state.send_if_modified(|state| {
                if *state == ServerState::Stopped {
                    *state = ServerState::Running;
                    true
                } else {
                    false
                }
            });
            if !started {
                return Err(ServerError::AlreadyRunning);
            }
            *current = CancellationToken::new();
            self.accepting.send_replace(true);
            (current.clone(), AcceptLoop(&self.accepting))
        };

        self.connections.reopen();
        tracing::info!(addr = ?listener.local_addr().ok(), "server running");

        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ServerState::Stopped => break,
                ServerState::Paused => {
                    if state.changed().await.is_err() {
                        break;
                    }
                }
                ServerState::Running => {
                    tokio::select! {
                        biased;

                        changed = state.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => self.spawn_connection(stream, peer, &token),
                            Err(err) => tracing::warn!(error = %err, "failed to accept connection"),
                        },
                    }
                }
            }
        }

        drop(accept_loop);
        self.connections.close();
        self.connections.wait().await;
        tracing::info!("server stopped");
        Ok(())
    }

    /// Stops accepting new connections without touching live ones.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] unless the server is running.
    pub fn pause(&self) -> Result<(), ServerError> {
        self.transition(ServerState::Running, ServerState::Paused)
            .then(|| tracing::info!("server paused"))
            .ok_or(ServerError::NotRunning)
    }

    /// # Errors
    ///
    /// Returns [`ServerError::NotPaused`] unless the server is paused.
    pub fn resume(&self) -> Result<(), ServerError> {
        self.transition(ServerState::Paused, ServerState::Running)
            .then(|| tracing::info!("server resumed"))
            .ok_or(ServerError::NotPaused)
    }

    /// Cancels every connection and ends the accept loop, keeping every
    /// allocation in the store.
    ///
    /// Returns once the accept loop has exited and every connection task has
    /// finished. Valid from any state.
    pub async fn shutdown(&self) {
        {
            let token = self.lock_shutdown();
            self.state.send_replace(ServerState::Stopped);
            token.cancel();
        }
        tracing::info!("shutting down server");

        // A connection accepted just before the loop saw `Stopped` is
        // tracked by the time the flag clears.
        let mut accepting = self.accepting.subscribe();
        let _ = accepting.wait_for(|accepting| !accepting).await;

        self.connections.close();
        self.connections.wait().await;
    }

    /// [`Self::shutdown`], then frees every ID.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Allocator`] if the store cannot be cleared.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.shutdown().await;
        self.allocator.call(|a| a.free_all()).await??;
        tracing::info!("allocations cleared");
        Ok(())
    }

    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, token: &CancellationToken) {
        telemetry::increment_connections_accepted();
        telemetry::increment_connections_open();

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %err, "failed to set TCP_NODELAY");
        }

        let allocator = self.allocator.clone();
        let idle_timeout = self.idle_timeout;
        let token = token.clone();
        let span = tracing::info_span!("connection", %peer);

        self.connections.spawn(
            async move {
                tracing::debug!("connection accepted");
                match serve_connection(stream, allocator, idle_timeout, token).await {
                    Ok(()) => tracing::debug!("connection closed"),
                    Err(err) => log_connection_error(&err),
                }
                telemetry::decrement_connections_open();
            }
            .instrument(span),
        );
    }

    fn lock_shutdown(&self) -> MutexGuard<'_, CancellationToken> {
        // The token stays valid even if a holder panicked.
        self.shutdown.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_connection_error(err: &ConnectionError) {
    match err {
        ConnectionError::Wire(slotid_wire::Error::Timeout) => {
            tracing::debug!("connection idle, closing");
        }
        err if err.is_protocol_violation() => {
            telemetry::increment_protocol_errors();
            tracing::warn!(error = %err, "protocol violation, closing connection");
        }
        ConnectionError::Allocator(
            err @ (slotid::Error::OutOfRange { .. } | slotid::Error::AlreadyAllocated { .. }),
        ) => {
            tracing::warn!(error = %err, "rejected request, closing connection");
        }
        ConnectionError::Wire(slotid_wire::Error::Io(err)) => {
            tracing::debug!(error = %err, "connection I/O failed");
        }
        err => tracing::error!(error = %err, "closing connection"),
    }
}
