//! Connection acceptor and lifecycle control.
//!
//! [`Server::run_until`] accepts connections until the supplied shutdown
//! future resolves (or [`Shutdown::trigger`] is called, or accept fails
//! fatally), then walks the lifecycle:
//!
//! 1. raise the shutdown flag and close the listening socket,
//! 2. kick and join every registered connection worker,
//! 3. join the timestamp producer,
//! 4. remove the log file.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, error, info, warn};

use crate::{
    cli::ServerConfig,
    registry::WorkerRegistry,
    shutdown::Shutdown,
    store::LogStore,
    timestamp::TimestampProducer,
    worker::ConnectionWorker,
};

pub struct Server {
    listener: TcpListener,
    store: Arc<LogStore>,
    registry: Arc<WorkerRegistry>,
    shutdown: Shutdown,
    timestamp_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LifecycleState {
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug)]
struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: LifecycleState::Running,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        debug_assert!(next > self.state, "lifecycle only moves forward");
        debug!(from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
    }
}

/// Pending-connection queue depth for the listening socket.
pub const LISTEN_BACKLOG: i32 = 10;

/// Binds the listening socket outside any runtime, so it can be created
/// before the process detaches.
pub fn bind_listener(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("failed to create listening socket")?;
    socket
        .set_reuse_address(true)
        .context("failed to set SO_REUSEADDR")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;
    socket
        .listen(LISTEN_BACKLOG)
        .with_context(|| format!("failed to listen on {addr}"))?;
    socket
        .set_nonblocking(true)
        .context("failed to make listener non-blocking")?;
    Ok(socket.into())
}

impl Server {
    pub fn new(listener: TcpListener, config: &ServerConfig) -> Self {
        Self {
            listener,
            store: Arc::new(LogStore::new(&config.data_file)),
            registry: Arc::new(WorkerRegistry::new()),
            shutdown: Shutdown::new(),
            timestamp_interval: config.timestamp_interval,
        }
    }

    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config))
    }

    /// Adopts a listener from [`bind_listener`]. Needs a running runtime.
    pub fn from_std(listener: std::net::TcpListener, config: &ServerConfig) -> Result<Self> {
        let listener =
            TcpListener::from_std(listener).context("failed to register listener with runtime")?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops the server from outside `run_until`.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            store,
            registry,
            shutdown,
            timestamp_interval,
        } = self;
        let mut lifecycle = Lifecycle::new();

        let producer = tokio::spawn(
            TimestampProducer::new(Arc::clone(&store), shutdown.clone(), timestamp_interval).run(),
        );

        let outcome = accept_connections(&listener, &store, &registry, &shutdown, signal).await;
        if let Err(err) = &outcome {
            error!(error = ?err, "acceptor failed, shutting down");
        }

        lifecycle.advance(LifecycleState::ShuttingDown);
        shutdown.trigger();
        drop(listener);

        let live = registry.len().await;
        debug!(workers = live, "draining connection workers");
        let drained = registry.drain_all().await;
        debug!(workers = drained, "connection workers joined");

        if let Err(err) = producer.await {
            warn!(error = ?err, "timestamp producer panicked");
        }

        lifecycle.advance(LifecycleState::Stopped);
        if let Err(err) = store.dispose().await {
            warn!(error = ?err, "failed to remove log file");
        }
        info!("server stopped");

        outcome
    }
}

async fn accept_connections<F>(
    listener: &TcpListener,
    store: &Arc<LogStore>,
    registry: &Arc<WorkerRegistry>,
    shutdown: &Shutdown,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(signal);

    loop {
        select! {
            _ = &mut signal => {
                info!("Caught signal, exiting");
                return Ok(());
            }
            _ = shutdown.wait() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    spawn_worker(stream, peer, store, registry, shutdown).await;
                    let reaped = registry.reap_completed().await;
                    if reaped > 0 {
                        debug!(workers = reaped, "reaped finished connection workers");
                    }
                }
                Err(err) if is_transient_accept_error(&err) => {
                    debug!(error = ?err, "transient accept failure");
                }
                Err(err) => return Err(err).context("failed to accept connection"),
            },
        }
    }
}

async fn spawn_worker(
    stream: TcpStream,
    peer: SocketAddr,
    store: &Arc<LogStore>,
    registry: &WorkerRegistry,
    shutdown: &Shutdown,
) {
    let (reservation, ticket) = registry.reserve(peer);
    let worker = ConnectionWorker::new(stream, peer, Arc::clone(store), shutdown.clone());
    let handle = tokio::spawn(worker.run(ticket));
    registry.register(reservation, handle).await;
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
