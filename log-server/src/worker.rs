//! Per-connection receive, frame, append, echo loop.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::oneshot,
};
use tracing::{debug, info, warn};

use crate::{
    framing::RecordBuffer, registry::WorkerTicket, shutdown::Shutdown, store::LogStore,
};

/// Maximum bytes taken from the socket per receive.
pub const RECV_CHUNK_SIZE: usize = 1024;

/// Why a connection loop stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// Peer closed its sending side.
    PeerClosed,
    /// Shutdown was requested or the registry forced the worker out.
    Cancelled,
}

pub struct ConnectionWorker<S> {
    stream: S,
    peer: SocketAddr,
    store: Arc<LogStore>,
    shutdown: Shutdown,
}

impl<S> ConnectionWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, store: Arc<LogStore>, shutdown: Shutdown) -> Self {
        Self {
            stream,
            peer,
            store,
            shutdown,
        }
    }

    /// Owns the connection until it ends, then closes it and marks the
    /// ticket complete so the registry can reap this worker.
    pub async fn run(mut self, ticket: WorkerTicket) {
        let WorkerTicket {
            id,
            completion,
            mut kick,
        } = ticket;
        info!(worker = id, "Accepted connection from {}", self.peer.ip());

        match self.serve(&mut kick).await {
            Ok(reason) => debug!(worker = id, peer = %self.peer, ?reason, "connection loop ended"),
            Err(err) => warn!(worker = id, peer = %self.peer, error = ?err, "abandoning connection"),
        }

        if let Err(err) = self.stream.shutdown().await {
            debug!(worker = id, peer = %self.peer, error = ?err, "socket shutdown failed");
        }
        info!(worker = id, "Closed connection from {}", self.peer.ip());

        drop(self);
        drop(completion);
    }

    async fn serve(&mut self, kick: &mut oneshot::Receiver<()>) -> io::Result<Disconnect> {
        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        let mut records = RecordBuffer::new();

        while !self.shutdown.is_shutting_down() {
            let received = select! {
                _ = &mut *kick => return Ok(Disconnect::Cancelled),
                _ = self.shutdown.wait() => return Ok(Disconnect::Cancelled),
                result = self.stream.read(&mut chunk) => result,
            };

            let count = match received {
                Ok(0) => {
                    if records.pending_len() > 0 {
                        debug!(
                            peer = %self.peer,
                            bytes = records.pending_len(),
                            "discarding unterminated tail"
                        );
                    }
                    return Ok(Disconnect::PeerClosed);
                }
                Ok(count) => count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            records.extend(&chunk[..count]);

            while let Some(record) = records.next_record() {
                let snapshot = self.store.append_and_snapshot(&record).await?;
                // The snapshot is already committed; only the echo may be cut short.
                select! {
                    _ = &mut *kick => return Ok(Disconnect::Cancelled),
                    _ = self.shutdown.wait() => return Ok(Disconnect::Cancelled),
                    result = self.stream.write_all(&snapshot) => result?,
                }
            }
        }

        Ok(Disconnect::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use tokio::{io::DuplexStream, task::JoinHandle, time::timeout};

    use super::*;
    use crate::registry::{Reservation, WorkerRegistry};

    const WAIT: Duration = Duration::from_secs(1);

    struct Harness {
        client: DuplexStream,
        worker: JoinHandle<()>,
        store: Arc<LogStore>,
        shutdown: Shutdown,
        registry: WorkerRegistry,
        reservation: Reservation,
        path: PathBuf,
    }

    async fn start() -> Harness {
        let path = std::env::temp_dir().join(format!("log-server-worker-{}", nanoid::nanoid!()));
        let store = Arc::new(LogStore::new(&path));
        let shutdown = Shutdown::new();
        let registry = WorkerRegistry::new();
        let peer: SocketAddr = "127.0.0.1:5555".parse().expect("peer");

        let (client, server) = tokio::io::duplex(4096);
        let (reservation, ticket) = registry.reserve(peer);
        let worker = ConnectionWorker::new(server, peer, Arc::clone(&store), shutdown.clone());
        let worker = tokio::spawn(worker.run(ticket));

        Harness {
            client,
            worker,
            store,
            shutdown,
            registry,
            reservation,
            path,
        }
    }

    async fn read_exactly(client: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(WAIT, client.read_exact(&mut buf))
            .await
            .expect("echo should arrive")
            .expect("read echo");
        buf
    }

    #[tokio::test]
    async fn split_record_is_appended_once_and_echoed() {
        let mut harness = start().await;

        harness.client.write_all(b"ab").await.expect("write");
        tokio::time::sleep(Duration::from_millis(20)).await;
        harness.client.write_all(b"c\n").await.expect("write");

        assert_eq!(read_exactly(&mut harness.client, 4).await, b"abc\n");
        assert_eq!(harness.store.read_all().await.expect("read"), b"abc\n");

        drop(harness.client);
        timeout(WAIT, harness.worker)
            .await
            .expect("worker exits on eof")
            .expect("worker task");
        harness.store.dispose().await.expect("dispose");
        assert!(!harness.path.exists());
    }

    #[tokio::test]
    async fn each_echo_is_the_log_up_to_that_record() {
        let mut harness = start().await;

        harness
            .client
            .write_all(b"line1\nline2\n")
            .await
            .expect("write");

        assert_eq!(read_exactly(&mut harness.client, 6).await, b"line1\n");
        assert_eq!(
            read_exactly(&mut harness.client, 12).await,
            b"line1\nline2\n"
        );

        harness.shutdown.trigger();
        timeout(WAIT, harness.worker)
            .await
            .expect("worker exits on shutdown")
            .expect("worker task");
        harness.store.dispose().await.expect("dispose");
    }

    #[tokio::test]
    async fn drain_unblocks_an_idle_connection() {
        let Harness {
            client,
            worker,
            registry,
            reservation,
            path,
            ..
        } = start().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_finished());
        registry.register(reservation, worker).await;

        let drained = timeout(WAIT, registry.drain_all())
            .await
            .expect("drain should not wait for the idle client");
        assert_eq!(drained, 1);
        assert!(!path.exists(), "nothing was ever appended");
        drop(client);
    }
}
