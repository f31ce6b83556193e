//! Process-wide shutdown context.
//!
//! Every long-running component receives a clone of [`Shutdown`] at
//! construction. Loops poll [`Shutdown::is_shutting_down`] between steps and
//! race their blocking awaits against [`Shutdown::wait`], so a single
//! [`Shutdown::trigger`] unblocks the whole server promptly.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    requested: AtomicBool,
    notifier: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (notifier, _) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownInner {
                requested: AtomicBool::new(false),
                notifier,
            }),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Requests shutdown. Returns `true` only for the call that flipped the flag.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notifier.send_replace(true);
        }
        first
    }

    /// Resolves once shutdown has been requested. Safe to race in `select!`.
    pub async fn wait(&self) {
        let mut rx = self.inner.notifier.subscribe();
        // The sender lives in `self`, so `wait_for` can only fail if it is dropped.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// SIGINT/SIGTERM listeners, installed up front so a failure is startup-fatal.
#[cfg(unix)]
pub struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(not(unix))]
pub struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(self) {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = ?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
