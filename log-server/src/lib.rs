//! Newline-record log server.
//!
//! Clients send newline-terminated records over TCP. Each record is appended
//! to one shared log file and the connection is answered with the full log
//! as it stands right after that append. A background task stamps the log
//! with the wall-clock time on a fixed interval. SIGINT/SIGTERM drains every
//! connection and removes the log.
//!
//! - [`cli`] parses the command line into a [`cli::ServerConfig`].
//! - [`server`] owns the listening socket and the shutdown sequence.
//! - [`worker`] serves one connection: receive, frame, append, echo.
//! - [`framing`] splits received bytes into records.
//! - [`store`] serializes every access to the log file.
//! - [`registry`] tracks live workers so they can be reaped and drained.
//! - [`timestamp`] appends periodic timestamp records.
//! - [`shutdown`] is the shared cancellation context plus signal handling.
//! - [`daemon`] detaches the process before the runtime starts.

pub mod cli;
pub mod daemon;
pub mod framing;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod timestamp;
pub mod worker;
