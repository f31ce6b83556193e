use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;

use crate::timestamp::DEFAULT_INTERVAL;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9000";
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";

/// Accepts newline-delimited records over TCP, appends them to a shared log
/// file, and answers each record with the full log.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Detach from the controlling terminal once the socket is bound.
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,

    /// Socket address to listen on.
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Log file shared by all connections. Removed on clean shutdown.
    #[arg(long, default_value = DEFAULT_DATA_FILE)]
    pub data_file: PathBuf,

    /// Seconds between timestamp records.
    #[arg(
        long,
        default_value_t = DEFAULT_INTERVAL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timestamp_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub data_file: PathBuf,
    pub detach: bool,
    pub timestamp_interval: Duration,
}

impl ServerConfig {
    pub fn new(listen: SocketAddr, data_file: impl Into<PathBuf>) -> Self {
        Self {
            listen,
            data_file: data_file.into(),
            detach: false,
            timestamp_interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_timestamp_interval(mut self, interval: Duration) -> Self {
        self.timestamp_interval = interval;
        self
    }
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        // Detaching changes directory to `/`, so relative paths must be pinned first.
        let data_file = std::path::absolute(&cli.data_file)
            .with_context(|| format!("invalid data file path {}", cli.data_file.display()))?;

        Ok(Self {
            listen: cli.listen,
            data_file,
            detach: cli.daemon,
            timestamp_interval: Duration::from_secs(cli.timestamp_interval),
        })
    }
}
