use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use log_server::{
    cli::{Cli, ServerConfig},
    daemon,
    server::{self, Server},
    shutdown::TerminationSignals,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::try_from(Cli::parse())?;
    let listener = server::bind_listener(config.listen).inspect_err(|err| {
        error!("Socket setup failed: {err:#}");
    })?;

    if config.detach {
        daemon::detach().context("failed to detach from terminal")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("log-server-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let signals = TerminationSignals::install().inspect_err(|err| {
            error!("Signal setup failed: {err}");
        })?;
        let server = Server::from_std(listener, &config)?;
        info!("log server listening on {}", server.local_addr()?);
        server.run_until(signals.recv()).await
    })
}
