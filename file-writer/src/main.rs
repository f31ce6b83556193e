use std::{io, path::Path, process::ExitCode};

use clap::Parser;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// Writes a string to a file, replacing whatever the file held before.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the file to write
    file: String,

    /// Text to write into the file
    content: String,
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if err.use_stderr() => {
            error!("Invalid arguments. Usage: file-writer <file> <string>");
            let _ = err.print();
            return ExitCode::FAILURE;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    debug!("Writing {} to {}", args.content, args.file);
    match write_file(Path::new(&args.file), &args.content).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(file = %args.file, error = %err, "write failed");
            ExitCode::FAILURE
        }
    }
}

/// Creates or truncates `path` and writes `content` into it.
async fn write_file(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
