//! Append-only log file shared by every connection and the timestamp task.
//!
//! All access goes through one [`tokio::sync::Mutex`]. Callers that need to
//! commit a record and observe the log including it take a [`LogGuard`] (or
//! use [`LogStore::append_and_snapshot`]) so no other append can land in
//! between.

use std::{io, path::PathBuf};

use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tracing::debug;

#[derive(Debug)]
pub struct LogStore {
    file: Mutex<LogFile>,
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
}

/// Exclusive access to the log for the lifetime of the guard.
pub struct LogGuard<'a> {
    file: MutexGuard<'a, LogFile>,
}

impl LogStore {
    /// The file is not touched until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Mutex::new(LogFile { path: path.into() }),
        }
    }

    pub async fn lock(&self) -> LogGuard<'_> {
        LogGuard {
            file: self.file.lock().await,
        }
    }

    pub async fn append(&self, bytes: &[u8]) -> io::Result<()> {
        self.lock().await.append(bytes).await
    }

    pub async fn read_all(&self) -> io::Result<Vec<u8>> {
        self.lock().await.read_all().await
    }

    /// Appends `record` and returns the whole log as it stands right after it.
    pub async fn append_and_snapshot(&self, record: &[u8]) -> io::Result<Vec<u8>> {
        let mut guard = self.lock().await;
        guard.append(record).await?;
        guard.read_all().await
    }

    /// Removes the backing file once every writer is gone.
    ///
    /// A log that was never written is not an error.
    pub async fn dispose(&self) -> io::Result<()> {
        let file = self.file.lock().await;
        match fs::remove_file(&file.path).await {
            Ok(()) => {
                debug!(path = %file.path.display(), "removed log file");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl LogGuard<'_> {
    /// Writes every byte or fails. `write_all` already retries `Interrupted`
    /// and short writes; `flush` waits for the blocking write to land before
    /// the guard can be released.
    pub async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.file.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        fs::read(&self.file.path).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn temp_log() -> PathBuf {
        std::env::temp_dir().join(format!("log-server-store-{}", nanoid::nanoid!()))
    }

    #[tokio::test]
    async fn first_append_creates_the_file() {
        let path = temp_log();
        let store = LogStore::new(&path);
        assert!(!path.exists());

        store.append(b"hello\n").await.expect("append");
        assert_eq!(store.read_all().await.expect("read"), b"hello\n");

        store.dispose().await.expect("dispose");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn snapshot_includes_the_record_and_everything_before_it() {
        let path = temp_log();
        let store = LogStore::new(&path);

        store.append(b"timestamp:x\n").await.expect("append");
        let snapshot = store.append_and_snapshot(b"line1\n").await.expect("snapshot");
        assert_eq!(snapshot, b"timestamp:x\nline1\n");

        store.dispose().await.expect("dispose");
    }

    #[tokio::test]
    async fn read_without_any_append_reports_not_found() {
        let store = LogStore::new(temp_log());
        let err = store.read_all().await.expect_err("nothing written yet");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        store.dispose().await.expect("disposing an absent log is fine");
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let path = temp_log();
        let store = Arc::new(LogStore::new(&path));

        let writers: Vec<_> = (0..16)
            .map(|id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let line = format!("{}\n", id.to_string().repeat(512));
                    for _ in 0..8 {
                        store.append(line.as_bytes()).await.expect("append");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.expect("writer task");
        }

        let contents = String::from_utf8(store.read_all().await.expect("read")).expect("utf8");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 16 * 8);
        for line in lines {
            assert_eq!(line.len() % 512, 0, "truncated line: {line:?}");
            let id = &line[..line.len() / 512];
            assert_eq!(line, id.repeat(512), "interleaved line: {line:?}");
        }

        store.dispose().await.expect("dispose");
    }
}
