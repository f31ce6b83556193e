//! Background task that stamps the shared log with the wall-clock time.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local, TimeZone};
use tokio::{select, time::sleep};
use tracing::{debug, warn};

use crate::{shutdown::Shutdown, store::LogStore};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// RFC 2822-style local time, e.g. `Sun, 18 Oct 2026 09:15:02 +0200`.
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

pub fn format_record<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("timestamp:{}\n", now.format(TIMESTAMP_FORMAT))
}

pub struct TimestampProducer {
    store: Arc<LogStore>,
    shutdown: Shutdown,
    interval: Duration,
}

impl TimestampProducer {
    pub fn new(store: Arc<LogStore>, shutdown: Shutdown, interval: Duration) -> Self {
        Self {
            store,
            shutdown,
            interval,
        }
    }

    /// Waits a full interval before every write; returns as soon as shutdown
    /// is requested rather than at the end of the current interval.
    pub async fn run(self) {
        while !self.shutdown.is_shutting_down() {
            select! {
                _ = self.shutdown.wait() => break,
                _ = sleep(self.interval) => {}
            }

            let record = format_record(&Local::now());
            match self.store.append(record.as_bytes()).await {
                Ok(()) => debug!(record = record.trim_end(), "appended timestamp"),
                Err(err) => warn!(error = ?err, "failed to append timestamp"),
            }
        }
        debug!("timestamp producer stopped");
    }
}
