//! Download progress accounting.
//!
//! Progress is transient: recomputed from a monotonically increasing byte
//! counter on a fixed wall-clock cadence and never persisted.

use std::time::{Duration, Instant};

/// One progress observation.
///
/// `percent` is `None` when the server omitted `Content-Length`; callers
/// then render byte counts only. Rates are bytes per second.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub percent: Option<u8>,
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    /// Bytes in the most recent interval / that interval's duration.
    pub instantaneous_rate: f64,
    /// Total bytes / total elapsed time.
    pub average_rate: f64,
}

/// Throttles progress emission to at most once per `interval` of wall time.
pub struct ProgressTracker {
    total: Option<u64>,
    downloaded: u64,
    started: Instant,
    interval: Duration,
    last_emit: Instant,
    bytes_at_last_emit: u64,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total,
            downloaded: 0,
            started: now,
            interval,
            last_emit: now,
            bytes_at_last_emit: 0,
        }
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Record a chunk; returns an observation when the cadence has elapsed.
    pub fn record(&mut self, chunk_len: u64) -> Option<DownloadProgress> {
        self.downloaded += chunk_len;
        let now = Instant::now();
        let since_emit = now.duration_since(self.last_emit);
        if since_emit < self.interval {
            return None;
        }
        let progress = self.snapshot(now, since_emit);
        self.last_emit = now;
        self.bytes_at_last_emit = self.downloaded;
        Some(progress)
    }

    /// Final observation, emitted unconditionally when the stream ends.
    pub fn finish(&mut self) -> DownloadProgress {
        let now = Instant::now();
        let since_emit = now.duration_since(self.last_emit);
        self.snapshot(now, since_emit)
    }

    fn snapshot(&self, now: Instant, since_emit: Duration) -> DownloadProgress {
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let interval_secs = since_emit.as_secs_f64();
        let interval_bytes = self.downloaded - self.bytes_at_last_emit;

        let percent = self.total.and_then(|total| {
            if total == 0 {
                None
            } else {
                Some(((self.downloaded.min(total) * 100) / total) as u8)
            }
        });

        DownloadProgress {
            percent,
            bytes_downloaded: self.downloaded,
            bytes_total: self.total,
            instantaneous_rate: if interval_secs > 0.0 {
                interval_bytes as f64 / interval_secs
            } else {
                0.0
            },
            average_rate: if elapsed > 0.0 {
                self.downloaded as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}
