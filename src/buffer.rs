use crate::error::Result;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Fixed-duration circular buffer of encoded video chunks.
///
/// The live producer appends continuously while the recorder is routed at the
/// buffer; chunks older than the retention window are evicted on each write.
/// Draining (full read-out followed by logical emptying) happens only at
/// episode boundaries, after the producer has been redirected away - the
/// recording protocol, not a lock, is what keeps reads and writes from
/// overlapping.
pub struct CircularBuffer {
    inner: Mutex<VecDeque<(Instant, Vec<u8>)>>,
    retention: Duration,
    stats: CircularBufferStats,
}

/// Counters for buffer monitoring
#[derive(Debug, Default)]
pub struct CircularBufferStats {
    pub chunks_written: AtomicU64,
    pub chunks_evicted: AtomicU64,
    pub drains: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct CircularBufferStatsSnapshot {
    pub chunks_written: u64,
    pub chunks_evicted: u64,
    pub drains: u64,
}

impl CircularBuffer {
    pub fn new(retention: Duration) -> Self {
        debug!("Created circular buffer with retention {:?}", retention);
        Self {
            inner: Mutex::new(VecDeque::new()),
            retention,
            stats: CircularBufferStats::default(),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append one encoded chunk, evicting anything older than the retention
    /// window.
    pub fn write(&self, chunk: Vec<u8>, now: Instant) {
        let mut inner = self.inner.lock();
        inner.push_back((now, chunk));
        self.stats.chunks_written.fetch_add(1, Ordering::Relaxed);

        while let Some((ts, _)) = inner.front() {
            if now.saturating_duration_since(*ts) > self.retention {
                inner.pop_front();
                self.stats.chunks_evicted.fetch_add(1, Ordering::Relaxed);
                trace!("Evicted chunk past retention window");
            } else {
                break;
            }
        }
    }

    /// Read out the entire buffer contents oldest-first and empty it.
    ///
    /// The truncation is part of the same locked operation as the read-out, so
    /// the buffer is empty the moment the pre-roll bytes exist anywhere else.
    pub fn drain(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        let total: usize = inner.iter().map(|(_, c)| c.len()).sum();
        let mut out = Vec::with_capacity(total);
        for (_, chunk) in inner.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.stats.drains.fetch_add(1, Ordering::Relaxed);
        debug!("Drained {} bytes from circular buffer", out.len());
        out
    }

    /// Drain the buffer into a file at `path`.
    pub async fn flush_to_file(&self, path: &Path) -> Result<u64> {
        let bytes = self.drain();
        let len = bytes.len() as u64;
        tokio::fs::write(path, bytes).await?;
        debug!("Wrote {} pre-roll bytes to {}", len, path.display());
        Ok(len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len_bytes(&self) -> usize {
        self.inner.lock().iter().map(|(_, c)| c.len()).sum()
    }

    pub fn stats(&self) -> CircularBufferStatsSnapshot {
        CircularBufferStatsSnapshot {
            chunks_written: self.stats.chunks_written.load(Ordering::Relaxed),
            chunks_evicted: self.stats.chunks_evicted.load(Ordering::Relaxed),
            drains: self.stats.drains.load(Ordering::Relaxed),
        }
    }
}
