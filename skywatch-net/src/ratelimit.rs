//! Host-wide request throttle
//!
//! Every SkyWatch process on a machine shares one feed budget. A well-known
//! file carries both the mutual exclusion (an exclusive OS lock) and the
//! timestamp of the last granted request. The holder sleeps out the rest of
//! the interval *while still holding the lock*, so requests are strictly
//! ordered across processes instead of merely non-overlapping.
//!
//! A crashed holder releases the lock when its descriptor closes. A crash
//! after stamping but before sending only makes the next waiter wait a
//! little longer than necessary.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace};

/// Default minimum spacing between upstream requests
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1050);

/// Default lock file name under the system temp directory
pub const DEFAULT_LOCK_FILE_NAME: &str = "skywatch-feed.lock";

/// Errors from the rate limiter
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Lock file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// Cross-process rate limiter backed by a lock file
#[derive(Debug, Clone)]
pub struct RateLimiter {
    path: PathBuf,
    min_interval: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(default_lock_path(), DEFAULT_MIN_INTERVAL)
    }
}

/// `<temp dir>/skywatch-feed.lock`
pub fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME)
}

impl RateLimiter {
    pub fn new(path: impl Into<PathBuf>, min_interval: Duration) -> Self {
        Self {
            path: path.into(),
            min_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until this caller may issue exactly one upstream request.
    ///
    /// Waits without a timeout for the lock. Returns the timestamp recorded
    /// for this request slot.
    pub fn acquire(&self) -> Result<DateTime<Utc>, RateLimitError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        file.lock()?;
        let stamped = self.wait_and_stamp(&mut file);
        file.unlock()?;

        stamped
    }

    /// [`RateLimiter::acquire`] on tokio's blocking pool
    pub async fn acquire_async(&self) -> Result<DateTime<Utc>, RateLimitError> {
        let limiter = self.clone();
        tokio::task::spawn_blocking(move || limiter.acquire())
            .await
            .map_err(|e| RateLimitError::Join(e.to_string()))?
    }

    fn wait_and_stamp(&self, file: &mut File) -> Result<DateTime<Utc>, RateLimitError> {
        let last_micros = read_stamp(file);
        let interval_micros = i64::try_from(self.min_interval.as_micros()).unwrap_or(i64::MAX);

        let elapsed = Utc::now().timestamp_micros().saturating_sub(last_micros).max(0);
        if elapsed < interval_micros {
            let remaining = Duration::from_micros((interval_micros - elapsed) as u64);
            trace!("Rate limiter sleeping {:?}", remaining);
            std::thread::sleep(remaining);
        }

        let now = Utc::now();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", now.timestamp_micros())?;
        file.flush()?;

        debug!("Rate limiter granted slot at {}", now.to_rfc3339());
        Ok(now)
    }
}

/// Stored timestamp in microseconds; anything unreadable counts as the epoch
fn read_stamp(file: &mut File) -> i64 {
    let mut bytes = Vec::new();
    if file.seek(SeekFrom::Start(0)).is_err() || file.read_to_end(&mut bytes).is_err() {
        return 0;
    }
    String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[test]
    fn test_first_acquire_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = RateLimiter::new(dir.path().join("feed.lock"), Duration::from_secs(5));

        let start = Instant::now();
        limiter.acquire().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_garbage_stamp_counts_as_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.lock");
        std::fs::write(&path, b"\xff\xfenot a number").unwrap();

        let limiter = RateLimiter::new(&path, Duration::from_secs(5));
        let start = Instant::now();
        let slot = limiter.acquire().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        let stored: i64 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(stored, slot.timestamp_micros());
    }

    #[test]
    fn test_extreme_stamp_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.lock");
        std::fs::write(&path, i64::MIN.to_string()).unwrap();

        let limiter = RateLimiter::new(&path, Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_back_to_back_acquires_are_spaced() {
        let dir = tempfile::tempdir().unwrap();
        let interval = Duration::from_millis(60);
        let limiter = RateLimiter::new(dir.path().join("feed.lock"), interval);

        let start = Instant::now();
        limiter.acquire().unwrap();
        limiter.acquire().unwrap();
        limiter.acquire().unwrap();
        assert!(start.elapsed() >= interval * 2);
    }

    #[test]
    fn test_concurrent_callers_get_spaced_slots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.lock");
        let interval = Duration::from_millis(40);
        let slots = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    // Separate limiters open separate descriptors, the same
                    // way separate processes would.
                    let limiter = RateLimiter::new(&path, interval);
                    for _ in 0..3 {
                        let slot = limiter.acquire().unwrap();
                        slots.lock().push(slot.timestamp_micros());
                    }
                });
            }
        });

        let mut slots = slots.into_inner();
        slots.sort_unstable();
        assert_eq!(slots.len(), 12);

        let min_gap = interval.as_micros() as i64;
        for pair in slots.windows(2) {
            assert!(
                pair[1] - pair[0] >= min_gap,
                "slots {} and {} are only {}us apart",
                pair[0],
                pair[1],
                pair[1] - pair[0]
            );
        }
    }

    #[tokio::test]
    async fn test_acquire_async() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = RateLimiter::new(dir.path().join("feed.lock"), Duration::ZERO);
        assert!(limiter.acquire_async().await.is_ok());
        assert!(limiter.path().exists());
    }
}
