//! Throttled progress reporting for streaming operations
//!
//! Codecs and transports see I/O chunks far more often than anyone wants to
//! hear about them. [`ProgressTracker`] accumulates byte counts and forwards a
//! [`ProgressSnapshot`] to the operation's callback at most once per interval,
//! plus one unconditional final report. Throttling only bounds event volume; it
//! never slows the I/O down.

use crate::types::ProgressSnapshot;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Callback receiving proposed progress snapshots
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

const NEVER: u64 = u64::MAX;

/// Lock-free rate limiter for progress notifications
///
/// Tracks the last emission as nanoseconds since creation. The first call
/// always passes.
pub struct ProgressThrottle {
    interval_nanos: u64,
    started: Instant,
    last_emit: AtomicU64,
}

impl ProgressThrottle {
    /// Allow at most one emission per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_nanos: interval.as_nanos().min(u64::MAX as u128 - 1) as u64,
            started: Instant::now(),
            last_emit: AtomicU64::new(NEVER),
        }
    }

    /// Whether an emission is due now; claims the slot if so
    pub fn try_acquire(&self) -> bool {
        let now = self.started.elapsed().as_nanos() as u64;
        let last = self.last_emit.load(Ordering::Acquire);
        if last != NEVER && now.saturating_sub(last) < self.interval_nanos {
            return false;
        }
        self.last_emit
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Accumulates processed bytes for one operation and reports throttled snapshots
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    throttle: ProgressThrottle,
    processed: u64,
    total: u64,
}

impl ProgressTracker {
    /// Start tracking against an estimated `total` bytes
    pub fn new(callback: Option<ProgressCallback>, interval: Duration, total: u64) -> Self {
        Self {
            callback,
            throttle: ProgressThrottle::new(interval),
            processed: 0,
            total,
        }
    }

    /// Bytes accounted so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Add `bytes` to the processed count and report if the throttle allows
    pub fn advance(&mut self, bytes: u64, current_file: Option<&str>) {
        self.processed = self.processed.saturating_add(bytes);
        self.report(current_file);
    }

    /// Replace the processed count (it never goes backwards)
    pub fn set_processed(&mut self, processed: u64, current_file: Option<&str>) {
        self.processed = self.processed.max(processed);
        self.report(current_file);
    }

    /// Report 100% regardless of the throttle
    pub fn finish(&mut self) {
        if let Some(callback) = &self.callback {
            callback(ProgressSnapshot::finished(self.processed, self.total));
        }
    }

    fn report(&self, current_file: Option<&str>) {
        let Some(callback) = &self.callback else {
            return;
        };
        if self.throttle.try_acquire() {
            callback(ProgressSnapshot::from_bytes(
                self.processed,
                self.total,
                current_file.map(str::to_string),
            ));
        }
    }
}

/// Reader adapter publishing how many bytes went through it
///
/// Used to measure progress on the compressed side of a decoder that owns the
/// underlying file.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    /// Wrap `inner`; the returned counter is shared with the reader
    pub fn new(inner: R) -> (Self, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        (
            Self {
                inner,
                count: count.clone(),
            },
            count,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}
