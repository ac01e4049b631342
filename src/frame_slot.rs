use crate::frame::FrameData;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::trace;

/// Single-slot, newest-wins frame buffer between a capture producer and a
/// camera worker. A frame that is overwritten before being taken is counted
/// as dropped.
#[derive(Debug)]
pub struct FrameSlot {
    slot: Mutex<Option<FrameData>>,
    notify: Notify,
    closed: AtomicBool,
    stats: FrameSlotStats,
}

/// Statistics for frame slot monitoring
#[derive(Debug, Default)]
pub struct FrameSlotStats {
    pub frames_pushed: AtomicU64,
    pub frames_taken: AtomicU64,
    pub frames_dropped: AtomicU64,
}

impl FrameSlotStats {
    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> FrameSlotStatsSnapshot {
        FrameSlotStatsSnapshot {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_taken: self.frames_taken.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSlotStatsSnapshot {
    pub frames_pushed: u64,
    pub frames_taken: u64,
    pub frames_dropped: u64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            stats: FrameSlotStats::default(),
        }
    }

    /// Store a frame, replacing any frame not yet taken
    pub fn push(&self, frame: FrameData) {
        let replaced = self.slot.lock().replace(frame);
        if let Some(old) = replaced {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropped unconsumed frame {}", old.id);
        }
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Take the current frame without waiting
    pub fn try_take(&self) -> Option<FrameData> {
        let frame = self.slot.lock().take();
        if frame.is_some() {
            self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Wait up to `timeout` for a frame. `None` on timeout or once the slot
    /// is closed and empty.
    pub async fn take(&self, timeout: Duration) -> Option<FrameData> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();

            if let Some(frame) = self.try_take() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_take();
            }
        }
    }

    /// Wake any waiting consumer and refuse to wait from now on
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> FrameSlotStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Notices a producer that stopped pushing into a slot
#[derive(Debug)]
pub struct StallWatchdog {
    timeout: Duration,
    last_pushed: u64,
    last_progress: Instant,
}

impl StallWatchdog {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_pushed: 0,
            last_progress: now,
        }
    }

    /// Feed the slot's current stats. Returns true once no push has been
    /// seen for `timeout`, then starts a fresh window.
    pub fn check(&mut self, stats: FrameSlotStatsSnapshot, now: Instant) -> bool {
        if stats.frames_pushed != self.last_pushed {
            self.last_pushed = stats.frames_pushed;
            self.last_progress = now;
            return false;
        }

        if now.saturating_duration_since(self.last_progress) >= self.timeout {
            self.last_progress = now;
            return true;
        }
        false
    }
}
