use crate::detection::DangerTier;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-tier frame counts over a fixed bucket.
///
/// The bucket opens with the first recorded frame and is cleared by the
/// first frame arriving once `window` has elapsed.
#[derive(Debug)]
pub struct BurstWindow {
    window: Duration,
    opened_at: Option<Instant>,
    counts: HashMap<DangerTier, u32>,
}

impl BurstWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            opened_at: None,
            counts: HashMap::new(),
        }
    }

    /// Count one frame with the given max tier and return that tier's count
    /// in the current bucket
    pub fn record(&mut self, tier: DangerTier, now: Instant) -> u32 {
        match self.opened_at {
            Some(opened) if now.saturating_duration_since(opened) < self.window => {}
            _ => {
                self.counts.clear();
                self.opened_at = Some(now);
            }
        }

        let count = self.counts.entry(tier).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, tier: DangerTier) -> u32 {
        self.counts.get(&tier).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.counts.clear();
        self.opened_at = None;
    }
}
