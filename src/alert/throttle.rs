use super::types::AlertCategory;
use crate::registry::CameraId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A category, optionally narrowed to one camera
type CooldownKey = (AlertCategory, Option<CameraId>);
type CooldownState = HashMap<CooldownKey, Instant>;

/// Per-category cooldown gate shared by every camera worker.
///
/// `admit` performs its read-check-write under one lock, so two workers racing
/// on the same category can never both be admitted within a cooldown window.
/// `admit_scoped` keeps a separate window per camera within a category.
#[derive(Debug)]
pub struct AlertThrottle {
    cooldown: Duration,
    state: Mutex<CooldownState>,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admit the category if it never fired or its cooldown has elapsed.
    /// On admission `now` becomes the category's last firing time.
    pub fn admit(&self, category: AlertCategory, now: Instant) -> bool {
        self.admit_key((category, None), now)
    }

    /// Like `admit`, but the cooldown only applies to `camera_id`'s own
    /// previous firings in this category
    pub fn admit_scoped(&self, category: AlertCategory, camera_id: CameraId, now: Instant) -> bool {
        self.admit_key((category, Some(camera_id)), now)
    }

    fn admit_key(&self, key: CooldownKey, now: Instant) -> bool {
        let (category, _) = key;
        let mut state = self.state.lock();

        if let Some(last) = state.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.cooldown {
                trace!(
                    "Throttled {} alert ({:?} remaining)",
                    category,
                    self.cooldown - elapsed
                );
                return false;
            }
        }

        state.insert(key, now);
        debug!("Admitted {} alert", category);
        true
    }

    /// Most recent firing of the category in any scope
    pub fn last_fired(&self, category: AlertCategory) -> Option<Instant> {
        self.state
            .lock()
            .iter()
            .filter(|((kind, _), _)| *kind == category)
            .map(|(_, last)| *last)
            .max()
    }

    /// Time left before the category may fire again
    pub fn remaining(&self, category: AlertCategory, now: Instant) -> Duration {
        match self.last_fired(category) {
            Some(last) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn reset(&self, category: AlertCategory) {
        self.state.lock().retain(|(kind, _), _| *kind != category);
    }
}
