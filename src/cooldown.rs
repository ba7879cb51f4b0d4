//! Cooldown tracker: per-subject, per-condition alert rate limiting.
//!
//! A continuing condition (the subject remains down, the room stays quiet)
//! produces an event on every producer tick. The tracker makes sure only the
//! first event inside each cooldown window creates an alert; the rest are
//! suppressed. It gates alert *creation* only, and is never an input to
//! danger classification or severity.
//!
//! State is process-local and intentionally non-durable: losing an entry on
//! restart allows at most one extra alert, never data loss. Memory is bounded
//! by a capacity cap with expiry purge plus oldest-entry eviction.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::model::EventType;

/// Default cooldown window: 2 minutes.
pub const DEFAULT_COOLDOWN_WINDOW_MS: i64 = 120_000;

/// Default cap on tracked keys.
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Keyed last-fired store with an atomic check-and-set.
///
/// The single mutex serializes all updates, so for any key exactly one
/// concurrent caller observes `true` within a window.
pub struct CooldownTracker {
    window: Duration,
    max_entries: usize,
    last_fired: Mutex<HashMap<(String, EventType), DateTime<Utc>>>,
}

impl CooldownTracker {
    /// Create a tracker with the given window (milliseconds) and entry cap.
    pub fn new(window_ms: i64, max_entries: usize) -> Self {
        Self {
            window: Duration::milliseconds(window_ms),
            max_entries: max_entries.max(1),
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Check-and-set: returns `true` and records `now` as the new last-fired
    /// time iff the key has no entry or its entry is at least one window old.
    /// Returns `false` otherwise, leaving the stored time untouched.
    pub fn should_fire(&self, subject_id: &str, event_type: EventType, now: DateTime<Utc>) -> bool {
        let mut map = self
            .last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let key = (subject_id.to_string(), event_type);

        if let Some(last) = map.get(&key) {
            if now - *last < self.window {
                return false;
            }
        }

        if !map.contains_key(&key) && map.len() >= self.max_entries {
            Self::evict(&mut map, self.window, now, self.max_entries);
        }

        map.insert(key, now);
        true
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the tracker holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; if the map is still at the cap, drop the oldest
    /// until there is room for one more key.
    fn evict(
        map: &mut HashMap<(String, EventType), DateTime<Utc>>,
        window: Duration,
        now: DateTime<Utc>,
        max_entries: usize,
    ) {
        map.retain(|_, last| now - *last < window);

        while map.len() >= max_entries {
            let oldest = map
                .iter()
                .min_by_key(|(_, last)| **last)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    map.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_WINDOW_MS, DEFAULT_MAX_ENTRIES)
    }
}
