//! Suppresses rapid-fire retransmits of the same query.
//!
//! The OS stub resolver retransmits identical queries within tens of
//! milliseconds when a reply is slow, and DoH resolution adds latency. A
//! small, age-evicted ring of recently seen message IDs absorbs these
//! retransmits without multiplying upstream load.

/// Ring capacity. Must be a power of two so eviction is a cheap `& (N - 1)`.
const WINDOW_CAPACITY: usize = 64;

/// Single-task (not `Sync`) deduplication window keyed by 16-bit message ID.
///
/// Only ever touched by the dispatcher task, so no locking is needed.
pub struct Deduplicator {
    window: [Option<u16>; WINDOW_CAPACITY],
    next: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            window: [None; WINDOW_CAPACITY],
            next: 0,
        }
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` (without modifying the window) if `id` is currently
    /// present. Otherwise inserts `id`, evicting the oldest slot if full,
    /// and returns `false`.
    pub fn is_duplicate(&mut self, id: u16) -> bool {
        if self.window.iter().any(|slot| *slot == Some(id)) {
            return true;
        }

        self.window[self.next] = Some(id);
        self.next = (self.next + 1) % WINDOW_CAPACITY;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_is_not_a_duplicate() {
        let mut dedup = Deduplicator::new();
        assert!(!dedup.is_duplicate(0xABCD));
    }

    #[test]
    fn immediate_repeat_is_suppressed() {
        let mut dedup = Deduplicator::new();
        assert!(!dedup.is_duplicate(0xABCD));
        assert!(dedup.is_duplicate(0xABCD));
    }

    #[test]
    fn repeat_does_not_reinsert_or_change_eviction_order() {
        let mut dedup = Deduplicator::new();
        assert!(!dedup.is_duplicate(1));
        assert!(dedup.is_duplicate(1)); // duplicate check must not move the slot
        for id in 2..=WINDOW_CAPACITY as u16 {
            assert!(!dedup.is_duplicate(id));
        }
        // `1` was inserted first and should now have rolled off the ring.
        assert!(!dedup.is_duplicate(1));
    }

    #[test]
    fn full_rollover_makes_a_reseen_id_fresh_again() {
        let mut dedup = Deduplicator::new();
        for id in 0..WINDOW_CAPACITY as u16 {
            assert!(!dedup.is_duplicate(id));
        }
        // Window is exactly full; every ID above is still present.
        assert!(dedup.is_duplicate(0));

        // Push exactly `WINDOW_CAPACITY` more distinct IDs to fully roll over.
        for id in WINDOW_CAPACITY as u16..(2 * WINDOW_CAPACITY as u16) {
            assert!(!dedup.is_duplicate(id));
        }

        // `0` has now been evicted and is fresh.
        assert!(!dedup.is_duplicate(0));
    }
}
