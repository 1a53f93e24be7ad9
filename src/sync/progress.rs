//! Sync progress state machine.

use crate::types::{BlockNumber, SyncProgress};

/// Tracks `Initial -> Syncing* -> Live` for one subscription.
///
/// Percentages never decrease and nothing follows `Live`.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: SyncProgress,
    tip: BlockNumber,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SyncProgress {
        self.state
    }

    /// Start catching up from `start` towards `tip`.
    ///
    /// Goes straight to `Live` when there is nothing to catch up on.
    pub fn begin(&mut self, start: BlockNumber, tip: BlockNumber) -> Option<SyncProgress> {
        if self.state.is_live() {
            return None;
        }

        self.tip = tip;
        let next = if start > tip {
            SyncProgress::Live
        } else {
            SyncProgress::Syncing {
                percentage: 0.0,
                current_block: start,
                latest_block: tip,
            }
        };
        self.transition(next)
    }

    /// Account for a fully processed block.
    ///
    /// Returns the new progress only when it changed.
    pub fn observe_block(&mut self, block: BlockNumber) -> Option<SyncProgress> {
        if self.state.is_live() {
            return None;
        }

        let next = if block >= self.tip {
            SyncProgress::Live
        } else {
            let percentage = (block.0 as f64 / self.tip.0 as f64 * 100.0)
                .max(self.state.percentage());
            SyncProgress::Syncing {
                percentage,
                current_block: block,
                latest_block: self.tip,
            }
        };
        self.transition(next)
    }

    fn transition(&mut self, next: SyncProgress) -> Option<SyncProgress> {
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_up_then_live() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.current(), SyncProgress::Initial);

        let started = tracker.begin(BlockNumber(0), BlockNumber(200)).unwrap();
        assert_eq!(started.percentage(), 0.0);

        let half = tracker.observe_block(BlockNumber(100)).unwrap();
        assert_eq!(half.percentage(), 50.0);

        assert_eq!(
            tracker.observe_block(BlockNumber(200)),
            Some(SyncProgress::Live)
        );
    }

    #[test]
    fn test_start_past_tip_is_live() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(
            tracker.begin(BlockNumber(11), BlockNumber(10)),
            Some(SyncProgress::Live)
        );
    }

    #[test]
    fn test_nothing_after_live() {
        let mut tracker = ProgressTracker::new();
        tracker.begin(BlockNumber(0), BlockNumber(5));
        tracker.observe_block(BlockNumber(5));

        assert_eq!(tracker.observe_block(BlockNumber(1)), None);
        assert_eq!(tracker.observe_block(BlockNumber(9)), None);
        assert_eq!(tracker.begin(BlockNumber(0), BlockNumber(100)), None);
        assert!(tracker.current().is_live());
    }

    #[test]
    fn test_percentage_never_decreases() {
        let mut tracker = ProgressTracker::new();
        tracker.begin(BlockNumber(0), BlockNumber(100));
        tracker.observe_block(BlockNumber(60));

        let later = tracker.observe_block(BlockNumber(30)).unwrap();
        assert_eq!(later.percentage(), 60.0);
    }

    #[test]
    fn test_zero_tip_goes_live_on_first_block() {
        let mut tracker = ProgressTracker::new();
        tracker.begin(BlockNumber(0), BlockNumber(0));
        assert_eq!(
            tracker.observe_block(BlockNumber(0)),
            Some(SyncProgress::Live)
        );
    }
}
