use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use bk_types::EntryId;

/// Tracks the last-add-confirmed watermark of one ledger handle.
///
/// Entries may complete in any order. The watermark only moves across a
/// contiguous run of completed ids; ids that finish ahead of a gap wait in an
/// ordered set until the gap closes. Readers see the watermark through an
/// atomic without taking the lock.
#[derive(Debug)]
pub struct ConfirmedTracker {
    published: AtomicI64,
    state: Mutex<TrackerState>,
}

#[derive(Debug)]
struct TrackerState {
    confirmed: EntryId,
    ahead: BTreeSet<EntryId>,
}

impl ConfirmedTracker {
    /// Start with `confirmed` as the watermark (`-1` for an empty ledger).
    pub fn new(confirmed: EntryId) -> Self {
        Self {
            published: AtomicI64::new(confirmed),
            state: Mutex::new(TrackerState {
                confirmed,
                ahead: BTreeSet::new(),
            }),
        }
    }

    pub fn last_add_confirmed(&self) -> EntryId {
        self.published.load(Ordering::Acquire)
    }

    /// Record `entry_id` as durably written; returns the new watermark.
    pub fn complete(&self, entry_id: EntryId) -> EntryId {
        let mut state = self.state.lock().expect("confirmed tracker lock poisoned");
        if entry_id > state.confirmed {
            state.ahead.insert(entry_id);
            while let Some(&next) = state.ahead.first() {
                if next != state.confirmed + 1 {
                    break;
                }
                state.ahead.pop_first();
                state.confirmed = next;
            }
            // Published under the lock so the atomic never moves backwards.
            self.published.store(state.confirmed, Ordering::Release);
        }
        state.confirmed
    }

    /// Completed ids still waiting behind a gap.
    pub fn waiting(&self) -> usize {
        self.state
            .lock()
            .expect("confirmed tracker lock poisoned")
            .ahead
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn in_order_completion_advances() {
        let tracker = ConfirmedTracker::new(-1);
        assert_eq!(tracker.complete(0), 0);
        assert_eq!(tracker.complete(1), 1);
        assert_eq!(tracker.last_add_confirmed(), 1);
        assert_eq!(tracker.waiting(), 0);
    }

    #[test]
    fn out_of_order_waits_for_gap() {
        let tracker = ConfirmedTracker::new(-1);
        assert_eq!(tracker.complete(1), -1);
        assert_eq!(tracker.complete(2), -1);
        assert_eq!(tracker.waiting(), 2);
        assert_eq!(tracker.complete(0), 2);
        assert_eq!(tracker.last_add_confirmed(), 2);
        assert_eq!(tracker.waiting(), 0);
    }

    #[test]
    fn duplicates_and_stale_ids_ignored() {
        let tracker = ConfirmedTracker::new(4);
        assert_eq!(tracker.complete(3), 4);
        assert_eq!(tracker.complete(5), 5);
        assert_eq!(tracker.complete(5), 5);
        assert_eq!(tracker.waiting(), 0);
    }

    #[test]
    fn permanent_gap_blocks_watermark() {
        let tracker = ConfirmedTracker::new(-1);
        tracker.complete(0);
        // Entry 1 never completes.
        tracker.complete(2);
        tracker.complete(3);
        assert_eq!(tracker.last_add_confirmed(), 0);
        assert_eq!(tracker.waiting(), 2);
    }

    proptest! {
        #[test]
        fn any_completion_order_confirms_everything(
            order in Just((0i64..40).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let tracker = ConfirmedTracker::new(-1);
            let mut last = -1;
            for id in order {
                let lac = tracker.complete(id);
                prop_assert!(lac >= last);
                last = lac;
            }
            prop_assert_eq!(tracker.last_add_confirmed(), 39);
            prop_assert_eq!(tracker.waiting(), 0);
        }
    }
}
