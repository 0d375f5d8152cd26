//! Subscriber identity and the trait every computation node implements.
//!
//! A subscriber is anything that re-runs when the state it read changes:
//! watchers, computed values and render passes. Subscribers are ordered by
//! creation, which is what the scheduler relies on to run parents before
//! children.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique, monotonically increasing identifier for a subscriber.
///
/// The numeric value doubles as the subscriber's *ordinal*: a node created
/// later always has a larger id, so sorting by id gives creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw ordinal.
    pub fn ordinal(self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A computation node as seen by dependency sets and the scheduler.
///
/// Dependency sets hold subscribers weakly and call [`Reactive::update`] when
/// a tracked slot changes. The scheduler calls [`Reactive::run`] when it
/// drains its queue.
pub trait Reactive: Send + Sync {
    /// The subscriber's ordinal.
    fn subscriber_id(&self) -> SubscriberId;

    /// A dependency changed. Lazy nodes mark themselves stale, sync nodes run
    /// inline, everything else enqueues itself.
    fn update(&self);

    /// Re-run the computation (called by the scheduler).
    fn run(&self);

    /// Hook invoked right before the scheduler runs this node.
    fn before_run(&self) {}

    /// Whether the node still wants to run. Torn-down nodes return false.
    fn is_active(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn later_subscribers_sort_after_earlier_ones() {
        let parent = SubscriberId::new();
        let child = SubscriberId::new();

        assert!(parent < child);
        assert!(parent.ordinal() < child.ordinal());
    }
}
