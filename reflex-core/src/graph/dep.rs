//! Dependency sets.
//!
//! A [`Dep`] belongs to exactly one observed slot (a key of a record, the
//! synthetic length/iterate keys, or a [`Ref`](crate::reactive::Ref)). It
//! holds the computation nodes that read the slot during their last run.
//!
//! The membership is kept symmetric by the computation side: a node that
//! stops reading a slot removes itself from the slot's set at the end of its
//! next run, and a torn-down node removes itself from every set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::reactive::{Reactive, ReactiveContext, SubscriberId};

/// Unique identifier for a dependency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    /// Generate a new unique dependency set ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for DepId {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of computation nodes subscribed to one observed slot.
pub struct Dep {
    id: DepId,
    /// Keyed by ordinal, so iteration is already in creation order.
    subs: Mutex<BTreeMap<SubscriberId, Weak<dyn Reactive>>>,
}

impl Dep {
    /// Create an empty dependency set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: DepId::new(),
            subs: Mutex::new(BTreeMap::new()),
        })
    }

    /// Get the set's ID.
    pub fn id(&self) -> DepId {
        self.id
    }

    /// Subscribe a node. Adding an existing member is a no-op.
    pub fn add_sub(&self, id: SubscriberId, subscriber: Weak<dyn Reactive>) {
        self.subs.lock().entry(id).or_insert(subscriber);
    }

    /// Unsubscribe a node. Removing a non-member is a no-op.
    pub fn remove_sub(&self, id: SubscriberId) {
        self.subs.lock().remove(&id);
    }

    /// Whether `id` is currently subscribed.
    pub fn has_sub(&self, id: SubscriberId) -> bool {
        self.subs.lock().contains_key(&id)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs
            .lock()
            .values()
            .filter(|sub| sub.strong_count() > 0)
            .count()
    }

    /// Attribute a read of this slot to the running computation, if any.
    pub fn depend(self: &Arc<Self>) {
        ReactiveContext::track_dependency(self);
    }

    /// Snapshot of the live subscribers in ascending ordinal order.
    ///
    /// Dead weak handles are pruned as a side effect.
    pub fn subscribers(&self) -> Vec<Arc<dyn Reactive>> {
        let mut subs = self.subs.lock();
        let mut live = Vec::with_capacity(subs.len());
        subs.retain(|_, weak| match weak.upgrade() {
            Some(sub) => {
                live.push(sub);
                true
            }
            None => false,
        });
        live
    }

    /// Tell every subscriber that the slot changed.
    ///
    /// The subscriber list is snapshotted first, so subscribers may freely
    /// (un)subscribe while being notified.
    pub fn notify(&self) {
        let subs = self.subscribers();
        tracing::trace!(dep = self.id.raw(), subscribers = subs.len(), "notify");
        for sub in subs {
            sub.update();
        }
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscribers", &self.subs.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    struct Counter {
        id: SubscriberId,
        updates: Arc<AtomicI32>,
        order: Arc<Mutex<Vec<SubscriberId>>>,
    }

    impl Reactive for Counter {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }
        fn update(&self) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(self.id);
        }
        fn run(&self) {}
        fn is_active(&self) -> bool {
            true
        }
    }

    fn counter(order: &Arc<Mutex<Vec<SubscriberId>>>) -> (Arc<Counter>, Arc<AtomicI32>) {
        let updates = Arc::new(AtomicI32::new(0));
        let node = Arc::new(Counter {
            id: SubscriberId::new(),
            updates: updates.clone(),
            order: order.clone(),
        });
        (node, updates)
    }

    fn weak(node: &Arc<Counter>) -> Weak<dyn Reactive> {
        let node: Arc<dyn Reactive> = node.clone();
        Arc::downgrade(&node)
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (node, _) = counter(&order);
        let dep = Dep::new();

        dep.add_sub(node.id, weak(&node));
        dep.add_sub(node.id, weak(&node));
        assert_eq!(dep.subscriber_count(), 1);

        dep.remove_sub(node.id);
        dep.remove_sub(node.id);
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn notify_runs_subscribers_in_ordinal_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, _) = counter(&order);
        let (second, _) = counter(&order);
        let dep = Dep::new();

        dep.add_sub(second.id, weak(&second));
        dep.add_sub(first.id, weak(&first));
        dep.notify();

        assert_eq!(*order.lock(), vec![first.id, second.id]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (node, updates) = counter(&order);
        let dep = Dep::new();

        dep.add_sub(node.id, weak(&node));
        dep.notify();
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        drop(node);
        dep.notify();
        assert_eq!(dep.subscriber_count(), 0);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }
}
