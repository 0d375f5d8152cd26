//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! When an observed slot is read, the read is attributed to the computation
//! on top of this stack.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a computation pushes an entry that
//! carries a weak handle to the subscriber plus the dependency sets it has
//! touched so far. Finishing the computation pops the entry and hands the
//! collected sets back so the caller can drop stale subscriptions.
//!
//! Untracked sections push an entry with no subscriber, which pauses
//! collection for everything nested inside them.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

use super::{Reactive, SubscriberId};
use crate::graph::{Dep, DepId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

struct ContextEntry {
    /// `None` for untracked sections.
    subscriber: Option<(SubscriberId, Weak<dyn Reactive>)>,
    /// Dependency sets read during this run, in first-read order.
    dependencies: Vec<Arc<Dep>>,
    seen: HashSet<DepId>,
}

/// Guard that pops the context when dropped.
///
/// Call [`ReactiveContext::finish`] to pop explicitly and collect the
/// dependency sets that were read.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, reads of observed slots subscribe the
    /// subscriber to the slot's dependency set.
    pub fn enter(subscriber_id: SubscriberId, subscriber: Weak<dyn Reactive>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber: Some((subscriber_id, subscriber)),
                dependencies: Vec::new(),
                seen: HashSet::new(),
            });
        });

        Self {
            subscriber_id: Some(subscriber_id),
            finished: false,
        }
    }

    /// Enter a section in which reads are not tracked.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber: None,
                dependencies: Vec::new(),
                seen: HashSet::new(),
            });
        });

        Self {
            subscriber_id: None,
            finished: false,
        }
    }

    /// Check if reads are currently being collected.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.subscriber.is_some())
        })
    }

    /// Whether any computation is running on this thread, including one
    /// paused by an untracked section.
    pub fn is_computing() -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().any(|entry| entry.subscriber.is_some()))
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.as_ref().map(|(id, _)| *id))
        })
    }

    /// Record a read of `dep` by the current computation.
    ///
    /// The subscription is installed immediately so that writes made later in
    /// the same run already reach the subscriber. Repeated reads of the same
    /// set within one run are ignored.
    pub fn track_dependency(dep: &Arc<Dep>) {
        let subscriber = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let entry = stack.last_mut()?;
            let (id, weak) = entry.subscriber.as_ref()?;
            if !entry.seen.insert(dep.id()) {
                return None;
            }
            let subscriber = (*id, weak.clone());
            entry.dependencies.push(dep.clone());
            Some(subscriber)
        });

        if let Some((id, weak)) = subscriber {
            dep.add_sub(id, weak);
        }
    }

    /// Pop this context and return the dependency sets read while it was on
    /// top of the stack.
    pub fn finish(mut self) -> Vec<Arc<Dep>> {
        self.finished = true;
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = &popped {
                debug_assert_eq!(
                    entry.subscriber.as_ref().map(|(id, _)| *id),
                    self.subscriber_id,
                    "ReactiveContext mismatch"
                );
            }
            popped
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Run `f` without attributing any reads to the current computation.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ReactiveContext::untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe(SubscriberId);

    impl Reactive for Probe {
        fn subscriber_id(&self) -> SubscriberId {
            self.0
        }
        fn update(&self) {}
        fn run(&self) {}
        fn is_active(&self) -> bool {
            true
        }
    }

    fn probe() -> (SubscriberId, Arc<dyn Reactive>) {
        let id = SubscriberId::new();
        (id, Arc::new(Probe(id)))
    }

    #[test]
    fn context_tracks_subscriber() {
        let (id, node) = probe();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(id, Arc::downgrade(&node));

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn finish_returns_each_dependency_once() {
        let (id, node) = probe();
        let a = Dep::new();
        let b = Dep::new();

        let ctx = ReactiveContext::enter(id, Arc::downgrade(&node));
        ReactiveContext::track_dependency(&a);
        ReactiveContext::track_dependency(&b);
        ReactiveContext::track_dependency(&a);
        let deps = ctx.finish();

        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].id(), a.id());
        assert!(a.has_sub(id));
        assert!(b.has_sub(id));
    }

    #[test]
    fn untracked_section_pauses_collection() {
        let (id, node) = probe();
        let dep = Dep::new();

        let ctx = ReactiveContext::enter(id, Arc::downgrade(&node));
        untracked(|| {
            assert!(!ReactiveContext::is_active());
            ReactiveContext::track_dependency(&dep);
        });
        assert!(ReactiveContext::is_active());
        let deps = ctx.finish();

        assert!(deps.is_empty());
        assert!(!dep.has_sub(id));
    }

    #[test]
    fn nested_contexts() {
        let (id1, node1) = probe();
        let (id2, node2) = probe();

        {
            let _ctx1 = ReactiveContext::enter(id1, Arc::downgrade(&node1));
            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(id2, Arc::downgrade(&node2));
                assert_eq!(ReactiveContext::current_subscriber(), Some(id2));
            }

            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
    }
}
