//! Ref Implementation
//!
//! A [`Ref`] is a single observed slot holding any value. It is the scalar
//! counterpart of an observed record.
//!
//! # How Refs Work
//!
//! 1. Reading a ref inside a running computation subscribes the computation
//!    to the ref's dependency set.
//!
//! 2. Writing a value that differs from the current one notifies every
//!    subscriber. Writing an equal value is a no-op.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock`; clones share the slot.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::Dep;
use crate::value::{has_changed, Value};

/// A reactive single-value container.
pub struct Ref<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    value: Arc<RwLock<T>>,
    dep: Arc<Dep>,
}

impl<T> Ref<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            dep: Dep::new(),
        }
    }

    /// Read the value, tracking the read.
    pub fn get(&self) -> T {
        self.dep.depend();
        self.value.read().clone()
    }

    /// Read the value without tracking.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value, notifying subscribers if it changed.
    pub fn set(&self, value: T) {
        {
            let mut current = self.value.write();
            if *current == value {
                return;
            }
            *current = value;
        }
        self.dep.notify();
    }

    /// Update the value in place.
    ///
    /// Subscribers are always notified, since the closure may mutate the
    /// value in ways equality cannot see.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.value.write());
        self.dep.notify();
    }

    /// Number of computations currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.dep.subscriber_count()
    }
}

impl Ref<Value> {
    /// Replace a dynamic value using identity-aware change detection, so
    /// NaN replacing NaN is not a change.
    pub fn set_value(&self, value: Value) {
        {
            let mut current = self.value.write();
            if !has_changed(&current, &value) {
                return;
            }
            *current = value;
        }
        self.dep.notify();
    }
}

impl<T> Clone for Ref<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            dep: self.dep.clone(),
        }
    }
}

impl<T> Debug for Ref<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("value", &*self.value.read())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
