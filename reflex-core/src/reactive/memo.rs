//! Computed values.
//!
//! A [`Computed`] is a cached derived value built on a lazy watcher.
//!
//! # How Computed Values Work
//!
//! 1. Nothing runs at construction.
//!
//! 2. On access, a stale computed re-runs its function under tracking and
//!    caches the result.
//!
//! 3. When a dependency changes, the underlying watcher only marks itself
//!    stale. No recomputation happens until the next access.
//!
//! 4. When read inside another computation, the computed forwards its own
//!    dependencies to the reader, so the reader re-runs on the same writes.

use std::sync::Arc;

use parking_lot::Mutex;

use super::watcher::{WatchOptions, Watcher};
use super::ReactiveContext;
use crate::value::Value;

/// Freshness of a computed value's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up to date.
    Clean,
    /// A dependency changed, or the value was never computed.
    Dirty,
}

/// A cached derived value that recomputes on demand.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    watcher: Watcher,
    compute: Arc<dyn Fn() -> T + Send + Sync>,
    cache: Arc<Mutex<Option<T>>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed value. The function does not run until first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let compute: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(compute);
        let cache = Arc::new(Mutex::new(None));

        let getter_compute = compute.clone();
        let getter_cache = cache.clone();
        let watcher = Watcher::with_options(
            move || {
                let value = getter_compute();
                *getter_cache.lock() = Some(value);
                Ok(Value::Null)
            },
            None,
            WatchOptions {
                lazy: true,
                label: Some("computed".to_string()),
                ..WatchOptions::default()
            },
        );

        Self {
            watcher,
            compute,
            cache,
        }
    }

    /// Read the value, recomputing if stale.
    pub fn get(&self) -> T {
        if self.watcher.is_dirty() {
            // The getter cannot fail; it always returns Ok.
            let _ = self.watcher.evaluate();
        }
        if ReactiveContext::is_active() {
            self.watcher.depend();
        }

        let cached = self.cache.lock().clone();
        match cached {
            Some(value) => value,
            None => {
                let value = (self.compute)();
                *self.cache.lock() = Some(value.clone());
                value
            }
        }
    }

    pub fn state(&self) -> MemoState {
        if self.watcher.is_dirty() {
            MemoState::Dirty
        } else {
            MemoState::Clean
        }
    }

    /// Stop tracking. The last cached value stays readable.
    pub fn dispose(&self) {
        self.watcher.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{reactive, Ref};
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn computed_is_lazy_and_cached() {
        let count = Ref::new(2);
        let runs = Arc::new(AtomicI32::new(0));

        let source = count.clone();
        let runs_clone = runs.clone();
        let doubled = Computed::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            source.get() * 2
        });
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(doubled.state(), MemoState::Dirty);

        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.get(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(5);
        assert_eq!(doubled.state(), MemoState::Dirty);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(doubled.get(), 10);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn readers_see_through_computed() {
        let state = reactive(Value::object([("n", Value::from(1))]));
        let view = state.as_observed().cloned().unwrap();

        let source = view.clone();
        let label = Arc::new(Computed::new(move || format!("n={}", source.get("n"))));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let reader = label.clone();
        let seen_clone = seen.clone();
        let _watcher = Watcher::sync(move || {
            seen_clone.lock().push(reader.get());
            Ok(Value::Null)
        });

        view.set("n", 2);
        assert_eq!(*seen.lock(), vec!["n=1".to_string(), "n=2".to_string()]);
    }
}
