//! Watcher Implementation
//!
//! A watcher is a computation node: a getter that is re-evaluated when the
//! state it read changes, plus an optional callback receiving the new and
//! old values.
//!
//! # How Watchers Work
//!
//! 1. Each run pushes the watcher on the reactive context stack, evaluates
//!    the getter, and pops it. Every tracked read during the run subscribes
//!    the watcher to that slot's dependency set.
//!
//! 2. After the run, the watcher leaves every set it subscribed to last time
//!    but did not read this time.
//!
//! 3. When a dependency changes, the watcher's reaction depends on its mode:
//!    - lazy: mark stale; re-evaluate on next demand
//!    - sync: run inline
//!    - otherwise: enqueue on the scheduler
//!
//! 4. When a run produces a value that differs from the previous one (or is
//!    structured, or the watcher is deep), the callback is invoked.
//!
//! # Errors
//!
//! A direct [`Watcher::get`] returns the getter's error. Inside a scheduled
//! run the error cannot be returned to anyone, so it is routed to the global
//! error handler.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::runtime::handle_error;
use super::{Reactive, SubscriberId};
use crate::error::RuntimeResult;
use crate::graph::{scheduler, Dep};
use crate::value::{has_changed, Value};

/// The getter a watcher evaluates.
pub type Getter = Arc<dyn Fn() -> RuntimeResult<Value> + Send + Sync>;

/// Callback receiving `(new, old)` after a run that changed the value.
pub type WatchCallback = Arc<dyn Fn(&Value, &Value) -> RuntimeResult<()> + Send + Sync>;

/// Construction flags for a watcher.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Do not evaluate at construction; re-evaluate on demand.
    pub lazy: bool,
    /// Created by user code; errors are reported rather than propagated.
    pub user: bool,
    /// Run inline on change instead of queueing.
    pub sync: bool,
    /// Read every nested value of the result so any nested write triggers.
    pub deep: bool,
    /// Invoke the callback once with the initial value.
    pub immediate: bool,
    /// Shown in logs.
    pub label: Option<String>,
}

/// Lifecycle of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    /// Constructed lazily and never evaluated.
    Pending,
    /// Value is current.
    Active,
    /// A dependency changed since the last evaluation.
    Stale,
    /// Unsubscribed from everything; never runs again.
    TornDown,
}

struct WatcherState {
    status: WatcherStatus,
    value: Value,
    deps: Vec<Arc<Dep>>,
}

pub(crate) struct WatcherInner {
    id: SubscriberId,
    getter: Getter,
    callback: Option<WatchCallback>,
    before: Option<Arc<dyn Fn() + Send + Sync>>,
    options: WatchOptions,
    state: Mutex<WatcherState>,
    running: AtomicBool,
    this: Weak<WatcherInner>,
}

/// A computation node bound to a getter.
///
/// Cloning a `Watcher` clones the handle. The watcher is torn down when
/// [`Watcher::teardown`] is called; dropping the last handle also releases
/// it, since dependency sets only hold it weakly.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher from a getter, optional callback and options.
    ///
    /// Non-lazy watchers evaluate immediately to collect their initial
    /// dependencies.
    pub fn with_options(
        getter: impl Fn() -> RuntimeResult<Value> + Send + Sync + 'static,
        callback: Option<WatchCallback>,
        options: WatchOptions,
    ) -> Self {
        Self::build(Arc::new(getter), callback, None, options)
    }

    /// A plain queued watcher without a callback.
    pub fn new(getter: impl Fn() -> RuntimeResult<Value> + Send + Sync + 'static) -> Self {
        Self::with_options(getter, None, WatchOptions::default())
    }

    /// A watcher that re-runs inline as soon as a dependency changes.
    pub fn sync(getter: impl Fn() -> RuntimeResult<Value> + Send + Sync + 'static) -> Self {
        Self::with_options(
            getter,
            None,
            WatchOptions {
                sync: true,
                ..WatchOptions::default()
            },
        )
    }

    /// A stale-until-read watcher, the basis of computed values.
    pub fn lazy(getter: impl Fn() -> RuntimeResult<Value> + Send + Sync + 'static) -> Self {
        Self::with_options(
            getter,
            None,
            WatchOptions {
                lazy: true,
                ..WatchOptions::default()
            },
        )
    }

    pub(crate) fn build(
        getter: Getter,
        callback: Option<WatchCallback>,
        before: Option<Arc<dyn Fn() + Send + Sync>>,
        options: WatchOptions,
    ) -> Self {
        let lazy = options.lazy;
        let inner = Arc::new_cyclic(|this| WatcherInner {
            id: SubscriberId::new(),
            getter,
            callback,
            before,
            options,
            state: Mutex::new(WatcherState {
                status: WatcherStatus::Pending,
                value: Value::Null,
                deps: Vec::new(),
            }),
            running: AtomicBool::new(false),
            this: this.clone(),
        });

        if !lazy {
            inner.initialize();
            scheduler::flush_deferred();
        }
        tracing::debug!(
            watcher = %inner.id,
            label = inner.options.label.as_deref().unwrap_or(""),
            lazy,
            "watcher created"
        );
        Self { inner }
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// The last computed value.
    pub fn value(&self) -> Value {
        self.inner.state.lock().value.clone()
    }

    pub fn status(&self) -> WatcherStatus {
        self.inner.state.lock().status
    }

    /// Whether a lazy watcher needs re-evaluation.
    pub fn is_dirty(&self) -> bool {
        matches!(self.status(), WatcherStatus::Pending | WatcherStatus::Stale)
    }

    /// Number of dependency sets the watcher is subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.inner.state.lock().deps.len()
    }

    /// Evaluate the getter with tracking, without touching the cached value.
    pub fn get(&self) -> RuntimeResult<Value> {
        self.inner.get()
    }

    /// Re-evaluate and cache the value, clearing staleness.
    pub fn evaluate(&self) -> RuntimeResult<Value> {
        self.inner.evaluate()
    }

    /// Subscribe the running computation to everything this watcher depends
    /// on. Used by computed values so readers see through them.
    pub fn depend(&self) {
        let deps = self.inner.state.lock().deps.clone();
        for dep in &deps {
            ReactiveContext::track_dependency(dep);
        }
    }

    /// Re-run now, as the scheduler would.
    pub fn run(&self) {
        Reactive::run(&*self.inner);
    }

    /// Unsubscribe from every dependency set. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("deps", &self.dependency_count())
            .finish()
    }
}

impl WatcherInner {
    fn weak_self(&self) -> Weak<dyn Reactive> {
        self.this.clone()
    }

    fn is_torn_down(&self) -> bool {
        self.state.lock().status == WatcherStatus::TornDown
    }

    fn initialize(&self) {
        let value = match self.get() {
            Ok(value) => value,
            Err(err) => {
                handle_error(&err, self.context_label("getter"));
                Value::Null
            }
        };
        {
            let mut state = self.state.lock();
            if state.status != WatcherStatus::TornDown {
                state.status = WatcherStatus::Active;
            }
            state.value = value.clone();
        }
        if self.options.immediate {
            self.invoke_callback(&value, &Value::Null);
        }
    }

    fn context_label(&self, what: &'static str) -> &'static str {
        if self.options.user {
            match what {
                "getter" => "getter for watcher",
                _ => "callback for watcher",
            }
        } else {
            what
        }
    }

    fn get(&self) -> RuntimeResult<Value> {
        if self.is_torn_down() {
            return Ok(self.state.lock().value.clone());
        }

        self.running.store(true, Ordering::SeqCst);
        let ctx = ReactiveContext::enter(self.id, self.weak_self());
        let result = (self.getter)();
        if self.options.deep {
            if let Ok(value) = &result {
                traverse(value);
            }
        }
        let new_deps = ctx.finish();
        self.running.store(false, Ordering::SeqCst);

        self.cleanup_deps(new_deps);
        result
    }

    /// Leave sets that were not read again, and record the new ones.
    fn cleanup_deps(&self, new_deps: Vec<Arc<Dep>>) {
        let mut state = self.state.lock();
        if state.status == WatcherStatus::TornDown {
            drop(state);
            for dep in &new_deps {
                dep.remove_sub(self.id);
            }
            return;
        }
        let keep: HashSet<_> = new_deps.iter().map(|dep| dep.id()).collect();
        let old = std::mem::replace(&mut state.deps, new_deps);
        drop(state);

        for dep in old {
            if !keep.contains(&dep.id()) {
                dep.remove_sub(self.id);
            }
        }
    }

    fn evaluate(&self) -> RuntimeResult<Value> {
        let value = self.get()?;
        let mut state = self.state.lock();
        if state.status != WatcherStatus::TornDown {
            state.status = WatcherStatus::Active;
        }
        state.value = value.clone();
        Ok(value)
    }

    fn invoke_callback(&self, new: &Value, old: &Value) {
        let Some(callback) = &self.callback else {
            return;
        };
        if let Err(err) = callback(new, old) {
            handle_error(&err, self.context_label("callback"));
        }
    }

    fn run_once(&self) {
        if self.is_torn_down() {
            return;
        }
        let value = match self.get() {
            Ok(value) => value,
            Err(err) => {
                handle_error(&err, self.context_label("getter"));
                return;
            }
        };

        let old = {
            let mut state = self.state.lock();
            let changed = has_changed(&state.value, &value)
                || value.is_structured()
                || self.options.deep;
            if !changed {
                return;
            }
            std::mem::replace(&mut state.value, value.clone())
        };
        self.invoke_callback(&value, &old);
    }

    fn teardown(&self) {
        let deps = {
            let mut state = self.state.lock();
            if state.status == WatcherStatus::TornDown {
                return;
            }
            state.status = WatcherStatus::TornDown;
            std::mem::take(&mut state.deps)
        };
        for dep in deps {
            dep.remove_sub(self.id);
        }
        tracing::debug!(watcher = %self.id, "watcher torn down");
    }
}

impl Reactive for WatcherInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn update(&self) {
        if self.options.lazy {
            let mut state = self.state.lock();
            if state.status != WatcherStatus::TornDown {
                state.status = WatcherStatus::Stale;
            }
        } else if self.options.sync {
            if !self.running.load(Ordering::SeqCst) {
                Reactive::run(self);
            }
        } else if let Some(this) = self.this.upgrade() {
            scheduler::queue(this);
        }
    }

    fn run(&self) {
        if self.running.load(Ordering::SeqCst) {
            // Already on the stack: run again once the current pass ends.
            if let Some(this) = self.this.upgrade() {
                scheduler::queue(this);
            }
            return;
        }
        self.run_once();
        scheduler::flush_deferred();
    }

    fn before_run(&self) {
        if let Some(before) = &self.before {
            before();
        }
    }

    fn is_active(&self) -> bool {
        !self.is_torn_down()
    }
}

/// Read every nested slot of `value` so the running computation subscribes
/// to all of it. Cycles are visited once.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<u64>) {
    let Some(record) = value.as_record() else {
        return;
    };
    if record.is_frozen() || !seen.insert(record.id()) {
        return;
    }
    for (_, child) in value.entries() {
        traverse_inner(&child, seen);
    }
}

/// Watch `source` and call `callback(new, old)` after each change.
///
/// The watcher is a user watcher: errors from the source or the callback go
/// to the global error handler.
pub fn watch(
    source: impl Fn() -> RuntimeResult<Value> + Send + Sync + 'static,
    callback: impl Fn(&Value, &Value) -> RuntimeResult<()> + Send + Sync + 'static,
    options: WatchOptions,
) -> Watcher {
    let options = WatchOptions {
        user: true,
        ..options
    };
    Watcher::with_options(source, Some(Arc::new(callback)), options)
}
