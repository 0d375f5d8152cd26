//! Integration Tests for the Reactive System
//!
//! These tests verify that observed state, computed values, watchers and
//! the scheduler work together correctly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use reflex_core::error::SchedulerError;
use reflex_core::graph::{batch, flush, flushed, next_tick, scheduler, SchedulerConfig, MAX_UPDATE_COUNT};
use reflex_core::reactive::{
    is_reactive, reactive, readonly, to_raw, watch, Computed, Ref, WatchOptions, Watcher,
};
use reflex_core::value::Value;

fn counter() -> Value {
    reactive(Value::object([("count", Value::from(0)), ("other", Value::from(0))]))
}

/// Test that a computed value tracks the slots it reads.
#[test]
fn computed_tracks_record_slot() {
    let state = counter();

    let reader = state.clone();
    let doubled = Computed::new(move || reader.get("count").to_number() * 2.0);
    assert_eq!(doubled.get(), 0.0);

    state.as_observed().unwrap().set("count", 5);
    assert_eq!(doubled.get(), 10.0);
}

/// Test that writes notify exactly the computations that read the slot.
#[test]
fn track_and_trigger_are_symmetric() {
    let state = counter();
    let runs = Arc::new(AtomicI32::new(0));

    let reader = state.clone();
    let runs_clone = runs.clone();
    let _watcher = Watcher::sync(move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        Ok(reader.get("count"))
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let view = state.as_observed().unwrap();
    view.set("other", 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    view.set("count", 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // Same value: no change, no trigger.
    view.set("count", 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test that computed values cache until a dependency changes.
#[test]
fn computed_caches_expensive_computation() {
    let compute_count = Arc::new(AtomicI32::new(0));
    let compute_clone = compute_count.clone();
    let source = Ref::new(21);
    let reader = source.clone();

    let computed = Computed::new(move || {
        compute_clone.fetch_add(1, Ordering::SeqCst);
        reader.get() * 2
    });

    assert_eq!(computed.get(), 42);
    assert_eq!(computed.get(), 42);
    assert_eq!(computed.get(), 42);
    assert_eq!(compute_count.load(Ordering::SeqCst), 1);

    source.set(1);
    assert_eq!(computed.get(), 2);
    assert_eq!(compute_count.load(Ordering::SeqCst), 2);
}

/// Test that computed values can depend on other computed values.
#[test]
fn computed_depends_on_computed() {
    let source = Ref::new(2);
    let reader = source.clone();
    let squared = Arc::new(Computed::new(move || reader.get() * reader.get()));
    let inner = squared.clone();
    let plus_one = Computed::new(move || inner.get() + 1);

    assert_eq!(plus_one.get(), 5);
    source.set(3);
    assert_eq!(plus_one.get(), 10);
}

/// Test that queued watchers run parents before children, once each.
#[test]
fn flush_runs_parents_before_children() {
    let state = counter();
    let log = Arc::new(Mutex::new(Vec::new()));

    let make = |name: &'static str| {
        let reader = state.clone();
        let log = log.clone();
        Watcher::new(move || {
            log.lock().push(name);
            Ok(reader.get("count"))
        })
    };
    let parent = make("parent");
    let child = make("child");
    log.lock().clear();

    let view = state.as_observed().unwrap();
    view.set("count", 1);
    view.set("count", 2);
    assert!(log.lock().is_empty());

    assert_eq!(flush(), Ok(2));
    assert_eq!(*log.lock(), vec!["parent", "child"]);
    drop((parent, child));
}

/// Test that a watcher callback sees new and old values after a batch.
#[test]
fn batched_writes_coalesce() {
    let state = counter();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let reader = state.clone();
    let seen_clone = seen.clone();
    let _watcher = watch(
        move || Ok(reader.get("count")),
        move |new, old| {
            seen_clone.lock().push((new.to_number(), old.to_number()));
            Ok(())
        },
        WatchOptions::default(),
    );

    batch(|| {
        let view = state.as_observed().unwrap();
        view.set("count", 1);
        view.set("count", 2);
        view.set("count", 3);
    });
    assert_eq!(*seen.lock(), vec![(3.0, 0.0)]);
}

/// Test that wrapping is idempotent and shares identity.
#[test]
fn wrapping_is_idempotent() {
    let raw = Value::object([("nested", Value::object([("x", Value::from(1))]))]);
    let first = reactive(raw.clone());
    let second = reactive(raw.clone());
    assert!(first.same(&second));
    assert!(reactive(first.clone()).same(&first));
    assert!(to_raw(&first).same(&raw));

    // Nested records come back wrapped, with stable identity.
    let nested = first.get("nested");
    assert!(is_reactive(&nested));
    assert!(nested.same(&first.get("nested")));

    let view = readonly(raw.clone());
    assert!(!view.as_observed().unwrap().set("nested", 1));
    assert!(to_raw(&view).same(&raw));
}

/// Test that a watcher which keeps re-triggering itself is stopped.
#[test]
fn infinite_update_loop_is_reported() {
    scheduler::configure(SchedulerConfig {
        max_update_count: 20,
        sync: false,
    });

    let state = counter();
    let reader = state.clone();
    let _watcher = Watcher::new(move || {
        let view = reader.as_observed().unwrap();
        let next = view.get("count").to_number() + 1.0;
        view.set("count", next);
        Ok(Value::Null)
    });

    state.as_observed().unwrap().set("other", 1);
    state.as_observed().unwrap().set("count", 100);
    let result = flush();
    assert!(matches!(result, Err(SchedulerError::InfiniteLoop { iterations, .. }) if iterations > 20));

    scheduler::configure(SchedulerConfig::default());
}

/// Test that two watchers re-queueing each other trip the loop guard.
#[test]
fn mutual_update_loop_is_reported() {
    let state = reactive(Value::object([("a", Value::from(0)), ("b", Value::from(0))]));
    let make = |read: &'static str, write: &'static str| {
        let reader = state.clone();
        Watcher::new(move || {
            let view = reader.as_observed().unwrap();
            let next = view.get(read).to_number() + 1.0;
            view.set(write, next);
            Ok(Value::Null)
        })
    };
    let _ping = make("a", "b");
    let _pong = make("b", "a");

    let result = flush();
    assert!(
        matches!(result, Err(SchedulerError::InfiniteLoop { iterations, .. }) if iterations == MAX_UPDATE_COUNT + 1),
        "{result:?}"
    );
    assert!(!reflex_core::graph::has_pending());
}

/// Test that nodes queued mid-flush run in ordinal order and that nodes
/// torn down while still queued are skipped.
#[test]
fn flush_handles_nodes_queued_and_torn_down_mid_flush() {
    let state = reactive(Value::object([("tick", Value::from(0)), ("mid", Value::from(0))]));
    let log = Arc::new(Mutex::new(Vec::new()));
    let doomed_slot: Arc<Mutex<Option<Watcher>>> = Arc::new(Mutex::new(None));

    let parent = {
        let reader = state.clone();
        let log = log.clone();
        let doomed_slot = doomed_slot.clone();
        Watcher::new(move || {
            let view = reader.as_observed().unwrap();
            if view.get("tick").to_number() > 0.0 {
                log.lock().push("parent");
                if let Some(doomed) = doomed_slot.lock().as_ref() {
                    doomed.teardown();
                }
                view.set("mid", 1);
            }
            Ok(Value::Null)
        })
    };
    let make = |name: &'static str, key: &'static str| {
        let reader = state.clone();
        let log = log.clone();
        Watcher::new(move || {
            log.lock().push(name);
            Ok(reader.get(key))
        })
    };
    let mid = make("mid", "mid");
    *doomed_slot.lock() = Some(make("doomed", "tick"));
    let late = make("late", "tick");
    log.lock().clear();

    state.as_observed().unwrap().set("tick", 1);
    assert_eq!(flush(), Ok(3));
    assert_eq!(*log.lock(), vec!["parent", "mid", "late"]);
    drop((parent, mid, late));
}

/// Test that next-tick callbacks run after the queue drains.
#[test]
fn next_tick_runs_after_flush() {
    let state = counter();
    let order = Arc::new(Mutex::new(Vec::new()));

    let reader = state.clone();
    let log = order.clone();
    let _watcher = Watcher::new(move || {
        log.lock().push("watcher");
        Ok(reader.get("count"))
    });
    order.lock().clear();

    state.as_observed().unwrap().set("count", 1);
    let log = order.clone();
    next_tick(move || log.lock().push("tick"));
    flush().unwrap();
    assert_eq!(*order.lock(), vec!["watcher", "tick"]);
}

/// Test that the flushed future resolves once the next flush completes.
#[tokio::test]
async fn flushed_resolves_after_flush() {
    let state = counter();
    let reader = state.clone();
    let computed = Arc::new(AtomicI32::new(0));
    let sink = computed.clone();
    let _watcher = Watcher::new(move || {
        let value = reader.get("count");
        sink.store(value.to_number() as i32, Ordering::SeqCst);
        Ok(value)
    });

    state.as_observed().unwrap().set("count", 7);
    let done = flushed();
    flush().unwrap();
    done.await;
    assert_eq!(computed.load(Ordering::SeqCst), 7);
}
