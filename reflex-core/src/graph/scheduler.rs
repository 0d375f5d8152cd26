//! Update Scheduler
//!
//! Asynchronous computation nodes do not re-run the moment a dependency
//! changes. They enqueue themselves here and run together when the queue is
//! flushed.
//!
//! # Algorithm
//!
//! 1. `queue` deduplicates by ordinal: a node already waiting is not added
//!    twice.
//! 2. `flush` sorts the queue by ordinal, so parents (created first) run
//!    before children and user watchers run before the render pass of the
//!    same component.
//! 3. A node enqueued while the flush is running is spliced into its sorted
//!    position after the node currently running, so it still runs in this
//!    flush.
//! 4. If any node runs more than `max_update_count` times within one flush,
//!    whether it re-queued itself or nodes keep re-queueing each other, the
//!    flush is abandoned and an [`SchedulerError::InfiniteLoop`] is reported.
//! 5. After the queue drains, next-tick callbacks run in registration order.
//!
//! There is no ambient event loop: a flush happens at the end of the
//! outermost [`batch`], on an explicit [`flush`], or immediately after each
//! enqueue when the scheduler is configured as synchronous. A synchronous
//! enqueue made while a computation is running flushes once that
//! computation returns.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::SchedulerError;
use crate::reactive::{handle_error, Reactive, ReactiveContext, SubscriberId};

/// Default cap on how often one node may run within a flush.
pub const MAX_UPDATE_COUNT: usize = 100;

/// Tunables for the thread's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_update_count: usize,
    /// Flush right after every enqueue that happens outside a batch.
    pub sync: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_update_count: MAX_UPDATE_COUNT,
            sync: false,
        }
    }
}

/// Queue state for one thread.
struct UpdateScheduler {
    queue: Vec<Arc<dyn Reactive>>,
    has: HashSet<SubscriberId>,
    circular: HashMap<SubscriberId, usize>,
    flushing: bool,
    /// Position of the next node to run during a flush.
    index: usize,
    batch_depth: usize,
    callbacks: Vec<Box<dyn FnOnce()>>,
    config: SchedulerConfig,
}

impl UpdateScheduler {
    fn new() -> Self {
        Self {
            queue: Vec::new(),
            has: HashSet::new(),
            circular: HashMap::new(),
            flushing: false,
            index: 0,
            batch_depth: 0,
            callbacks: Vec::new(),
            config: SchedulerConfig::default(),
        }
    }

    fn enqueue(&mut self, job: Arc<dyn Reactive>) -> bool {
        let id = job.subscriber_id();
        if !self.has.insert(id) {
            return false;
        }

        if self.flushing {
            let mut pos = self.queue.len();
            while pos > self.index && self.queue[pos - 1].subscriber_id() > id {
                pos -= 1;
            }
            self.queue.insert(pos, job);
        } else {
            self.queue.push(job);
        }
        true
    }

    fn reset(&mut self) -> Vec<Box<dyn FnOnce()>> {
        self.queue.clear();
        self.has.clear();
        self.circular.clear();
        self.index = 0;
        self.flushing = false;
        std::mem::take(&mut self.callbacks)
    }
}

thread_local! {
    static SCHEDULER: RefCell<UpdateScheduler> = RefCell::new(UpdateScheduler::new());
}

/// Replace this thread's scheduler configuration.
pub fn configure(config: SchedulerConfig) {
    SCHEDULER.with(|s| s.borrow_mut().config = config);
}

/// This thread's scheduler configuration.
pub fn config() -> SchedulerConfig {
    SCHEDULER.with(|s| s.borrow().config)
}

/// Enqueue a node for the next flush.
///
/// Returns false if the node was already waiting.
pub fn queue(job: Arc<dyn Reactive>) -> bool {
    let (added, flush_now) = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        let added = s.enqueue(job);
        let flush_now = added && s.config.sync && !s.flushing && s.batch_depth == 0;
        (added, flush_now)
    });
    // Never flush inside a running computation; `flush_deferred` picks it up.
    let flush_now = flush_now && !ReactiveContext::is_computing();

    if flush_now {
        // Failures are already reported through the error handler.
        let _ = flush();
    }
    added
}

/// In synchronous mode, flush what was queued while a computation was
/// running. Called once the outermost computation has finished.
pub(crate) fn flush_deferred() {
    let ready = SCHEDULER.with(|s| {
        let s = s.borrow();
        s.config.sync && !s.flushing && s.batch_depth == 0 && s.queue.len() > s.index
    });
    if ready && !ReactiveContext::is_computing() {
        let _ = flush();
    }
}

/// Number of nodes waiting to run.
pub fn pending() -> usize {
    SCHEDULER.with(|s| {
        let s = s.borrow();
        s.queue.len().saturating_sub(s.index)
    })
}

/// Whether any node is waiting to run.
pub fn has_pending() -> bool {
    pending() > 0
}

/// Whether a flush is in progress on this thread.
pub fn is_flushing() -> bool {
    SCHEDULER.with(|s| s.borrow().flushing)
}

/// Drain the queue, then run next-tick callbacks.
///
/// Returns the number of node runs. Calling `flush` from inside a flush is a
/// no-op that returns `Ok(0)`; the outer flush picks up anything enqueued.
pub fn flush() -> Result<usize, SchedulerError> {
    let started = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if s.flushing {
            return false;
        }
        s.flushing = true;
        s.index = 0;
        s.queue.sort_by_key(|job| job.subscriber_id());
        true
    });
    if !started {
        return Ok(0);
    }

    let mut runs = 0;
    let mut outcome = Ok(());

    loop {
        let next = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            let job = s.queue.get(s.index).cloned();
            if let Some(job) = &job {
                s.index += 1;
                s.has.remove(&job.subscriber_id());
            }
            job
        });
        let Some(job) = next else { break };

        let id = job.subscriber_id();
        if !job.is_active() {
            tracing::trace!(subscriber = %id, "skipping torn-down node");
            continue;
        }

        // Counts every run, not only self re-queues.
        let overflow = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            let max = s.config.max_update_count;
            let count = s.circular.entry(id).or_insert(0);
            *count += 1;
            (*count > max).then_some(*count)
        });

        if let Some(iterations) = overflow {
            let err = SchedulerError::InfiniteLoop {
                ordinal: id,
                iterations,
            };
            tracing::error!(subscriber = %id, iterations, "abandoning flush");
            handle_error(&err.clone().into(), "scheduler flush");
            outcome = Err(err);
            break;
        }

        job.before_run();
        job.run();
        runs += 1;
    }

    let callbacks = SCHEDULER.with(|s| s.borrow_mut().reset());
    tracing::debug!(runs, callbacks = callbacks.len(), "flush complete");
    for callback in callbacks {
        callback();
    }

    outcome.map(|()| runs)
}

/// Run `callback` after the next flush completes.
pub fn next_tick(callback: impl FnOnce() + 'static) {
    SCHEDULER.with(|s| s.borrow_mut().callbacks.push(Box::new(callback)));
}

/// A future that resolves once the next flush completes.
///
/// The waiter is registered when this function is called, not when the
/// future is first polled.
pub fn flushed() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
    });
    async move {
        let _ = rx.await;
    }
}

/// Run `f` with flushing deferred; flush once the outermost batch ends.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    struct Depth;

    impl Drop for Depth {
        fn drop(&mut self) {
            SCHEDULER.with(|s| s.borrow_mut().batch_depth -= 1);
        }
    }

    SCHEDULER.with(|s| s.borrow_mut().batch_depth += 1);
    let out = {
        let _depth = Depth;
        f()
    };

    let outermost = SCHEDULER.with(|s| s.borrow().batch_depth == 0);
    if outermost {
        let _ = flush();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Weak;

    struct Job {
        id: SubscriberId,
        log: Arc<Mutex<Vec<SubscriberId>>>,
        active: bool,
        requeue: bool,
        this: Weak<Job>,
    }

    impl Reactive for Job {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }
        fn update(&self) {}
        fn run(&self) {
            self.log.lock().push(self.id);
            if self.requeue {
                if let Some(this) = self.this.upgrade() {
                    queue(this);
                }
            }
        }
        fn is_active(&self) -> bool {
            self.active
        }
    }

    fn job(log: &Arc<Mutex<Vec<SubscriberId>>>, active: bool, requeue: bool) -> Arc<Job> {
        Arc::new_cyclic(|this| Job {
            id: SubscriberId::new(),
            log: log.clone(),
            active,
            requeue,
            this: this.clone(),
        })
    }

    #[test]
    fn flush_runs_in_ordinal_order_and_dedups() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent = job(&log, true, false);
        let child = job(&log, true, false);

        assert!(queue(child.clone()));
        assert!(queue(parent.clone()));
        assert!(!queue(child.clone()));
        assert_eq!(pending(), 2);

        assert_eq!(flush(), Ok(2));
        assert_eq!(*log.lock(), vec![parent.id, child.id]);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn torn_down_nodes_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dead = job(&log, false, false);

        queue(dead);
        assert_eq!(flush(), Ok(0));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn self_requeue_trips_loop_guard() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runaway = job(&log, true, true);

        queue(runaway.clone());
        let err = flush().unwrap_err();

        assert_eq!(
            err,
            SchedulerError::InfiniteLoop {
                ordinal: runaway.id,
                iterations: MAX_UPDATE_COUNT + 1,
            }
        );
        assert_eq!(pending(), 0);
    }

    #[test]
    fn next_tick_runs_after_queue_drains() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let node = job(&log, true, false);
        let seen = Arc::new(Mutex::new(0));

        let seen_clone = seen.clone();
        let log_clone = log.clone();
        next_tick(move || *seen_clone.lock() = log_clone.lock().len());
        queue(node);
        flush().unwrap();

        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn batch_flushes_once_at_the_end() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let node = job(&log, true, false);

        batch(|| {
            queue(node.clone());
            batch(|| queue(node.clone()));
            assert!(log.lock().is_empty());
        });

        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn flushed_resolves_after_flush() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let node = job(&log, true, false);

        let done = flushed();
        queue(node);
        flush().unwrap();
        done.await;

        assert_eq!(log.lock().len(), 1);
    }
}
