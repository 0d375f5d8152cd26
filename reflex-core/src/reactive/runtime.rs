//! Reactive Runtime
//!
//! The runtime connects observed reads and writes to the dependency graph,
//! and owns the process-wide error handler.
//!
//! # How It Works
//!
//! 1. A tracked read (`track`) looks up, or creates, the dependency set for
//!    `(record, key)` and hands it to the running computation.
//!
//! 2. A write (`trigger`) selects the dependency sets the write can affect:
//!    a. the written key itself;
//!    b. the synthetic `Length` key when a sequence grows;
//!    c. the synthetic `Iterate` key when a mapping gains or loses a key, or
//!       when a keyed collection's value changes;
//!    d. every index at or past the new end when a sequence shrinks;
//!    e. every set on the record when it is cleared.
//!
//! 3. Subscribers of the selected sets are merged into one set, so a node
//!    reached through several keys updates once, and are updated in
//!    ascending ordinal order.
//!
//! # Error Handling
//!
//! Failures inside scheduled user computations cannot propagate to the code
//! that caused the write, so they are routed to a global handler. Without a
//! handler installed the error is logged.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::observable::{Record, RecordKind};
use super::{Reactive, ReactiveContext, SubscriberId};
use crate::error::RuntimeError;
use crate::value::Key;

/// The kind of read being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// The kind of write being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
    /// A sequence's length was set to the given value.
    SetLength(usize),
    /// Items from the given index onward moved.
    Shift(usize),
}

/// Attribute a read of `(target, key)` to the running computation.
pub(crate) fn track(target: &Record, op: TrackOp, key: &Key) {
    if !ReactiveContext::is_active() {
        return;
    }
    tracing::trace!(record = target.id(), %key, ?op, "track");
    let dep = target.dep_for(key);
    ReactiveContext::track_dependency(&dep);
}

/// Notify every computation that may observe a write to `(target, key)`.
pub(crate) fn trigger(target: &Record, op: TriggerOp, key: &Key) {
    let kind = target.kind();
    let deps = target.deps_where(|tracked| match op {
        TriggerOp::Clear => true,
        TriggerOp::SetLength(len) => match tracked {
            Key::Length => true,
            Key::Index(i) => *i >= len,
            _ => false,
        },
        TriggerOp::Shift(from) => match tracked {
            Key::Length => true,
            Key::Index(i) => *i >= from,
            _ => false,
        },
        TriggerOp::Add => {
            tracked == key
                || match kind {
                    RecordKind::Array => *tracked == Key::Length,
                    RecordKind::Object | RecordKind::Map => *tracked == Key::Iterate,
                }
        }
        TriggerOp::Delete => {
            tracked == key || (kind != RecordKind::Array && *tracked == Key::Iterate)
        }
        TriggerOp::Set => tracked == key || (kind == RecordKind::Map && *tracked == Key::Iterate),
    });
    if deps.is_empty() {
        return;
    }

    let mut subscribers: BTreeMap<SubscriberId, Arc<dyn Reactive>> = BTreeMap::new();
    for dep in &deps {
        for sub in dep.subscribers() {
            subscribers.entry(sub.subscriber_id()).or_insert(sub);
        }
    }

    tracing::trace!(
        record = target.id(),
        %key,
        ?op,
        subscribers = subscribers.len(),
        "trigger"
    );
    for sub in subscribers.into_values() {
        sub.update();
    }
}

// ---------------------------------------------------------------------------
// Error handler
// ---------------------------------------------------------------------------

/// Callback receiving errors from scheduled computations, with a short
/// description of where they happened.
pub type ErrorHandler = Arc<dyn Fn(&RuntimeError, &str) + Send + Sync>;

fn error_handler() -> &'static RwLock<Option<ErrorHandler>> {
    static HANDLER: OnceLock<RwLock<Option<ErrorHandler>>> = OnceLock::new();
    HANDLER.get_or_init(|| RwLock::new(None))
}

/// Install the global error handler, replacing any previous one.
pub fn set_error_handler(handler: impl Fn(&RuntimeError, &str) + Send + Sync + 'static) {
    *error_handler().write() = Some(Arc::new(handler));
}

/// Remove the global error handler.
pub fn clear_error_handler() {
    *error_handler().write() = None;
}

/// Route an error to the global handler, or log it.
pub fn handle_error(err: &RuntimeError, info: &str) {
    let handler = error_handler().read().clone();
    match handler {
        Some(handler) => handler(err, info),
        None => tracing::error!(error = %err, info, "unhandled error"),
    }
}
