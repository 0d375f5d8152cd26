//! Reactive Primitives
//!
//! This module implements observation and computation: observed records,
//! refs, computed values and watchers.
//!
//! # Concepts
//!
//! ## Observed records
//!
//! [`reactive`] wraps structured state in an [`Observable`] view. Reads
//! through the view are attributed to the running computation; writes
//! notify exactly the computations that read the written slot.
//!
//! ## Refs
//!
//! A [`Ref`] is a single observed slot.
//!
//! ## Computed values
//!
//! A [`Computed`] caches a derived value and recomputes it lazily, only when
//! read after a dependency changed.
//!
//! ## Watchers
//!
//! A [`Watcher`] re-runs a getter when its dependencies change, either
//! inline, lazily or through the batching scheduler.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local context stack. Each record keeps
//! its own per-key dependency sets; there is no global target map.

mod context;
mod memo;
mod observable;
mod runtime;
mod signal;
mod subscriber;
mod watcher;

pub use context::{untracked, ReactiveContext};
pub use memo::{Computed, MemoState};
pub use observable::{
    is_observed, is_reactive, is_readonly, is_shallow, mark_raw, reactive, readonly, shallow_reactive,
    shallow_readonly, to_raw, Observable, ObserveMode, Record, RecordKind,
};
pub use runtime::{clear_error_handler, handle_error, set_error_handler, ErrorHandler, TrackOp, TriggerOp};
pub use signal::Ref;
pub use subscriber::{Reactive, SubscriberId};
pub use watcher::{traverse, watch, Getter, WatchCallback, WatchOptions, Watcher, WatcherStatus};
