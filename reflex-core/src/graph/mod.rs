//! Dependency Graph
//!
//! The graph is distributed: every observed slot owns a [`Dep`] listing the
//! computation nodes that read it, and every computation node remembers the
//! sets it is in. There is no central node table.
//!
//! # Overview
//!
//! - A write to a slot notifies the slot's [`Dep`].
//! - Each notified node either marks itself stale (lazy), runs inline
//!   (sync), or enqueues itself on the [`scheduler`].
//! - The scheduler flushes the queue in creation order.

mod dep;
pub mod scheduler;

pub use dep::{Dep, DepId};
pub use scheduler::{batch, flush, flushed, has_pending, next_tick, SchedulerConfig, MAX_UPDATE_COUNT};
