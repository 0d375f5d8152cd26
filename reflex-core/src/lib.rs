//! Reflex Core
//!
//! This crate provides the core runtime for the Reflex UI framework.
//! It implements:
//!
//! - Observed state with per-slot dependency tracking
//! - Watchers, computed values and a batching update scheduler
//! - A template compiler producing a serializable render IR
//! - A render interpreter and a keyed virtual-node reconciler
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the dynamic value model shared by every layer
//! - `reactive`: observed records, refs, computed values and watchers
//! - `graph`: dependency sets and the update scheduler
//! - `compiler`: template parsing, optimization and code generation
//! - `render`: expression evaluation, vnodes, patching and mounting
//! - `error`: error types
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reflex_core::compiler::{compile, CompilerOptions};
//! use reflex_core::reactive::reactive;
//! use reflex_core::render::{Mount, MountOptions, RecordingHost};
//! use reflex_core::value::Value;
//!
//! let template = Arc::new(compile("<p>{{ count }}</p>", &CompilerOptions::default()));
//! let state = reactive(Value::object([("count", Value::from(0))]));
//!
//! let mut host = RecordingHost::new();
//! let root = host.create_root("div");
//! let app = Mount::new(template, state.clone(), host, root, MountOptions::default());
//!
//! state.as_observed().unwrap().set("count", 5);
//! reflex_core::graph::flush()?;
//! assert_eq!(app.html(), "<p>5</p>");
//! ```

pub mod compiler;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod render;
pub mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use value::Value;
