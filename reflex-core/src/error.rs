//! Error types shared across the runtime.
//!
//! Compile-time problems are *diagnostics* (see `compiler::errors`) and are
//! never returned as `Err`. The types here cover evaluation failures, the
//! scheduler's loop guard and compiled-artifact caching.

use thiserror::Error;

use crate::reactive::SubscriberId;

/// An error raised while evaluating a template expression, a watcher getter
/// or a render pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A value that is not a function was called.
    #[error("`{0}` is not a function")]
    NotCallable(String),

    /// A property was read from a value that has no properties.
    #[error("cannot read property `{property}` of {target}")]
    InvalidAccess { target: String, property: String },

    /// The left-hand side of an assignment is not assignable.
    #[error("invalid assignment target `{0}`")]
    InvalidAssignment(String),

    /// An expression failed to parse at compile time and was emitted as-is.
    #[error("invalid expression `{source_text}`: {reason}")]
    InvalidExpression { source_text: String, reason: String },

    /// A user-supplied callable reported a failure.
    #[error("{0}")]
    Thrown(String),

    /// A render pass could not produce a tree.
    #[error("render failed: {0}")]
    Render(String),

    /// The scheduler gave up on a runaway flush.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl RuntimeError {
    /// Shorthand for a user-level failure message.
    pub fn thrown(message: impl Into<String>) -> Self {
        RuntimeError::Thrown(message.into())
    }
}

/// Errors detected by the batching queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A computation node kept re-queueing itself within one flush.
    #[error("you may have an infinite update loop in watcher #{ordinal} ({iterations} iterations)")]
    InfiniteLoop {
        ordinal: SubscriberId,
        iterations: usize,
    },
}

/// Errors raised while (de)serializing compiled templates.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode compiled template: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode compiled template: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("failed to render compiled template as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used by evaluation code.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
