//! Render runtime.
//!
//! Turns a [`CompiledTemplate`](crate::compiler::CompiledTemplate) plus
//! state into virtual nodes and reconciles them onto a host.
//!
//! - `eval`: tree-walking evaluator for template expressions
//! - `interpreter`: walks the render IR, producing [`VNode`]s
//! - `normalize`: children flattening
//! - `patch`: the reconciler driving [`HostOps`]
//! - `mount`: binds a template and state to a render watcher

pub mod eval;
pub mod event;
pub mod helpers;
pub mod host;
pub mod interpreter;
pub mod mount;
pub mod normalize;
pub mod patch;
pub mod vnode;

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::value::Function;

pub use eval::Scope;
pub use event::{DispatchOutcome, Event, EventInvoker};
pub use helpers::StaticCache;
pub use host::{HostNode, HostOp, HostOps, RecordingHost};
pub use interpreter::{render, Slot, Slots};
pub use mount::{Mount, MountOptions};
pub use patch::{collect_refs, Reconciler, RefTarget};
pub use vnode::{PatchFlags, ShapeFlags, VKey, VNode, VNodeData, VNodeKind, VNodeRef};

/// Settings consulted while rendering and handling events.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Key-code overrides for key modifiers. An override also disables the
    /// key-name check for that alias.
    pub key_codes: BTreeMap<String, Vec<u32>>,
    /// Filters available to `value | name` pipes.
    pub filters: IndexMap<String, Function>,
    /// Functions templates can call by name when state has no such field.
    pub methods: IndexMap<String, Function>,
    /// Loop guard applied to this thread's scheduler on mount. `None`
    /// leaves the scheduler's current setting alone.
    pub max_update_count: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            key_codes: BTreeMap::new(),
            filters: IndexMap::new(),
            methods: IndexMap::new(),
            max_update_count: None,
        }
    }
}

impl RuntimeConfig {
    pub fn filter(mut self, name: impl Into<String>, filter: Function) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    pub fn method(mut self, name: impl Into<String>, method: Function) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn key_code(mut self, key: impl Into<String>, codes: Vec<u32>) -> Self {
        self.key_codes.insert(key.into(), codes);
        self
    }

    pub fn max_update_count(mut self, count: usize) -> Self {
        self.max_update_count = Some(count);
        self
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("key_codes", &self.key_codes)
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("max_update_count", &self.max_update_count)
            .finish()
    }
}
