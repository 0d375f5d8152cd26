//! Host operations.
//!
//! The reconciler never touches a display surface. It drives a
//! [`HostOps`] implementation, which owns the real nodes and hands out
//! opaque [`HostNode`] handles.
//!
//! [`RecordingHost`] keeps an in-memory node tree and logs every call. It
//! is what tests assert against, and it can dispatch synthetic events to
//! the listeners the reconciler installed.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use indexmap::IndexMap;

use super::event::{self, listener_event, DispatchOutcome, Event, EventInvoker, PathEntry};
use crate::value::Value;

/// Handle to a node owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostNode(pub u64);

impl HostNode {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// The operations the reconciler needs from a display surface.
pub trait HostOps {
    fn create_element(&mut self, tag: &str, namespaced: bool, custom: bool) -> HostNode;
    fn create_text(&mut self, text: &str) -> HostNode;
    fn create_comment(&mut self, text: &str) -> HostNode;

    /// Insert `node` into `parent` before `anchor`, or at the end. Moves the
    /// node if it is already attached.
    fn insert(&mut self, node: HostNode, parent: HostNode, anchor: Option<HostNode>);

    /// Detach `node` from its parent.
    fn remove(&mut self, node: HostNode);

    /// Replace the content of a text or comment node.
    fn set_text(&mut self, node: HostNode, text: &str);

    /// Replace every child of `el` with a single text.
    fn set_element_text(&mut self, el: HostNode, text: &str);

    /// Set an attribute, or remove it when `value` is `None`.
    fn patch_attribute(&mut self, el: HostNode, name: &str, value: Option<&Value>);
    fn patch_property(&mut self, el: HostNode, name: &str, value: Option<&Value>);
    fn patch_class(&mut self, el: HostNode, class: Option<&str>);
    fn patch_style(&mut self, el: HostNode, name: &str, value: Option<&str>);

    /// Bind the invoker for a listener key, or unbind it.
    fn patch_event(&mut self, el: HostNode, key: &str, invoker: Option<&Arc<EventInvoker>>);

    fn parent_node(&self, node: HostNode) -> Option<HostNode>;
    fn next_sibling(&self, node: HostNode) -> Option<HostNode>;
}

/// One recorded host call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    CreateElement { node: HostNode, tag: String },
    CreateText { node: HostNode, text: String },
    CreateComment { node: HostNode, text: String },
    Insert {
        node: HostNode,
        parent: HostNode,
        anchor: Option<HostNode>,
    },
    Remove { node: HostNode },
    SetText { node: HostNode, text: String },
    SetElementText { node: HostNode, text: String },
    PatchAttribute {
        node: HostNode,
        name: String,
        value: Option<String>,
    },
    PatchProperty {
        node: HostNode,
        name: String,
        value: Option<Value>,
    },
    PatchClass { node: HostNode, class: Option<String> },
    PatchStyle {
        node: HostNode,
        name: String,
        value: Option<String>,
    },
    PatchEvent { node: HostNode, key: String, bound: bool },
}

impl HostOp {
    /// Whether this op creates a node.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            HostOp::CreateElement { .. } | HostOp::CreateText { .. } | HostOp::CreateComment { .. }
        )
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element { tag: String, namespaced: bool },
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct NodeRecord {
    kind: NodeKind,
    parent: Option<HostNode>,
    children: Vec<HostNode>,
    attrs: IndexMap<String, String>,
    props: IndexMap<String, Value>,
    class: Option<String>,
    style: IndexMap<String, String>,
    listeners: IndexMap<String, Arc<EventInvoker>>,
}

impl NodeRecord {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attrs: IndexMap::new(),
            props: IndexMap::new(),
            class: None,
            style: IndexMap::new(),
            listeners: IndexMap::new(),
        }
    }
}

/// An in-memory host that records every operation.
#[derive(Debug, Default)]
pub struct RecordingHost {
    nodes: HashMap<HostNode, NodeRecord>,
    next_id: u64,
    ops: Vec<HostOp>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, kind: NodeKind) -> HostNode {
        self.next_id += 1;
        let node = HostNode(self.next_id);
        self.nodes.insert(node, NodeRecord::new(kind));
        node
    }

    /// A detached container element to mount into. Not recorded.
    pub fn create_root(&mut self, tag: &str) -> HostNode {
        self.alloc(NodeKind::Element {
            tag: tag.to_string(),
            namespaced: false,
        })
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn children(&self, node: HostNode) -> Vec<HostNode> {
        self.nodes.get(&node).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn tag(&self, node: HostNode) -> Option<&str> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn is_namespaced(&self, node: HostNode) -> bool {
        matches!(
            self.nodes.get(&node).map(|n| &n.kind),
            Some(NodeKind::Element { namespaced: true, .. })
        )
    }

    /// Concatenated text of `node` and its descendants.
    pub fn text_content(&self, node: HostNode) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: HostNode, out: &mut String) {
        let Some(record) = self.nodes.get(&node) else { return };
        match &record.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(_) => {}
            NodeKind::Element { .. } => {
                for child in &record.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Markup for the children of `node`. Empty text nodes (fragment
    /// anchors) print nothing.
    pub fn inner_html(&self, node: HostNode) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.write_html(child, &mut out);
        }
        out
    }

    /// Markup for `node` itself.
    pub fn to_html(&self, node: HostNode) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: HostNode, out: &mut String) {
        let Some(record) = self.nodes.get(&node) else { return };
        match &record.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(text) => {
                let _ = write!(out, "<!--{text}-->");
            }
            NodeKind::Element { tag, .. } => {
                let _ = write!(out, "<{tag}");
                if let Some(class) = &record.class {
                    let _ = write!(out, " class=\"{class}\"");
                }
                if !record.style.is_empty() {
                    let style: Vec<String> = record.style.iter().map(|(k, v)| format!("{k}: {v};")).collect();
                    let _ = write!(out, " style=\"{}\"", style.join(" "));
                }
                for (name, value) in &record.attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for child in &record.children {
                    self.write_html(*child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    pub fn attribute(&self, node: HostNode, name: &str) -> Option<String> {
        self.nodes.get(&node)?.attrs.get(name).cloned()
    }

    pub fn property(&self, node: HostNode, name: &str) -> Option<Value> {
        self.nodes.get(&node)?.props.get(name).cloned()
    }

    pub fn class(&self, node: HostNode) -> Option<String> {
        self.nodes.get(&node)?.class.clone()
    }

    pub fn style(&self, node: HostNode, name: &str) -> Option<String> {
        self.nodes.get(&node)?.style.get(name).cloned()
    }

    pub fn listener_keys(&self, node: HostNode) -> Vec<String> {
        self.nodes
            .get(&node)
            .map(|n| n.listeners.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every element below `root` with the given tag, in document order.
    pub fn find_by_tag(&self, root: HostNode, tag: &str) -> Vec<HostNode> {
        let mut found = Vec::new();
        self.walk(root, &mut |node, record| {
            if matches!(&record.kind, NodeKind::Element { tag: t, .. } if t == tag) {
                found.push(node);
            }
        });
        found
    }

    fn walk(&self, node: HostNode, visit: &mut impl FnMut(HostNode, &NodeRecord)) {
        let Some(record) = self.nodes.get(&node) else { return };
        for child in &record.children {
            if let Some(child_record) = self.nodes.get(child) {
                visit(*child, child_record);
            }
            self.walk(*child, visit);
        }
    }

    fn detach(&mut self, node: HostNode) {
        let parent = self.nodes.get_mut(&node).and_then(|n| n.parent.take());
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != node);
        }
    }

    fn fill_text(&mut self, el: HostNode, text: &str) {
        for child in self.children(el) {
            self.detach(child);
        }
        if text.is_empty() {
            return;
        }
        let child = self.alloc(NodeKind::Text(text.to_string()));
        if let Some(record) = self.nodes.get_mut(&child) {
            record.parent = Some(el);
        }
        if let Some(record) = self.nodes.get_mut(&el) {
            record.children.push(child);
        }
    }

    /// The listeners an event at `target` reaches, in invocation order:
    /// capturing listeners from the root down, then bubbling listeners
    /// from the target up.
    pub fn event_path(&self, target: HostNode, event: &Event) -> Vec<PathEntry> {
        let mut ancestry = Vec::new();
        let mut current = Some(target);
        while let Some(node) = current {
            ancestry.push(node);
            current = self.nodes.get(&node).and_then(|n| n.parent);
        }

        let target_value = self.target_value(target, event);
        let mut path = Vec::new();
        let collect = |node: HostNode, capture: bool, path: &mut Vec<PathEntry>| {
            let Some(record) = self.nodes.get(&node) else { return };
            for (key, invoker) in &record.listeners {
                if listener_event(key) == event.kind && invoker.flags().capture == capture {
                    path.push(PathEntry {
                        node,
                        invoker: invoker.clone(),
                        current_target: event::target_value(node, None, None),
                        target: target_value.clone(),
                    });
                }
            }
        };
        for node in ancestry.iter().rev() {
            collect(*node, true, &mut path);
        }
        for node in &ancestry {
            collect(*node, false, &mut path);
        }
        path
    }

    fn target_value(&self, target: HostNode, event: &Event) -> Value {
        let props = self.nodes.get(&target).map(|n| &n.props);
        let value = event
            .value
            .clone()
            .or_else(|| props.and_then(|p| p.get("value").cloned()));
        let checked = event
            .checked
            .or_else(|| props.and_then(|p| p.get("checked")).map(Value::is_truthy));
        event::target_value(target, value, checked)
    }

    /// Fire `event` at `target`.
    pub fn dispatch(&self, target: HostNode, event: &Event) -> DispatchOutcome {
        event::dispatch(&self.event_path(target, event), event)
    }
}

impl HostOps for RecordingHost {
    fn create_element(&mut self, tag: &str, namespaced: bool, _custom: bool) -> HostNode {
        let node = self.alloc(NodeKind::Element {
            tag: tag.to_string(),
            namespaced,
        });
        self.ops.push(HostOp::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    fn create_text(&mut self, text: &str) -> HostNode {
        let node = self.alloc(NodeKind::Text(text.to_string()));
        self.ops.push(HostOp::CreateText {
            node,
            text: text.to_string(),
        });
        node
    }

    fn create_comment(&mut self, text: &str) -> HostNode {
        let node = self.alloc(NodeKind::Comment(text.to_string()));
        self.ops.push(HostOp::CreateComment {
            node,
            text: text.to_string(),
        });
        node
    }

    fn insert(&mut self, node: HostNode, parent: HostNode, anchor: Option<HostNode>) {
        self.ops.push(HostOp::Insert { node, parent, anchor });
        self.detach(node);
        let Some(parent_record) = self.nodes.get_mut(&parent) else { return };
        let position = anchor
            .and_then(|a| parent_record.children.iter().position(|c| *c == a))
            .unwrap_or(parent_record.children.len());
        parent_record.children.insert(position, node);
        if let Some(record) = self.nodes.get_mut(&node) {
            record.parent = Some(parent);
        }
    }

    fn remove(&mut self, node: HostNode) {
        self.ops.push(HostOp::Remove { node });
        self.detach(node);
    }

    fn set_text(&mut self, node: HostNode, text: &str) {
        self.ops.push(HostOp::SetText {
            node,
            text: text.to_string(),
        });
        if let Some(record) = self.nodes.get_mut(&node) {
            match &mut record.kind {
                NodeKind::Text(content) | NodeKind::Comment(content) => *content = text.to_string(),
                NodeKind::Element { .. } => {}
            }
        }
    }

    fn set_element_text(&mut self, el: HostNode, text: &str) {
        self.ops.push(HostOp::SetElementText {
            node: el,
            text: text.to_string(),
        });
        self.fill_text(el, text);
    }

    fn patch_attribute(&mut self, el: HostNode, name: &str, value: Option<&Value>) {
        let text = value.map(Value::to_js_string);
        self.ops.push(HostOp::PatchAttribute {
            node: el,
            name: name.to_string(),
            value: text.clone(),
        });
        if let Some(record) = self.nodes.get_mut(&el) {
            match text {
                Some(text) => {
                    record.attrs.insert(name.to_string(), text);
                }
                None => {
                    record.attrs.shift_remove(name);
                }
            }
        }
    }

    fn patch_property(&mut self, el: HostNode, name: &str, value: Option<&Value>) {
        self.ops.push(HostOp::PatchProperty {
            node: el,
            name: name.to_string(),
            value: value.cloned(),
        });
        if name == "textContent" {
            let text = value.map(Value::to_display_string).unwrap_or_default();
            self.fill_text(el, &text);
        }
        if let Some(record) = self.nodes.get_mut(&el) {
            match value {
                Some(value) => {
                    record.props.insert(name.to_string(), value.clone());
                }
                None => {
                    record.props.shift_remove(name);
                }
            }
        }
    }

    fn patch_class(&mut self, el: HostNode, class: Option<&str>) {
        self.ops.push(HostOp::PatchClass {
            node: el,
            class: class.map(str::to_string),
        });
        if let Some(record) = self.nodes.get_mut(&el) {
            record.class = class.filter(|c| !c.is_empty()).map(str::to_string);
        }
    }

    fn patch_style(&mut self, el: HostNode, name: &str, value: Option<&str>) {
        self.ops.push(HostOp::PatchStyle {
            node: el,
            name: name.to_string(),
            value: value.map(str::to_string),
        });
        if let Some(record) = self.nodes.get_mut(&el) {
            match value {
                Some(value) => {
                    record.style.insert(name.to_string(), value.to_string());
                }
                None => {
                    record.style.shift_remove(name);
                }
            }
        }
    }

    fn patch_event(&mut self, el: HostNode, key: &str, invoker: Option<&Arc<EventInvoker>>) {
        self.ops.push(HostOp::PatchEvent {
            node: el,
            key: key.to_string(),
            bound: invoker.is_some(),
        });
        if let Some(record) = self.nodes.get_mut(&el) {
            match invoker {
                Some(invoker) => {
                    record.listeners.insert(key.to_string(), invoker.clone());
                }
                None => {
                    record.listeners.shift_remove(key);
                }
            }
        }
    }

    fn parent_node(&self, node: HostNode) -> Option<HostNode> {
        self.nodes.get(&node)?.parent
    }

    fn next_sibling(&self, node: HostNode) -> Option<HostNode> {
        let parent = self.nodes.get(&node)?.parent?;
        let siblings = &self.nodes.get(&parent)?.children;
        let index = siblings.iter().position(|c| *c == node)?;
        siblings.get(index + 1).copied()
    }
}
