//! Virtual nodes.
//!
//! A render pass produces an immutable tree of [`VNode`]s shared through
//! [`VNodeRef`]. Cached static subtrees are handed out again as the same
//! `Arc`, which lets the reconciler skip them by pointer identity. The host
//! node a vnode was mounted to lives in an interior slot so the next tree
//! can take it over while patching.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::event::EventInvoker;
use super::host::HostNode;
use crate::compiler::events::ListenerFlags;
use crate::value::{format_number, Function, Value};

bitflags! {
    /// What kind of node this is and what its children look like.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShapeFlags: u16 {
        const ELEMENT = 1;
        const FUNCTIONAL_COMPONENT = 1 << 1;
        const STATEFUL_COMPONENT = 1 << 2;
        const TEXT_CHILDREN = 1 << 3;
        const ARRAY_CHILDREN = 1 << 4;
        const SLOTS_CHILDREN = 1 << 5;
        const COMPONENT = Self::STATEFUL_COMPONENT.bits() | Self::FUNCTIONAL_COMPONENT.bits();
    }
}

bitflags! {
    /// Which parts of an element can differ between two renders.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PatchFlags: u16 {
        /// Dynamic text content.
        const TEXT = 1;
        const CLASS = 1 << 1;
        const STYLE = 1 << 2;
        /// Bound attributes or properties with fixed names.
        const PROPS = 1 << 3;
        /// Attribute names are computed; diff them all.
        const FULL_PROPS = 1 << 4;
        const HYDRATE_EVENTS = 1 << 5;
        /// Children come from a keyed list.
        const KEYED_FRAGMENT = 1 << 6;
        /// Children come from a list without keys: diff by index.
        const UNKEYED_FRAGMENT = 1 << 7;
        /// Refs or directives need a visit even with nothing else dynamic.
        const NEED_PATCH = 1 << 8;
        /// Slot content is computed.
        const DYNAMIC_SLOTS = 1 << 9;
    }
}

/// Identity of a node among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VKey {
    Text(Arc<str>),
    /// Numeric keys compare by bit pattern.
    Number(u64),
}

impl VKey {
    pub fn from_value(value: &Value) -> Option<VKey> {
        match value {
            Value::Null => None,
            Value::Number(n) => Some(VKey::Number(n.to_bits())),
            Value::String(s) => Some(VKey::Text(s.clone())),
            other => Some(VKey::Text(other.to_js_string().into())),
        }
    }

    pub fn text(key: impl Into<Arc<str>>) -> VKey {
        VKey::Text(key.into())
    }
}

impl fmt::Display for VKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VKey::Text(s) => f.write_str(s),
            VKey::Number(bits) => f.write_str(&format_number(f64::from_bits(*bits))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VNodeKind {
    Element(String),
    /// A component, mounted as a placeholder element named after it.
    Component(String),
    Text(String),
    Comment(String),
    /// Children rendered between two anchors.
    Fragment,
}

/// Handlers bound to one event name.
#[derive(Debug, Clone)]
pub struct Listener {
    pub event: String,
    pub handlers: Vec<Function>,
    pub flags: ListenerFlags,
}

/// A directive after its value was evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct VDirective {
    pub name: String,
    pub value: Value,
    pub arg: Option<String>,
    pub modifiers: Vec<String>,
    pub expression: Option<String>,
}

/// Component `v-model`: current value and the setter.
#[derive(Debug, Clone)]
pub struct VModel {
    pub value: Value,
    pub callback: Function,
    pub expression: String,
}

/// Evaluated element data.
#[derive(Debug, Clone, Default)]
pub struct VNodeData {
    pub class: Option<String>,
    pub style: IndexMap<String, String>,
    pub attrs: IndexMap<String, Value>,
    pub dom_props: IndexMap<String, Value>,
    /// Listeners bound on the host node, keyed by name plus flag prefix.
    pub on: IndexMap<String, Listener>,
    /// Component events: kept on the vnode, not bound to the host.
    pub component_on: IndexMap<String, Listener>,
    pub directives: Vec<VDirective>,
    pub ref_name: Option<String>,
    pub ref_in_for: bool,
    pub slot: Option<String>,
    pub model: Option<VModel>,
    pub pre: bool,
}

impl VNodeData {
    pub fn directive(&self, name: &str) -> Option<&VDirective> {
        self.directives.iter().find(|d| d.name == name)
    }

    /// Style as applied to the host: `v-show` with a falsy value adds
    /// `display: none`.
    pub fn effective_style(&self) -> IndexMap<String, String> {
        let mut style = self.style.clone();
        if let Some(show) = self.directive("show") {
            if !show.value.is_truthy() {
                style.insert("display".to_string(), "none".to_string());
            }
        }
        style
    }
}

/// One rendered unit.
pub struct VNode {
    pub kind: VNodeKind,
    pub key: Option<VKey>,
    pub shape: ShapeFlags,
    pub patch_flags: PatchFlags,
    pub data: VNodeData,
    pub children: Vec<VNodeRef>,
    /// Produced by a cached static render or `v-once`.
    pub is_static: bool,
    pub is_once: bool,
    pub(crate) el: Mutex<Option<HostNode>>,
    /// Closing anchor of a fragment.
    pub(crate) anchor: Mutex<Option<HostNode>>,
    pub(crate) invokers: Mutex<IndexMap<String, Arc<EventInvoker>>>,
}

pub type VNodeRef = Arc<VNode>;

impl VNode {
    fn with_kind(kind: VNodeKind, shape: ShapeFlags) -> VNode {
        VNode {
            kind,
            key: None,
            shape,
            patch_flags: PatchFlags::empty(),
            data: VNodeData::default(),
            children: Vec::new(),
            is_static: false,
            is_once: false,
            el: Mutex::new(None),
            anchor: Mutex::new(None),
            invokers: Mutex::new(IndexMap::new()),
        }
    }

    pub fn text(text: impl Into<String>) -> VNode {
        VNode::with_kind(VNodeKind::Text(text.into()), ShapeFlags::empty())
    }

    pub fn comment(text: impl Into<String>) -> VNode {
        VNode::with_kind(VNodeKind::Comment(text.into()), ShapeFlags::empty())
    }

    /// What `_e()` renders: an empty comment holding the position.
    pub fn empty() -> VNode {
        VNode::comment("")
    }

    pub fn element(tag: impl Into<String>, data: VNodeData, children: Vec<VNodeRef>) -> VNode {
        let mut node = VNode::with_kind(VNodeKind::Element(tag.into()), ShapeFlags::ELEMENT);
        node.data = data;
        node.set_children(children);
        node
    }

    pub fn component(tag: impl Into<String>, data: VNodeData, children: Vec<VNodeRef>) -> VNode {
        let mut node = VNode::with_kind(VNodeKind::Component(tag.into()), ShapeFlags::STATEFUL_COMPONENT);
        node.data = data;
        node.set_children(children);
        if !node.children.is_empty() {
            node.shape |= ShapeFlags::SLOTS_CHILDREN;
        }
        node
    }

    pub fn fragment(children: Vec<VNodeRef>) -> VNode {
        let mut node = VNode::with_kind(VNodeKind::Fragment, ShapeFlags::empty());
        node.children = children;
        node.shape |= ShapeFlags::ARRAY_CHILDREN;
        node
    }

    pub fn with_key(mut self, key: Option<VKey>) -> VNode {
        self.key = key;
        self
    }

    pub fn with_patch_flags(mut self, flags: PatchFlags) -> VNode {
        self.patch_flags |= flags;
        self
    }

    fn set_children(&mut self, children: Vec<VNodeRef>) {
        self.shape.remove(ShapeFlags::TEXT_CHILDREN | ShapeFlags::ARRAY_CHILDREN);
        match children.as_slice() {
            [] => {}
            [only] if only.is_text() => self.shape |= ShapeFlags::TEXT_CHILDREN,
            _ => self.shape |= ShapeFlags::ARRAY_CHILDREN,
        }
        self.children = children;
    }

    /// A copy with fresh host slots, marked as static under `key`.
    pub fn marked_static(&self, key: VKey, once: bool) -> VNode {
        VNode {
            kind: self.kind.clone(),
            key: Some(key),
            shape: self.shape,
            patch_flags: self.patch_flags,
            data: self.data.clone(),
            children: self.children.clone(),
            is_static: true,
            is_once: once,
            el: Mutex::new(None),
            anchor: Mutex::new(None),
            invokers: Mutex::new(IndexMap::new()),
        }
    }

    pub fn into_ref(self) -> VNodeRef {
        Arc::new(self)
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, VNodeKind::Text(_))
    }

    pub fn is_component(&self) -> bool {
        self.shape.intersects(ShapeFlags::COMPONENT)
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            VNodeKind::Element(tag) | VNodeKind::Component(tag) => Some(tag),
            _ => None,
        }
    }

    /// Text of a text or comment node.
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            VNodeKind::Text(text) | VNodeKind::Comment(text) => Some(text),
            _ => None,
        }
    }

    /// The host node this vnode is mounted to.
    pub fn el(&self) -> Option<HostNode> {
        *self.el.lock()
    }

    /// Same identity for the reconciler: equal keys and the same kind of
    /// node.
    pub fn same_as(&self, other: &VNode) -> bool {
        if self.key != other.key {
            return false;
        }
        match (&self.kind, &other.kind) {
            (VNodeKind::Element(a), VNodeKind::Element(b)) | (VNodeKind::Component(a), VNodeKind::Component(b)) => {
                a == b
            }
            (VNodeKind::Text(_), VNodeKind::Text(_))
            | (VNodeKind::Comment(_), VNodeKind::Comment(_))
            | (VNodeKind::Fragment, VNodeKind::Fragment) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("VNode");
        s.field("kind", &self.kind);
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        s.field("shape", &self.shape);
        if !self.patch_flags.is_empty() {
            s.field("patch_flags", &self.patch_flags);
        }
        if !self.children.is_empty() {
            s.field("children", &self.children);
        }
        s.finish()
    }
}

impl fmt::Display for VNode {
    /// Markup-like rendering, for logs and tests.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            VNodeKind::Text(text) => f.write_str(text),
            VNodeKind::Comment(text) => write!(f, "<!--{text}-->"),
            VNodeKind::Fragment => self.children.iter().try_for_each(|child| write!(f, "{child}")),
            VNodeKind::Element(tag) | VNodeKind::Component(tag) => {
                write!(f, "<{tag}")?;
                if let Some(class) = &self.data.class {
                    write!(f, " class=\"{class}\"")?;
                }
                for (name, value) in &self.data.attrs {
                    write!(f, " {name}=\"{}\"", value.to_js_string())?;
                }
                f.write_str(">")?;
                for child in &self.children {
                    write!(f, "{child}")?;
                }
                write!(f, "</{tag}>")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_text_child_sets_text_children() {
        let node = VNode::element("p", VNodeData::default(), vec![VNode::text("hi").into_ref()]);
        assert!(node.shape.contains(ShapeFlags::ELEMENT | ShapeFlags::TEXT_CHILDREN));
        assert!(!node.shape.contains(ShapeFlags::ARRAY_CHILDREN));

        let node = VNode::element(
            "p",
            VNodeData::default(),
            vec![VNode::text("a").into_ref(), VNode::element("b", VNodeData::default(), vec![]).into_ref()],
        );
        assert!(node.shape.contains(ShapeFlags::ARRAY_CHILDREN));
    }

    #[test]
    fn component_shape() {
        let node = VNode::component("my-item", VNodeData::default(), vec![VNode::text("slot").into_ref()]);
        assert!(node.is_component());
        assert!(node.shape.contains(ShapeFlags::SLOTS_CHILDREN));
    }

    #[test]
    fn sameness_needs_key_and_tag() {
        let a = VNode::element("li", VNodeData::default(), vec![]).with_key(VKey::from_value(&Value::from(1)));
        let b = VNode::element("li", VNodeData::default(), vec![]).with_key(VKey::from_value(&Value::from(1)));
        let c = VNode::element("li", VNodeData::default(), vec![]).with_key(VKey::from_value(&Value::from("1")));
        let d = VNode::element("p", VNodeData::default(), vec![]).with_key(VKey::from_value(&Value::from(1)));
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(!a.same_as(&d));
    }

    #[test]
    fn show_hides_through_style() {
        let mut data = VNodeData::default();
        data.style.insert("color".into(), "red".into());
        data.directives.push(VDirective {
            name: "show".into(),
            value: Value::Bool(false),
            arg: None,
            modifiers: vec![],
            expression: Some("visible".into()),
        });
        let style = data.effective_style();
        assert_eq!(style.get("display").map(String::as_str), Some("none"));
        assert_eq!(style.get("color").map(String::as_str), Some("red"));
    }

    #[test]
    fn display_as_markup() {
        let mut data = VNodeData::default();
        data.class = Some("big".into());
        let node = VNode::element("p", data, vec![VNode::text("x").into_ref(), VNode::empty().into_ref()]);
        assert_eq!(node.to_string(), "<p class=\"big\">x<!----></p>");
    }
}
