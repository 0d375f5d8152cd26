//! Reconciler.
//!
//! Applies the difference between two vnode trees to a [`HostOps`]
//! surface. Keyed children go through the two-ended sync followed by a
//! longest-increasing-subsequence pass, so reordering a list moves only
//! the nodes that left the stable run.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use super::event::EventInvoker;
use super::host::{HostNode, HostOps};
use super::vnode::{PatchFlags, ShapeFlags, VKey, VNode, VNodeKind, VNodeRef};
use crate::value::Value;

const BOOLEAN_ATTRS: &[&str] = &[
    "autofocus", "checked", "disabled", "hidden", "multiple", "open", "readonly", "required", "selected",
];

/// What `ref="name"` points at after a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Single(HostNode),
    /// Refs inside `v-for`, in render order.
    Many(Vec<HostNode>),
}

pub struct Reconciler<'h> {
    host: &'h mut dyn HostOps,
    namespaced: bool,
}

impl<'h> Reconciler<'h> {
    pub fn new(host: &'h mut dyn HostOps) -> Self {
        Self { host, namespaced: false }
    }

    /// Patch `old` into `new`, or mount `new` when there is no old tree.
    pub fn patch(&mut self, old: Option<&VNodeRef>, new: &VNodeRef, container: HostNode, anchor: Option<HostNode>) {
        let Some(old) = old else {
            self.mount(new, container, anchor);
            return;
        };
        if Arc::ptr_eq(old, new) {
            return;
        }
        if !old.same_as(new) {
            let anchor = self.next_anchor(old).or(anchor);
            self.unmount(old);
            self.mount(new, container, anchor);
            return;
        }

        match &new.kind {
            VNodeKind::Text(text) | VNodeKind::Comment(text) => {
                let el = old.el();
                *new.el.lock() = el;
                if let Some(el) = el {
                    if old.text_content() != Some(text.as_str()) {
                        self.host.set_text(el, text);
                    }
                }
            }
            VNodeKind::Fragment => {
                let start = old.el();
                let end = *old.anchor.lock();
                *new.el.lock() = start;
                *new.anchor.lock() = end;
                let parent = start.and_then(|s| self.host.parent_node(s)).unwrap_or(container);
                self.patch_children(old, new, parent, end);
            }
            VNodeKind::Element(tag) | VNodeKind::Component(tag) => {
                let Some(el) = old.el() else {
                    self.mount(new, container, anchor);
                    return;
                };
                *new.el.lock() = Some(el);
                let outer = self.namespaced;
                self.namespaced = outer || is_namespace_root(tag);
                self.patch_data(Some(old.as_ref()), new, el);
                self.patch_children(old, new, el, None);
                self.namespaced = outer;
            }
        }
    }

    pub fn mount(&mut self, vnode: &VNodeRef, container: HostNode, anchor: Option<HostNode>) {
        match &vnode.kind {
            VNodeKind::Text(text) => {
                let el = self.host.create_text(text);
                *vnode.el.lock() = Some(el);
                self.host.insert(el, container, anchor);
            }
            VNodeKind::Comment(text) => {
                let el = self.host.create_comment(text);
                *vnode.el.lock() = Some(el);
                self.host.insert(el, container, anchor);
            }
            VNodeKind::Fragment => {
                let start = self.host.create_text("");
                let end = self.host.create_text("");
                *vnode.el.lock() = Some(start);
                *vnode.anchor.lock() = Some(end);
                self.host.insert(start, container, anchor);
                self.host.insert(end, container, anchor);
                for child in &vnode.children {
                    self.mount(child, container, Some(end));
                }
            }
            VNodeKind::Element(tag) | VNodeKind::Component(tag) => {
                let outer = self.namespaced;
                self.namespaced = outer || is_namespace_root(tag);
                let el = self.host.create_element(tag, self.namespaced, vnode.is_component());
                *vnode.el.lock() = Some(el);
                self.patch_data(None, vnode, el);
                if vnode.shape.contains(ShapeFlags::TEXT_CHILDREN) {
                    let text = vnode.children.first().and_then(|c| c.text_content()).unwrap_or_default();
                    self.host.set_element_text(el, text);
                } else {
                    for child in &vnode.children {
                        self.mount(child, el, None);
                    }
                }
                self.namespaced = outer;
                self.host.insert(el, container, anchor);
            }
        }
    }

    /// Detach `vnode` from the host.
    pub fn unmount(&mut self, vnode: &VNode) {
        match &vnode.kind {
            VNodeKind::Fragment => {
                if let Some(start) = vnode.el() {
                    self.host.remove(start);
                }
                for child in &vnode.children {
                    self.unmount(child);
                }
                if let Some(end) = *vnode.anchor.lock() {
                    self.host.remove(end);
                }
            }
            _ => {
                if let Some(el) = vnode.el() {
                    self.host.remove(el);
                }
            }
        }
    }

    /// The host node right after `vnode`.
    fn next_anchor(&self, vnode: &VNode) -> Option<HostNode> {
        let last = match vnode.kind {
            VNodeKind::Fragment => *vnode.anchor.lock(),
            _ => vnode.el(),
        };
        last.and_then(|node| self.host.next_sibling(node))
    }

    fn move_node(&mut self, vnode: &VNode, container: HostNode, anchor: Option<HostNode>) {
        match vnode.kind {
            VNodeKind::Fragment => {
                if let Some(start) = vnode.el() {
                    self.host.insert(start, container, anchor);
                }
                for child in &vnode.children {
                    self.move_node(child, container, anchor);
                }
                if let Some(end) = *vnode.anchor.lock() {
                    self.host.insert(end, container, anchor);
                }
            }
            _ => {
                if let Some(el) = vnode.el() {
                    self.host.insert(el, container, anchor);
                }
            }
        }
    }

    fn patch_data(&mut self, old: Option<&VNode>, new: &VNode, el: HostNode) {
        let old_data = old.map(|o| &o.data);

        let old_class = old_data.and_then(|d| d.class.as_deref());
        if old_class != new.data.class.as_deref() {
            self.host.patch_class(el, new.data.class.as_deref());
        }

        let old_style = old_data.map(|d| d.effective_style()).unwrap_or_default();
        let new_style = new.data.effective_style();
        for name in old_style.keys() {
            if !new_style.contains_key(name) {
                self.host.patch_style(el, name, None);
            }
        }
        for (name, value) in &new_style {
            if old_style.get(name) != Some(value) {
                self.host.patch_style(el, name, Some(value.as_str()));
            }
        }

        let empty = IndexMap::new();
        let old_attrs = old_data.map_or(&empty, |d| &d.attrs);
        for name in old_attrs.keys() {
            if !new.data.attrs.contains_key(name) {
                self.host.patch_attribute(el, name, None);
            }
        }
        for (name, value) in &new.data.attrs {
            if old_attrs.get(name).is_some_and(|old| old.same(value)) {
                continue;
            }
            match attribute_value(name, value) {
                Some(value) => self.host.patch_attribute(el, name, Some(&value)),
                None => self.host.patch_attribute(el, name, None),
            }
        }

        let old_props = old_data.map_or(&empty, |d| &d.dom_props);
        for name in old_props.keys() {
            if !new.data.dom_props.contains_key(name) {
                self.host.patch_property(el, name, None);
            }
        }
        for (name, value) in &new.data.dom_props {
            if old_props.get(name).is_some_and(|old| old.same(value)) {
                continue;
            }
            self.host.patch_property(el, name, Some(value));
        }

        self.patch_events(old, new, el);
    }

    fn patch_events(&mut self, old: Option<&VNode>, new: &VNode, el: HostNode) {
        let mut previous = match old {
            Some(old) => std::mem::take(&mut *old.invokers.lock()),
            None => IndexMap::new(),
        };
        let mut current: IndexMap<String, Arc<EventInvoker>> = IndexMap::new();
        for (key, listener) in &new.data.on {
            let invoker = match previous.shift_remove(key) {
                Some(invoker) => {
                    invoker.replace(listener.handlers.clone());
                    invoker
                }
                None => {
                    let invoker = EventInvoker::new(key.clone(), listener.handlers.clone(), listener.flags.clone());
                    self.host.patch_event(el, key, Some(&invoker));
                    invoker
                }
            };
            current.insert(key.clone(), invoker);
        }
        for key in previous.keys() {
            self.host.patch_event(el, key, None);
        }
        *new.invokers.lock() = current;
    }

    fn patch_children(&mut self, old: &VNode, new: &VNode, container: HostNode, anchor: Option<HostNode>) {
        let old_text = old.shape.contains(ShapeFlags::TEXT_CHILDREN);
        if new.shape.contains(ShapeFlags::TEXT_CHILDREN) {
            let text = new.children.first().and_then(|c| c.text_content()).unwrap_or_default();
            if old_text {
                if old.children.first().and_then(|c| c.text_content()) != Some(text) {
                    self.host.set_element_text(container, text);
                }
            } else {
                for child in &old.children {
                    self.unmount(child);
                }
                self.host.set_element_text(container, text);
            }
            return;
        }

        if old_text {
            self.host.set_element_text(container, "");
            for child in &new.children {
                self.mount(child, container, anchor);
            }
            return;
        }

        if new.patch_flags.contains(PatchFlags::UNKEYED_FRAGMENT) {
            self.patch_unkeyed(&old.children, &new.children, container, anchor);
        } else {
            self.patch_keyed(&old.children, &new.children, container, anchor);
        }
    }

    fn patch_unkeyed(&mut self, c1: &[VNodeRef], c2: &[VNodeRef], container: HostNode, anchor: Option<HostNode>) {
        let common = c1.len().min(c2.len());
        for i in 0..common {
            self.patch(Some(&c1[i]), &c2[i], container, anchor);
        }
        for old in &c1[common..] {
            self.unmount(old);
        }
        for new in &c2[common..] {
            self.mount(new, container, anchor);
        }
    }

    fn patch_keyed(&mut self, c1: &[VNodeRef], c2: &[VNodeRef], container: HostNode, parent_anchor: Option<HostNode>) {
        let mut i = 0usize;
        let mut e1 = c1.len() as isize - 1;
        let mut e2 = c2.len() as isize - 1;

        while (i as isize) <= e1 && (i as isize) <= e2 && c1[i].same_as(&c2[i]) {
            self.patch(Some(&c1[i]), &c2[i], container, None);
            i += 1;
        }
        while (i as isize) <= e1 && (i as isize) <= e2 && c1[e1 as usize].same_as(&c2[e2 as usize]) {
            self.patch(Some(&c1[e1 as usize]), &c2[e2 as usize], container, None);
            e1 -= 1;
            e2 -= 1;
        }

        let anchor_after = |index: usize| match c2.get(index + 1) {
            Some(next) => next.el(),
            None => parent_anchor,
        };

        if (i as isize) > e1 {
            if (i as isize) <= e2 {
                let anchor = anchor_after(e2 as usize);
                for new in &c2[i..=e2 as usize] {
                    self.mount(new, container, anchor);
                }
            }
            return;
        }
        if (i as isize) > e2 {
            for old in &c1[i..=e1 as usize] {
                self.unmount(old);
            }
            return;
        }

        let (s1, s2) = (i, i);
        let (e1, e2) = (e1 as usize, e2 as usize);
        let mut key_to_new: HashMap<&VKey, usize> = HashMap::new();
        for (j, node) in c2.iter().enumerate().take(e2 + 1).skip(s2) {
            if let Some(key) = &node.key {
                if key_to_new.insert(key, j).is_some() {
                    tracing::warn!(key = %key, "duplicate keys detected; this may cause an update error");
                }
            }
        }

        let to_patch = e2 - s2 + 1;
        let mut patched = 0;
        let mut moved = false;
        let mut max_new_index = 0;
        let mut new_to_old = vec![0usize; to_patch];

        for (old_index, old) in c1.iter().enumerate().take(e1 + 1).skip(s1) {
            if patched >= to_patch {
                self.unmount(old);
                continue;
            }
            let new_index = match &old.key {
                Some(key) => key_to_new.get(key).copied(),
                None => (s2..=e2).find(|&j| new_to_old[j - s2] == 0 && c2[j].key.is_none() && old.same_as(&c2[j])),
            };
            match new_index {
                Some(j) if old.same_as(&c2[j]) => {
                    new_to_old[j - s2] = old_index + 1;
                    if j >= max_new_index {
                        max_new_index = j;
                    } else {
                        moved = true;
                    }
                    self.patch(Some(old), &c2[j], container, None);
                    patched += 1;
                }
                _ => self.unmount(old),
            }
        }

        let stable = if moved { get_sequence(&new_to_old) } else { Vec::new() };
        let mut next_stable = stable.len();
        for k in (0..to_patch).rev() {
            let index = s2 + k;
            let anchor = anchor_after(index);
            if new_to_old[k] == 0 {
                self.mount(&c2[index], container, anchor);
            } else if moved {
                if next_stable > 0 && stable[next_stable - 1] == k {
                    next_stable -= 1;
                } else {
                    self.move_node(&c2[index], container, anchor);
                }
            }
        }
    }
}

fn is_namespace_root(tag: &str) -> bool {
    tag == "svg" || tag == "math"
}

/// The value written for an attribute, or `None` to remove it.
fn attribute_value(name: &str, value: &Value) -> Option<Value> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) if BOOLEAN_ATTRS.contains(&name) => Some(Value::from(name)),
        other => Some(other.clone()),
    }
}

/// Positions of a longest increasing subsequence of the non-zero entries.
fn get_sequence(arr: &[usize]) -> Vec<usize> {
    let mut predecessors = vec![0usize; arr.len()];
    let mut result: Vec<usize> = Vec::new();
    for (i, &value) in arr.iter().enumerate() {
        if value == 0 {
            continue;
        }
        if let Some(&last) = result.last() {
            if arr[last] < value {
                predecessors[i] = last;
                result.push(i);
                continue;
            }
        } else {
            result.push(i);
            continue;
        }
        let (mut lo, mut hi) = (0, result.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if arr[result[mid]] < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if value < arr[result[lo]] {
            if lo > 0 {
                predecessors[i] = result[lo - 1];
            }
            result[lo] = i;
        }
    }
    let mut len = result.len();
    if len > 0 {
        let mut cursor = result[len - 1];
        while len > 0 {
            len -= 1;
            result[len] = cursor;
            cursor = predecessors[cursor];
        }
    }
    result
}

/// Current ref bindings of a mounted tree.
pub fn collect_refs(root: &VNode) -> IndexMap<String, RefTarget> {
    let mut refs = IndexMap::new();
    walk_refs(root, &mut refs);
    refs
}

fn walk_refs(node: &VNode, refs: &mut IndexMap<String, RefTarget>) {
    if let (Some(name), Some(el)) = (&node.data.ref_name, node.el()) {
        if node.data.ref_in_for {
            match refs.entry(name.clone()).or_insert_with(|| RefTarget::Many(Vec::new())) {
                RefTarget::Many(nodes) => nodes.push(el),
                single => *single = RefTarget::Many(vec![el]),
            }
        } else {
            refs.insert(name.clone(), RefTarget::Single(el));
        }
    }
    for child in &node.children {
        walk_refs(child, refs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::host::{HostOp, RecordingHost};
    use crate::render::normalize::{list_flags, Rendered};
    use crate::render::vnode::VNodeData;

    fn li(key: &str) -> VNodeRef {
        VNode::element("li", VNodeData::default(), vec![VNode::text(key).into_ref()])
            .with_key(Some(VKey::text(key)))
            .into_ref()
    }

    fn list(keys: &[&str]) -> VNodeRef {
        let items: Vec<VNodeRef> = keys.iter().map(|k| li(k)).collect();
        let flags = list_flags(&items);
        VNode::element("ul", VNodeData::default(), items).with_patch_flags(flags).into_ref()
    }

    fn setup(tree: &VNodeRef) -> (RecordingHost, HostNode) {
        let mut host = RecordingHost::new();
        let root = host.create_root("div");
        Reconciler::new(&mut host).patch(None, tree, root, None);
        host.clear_ops();
        (host, root)
    }

    #[test]
    fn lis_positions() {
        assert_eq!(get_sequence(&[3, 1, 2]), vec![1, 2]);
        assert_eq!(get_sequence(&[1, 2, 3]), vec![0, 1, 2]);
        assert_eq!(get_sequence(&[2, 0, 1, 3]), vec![2, 3]);
        assert!(get_sequence(&[]).is_empty());
    }

    #[test]
    fn rotating_a_keyed_list_moves_one_node() {
        let old = list(&["a", "b", "c"]);
        let (mut host, root) = setup(&old);
        let new = list(&["c", "a", "b"]);
        Reconciler::new(&mut host).patch(Some(&old), &new, root, None);

        let ops = host.take_ops();
        assert_eq!(ops.len(), 1, "{ops:?}");
        assert!(matches!(ops[0], HostOp::Insert { .. }));
        assert_eq!(host.inner_html(root), "<ul><li>c</li><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn keyed_insert_and_remove() {
        let old = list(&["a", "b", "c", "d"]);
        let (mut host, root) = setup(&old);
        let new = list(&["a", "x", "c", "d"]);
        Reconciler::new(&mut host).patch(Some(&old), &new, root, None);
        let ops = host.take_ops();
        assert_eq!(ops.iter().filter(|op| op.is_create()).count(), 1);
        assert_eq!(ops.iter().filter(|op| matches!(op, HostOp::Remove { .. })).count(), 1);
        assert_eq!(host.inner_html(root), "<ul><li>a</li><li>x</li><li>c</li><li>d</li></ul>");

        let shorter = list(&["d"]);
        Reconciler::new(&mut host).patch(Some(&new), &shorter, root, None);
        assert_eq!(host.inner_html(root), "<ul><li>d</li></ul>");
    }

    #[test]
    fn unkeyed_children_patch_in_place() {
        let make = |texts: &[&str]| {
            let items: Vec<VNodeRef> = texts
                .iter()
                .map(|t| VNode::element("p", VNodeData::default(), vec![VNode::text(*t).into_ref()]).into_ref())
                .collect();
            Rendered::List(items).into_node()
        };
        let old = make(&["1", "2"]);
        let (mut host, root) = setup(&old);
        let new = make(&["2", "1", "3"]);
        Reconciler::new(&mut host).patch(Some(&old), &new, root, None);
        let ops = host.take_ops();
        assert_eq!(ops.iter().filter(|op| op.is_create()).count(), 1);
        assert_eq!(ops.iter().filter(|op| matches!(op, HostOp::SetElementText { .. })).count(), 3);
        assert!(!ops.iter().any(|op| matches!(op, HostOp::Remove { .. })));
        assert_eq!(host.inner_html(root), "<p>2</p><p>1</p><p>3</p>");
    }

    #[test]
    fn data_is_diffed() {
        let mut data = VNodeData::default();
        data.class = Some("a".into());
        data.attrs.insert("id".into(), Value::from("x"));
        data.attrs.insert("disabled".into(), Value::Bool(true));
        data.style.insert("color".into(), "red".into());
        let old = VNode::element("button", data, vec![]).into_ref();
        let (mut host, root) = setup(&old);
        let el = old.el().unwrap();
        assert_eq!(host.attribute(el, "disabled").as_deref(), Some("disabled"));

        let mut data = VNodeData::default();
        data.class = Some("a".into());
        data.attrs.insert("id".into(), Value::from("x"));
        data.attrs.insert("disabled".into(), Value::Bool(false));
        let new = VNode::element("button", data, vec![]).into_ref();
        Reconciler::new(&mut host).patch(Some(&old), &new, root, None);

        let ops = host.take_ops();
        assert_eq!(ops.len(), 2, "{ops:?}");
        assert_eq!(host.attribute(el, "disabled"), None);
        assert_eq!(host.style(el, "color"), None);
        assert_eq!(new.el(), Some(el));
    }

    #[test]
    fn different_tags_replace_in_place() {
        let first = VNode::element("p", VNodeData::default(), vec![]).into_ref();
        let tail = VNode::text("tail").into_ref();
        let old = VNode::fragment(vec![first.clone(), tail.clone()]).into_ref();
        let (mut host, root) = setup(&old);
        let new = VNode::fragment(vec![VNode::element("h1", VNodeData::default(), vec![]).into_ref(), tail]).into_ref();
        Reconciler::new(&mut host).patch(Some(&old), &new, root, None);
        assert_eq!(host.inner_html(root), "<h1></h1>tail");
    }

    #[test]
    fn svg_children_are_namespaced() {
        let circle = VNode::element("circle", VNodeData::default(), vec![]).into_ref();
        let svg = VNode::element("svg", VNodeData::default(), vec![circle.clone()]).into_ref();
        let (host, _) = setup(&svg);
        assert!(host.is_namespaced(circle.el().unwrap()));
    }

    #[test]
    fn refs_in_loops_collect_into_lists() {
        let item = |key: &str| {
            let mut data = VNodeData::default();
            data.ref_name = Some("items".into());
            data.ref_in_for = true;
            VNode::element("li", data, vec![]).with_key(Some(VKey::text(key))).into_ref()
        };
        let mut data = VNodeData::default();
        data.ref_name = Some("list".into());
        let tree = VNode::element("ul", data, vec![item("a"), item("b")]).into_ref();
        let (_, _) = setup(&tree);
        let refs = collect_refs(&tree);
        assert!(matches!(refs["list"], RefTarget::Single(_)));
        assert!(matches!(&refs["items"], RefTarget::Many(nodes) if nodes.len() == 2));
    }
}
