//! Children normalization.
//!
//! Rendering a child can yield one node, several (a `<template>` or a
//! slot) or a whole loop. Parents need a flat list. Loops that share a
//! parent with other children are wrapped in a fragment so the reconciler
//! diffs them as one unit, which keeps keys from different loops apart.

use super::vnode::{PatchFlags, VNode, VNodeKind, VNodeRef};

/// What rendering one IR node produced.
#[derive(Debug)]
pub enum Rendered {
    Node(VNodeRef),
    /// Flattened into the parent.
    Nodes(Vec<VNodeRef>),
    /// Output of `v-for`.
    List(Vec<VNodeRef>),
}

impl Rendered {
    /// Collapse into a single node: lists and groups become fragments.
    pub fn into_node(self) -> VNodeRef {
        match self {
            Rendered::Node(node) => node,
            Rendered::Nodes(nodes) => VNode::fragment(nodes).into_ref(),
            Rendered::List(items) => {
                let flags = list_flags(&items);
                VNode::fragment(items).with_patch_flags(flags).into_ref()
            }
        }
    }
}

/// Keyed when every item carries a key.
pub fn list_flags(items: &[VNodeRef]) -> PatchFlags {
    if items.iter().all(|item| item.key.is_some()) {
        PatchFlags::KEYED_FRAGMENT
    } else {
        PatchFlags::UNKEYED_FRAGMENT
    }
}

/// Flatten rendered children. Level 2 also merges adjacent text nodes.
pub fn normalize_children(parts: Vec<Rendered>, level: u8) -> Vec<VNodeRef> {
    let mut out: Vec<VNodeRef> = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            Rendered::Node(node) => push(&mut out, node, level),
            Rendered::Nodes(nodes) => {
                for node in nodes {
                    push(&mut out, node, level);
                }
            }
            list @ Rendered::List(_) => out.push(list.into_node()),
        }
    }
    out
}

fn push(out: &mut Vec<VNodeRef>, node: VNodeRef, level: u8) {
    if level >= 2 {
        if let (Some(last), VNodeKind::Text(next)) = (out.last(), &node.kind) {
            if let VNodeKind::Text(prev) = &last.kind {
                if last.key.is_none() && node.key.is_none() {
                    let merged = VNode::text(format!("{prev}{next}")).into_ref();
                    out.pop();
                    out.push(merged);
                    return;
                }
            }
        }
    }
    out.push(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vnode::{VKey, VNodeData};

    fn text(s: &str) -> VNodeRef {
        VNode::text(s).into_ref()
    }

    fn keyed(tag: &str, key: &str) -> VNodeRef {
        VNode::element(tag, VNodeData::default(), Vec::new())
            .with_key(Some(VKey::text(key)))
            .into_ref()
    }

    #[test]
    fn groups_are_flattened() {
        let out = normalize_children(
            vec![Rendered::Node(text("a")), Rendered::Nodes(vec![keyed("p", "x"), text("b")])],
            1,
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].tag(), Some("p"));
    }

    #[test]
    fn full_normalization_merges_text() {
        let out = normalize_children(
            vec![Rendered::Node(text("a")), Rendered::Nodes(vec![text("b"), text("c")])],
            2,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text_content(), Some("abc"));

        let simple = normalize_children(vec![Rendered::Node(text("a")), Rendered::Node(text("b"))], 1);
        assert_eq!(simple.len(), 2);
    }

    #[test]
    fn lists_become_flagged_fragments() {
        let out = normalize_children(
            vec![
                Rendered::Node(text("head")),
                Rendered::List(vec![keyed("li", "1"), keyed("li", "2")]),
                Rendered::List(vec![text("x")]),
            ],
            2,
        );
        assert_eq!(out.len(), 3);
        assert!(matches!(out[1].kind, VNodeKind::Fragment));
        assert!(out[1].patch_flags.contains(PatchFlags::KEYED_FRAGMENT));
        assert!(out[2].patch_flags.contains(PatchFlags::UNKEYED_FRAGMENT));
    }
}
