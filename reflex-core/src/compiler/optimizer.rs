//! Static analysis.
//!
//! Marks subtrees that can never change so code generation can hoist them
//! into cached static renders, and records how much flattening each
//! children list needs at render time.

use super::ast::{Ast, CompoundPart, ElementType, NodeId, NodeKind, Prop};
use super::options::ParserOptions;

/// Children are used as-is.
pub const NORMALIZE_NONE: u8 = 0;
/// A child may be a component returning several roots: flatten one level.
pub const NORMALIZE_SIMPLE: u8 = 1;
/// A child is a loop, `<template>` or `<slot>`: flatten fully.
pub const NORMALIZE_FULL: u8 = 2;

/// Annotate `ast` in place.
pub fn optimize(ast: &mut Ast, options: &ParserOptions) {
    let root = ast.root();
    for child in ast.children(root).to_vec() {
        mark_static(ast, child, options);
        mark_static_roots(ast, child, false);
    }
    mark_normalization(ast, root, options);
}

/// Compute and store the static flag of `id`; returns it.
fn mark_static(ast: &mut Ast, id: NodeId, options: &ParserOptions) -> bool {
    match ast.kind(id) {
        NodeKind::Text(_) | NodeKind::Comment(_) => true,
        NodeKind::Interpolation(_) => false,
        NodeKind::Compound(parts) => parts.iter().all(|part| matches!(part, CompoundPart::Text(_))),
        NodeKind::Root | NodeKind::If | NodeKind::IfBranch(_) | NodeKind::For(_) => {
            for child in ast.children(id).to_vec() {
                mark_static(ast, child, options);
            }
            false
        }
        NodeKind::Element(_) => {
            let mut is_static = is_static_element(ast, id, options);
            if descends_into(ast, id, options) {
                for child in ast.children(id).to_vec() {
                    if !mark_static(ast, child, options) {
                        is_static = false;
                    }
                }
            }
            if let Some(el) = ast.element_mut(id) {
                el.hints.is_static = is_static;
            }
            is_static
        }
    }
}

/// Component and slot children belong to another render scope.
fn descends_into(ast: &Ast, id: NodeId, options: &ParserOptions) -> bool {
    ast.element(id).is_some_and(|el| {
        el.pre || (el.tag_type != ElementType::Component && el.tag != "slot" && options.is_reserved_tag(&el.tag))
    })
}

fn is_static_element(ast: &Ast, id: NodeId, options: &ParserOptions) -> bool {
    let Some(el) = ast.element(id) else {
        return false;
    };
    if el.pre {
        return true;
    }
    let has_bindings = el.props.iter().any(|prop| matches!(prop, Prop::Directive(_)));
    !has_bindings
        && !el.hints.once
        && el.key_binding().is_none()
        && !is_loop_content(ast, id)
        && el.tag_type != ElementType::Component
        && el.tag_type != ElementType::Slot
        && options.is_reserved_tag(&el.tag)
        && !is_direct_child_of_template_for(ast, id)
}

/// The element repeated by a loop, possibly through a conditional.
fn is_loop_content(ast: &Ast, id: NodeId) -> bool {
    let mut parent = ast.parent(id);
    while let Some(p) = parent {
        match ast.kind(p) {
            NodeKind::For(_) => return true,
            NodeKind::IfBranch(_) | NodeKind::If => parent = ast.parent(p),
            _ => return false,
        }
    }
    false
}

fn is_direct_child_of_template_for(ast: &Ast, id: NodeId) -> bool {
    let mut parent = ast.parent(id);
    while let Some(p) = parent {
        match ast.kind(p) {
            NodeKind::Element(el) if el.tag == "template" => {
                if is_loop_content(ast, p) {
                    return true;
                }
                parent = ast.parent(p);
            }
            _ => return false,
        }
    }
    false
}

fn mark_static_roots(ast: &mut Ast, id: NodeId, in_for: bool) {
    match ast.kind(id) {
        NodeKind::For(_) => {
            for child in ast.children(id).to_vec() {
                mark_static_roots(ast, child, true);
            }
        }
        NodeKind::If | NodeKind::IfBranch(_) => {
            for child in ast.children(id).to_vec() {
                mark_static_roots(ast, child, in_for);
            }
        }
        NodeKind::Element(_) => {
            let children = ast.children(id).to_vec();
            let single_text =
                children.len() == 1 && matches!(ast.kind(children[0]), NodeKind::Text(_) | NodeKind::Comment(_));
            let Some(el) = ast.element_mut(id) else {
                return;
            };
            if el.hints.is_static || el.hints.once {
                el.hints.static_in_for = in_for;
            }
            if el.hints.is_static && !children.is_empty() && !single_text {
                el.hints.static_root = true;
                return;
            }
            el.hints.static_root = false;
            for child in children {
                mark_static_roots(ast, child, in_for);
            }
        }
        _ => {}
    }
}

fn mark_normalization(ast: &mut Ast, id: NodeId, options: &ParserOptions) {
    let children = ast.children(id).to_vec();
    if ast.element(id).is_some() {
        let level = children_normalization(ast, &children, options);
        if let Some(el) = ast.element_mut(id) {
            el.hints.normalization = level;
        }
    }
    for child in children {
        mark_normalization(ast, child, options);
    }
}

/// Normalization for a children list, including the single-loop shortcut:
/// a lone loop over plain elements yields a flat array already.
pub fn children_normalization(ast: &Ast, children: &[NodeId], options: &ParserOptions) -> u8 {
    if let [only] = children {
        if let NodeKind::For(_) = ast.kind(*only) {
            let content = ast.children(*only).first().copied();
            if let Some(el) = content.and_then(|c| ast.element(c)) {
                if el.tag != "template" && el.tag != "slot" {
                    return if maybe_component(ast, content, options) {
                        NORMALIZE_SIMPLE
                    } else {
                        NORMALIZE_NONE
                    };
                }
            }
        }
    }
    normalization(ast, children, options)
}

/// How much flattening `children` need.
pub fn normalization(ast: &Ast, children: &[NodeId], options: &ParserOptions) -> u8 {
    let mut level = NORMALIZE_NONE;
    for &child in children {
        let candidates = branch_contents(ast, child);
        if candidates.iter().any(|&c| needs_normalization(ast, c)) {
            return NORMALIZE_FULL;
        }
        if candidates.iter().any(|&c| maybe_component(ast, Some(c), options)) {
            level = NORMALIZE_SIMPLE;
        }
    }
    level
}

/// The element-level nodes a child can render as.
fn branch_contents(ast: &Ast, id: NodeId) -> Vec<NodeId> {
    match ast.kind(id) {
        NodeKind::If => ast
            .children(id)
            .iter()
            .filter_map(|&branch| ast.children(branch).first().copied())
            .collect(),
        NodeKind::Element(_) | NodeKind::For(_) => vec![id],
        _ => Vec::new(),
    }
}

fn needs_normalization(ast: &Ast, id: NodeId) -> bool {
    match ast.kind(id) {
        NodeKind::For(_) => true,
        NodeKind::Element(el) => el.tag == "template" || el.tag == "slot",
        _ => false,
    }
}

fn maybe_component(ast: &Ast, id: Option<NodeId>, options: &ParserOptions) -> bool {
    id.and_then(|id| ast.element(id))
        .is_some_and(|el| el.tag_type == ElementType::Component || !options.is_reserved_tag(&el.tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;
    use crate::compiler::transform::transform;

    fn optimized(source: &str) -> Ast {
        let options = ParserOptions::html();
        let mut ast = parse(source, &options);
        transform(&mut ast, None);
        optimize(&mut ast, &options);
        ast
    }

    fn first(ast: &Ast, id: NodeId) -> NodeId {
        ast.children(id)[0]
    }

    #[test]
    fn plain_subtree_is_a_static_root() {
        let ast = optimized("<div><ul><li>a</li><li>b</li></ul><p>{{ msg }}</p></div>");
        let div = first(&ast, ast.root());
        let ul = ast.children(div)[0];
        let p = ast.children(div)[1];

        let div_hints = ast.element(div).unwrap().hints;
        assert!(!div_hints.is_static);
        assert!(!div_hints.static_root);

        let ul_hints = ast.element(ul).unwrap().hints;
        assert!(ul_hints.is_static);
        assert!(ul_hints.static_root);
        assert!(!ast.element(p).unwrap().hints.is_static);
    }

    #[test]
    fn single_text_child_is_not_worth_hoisting() {
        let ast = optimized("<div><p>plain</p><span :a=\"b\"></span></div>");
        let div = first(&ast, ast.root());
        let p = ast.element(ast.children(div)[0]).unwrap().hints;
        assert!(p.is_static);
        assert!(!p.static_root);
    }

    #[test]
    fn loops_mark_static_in_for() {
        let ast = optimized("<ul><li v-for=\"i in items\"><b><i>x</i></b></li></ul>");
        let ul = first(&ast, ast.root());
        let lp = first(&ast, ul);
        let li = first(&ast, lp);
        assert!(!ast.element(li).unwrap().hints.is_static);
        let b = ast.element(first(&ast, li)).unwrap().hints;
        assert!(b.static_root);
        assert!(b.static_in_for);
    }

    #[test]
    fn keys_components_and_once_are_dynamic() {
        let ast = optimized("<div><p key=\"a\">x</p><my-comp>y</my-comp><p v-once>z</p></div>");
        let div = first(&ast, ast.root());
        for &child in ast.children(div) {
            assert!(!ast.element(child).unwrap().hints.is_static);
        }
    }

    #[test]
    fn template_for_children_are_dynamic() {
        let ast = optimized("<div><template v-for=\"i in 2\"><p>x</p></template></div>");
        let div = first(&ast, ast.root());
        let lp = first(&ast, div);
        let template = first(&ast, lp);
        let p = first(&ast, template);
        assert!(!ast.element(p).unwrap().hints.is_static);
    }

    #[test]
    fn normalization_levels() {
        let plain = optimized("<div><p></p><span></span></div>");
        assert_eq!(ast_level(&plain), NORMALIZE_NONE);

        let component = optimized("<div><my-comp></my-comp><p></p></div>");
        assert_eq!(ast_level(&component), NORMALIZE_SIMPLE);

        let looped = optimized("<div><p v-for=\"i in 3\"></p><p></p></div>");
        assert_eq!(ast_level(&looped), NORMALIZE_FULL);

        let slot = optimized("<div><slot></slot></div>");
        assert_eq!(ast_level(&slot), NORMALIZE_FULL);

        let branch = optimized("<div><p v-if=\"a\"></p><template v-else><b></b></template></div>");
        assert_eq!(ast_level(&branch), NORMALIZE_FULL);
    }

    #[test]
    fn lone_loop_skips_normalization() {
        let elements = optimized("<ul><li v-for=\"i in 3\"></li></ul>");
        assert_eq!(ast_level(&elements), NORMALIZE_NONE);

        let components = optimized("<ul><my-item v-for=\"i in 3\"></my-item></ul>");
        assert_eq!(ast_level(&components), NORMALIZE_SIMPLE);
    }

    fn ast_level(ast: &Ast) -> u8 {
        ast.element(first(ast, ast.root())).unwrap().hints.normalization
    }
}
