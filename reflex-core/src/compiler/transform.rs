//! Structural transform.
//!
//! Rewrites the parsed tree so later passes see control flow explicitly:
//! `v-if` chains become [`NodeKind::If`] nodes, `v-for` becomes
//! [`NodeKind::For`], and adjacent text and interpolations merge into
//! [`NodeKind::Compound`] nodes. Work is bottom-up, so an element's
//! children are final before the element itself is wrapped.

use super::ast::{
    Ast, CompoundPart, Directive, ElementType, ForNode, IfBranch, NodeId, NodeKind, SourceLocation,
};
use super::errors::{report, CompileError, DiagnosticSink, ErrorCode};

pub fn transform(ast: &mut Ast, sink: Option<&DiagnosticSink>) {
    transform_children(ast, ast.root(), sink);
}

fn transform_children(ast: &mut Ast, parent: NodeId, sink: Option<&DiagnosticSink>) {
    let children = ast.children(parent).to_vec();
    for &child in &children {
        if ast.element(child).is_some() {
            transform_children(ast, child, sink);
        }
    }

    let mut out: Vec<NodeId> = Vec::with_capacity(children.len());
    for child in children {
        let Some(el) = ast.element_mut(child) else {
            out.push(child);
            continue;
        };
        if el.pre {
            out.push(child);
            continue;
        }
        if el.take_directive("once").is_some() {
            el.hints.once = true;
        }

        let else_dir = el.take_directive("else-if").or_else(|| el.take_directive("else"));
        match else_dir {
            Some(dir) => {
                if let Some(chain) = find_open_chain(ast, &mut out) {
                    let content = wrap_for(ast, child, sink);
                    let condition = if dir.name == "else-if" {
                        Some(expression_or_report(&dir, sink))
                    } else {
                        None
                    };
                    let branch = alloc_branch(ast, content, condition);
                    ast.append_child(chain, branch);
                    continue;
                }
                report(sink, CompileError::new(ErrorCode::ElseWithoutIf, dir.loc.clone()));
                out.push(wrap_structural(ast, child, sink));
            }
            None => out.push(wrap_structural(ast, child, sink)),
        }
    }

    let merged = merge_text_runs(ast, out);
    ast.set_children(parent, merged);
}

/// The conditional chain an `else` may attach to: the last sibling,
/// skipping whitespace-only text and comments. Skipped nodes are dropped.
fn find_open_chain(ast: &Ast, out: &mut Vec<NodeId>) -> Option<NodeId> {
    let mut index = out.len();
    while index > 0 {
        let candidate = out[index - 1];
        match ast.kind(candidate) {
            NodeKind::Comment(_) => index -= 1,
            NodeKind::Text(text) if text.trim().is_empty() => index -= 1,
            NodeKind::If => {
                out.truncate(index);
                return Some(candidate);
            }
            _ => return None,
        }
    }
    None
}

fn expression_or_report(dir: &Directive, sink: Option<&DiagnosticSink>) -> String {
    match &dir.exp {
        Some(exp) if !exp.content.trim().is_empty() => exp.content.clone(),
        _ => {
            report(
                sink,
                CompileError::new(ErrorCode::InvalidExpression, dir.loc.clone())
                    .with_detail(format!("v-{} is missing expression.", dir.name)),
            );
            "undefined".to_string()
        }
    }
}

/// Apply `v-if` then `v-for` so the loop encloses the conditional.
fn wrap_structural(ast: &mut Ast, child: NodeId, sink: Option<&DiagnosticSink>) -> NodeId {
    let if_dir = ast.element_mut(child).and_then(|el| el.take_directive("if"));
    let node = match if_dir {
        Some(dir) => {
            let condition = expression_or_report(&dir, sink);
            let loc = ast.node(child).loc.clone();
            let chain = ast.alloc(NodeKind::If, loc, None);
            let branch = alloc_branch(ast, child, Some(condition));
            ast.append_child(chain, branch);
            chain
        }
        None => child,
    };
    wrap_for_from(ast, child, node, sink)
}

fn wrap_for(ast: &mut Ast, child: NodeId, sink: Option<&DiagnosticSink>) -> NodeId {
    wrap_for_from(ast, child, child, sink)
}

/// Wrap `content` in a loop if `element` carries `v-for`.
fn wrap_for_from(ast: &mut Ast, element: NodeId, content: NodeId, sink: Option<&DiagnosticSink>) -> NodeId {
    let Some(el) = ast.element_mut(element) else {
        return content;
    };
    let Some(dir) = el.take_directive("for") else {
        return content;
    };
    let is_template = el.tag_type == ElementType::Template || el.tag == "template";
    let keyed = el.key_binding().is_some();

    if is_template && keyed {
        report(sink, CompileError::new(ErrorCode::TemplateKeyPlacement, dir.loc.clone()));
    }

    let raw = dir.exp.as_ref().map(|exp| exp.content.clone()).unwrap_or_default();
    let Some(for_node) = parse_for_expression(&raw) else {
        report(sink, CompileError::new(ErrorCode::ForMalformedExpression, dir.loc.clone()));
        return content;
    };

    let loc = ast.node(element).loc.clone();
    let node = ast.alloc(NodeKind::For(for_node), loc, None);
    ast.append_child(node, content);
    node
}

fn alloc_branch(ast: &mut Ast, content: NodeId, condition: Option<String>) -> NodeId {
    let loc = ast.node(content).loc.clone();
    let branch = ast.alloc(NodeKind::IfBranch(IfBranch { condition }), loc, None);
    ast.append_child(branch, content);
    branch
}

/// Split `lhs in|of rhs` at the first `in`/`of` surrounded by whitespace.
fn split_for(raw: &str) -> Option<(&str, &str)> {
    let bytes = raw.as_bytes();
    for (i, _) in raw.char_indices() {
        if !bytes[i].is_ascii_whitespace() {
            continue;
        }
        let after = raw[i..].trim_start();
        let word_start = raw.len() - after.len();
        let is_separator = (after.starts_with("in") || after.starts_with("of"))
            && after[2..].starts_with(|c: char| c.is_whitespace());
        if is_separator {
            return Some((&raw[..i], &raw[word_start + 2..]));
        }
    }
    None
}

/// Parse `(value, key, index) in source`.
pub fn parse_for_expression(raw: &str) -> Option<ForNode> {
    let (lhs, rhs) = split_for(raw)?;
    let source = rhs.trim();
    if source.is_empty() {
        return None;
    }

    let lhs = lhs.trim();
    let lhs = lhs.strip_prefix('(').unwrap_or(lhs);
    let lhs = lhs.strip_suffix(')').unwrap_or(lhs).trim();

    let mut aliases = lhs.splitn(3, ',').map(str::trim).map(|alias| {
        if alias.is_empty() {
            None
        } else {
            Some(alias.to_string())
        }
    });

    Some(ForNode {
        source: source.to_string(),
        value_alias: aliases.next().flatten(),
        key_alias: aliases.next().flatten(),
        index_alias: aliases.next().flatten(),
        raw: raw.to_string(),
    })
}

/// Merge runs of two or more adjacent text and interpolation nodes.
fn merge_text_runs(ast: &mut Ast, children: Vec<NodeId>) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(children.len());
    let mut run: Vec<NodeId> = Vec::new();

    for child in children {
        if matches!(ast.kind(child), NodeKind::Text(_) | NodeKind::Interpolation(_)) {
            run.push(child);
            continue;
        }
        flush_run(ast, &mut run, &mut out);
        out.push(child);
    }
    flush_run(ast, &mut run, &mut out);
    out
}

fn flush_run(ast: &mut Ast, run: &mut Vec<NodeId>, out: &mut Vec<NodeId>) {
    match run.len() {
        0 => {}
        1 => out.push(run[0]),
        _ => {
            let parts = run
                .iter()
                .filter_map(|&id| match ast.kind(id) {
                    NodeKind::Text(text) => Some(CompoundPart::Text(text.clone())),
                    NodeKind::Interpolation(exp) => Some(CompoundPart::Interpolation(exp.clone())),
                    _ => None,
                })
                .collect();
            let start = ast.node(run[0]).loc.start;
            let end = ast.node(run[run.len() - 1]).loc.end;
            let source = ast.source.get(start.offset..end.offset).unwrap_or_default().to_string();
            let compound = ast.alloc(NodeKind::Compound(parts), SourceLocation { start, end, source }, None);
            out.push(compound);
        }
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::compiler::options::ParserOptions;
    use crate::compiler::parser::parse;

    fn transformed(source: &str) -> (Ast, Vec<ErrorCode>) {
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink_codes = codes.clone();
        let sink: DiagnosticSink = Arc::new(move |err: &CompileError| sink_codes.lock().push(err.code));
        let mut options = ParserOptions::html();
        options.on_error = Some(sink.clone());
        let mut ast = parse(source, &options);
        transform(&mut ast, Some(&sink));
        let codes = codes.lock().clone();
        (ast, codes)
    }

    #[test]
    fn if_chain_collects_branches() {
        let (ast, errors) = transformed("<div><p v-if=\"a\">1</p>\n  <p v-else-if=\"b\">2</p>\n<p v-else>3</p></div>");
        assert!(errors.is_empty());
        let div = ast.children(ast.root())[0];
        let children = ast.children(div);
        assert_eq!(children.len(), 1);
        let chain = children[0];
        assert!(matches!(ast.kind(chain), NodeKind::If));

        let conditions: Vec<_> = ast
            .children(chain)
            .iter()
            .map(|&b| match ast.kind(b) {
                NodeKind::IfBranch(branch) => branch.condition.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(conditions, vec![Some("a".to_string()), Some("b".to_string()), None]);
    }

    #[test]
    fn orphan_else_is_reported_and_kept() {
        let (ast, errors) = transformed("<div><p v-else>x</p></div>");
        assert_eq!(errors, vec![ErrorCode::ElseWithoutIf]);
        let div = ast.children(ast.root())[0];
        assert!(ast.element(ast.children(div)[0]).is_some());
    }

    #[test]
    fn text_breaks_a_chain() {
        let (_, errors) = transformed("<div><p v-if=\"a\"></p>text<p v-else></p></div>");
        assert_eq!(errors, vec![ErrorCode::ElseWithoutIf]);
    }

    #[test]
    fn for_wraps_if_on_the_same_element() {
        let (ast, _) = transformed("<ul><li v-for=\"item in items\" v-if=\"item.ok\">{{ item }}</li></ul>");
        let ul = ast.children(ast.root())[0];
        let lp = ast.children(ul)[0];
        match ast.kind(lp) {
            NodeKind::For(node) => {
                assert_eq!(node.source, "items");
                assert_eq!(node.value_alias.as_deref(), Some("item"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(ast.kind(ast.children(lp)[0]), NodeKind::If));
    }

    #[test]
    fn for_expression_forms() {
        let full = parse_for_expression("(value, key, index) of object").unwrap();
        assert_eq!(full.value_alias.as_deref(), Some("value"));
        assert_eq!(full.key_alias.as_deref(), Some("key"));
        assert_eq!(full.index_alias.as_deref(), Some("index"));
        assert_eq!(full.source, "object");

        let spaced = parse_for_expression("item  in  list.filter(x => x)").unwrap();
        assert_eq!(spaced.source, "list.filter(x => x)");

        assert!(parse_for_expression("items").is_none());
        assert!(parse_for_expression("item in ").is_none());
        assert!(parse_for_expression("index in 10").is_some());
    }

    #[test]
    fn malformed_for_is_reported() {
        let (_, errors) = transformed("<p v-for=\"nope\"></p>");
        assert_eq!(errors, vec![ErrorCode::ForMalformedExpression]);
    }

    #[test]
    fn keyed_template_loop_is_reported() {
        let (_, errors) = transformed("<template v-for=\"i in 3\" :key=\"i\"><p></p></template>");
        assert_eq!(errors, vec![ErrorCode::TemplateKeyPlacement]);
    }

    #[test]
    fn text_and_interpolations_merge() {
        let (ast, _) = transformed("<p>Hi {{ name }}!</p>");
        let p = ast.children(ast.root())[0];
        assert_eq!(ast.children(p).len(), 1);
        match ast.kind(ast.children(p)[0]) {
            NodeKind::Compound(parts) => {
                assert_eq!(
                    parts,
                    &vec![
                        CompoundPart::Text("Hi ".into()),
                        CompoundPart::Interpolation("name".into()),
                        CompoundPart::Text("!".into()),
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn once_sets_the_hint() {
        let (ast, _) = transformed("<p v-once>{{ a }}</p>");
        let p = ast.children(ast.root())[0];
        let el = ast.element(p).unwrap();
        assert!(el.hints.once);
        assert!(!el.has_directive("once"));
    }
}
