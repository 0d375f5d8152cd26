//! Expression validation.
//!
//! Walks the transformed tree and checks every expression it carries.
//! Problems are warnings: the expression is still emitted and fails at
//! render time.

use super::ast::{Ast, CompoundPart, NodeId, NodeKind, Prop, SourceLocation};
use super::errors::{report, CompileError, DiagnosticSink, ErrorCode};
use super::expr::{is_valid_identifier, parse_statements, PROHIBITED_KEYWORDS};
use super::filter::parse_filtered;

pub fn detect_errors(ast: &Ast, sink: Option<&DiagnosticSink>) {
    for id in ast.descendants(ast.root()) {
        check_node(ast, id, sink);
    }
}

fn check_node(ast: &Ast, id: NodeId, sink: Option<&DiagnosticSink>) {
    let node = ast.node(id);
    match &node.kind {
        NodeKind::Interpolation(exp) => check_expression(exp, &node.loc, sink),
        NodeKind::Compound(parts) => {
            for part in parts {
                if let CompoundPart::Interpolation(exp) = part {
                    check_expression(exp, &node.loc, sink);
                }
            }
        }
        NodeKind::IfBranch(branch) => {
            if let Some(condition) = &branch.condition {
                check_expression(condition, &node.loc, sink);
            }
        }
        NodeKind::For(for_node) => {
            check_expression(&for_node.source, &node.loc, sink);
            let aliases = [&for_node.value_alias, &for_node.key_alias, &for_node.index_alias];
            for alias in aliases.into_iter().flatten() {
                if !is_valid_identifier(alias) {
                    report(
                        sink,
                        CompileError::new(ErrorCode::ForInvalidAlias, node.loc.clone())
                            .with_detail(format!("\"{alias}\" in \"{}\"", for_node.raw)),
                    );
                }
            }
        }
        NodeKind::Element(el) if !el.pre => {
            for prop in &el.props {
                let Prop::Directive(dir) = prop else { continue };
                let Some(exp) = &dir.exp else { continue };
                if dir.name == "on" {
                    check_event(&exp.content, &dir.loc, sink);
                } else {
                    check_expression(&exp.content, &dir.loc, sink);
                }
            }
        }
        _ => {}
    }
}

fn check_expression(exp: &str, loc: &SourceLocation, sink: Option<&DiagnosticSink>) {
    if let Err(err) = parse_filtered(exp) {
        report_invalid(exp, &err.message, loc, sink);
    }
}

fn check_event(exp: &str, loc: &SourceLocation, sink: Option<&DiagnosticSink>) {
    let stripped = strip_strings(exp);
    if let Some(operator) = find_unary_call(&stripped) {
        report(
            sink,
            CompileError::new(ErrorCode::UnaryOperatorAsProperty, loc.clone())
                .with_detail(format!("\"{operator}\" in expression {}", exp.trim())),
        );
    }
    if let Err(err) = parse_statements(exp) {
        report_invalid(exp, &err.message, loc, sink);
    }
}

fn report_invalid(exp: &str, reason: &str, loc: &SourceLocation, sink: Option<&DiagnosticSink>) {
    let err = match find_prohibited_keyword(&strip_strings(exp)) {
        Some(keyword) => CompileError::new(ErrorCode::ProhibitedKeyword, loc.clone())
            .with_detail(format!("\"{keyword}\" in expression {}", exp.trim())),
        None => CompileError::new(ErrorCode::InvalidExpression, loc.clone())
            .with_detail(format!("{reason} in {}", exp.trim())),
    };
    report(sink, err);
}

/// Remove quoted string contents so keywords inside them are ignored.
fn strip_strings(exp: &str) -> String {
    let mut out = String::with_capacity(exp.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in exp.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if matches!(c, '"' | '\'' | '`') => quote = Some(c),
            None => out.push(c),
        }
    }
    out
}

fn words(source: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in source.char_indices() {
        let is_word = c.is_ascii_alphanumeric() || c == '_';
        match (is_word, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, &source[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &source[s..]));
    }
    out
}

fn find_prohibited_keyword(stripped: &str) -> Option<&'static str> {
    words(stripped).into_iter().find_map(|(_, word)| PROHIBITED_KEYWORDS.iter().copied().find(|k| *k == word))
}

/// `delete (…)`, `typeof (…)` or `void (…)` not preceded by `$`.
fn find_unary_call(stripped: &str) -> Option<String> {
    for (start, word) in words(stripped) {
        if !matches!(word, "delete" | "typeof" | "void") {
            continue;
        }
        if stripped[..start].ends_with('$') {
            continue;
        }
        let rest = stripped[start + word.len()..].trim_start();
        if let Some(args) = rest.strip_prefix('(') {
            if let Some(close) = args.find(')') {
                return Some(format!("{word}({})", &args[..close]));
            }
        }
    }
    None
}
