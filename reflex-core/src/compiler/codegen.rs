//! Code generation: optimized AST to render IR.
//!
//! Static roots are hoisted into a side table and referenced by index;
//! `v-once` content is cached the same way outside loops and per loop key
//! inside them. Conditionals become ternary chains ending in an empty
//! node, and loops become list calls with an inline per-item body.

use super::ast::{
    Ast, CompoundPart, Directive, ElementNode, ElementType, KeyBinding, NodeId, NodeKind, Prop, SourceLocation,
};
use super::errors::{report, CompileError, DiagnosticSink, ErrorCode};
use super::events::{compile_event, EventBinding, HandlerKind, ListenerFlags};
use super::expr::{parse_or_invalid, BinaryOp, Expr, UnaryOp};
use super::filter::parse_filtered;
use super::ir::{
    Children, DirectiveBinding, EventEntry, ModelBinding, NodeData, PropBinding, PropName, RenderNode, Tag,
    TextPart,
};
use super::options::CompilerOptions;

/// Output of code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodegenResult {
    pub render: RenderNode,
    /// Hoisted static subtrees, referenced by [`RenderNode::Static`].
    pub static_renders: Vec<RenderNode>,
}

pub fn generate(ast: &Ast, options: &CompilerOptions, sink: Option<&DiagnosticSink>) -> CodegenResult {
    let mut codegen = Codegen {
        ast,
        options,
        sink,
        static_renders: Vec::new(),
        once_count: 0,
    };
    let render = codegen.gen_root();
    CodegenResult {
        render,
        static_renders: codegen.static_renders,
    }
}

/// `foo-bar` to `fooBar`.
pub fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn filtered(source: &str) -> Expr {
    parse_filtered(source).unwrap_or_else(|err| Expr::Invalid {
        source: source.to_string(),
        reason: err.to_string(),
    })
}

fn key_expr(binding: KeyBinding) -> Expr {
    match binding {
        KeyBinding::Static(value) => Expr::String(value),
        KeyBinding::Dynamic(exp) => filtered(&exp),
    }
}

/// Attributes that must be set as DOM properties to take effect.
fn must_use_prop(tag: &str, input_type: Option<&str>, attr: &str) -> bool {
    match attr {
        "value" => {
            matches!(tag, "input" | "textarea" | "option" | "select" | "progress") && input_type != Some("button")
        }
        "selected" => tag == "option",
        "checked" => tag == "input",
        "muted" => tag == "video",
        _ => false,
    }
}

fn statements_handler(body: Expr) -> EventBinding {
    EventBinding {
        kind: HandlerKind::Statements,
        handler: body,
        guards: Vec::new(),
        flags: ListenerFlags::default(),
    }
}

fn event_target_field(field: &str) -> Expr {
    Expr::member(Expr::member(Expr::ident("$event"), "target"), field)
}

struct Codegen<'a> {
    ast: &'a Ast,
    options: &'a CompilerOptions,
    sink: Option<&'a DiagnosticSink>,
    static_renders: Vec<RenderNode>,
    once_count: usize,
}

impl<'a> Codegen<'a> {
    fn warn(&self, code: ErrorCode, loc: &SourceLocation) {
        report(self.sink, CompileError::new(code, loc.clone()));
    }

    fn gen_root(&mut self) -> RenderNode {
        let roots: Vec<NodeId> = self
            .ast
            .children(self.ast.root())
            .iter()
            .copied()
            .filter(|&id| match self.ast.kind(id) {
                NodeKind::Comment(_) => false,
                NodeKind::Text(text) => !text.trim().is_empty(),
                _ => true,
            })
            .collect();

        match roots.as_slice() {
            [] => RenderNode::Element {
                tag: Tag::Static("div".to_string()),
                component: false,
                data: None,
                children: None,
            },
            [only] => self.gen_node(*only),
            [_, second, ..] => {
                self.warn(ErrorCode::MultipleRoots, &self.ast.node(*second).loc);
                let nodes = roots.iter().map(|&id| self.gen_node(id)).collect();
                RenderNode::Fragment(Children {
                    nodes,
                    normalization: super::optimizer::normalization(self.ast, &roots, &self.options.parser),
                    spread: false,
                })
            }
        }
    }

    fn gen_node(&mut self, id: NodeId) -> RenderNode {
        match self.ast.kind(id) {
            NodeKind::Element(_) => self.gen_element(id, false),
            NodeKind::Text(text) => RenderNode::Text(vec![TextPart::Static(text.clone())]),
            NodeKind::Interpolation(exp) => RenderNode::Text(vec![TextPart::Dynamic(filtered(exp))]),
            NodeKind::Compound(parts) => RenderNode::Text(
                parts
                    .iter()
                    .map(|part| match part {
                        CompoundPart::Text(text) => TextPart::Static(text.clone()),
                        CompoundPart::Interpolation(exp) => TextPart::Dynamic(filtered(exp)),
                    })
                    .collect(),
            ),
            NodeKind::Comment(text) => RenderNode::Comment(text.clone()),
            NodeKind::If => self.gen_if(id),
            NodeKind::For(_) => self.gen_for(id),
            NodeKind::IfBranch(_) => match self.ast.children(id).first() {
                Some(&content) => self.gen_node(content),
                None => RenderNode::Empty,
            },
            NodeKind::Root => match self.gen_children(id) {
                Some(children) => RenderNode::Fragment(children),
                None => RenderNode::Empty,
            },
        }
    }

    fn gen_if(&mut self, id: NodeId) -> RenderNode {
        let branches = self.ast.children(id).to_vec();
        let mut alternate = RenderNode::Empty;
        for branch in branches.into_iter().rev() {
            let condition = match self.ast.kind(branch) {
                NodeKind::IfBranch(b) => b.condition.clone(),
                _ => None,
            };
            let block = self.gen_node(branch);
            alternate = match condition {
                Some(condition) => RenderNode::Conditional {
                    test: parse_or_invalid(&condition),
                    consequent: Box::new(block),
                    alternate: Box::new(alternate),
                },
                None => block,
            };
        }
        alternate
    }

    /// The element a loop repeats, looking through a conditional.
    fn loop_element(&self, for_id: NodeId) -> Option<NodeId> {
        let mut current = self.ast.children(for_id).first().copied()?;
        loop {
            match self.ast.kind(current) {
                NodeKind::Element(_) => return Some(current),
                NodeKind::If | NodeKind::IfBranch(_) => {
                    current = self.ast.children(current).first().copied()?;
                }
                _ => return None,
            }
        }
    }

    fn maybe_component(&self, el: &ElementNode) -> bool {
        el.tag_type == ElementType::Component || !self.options.parser.is_reserved_tag(&el.tag)
    }

    fn gen_for(&mut self, id: NodeId) -> RenderNode {
        let ast = self.ast;
        let NodeKind::For(for_node) = ast.kind(id) else {
            return RenderNode::Empty;
        };

        if self.options.warn_unkeyed_component_loops {
            if let Some(el) = self.loop_element(id).and_then(|el| self.ast.element(el)) {
                let unkeyed = self.maybe_component(el)
                    && el.tag != "slot"
                    && el.tag != "template"
                    && el.key_binding().is_none();
                if unkeyed {
                    let err = CompileError::new(ErrorCode::UnkeyedComponentLoop, self.ast.node(id).loc.clone())
                        .with_detail(format!("<{} v-for=\"{}\">", el.tag, for_node.raw));
                    tracing::warn!(tag = %el.tag, "{err}");
                    if let Some(sink) = self.sink {
                        sink(&err);
                    }
                }
            }
        }

        let body = match self.ast.children(id).first() {
            Some(&content) => self.gen_node(content),
            None => RenderNode::Empty,
        };
        RenderNode::List {
            source: parse_or_invalid(&for_node.source),
            value_alias: for_node.value_alias.clone(),
            key_alias: for_node.key_alias.clone(),
            index_alias: for_node.index_alias.clone(),
            body: Box::new(body),
        }
    }

    fn gen_element(&mut self, id: NodeId, hoisted: bool) -> RenderNode {
        let ast = self.ast;
        let Some(el) = ast.element(id) else {
            return RenderNode::Empty;
        };
        if !hoisted && el.hints.static_root {
            return self.gen_static(id);
        }
        if !hoisted && el.hints.once {
            return self.gen_once(id);
        }

        if el.tag == "template" && !el.pre && self.slot_target(el).is_none() {
            return match self.gen_children(id) {
                Some(children) => RenderNode::Fragment(children),
                None => RenderNode::Empty,
            };
        }
        if el.tag_type == ElementType::Slot && !el.pre {
            return self.gen_slot(id, el);
        }

        let tag = self.component_tag(el);
        let data = self.gen_data(id, el);
        let children = self.gen_children(id);
        RenderNode::Element {
            tag,
            component: el.tag_type == ElementType::Component,
            data: (!data.is_empty()).then(|| Box::new(data)),
            children,
        }
    }

    fn gen_static(&mut self, id: NodeId) -> RenderNode {
        let in_for = self.ast.element(id).is_some_and(|el| el.hints.static_in_for);
        let node = self.gen_element(id, true);
        let index = self.static_renders.len();
        self.static_renders.push(node);
        RenderNode::Static { index, in_for }
    }

    fn gen_once(&mut self, id: NodeId) -> RenderNode {
        let in_for = self.ast.element(id).is_some_and(|el| el.hints.static_in_for);
        if !in_for {
            return self.gen_static(id);
        }

        let mut key = None;
        let mut parent = self.ast.parent(id);
        while let Some(p) = parent {
            if let NodeKind::For(_) = self.ast.kind(p) {
                key = self
                    .loop_element(p)
                    .and_then(|el| self.ast.element(el))
                    .and_then(ElementNode::key_binding);
                break;
            }
            parent = self.ast.parent(p);
        }

        match key {
            Some(key) => {
                let node = self.gen_element(id, true);
                let once_id = self.once_count;
                self.once_count += 1;
                RenderNode::Once {
                    node: Box::new(node),
                    id: once_id,
                    key: key_expr(key),
                }
            }
            None => {
                self.warn(ErrorCode::OnceInForWithoutKey, &self.ast.node(id).loc);
                self.gen_element(id, true)
            }
        }
    }

    fn gen_children(&mut self, id: NodeId) -> Option<Children> {
        let children = self.ast.children(id).to_vec();
        if children.is_empty() {
            return None;
        }
        let normalization = match self.ast.element(id) {
            Some(el) => el.hints.normalization,
            None => super::optimizer::children_normalization(self.ast, &children, &self.options.parser),
        };

        if let [only] = children.as_slice() {
            if let NodeKind::For(_) = self.ast.kind(*only) {
                let plain = self
                    .ast
                    .children(*only)
                    .first()
                    .and_then(|&c| self.ast.element(c))
                    .is_some_and(|el| el.tag != "template" && el.tag != "slot");
                if plain {
                    return Some(Children {
                        nodes: vec![self.gen_node(*only)],
                        normalization,
                        spread: true,
                    });
                }
            }
        }

        let nodes = children.into_iter().map(|child| self.gen_node(child)).collect();
        Some(Children {
            nodes,
            normalization,
            spread: false,
        })
    }

    fn slot_target(&self, el: &ElementNode) -> Option<String> {
        if let Some(attr) = el.attribute("slot") {
            return Some(attr.value.clone().unwrap_or_else(|| "default".to_string()));
        }
        el.directive("slot").map(|dir| {
            dir.arg
                .as_ref()
                .map(|arg| arg.content.clone())
                .unwrap_or_else(|| "default".to_string())
        })
    }

    fn component_tag(&self, el: &ElementNode) -> Tag {
        if el.tag_type == ElementType::Component {
            if let Some(attr) = el.attribute("is") {
                if let Some(value) = &attr.value {
                    return Tag::Static(value.clone());
                }
            }
            let bound_is = el.props.iter().find_map(|prop| match prop {
                Prop::Directive(dir) if dir.name == "bind" => match (&dir.arg, &dir.exp) {
                    (Some(arg), Some(exp)) if arg.is_static && arg.content == "is" => Some(filtered(&exp.content)),
                    _ => None,
                },
                _ => None,
            });
            if let Some(expr) = bound_is {
                return Tag::Dynamic(expr);
            }
        }
        Tag::Static(el.tag.clone())
    }

    fn gen_slot(&mut self, id: NodeId, el: &ElementNode) -> RenderNode {
        let name = el
            .attribute("name")
            .and_then(|attr| attr.value.clone())
            .unwrap_or_else(|| "default".to_string());
        let mut props = Vec::new();
        let mut bind = None;
        for prop in &el.props {
            match prop {
                Prop::Attribute(attr) if attr.name != "name" => props.push(PropBinding::fixed(
                    camelize(&attr.name),
                    Expr::String(attr.value.clone().unwrap_or_default()),
                )),
                Prop::Directive(dir) if dir.name == "bind" => {
                    let value = dir.exp.as_ref().map(|exp| filtered(&exp.content)).unwrap_or(Expr::Undefined);
                    match &dir.arg {
                        None => bind = Some(value),
                        Some(arg) if arg.is_static => props.push(PropBinding::fixed(camelize(&arg.content), value)),
                        Some(arg) => props.push(PropBinding {
                            name: PropName::Dynamic(parse_or_invalid(&arg.content)),
                            value,
                        }),
                    }
                }
                _ => {}
            }
        }
        RenderNode::Slot {
            name,
            fallback: self.gen_children(id),
            props,
            bind,
        }
    }

    fn gen_data(&self, id: NodeId, el: &ElementNode) -> NodeData {
        let mut data = NodeData {
            key: el.key_binding().map(key_expr),
            pre: el.pre && !self.ast.parent(id).and_then(|p| self.ast.element(p)).is_some_and(|p| p.pre),
            slot: self.slot_target(el),
            ..NodeData::default()
        };
        let input_type = el.attribute("type").and_then(|attr| attr.value.as_deref());
        let is_component = el.tag_type == ElementType::Component;

        for prop in &el.props {
            match prop {
                Prop::Attribute(attr) => match attr.name.as_str() {
                    "key" | "slot" => {}
                    "is" if is_component => {}
                    "class" => {
                        let value = attr.value.as_deref().unwrap_or_default();
                        let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
                        data.static_class = Some(collapsed);
                    }
                    "style" => data.static_style = attr.value.clone(),
                    "ref" => {
                        data.ref_name = attr.value.clone().map(Expr::String);
                        data.ref_in_for = self.ast.in_for(id);
                    }
                    name => data
                        .attrs
                        .push(PropBinding::fixed(name, Expr::String(attr.value.clone().unwrap_or_default()))),
                },
                Prop::Directive(dir) => self.gen_directive(id, el, dir, input_type, &mut data),
            }
        }
        data
    }

    fn expression_of(&self, dir: &Directive) -> Option<String> {
        match &dir.exp {
            Some(exp) if !exp.content.trim().is_empty() => Some(exp.content.clone()),
            _ => {
                report(
                    self.sink,
                    CompileError::new(ErrorCode::InvalidExpression, dir.loc.clone())
                        .with_detail(format!("v-{} is missing expression.", dir.name)),
                );
                None
            }
        }
    }

    fn gen_directive(
        &self,
        id: NodeId,
        el: &ElementNode,
        dir: &Directive,
        input_type: Option<&str>,
        data: &mut NodeData,
    ) {
        let has_modifier = |m: &str| dir.modifiers.iter().any(|x| x == m);
        match dir.name.as_str() {
            "bind" => {
                let Some(exp) = self.expression_of(dir) else { return };
                let value = filtered(&exp);
                let Some(arg) = &dir.arg else {
                    data.bind_object = Some(value);
                    return;
                };
                if !arg.is_static {
                    let name = PropName::Dynamic(parse_or_invalid(&arg.content));
                    let binding = PropBinding { name, value };
                    if has_modifier("prop") {
                        data.dom_props.push(binding);
                    } else {
                        data.attrs.push(binding);
                    }
                    return;
                }

                let mut name = arg.content.clone();
                if has_modifier("camel") {
                    name = camelize(&name);
                }
                match name.as_str() {
                    "key" => return,
                    "is" if el.tag_type == ElementType::Component => return,
                    "class" => {
                        data.class = Some(value);
                        return;
                    }
                    "style" => {
                        data.style = Some(value);
                        return;
                    }
                    "ref" => {
                        data.ref_name = Some(value);
                        data.ref_in_for = self.ast.in_for(id);
                        return;
                    }
                    _ => {}
                }

                if has_modifier("sync") {
                    let target = parse_or_invalid(&exp);
                    if target.is_assignable() {
                        let handler = Expr::assign(target, Expr::ident("$event"));
                        data.on.push(EventEntry {
                            name: PropName::Static(format!("update:{}", camelize(&name))),
                            binding: statements_handler(handler),
                        });
                    }
                }

                let as_prop = has_modifier("prop")
                    || (el.tag_type != ElementType::Component && must_use_prop(&el.tag, input_type, &name));
                let binding = PropBinding::fixed(name, value);
                if as_prop {
                    data.dom_props.push(binding);
                } else {
                    data.attrs.push(binding);
                }
            }
            "on" => {
                let Some(arg) = &dir.arg else {
                    if let Some(exp) = self.expression_of(dir) {
                        data.on_object = Some(parse_or_invalid(&exp));
                    }
                    return;
                };
                let modifiers: Vec<String> = dir.modifiers.iter().cloned().collect();
                let exp = dir.exp.as_ref().map(|exp| exp.content.as_str());
                let (event, binding) = compile_event(&arg.content, exp, &modifiers, &self.options.key_codes);
                let name = if arg.is_static {
                    PropName::Static(event)
                } else {
                    PropName::Dynamic(parse_or_invalid(&arg.content))
                };
                let entry = EventEntry { name, binding };
                if entry.binding.flags.native {
                    data.native_on.push(entry);
                } else {
                    data.on.push(entry);
                }
            }
            "model" => self.gen_model(el, dir, input_type, data),
            "html" => {
                if let Some(exp) = self.expression_of(dir) {
                    data.dom_props.push(PropBinding::fixed("innerHTML", parse_or_invalid(&exp)));
                }
            }
            "text" => {
                if let Some(exp) = self.expression_of(dir) {
                    let text = Expr::call(Expr::ident("_s"), vec![parse_or_invalid(&exp)]);
                    data.dom_props.push(PropBinding::fixed("textContent", text));
                }
            }
            "slot" | "cloak" => {}
            name => {
                if name != "show" && !self.options.directives.iter().any(|d| d == name) {
                    tracing::debug!(directive = name, "unregistered directive carried into node data");
                }
                data.directives.push(DirectiveBinding {
                    name: name.to_string(),
                    raw_name: dir.raw_name.clone(),
                    value: dir.exp.as_ref().map(|exp| parse_or_invalid(&exp.content)),
                    expression: dir.exp.as_ref().map(|exp| exp.content.clone()),
                    arg: dir.arg.as_ref().map(|arg| {
                        if arg.is_static {
                            PropName::Static(arg.content.clone())
                        } else {
                            PropName::Dynamic(parse_or_invalid(&arg.content))
                        }
                    }),
                    modifiers: dir.modifiers.iter().cloned().collect(),
                });
            }
        }
    }

    fn binding_value(&self, el: &ElementNode, name: &str) -> Option<Expr> {
        el.props.iter().find_map(|prop| match prop {
            Prop::Attribute(attr) if attr.name == name => Some(Expr::String(attr.value.clone().unwrap_or_default())),
            Prop::Directive(dir) if dir.name == "bind" => match (&dir.arg, &dir.exp) {
                (Some(arg), Some(exp)) if arg.is_static && arg.content == name => Some(filtered(&exp.content)),
                _ => None,
            },
            _ => None,
        })
    }

    fn gen_model(&self, el: &ElementNode, dir: &Directive, input_type: Option<&str>, data: &mut NodeData) {
        let source = match &dir.exp {
            Some(exp) if !exp.content.trim().is_empty() => exp.content.clone(),
            _ => {
                self.warn(ErrorCode::ModelWithoutExpression, &dir.loc);
                return;
            }
        };
        let target = parse_or_invalid(&source);
        if !target.is_assignable() {
            report(
                self.sink,
                CompileError::new(ErrorCode::InvalidExpression, dir.loc.clone())
                    .with_detail(format!("v-model value must be an assignable path: {source}")),
            );
            return;
        }

        let has_modifier = |m: &str| dir.modifiers.iter().any(|x| x == m);
        let convert = |value: Expr| {
            let mut value = value;
            if has_modifier("trim") {
                value = Expr::Conditional {
                    test: Box::new(Expr::Binary {
                        op: BinaryOp::StrictEq,
                        left: Box::new(Expr::Unary {
                            op: UnaryOp::TypeOf,
                            operand: Box::new(value.clone()),
                        }),
                        right: Box::new(Expr::String("string".into())),
                    }),
                    consequent: Box::new(Expr::call(Expr::member(value.clone(), "trim"), Vec::new())),
                    alternate: Box::new(value),
                };
            }
            if has_modifier("number") {
                value = Expr::call(Expr::ident("_n"), vec![value]);
            }
            value
        };

        let on_event = |data: &mut NodeData, event: &str, body: Expr| {
            data.on.insert(
                0,
                EventEntry {
                    name: PropName::Static(event.to_string()),
                    binding: statements_handler(body),
                },
            );
        };

        if el.tag_type == ElementType::Component || !self.options.parser.is_reserved_tag(&el.tag) {
            data.model = Some(ModelBinding {
                value: target.clone(),
                callback: Expr::Arrow {
                    params: vec!["$$v".to_string()],
                    body: Box::new(Expr::assign(target, convert(Expr::ident("$$v")))),
                },
                expression: source,
            });
            return;
        }

        match (el.tag.as_str(), input_type) {
            ("select", _) => {
                data.dom_props.push(PropBinding::fixed("value", target.clone()));
                on_event(data, "change", Expr::assign(target, convert(event_target_field("value"))));
            }
            ("input", Some("checkbox")) => {
                let true_value = self.binding_value(el, "true-value").unwrap_or(Expr::Bool(true));
                let false_value = self.binding_value(el, "false-value").unwrap_or(Expr::Bool(false));
                let checked = match true_value {
                    Expr::Bool(true) => target.clone(),
                    ref value => Expr::call(Expr::ident("_q"), vec![target.clone(), value.clone()]),
                };
                data.dom_props.push(PropBinding::fixed("checked", checked));
                let next = Expr::Conditional {
                    test: Box::new(event_target_field("checked")),
                    consequent: Box::new(true_value),
                    alternate: Box::new(false_value),
                };
                on_event(data, "change", Expr::assign(target, next));
            }
            ("input", Some("radio")) => {
                let value = convert(self.binding_value(el, "value").unwrap_or(Expr::Null));
                data.dom_props.push(PropBinding::fixed(
                    "checked",
                    Expr::call(Expr::ident("_q"), vec![target.clone(), value.clone()]),
                ));
                on_event(data, "change", Expr::assign(target, value));
            }
            _ => {
                let event = if has_modifier("lazy") { "change" } else { "input" };
                data.dom_props.push(PropBinding::fixed("value", target.clone()));
                on_event(data, event, Expr::assign(target, convert(event_target_field("value"))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::compiler::detect::detect_errors;
    use crate::compiler::optimizer::optimize;
    use crate::compiler::parser::parse;
    use crate::compiler::transform::transform;

    fn compile(source: &str) -> (CodegenResult, Vec<ErrorCode>) {
        let codes = Arc::new(Mutex::new(Vec::new()));
        let collected = codes.clone();
        let sink: DiagnosticSink = Arc::new(move |err: &CompileError| collected.lock().push(err.code));
        let options = CompilerOptions::default();
        let mut ast = parse(source, &options.parser);
        transform(&mut ast, Some(&sink));
        detect_errors(&ast, Some(&sink));
        optimize(&mut ast, &options.parser);
        let result = generate(&ast, &options, Some(&sink));
        let codes = codes.lock().clone();
        (result, codes)
    }

    fn render(source: &str) -> String {
        compile(source).0.render.to_string()
    }

    #[test]
    fn element_with_text() {
        assert_eq!(render("<div id=\"app\">{{ msg }}</div>"), "_c(\"div\",{attrs:{\"id\":\"app\"},},[_v(_s(msg))])");
    }

    #[test]
    fn static_roots_are_hoisted() {
        let (result, _) = compile("<div><p><b>hi</b></p><span>{{ a }}</span></div>");
        assert_eq!(result.render.to_string(), "_c(\"div\",[_m(0),_c(\"span\",[_v(_s(a))])])");
        assert_eq!(result.static_renders.len(), 1);
        assert_eq!(result.static_renders[0].to_string(), "_c(\"p\",[_c(\"b\",[_v(\"hi\")])])");
    }

    #[test]
    fn conditionals_end_in_empty() {
        assert_eq!(
            render("<div><p v-if=\"a\">1</p><p v-else-if=\"b\">2</p></div>"),
            "_c(\"div\",[(a)?_c(\"p\",[_v(\"1\")]):(b)?_c(\"p\",[_v(\"2\")]):_e()])"
        );
        assert_eq!(
            render("<div><p v-if=\"a\">1</p><p v-else>2</p></div>"),
            "_c(\"div\",[(a)?_c(\"p\",[_v(\"1\")]):_c(\"p\",[_v(\"2\")])])"
        );
    }

    #[test]
    fn lone_loop_is_spread() {
        assert_eq!(
            render("<ul><li v-for=\"(item, i) in items\" :key=\"item.id\">{{ i }}</li></ul>"),
            "_c(\"ul\",_l((items),function(item,i){return _c(\"li\",{key:item.id,},[_v(_s(i))])}))"
        );
    }

    #[test]
    fn mixed_children_carry_normalization() {
        let out = render("<div><p v-for=\"x in xs\">{{ x }}</p><span></span></div>");
        assert!(out.ends_with(",2)"), "{out}");
    }

    #[test]
    fn once_outside_loop_is_static() {
        let (result, _) = compile("<div><p v-once>{{ a }}</p></div>");
        assert_eq!(result.render.to_string(), "_c(\"div\",[_m(0)])");
        assert_eq!(result.static_renders[0].to_string(), "_c(\"p\",[_v(_s(a))])");
    }

    #[test]
    fn once_in_keyed_loop_uses_the_key() {
        let out = render("<ul><li v-for=\"i in list\" :key=\"i\"><b v-once>{{ i }}</b></li></ul>");
        assert!(out.contains("_o(_c(\"b\",[_v(_s(i))]),0,i)"), "{out}");
    }

    #[test]
    fn once_in_unkeyed_loop_is_reported() {
        let (_, codes) = compile("<ul><li v-for=\"i in list\"><b v-once>{{ i }}</b></li></ul>");
        assert!(codes.contains(&ErrorCode::OnceInForWithoutKey));
    }

    #[test]
    fn unkeyed_component_loop_is_reported() {
        let (_, codes) = compile("<div><my-item v-for=\"i in list\"></my-item></div>");
        assert_eq!(codes, vec![ErrorCode::UnkeyedComponentLoop]);
        let (_, codes) = compile("<div><my-item v-for=\"i in list\" :key=\"i\"></my-item></div>");
        assert!(codes.is_empty());
    }

    #[test]
    fn slots_and_templates() {
        assert_eq!(
            render("<div><slot name=\"head\" :title=\"t\">fallback</slot></div>"),
            "_c(\"div\",[_t(\"head\",[_v(\"fallback\")],{\"title\":t})],2)"
        );
        assert_eq!(
            render("<div><template v-if=\"ok\"><b>1</b><i>{{ x }}</i></template></div>"),
            "_c(\"div\",[(ok)?[_c(\"b\",[_v(\"1\")]),_c(\"i\",[_v(_s(x))])]:_e()],2)"
        );
    }

    #[test]
    fn bindings_land_in_the_right_bag() {
        let (result, _) = compile(
            "<input class=\" a  b \" :class=\"{ on: x }\" style=\"color: red\" :value=\"v\" :aria-label.camel=\"l\" ref=\"box\">",
        );
        let RenderNode::Element { data: Some(data), .. } = &result.render else {
            panic!("expected element");
        };
        assert_eq!(data.static_class.as_deref(), Some("a b"));
        assert!(data.class.is_some());
        assert_eq!(data.static_style.as_deref(), Some("color: red"));
        assert_eq!(data.dom_props[0].name, PropName::Static("value".into()));
        assert_eq!(data.attrs[0].name, PropName::Static("ariaLabel".into()));
        assert_eq!(data.ref_name, Some(Expr::String("box".into())));
    }

    #[test]
    fn events_and_models() {
        let (result, _) = compile("<input v-model.trim=\"form.name\" @keyup.enter=\"submit\">");
        let RenderNode::Element { data: Some(data), .. } = &result.render else {
            panic!("expected element");
        };
        assert_eq!(data.on.len(), 2);
        assert_eq!(data.on[0].name, PropName::Static("input".into()));
        assert_eq!(data.on[1].name, PropName::Static("keyup".into()));
        assert_eq!(data.dom_props[0].name, PropName::Static("value".into()));
        assert_eq!(data.dom_props[0].value.to_string(), "form.name");
    }

    #[test]
    fn component_model_and_dynamic_is() {
        let (result, _) = compile("<component :is=\"view\" v-model=\"value\"></component>");
        let RenderNode::Element { tag, data: Some(data), component, .. } = &result.render else {
            panic!("expected element");
        };
        assert!(*component);
        assert_eq!(tag, &Tag::Dynamic(Expr::ident("view")));
        assert!(data.model.is_some());
    }

    #[test]
    fn model_requires_an_expression() {
        let (_, codes) = compile("<input v-model=\"\">");
        assert!(codes.contains(&ErrorCode::ModelWithoutExpression));
    }

    #[test]
    fn multiple_roots_render_a_fragment() {
        let (result, codes) = compile("<p>a</p><p>b</p>");
        assert_eq!(codes, vec![ErrorCode::MultipleRoots]);
        assert!(matches!(result.render, RenderNode::Fragment(_)));
    }

    #[test]
    fn empty_template_renders_a_div() {
        assert_eq!(render(""), "_c(\"div\")");
    }

    #[test]
    fn camelize_names() {
        assert_eq!(camelize("aria-label"), "ariaLabel");
        assert_eq!(camelize("plain"), "plain");
    }
}
