//! Render IR.
//!
//! Code generation produces a tree of [`RenderNode`]s instead of source
//! text. The render interpreter walks it to build virtual nodes. Every type
//! is serializable so compiled templates can be cached, and `Display`
//! prints the tree in the classic `_c`/`_v`/`_l`/`_m` helper notation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::events::{EventBinding, Guard, HandlerKind, KeyCheck, ModifierKey};
use super::expr::Expr;

/// Element tag: literal, or computed by `<component :is="…">`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tag {
    Static(String),
    Dynamic(Expr),
}

/// A name that may be computed (`:[name]="…"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropName {
    Static(String),
    Dynamic(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropBinding {
    pub name: PropName,
    pub value: Expr,
}

impl PropBinding {
    pub fn fixed(name: impl Into<String>, value: Expr) -> Self {
        Self {
            name: PropName::Static(name.into()),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub name: PropName,
    pub binding: EventBinding,
}

/// A directive carried into node data (`v-show` and custom directives).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveBinding {
    pub name: String,
    pub raw_name: String,
    pub value: Option<Expr>,
    pub expression: Option<String>,
    pub arg: Option<PropName>,
    pub modifiers: Vec<String>,
}

/// `v-model` on a component: the bound value plus an assignment callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBinding {
    pub value: Expr,
    pub callback: Expr,
    pub expression: String,
}

/// Everything besides tag and children that describes an element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub key: Option<Expr>,
    pub ref_name: Option<Expr>,
    pub ref_in_for: bool,
    pub pre: bool,
    pub directives: Vec<DirectiveBinding>,
    pub static_class: Option<String>,
    pub class: Option<Expr>,
    pub static_style: Option<String>,
    pub style: Option<Expr>,
    pub attrs: Vec<PropBinding>,
    pub dom_props: Vec<PropBinding>,
    /// `v-bind="object"`: merged into attributes at render time.
    pub bind_object: Option<Expr>,
    pub on: Vec<EventEntry>,
    pub native_on: Vec<EventEntry>,
    /// `v-on="object"`: a mapping of event names to handlers.
    pub on_object: Option<Expr>,
    /// Slot this node is distributed to inside its parent component.
    pub slot: Option<String>,
    pub model: Option<ModelBinding>,
}

impl NodeData {
    pub fn is_empty(&self) -> bool {
        self == &NodeData::default()
    }

    pub fn directive(&self, name: &str) -> Option<&DirectiveBinding> {
        self.directives.iter().find(|dir| dir.name == name)
    }
}

/// A children list and the flattening it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Children {
    pub nodes: Vec<RenderNode>,
    pub normalization: u8,
    /// The single node evaluates to the whole list (a lone loop).
    pub spread: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextPart {
    Static(String),
    Dynamic(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderNode {
    /// `_c(tag, data, children, normalization)`.
    Element {
        tag: Tag,
        component: bool,
        data: Option<Box<NodeData>>,
        children: Option<Children>,
    },
    /// `_v(text)`; dynamic parts go through `_s`.
    Text(Vec<TextPart>),
    /// `_e(text)`: a kept comment.
    Comment(String),
    /// `_e()`: renders nothing.
    Empty,
    /// `_m(index, in_for)`: a cached static subtree.
    Static { index: usize, in_for: bool },
    /// `_o(node, id, key)`: render once per loop key.
    Once {
        node: Box<RenderNode>,
        id: usize,
        key: Expr,
    },
    Conditional {
        test: Expr,
        consequent: Box<RenderNode>,
        alternate: Box<RenderNode>,
    },
    /// `_l(source, function(value, key, index){…})`.
    List {
        source: Expr,
        value_alias: Option<String>,
        key_alias: Option<String>,
        index_alias: Option<String>,
        body: Box<RenderNode>,
    },
    /// `_t(name, fallback, props, bind)`.
    Slot {
        name: String,
        fallback: Option<Children>,
        props: Vec<PropBinding>,
        bind: Option<Expr>,
    },
    /// Children of a plain `<template>`, or several roots.
    Fragment(Children),
}

fn quoted(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Static(tag) => f.write_str(&quoted(tag)),
            Tag::Dynamic(expr) => write!(f, "{expr}"),
        }
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropName::Static(name) => f.write_str(&quoted(name)),
            PropName::Dynamic(expr) => write!(f, "[{expr}]"),
        }
    }
}

fn write_props(f: &mut fmt::Formatter<'_>, label: &str, props: &[PropBinding]) -> fmt::Result {
    write!(f, "{label}:{{")?;
    for (i, prop) in props.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}:{}", prop.name, prop.value)?;
    }
    f.write_str("},")
}

fn write_events(f: &mut fmt::Formatter<'_>, label: &str, events: &[EventEntry]) -> fmt::Result {
    write!(f, "{label}:{{")?;
    for (i, entry) in events.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}:{}", entry.name, entry.binding)?;
    }
    f.write_str("},")
}

impl fmt::Display for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        if !self.directives.is_empty() {
            f.write_str("directives:[")?;
            for (i, dir) in self.directives.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{{name:{}", quoted(&dir.name))?;
                if let Some(value) = &dir.value {
                    write!(f, ",value:({value})")?;
                }
                f.write_str("}")?;
            }
            f.write_str("],")?;
        }
        if let Some(key) = &self.key {
            write!(f, "key:{key},")?;
        }
        if let Some(ref_name) = &self.ref_name {
            write!(f, "ref:{ref_name},")?;
            if self.ref_in_for {
                f.write_str("refInFor:true,")?;
            }
        }
        if self.pre {
            f.write_str("pre:true,")?;
        }
        if let Some(class) = &self.static_class {
            write!(f, "staticClass:{},", quoted(class))?;
        }
        if let Some(class) = &self.class {
            write!(f, "class:{class},")?;
        }
        if let Some(style) = &self.static_style {
            write!(f, "staticStyle:{},", quoted(style))?;
        }
        if let Some(style) = &self.style {
            write!(f, "style:{style},")?;
        }
        if !self.attrs.is_empty() {
            write_props(f, "attrs", &self.attrs)?;
        }
        if !self.dom_props.is_empty() {
            write_props(f, "domProps", &self.dom_props)?;
        }
        if !self.on.is_empty() {
            write_events(f, "on", &self.on)?;
        }
        if !self.native_on.is_empty() {
            write_events(f, "nativeOn", &self.native_on)?;
        }
        if let Some(slot) = &self.slot {
            write!(f, "slot:{},", quoted(slot))?;
        }
        if let Some(model) = &self.model {
            write!(
                f,
                "model:{{value:({}),callback:{},expression:{}}},",
                model.value,
                model.callback,
                quoted(&model.expression)
            )?;
        }
        f.write_str("}")?;
        if let Some(object) = &self.bind_object {
            write!(f, "|bind({object})")?;
        }
        if let Some(object) = &self.on_object {
            write!(f, "|on({object})")?;
        }
        Ok(())
    }
}

fn write_guard(f: &mut fmt::Formatter<'_>, guard: &Guard) -> fmt::Result {
    let modifier_field = |key: &ModifierKey| match key {
        ModifierKey::Ctrl => "$event.ctrlKey",
        ModifierKey::Shift => "$event.shiftKey",
        ModifierKey::Alt => "$event.altKey",
        ModifierKey::Meta => "$event.metaKey",
    };
    match guard {
        Guard::Keys(keys) => {
            f.write_str("if(!$event.type.indexOf('key')")?;
            for key in keys {
                match key {
                    KeyCheck::Code(code) => write!(f, "&&$event.keyCode!=={code}")?,
                    KeyCheck::Alias { key, codes, names } => write!(
                        f,
                        "&&_k($event.keyCode,{},{:?},$event.key,{:?})",
                        quoted(key),
                        codes,
                        names
                    )?,
                }
            }
            f.write_str(")return null;")
        }
        Guard::StopPropagation => f.write_str("$event.stopPropagation();"),
        Guard::PreventDefault => f.write_str("$event.preventDefault();"),
        Guard::SelfOnly => f.write_str("if($event.target !== $event.currentTarget)return null;"),
        Guard::Modifier(key) => write!(f, "if(!{})return null;", modifier_field(key)),
        Guard::Exact(keys) => {
            let fields: Vec<_> = keys.iter().map(modifier_field).collect();
            write!(f, "if({})return null;", fields.join("||"))
        }
        Guard::Button(button) => write!(f, "if('button' in $event && $event.button !== {})return null;", button.code()),
    }
}

impl fmt::Display for EventBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.guards.is_empty() {
            return match self.kind {
                HandlerKind::Method | HandlerKind::FunctionExpression => write!(f, "{}", self.handler),
                HandlerKind::Invocation => write!(f, "function($event){{return {}}}", self.handler),
                HandlerKind::Statements => write!(f, "function($event){{{}}}", self.handler),
                HandlerKind::Empty => f.write_str("function(){}"),
            };
        }
        f.write_str("function($event){")?;
        for guard in &self.guards {
            write_guard(f, guard)?;
        }
        match self.kind {
            HandlerKind::Method => write!(f, "return {}.apply(null, arguments)", self.handler)?,
            HandlerKind::FunctionExpression => write!(f, "return ({}).apply(null, arguments)", self.handler)?,
            HandlerKind::Invocation => write!(f, "return {}", self.handler)?,
            HandlerKind::Statements => write!(f, "{}", self.handler)?,
            HandlerKind::Empty => {}
        }
        f.write_str("}")
    }
}

impl fmt::Display for Children {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.spread {
            if let Some(node) = self.nodes.first() {
                return write!(f, "{node}");
            }
        }
        f.write_str("[")?;
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{node}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for RenderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderNode::Element {
                tag, data, children, ..
            } => {
                write!(f, "_c({tag}")?;
                if let Some(data) = data {
                    write!(f, ",{data}")?;
                }
                if let Some(children) = children {
                    write!(f, ",{children}")?;
                    if children.normalization > 0 {
                        write!(f, ",{}", children.normalization)?;
                    }
                }
                f.write_str(")")
            }
            RenderNode::Text(parts) => {
                f.write_str("_v(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("+")?;
                    }
                    match part {
                        TextPart::Static(text) => f.write_str(&quoted(text))?,
                        TextPart::Dynamic(expr) => write!(f, "_s({expr})")?,
                    }
                }
                f.write_str(")")
            }
            RenderNode::Comment(text) => write!(f, "_e({})", quoted(text)),
            RenderNode::Empty => f.write_str("_e()"),
            RenderNode::Static { index, in_for } => {
                if *in_for {
                    write!(f, "_m({index},true)")
                } else {
                    write!(f, "_m({index})")
                }
            }
            RenderNode::Once { node, id, key } => write!(f, "_o({node},{id},{key})"),
            RenderNode::Conditional {
                test,
                consequent,
                alternate,
            } => write!(f, "({test})?{consequent}:{alternate}"),
            RenderNode::List {
                source,
                value_alias,
                key_alias,
                index_alias,
                body,
            } => {
                let params: Vec<&str> = [value_alias, key_alias, index_alias]
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .collect();
                write!(f, "_l(({source}),function({}){{return {body}}})", params.join(","))
            }
            RenderNode::Slot {
                name,
                fallback,
                props,
                bind,
            } => {
                write!(f, "_t({}", quoted(name))?;
                if let Some(fallback) = fallback {
                    write!(f, ",{fallback}")?;
                } else if !props.is_empty() || bind.is_some() {
                    f.write_str(",null")?;
                }
                if !props.is_empty() {
                    f.write_str(",{")?;
                    for (i, prop) in props.iter().enumerate() {
                        if i > 0 {
                            f.write_str(",")?;
                        }
                        write!(f, "{}:{}", prop.name, prop.value)?;
                    }
                    f.write_str("}")?;
                }
                if let Some(bind) = bind {
                    write!(f, ",{bind}")?;
                }
                f.write_str(")")
            }
            RenderNode::Fragment(children) => write!(f, "{children}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::expr::parse_expression;

    #[test]
    fn element_notation() {
        let node = RenderNode::Element {
            tag: Tag::Static("div".into()),
            component: false,
            data: Some(Box::new(NodeData {
                attrs: vec![PropBinding::fixed("id", Expr::String("app".into()))],
                ..NodeData::default()
            })),
            children: Some(Children {
                nodes: vec![
                    RenderNode::Text(vec![
                        TextPart::Static("Hi ".into()),
                        TextPart::Dynamic(parse_expression("name").unwrap()),
                    ]),
                    RenderNode::Static { index: 0, in_for: false },
                ],
                normalization: 0,
                spread: false,
            }),
        };
        assert_eq!(
            node.to_string(),
            "_c(\"div\",{attrs:{\"id\":\"app\"},},[_v(\"Hi \"+_s(name)),_m(0)])"
        );
    }

    #[test]
    fn list_and_conditional_notation() {
        let list = RenderNode::List {
            source: parse_expression("items").unwrap(),
            value_alias: Some("item".into()),
            key_alias: None,
            index_alias: Some("i".into()),
            body: Box::new(RenderNode::Empty),
        };
        assert_eq!(list.to_string(), "_l((items),function(item,i){return _e()})");

        let cond = RenderNode::Conditional {
            test: parse_expression("ok").unwrap(),
            consequent: Box::new(RenderNode::Comment("yes".into())),
            alternate: Box::new(RenderNode::Empty),
        };
        assert_eq!(cond.to_string(), "(ok)?_e(\"yes\"):_e()");
    }

    #[test]
    fn guarded_handler_notation() {
        let binding = EventBinding {
            kind: HandlerKind::Method,
            handler: parse_expression("save").unwrap(),
            guards: vec![Guard::StopPropagation, Guard::Modifier(ModifierKey::Ctrl)],
            flags: Default::default(),
        };
        assert_eq!(
            binding.to_string(),
            "function($event){$event.stopPropagation();if(!$event.ctrlKey)return null;return save.apply(null, arguments)}"
        );
    }
}
