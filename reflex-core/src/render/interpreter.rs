//! Render interpreter.
//!
//! Walks a compiled render tree against a [`Scope`] and produces a fresh
//! vnode tree. Every state read happens through the scope, so running
//! [`render`] inside a watcher subscribes it to exactly what the template
//! used.

use std::sync::Arc;

use indexmap::IndexMap;

use super::eval::Scope;
use super::event::{build_handler, listener_key};
use super::helpers::{display_string, join_classes, normalize_style, parse_style_text, render_list, stringify_class, StaticCache};
use super::normalize::{list_flags, normalize_children, Rendered};
use super::vnode::{Listener, PatchFlags, VDirective, VKey, VModel, VNode, VNodeData, VNodeRef};
use crate::compiler::events::ListenerFlags;
use crate::compiler::ir::{Children, EventEntry, NodeData, PropBinding, PropName, RenderNode, Tag, TextPart};
use crate::compiler::CompiledTemplate;
use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{Function, Value};

/// Slot content supplied by a parent: receives the slot props.
pub type Slot = Arc<dyn Fn(&Value) -> RuntimeResult<Vec<VNodeRef>> + Send + Sync>;

pub type Slots = IndexMap<String, Slot>;

/// Render `template` into a single root vnode.
///
/// Several roots, or a root loop, come back as a fragment. The cache keeps
/// static subtrees and `v-once` nodes between calls.
pub fn render(
    template: &CompiledTemplate,
    scope: &Scope,
    cache: &mut StaticCache,
    slots: &Slots,
) -> RuntimeResult<VNodeRef> {
    cache.begin();
    let mut renderer = Renderer { template, cache, slots };
    let root = renderer.node(&template.render, scope)?.into_node();
    cache.finish();
    Ok(root)
}

struct Renderer<'a> {
    template: &'a CompiledTemplate,
    cache: &'a mut StaticCache,
    slots: &'a Slots,
}

impl Renderer<'_> {
    fn node(&mut self, node: &RenderNode, scope: &Scope) -> RuntimeResult<Rendered> {
        let vnode = match node {
            RenderNode::Element {
                tag,
                component,
                data,
                children,
            } => return self.element(tag, *component, data.as_deref(), children.as_ref(), scope),
            RenderNode::Text(parts) => VNode::text(text_of(parts, scope)?),
            RenderNode::Comment(text) => VNode::comment(text.as_str()),
            RenderNode::Empty => VNode::empty(),
            RenderNode::Static { index, in_for } => {
                if !*in_for {
                    if let Some(tree) = self.cache.static_tree(*index) {
                        return Ok(Rendered::Node(tree));
                    }
                }
                let source = self
                    .template
                    .static_renders
                    .get(*index)
                    .ok_or_else(|| RuntimeError::Render(format!("static render {index} is missing")))?;
                let tree = self.node(source, scope)?.into_node();
                return Ok(Rendered::Node(self.cache.store_static(*index, *in_for, &tree)));
            }
            RenderNode::Once { node, id, key } => {
                let key = scope.eval(key)?;
                if let Some(cached) = self.cache.once(*id, &key) {
                    return Ok(Rendered::Node(cached));
                }
                let tree = self.node(node, scope)?.into_node();
                return Ok(Rendered::Node(self.cache.store_once(*id, &key, &tree)));
            }
            RenderNode::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let branch = if scope.eval(test)?.is_truthy() { consequent } else { alternate };
                return self.node(branch, scope);
            }
            RenderNode::List {
                source,
                value_alias,
                key_alias,
                index_alias,
                body,
            } => {
                let source = scope.eval(source)?;
                let mut items = Vec::new();
                for (value, key, index) in render_list(&source) {
                    let aliases = [(value_alias, value), (key_alias, key), (index_alias, index)];
                    let item_scope = scope.child(
                        aliases
                            .into_iter()
                            .filter_map(|(alias, value)| alias.as_ref().map(|name| (name.clone(), value))),
                    );
                    match self.node(body, &item_scope)? {
                        Rendered::Node(node) => items.push(node),
                        Rendered::Nodes(nodes) => items.extend(nodes),
                        list @ Rendered::List(_) => items.push(list.into_node()),
                    }
                }
                return Ok(Rendered::List(items));
            }
            RenderNode::Slot {
                name,
                fallback,
                props,
                bind,
            } => return self.slot(name, fallback.as_ref(), props, bind.as_ref(), scope),
            RenderNode::Fragment(children) => {
                let (nodes, _) = self.children(children, scope)?;
                return Ok(Rendered::Nodes(nodes));
            }
        };
        Ok(Rendered::Node(vnode.into_ref()))
    }

    fn element(
        &mut self,
        tag: &Tag,
        component: bool,
        data: Option<&NodeData>,
        children: Option<&Children>,
        scope: &Scope,
    ) -> RuntimeResult<Rendered> {
        let tag = match tag {
            Tag::Static(tag) => tag.clone(),
            Tag::Dynamic(expr) => match scope.eval(expr)? {
                Value::Null => return Ok(Rendered::Node(VNode::empty().into_ref())),
                value => {
                    let name = value.to_js_string();
                    if name.is_empty() {
                        return Ok(Rendered::Node(VNode::empty().into_ref()));
                    }
                    name
                }
            },
        };

        let (vdata, key, mut flags) = match data {
            Some(data) => eval_data(data, scope, component)?,
            None => (VNodeData::default(), None, PatchFlags::empty()),
        };
        let kids = match children {
            Some(children) => {
                if has_dynamic_text_only(children) {
                    flags |= PatchFlags::TEXT;
                }
                let (nodes, list) = self.children(children, scope)?;
                flags |= list;
                nodes
            }
            None => Vec::new(),
        };

        let vnode = if component {
            VNode::component(tag, vdata, kids)
        } else {
            VNode::element(tag, vdata, kids)
        };
        Ok(Rendered::Node(vnode.with_key(key).with_patch_flags(flags).into_ref()))
    }

    /// Render and flatten a child list. A spread list also reports its
    /// fragment flag so the parent diffs the children as that list.
    fn children(&mut self, children: &Children, scope: &Scope) -> RuntimeResult<(Vec<VNodeRef>, PatchFlags)> {
        if children.spread {
            if let [only] = children.nodes.as_slice() {
                return Ok(match self.node(only, scope)? {
                    Rendered::List(items) => {
                        let flags = list_flags(&items);
                        (items, flags)
                    }
                    other => (normalize_children(vec![other], children.normalization), PatchFlags::empty()),
                });
            }
        }
        let parts = children
            .nodes
            .iter()
            .map(|node| self.node(node, scope))
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok((normalize_children(parts, children.normalization), PatchFlags::empty()))
    }

    fn slot(
        &mut self,
        name: &str,
        fallback: Option<&Children>,
        props: &[PropBinding],
        bind: Option<&crate::compiler::expr::Expr>,
        scope: &Scope,
    ) -> RuntimeResult<Rendered> {
        let mut entries: Vec<(String, Value)> = Vec::new();
        if let Some(bind) = bind {
            entries.extend(scope.eval(bind)?.entries().into_iter().map(|(k, v)| (k.to_string(), v)));
        }
        for prop in props {
            if let Some(name) = prop_name(&prop.name, scope)? {
                entries.push((name, scope.eval(&prop.value)?));
            }
        }
        let props = Value::object(entries);

        if let Some(slot) = self.slots.get(name) {
            let nodes = slot(&props)?;
            if !nodes.is_empty() || fallback.is_none() {
                return Ok(Rendered::Nodes(nodes));
            }
        }
        match fallback {
            Some(children) => Ok(Rendered::Nodes(self.children(children, scope)?.0)),
            None => Ok(Rendered::Nodes(Vec::new())),
        }
    }
}

fn has_dynamic_text_only(children: &Children) -> bool {
    matches!(children.nodes.as_slice(), [RenderNode::Text(parts)] if parts.iter().any(|p| matches!(p, TextPart::Dynamic(_))))
}

fn text_of(parts: &[TextPart], scope: &Scope) -> RuntimeResult<String> {
    let mut text = String::new();
    for part in parts {
        match part {
            TextPart::Static(s) => text.push_str(s),
            TextPart::Dynamic(expr) => text.push_str(&display_string(&scope.eval(expr)?)),
        }
    }
    Ok(text)
}

/// Resolve a possibly computed name. A computed `null` drops the binding.
fn prop_name(name: &PropName, scope: &Scope) -> RuntimeResult<Option<String>> {
    Ok(match name {
        PropName::Static(name) => Some(name.clone()),
        PropName::Dynamic(expr) => match scope.eval(expr)? {
            Value::Null => None,
            value => Some(value.to_js_string()),
        },
    })
}

fn add_listener(map: &mut IndexMap<String, Listener>, event: &str, flags: &ListenerFlags, handler: Function, front: bool) {
    let key = listener_key(event, flags);
    let listener = map.entry(key).or_insert_with(|| Listener {
        event: event.to_string(),
        handlers: Vec::new(),
        flags: flags.clone(),
    });
    if front {
        listener.handlers.insert(0, handler);
    } else {
        listener.handlers.push(handler);
    }
}

fn bind_events(
    entries: &[EventEntry],
    target: &mut IndexMap<String, Listener>,
    scope: &Scope,
) -> RuntimeResult<bool> {
    let mut bound = false;
    for entry in entries {
        let Some(event) = prop_name(&entry.name, scope)? else { continue };
        let handler = build_handler(&entry.binding, scope);
        add_listener(target, &event, &entry.binding.flags, handler, false);
        bound = true;
    }
    Ok(bound)
}

/// Evaluate element data: the node key, host-facing data and patch flags.
fn eval_data(
    data: &NodeData,
    scope: &Scope,
    component: bool,
) -> RuntimeResult<(VNodeData, Option<VKey>, PatchFlags)> {
    let mut out = VNodeData {
        pre: data.pre,
        slot: data.slot.clone(),
        ref_in_for: data.ref_in_for,
        ..VNodeData::default()
    };
    let mut flags = PatchFlags::empty();

    let key = match &data.key {
        Some(expr) => VKey::from_value(&scope.eval(expr)?),
        None => None,
    };

    if let Some(expr) = &data.ref_name {
        let name = scope.eval(expr)?;
        if !name.is_null() {
            out.ref_name = Some(name.to_js_string());
        }
        flags |= PatchFlags::NEED_PATCH;
    }

    let mut classes: Vec<String> = data.static_class.iter().cloned().collect();
    if let Some(expr) = &data.class {
        classes.push(stringify_class(&scope.eval(expr)?));
        flags |= PatchFlags::CLASS;
    }

    if let Some(text) = &data.static_style {
        out.style = parse_style_text(text);
    }
    if let Some(expr) = &data.style {
        out.style.extend(normalize_style(&scope.eval(expr)?));
        flags |= PatchFlags::STYLE;
    }

    for (bindings, target) in [(&data.attrs, &mut out.attrs), (&data.dom_props, &mut out.dom_props)] {
        for binding in bindings {
            if matches!(binding.name, PropName::Dynamic(_)) {
                flags |= PatchFlags::FULL_PROPS;
            } else if !binding.value.is_constant() {
                flags |= PatchFlags::PROPS;
            }
            if let Some(name) = prop_name(&binding.name, scope)? {
                target.insert(name, scope.eval(&binding.value)?);
            }
        }
    }

    if let Some(expr) = &data.bind_object {
        let object = scope.eval(expr)?;
        if !object.is_null() && !object.is_structured() {
            tracing::warn!(value = %object.to_js_string(), "v-bind without argument expects an object or array value");
        }
        for (name, value) in object.entries() {
            match &*name {
                "class" => classes.push(stringify_class(&value)),
                "style" => out.style.extend(normalize_style(&value)),
                _ => {
                    out.attrs.entry(name.to_string()).or_insert(value);
                }
            }
        }
        flags |= PatchFlags::FULL_PROPS;
    }

    let class = join_classes(classes);
    if !class.is_empty() {
        out.class = Some(class);
    }

    // Component events stay on the vnode; native ones go to the host node.
    let bound = if component {
        bind_events(&data.on, &mut out.component_on, scope)? | bind_events(&data.native_on, &mut out.on, scope)?
    } else {
        bind_events(&data.on, &mut out.on, scope)? | bind_events(&data.native_on, &mut out.on, scope)?
    };
    if bound {
        flags |= PatchFlags::HYDRATE_EVENTS;
    }

    if let Some(expr) = &data.on_object {
        let object = scope.eval(expr)?;
        let target = if component { &mut out.component_on } else { &mut out.on };
        for (event, handlers) in object.entries() {
            let handlers = match handlers {
                Value::Function(f) => vec![f],
                list => list.list_items().into_iter().filter_map(|v| v.as_function().cloned()).collect(),
            };
            for handler in handlers {
                add_listener(target, &event, &ListenerFlags::default(), handler, false);
            }
        }
        flags |= PatchFlags::HYDRATE_EVENTS;
    }

    for directive in &data.directives {
        let value = match &directive.value {
            Some(expr) => scope.eval(expr)?,
            None => Value::Null,
        };
        let arg = match &directive.arg {
            Some(name) => prop_name(name, scope)?,
            None => None,
        };
        out.directives.push(VDirective {
            name: directive.name.clone(),
            value,
            arg,
            modifiers: directive.modifiers.clone(),
            expression: directive.expression.clone(),
        });
        flags |= PatchFlags::NEED_PATCH;
    }

    if let Some(model) = &data.model {
        let value = scope.eval(&model.value)?;
        let callback = match scope.eval(&model.callback)? {
            Value::Function(f) => f,
            _ => return Err(RuntimeError::NotCallable(model.callback.to_string())),
        };
        out.attrs.insert("value".to_string(), value.clone());
        let target = if component { &mut out.component_on } else { &mut out.on };
        add_listener(target, "input", &ListenerFlags::default(), callback.clone(), true);
        out.model = Some(VModel {
            value,
            callback,
            expression: model.expression.clone(),
        });
        flags |= PatchFlags::PROPS | PatchFlags::HYDRATE_EVENTS;
    }

    Ok((out, key, flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompilerOptions};
    use crate::reactive::reactive;
    use crate::render::vnode::VNodeKind;
    use crate::render::RuntimeConfig;

    fn render_source(source: &str, state: Value) -> VNodeRef {
        let template = compile(source, &CompilerOptions::default());
        let scope = Scope::new(state, Arc::new(RuntimeConfig::default()));
        render(&template, &scope, &mut StaticCache::new(), &Slots::new()).unwrap()
    }

    #[test]
    fn interpolation_and_attributes() {
        let state = Value::object([("name", Value::from("Ada")), ("id", Value::from("main"))]);
        let root = render_source(r#"<div :id="id" class="a  b">Hi {{ name }}!</div>"#, state);
        assert_eq!(root.to_string(), r#"<div class="a b" id="main">Hi Ada!</div>"#);
        assert!(root.patch_flags.contains(PatchFlags::TEXT | PatchFlags::PROPS));
    }

    #[test]
    fn conditionals_and_lists() {
        let state = Value::object([
            ("show", Value::Bool(false)),
            ("items", Value::array([Value::from("x"), Value::from("y")])),
        ]);
        let root = render_source(
            r#"<ul><li v-if="show">hidden</li><li v-for="(item, i) in items" :key="item">{{ i }}:{{ item }}</li></ul>"#,
            state,
        );
        assert_eq!(root.to_string(), "<ul><!----><li>0:x</li><li>1:y</li></ul>");
        assert!(matches!(root.children[1].kind, VNodeKind::Fragment));
        assert!(root.children[1].patch_flags.contains(PatchFlags::KEYED_FRAGMENT));
    }

    #[test]
    fn lone_loop_is_spread_into_parent() {
        let state = Value::object([("n", Value::from(3))]);
        let root = render_source(r#"<ul><li v-for="i in n">{{ i }}</li></ul>"#, state);
        assert_eq!(root.to_string(), "<ul><li>1</li><li>2</li><li>3</li></ul>");
        assert!(root.patch_flags.contains(PatchFlags::UNKEYED_FRAGMENT));
    }

    #[test]
    fn class_and_style_bindings() {
        let state = Value::object([
            ("active", Value::Bool(true)),
            ("color", Value::from("red")),
        ]);
        let root = render_source(
            r#"<p class="base" :class="{ on: active, off: !active }" style="margin: 0" :style="{ color: color }" v-show="false"></p>"#,
            state,
        );
        assert_eq!(root.data.class.as_deref(), Some("base on"));
        let style = root.data.effective_style();
        assert_eq!(style.get("margin").map(String::as_str), Some("0"));
        assert_eq!(style.get("color").map(String::as_str), Some("red"));
        assert_eq!(style.get("display").map(String::as_str), Some("none"));
    }

    #[test]
    fn static_subtrees_are_reused() {
        let template = compile("<div><p><b>static</b></p><span>{{ n }}</span></div>", &CompilerOptions::default());
        let state = reactive(Value::object([("n", Value::from(1))]));
        let scope = Scope::new(state, Arc::new(RuntimeConfig::default()));
        let mut cache = StaticCache::new();
        let first = render(&template, &scope, &mut cache, &Slots::new()).unwrap();
        let second = render(&template, &scope, &mut cache, &Slots::new()).unwrap();
        assert!(first.children[0].is_static);
        assert!(Arc::ptr_eq(&first.children[0], &second.children[0]));
        assert!(!Arc::ptr_eq(&first.children[1], &second.children[1]));
    }

    #[test]
    fn handlers_are_collected_per_listener_key() {
        let state = reactive(Value::object([("count", Value::from(0))]));
        let root = render_source(r#"<button @click="count++" @click.once="count += 10">+</button>"#, state);
        assert_eq!(root.data.on["click"].handlers.len(), 1);
        assert_eq!(root.data.on["~click"].handlers.len(), 1);
        assert!(root.patch_flags.contains(PatchFlags::HYDRATE_EVENTS));
    }

    #[test]
    fn slots_render_with_props_and_fallback() {
        let template = compile(
            r#"<div><slot name="row" :item="7"></slot><slot>none</slot></div>"#,
            &CompilerOptions::default(),
        );
        let scope = Scope::new(Value::object(Vec::<(&str, Value)>::new()), Arc::new(RuntimeConfig::default()));
        let mut slots = Slots::new();
        let row: Slot = Arc::new(|props: &Value| {
            Ok(vec![VNode::text(format!("row {}", props.get("item").to_js_string())).into_ref()])
        });
        slots.insert("row".to_string(), row);
        let root = render(&template, &scope, &mut StaticCache::new(), &slots).unwrap();
        assert_eq!(root.to_string(), "<div>row 7none</div>");
    }

    #[test]
    fn dynamic_component_tag() {
        let state = Value::object([("view", Value::from("user-card")), ("none", Value::Null)]);
        let root = render_source(r#"<div><component :is="view" title="t"></component><component :is="none"></component></div>"#, state);
        assert!(root.children[0].is_component());
        assert_eq!(root.children[0].tag(), Some("user-card"));
        assert_eq!(root.children[1].text_content(), Some(""));
    }

    #[test]
    fn render_errors_propagate() {
        let template = compile("<p>{{ user.name }}</p>", &CompilerOptions::default());
        let scope = Scope::new(Value::object([("user", Value::Null)]), Arc::new(RuntimeConfig::default()));
        let err = render(&template, &scope, &mut StaticCache::new(), &Slots::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidAccess { .. }));
    }
}
