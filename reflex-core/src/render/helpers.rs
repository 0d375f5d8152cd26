//! Render helpers.
//!
//! The runtime side of the `_l`, `_k`, `_q`, `_n`, `_s`, `_f`, `_m` and
//! `_o` helpers a compiled template refers to.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::vnode::{VKey, VNode, VNodeRef};
use super::RuntimeConfig;
use crate::reactive::RecordKind;
use crate::value::{Function, Value};

/// One iteration of a `v-for`: `(value, key or index, index)`.
pub type ListItem = (Value, Value, Value);

/// Enumerate a loop source.
///
/// Sequences and strings yield `(item, index)`, a number `n` yields
/// `(1..=n, index)`, keyed collections yield `([key, value], index)` in
/// insertion order and plain mappings `(value, key, index)`. Anything else
/// renders nothing.
pub fn render_list(source: &Value) -> Vec<ListItem> {
    match source {
        Value::Null | Value::Bool(_) | Value::Function(_) => Vec::new(),
        Value::Number(n) => {
            let count = if n.is_finite() && *n > 0.0 { n.floor() as usize } else { 0 };
            (0..count)
                .map(|i| (Value::from(i + 1), Value::from(i), Value::Null))
                .collect()
        }
        Value::String(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (Value::string(c.to_string()), Value::from(i), Value::Null))
            .collect(),
        Value::Record(_) | Value::Observed(_) => match source.record_kind() {
            Some(RecordKind::Array) => source
                .list_items()
                .into_iter()
                .enumerate()
                .map(|(i, item)| (item, Value::from(i), Value::Null))
                .collect(),
            Some(RecordKind::Map) => source
                .entries()
                .into_iter()
                .enumerate()
                .map(|(i, (key, value))| (Value::array([Value::String(key), value]), Value::from(i), Value::Null))
                .collect(),
            _ => source
                .entries()
                .into_iter()
                .enumerate()
                .map(|(i, (key, value))| (value, Value::String(key), Value::from(i)))
                .collect(),
        },
    }
}

/// `camelCase` to `kebab-case`.
pub fn hyphenate(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// The `_k` helper. True when the key event does NOT match `key`.
///
/// Key names are compared when both the alias and the event carry one and
/// the alias has no runtime code override. Otherwise key codes decide,
/// then the hyphenated event key name.
pub fn check_key_codes(
    event_key_code: Option<u32>,
    key: &str,
    builtin_codes: &[u32],
    event_key: Option<&str>,
    builtin_names: &[String],
    config: &RuntimeConfig,
) -> bool {
    let configured = config.key_codes.get(key).filter(|codes| !codes.is_empty());
    let mapped = configured.map(Vec::as_slice).unwrap_or(builtin_codes);
    if let (false, Some(event_key), None) = (builtin_names.is_empty(), event_key, configured) {
        return !builtin_names.iter().any(|name| name == event_key);
    }
    if !mapped.is_empty() {
        return match event_key_code {
            Some(code) => !mapped.contains(&code),
            None => true,
        };
    }
    if let Some(event_key) = event_key {
        return hyphenate(event_key) != key;
    }
    event_key_code.is_none()
}

/// The `_q` helper: structural equality, with scalars compared by their
/// string form.
pub fn loose_equal(a: &Value, b: &Value) -> bool {
    if a.same(b) {
        return true;
    }
    match (a.is_structured(), b.is_structured()) {
        (true, true) => {
            let a_array = a.record_kind() == Some(RecordKind::Array);
            let b_array = b.record_kind() == Some(RecordKind::Array);
            if a_array != b_array {
                return false;
            }
            if a_array {
                let (xs, ys) = (a.list_items(), b.list_items());
                xs.len() == ys.len() && xs.iter().zip(&ys).all(|(x, y)| loose_equal(x, y))
            } else {
                let (xs, ys) = (a.entries(), b.entries());
                xs.len() == ys.len()
                    && xs.iter().all(|(key, x)| {
                        ys.iter().find(|(k, _)| k == key).is_some_and(|(_, y)| loose_equal(x, y))
                    })
            }
        }
        (false, false) => a.to_js_string() == b.to_js_string(),
        _ => false,
    }
}

/// Longest numeric prefix of `text`, as `parseFloat` reads it.
pub fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    for word in ["Infinity", "+Infinity"] {
        if text.starts_with(word) {
            return f64::INFINITY;
        }
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || (end == digits_start + 1 && bytes[digits_start] == b'.') {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

/// The `_n` helper: a number when the value parses as one, otherwise the
/// value unchanged.
pub fn to_number(value: &Value) -> Value {
    let n = match value {
        Value::Number(n) => *n,
        Value::String(s) => parse_float(s),
        _ => f64::NAN,
    };
    if n.is_nan() {
        value.clone()
    } else {
        Value::Number(n)
    }
}

/// The `_s` helper.
pub fn display_string(value: &Value) -> String {
    value.to_display_string()
}

/// The `_f` helper. Unknown filters pass values through.
pub fn resolve_filter(name: &str, config: &RuntimeConfig) -> Function {
    if let Some(filter) = config.filters.get(name) {
        return filter.clone();
    }
    tracing::warn!(filter = name, "failed to resolve filter");
    Function::new(format!("{name} (unresolved)"), |args| Ok(args.first().cloned().unwrap_or_default()))
}

/// Class binding to a class list: strings as-is, sequences item by item,
/// mappings by their truthy keys.
pub fn stringify_class(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Record(_) | Value::Observed(_) => {
            if value.record_kind() == Some(RecordKind::Array) {
                join_classes(value.list_items().iter().map(stringify_class))
            } else {
                join_classes(
                    value
                        .entries()
                        .into_iter()
                        .filter(|(_, on)| on.is_truthy())
                        .map(|(name, _)| name.to_string()),
                )
            }
        }
        _ => String::new(),
    }
}

/// Join class names, skipping empty ones.
pub fn join_classes(classes: impl IntoIterator<Item = String>) -> String {
    classes
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `a: b; c: d` into declarations. Semicolons inside parentheses do
/// not split.
pub fn parse_style_text(text: &str) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    let mut depth = 0usize;
    let mut start = 0;
    let push = |decl: &str, out: &mut IndexMap<String, String>| {
        if let Some((name, value)) = decl.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                out.insert(name.to_string(), value.trim().to_string());
            }
        }
    };
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                push(&text[start..i], &mut out);
                start = i + 1;
            }
            _ => {}
        }
    }
    push(&text[start..], &mut out);
    out
}

/// Style binding to declarations: strings are parsed, sequences merged in
/// order, mappings taken with their keys hyphenated.
pub fn normalize_style(value: &Value) -> IndexMap<String, String> {
    match value {
        Value::String(s) => parse_style_text(s),
        Value::Record(_) | Value::Observed(_) => {
            if value.record_kind() == Some(RecordKind::Array) {
                let mut out = IndexMap::new();
                for item in value.list_items() {
                    out.extend(normalize_style(&item));
                }
                out
            } else {
                value
                    .entries()
                    .into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(name, v)| (hyphenate(&name), v.to_js_string()))
                    .collect()
            }
        }
        _ => IndexMap::new(),
    }
}

struct OnceEntry {
    generation: u64,
    node: VNodeRef,
}

/// Cached static subtrees (`_m`) and once-rendered nodes (`_o`).
///
/// Static trees outside loops render once and are handed out again as the
/// same node. Once entries are keyed by loop key and dropped after a render
/// in which their key did not appear.
#[derive(Default)]
pub struct StaticCache {
    trees: HashMap<usize, VNodeRef>,
    once: HashMap<String, OnceEntry>,
    generation: u64,
}

impl StaticCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a render pass.
    pub fn begin(&mut self) {
        self.generation += 1;
    }

    /// End a render pass, dropping once entries it did not use.
    pub fn finish(&mut self) {
        let generation = self.generation;
        self.once.retain(|_, entry| entry.generation == generation);
    }

    pub fn static_tree(&self, index: usize) -> Option<VNodeRef> {
        self.trees.get(&index).cloned()
    }

    /// Mark `node` as static tree `index`. Trees inside loops are not kept.
    pub fn store_static(&mut self, index: usize, in_for: bool, node: &VNode) -> VNodeRef {
        let marked = node.marked_static(VKey::text(format!("__static__{index}")), false).into_ref();
        if !in_for {
            self.trees.insert(index, marked.clone());
        }
        marked
    }

    fn once_key(id: usize, key: &Value) -> String {
        format!("__once__{id}_{}", key.to_js_string())
    }

    pub fn once(&mut self, id: usize, key: &Value) -> Option<VNodeRef> {
        let generation = self.generation;
        let entry = self.once.get_mut(&Self::once_key(id, key))?;
        entry.generation = generation;
        Some(entry.node.clone())
    }

    pub fn store_once(&mut self, id: usize, key: &Value, node: &VNode) -> VNodeRef {
        let cache_key = Self::once_key(id, key);
        let marked = node.marked_static(VKey::text(cache_key.clone()), true).into_ref();
        self.once.insert(
            cache_key,
            OnceEntry {
                generation: self.generation,
                node: marked.clone(),
            },
        );
        marked
    }

    pub fn len(&self) -> usize {
        self.trees.len() + self.once.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.trees.clear();
        self.once.clear();
    }
}

impl std::fmt::Debug for StaticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCache")
            .field("trees", &self.trees.len())
            .field("once", &self.once.len())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::reactive;
    use crate::render::vnode::VNodeData;

    #[test]
    fn lists_over_every_source() {
        let items = render_list(&Value::array([Value::from("a"), Value::from("b")]));
        assert_eq!(items[1], (Value::from("b"), Value::from(1), Value::Null));

        let range = render_list(&Value::from(3));
        let values: Vec<_> = range.iter().map(|(v, _, _)| v.to_number()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(range[0].1, Value::from(0));

        let chars = render_list(&Value::from("hé"));
        assert_eq!(chars[1].0, Value::from("é"));

        let object = render_list(&Value::object([("x", Value::from(1)), ("y", Value::from(2))]));
        assert_eq!(object[1], (Value::from(2), Value::from("y"), Value::from(1)));

        let map = render_list(&Value::map([("k", Value::from(9))]));
        assert_eq!(map[0].0.get(0usize), Value::from("k"));
        assert_eq!(map[0].0.get(1usize), Value::from(9));

        assert!(render_list(&Value::Null).is_empty());
    }

    #[test]
    fn key_codes_follow_name_then_code() {
        let config = RuntimeConfig::default();
        let names = vec!["Esc".to_string(), "Escape".to_string()];
        assert!(!check_key_codes(Some(27), "esc", &[27], Some("Escape"), &names, &config));
        assert!(check_key_codes(Some(27), "esc", &[27], Some("Enter"), &names, &config));
        assert!(!check_key_codes(Some(27), "esc", &[27], None, &names, &config));
        // Custom alias without tables: the hyphenated key name decides.
        assert!(!check_key_codes(Some(0), "page-down", &[], Some("PageDown"), &[], &config));
        assert!(check_key_codes(None, "page-down", &[], Some("PageUp"), &[], &config));
    }

    #[test]
    fn loose_equality() {
        assert!(loose_equal(&Value::from(1), &Value::from("1")));
        assert!(!loose_equal(&Value::from(1), &Value::from(2)));
        let a = Value::array([Value::from(1), Value::object([("x", Value::from("y"))])]);
        let b = reactive(Value::array([Value::from("1"), Value::object([("x", Value::from("y"))])]));
        assert!(loose_equal(&a, &b));
        assert!(!loose_equal(&a, &Value::object([("0", Value::from(1))])));
    }

    #[test]
    fn numbers_parse_like_parse_float() {
        assert_eq!(to_number(&Value::from("12.5px")), Value::from(12.5));
        assert_eq!(to_number(&Value::from(" -3e2")), Value::from(-300.0));
        assert_eq!(to_number(&Value::from("abc")), Value::from("abc"));
        assert_eq!(to_number(&Value::from(".5")), Value::from(0.5));
        assert_eq!(to_number(&Value::from(".")), Value::from("."));
    }

    #[test]
    fn class_and_style_bindings() {
        let class = Value::array([
            Value::from("a"),
            Value::object([("b", Value::Bool(true)), ("c", Value::Bool(false))]),
        ]);
        assert_eq!(stringify_class(&class), "a b");

        let style = parse_style_text("color: red; background: url(a;b)");
        assert_eq!(style.get("background").map(String::as_str), Some("url(a;b)"));

        let bound = normalize_style(&Value::object([("fontSize", Value::from("12px"))]));
        assert_eq!(bound.get("font-size").map(String::as_str), Some("12px"));
    }

    #[test]
    fn unknown_filters_are_identity() {
        let f = resolve_filter("missing", &RuntimeConfig::default());
        assert_eq!(f.call(&[Value::from(5)]).unwrap(), Value::from(5));
    }

    #[test]
    fn once_entries_are_pruned() {
        let mut cache = StaticCache::new();
        let node = VNode::element("b", VNodeData::default(), vec![]);
        cache.begin();
        let first = cache.store_once(0, &Value::from("a"), &node);
        cache.store_once(0, &Value::from("b"), &node);
        cache.finish();
        assert_eq!(cache.len(), 2);

        cache.begin();
        let hit = cache.once(0, &Value::from("a")).unwrap();
        assert!(std::sync::Arc::ptr_eq(&hit, &first));
        cache.finish();
        assert_eq!(cache.len(), 1);
        assert_eq!(hit.key, Some(VKey::text("__once__0_a")));
    }
}
