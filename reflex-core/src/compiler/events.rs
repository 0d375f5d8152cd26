//! Event handler compilation.
//!
//! `@keyup.enter.prevent="submit"` compiles to an event name, a list of
//! guards evaluated before the handler, and a classified handler body. The
//! key filter always comes first; other guards follow in the order their
//! modifiers were written, and a failing guard skips the handler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::expr::{parse_expression, parse_statements, Expr};

/// Built-in key codes for key modifiers.
pub fn builtin_key_codes(key: &str) -> Option<&'static [u32]> {
    Some(match key {
        "esc" => &[27],
        "tab" => &[9],
        "enter" => &[13],
        "space" => &[32],
        "up" => &[38],
        "left" => &[37],
        "right" => &[39],
        "down" => &[40],
        "delete" => &[8, 46],
        _ => return None,
    })
}

/// Built-in `KeyboardEvent.key` names for key modifiers. Several names
/// cover older browsers.
pub fn builtin_key_names(key: &str) -> Option<&'static [&'static str]> {
    Some(match key {
        "esc" => &["Esc", "Escape"],
        "tab" => &["Tab"],
        "enter" => &["Enter"],
        "space" => &[" ", "Spacebar"],
        "up" => &["Up", "ArrowUp"],
        "left" => &["Left", "ArrowLeft"],
        "right" => &["Right", "ArrowRight"],
        "down" => &["Down", "ArrowDown"],
        "delete" => &["Backspace", "Delete", "Del"],
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierKey {
    Ctrl,
    Shift,
    Alt,
    Meta,
}

impl ModifierKey {
    pub const ALL: [ModifierKey; 4] = [ModifierKey::Ctrl, ModifierKey::Shift, ModifierKey::Alt, ModifierKey::Meta];

    fn parse(name: &str) -> Option<Self> {
        match name {
            "ctrl" => Some(ModifierKey::Ctrl),
            "shift" => Some(ModifierKey::Shift),
            "alt" => Some(ModifierKey::Alt),
            "meta" => Some(ModifierKey::Meta),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// The `button` field value for this button.
    pub fn code(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        }
    }
}

/// One accepted key of a key filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyCheck {
    /// A numeric modifier such as `.13`: compares `keyCode` only.
    Code(u32),
    /// A named key, checked against the event's key name and code.
    Alias {
        key: String,
        codes: Vec<u32>,
        names: Vec<String>,
    },
}

/// A check run before the handler. Returning false skips the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Guard {
    /// Keyboard events pass only if one of the keys matches.
    Keys(Vec<KeyCheck>),
    StopPropagation,
    PreventDefault,
    /// The event target must be the element itself.
    SelfOnly,
    Modifier(ModifierKey),
    /// None of the listed modifier keys may be held.
    Exact(Vec<ModifierKey>),
    /// Pointer events pass only for this button.
    Button(MouseButton),
}

/// How the handler expression is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// `@click="save"`: a function reference, called with the event.
    Method,
    /// `@click="e => save(e)"`: a function literal, called with the event.
    FunctionExpression,
    /// `@click="save(1)"`: evaluated as-is; the event is `$event`.
    Invocation,
    /// Anything else: evaluated as statements with `$event` in scope.
    Statements,
    /// No expression; only the guards run.
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerFlags {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
    /// Listen on the component's root element instead of its emitted events.
    pub native: bool,
}

/// A compiled `v-on` binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBinding {
    pub kind: HandlerKind,
    pub handler: Expr,
    pub guards: Vec<Guard>,
    pub flags: ListenerFlags,
}

/// Resolve the listened event name. `click.right` listens to
/// `contextmenu` and `click.middle` to `mouseup`.
pub fn event_name(name: &str, modifiers: &[String]) -> String {
    let has = |m: &str| modifiers.iter().any(|x| x == m);
    match name {
        "click" if has("right") => "contextmenu".to_string(),
        "click" if has("middle") => "mouseup".to_string(),
        _ => name.to_string(),
    }
}

/// Split off the listener flags and compile the guards.
pub fn compile_guards(
    name: &str,
    modifiers: &[String],
    key_codes: &BTreeMap<String, Vec<u32>>,
) -> (Vec<Guard>, ListenerFlags) {
    let mut flags = ListenerFlags::default();
    let mut keys = Vec::new();
    let mut guards = Vec::new();

    for modifier in modifiers {
        let modifier = modifier.as_str();
        match modifier {
            "capture" => flags.capture = true,
            "once" => flags.once = true,
            "passive" => flags.passive = true,
            "native" => flags.native = true,
            "stop" => guards.push(Guard::StopPropagation),
            "prevent" => guards.push(Guard::PreventDefault),
            "self" => guards.push(Guard::SelfOnly),
            "exact" => {
                let listed: Vec<_> = modifiers.iter().filter_map(|m| ModifierKey::parse(m)).collect();
                let unlisted = ModifierKey::ALL.into_iter().filter(|k| !listed.contains(k)).collect();
                guards.push(Guard::Exact(unlisted));
            }
            "left" | "middle" | "right" => {
                let button = match modifier {
                    "left" => MouseButton::Left,
                    "middle" => MouseButton::Middle,
                    _ => MouseButton::Right,
                };
                // `click.right` already listens to `contextmenu`.
                if name == "click" && button == MouseButton::Right {
                    continue;
                }
                guards.push(Guard::Button(button));
                if button != MouseButton::Middle {
                    keys.push(key_check(modifier, key_codes));
                }
            }
            other => match ModifierKey::parse(other) {
                Some(key) => guards.push(Guard::Modifier(key)),
                None => keys.push(key_check(other, key_codes)),
            },
        }
    }

    if !keys.is_empty() {
        guards.insert(0, Guard::Keys(keys));
    }
    (guards, flags)
}

fn key_check(key: &str, key_codes: &BTreeMap<String, Vec<u32>>) -> KeyCheck {
    if let Ok(code) = key.parse::<u32>() {
        if code != 0 {
            return KeyCheck::Code(code);
        }
    }
    let codes = key_codes
        .get(key)
        .cloned()
        .or_else(|| builtin_key_codes(key).map(<[u32]>::to_vec))
        .unwrap_or_default();
    let names = builtin_key_names(key)
        .map(|names| names.iter().map(|n| n.to_string()).collect())
        .unwrap_or_default();
    KeyCheck::Alias {
        key: key.to_string(),
        codes,
        names,
    }
}

/// Classify a handler expression and parse its body.
pub fn compile_handler(source: Option<&str>) -> (HandlerKind, Expr) {
    let source = source.map(str::trim).unwrap_or_default();
    if source.is_empty() {
        return (HandlerKind::Empty, Expr::Undefined);
    }

    if let Ok(expr) = parse_expression(source) {
        if expr.is_member_path() {
            return (HandlerKind::Method, expr);
        }
        if expr.is_function_literal() {
            return (HandlerKind::FunctionExpression, expr);
        }
        if let Expr::Call { callee, .. } = &expr {
            if callee.is_member_path() {
                return (HandlerKind::Invocation, expr);
            }
        }
    }

    let body = parse_statements(source).unwrap_or_else(|err| Expr::Invalid {
        source: source.to_string(),
        reason: err.to_string(),
    });
    (HandlerKind::Statements, body)
}

/// Compile one `v-on` binding.
pub fn compile_event(
    name: &str,
    exp: Option<&str>,
    modifiers: &[String],
    key_codes: &BTreeMap<String, Vec<u32>>,
) -> (String, EventBinding) {
    let (guards, flags) = compile_guards(name, modifiers, key_codes);
    let (kind, handler) = compile_handler(exp);
    (
        event_name(name, modifiers),
        EventBinding {
            kind,
            handler,
            guards,
            flags,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mods(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn key_filter_runs_before_other_guards() {
        let (guards, _) = compile_guards("keyup", &mods(&["prevent", "enter", "ctrl"]), &BTreeMap::new());
        assert!(matches!(&guards[0], Guard::Keys(keys) if keys.len() == 1));
        assert_eq!(guards[1], Guard::PreventDefault);
        assert_eq!(guards[2], Guard::Modifier(ModifierKey::Ctrl));
    }

    #[test]
    fn delete_alias_lists_all_names() {
        let (guards, _) = compile_guards("keydown", &mods(&["delete"]), &BTreeMap::new());
        match &guards[0] {
            Guard::Keys(keys) => assert_eq!(
                keys[0],
                KeyCheck::Alias {
                    key: "delete".into(),
                    codes: vec![8, 46],
                    names: vec!["Backspace".into(), "Delete".into(), "Del".into()],
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn numeric_and_custom_keys() {
        let mut overrides = BTreeMap::new();
        overrides.insert("f1".to_string(), vec![112]);
        let (guards, _) = compile_guards("keyup", &mods(&["13", "f1"]), &overrides);
        match &guards[0] {
            Guard::Keys(keys) => {
                assert_eq!(keys[0], KeyCheck::Code(13));
                assert!(matches!(&keys[1], KeyCheck::Alias { codes, names, .. } if codes == &[112] && names.is_empty()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn exact_lists_unlisted_modifiers() {
        let (guards, _) = compile_guards("click", &mods(&["ctrl", "exact"]), &BTreeMap::new());
        assert_eq!(
            guards,
            vec![
                Guard::Modifier(ModifierKey::Ctrl),
                Guard::Exact(vec![ModifierKey::Shift, ModifierKey::Alt, ModifierKey::Meta]),
            ]
        );
    }

    #[test]
    fn directional_modifiers_are_buttons_and_keys() {
        let (guards, _) = compile_guards("mousedown", &mods(&["left"]), &BTreeMap::new());
        assert!(matches!(&guards[0], Guard::Keys(_)));
        assert_eq!(guards[1], Guard::Button(MouseButton::Left));

        assert_eq!(event_name("click", &mods(&["right"])), "contextmenu");
        assert_eq!(event_name("click", &mods(&["middle"])), "mouseup");
        let (guards, _) = compile_guards("click", &mods(&["right"]), &BTreeMap::new());
        assert!(guards.is_empty());
        let (guards, _) = compile_guards("click", &mods(&["middle"]), &BTreeMap::new());
        assert_eq!(guards, vec![Guard::Button(MouseButton::Middle)]);
    }

    #[test]
    fn listener_flags_are_not_guards() {
        let (guards, flags) = compile_guards("scroll", &mods(&["passive", "once", "capture"]), &BTreeMap::new());
        assert!(guards.is_empty());
        assert!(flags.passive && flags.once && flags.capture && !flags.native);
    }

    #[test]
    fn handler_classification() {
        assert_eq!(compile_handler(Some("save")).0, HandlerKind::Method);
        assert_eq!(compile_handler(Some("handlers['save']")).0, HandlerKind::Method);
        assert_eq!(compile_handler(Some("e => save(e)")).0, HandlerKind::FunctionExpression);
        assert_eq!(compile_handler(Some("function (e) { save(e) }")).0, HandlerKind::FunctionExpression);
        assert_eq!(compile_handler(Some("save(1, $event)")).0, HandlerKind::Invocation);
        assert_eq!(compile_handler(Some("count++; save()")).0, HandlerKind::Statements);
        assert_eq!(compile_handler(Some("a.b().c()")).0, HandlerKind::Statements);
        assert_eq!(compile_handler(None).0, HandlerKind::Empty);

        let (kind, body) = compile_handler(Some("count +"));
        assert_eq!(kind, HandlerKind::Statements);
        assert!(body.is_invalid());
    }
}
