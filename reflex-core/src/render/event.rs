//! Events and listener invocation.
//!
//! A compiled [`EventBinding`] becomes a [`Function`] that runs its guards
//! against the event value and then the handler. The reconciler binds one
//! [`EventInvoker`] per listener key; re-renders swap the handlers inside
//! the invoker instead of rebinding on the host.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::eval::Scope;
use super::helpers::check_key_codes;
use super::host::HostNode;
use super::RuntimeConfig;
use crate::compiler::events::{EventBinding, Guard, HandlerKind, KeyCheck, ListenerFlags, ModifierKey};
use crate::error::{RuntimeError, RuntimeResult};
use crate::reactive::handle_error;
use crate::value::{Function, Value};

/// A synthetic event, as a host would deliver it.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub kind: String,
    pub key: Option<String>,
    pub key_code: Option<u32>,
    pub button: Option<u8>,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
    /// `target.value`; taken from the target's `value` property when unset.
    pub value: Option<Value>,
    pub checked: Option<bool>,
    pub detail: Value,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>, key_code: u32) -> Self {
        self.key = Some(key.into());
        self.key_code = Some(key_code);
        self
    }

    pub fn with_key_code(mut self, key_code: u32) -> Self {
        self.key_code = Some(key_code);
        self
    }

    pub fn with_button(mut self, button: u8) -> Self {
        self.button = Some(button);
        self
    }

    pub fn with_modifier(mut self, key: ModifierKey) -> Self {
        match key {
            ModifierKey::Ctrl => self.ctrl = true,
            ModifierKey::Shift => self.shift = true,
            ModifierKey::Alt => self.alt = true,
            ModifierKey::Meta => self.meta = true,
        }
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<Value>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Flags a handler can set while an event is being delivered.
#[derive(Debug, Default)]
pub struct EventState {
    stopped: AtomicBool,
    default_prevented: AtomicBool,
}

impl EventState {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::SeqCst)
    }
}

/// The record handlers see as `target` / `currentTarget`.
pub fn target_value(node: HostNode, value: Option<Value>, checked: Option<bool>) -> Value {
    let mut fields = vec![("node", Value::from(node.id() as f64))];
    if let Some(value) = value {
        fields.push(("value", value));
    }
    if let Some(checked) = checked {
        fields.push(("checked", Value::Bool(checked)));
    }
    Value::object(fields)
}

/// The record handlers see as `$event`.
pub fn event_value(event: &Event, target: &Value, current_target: &Value, state: &Arc<EventState>) -> Value {
    let stop = {
        let state = state.clone();
        Function::new("stopPropagation", move |_| {
            state.stopped.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        })
    };
    let prevent = {
        let state = state.clone();
        Function::new("preventDefault", move |_| {
            state.default_prevented.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        })
    };
    let opt_number = |n: Option<f64>| n.map(Value::from).unwrap_or_default();
    Value::object([
        ("type", Value::from(event.kind.as_str())),
        ("key", event.key.as_deref().map(Value::from).unwrap_or_default()),
        ("keyCode", opt_number(event.key_code.map(f64::from))),
        ("button", opt_number(event.button.map(f64::from))),
        ("ctrlKey", Value::Bool(event.ctrl)),
        ("shiftKey", Value::Bool(event.shift)),
        ("altKey", Value::Bool(event.alt)),
        ("metaKey", Value::Bool(event.meta)),
        ("target", target.clone()),
        ("currentTarget", current_target.clone()),
        ("detail", event.detail.clone()),
        ("stopPropagation", Value::Function(stop)),
        ("preventDefault", Value::Function(prevent)),
    ])
}

fn call_member(value: &Value, name: &str) {
    if let Some(f) = value.get(name).as_function() {
        if let Err(err) = f.call(&[]) {
            handle_error(&err, name);
        }
    }
}

fn key_matches(check: &KeyCheck, event: &Value, config: &RuntimeConfig) -> bool {
    let key_code = match event.get("keyCode") {
        Value::Number(n) => Some(n as u32),
        _ => None,
    };
    match check {
        KeyCheck::Code(code) => key_code == Some(*code),
        KeyCheck::Alias { key, codes, names } => {
            let event_key = event.get("key");
            !check_key_codes(key_code, key, codes, event_key.as_str(), names, config)
        }
    }
}

fn modifier_field(key: &ModifierKey) -> &'static str {
    match key {
        ModifierKey::Ctrl => "ctrlKey",
        ModifierKey::Shift => "shiftKey",
        ModifierKey::Alt => "altKey",
        ModifierKey::Meta => "metaKey",
    }
}

/// Run `guards` against an event value. False means the handler must not
/// run.
pub fn guards_pass(guards: &[Guard], event: &Value, config: &RuntimeConfig) -> bool {
    for guard in guards {
        let pass = match guard {
            Guard::Keys(keys) => {
                let is_key_event = event.get("type").as_str().is_some_and(|t| t.starts_with("key"));
                !is_key_event || keys.iter().any(|k| key_matches(k, event, config))
            }
            Guard::StopPropagation => {
                call_member(event, "stopPropagation");
                true
            }
            Guard::PreventDefault => {
                call_member(event, "preventDefault");
                true
            }
            Guard::SelfOnly => event
                .get("target")
                .get("node")
                .same(&event.get("currentTarget").get("node")),
            Guard::Modifier(key) => event.get(modifier_field(key)).is_truthy(),
            Guard::Exact(keys) => !keys.iter().any(|k| event.get(modifier_field(k)).is_truthy()),
            Guard::Button(button) => match event.get("button") {
                Value::Null => true,
                pressed => pressed.to_number() == f64::from(button.code()),
            },
        };
        if !pass {
            return false;
        }
    }
    true
}

/// Turn a compiled binding into a callable bound to `scope`.
pub fn build_handler(binding: &EventBinding, scope: &Scope) -> Function {
    let binding = Arc::new(binding.clone());
    let scope = scope.clone();
    Function::new("handler", move |args: &[Value]| -> RuntimeResult<Value> {
        let event = args.first().cloned().unwrap_or_default();
        if !guards_pass(&binding.guards, &event, scope.config()) {
            return Ok(Value::Null);
        }
        match binding.kind {
            HandlerKind::Method | HandlerKind::FunctionExpression => {
                let target = scope.eval(&binding.handler)?;
                match target {
                    Value::Function(f) => f.call(args),
                    Value::Null => Ok(Value::Null),
                    _ => Err(RuntimeError::NotCallable(binding.handler.to_string())),
                }
            }
            HandlerKind::Invocation | HandlerKind::Statements => {
                scope.child([("$event", event)]).eval(&binding.handler)
            }
            HandlerKind::Empty => Ok(Value::Null),
        }
    })
}

/// The host-side key of a listener: flag prefixes plus the event name.
pub fn listener_key(event: &str, flags: &ListenerFlags) -> String {
    let mut key = String::new();
    if flags.passive {
        key.push('&');
    }
    if flags.once {
        key.push('~');
    }
    if flags.capture {
        key.push('!');
    }
    key.push_str(event);
    key
}

/// The event name inside a listener key.
pub fn listener_event(key: &str) -> &str {
    key.trim_start_matches(['&', '~', '!'])
}

/// The listener bound on a host node.
pub struct EventInvoker {
    key: String,
    handlers: Mutex<Vec<Function>>,
    flags: ListenerFlags,
    fired: AtomicBool,
    calls: AtomicUsize,
}

impl EventInvoker {
    pub fn new(key: impl Into<String>, handlers: Vec<Function>, flags: ListenerFlags) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            handlers: Mutex::new(handlers),
            flags,
            fired: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn flags(&self) -> &ListenerFlags {
        &self.flags
    }

    /// Swap in the handlers of a newer render.
    pub fn replace(&self, handlers: Vec<Function>) {
        *self.handlers.lock() = handlers;
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// How many times the invoker ran its handlers.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run every handler with `event`. Handler errors go to the error
    /// handler. A `once` listener runs only the first time.
    pub fn invoke(&self, event: &Value) -> bool {
        if self.flags.once && self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let handlers = self.handlers.lock().clone();
        for handler in &handlers {
            if let Err(err) = handler.call(std::slice::from_ref(event)) {
                handle_error(&err, &format!("v-on handler for \"{}\"", self.key));
            }
        }
        true
    }
}

impl std::fmt::Debug for EventInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventInvoker")
            .field("key", &self.key)
            .field("handlers", &self.handler_count())
            .field("flags", &self.flags)
            .finish()
    }
}

/// One listener reached by a dispatched event.
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub node: HostNode,
    pub invoker: Arc<EventInvoker>,
    pub target: Value,
    pub current_target: Value,
}

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Invokers that ran.
    pub handled: usize,
    pub propagation_stopped: bool,
    pub default_prevented: bool,
}

/// Deliver `event` along `path`. Once a handler stops propagation, nodes
/// further along are skipped; other listeners on the same node still run.
pub fn dispatch(path: &[PathEntry], event: &Event) -> DispatchOutcome {
    let state = Arc::new(EventState::default());
    let mut outcome = DispatchOutcome::default();
    let mut last_node = None;
    for entry in path {
        if state.is_stopped() && last_node != Some(entry.node) {
            break;
        }
        last_node = Some(entry.node);
        let value = event_value(event, &entry.target, &entry.current_target, &state);
        if entry.invoker.invoke(&value) {
            outcome.handled += 1;
        }
    }
    outcome.propagation_stopped = state.is_stopped();
    outcome.default_prevented = state.is_default_prevented();
    tracing::trace!(event = %event.kind, handled = outcome.handled, "event dispatched");
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicI32;

    use super::*;
    use crate::compiler::events::compile_event;
    use crate::reactive::reactive;

    fn mods(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn value_of(event: &Event) -> (Value, Arc<EventState>) {
        let state = Arc::new(EventState::default());
        let target = target_value(HostNode(1), None, None);
        (event_value(event, &target, &target, &state), state)
    }

    #[test]
    fn delete_rejects_other_key_names() {
        let (_, binding) = compile_event("keyup", Some("go"), &mods(&["delete"]), &BTreeMap::new());
        let config = RuntimeConfig::default();
        let accepted = ["Backspace", "Delete", "Del"];
        for key in accepted {
            let (event, _) = value_of(&Event::new("keyup").with_key(key, 0));
            assert!(guards_pass(&binding.guards, &event, &config), "{key}");
        }
        let (event, _) = value_of(&Event::new("keyup").with_key("Enter", 13));
        assert!(!guards_pass(&binding.guards, &event, &config));
        // Legacy code only: falls back to key codes.
        let (event, _) = value_of(&Event::new("keyup").with_key_code(46));
        assert!(guards_pass(&binding.guards, &event, &config));
    }

    #[test]
    fn key_filters_ignore_non_keyboard_events() {
        let (_, binding) = compile_event("click", Some("go"), &mods(&["enter"]), &BTreeMap::new());
        let (event, _) = value_of(&Event::new("click"));
        assert!(guards_pass(&binding.guards, &event, &RuntimeConfig::default()));
    }

    #[test]
    fn runtime_key_codes_override_names() {
        let config = RuntimeConfig::default().key_code("enter", vec![108]);
        let (_, binding) = compile_event("keyup", Some("go"), &mods(&["enter"]), &BTreeMap::new());
        let (event, _) = value_of(&Event::new("keyup").with_key("Enter", 13));
        assert!(!guards_pass(&binding.guards, &event, &config));
        let (event, _) = value_of(&Event::new("keyup").with_key("Enter", 108));
        assert!(guards_pass(&binding.guards, &event, &config));
    }

    #[test]
    fn modifier_and_exact_guards() {
        let config = RuntimeConfig::default();
        let (_, ctrl_exact) = compile_event("click", Some("go"), &mods(&["ctrl", "exact"]), &BTreeMap::new());
        let (plain, _) = value_of(&Event::new("click"));
        let (ctrl, _) = value_of(&Event::new("click").with_modifier(ModifierKey::Ctrl));
        let (ctrl_shift, _) = value_of(
            &Event::new("click")
                .with_modifier(ModifierKey::Ctrl)
                .with_modifier(ModifierKey::Shift),
        );
        assert!(!guards_pass(&ctrl_exact.guards, &plain, &config));
        assert!(guards_pass(&ctrl_exact.guards, &ctrl, &config));
        assert!(!guards_pass(&ctrl_exact.guards, &ctrl_shift, &config));
    }

    #[test]
    fn button_guard() {
        let (_, binding) = compile_event("mouseup", Some("go"), &mods(&["middle"]), &BTreeMap::new());
        let config = RuntimeConfig::default();
        let (left, _) = value_of(&Event::new("mouseup").with_button(0));
        let (middle, _) = value_of(&Event::new("mouseup").with_button(1));
        assert!(!guards_pass(&binding.guards, &left, &config));
        assert!(guards_pass(&binding.guards, &middle, &config));
    }

    #[test]
    fn stop_and_prevent_set_flags() {
        let (_, binding) = compile_event("click", None, &mods(&["stop", "prevent"]), &BTreeMap::new());
        let (event, state) = value_of(&Event::new("click"));
        assert!(guards_pass(&binding.guards, &event, &RuntimeConfig::default()));
        assert!(state.is_stopped());
        assert!(state.is_default_prevented());
    }

    #[test]
    fn self_guard_compares_nodes() {
        let (_, binding) = compile_event("click", Some("go"), &mods(&["self"]), &BTreeMap::new());
        let state = Arc::new(EventState::default());
        let inner = target_value(HostNode(2), None, None);
        let outer = target_value(HostNode(1), None, None);
        let bubbled = event_value(&Event::new("click"), &inner, &outer, &state);
        let own = event_value(&Event::new("click"), &outer, &outer, &state);
        let config = RuntimeConfig::default();
        assert!(!guards_pass(&binding.guards, &bubbled, &config));
        assert!(guards_pass(&binding.guards, &own, &config));
    }

    #[test]
    fn handlers_see_event_and_state() {
        let state = reactive(Value::object([("count", Value::from(0)), ("last", Value::Null)]));
        let scope = Scope::new(state.clone(), Arc::new(RuntimeConfig::default()));
        let (_, binding) = compile_event("input", Some("count += 2; last = $event.target.value"), &[], &BTreeMap::new());
        let handler = build_handler(&binding, &scope);
        let state_flags = Arc::new(EventState::default());
        let target = target_value(HostNode(3), Some(Value::from("typed")), None);
        let event = event_value(&Event::new("input"), &target, &target, &state_flags);
        handler.call(&[event]).unwrap();
        assert_eq!(state.get("count"), Value::from(2));
        assert_eq!(state.get("last"), Value::from("typed"));
    }

    #[test]
    fn once_invoker_runs_once() {
        let runs = Arc::new(AtomicI32::new(0));
        let counter = runs.clone();
        let handler = Function::new("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let flags = ListenerFlags {
            once: true,
            ..ListenerFlags::default()
        };
        let invoker = EventInvoker::new(listener_key("click", &flags), vec![handler], flags);
        assert_eq!(invoker.key(), "~click");
        assert!(invoker.invoke(&Value::Null));
        assert!(!invoker.invoke(&Value::Null));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_keys_round_trip_event_names() {
        let flags = ListenerFlags {
            capture: true,
            passive: true,
            ..ListenerFlags::default()
        };
        let key = listener_key("scroll", &flags);
        assert_eq!(key, "&!scroll");
        assert_eq!(listener_event(&key), "scroll");
    }
}
