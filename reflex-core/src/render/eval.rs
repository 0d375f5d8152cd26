//! Template expression evaluator.
//!
//! A tree-walking interpreter over [`Expr`]. Names resolve through loop and
//! parameter frames, then the component state, then registered methods,
//! then a small set of globals. Reads from observed state go through
//! [`Value::get`] and are therefore tracked by whatever computation is
//! running.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::helpers::{display_string, loose_equal, parse_float, resolve_filter, to_number};
use super::RuntimeConfig;
use crate::compiler::expr::{AssignOp, BinaryOp, Expr, LogicalOp, PropKey, TemplatePart, UnaryOp};
use crate::error::{RuntimeError, RuntimeResult};
use crate::reactive::RecordKind;
use crate::value::{format_number, Function, Key, Value};

struct Env {
    state: Value,
    config: Arc<RuntimeConfig>,
}

struct Frame {
    vars: Mutex<IndexMap<String, Value>>,
    parent: Option<Arc<Frame>>,
}

/// Where names resolve during evaluation.
///
/// Cloning is cheap. Closures created by arrow functions and handlers keep
/// a clone, so loop variables stay visible after the render pass.
#[derive(Clone)]
pub struct Scope {
    env: Arc<Env>,
    frame: Option<Arc<Frame>>,
}

enum Completion {
    Normal(Value),
    Return(Value),
}

impl Completion {
    fn into_value(self) -> Value {
        match self {
            Completion::Normal(v) | Completion::Return(v) => v,
        }
    }
}

impl Scope {
    pub fn new(state: Value, config: Arc<RuntimeConfig>) -> Self {
        Self {
            env: Arc::new(Env { state, config }),
            frame: None,
        }
    }

    pub fn state(&self) -> &Value {
        &self.env.state
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.env.config
    }

    /// A nested scope with extra local bindings.
    pub fn child<K: Into<String>>(&self, vars: impl IntoIterator<Item = (K, Value)>) -> Scope {
        let vars = vars.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Scope {
            env: self.env.clone(),
            frame: Some(Arc::new(Frame {
                vars: Mutex::new(vars),
                parent: self.frame.clone(),
            })),
        }
    }

    fn local(&self, name: &str) -> Option<Value> {
        let mut frame = self.frame.as_ref();
        while let Some(f) = frame {
            if let Some(value) = f.vars.lock().get(name) {
                return Some(value.clone());
            }
            frame = f.parent.as_ref();
        }
        None
    }

    fn set_local(&self, name: &str, value: &Value) -> bool {
        let mut frame = self.frame.as_ref();
        while let Some(f) = frame {
            let mut vars = f.vars.lock();
            if let Some(slot) = vars.get_mut(name) {
                *slot = value.clone();
                return true;
            }
            drop(vars);
            frame = f.parent.as_ref();
        }
        false
    }

    /// Resolve a free name.
    pub fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.local(name) {
            return value;
        }
        if name == "this" {
            return self.env.state.clone();
        }
        let state = &self.env.state;
        let in_state = match state {
            Value::Observed(view) => view.has(name),
            Value::Record(record) => record.contains_raw(&Key::from(name)),
            _ => false,
        };
        if in_state {
            return state.get(name);
        }
        if let Some(method) = self.env.config.methods.get(name) {
            return Value::Function(method.clone());
        }
        if let Some(value) = global(name) {
            return value;
        }
        tracing::warn!(name, "property or method is not defined but referenced during render");
        Value::Null
    }

    /// Evaluate an expression. A `return` inside a statement sequence ends
    /// it early.
    pub fn eval(&self, expr: &Expr) -> RuntimeResult<Value> {
        Ok(self.exec(expr)?.into_value())
    }

    fn exec(&self, expr: &Expr) -> RuntimeResult<Completion> {
        match expr {
            Expr::Sequence(items) | Expr::Block(items) => {
                let mut last = Value::Null;
                for item in items {
                    match self.exec(item)? {
                        Completion::Return(v) => return Ok(Completion::Return(v)),
                        Completion::Normal(v) => last = v,
                    }
                }
                Ok(Completion::Normal(last))
            }
            Expr::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Null,
                };
                Ok(Completion::Return(value))
            }
            _ => Ok(Completion::Normal(self.eval_expr(expr)?)),
        }
    }

    fn eval_expr(&self, expr: &Expr) -> RuntimeResult<Value> {
        Ok(match expr {
            Expr::Null | Expr::Undefined => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Number(n) => Value::Number(*n),
            Expr::String(s) => Value::string(s.as_str()),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Str(s) => out.push_str(s),
                        TemplatePart::Expr(e) => out.push_str(&self.eval(e)?.to_js_string()),
                    }
                }
                Value::from(out)
            }
            Expr::Ident(name) => self.lookup(name),
            Expr::Member { object, property } => {
                let target = self.eval(object)?;
                read_property(&target, Key::from(property.as_str()), object)?
            }
            Expr::Index { object, index } => {
                let target = self.eval(object)?;
                let key = Key::from_value(&self.eval(index)?);
                read_property(&target, key, object)?
            }
            Expr::Call { callee, args } => self.eval_call(callee, args)?,
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::from(type_of(&value)),
                    UnaryOp::Void => Value::Null,
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r)?
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !l.is_truthy(),
                    LogicalOp::Or => l.is_truthy(),
                    LogicalOp::Nullish => !l.is_null(),
                };
                if short_circuit {
                    l
                } else {
                    self.eval(right)?
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)?
                } else {
                    self.eval(alternate)?
                }
            }
            Expr::Array(items) => Value::array(items.iter().map(|item| self.eval(item)).collect::<RuntimeResult<Vec<_>>>()?),
            Expr::Object(props) => {
                let mut entries = Vec::with_capacity(props.len());
                for (key, value) in props {
                    let key = match key {
                        PropKey::Static(name) => name.clone(),
                        PropKey::Computed(expr) => self.eval(expr)?.to_js_string(),
                    };
                    entries.push((key, self.eval(value)?));
                }
                Value::object(entries)
            }
            Expr::Arrow { params, body } | Expr::Function { params, body } => self.closure(params, body),
            Expr::Assign { op, target, value } => {
                let value = self.eval(value)?;
                let value = match op {
                    AssignOp::Assign => value,
                    AssignOp::AddAssign => binary(BinaryOp::Add, &self.eval(target)?, &value)?,
                    AssignOp::SubAssign => binary(BinaryOp::Sub, &self.eval(target)?, &value)?,
                };
                self.assign(target, value.clone())?;
                value
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let old = self.eval(target)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign(target, Value::Number(new))?;
                Value::Number(if *prefix { new } else { old })
            }
            Expr::Sequence(_) | Expr::Block(_) | Expr::Return(_) => self.exec(expr)?.into_value(),
            Expr::ResolveFilter(name) => Value::Function(resolve_filter(name, self.config())),
            Expr::Invalid { source, reason } => {
                return Err(RuntimeError::InvalidExpression {
                    source_text: source.clone(),
                    reason: reason.clone(),
                })
            }
        })
    }

    fn closure(&self, params: &[String], body: &Expr) -> Value {
        let scope = self.clone();
        let params = params.to_vec();
        let returns_body = !matches!(body, Expr::Block(_));
        let body = Arc::new(body.clone());
        Value::Function(Function::new("anonymous", move |args: &[Value]| {
            let vars = params
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), args.get(i).cloned().unwrap_or_default()));
            match scope.child(vars).exec(&body)? {
                Completion::Return(v) => Ok(v),
                Completion::Normal(v) if returns_body => Ok(v),
                Completion::Normal(_) => Ok(Value::Null),
            }
        }))
    }

    fn eval_call(&self, callee: &Expr, args: &[Expr]) -> RuntimeResult<Value> {
        let (receiver, name) = match callee {
            Expr::Member { object, property } => (Some((self.eval(object)?, object)), Some(property.clone())),
            Expr::Index { object, index } => {
                let receiver = self.eval(object)?;
                let name = self.eval(index)?.to_js_string();
                (Some((receiver, object)), Some(name))
            }
            _ => (None, None),
        };
        let args = args.iter().map(|arg| self.eval(arg)).collect::<RuntimeResult<Vec<_>>>()?;

        let (Some((receiver, object)), Some(name)) = (receiver, name) else {
            return match self.eval(callee)? {
                Value::Function(f) => f.call(&args),
                _ => Err(RuntimeError::NotCallable(callee.to_string())),
            };
        };
        if receiver.is_null() {
            return Err(RuntimeError::InvalidAccess {
                target: object.to_string(),
                property: name,
            });
        }

        let is_array = receiver.record_kind() == Some(RecordKind::Array);
        if !is_array {
            if let Value::Function(f) = receiver.get(name.as_str()) {
                return f.call(&args);
            }
        }
        match call_builtin_method(&receiver, &name, &args)? {
            Some(value) => Ok(value),
            None => match receiver.get(name.as_str()) {
                Value::Function(f) => f.call(&args),
                _ => Err(RuntimeError::NotCallable(callee.to_string())),
            },
        }
    }

    /// Store `value` through an assignable expression. Names bound in a
    /// frame are updated there; other names write to the state.
    pub fn assign(&self, target: &Expr, value: Value) -> RuntimeResult<()> {
        match target {
            Expr::Ident(name) => {
                if self.set_local(name, &value) {
                    return Ok(());
                }
                write_property(&self.env.state, Key::from(name.as_str()), value, target)
            }
            Expr::Member { object, property } => {
                let object_value = self.eval(object)?;
                write_property(&object_value, Key::from(property.as_str()), value, target)
            }
            Expr::Index { object, index } => {
                let object_value = self.eval(object)?;
                let key = Key::from_value(&self.eval(index)?);
                write_property(&object_value, key, value, target)
            }
            other => Err(RuntimeError::InvalidAssignment(other.to_string())),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut depth = 0;
        let mut frame = self.frame.as_ref();
        while let Some(current) = frame {
            depth += 1;
            frame = current.parent.as_ref();
        }
        f.debug_struct("Scope").field("frames", &depth).finish()
    }
}

fn read_property(target: &Value, key: Key, object: &Expr) -> RuntimeResult<Value> {
    if target.is_null() {
        return Err(RuntimeError::InvalidAccess {
            target: object.to_string(),
            property: key.to_string(),
        });
    }
    Ok(target.get(key))
}

fn write_property(target: &Value, key: Key, value: Value, expr: &Expr) -> RuntimeResult<()> {
    match target {
        Value::Observed(view) => {
            view.set(key, value);
            Ok(())
        }
        Value::Record(record) => {
            record.set_raw(&key, value);
            Ok(())
        }
        _ => Err(RuntimeError::InvalidAssignment(expr.to_string())),
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::Record(_) | Value::Observed(_) => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Function(_) => "function",
    }
}

fn is_primitive_string_like(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Record(_) | Value::Observed(_) | Value::Function(_))
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => a.to_number() == b.to_number(),
        (Value::Record(_) | Value::Observed(_), Value::String(_) | Value::Number(_))
        | (Value::String(_) | Value::Number(_), Value::Record(_) | Value::Observed(_)) => {
            a.to_js_string() == b.to_js_string()
        }
        _ => a.same(b),
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> RuntimeResult<Value> {
    use std::cmp::Ordering::*;
    Ok(match op {
        BinaryOp::Add => {
            if is_primitive_string_like(l) || is_primitive_string_like(r) {
                Value::from(l.to_js_string() + &r.to_js_string())
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(l.to_number() - r.to_number()),
        BinaryOp::Mul => Value::Number(l.to_number() * r.to_number()),
        BinaryOp::Div => Value::Number(l.to_number() / r.to_number()),
        BinaryOp::Rem => Value::Number(l.to_number() % r.to_number()),
        BinaryOp::Pow => Value::Number(l.to_number().powf(r.to_number())),
        BinaryOp::Eq => Value::Bool(loose_eq(l, r)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(l, r)),
        BinaryOp::StrictEq => Value::Bool(l.same(r)),
        BinaryOp::StrictNotEq => Value::Bool(!l.same(r)),
        BinaryOp::Lt => Value::Bool(compare(l, r) == Some(Less)),
        BinaryOp::LtEq => Value::Bool(matches!(compare(l, r), Some(Less | Equal))),
        BinaryOp::Gt => Value::Bool(compare(l, r) == Some(Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(compare(l, r), Some(Greater | Equal))),
        BinaryOp::In => {
            let key = Key::from_value(l);
            match r {
                Value::Observed(view) => Value::Bool(view.has(key)),
                Value::Record(record) => Value::Bool(record.contains_raw(&key)),
                other => {
                    return Err(RuntimeError::thrown(format!(
                        "cannot use 'in' operator to search for '{}' in {}",
                        l.to_js_string(),
                        other.to_js_string()
                    )))
                }
            }
        }
    })
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

/// Resolve a possibly negative `slice` bound against `len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_null() {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn call_fn(f: &Value, args: &[Value]) -> RuntimeResult<Value> {
    match f {
        Value::Function(f) => f.call(args),
        other => Err(RuntimeError::NotCallable(other.to_js_string())),
    }
}

fn call_builtin_method(receiver: &Value, name: &str, args: &[Value]) -> RuntimeResult<Option<Value>> {
    match receiver {
        Value::String(s) => Ok(string_method(s, name, args)),
        Value::Number(n) => Ok(number_method(*n, name, args)),
        Value::Record(_) | Value::Observed(_) if receiver.record_kind() == Some(RecordKind::Array) => {
            array_method(receiver, name, args)
        }
        Value::Record(_) | Value::Observed(_) => Ok(match name {
            "hasOwnProperty" => Some(Value::Bool(match receiver {
                Value::Observed(view) => view.has(Key::from_value(&arg(args, 0))),
                Value::Record(record) => record.contains_raw(&Key::from_value(&arg(args, 0))),
                _ => false,
            })),
            "toString" => Some(Value::from(receiver.to_js_string())),
            _ => None,
        }),
        _ => Ok(None),
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Value> {
    let text_arg = |i: usize| arg(args, i).to_js_string();
    let chars: Vec<char> = s.chars().collect();
    Some(match name {
        "trim" => Value::from(s.trim()),
        "trimStart" => Value::from(s.trim_start()),
        "trimEnd" => Value::from(s.trim_end()),
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "toString" => Value::from(s),
        "includes" => Value::Bool(s.contains(text_arg(0).as_str())),
        "startsWith" => Value::Bool(s.starts_with(text_arg(0).as_str())),
        "endsWith" => Value::Bool(s.ends_with(text_arg(0).as_str())),
        "indexOf" => {
            let needle = text_arg(0);
            match s.find(&needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::Number(-1.0),
            }
        }
        "charAt" => {
            let i = arg(args, 0).to_number();
            let c = if i >= 0.0 { chars.get(i as usize) } else { None };
            Value::from(c.map(|c| c.to_string()).unwrap_or_default())
        }
        "slice" | "substring" => {
            let start = relative_index(&arg(args, 0), chars.len(), 0);
            let end = relative_index(&arg(args, 1), chars.len(), chars.len());
            Value::from(chars[start.min(end)..end.max(start)].iter().collect::<String>())
        }
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Null => vec![Value::from(s)],
                sep => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        chars.iter().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::array(parts)
        }
        "replace" => Value::from(s.replacen(text_arg(0).as_str(), &text_arg(1), 1)),
        "replaceAll" => Value::from(s.replace(text_arg(0).as_str(), &text_arg(1))),
        "concat" => Value::from(args.iter().fold(s.to_string(), |acc, a| acc + &a.to_js_string())),
        "repeat" => Value::from(s.repeat(arg(args, 0).to_number().max(0.0) as usize)),
        "padStart" | "padEnd" => {
            let width = arg(args, 0).to_number().max(0.0) as usize;
            let fill = match arg(args, 1) {
                Value::Null => " ".to_string(),
                f => f.to_js_string(),
            };
            if chars.len() >= width || fill.is_empty() {
                Value::from(s)
            } else {
                let pad: String = fill.chars().cycle().take(width - chars.len()).collect();
                if name == "padStart" {
                    Value::from(pad + s)
                } else {
                    Value::from(s.to_string() + &pad)
                }
            }
        }
        _ => return None,
    })
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Option<Value> {
    Some(match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            Value::from(format!("{n:.digits$}"))
        }
        "toString" => Value::from(format_number(n)),
        _ => return None,
    })
}

fn array_method(receiver: &Value, name: &str, args: &[Value]) -> RuntimeResult<Option<Value>> {
    let items = || receiver.list_items();
    let each = |f: &Value| -> RuntimeResult<Vec<(Value, Value)>> {
        items()
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let result = call_fn(f, &[item.clone(), Value::from(i), receiver.clone()])?;
                Ok((item, result))
            })
            .collect()
    };
    let value = match name {
        "join" => {
            let sep = match arg(args, 0) {
                Value::Null => ",".to_string(),
                sep => sep.to_js_string(),
            };
            let parts: Vec<String> = items()
                .iter()
                .map(|v| if v.is_null() { String::new() } else { v.to_js_string() })
                .collect();
            Value::from(parts.join(&sep))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            let index = match receiver {
                Value::Observed(view) => view.index_of(&needle),
                _ => items().iter().position(|v| v.same(&needle)),
            };
            index.map(Value::from).unwrap_or(Value::Number(-1.0))
        }
        "includes" => {
            let needle = arg(args, 0);
            Value::Bool(match receiver {
                Value::Observed(view) => view.includes(&needle),
                _ => items().iter().any(|v| v.same(&needle)),
            })
        }
        "slice" => {
            let all = items();
            let start = relative_index(&arg(args, 0), all.len(), 0);
            let end = relative_index(&arg(args, 1), all.len(), all.len());
            Value::array(all.get(start..end.max(start)).unwrap_or_default().to_vec())
        }
        "concat" => {
            let mut all = items();
            for extra in args {
                if extra.record_kind() == Some(RecordKind::Array) {
                    all.extend(extra.list_items());
                } else {
                    all.push(extra.clone());
                }
            }
            Value::array(all)
        }
        "map" => Value::array(each(&arg(args, 0))?.into_iter().map(|(_, r)| r)),
        "filter" => Value::array(each(&arg(args, 0))?.into_iter().filter(|(_, r)| r.is_truthy()).map(|(v, _)| v)),
        "find" => each(&arg(args, 0))?
            .into_iter()
            .find(|(_, r)| r.is_truthy())
            .map(|(v, _)| v)
            .unwrap_or_default(),
        "findIndex" => each(&arg(args, 0))?
            .iter()
            .position(|(_, r)| r.is_truthy())
            .map(Value::from)
            .unwrap_or(Value::Number(-1.0)),
        "some" => Value::Bool(each(&arg(args, 0))?.iter().any(|(_, r)| r.is_truthy())),
        "every" => Value::Bool(each(&arg(args, 0))?.iter().all(|(_, r)| r.is_truthy())),
        "forEach" => {
            each(&arg(args, 0))?;
            Value::Null
        }
        "reduce" => {
            let f = arg(args, 0);
            let mut all = items().into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match all.next() {
                    Some((_, first)) => first,
                    None => return Err(RuntimeError::thrown("reduce of empty array with no initial value")),
                },
            };
            for (i, item) in all {
                acc = call_fn(&f, &[acc, item, Value::from(i), receiver.clone()])?;
            }
            acc
        }
        "push" => {
            for item in args {
                match receiver {
                    Value::Observed(view) => {
                        view.push(item.clone());
                    }
                    Value::Record(record) => {
                        record.with_items(|items| items.push(item.clone()));
                    }
                    _ => {}
                }
            }
            Value::from(receiver.get(Key::Length).to_number())
        }
        "pop" => match receiver {
            Value::Observed(view) => view.pop().unwrap_or_default(),
            Value::Record(record) => record.with_items(Vec::pop).flatten().unwrap_or_default(),
            _ => Value::Null,
        },
        "shift" => match receiver {
            Value::Observed(view) => view.remove(0).unwrap_or_default(),
            Value::Record(record) => record
                .with_items(|items| (!items.is_empty()).then(|| items.remove(0)))
                .flatten()
                .unwrap_or_default(),
            _ => Value::Null,
        },
        "unshift" => {
            for (offset, item) in args.iter().enumerate() {
                match receiver {
                    Value::Observed(view) => {
                        view.insert(offset, item.clone());
                    }
                    Value::Record(record) => {
                        record.with_items(|items| items.insert(offset, item.clone()));
                    }
                    _ => {}
                }
            }
            Value::from(receiver.get(Key::Length).to_number())
        }
        "splice" => {
            let len = items().len();
            let start = relative_index(&arg(args, 0), len, 0);
            let count = match args.get(1) {
                Some(n) => (n.to_number().max(0.0) as usize).min(len - start),
                None => len - start,
            };
            let mut removed = Vec::with_capacity(count);
            for _ in 0..count {
                let item = match receiver {
                    Value::Observed(view) => view.remove(start),
                    Value::Record(record) => record.with_items(|items| items.remove(start)),
                    _ => None,
                };
                removed.extend(item);
            }
            for (offset, item) in args.iter().skip(2).enumerate() {
                match receiver {
                    Value::Observed(view) => {
                        view.insert(start + offset, item.clone());
                    }
                    Value::Record(record) => {
                        record.with_items(|items| items.insert(start + offset, item.clone()));
                    }
                    _ => {}
                }
            }
            Value::array(removed)
        }
        "toString" => Value::from(receiver.to_js_string()),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn native(name: &'static str, f: impl Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static) -> (&'static str, Value) {
    (name, Value::Function(Function::new(name, f)))
}

fn math_fn(name: &'static str, f: fn(f64) -> f64) -> (&'static str, Value) {
    native(name, move |args| Ok(Value::Number(f(arg(args, 0).to_number()))))
}

fn parse_int(text: &str, radix: Option<u32>) -> f64 {
    let text = text.trim();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match radix {
        Some(16) | None if rest.starts_with("0x") || rest.starts_with("0X") => (16, &rest[2..]),
        Some(r) if (2..=36).contains(&r) => (r, rest),
        Some(_) => return f64::NAN,
        None => (10, rest),
    };
    let mut value: Option<f64> = None;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        value = Some(value.unwrap_or(0.0) * f64::from(radix) + f64::from(d));
    }
    match value {
        Some(v) if negative => -v,
        Some(v) => v,
        None => f64::NAN,
    }
}

fn global(name: &str) -> Option<Value> {
    static MATH: OnceLock<Value> = OnceLock::new();
    static JSON: OnceLock<Value> = OnceLock::new();
    static OBJECT: OnceLock<Value> = OnceLock::new();
    static ARRAY: OnceLock<Value> = OnceLock::new();

    Some(match name {
        "undefined" => Value::Null,
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        "_s" => native("_s", |args| Ok(Value::from(display_string(&arg(args, 0))))).1,
        "_n" => native("_n", |args| Ok(to_number(&arg(args, 0)))).1,
        "_q" => native("_q", |args| Ok(Value::Bool(loose_equal(&arg(args, 0), &arg(args, 1))))).1,
        "String" => native("String", |args| Ok(Value::from(arg(args, 0).to_js_string()))).1,
        "Number" => native("Number", |args| Ok(Value::Number(arg(args, 0).to_number()))).1,
        "Boolean" => native("Boolean", |args| Ok(Value::Bool(arg(args, 0).is_truthy()))).1,
        "parseFloat" => native("parseFloat", |args| Ok(Value::Number(parse_float(&arg(args, 0).to_js_string())))).1,
        "parseInt" => {
            native("parseInt", |args| {
                let radix = match arg(args, 1) {
                    Value::Null => None,
                    r => Some(r.to_number() as u32),
                };
                Ok(Value::Number(parse_int(&arg(args, 0).to_js_string(), radix)))
            })
            .1
        }
        "isNaN" => native("isNaN", |args| Ok(Value::Bool(arg(args, 0).to_number().is_nan()))).1,
        "Math" => MATH
            .get_or_init(|| {
                Value::object([
                    ("PI", Value::Number(std::f64::consts::PI)),
                    ("E", Value::Number(std::f64::consts::E)),
                    math_fn("floor", f64::floor),
                    math_fn("ceil", f64::ceil),
                    math_fn("round", |x| (x + 0.5).floor()),
                    math_fn("trunc", f64::trunc),
                    math_fn("abs", f64::abs),
                    math_fn("sqrt", f64::sqrt),
                    math_fn("sign", |x| if x == 0.0 || x.is_nan() { x } else { x.signum() }),
                    native("pow", |args| Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))),
                    native("max", |args| {
                        Ok(Value::Number(args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |a, b| {
                            if a.is_nan() || b.is_nan() {
                                f64::NAN
                            } else {
                                a.max(b)
                            }
                        })))
                    }),
                    native("min", |args| {
                        Ok(Value::Number(args.iter().map(Value::to_number).fold(f64::INFINITY, |a, b| {
                            if a.is_nan() || b.is_nan() {
                                f64::NAN
                            } else {
                                a.min(b)
                            }
                        })))
                    }),
                ])
            })
            .clone(),
        "JSON" => JSON
            .get_or_init(|| {
                Value::object([
                    native("stringify", |args| {
                        let json = arg(args, 0).to_json();
                        let text = if arg(args, 2).is_null() {
                            serde_json::to_string(&json)
                        } else {
                            serde_json::to_string_pretty(&json)
                        };
                        text.map(Value::from).map_err(|err| RuntimeError::thrown(err.to_string()))
                    }),
                    native("parse", |args| {
                        let text = arg(args, 0).to_js_string();
                        serde_json::from_str::<serde_json::Value>(&text)
                            .map(|json| Value::from_json(&json))
                            .map_err(|err| RuntimeError::thrown(err.to_string()))
                    }),
                ])
            })
            .clone(),
        "Object" => OBJECT
            .get_or_init(|| {
                Value::object([
                    native("keys", |args| {
                        Ok(Value::array(arg(args, 0).entries().into_iter().map(|(k, _)| Value::String(k))))
                    }),
                    native("values", |args| {
                        Ok(Value::array(arg(args, 0).entries().into_iter().map(|(_, v)| v)))
                    }),
                    native("entries", |args| {
                        Ok(Value::array(
                            arg(args, 0)
                                .entries()
                                .into_iter()
                                .map(|(k, v)| Value::array([Value::String(k), v])),
                        ))
                    }),
                ])
            })
            .clone(),
        "Array" => ARRAY
            .get_or_init(|| {
                Value::object([native("isArray", |args| {
                    Ok(Value::Bool(arg(args, 0).record_kind() == Some(RecordKind::Array)))
                })])
            })
            .clone(),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::expr::{parse_expression, parse_statements};
    use crate::compiler::filter::parse_filtered;
    use crate::reactive::{reactive, Watcher};

    fn scope(state: Value) -> Scope {
        Scope::new(state, Arc::new(RuntimeConfig::default()))
    }

    fn eval(scope: &Scope, source: &str) -> Value {
        scope.eval(&parse_expression(source).unwrap()).unwrap()
    }

    #[test]
    fn arithmetic_and_coercion() {
        let s = scope(Value::object([("n", Value::from(4)), ("name", Value::from("ada"))]));
        assert_eq!(eval(&s, "n * 2 + 1"), Value::from(9));
        assert_eq!(eval(&s, "'n=' + n"), Value::from("n=4"));
        assert_eq!(eval(&s, "n % 3 === 1 && n > 3"), Value::Bool(true));
        assert_eq!(eval(&s, "'4' == n"), Value::Bool(true));
        assert_eq!(eval(&s, "'4' === n"), Value::Bool(false));
        assert_eq!(eval(&s, "name.toUpperCase().slice(0, 2)"), Value::from("AD"));
        assert_eq!(eval(&s, "typeof name"), Value::from("string"));
        assert_eq!(eval(&s, "missing ?? 'fallback'"), Value::from("fallback"));
        assert_eq!(eval(&s, "`hi ${name}!`"), Value::from("hi ada!"));
    }

    #[test]
    fn arrays_and_callbacks() {
        let s = scope(Value::object([(
            "xs",
            Value::array([Value::from(1), Value::from(2), Value::from(3)]),
        )]));
        assert_eq!(eval(&s, "xs.map(x => x * 10).join('-')"), Value::from("10-20-30"));
        assert_eq!(eval(&s, "xs.filter(x => x % 2).length"), Value::from(2));
        assert_eq!(eval(&s, "xs.reduce((a, b) => a + b, 0)"), Value::from(6));
        assert_eq!(eval(&s, "xs.includes(2)"), Value::Bool(true));
    }

    #[test]
    fn filters_resolve_through_config() {
        let config = RuntimeConfig::default().filter(
            "upper",
            Function::new("upper", |args| Ok(Value::from(arg(args, 0).to_js_string().to_uppercase()))),
        );
        let s = Scope::new(Value::object([("msg", Value::from("hey"))]), Arc::new(config));
        let expr = parse_filtered("msg | upper").unwrap();
        assert_eq!(s.eval(&expr).unwrap(), Value::from("HEY"));
        let unknown = parse_filtered("msg | nope").unwrap();
        assert_eq!(s.eval(&unknown).unwrap(), Value::from("hey"));
    }

    #[test]
    fn statements_assign_state_and_locals() {
        let state = reactive(Value::object([("count", Value::from(1)), ("items", Value::array([]))]));
        let s = scope(state.clone());
        let body = parse_statements("count++; items.push(count); count += 5").unwrap();
        s.eval(&body).unwrap();
        assert_eq!(state.get("count"), Value::from(7));
        assert_eq!(state.get("items").get(0usize), Value::from(2));

        let local = s.child([("x", Value::from(1))]);
        local.eval(&parse_statements("x = 5").unwrap()).unwrap();
        assert_eq!(eval(&local, "x"), Value::from(5));
        assert!(state.get("x").is_null());
    }

    #[test]
    fn closures_capture_loop_variables() {
        let s = scope(Value::object([("k", Value::from(2))])).child([("item", Value::from(3))]);
        let f = eval(&s, "(a) => { return a * item * k }");
        assert_eq!(f.as_function().unwrap().call(&[Value::from(5)]).unwrap(), Value::from(30));
    }

    #[test]
    fn reads_of_state_are_tracked() {
        let state = reactive(Value::object([("a", Value::from(1))]));
        let s = scope(state.clone());
        let expr = parse_expression("a + 1").unwrap();
        let watcher = Watcher::lazy(move || s.eval(&expr));
        assert_eq!(watcher.evaluate().unwrap(), Value::from(2));
        state.as_observed().unwrap().set("a", 5);
        assert!(watcher.is_dirty());
        assert_eq!(watcher.evaluate().unwrap(), Value::from(6));
    }

    #[test]
    fn errors_are_reported() {
        let s = scope(Value::object([("obj", Value::Null)]));
        let err = s.eval(&parse_expression("obj.x").unwrap()).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidAccess { .. }));
        let err = s.eval(&parse_expression("obj()").unwrap()).unwrap_err();
        assert!(matches!(err, RuntimeError::NotCallable(_)));
        let err = s
            .eval(&Expr::Invalid {
                source: "a +".into(),
                reason: "unexpected end".into(),
            })
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidExpression { .. }));
    }

    #[test]
    fn globals() {
        let s = scope(Value::object(Vec::<(&str, Value)>::new()));
        assert_eq!(eval(&s, "parseInt('42px')"), Value::from(42));
        assert_eq!(eval(&s, "Math.round(2.5)"), Value::from(3));
        assert_eq!(eval(&s, "JSON.stringify({ a: [1, 2] })"), Value::from("{\"a\":[1,2]}"));
        assert_eq!(eval(&s, "Object.keys({ x: 1, y: 2 }).join()"), Value::from("x,y"));
        assert_eq!(eval(&s, "(3.14159).toFixed(2)"), Value::from("3.14"));
    }
}
