//! The dynamic value model shared by state, templates and render output.
//!
//! Component state is untyped: templates index into it by name and iterate
//! whatever they find. [`Value`] is the small set of shapes that state may
//! take. Structured values come in two flavors:
//!
//! - [`Value::Record`] is the raw, unobserved data. Reads and writes go
//!   straight to storage.
//! - [`Value::Observed`] is a wrapper view over a record. Reads are tracked
//!   and writes notify subscribers.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::RuntimeResult;
use crate::reactive::{Observable, Record, RecordKind};

/// Signature of a callable value.
pub type NativeFn = dyn Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync;

/// A named, shareable callable.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    call: Arc<NativeFn>,
}

impl Function {
    pub fn new(
        name: impl Into<Arc<str>>,
        call: impl Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        (self.call)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// A dynamically typed value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    /// Raw structured data.
    Record(Record),
    /// An observation wrapper over structured data.
    Observed(Observable),
    Function(Function),
}

/// A slot address inside a record.
///
/// `Length` and `Iterate` are synthetic keys: reading a sequence's length
/// tracks `Length`, enumerating a mapping's keys tracks `Iterate`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Name(Arc<str>),
    Index(usize),
    Length,
    Iterate,
}

impl Key {
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Key::Name(name.into())
    }

    /// Interpret a value as a key. Non-negative integral numbers and their
    /// decimal spellings become indices.
    pub fn from_value(value: &Value) -> Key {
        match value {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Key::Index(*n as usize),
            Value::String(s) => Key::from(&**s),
            other => Key::Name(other.to_js_string().into()),
        }
    }

    /// The key's textual form, as used for mapping lookups.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Key::Name(name) => std::borrow::Cow::Borrowed(name),
            Key::Index(i) => std::borrow::Cow::Owned(i.to_string()),
            Key::Length => std::borrow::Cow::Borrowed("length"),
            Key::Iterate => std::borrow::Cow::Borrowed("__iterate__"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        if name == "length" {
            return Key::Length;
        }
        match name.parse::<usize>() {
            Ok(i) if i.to_string() == name => Key::Index(i),
            _ => Key::Name(name.into()),
        }
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::from(name.as_str())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl Value {
    /// Build a plain (unobserved) mapping.
    pub fn object<K, I>(entries: I) -> Value
    where
        K: Into<Arc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map: IndexMap<Arc<str>, Value> = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Record(Record::object(map))
    }

    /// Build a plain (unobserved) sequence.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Record(Record::array(items.into_iter().collect()))
    }

    /// Build a plain keyed collection with an iteration protocol.
    pub fn map<K, I>(entries: I) -> Value
    where
        K: Into<Arc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map: IndexMap<Arc<str>, Value> = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Record(Record::map(map))
    }

    pub fn string(s: impl Into<Arc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Record or observed record.
    pub fn is_structured(&self) -> bool {
        matches!(self, Value::Record(_) | Value::Observed(_))
    }

    /// The underlying record, looking through observation wrappers.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            Value::Observed(view) => Some(view.target()),
            _ => None,
        }
    }

    pub fn as_observed(&self) -> Option<&Observable> {
        match self {
            Value::Observed(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn record_kind(&self) -> Option<RecordKind> {
        self.as_record().map(Record::kind)
    }

    /// Script-style truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Record(_) | Value::Observed(_) | Value::Function(_) => true,
        }
    }

    /// Numeric coercion. Unparseable input becomes NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// String coercion as performed by `+` concatenation.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Record(_) | Value::Observed(_) => match self.record_kind() {
                Some(RecordKind::Array) => self
                    .list_items()
                    .iter()
                    .map(|v| if v.is_null() { String::new() } else { v.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(","),
                _ => "[object Object]".to_string(),
            },
            Value::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
        }
    }

    /// The text shown for an interpolation.
    ///
    /// Null renders as the empty string, sequences and plain mappings as
    /// pretty JSON with two-space indentation, everything else through
    /// string coercion.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Record(_) | Value::Observed(_) => {
                serde_json::to_string_pretty(&self.to_json()).unwrap_or_default()
            }
            other => other.to_js_string(),
        }
    }

    /// Snapshot into JSON. Reads through observation wrappers are tracked.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null | Value::Function(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                Json::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.to_string()),
            Value::Record(_) | Value::Observed(_) => match self.record_kind() {
                Some(RecordKind::Array) => {
                    Json::Array(self.list_items().iter().map(Value::to_json).collect())
                }
                _ => Json::Object(
                    self.entries()
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.to_json()))
                        .collect(),
                ),
            },
        }
    }

    /// Build a plain value tree from JSON.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::string(s.as_str()),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json)),
            Json::Object(map) => {
                Value::object(map.iter().map(|(k, v)| (k.as_str(), Value::from_json(v))))
            }
        }
    }

    /// Read a property. Observed records track the read; raw records and
    /// scalars do not. Strings expose `length`.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        match self {
            Value::Observed(view) => view.get(key),
            Value::Record(record) => record.get_raw(&key),
            Value::String(s) if key == Key::Length => Value::Number(s.chars().count() as f64),
            Value::String(s) => match key {
                Key::Index(i) => s
                    .chars()
                    .nth(i)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
            _ => Value::Null,
        }
    }

    /// Sequence items (tracked through wrappers). Empty for non-sequences.
    pub fn list_items(&self) -> Vec<Value> {
        match self {
            Value::Observed(view) => view.items(),
            Value::Record(record) => record.items_raw(),
            _ => Vec::new(),
        }
    }

    /// Mapping entries (tracked through wrappers). Sequences yield
    /// index-named entries.
    pub fn entries(&self) -> Vec<(Arc<str>, Value)> {
        match self {
            Value::Observed(view) => view.entries(),
            Value::Record(record) => record.entries_raw(),
            _ => Vec::new(),
        }
    }

    /// Identity-aware equality: structured values compare by storage
    /// identity, numbers by IEEE equality.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a.ptr_eq(b),
            (Value::Observed(a), Value::Observed(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

/// Whether replacing `old` with `new` counts as a change. NaN replacing NaN
/// does not.
pub fn has_changed(old: &Value, new: &Value) -> bool {
    if let (Value::Number(a), Value::Number(b)) = (old, new) {
        if a.is_nan() && b.is_nan() {
            return false;
        }
    }
    !old.same(new)
}

/// Format a number the way script engines print them.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Observable> for Value {
    fn from(view: Observable) -> Self {
        Value::Observed(view)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::array([]).is_truthy());
    }

    #[test]
    fn numbers_format_without_trailing_zero() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn display_string_pretty_prints_structures() {
        let value = Value::object([("a", Value::from(1)), ("b", Value::array([Value::from(true)]))]);

        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::from(2.5).to_display_string(), "2.5");
        assert_eq!(
            value.to_display_string(),
            "{\n  \"a\": 1,\n  \"b\": [\n    true\n  ]\n}"
        );
    }

    #[test]
    fn nan_is_not_a_change() {
        let nan = Value::Number(f64::NAN);
        assert!(!has_changed(&nan, &nan.clone()));
        assert!(has_changed(&Value::from(1), &Value::from(2)));
        assert!(!has_changed(&Value::from("a"), &Value::from("a")));
    }

    #[test]
    fn keys_parse_indices_and_length() {
        assert_eq!(Key::from("3"), Key::Index(3));
        assert_eq!(Key::from("03"), Key::name("03"));
        assert_eq!(Key::from("length"), Key::Length);
        assert_eq!(Key::from_value(&Value::from(2)), Key::Index(2));
    }

    #[test]
    fn json_round_trip_keeps_order() {
        let json: Json = serde_json::json!({"z": 1, "a": [1, 2]});
        let value = Value::from_json(&json);

        let keys: Vec<_> = value.entries().into_iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(value.get("a").get(1usize).to_number(), 2.0);
    }
}
