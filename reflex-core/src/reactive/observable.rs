//! Observable records and their wrapper views.
//!
//! # How Observation Works
//!
//! 1. Structured state lives in a [`Record`]: an ordered mapping, a sequence
//!    or a keyed collection. A record owns one [`Dep`] per key that has ever
//!    been read under a running computation.
//! 2. [`reactive`], [`readonly`], [`shallow_reactive`] and
//!    [`shallow_readonly`] hand out an [`Observable`] view over a record.
//!    Views are memoized per (record, mode): wrapping twice returns the same
//!    view.
//! 3. Reading through a view tracks the key; writing through a view
//!    compares old and new values and triggers the key's subscribers only
//!    when something changed.
//! 4. Deep views wrap nested records lazily, at read time. Shallow views
//!    return nested values as stored.
//!
//! Readonly views still track reads but reject every write with a warning.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::runtime::{track, trigger, TrackOp, TriggerOp};
use crate::graph::Dep;
use crate::value::{has_changed, Key, Value};

/// The shape of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Ordered string-keyed mapping.
    Object,
    /// Integer-indexed sequence with a length.
    Array,
    /// Keyed collection with its own iteration protocol. Updating an existing
    /// key also counts as a change to its iteration.
    Map,
}

enum Storage {
    Entries(IndexMap<Arc<str>, Value>),
    Items(Vec<Value>),
}

struct RecordCell {
    id: u64,
    kind: RecordKind,
    storage: RwLock<Storage>,
    deps: Mutex<HashMap<Key, Arc<Dep>>>,
    skip: AtomicBool,
    frozen: AtomicBool,
    views: Mutex<[Weak<ViewCell>; 4]>,
}

/// Raw structured data plus its per-key dependency sets.
///
/// Cloning a `Record` clones the handle, not the data.
#[derive(Clone)]
pub struct Record(Arc<RecordCell>);

impl Record {
    fn with_storage(kind: RecordKind, storage: Storage) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(Arc::new(RecordCell {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            kind,
            storage: RwLock::new(storage),
            deps: Mutex::new(HashMap::new()),
            skip: AtomicBool::new(false),
            frozen: AtomicBool::new(false),
            views: Mutex::new([Weak::new(), Weak::new(), Weak::new(), Weak::new()]),
        }))
    }

    pub fn object(entries: IndexMap<Arc<str>, Value>) -> Self {
        Self::with_storage(RecordKind::Object, Storage::Entries(entries))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::with_storage(RecordKind::Array, Storage::Items(items))
    }

    pub fn map(entries: IndexMap<Arc<str>, Value>) -> Self {
        Self::with_storage(RecordKind::Map, Storage::Entries(entries))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn kind(&self) -> RecordKind {
        self.0.kind
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Exclude this record from observation.
    pub fn mark_raw(&self) {
        self.0.skip.store(true, Ordering::Relaxed);
    }

    /// Make the record non-extensible. Frozen records are not observed and
    /// reject writes.
    pub fn freeze(&self) {
        self.0.frozen.store(true, Ordering::Relaxed);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::Relaxed)
    }

    /// Whether wrapping this record yields a view.
    pub fn is_observable(&self) -> bool {
        !self.0.skip.load(Ordering::Relaxed) && !self.is_frozen()
    }

    /// Map a key onto the form this record stores it under.
    pub fn normalize_key(&self, key: Key) -> Key {
        match (self.kind(), key) {
            (RecordKind::Array, Key::Name(name)) => Key::from(&*name),
            (RecordKind::Object | RecordKind::Map, Key::Index(i)) => Key::Name(i.to_string().into()),
            (RecordKind::Object | RecordKind::Map, Key::Length) => Key::name("length"),
            (_, key) => key,
        }
    }

    /// Read a slot without tracking.
    pub fn get_raw(&self, key: &Key) -> Value {
        let key = self.normalize_key(key.clone());
        match &*self.0.storage.read() {
            Storage::Entries(map) => map.get(&*key.as_str()).cloned().unwrap_or_default(),
            Storage::Items(items) => match key {
                Key::Index(i) => items.get(i).cloned().unwrap_or_default(),
                Key::Length => Value::from(items.len()),
                _ => Value::Null,
            },
        }
    }

    /// Write a slot without triggering. Returns the previous value.
    pub fn set_raw(&self, key: &Key, value: Value) -> Option<Value> {
        let key = self.normalize_key(key.clone());
        match &mut *self.0.storage.write() {
            Storage::Entries(map) => map.insert(key.as_str().into(), value),
            Storage::Items(items) => match key {
                Key::Index(i) if i < items.len() => Some(std::mem::replace(&mut items[i], value)),
                Key::Index(i) => {
                    items.resize(i, Value::Null);
                    items.push(value);
                    None
                }
                _ => None,
            },
        }
    }

    pub fn contains_raw(&self, key: &Key) -> bool {
        let key = self.normalize_key(key.clone());
        match &*self.0.storage.read() {
            Storage::Entries(map) => map.contains_key(&*key.as_str()),
            Storage::Items(items) => match key {
                Key::Index(i) => i < items.len(),
                Key::Length => true,
                _ => false,
            },
        }
    }

    pub fn len_raw(&self) -> usize {
        match &*self.0.storage.read() {
            Storage::Entries(map) => map.len(),
            Storage::Items(items) => items.len(),
        }
    }

    pub fn items_raw(&self) -> Vec<Value> {
        match &*self.0.storage.read() {
            Storage::Entries(map) => map.values().cloned().collect(),
            Storage::Items(items) => items.clone(),
        }
    }

    pub fn entries_raw(&self) -> Vec<(Arc<str>, Value)> {
        match &*self.0.storage.read() {
            Storage::Entries(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Storage::Items(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Arc::from(i.to_string()), v.clone()))
                .collect(),
        }
    }

    /// The dependency set for `key`, created on first use.
    pub(crate) fn dep_for(&self, key: &Key) -> Arc<Dep> {
        self.0
            .deps
            .lock()
            .entry(key.clone())
            .or_insert_with(Dep::new)
            .clone()
    }

    /// Dependency sets selected by `filter`, without creating any.
    pub(crate) fn deps_where(&self, mut filter: impl FnMut(&Key) -> bool) -> Vec<Arc<Dep>> {
        self.0
            .deps
            .lock()
            .iter()
            .filter(|(key, _)| filter(key))
            .map(|(_, dep)| dep.clone())
            .collect()
    }

    /// Number of keys that currently have a dependency set.
    pub fn tracked_keys(&self) -> usize {
        self.0.deps.lock().len()
    }

    pub(crate) fn with_items<T>(&self, f: impl FnOnce(&mut Vec<Value>) -> T) -> Option<T> {
        match &mut *self.0.storage.write() {
            Storage::Items(items) => Some(f(items)),
            Storage::Entries(_) => None,
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut IndexMap<Arc<str>, Value>) -> T) -> Option<T> {
        match &mut *self.0.storage.write() {
            Storage::Entries(map) => Some(f(map)),
            Storage::Items(_) => None,
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("len", &self.len_raw())
            .finish()
    }
}

/// How a view treats nested values and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserveMode {
    Reactive,
    Readonly,
    ShallowReactive,
    ShallowReadonly,
}

impl ObserveMode {
    pub fn is_readonly(self) -> bool {
        matches!(self, ObserveMode::Readonly | ObserveMode::ShallowReadonly)
    }

    pub fn is_shallow(self) -> bool {
        matches!(self, ObserveMode::ShallowReactive | ObserveMode::ShallowReadonly)
    }

    fn slot(self) -> usize {
        match self {
            ObserveMode::Reactive => 0,
            ObserveMode::Readonly => 1,
            ObserveMode::ShallowReactive => 2,
            ObserveMode::ShallowReadonly => 3,
        }
    }
}

struct ViewCell {
    target: Record,
    mode: ObserveMode,
}

/// An observation wrapper over a [`Record`].
#[derive(Clone)]
pub struct Observable(Arc<ViewCell>);

impl Observable {
    /// The memoized view of `record` in `mode`.
    pub fn wrap(record: &Record, mode: ObserveMode) -> Self {
        let mut views = record.0.views.lock();
        if let Some(existing) = views[mode.slot()].upgrade() {
            return Self(existing);
        }
        let view = Arc::new(ViewCell {
            target: record.clone(),
            mode,
        });
        views[mode.slot()] = Arc::downgrade(&view);
        Self(view)
    }

    pub fn target(&self) -> &Record {
        &self.0.target
    }

    pub fn mode(&self) -> ObserveMode {
        self.0.mode
    }

    pub fn kind(&self) -> RecordKind {
        self.0.target.kind()
    }

    pub fn is_readonly(&self) -> bool {
        self.0.mode.is_readonly()
    }

    pub fn is_shallow(&self) -> bool {
        self.0.mode.is_shallow()
    }

    pub fn ptr_eq(&self, other: &Observable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Wrap a nested value according to this view's depth.
    fn wrap_child(&self, value: Value) -> Value {
        if self.is_shallow() {
            return value;
        }
        match value {
            Value::Record(record) if record.is_observable() => {
                let mode = if self.is_readonly() {
                    ObserveMode::Readonly
                } else {
                    ObserveMode::Reactive
                };
                Value::Observed(Observable::wrap(&record, mode))
            }
            other => other,
        }
    }

    fn reject_write(&self, op: &str, key: &Key) -> bool {
        if self.is_readonly() {
            tracing::warn!(%key, op, "write rejected: target is readonly");
            return true;
        }
        if self.target().is_frozen() {
            tracing::warn!(%key, op, "write rejected: target is frozen");
            return true;
        }
        false
    }

    /// Read a slot, tracking it.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = self.target().normalize_key(key.into());
        let value = self.target().get_raw(&key);
        track(self.target(), TrackOp::Get, &key);
        self.wrap_child(value)
    }

    /// Write a slot. Returns false if the write was rejected.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let key = self.target().normalize_key(key.into());
        let value = value.into();
        if self.reject_write("set", &key) {
            return false;
        }
        let value = if self.is_shallow() { value } else { to_raw(&value) };
        let target = self.target();

        match (target.kind(), &key) {
            (RecordKind::Array, Key::Length) => {
                self.set_len(value.to_number().max(0.0) as usize);
                true
            }
            (RecordKind::Array, Key::Index(_)) | (RecordKind::Object | RecordKind::Map, Key::Name(_)) => {
                match target.set_raw(&key, value.clone()) {
                    None => trigger(target, TriggerOp::Add, &key),
                    Some(old) if has_changed(&old, &value) => trigger(target, TriggerOp::Set, &key),
                    Some(_) => {}
                }
                true
            }
            _ => {
                tracing::warn!(%key, kind = ?target.kind(), "unsupported key for write");
                false
            }
        }
    }

    /// Remove a slot. Sequence slots are cleared to null.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let key = self.target().normalize_key(key.into());
        if self.reject_write("delete", &key) {
            return false;
        }
        let target = self.target();
        let removed = match &key {
            Key::Name(name) => target
                .with_entries(|map| map.shift_remove(&**name).is_some())
                .unwrap_or(false),
            Key::Index(i) => target
                .with_items(|items| match items.get_mut(*i) {
                    Some(slot) => !std::mem::take(slot).is_null(),
                    None => false,
                })
                .unwrap_or(false),
            _ => false,
        };
        if removed {
            trigger(target, TriggerOp::Delete, &key);
        }
        removed
    }

    /// Membership test, tracked.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = self.target().normalize_key(key.into());
        track(self.target(), TrackOp::Has, &key);
        self.target().contains_raw(&key)
    }

    /// Entry count. Sequences track their length, mappings their iteration.
    pub fn len(&self) -> usize {
        self.track_iteration();
        self.target().len_raw()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn track_iteration(&self) {
        let key = match self.kind() {
            RecordKind::Array => Key::Length,
            RecordKind::Object | RecordKind::Map => Key::Iterate,
        };
        track(self.target(), TrackOp::Iterate, &key);
    }

    /// The record's keys in order.
    pub fn keys(&self) -> Vec<Key> {
        self.track_iteration();
        match self.kind() {
            RecordKind::Array => (0..self.target().len_raw()).map(Key::Index).collect(),
            RecordKind::Object | RecordKind::Map => self
                .target()
                .entries_raw()
                .into_iter()
                .map(|(k, _)| Key::Name(k))
                .collect(),
        }
    }

    /// Every value, each read tracked and wrapped.
    pub fn items(&self) -> Vec<Value> {
        self.keys().into_iter().map(|key| self.get(key)).collect()
    }

    /// Every (name, value) pair, each read tracked and wrapped.
    pub fn entries(&self) -> Vec<(Arc<str>, Value)> {
        self.keys()
            .into_iter()
            .map(|key| {
                let name: Arc<str> = key.as_str().into();
                (name, self.get(key))
            })
            .collect()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        if self.reject_write("clear", &Key::Iterate) {
            return;
        }
        let had_entries = self.target().len_raw() > 0;
        match &mut *self.target().0.storage.write() {
            Storage::Entries(map) => map.clear(),
            Storage::Items(items) => items.clear(),
        }
        if had_entries {
            trigger(self.target(), TriggerOp::Clear, &Key::Iterate);
        }
    }

    // -------------------------------------------------------------------
    // Sequence operations
    // -------------------------------------------------------------------

    /// Resize a sequence. Shrinking notifies every index past the new end.
    pub fn set_len(&self, len: usize) {
        if self.reject_write("set", &Key::Length) {
            return;
        }
        let changed = self
            .target()
            .with_items(|items| {
                let old = items.len();
                items.resize(len, Value::Null);
                old != len
            })
            .unwrap_or(false);
        if changed {
            trigger(self.target(), TriggerOp::SetLength(len), &Key::Length);
        }
    }

    /// Shorten the array to at most `len` items. Never grows it.
    pub fn truncate(&self, len: usize) {
        if self.target().kind() == RecordKind::Array && len < self.target().len_raw() {
            self.set_len(len);
        }
    }

    pub fn push(&self, value: impl Into<Value>) -> bool {
        let value = to_raw(&value.into());
        if self.reject_write("push", &Key::Length) {
            return false;
        }
        let Some(index) = self.target().with_items(|items| {
            items.push(value);
            items.len() - 1
        }) else {
            return false;
        };
        trigger(self.target(), TriggerOp::Add, &Key::Index(index));
        true
    }

    pub fn pop(&self) -> Option<Value> {
        if self.reject_write("pop", &Key::Length) {
            return None;
        }
        let (value, len) = self
            .target()
            .with_items(|items| {
                let value = items.pop();
                (value, items.len())
            })?;
        let value = value?;
        trigger(self.target(), TriggerOp::SetLength(len), &Key::Length);
        Some(self.wrap_child(value))
    }

    /// Insert at `index` (clamped to the length), shifting later items.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> bool {
        let value = to_raw(&value.into());
        if self.reject_write("insert", &Key::Index(index)) {
            return false;
        }
        let Some(at) = self.target().with_items(|items| {
            let at = index.min(items.len());
            items.insert(at, value);
            at
        }) else {
            return false;
        };
        trigger(self.target(), TriggerOp::Shift(at), &Key::Index(at));
        true
    }

    /// Remove the item at `index`, shifting later items down.
    pub fn remove(&self, index: usize) -> Option<Value> {
        if self.reject_write("remove", &Key::Index(index)) {
            return None;
        }
        let value = self
            .target()
            .with_items(|items| (index < items.len()).then(|| items.remove(index)))??;
        trigger(self.target(), TriggerOp::Shift(index), &Key::Index(index));
        Some(self.wrap_child(value))
    }

    /// Identity search over a sequence. Reads every index.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        let needle = to_raw(needle);
        self.items()
            .iter()
            .position(|item| to_raw(item).same(&needle))
    }

    pub fn includes(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("target", &self.0.target)
            .field("mode", &self.0.mode)
            .finish()
    }
}

fn create_view(value: Value, mode: ObserveMode) -> Value {
    match value {
        Value::Record(record) => {
            if !record.is_observable() {
                tracing::debug!(record = record.id(), "record is excluded from observation");
                return Value::Record(record);
            }
            Value::Observed(Observable::wrap(&record, mode))
        }
        Value::Observed(view) => {
            if view.mode() == mode || (view.is_readonly() && !mode.is_readonly()) {
                return Value::Observed(view);
            }
            Value::Observed(Observable::wrap(view.target(), mode))
        }
        other => {
            tracing::debug!("value cannot be made reactive: not a record");
            other
        }
    }
}

/// Deep, writable view.
pub fn reactive(value: impl Into<Value>) -> Value {
    create_view(value.into(), ObserveMode::Reactive)
}

/// Deep view that rejects writes.
pub fn readonly(value: impl Into<Value>) -> Value {
    create_view(value.into(), ObserveMode::Readonly)
}

/// Writable view that does not wrap nested records.
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    create_view(value.into(), ObserveMode::ShallowReactive)
}

/// Readonly view that does not wrap nested records.
pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    create_view(value.into(), ObserveMode::ShallowReadonly)
}

/// The raw record behind a view; other values pass through.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Observed(view) => Value::Record(view.target().clone()),
        other => other.clone(),
    }
}

/// Exclude a record from observation and return it.
pub fn mark_raw(value: Value) -> Value {
    if let Some(record) = value.as_record() {
        record.mark_raw();
    }
    value
}

pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Observed(view) if !view.is_readonly())
}

pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Observed(view) if view.is_readonly())
}

pub fn is_shallow(value: &Value) -> bool {
    matches!(value, Value::Observed(view) if view.is_shallow())
}

/// Whether `value` is any kind of view.
pub fn is_observed(value: &Value) -> bool {
    matches!(value, Value::Observed(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Value {
        Value::object([
            ("count", Value::from(0)),
            ("nested", Value::object([("label", Value::from("a"))])),
            ("items", Value::array([Value::from(1), Value::from(2)])),
        ])
    }

    #[test]
    fn wrapping_is_memoized_per_mode() {
        let raw = state();
        let a = reactive(raw.clone());
        let b = reactive(raw.clone());
        let ro = readonly(raw.clone());

        assert!(a.as_observed().unwrap().ptr_eq(b.as_observed().unwrap()));
        assert!(!a.as_observed().unwrap().ptr_eq(ro.as_observed().unwrap()));
        assert!(reactive(a.clone()).as_observed().unwrap().ptr_eq(a.as_observed().unwrap()));
    }

    #[test]
    fn non_records_pass_through() {
        assert_eq!(reactive(Value::from(3)), Value::from(3));
        assert!(!is_observed(&readonly("text")));
    }

    #[test]
    fn marked_and_frozen_records_are_not_observed() {
        let skipped = mark_raw(Value::object([("a", Value::from(1))]));
        assert!(!is_observed(&reactive(skipped)));

        let frozen = Value::array([]);
        frozen.as_record().unwrap().freeze();
        assert!(!is_observed(&reactive(frozen)));
    }

    #[test]
    fn deep_views_wrap_nested_records() {
        let view = reactive(state());
        let nested = view.get("nested");
        assert!(is_reactive(&nested));

        let shallow = shallow_reactive(state());
        assert!(is_shallow(&shallow));
        assert!(!is_observed(&shallow.get("nested")));

        let ro = readonly(state());
        assert!(is_readonly(&ro.get("nested")));
    }

    #[test]
    fn readonly_rejects_writes() {
        let ro = readonly(state());
        let view = ro.as_observed().unwrap();

        assert!(!view.set("count", 5));
        assert!(!view.delete("count"));
        assert_eq!(view.get("count"), Value::from(0));
    }

    #[test]
    fn writes_store_raw_values() {
        let view = reactive(state());
        let other = reactive(Value::object([("x", Value::from(1))]));
        view.as_observed().unwrap().set("child", other.clone());

        let stored = view.as_record().unwrap().get_raw(&Key::name("child"));
        assert!(matches!(stored, Value::Record(_)));
        assert_eq!(to_raw(&other), stored);
    }

    #[test]
    fn sequence_operations_keep_order() {
        let list = reactive(Value::array([Value::from("a")]));
        let view = list.as_observed().unwrap();

        view.push("c");
        view.insert(1, "b");
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(1usize), Value::from("b"));

        assert_eq!(view.remove(0), Some(Value::from("a")));
        assert_eq!(view.pop(), Some(Value::from("c")));
        assert!(view.includes(&Value::from("b")));

        view.set_len(3);
        assert_eq!(view.len(), 3);
        assert!(view.get(2usize).is_null());

        view.truncate(5);
        assert_eq!(view.len(), 3);
        view.truncate(1);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn mapping_delete_preserves_remaining_order() {
        let view = reactive(Value::object([
            ("a", Value::from(1)),
            ("b", Value::from(2)),
            ("c", Value::from(3)),
        ]));
        let view = view.as_observed().unwrap();

        assert!(view.delete("b"));
        assert!(!view.delete("b"));
        let keys: Vec<_> = view.keys().iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }
}
