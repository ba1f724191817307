//! Dictionary object implementation.
//!
//! A string-keyed hash map used for globals, builtins and materialized
//! locals. Keys are interned-style `Rc<str>`; lookups take `&str`.
//!
//! Mutation never drops a value while the map is borrowed: replaced and
//! removed values are moved out first, so a destructor that re-enters the
//! same dictionary observes a consistent map.

use crate::error::{CoreError, CoreResult};
use crate::mapping::Mapping;
use crate::trace::{Trace, Tracer};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

// =============================================================================
// Dictionary Object
// =============================================================================

/// Name-keyed dictionary.
///
/// Uses FxHashMap for fast insertion and lookup. Iteration order is not
/// preserved.
#[derive(Default)]
pub struct DictObject {
    items: RefCell<FxHashMap<Rc<str>, Value>>,
}

impl DictObject {
    /// Create a new empty dict.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dict from key/value pairs.
    #[must_use]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let items = pairs
            .into_iter()
            .map(|(k, v)| (Rc::from(k), v))
            .collect::<FxHashMap<_, _>>();
        Self {
            items: RefCell::new(items),
        }
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    /// Whether the dict is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Look up a key.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.items.borrow().get(key).cloned()
    }

    /// Whether a key is present.
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.borrow().contains_key(key)
    }

    /// Insert or replace an entry, returning the previous value.
    pub fn insert(&self, key: &str, value: Value) -> Option<Value> {
        let mut items = self.items.borrow_mut();
        if let Some(slot) = items.get_mut(key) {
            return Some(std::mem::replace(slot, value));
        }
        items.insert(Rc::from(key), value);
        None
    }

    /// Remove an entry, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.items.borrow_mut().remove(key)
    }

    /// Snapshot of the keys.
    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.items.borrow().keys().cloned().collect()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.items.borrow_mut());
        drop(old);
    }
}

impl Mapping for DictObject {
    fn get_item(&self, key: &str) -> CoreResult<Value> {
        self.get(key).ok_or_else(|| CoreError::key(key))
    }

    fn set_item(&self, key: &str, value: Value) -> CoreResult<()> {
        drop(self.insert(key, value));
        Ok(())
    }

    fn del_item(&self, key: &str) -> CoreResult<()> {
        match self.remove(key) {
            Some(old) => {
                drop(old);
                Ok(())
            }
            None => Err(CoreError::key(key)),
        }
    }
}

impl Trace for DictObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for value in self.items.borrow().values() {
            tracer.trace_value(value);
        }
    }

    fn clear_refs(&self) {
        self.clear();
    }
}

impl fmt::Debug for DictObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items.borrow().iter()).finish()
    }
}
