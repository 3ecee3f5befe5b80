//! Per-execution context shared along the forward direction of a chain.
//!
//! Cloning a [`Context`] clones a handle: every clone observes the same
//! entries. [`Context::fork`] produces an independent copy.

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A JSON object used for context snapshots and partial updates.
pub type ContextMap = serde_json::Map<String, serde_json::Value>;

#[derive(Default)]
struct ContextData {
    entries: ContextMap,
    typed: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// Mutable mapping owned by a single in-flight execution.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Mutex<ContextData>>,
}

impl Context {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context seeded with the given entries.
    pub fn from_map(entries: ContextMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextData {
                entries,
                typed: FxHashMap::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of the string-keyed entries.
    pub fn get_context(&self) -> ContextMap {
        self.lock().entries.clone()
    }

    /// Shallow-merges `partial` into the context. Keys in `partial` replace
    /// existing entries of the same name.
    pub fn set_context(&self, partial: ContextMap) {
        let mut data = self.lock();
        for (key, value) in partial {
            data.entries.insert(key, value);
        }
    }

    /// Sets a single entry.
    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.lock().entries.insert(key.into(), v);
        }
    }

    /// Gets a single entry, deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().entries.get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    /// Gets the raw JSON value of a single entry.
    pub fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().entries.get(key).cloned()
    }

    /// Returns true if an entry with the given name exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Removes an entry, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().entries.remove(key)
    }

    /// Stores a typed value. Values that do not serialize to JSON (abort
    /// handles, clients, counters) go here.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.lock().typed.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Retrieves a typed value stored with [`Context::insert`].
    pub fn get_typed<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let value = self.lock().typed.get(&TypeId::of::<T>()).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Creates an independent copy. Later writes to either side are not
    /// visible to the other.
    pub fn fork(&self) -> Self {
        let data = self.lock();
        Self {
            inner: Arc::new(Mutex::new(ContextData {
                entries: data.entries.clone(),
                typed: data.typed.clone(),
            })),
        }
    }

    /// Returns true if both handles point at the same context.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.lock();
        f.debug_struct("Context")
            .field("entries", &data.entries)
            .field("typed_count", &data.typed.len())
            .finish()
    }
}
