//! Small thread-safe containers shared by the orchestrator.
//!
//! The active-request registry, the per-session message queue, and the
//! mutable configuration fields all go through these wrappers instead of
//! ad hoc `Mutex<HashMap<..>>` pairs. Locks are std locks: they are held for
//! a handful of instructions and never across an `.await`.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, RwLock};

/// A mutex-protected hash map.
#[derive(Debug)]
pub struct SyncMap<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SyncMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clone of the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        self.lock().insert(key, value);
    }

    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(key);
    }

    /// Remove and return the value stored under `key`.
    pub fn take<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every entry.
    pub fn copy(&self) -> HashMap<K, V> {
        self.lock().clone()
    }

    /// Run a compound read-modify-write under a single lock acquisition.
    pub fn with<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        f(&mut self.lock())
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-write-locked single value. Readers get a clone.
#[derive(Debug, Default)]
pub struct SyncValue<T> {
    inner: RwLock<T>,
}

impl<T: Clone> SyncValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

/// A read-write-locked vector. Readers get a copy.
#[derive(Debug, Default)]
pub struct SyncSlice<T> {
    inner: RwLock<Vec<T>>,
}

impl<T: Clone> SyncSlice<T> {
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: RwLock::new(items),
        }
    }

    pub fn copy(&self) -> Vec<T> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_slice(&self, items: Vec<T>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = items;
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
