//! Keyed record stores.
//!
//! Everything lives in memory and is lost on restart. `Store` is the seam for
//! a persistent backend.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

pub trait Store<T: Clone>: Send + Sync {
    fn get(&self, id: &str) -> Option<T>;

    fn put(&self, id: &str, value: T);

    /// Apply `f` to the record under one write lock. Returns false if `id` is unknown.
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut T)) -> bool;

    fn delete(&self, id: &str) -> Option<T>;

    /// All records ordered by id.
    fn list(&self) -> Vec<(String, T)>;
}

/// `RwLock`-guarded map. Poisoned locks are recovered, not propagated.
#[derive(Debug)]
pub struct MemoryStore<T> {
    records: RwLock<BTreeMap<String, T>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Clone + Send + Sync> Store<T> for MemoryStore<T> {
    fn get(&self, id: &str) -> Option<T> {
        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(id).cloned()
    }

    fn put(&self, id: &str, value: T) {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(id.to_string(), value);
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut T)) -> bool {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match guard.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    fn delete(&self, id: &str) -> Option<T> {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(id)
    }

    fn list(&self) -> Vec<(String, T)> {
        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
