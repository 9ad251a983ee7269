//! In-process state store.
//!
//! Clones share the same map, so a test can hand one clone to a runtime and
//! keep another to inspect what was persisted or to "restart" the runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::StateStore;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, String>,
    /// Writes still allowed before every write fails. `None` is unlimited.
    writes_left: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until switched back off.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().writes_left = fail.then_some(0);
    }

    /// Let the next `allowed` group writes through, then fail the rest until
    /// `fail_writes(false)`.
    pub fn fail_writes_after(&self, allowed: usize) {
        self.lock().writes_left = Some(allowed);
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(inner: &mut Inner, group: &str) -> Result<(), StoreError> {
        match inner.writes_left.as_mut() {
            None => Ok(()),
            Some(0) => Err(StoreError::WriteFailed {
                group: group.to_string(),
                message: "writes disabled".into(),
            }),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
        }
    }
}

impl StateStore for MemoryStore {
    fn put(&mut self, group: &str, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_writable(&mut inner, group)?;
        for (key, value) in entries {
            inner.values.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().values.get(key).cloned())
    }

    fn delete(&mut self, group: &str, keys: &[&str]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_writable(&mut inner, group)?;
        for key in keys {
            inner.values.remove(*key);
        }
        Ok(())
    }

    fn take(&mut self, group: &str, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let mut inner = self.lock();
        Self::check_writable(&mut inner, group)?;
        Ok(keys.iter().map(|key| inner.values.remove(*key)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_values() {
        let mut store = MemoryStore::new();
        let other = store.clone();
        store.put("g", &[("g.a", "1".into())]).unwrap();
        assert_eq!(other.get("g.a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn failing_writes_leave_values_untouched() {
        let mut store = MemoryStore::new();
        store.put("g", &[("g.a", "1".into())]).unwrap();
        store.fail_writes(true);
        assert!(store.put("g", &[("g.a", "2".into())]).is_err());
        assert!(store.delete("g", &["g.a"]).is_err());
        assert!(store.take("g", &["g.a"]).is_err());
        assert_eq!(store.get("g.a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn writes_fail_once_allowance_is_spent() {
        let mut store = MemoryStore::new();
        store.fail_writes_after(1);
        store.put("a", &[("a.x", "1".into())]).unwrap();
        assert!(store.put("b", &[("b.x", "1".into())]).is_err());
        assert!(store.delete("a", &["a.x"]).is_err());
        assert_eq!(store.get("a.x").unwrap().as_deref(), Some("1"));
        assert!(store.get("b.x").unwrap().is_none());

        store.fail_writes(false);
        store.put("b", &[("b.x", "1".into())]).unwrap();
    }
}
