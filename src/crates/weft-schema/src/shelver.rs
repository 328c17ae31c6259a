//! The shelver: a process-local, content-addressed store for LOCAL
//! structures that cannot cross the wire.
//!
//! Keys are opaque to the wire and never reused across processes.
//! Shelving the same shared object twice returns the same key (identity
//! is the shared allocation). Drawers hold the value weakly: an entry
//! expires when the last owner of the value drops it, so shelved values
//! release through normal ownership instead of living for the whole
//! process. `collect` releases a drawer explicitly.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Result, SchemaError};
use crate::value::AnyObject;

#[derive(Default)]
pub struct Shelver {
    drawers: DashMap<String, Weak<dyn std::any::Any + Send + Sync>>,
    by_identity: DashMap<usize, String>,
}

impl Shelver {
    pub fn new() -> Self {
        Self::default()
    }

    fn identity(object: &AnyObject) -> usize {
        Arc::as_ptr(object) as *const () as usize
    }

    /// Shelve a value and return its drawer key. Idempotent per shared
    /// allocation while the allocation is alive.
    pub fn put(&self, object: AnyObject) -> String {
        let identity = Self::identity(&object);
        if let Some(existing) = self.by_identity.get(&identity) {
            let key = existing.clone();
            drop(existing);
            // The address may have been reused after the previous
            // occupant expired; only a live drawer proves identity.
            let alive = self
                .drawers
                .get(&key)
                .map(|weak| weak.upgrade().is_some())
                .unwrap_or(false);
            if alive {
                return key;
            }
            self.drawers.remove(&key);
            self.by_identity.remove(&identity);
        }

        let key = Uuid::new_v4().to_string();
        self.by_identity.insert(identity, key.clone());
        self.drawers.insert(key.clone(), Arc::downgrade(&object));
        key
    }

    pub fn get(&self, key: &str) -> Result<AnyObject> {
        if let Some(weak) = self.drawers.get(key) {
            if let Some(object) = weak.upgrade() {
                return Ok(object);
            }
        }
        // Either never shelved or the last owner dropped it.
        self.forget(key);
        Err(SchemaError::ShelveMiss(key.to_string()))
    }

    /// Drop a drawer explicitly. Returns the value if it is still
    /// alive.
    pub fn collect(&self, key: &str) -> Option<AnyObject> {
        let (_, weak) = self.drawers.remove(key)?;
        let object = weak.upgrade();
        if let Some(object) = &object {
            self.by_identity.remove(&Self::identity(object));
        }
        object
    }

    fn forget(&self, key: &str) {
        if let Some((_, weak)) = self.drawers.remove(key) {
            debug_assert!(weak.upgrade().is_none());
        }
    }

    /// Number of drawers, counting entries whose value may already have
    /// expired but has not been touched since.
    pub fn len(&self) -> usize {
        self.drawers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_for_the_same_allocation() {
        let shelver = Shelver::new();
        let object: AnyObject = Arc::new("opaque".to_string());
        let key1 = shelver.put(object.clone());
        let key2 = shelver.put(object);
        assert_eq!(key1, key2);
        assert_eq!(shelver.len(), 1);
    }

    #[test]
    fn distinct_allocations_get_distinct_keys() {
        let shelver = Shelver::new();
        let a: AnyObject = Arc::new(1u32);
        let b: AnyObject = Arc::new(1u32);
        let key1 = shelver.put(a.clone());
        let key2 = shelver.put(b.clone());
        assert_ne!(key1, key2);
    }

    #[test]
    fn get_round_trips_and_misses_are_typed() {
        let shelver = Shelver::new();
        let object: AnyObject = Arc::new(42u64);
        let key = shelver.put(object.clone());
        let value = shelver.get(&key).unwrap();
        assert_eq!(*value.downcast_ref::<u64>().unwrap(), 42);

        let err = shelver.get("no-such-drawer").unwrap_err();
        assert!(matches!(err, SchemaError::ShelveMiss(_)));
    }

    #[test]
    fn entries_expire_with_their_last_owner() {
        let shelver = Shelver::new();
        let object: AnyObject = Arc::new(5u8);
        let key = shelver.put(object.clone());
        assert!(shelver.get(&key).is_ok());

        drop(object);
        let err = shelver.get(&key).unwrap_err();
        assert!(matches!(err, SchemaError::ShelveMiss(_)));
        assert!(shelver.is_empty());
    }

    #[test]
    fn a_reused_address_gets_a_fresh_key() {
        let shelver = Shelver::new();
        let first: AnyObject = Arc::new(7u64);
        let key1 = shelver.put(first.clone());
        drop(first);

        // Re-shelving after the first owner dropped must never revive
        // the stale drawer, even if the allocator hands back the same
        // address.
        let second: AnyObject = Arc::new(8u64);
        let key2 = shelver.put(second.clone());
        assert_ne!(key1, key2);
        assert_eq!(
            *shelver.get(&key2).unwrap().downcast_ref::<u64>().unwrap(),
            8
        );
    }

    #[test]
    fn collect_removes_the_drawer() {
        let shelver = Shelver::new();
        let object: AnyObject = Arc::new(1i32);
        let key = shelver.put(object.clone());
        assert!(shelver.collect(&key).is_some());
        assert!(shelver.get(&key).is_err());
        assert!(shelver.is_empty());
    }
}
