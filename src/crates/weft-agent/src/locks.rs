//! Named exclusive locks with deadlock-free set acquisition.
//!
//! Every declared lock is exclusive; an assignment's lock-set is
//! acquired atomically by sorted name, so two assignments with
//! overlapping sets serialize in arrival order per lock and can never
//! deadlock against each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use weft_state::LockWitness;

#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_named(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire a set of locks, sorted by name. Returns a guard that
    /// witnesses the held set and releases everything on drop.
    pub async fn acquire(&self, names: &[String]) -> LockSetGuard {
        let mut sorted: Vec<String> = names.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for name in &sorted {
            let lock = self.lock_named(name);
            guards.push(lock.lock_owned().await);
        }

        LockSetGuard {
            held: sorted,
            _guards: guards,
        }
    }
}

/// The held lock-set of one running assignment.
pub struct LockSetGuard {
    held: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSetGuard {
    pub fn held(&self) -> &[String] {
        &self.held
    }
}

impl LockWitness for LockSetGuard {
    fn holds(&self, lock: &str) -> bool {
        self.held.iter().any(|held| held == lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn disjoint_sets_run_in_parallel() {
        let manager = Arc::new(LockManager::new());
        let _a = manager.acquire(&["alpha".to_string()]).await;
        // A disjoint set must not block.
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire(&["beta".to_string()]),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn overlapping_sets_serialize_in_arrival_order() {
        let manager = Arc::new(LockManager::new());
        let guard = manager.acquire(&["shared".to_string()]).await;

        let manager2 = manager.clone();
        let waiter = tokio::spawn(async move {
            let _g = manager2.acquire(&["shared".to_string()]).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn guard_witnesses_exactly_the_held_set() {
        let manager = LockManager::new();
        let guard = manager
            .acquire(&["b".to_string(), "a".to_string(), "b".to_string()])
            .await;
        assert_eq!(guard.held(), &["a".to_string(), "b".to_string()]);
        assert!(guard.holds("a"));
        assert!(!guard.holds("c"));
    }
}
