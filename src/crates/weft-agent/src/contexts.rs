//! Shared context objects, injected into assignments by name.

use dashmap::DashMap;

use weft_schema::AnyObject;

/// One registered context: the shared object and the locks guarding it.
#[derive(Clone)]
pub struct RegisteredContext {
    pub object: AnyObject,
    pub locks: Vec<String>,
}

/// snake-cased name → context. Registered at startup, read per
/// assignment.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: DashMap<String, RegisteredContext>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        object: T,
        locks: &[&str],
    ) {
        self.contexts.insert(
            name.into(),
            RegisteredContext {
                object: std::sync::Arc::new(object),
                locks: locks.iter().map(|l| l.to_string()).collect(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<RegisteredContext> {
        self.contexts.get(name).map(|entry| entry.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.contexts.iter().map(|e| e.key().clone()).collect()
    }
}
