//! Observable state documents.
//!
//! A [`StateDocument`] wraps the state's value tree behind explicit
//! mutation operations. Every mutation checks the caller's held locks
//! against the state's required lock-set, applies the change, and
//! enqueues a [`DocumentPatch`] for the state worker. Mediating access
//! through this wrapper is what makes mutations observable; there is no
//! class patching involved.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use weft_schema::TypedValue;

use crate::error::{Result, StateError};
use crate::patch::{split_path, DocumentPatch, PatchOp};
use crate::schema::StateSchema;

/// The capacity of the per-state patch queue.
pub const PATCH_QUEUE_CAPACITY: usize = 1024;

/// Evidence of which named locks the caller currently holds.
pub trait LockWitness: Send + Sync {
    fn holds(&self, lock: &str) -> bool;
}

/// A witness holding no locks. Valid only against states that require
/// none.
pub struct NoLocks;

impl LockWitness for NoLocks {
    fn holds(&self, _lock: &str) -> bool {
        false
    }
}

pub struct StateDocument {
    name: String,
    schema: Arc<StateSchema>,
    required_locks: Vec<String>,
    doc: Mutex<TypedValue>,
    patch_tx: mpsc::Sender<DocumentPatch>,
}

impl StateDocument {
    /// Wrap an initial value (a dict at the root) as an observable
    /// document. Returns the receiving end of the patch queue for the
    /// state worker.
    pub fn new(
        schema: Arc<StateSchema>,
        required_locks: Vec<String>,
        initial: TypedValue,
    ) -> Result<(Arc<Self>, mpsc::Receiver<DocumentPatch>)> {
        if initial.as_dict().is_none() {
            return Err(StateError::WrongNode {
                state: schema.name.clone(),
                path: "/".to_string(),
                expected: "dict",
            });
        }
        let (patch_tx, patch_rx) = mpsc::channel(PATCH_QUEUE_CAPACITY);
        let document = Arc::new(StateDocument {
            name: schema.name.clone(),
            schema,
            required_locks,
            doc: Mutex::new(initial),
            patch_tx,
        });
        Ok((document, patch_rx))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    pub fn required_locks(&self) -> &[String] {
        &self.required_locks
    }

    /// A clone of the whole value tree.
    pub fn root(&self) -> TypedValue {
        self.doc.lock().clone()
    }

    /// A clone of the subtree at `path`, if it exists.
    pub fn get(&self, path: &str) -> Option<TypedValue> {
        let doc = self.doc.lock();
        let mut node: &TypedValue = &doc;
        for token in split_path(path) {
            node = match node {
                TypedValue::Dict(entries) => entries.get(&token)?,
                TypedValue::List(items) => items.get(token.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(node.clone())
    }

    /// Set the value at `path`, emitting `add` for new dict keys and
    /// `replace` otherwise.
    pub fn set(&self, witness: &dyn LockWitness, path: &str, value: TypedValue) -> Result<()> {
        self.check_locks(witness, path)?;
        let tokens = split_path(path);
        let Some((last, parents)) = tokens.split_last() else {
            return Err(StateError::UnknownPath {
                state: self.name.clone(),
                path: path.to_string(),
            });
        };

        let mut doc = self.doc.lock();
        let parent = self.resolve_node(&mut doc, parents, path)?;
        let op = match parent {
            TypedValue::Dict(entries) => {
                let op = if entries.contains_key(last) {
                    PatchOp::Replace
                } else {
                    PatchOp::Add
                };
                entries.insert(last.clone(), value.clone());
                op
            }
            TypedValue::List(items) => {
                let index = last.parse::<usize>().map_err(|_| StateError::UnknownPath {
                    state: self.name.clone(),
                    path: path.to_string(),
                })?;
                let slot = items.get_mut(index).ok_or_else(|| StateError::UnknownPath {
                    state: self.name.clone(),
                    path: path.to_string(),
                })?;
                *slot = value.clone();
                PatchOp::Replace
            }
            _ => {
                return Err(StateError::WrongNode {
                    state: self.name.clone(),
                    path: path.to_string(),
                    expected: "container",
                })
            }
        };
        drop(doc);

        self.emit(DocumentPatch {
            op,
            path: path.to_string(),
            value: Some(value),
        })
    }

    /// Append to the list at `path`. The emitted patch uses the RFC 6902
    /// `/-` append pointer.
    pub fn append(&self, witness: &dyn LockWitness, path: &str, value: TypedValue) -> Result<()> {
        self.check_locks(witness, path)?;
        let tokens = split_path(path);

        let mut doc = self.doc.lock();
        let node = self.resolve_node(&mut doc, &tokens, path)?;
        match node {
            TypedValue::List(items) => items.push(value.clone()),
            _ => {
                return Err(StateError::WrongNode {
                    state: self.name.clone(),
                    path: path.to_string(),
                    expected: "list",
                })
            }
        }
        drop(doc);

        self.emit(DocumentPatch {
            op: PatchOp::Add,
            path: format!("{}/-", path),
            value: Some(value),
        })
    }

    /// Insert into the list before the index given by the final path
    /// token.
    pub fn insert(&self, witness: &dyn LockWitness, path: &str, value: TypedValue) -> Result<()> {
        self.check_locks(witness, path)?;
        let tokens = split_path(path);
        let Some((last, parents)) = tokens.split_last() else {
            return Err(StateError::UnknownPath {
                state: self.name.clone(),
                path: path.to_string(),
            });
        };
        let index = last.parse::<usize>().map_err(|_| StateError::UnknownPath {
            state: self.name.clone(),
            path: path.to_string(),
        })?;

        let mut doc = self.doc.lock();
        let parent = self.resolve_node(&mut doc, parents, path)?;
        match parent {
            TypedValue::List(items) => {
                let index = index.min(items.len());
                items.insert(index, value.clone());
            }
            _ => {
                return Err(StateError::WrongNode {
                    state: self.name.clone(),
                    path: path.to_string(),
                    expected: "list",
                })
            }
        }
        drop(doc);

        self.emit(DocumentPatch {
            op: PatchOp::Add,
            path: path.to_string(),
            value: Some(value),
        })
    }

    /// Remove the dict key or list element at `path`.
    pub fn remove(&self, witness: &dyn LockWitness, path: &str) -> Result<()> {
        self.check_locks(witness, path)?;
        let tokens = split_path(path);
        let Some((last, parents)) = tokens.split_last() else {
            return Err(StateError::UnknownPath {
                state: self.name.clone(),
                path: path.to_string(),
            });
        };

        let mut doc = self.doc.lock();
        let parent = self.resolve_node(&mut doc, parents, path)?;
        let removed = match parent {
            TypedValue::Dict(entries) => entries.remove(last).is_some(),
            TypedValue::List(items) => match last.parse::<usize>() {
                Ok(index) if index < items.len() => {
                    items.remove(index);
                    true
                }
                _ => false,
            },
            _ => false,
        };
        drop(doc);

        if !removed {
            return Err(StateError::UnknownPath {
                state: self.name.clone(),
                path: path.to_string(),
            });
        }

        self.emit(DocumentPatch {
            op: PatchOp::Remove,
            path: path.to_string(),
            value: None,
        })
    }

    fn resolve_node<'a>(
        &self,
        root: &'a mut TypedValue,
        tokens: &[String],
        full_path: &str,
    ) -> Result<&'a mut TypedValue> {
        let mut node = root;
        for token in tokens {
            node = match node {
                TypedValue::Dict(entries) => {
                    entries
                        .get_mut(token)
                        .ok_or_else(|| StateError::UnknownPath {
                            state: self.name.clone(),
                            path: full_path.to_string(),
                        })?
                }
                TypedValue::List(items) => {
                    let index =
                        token
                            .parse::<usize>()
                            .map_err(|_| StateError::UnknownPath {
                                state: self.name.clone(),
                                path: full_path.to_string(),
                            })?;
                    items.get_mut(index).ok_or_else(|| StateError::UnknownPath {
                        state: self.name.clone(),
                        path: full_path.to_string(),
                    })?
                }
                _ => {
                    return Err(StateError::WrongNode {
                        state: self.name.clone(),
                        path: full_path.to_string(),
                        expected: "container",
                    })
                }
            };
        }
        Ok(node)
    }

    fn check_locks(&self, witness: &dyn LockWitness, path: &str) -> Result<()> {
        let missing: Vec<String> = self
            .required_locks
            .iter()
            .filter(|lock| !witness.holds(lock))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StateError::LockViolation {
                state: self.name.clone(),
                path: path.to_string(),
                missing,
            })
        }
    }

    fn emit(&self, patch: DocumentPatch) -> Result<()> {
        match self.patch_tx.try_send(patch) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(StateError::PatchBufferFull(self.name.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Worker is gone (shutdown in progress); the local
                // mutation stands, the patch is not replicated.
                tracing::warn!(state = %self.name, "patch dropped: state worker stopped");
                Ok(())
            }
        }
    }
}
