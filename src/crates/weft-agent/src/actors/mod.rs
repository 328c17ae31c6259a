//! Actors: per-assignment execution units.
//!
//! The four callable shapes (function/generator × async/sync) collapse
//! into one [`Callable`] sum type with a single lifecycle driver in
//! [`runner`]. Sync variants run on the blocking thread pool; their
//! cancellation is cooperative through the handle's pausepoint.

pub mod handle;
pub mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use weft_schema::{AnyObject, BoxError, TypedValue};
use weft_state::{StateDocument, StateWorkerHandle};

use crate::errors::AgentError;
use crate::locks::LockSetGuard;

pub use handle::{AssignHandle, AssignInterrupt};

/// Posts values from a sync generator's thread back to the event loop.
#[derive(Clone)]
pub struct Yielder {
    tx: mpsc::Sender<Vec<TypedValue>>,
}

impl Yielder {
    pub(crate) fn new(tx: mpsc::Sender<Vec<TypedValue>>) -> Self {
        Yielder { tx }
    }

    /// Emit one set of yield values. Blocks the generator thread while
    /// the loop is busy shrinking the previous yield.
    pub fn send(&self, values: Vec<TypedValue>) -> std::result::Result<(), BoxError> {
        self.tx
            .blocking_send(values)
            .map_err(|_| BoxError::from("yield channel closed"))
    }
}

pub type AsyncFnCallable = Arc<
    dyn Fn(AssignContext) -> BoxFuture<'static, std::result::Result<Vec<TypedValue>, BoxError>>
        + Send
        + Sync,
>;

pub type AsyncGenCallable = Arc<
    dyn Fn(AssignContext) -> BoxStream<'static, std::result::Result<Vec<TypedValue>, BoxError>>
        + Send
        + Sync,
>;

pub type SyncFnCallable =
    Arc<dyn Fn(AssignContext) -> std::result::Result<Vec<TypedValue>, BoxError> + Send + Sync>;

pub type SyncGenCallable = Arc<
    dyn Fn(AssignContext, Yielder) -> std::result::Result<(), BoxError> + Send + Sync,
>;

/// The four executable shapes an implementation can take.
#[derive(Clone)]
pub enum Callable {
    AsyncFunction(AsyncFnCallable),
    AsyncGenerator(AsyncGenCallable),
    SyncFunction(SyncFnCallable),
    SyncGenerator(SyncGenCallable),
}

impl Callable {
    pub fn is_generator(&self) -> bool {
        matches!(
            self,
            Callable::AsyncGenerator(_) | Callable::SyncGenerator(_)
        )
    }
}

/// Lock-checked access to one injected state.
#[derive(Clone)]
pub struct StateAccess {
    document: Arc<StateDocument>,
    worker: StateWorkerHandle,
    witness: Arc<LockSetGuard>,
    read_only: bool,
}

impl StateAccess {
    pub(crate) fn new(
        document: Arc<StateDocument>,
        worker: StateWorkerHandle,
        witness: Arc<LockSetGuard>,
        read_only: bool,
    ) -> Self {
        StateAccess {
            document,
            worker,
            witness,
            read_only,
        }
    }

    pub fn name(&self) -> &str {
        self.document.name()
    }

    pub fn get(&self, path: &str) -> Option<TypedValue> {
        self.document.get(path)
    }

    pub fn set(&self, path: &str, value: TypedValue) -> Result<(), AgentError> {
        self.check_writable()?;
        Ok(self.document.set(&*self.witness, path, value)?)
    }

    pub fn append(&self, path: &str, value: TypedValue) -> Result<(), AgentError> {
        self.check_writable()?;
        Ok(self.document.append(&*self.witness, path, value)?)
    }

    pub fn insert(&self, path: &str, value: TypedValue) -> Result<(), AgentError> {
        self.check_writable()?;
        Ok(self.document.insert(&*self.witness, path, value)?)
    }

    pub fn remove(&self, path: &str) -> Result<(), AgentError> {
        self.check_writable()?;
        Ok(self.document.remove(&*self.witness, path)?)
    }

    /// Flush the state worker's buffered patches right now.
    pub async fn publish(&self) {
        self.worker.flush().await;
    }

    fn check_writable(&self) -> Result<(), AgentError> {
        if self.read_only {
            Err(AgentError::ReadOnlyState(self.name().to_string()))
        } else {
            Ok(())
        }
    }
}

/// Everything an invocation receives: expanded arguments, injected
/// contexts and states, and the back-channel handle.
pub struct AssignContext {
    pub handle: AssignHandle,
    args: HashMap<String, TypedValue>,
    contexts: HashMap<String, AnyObject>,
    states: HashMap<String, StateAccess>,
}

impl AssignContext {
    pub(crate) fn new(
        handle: AssignHandle,
        args: HashMap<String, TypedValue>,
        contexts: HashMap<String, AnyObject>,
        states: HashMap<String, StateAccess>,
    ) -> Self {
        AssignContext {
            handle,
            args,
            contexts,
            states,
        }
    }

    pub fn arg(&self, key: &str) -> Option<&TypedValue> {
        self.args.get(key)
    }

    pub fn args(&self) -> &HashMap<String, TypedValue> {
        &self.args
    }

    /// The injected context bound to this parameter name, downcast to
    /// its concrete type.
    pub fn context<T: Send + Sync + 'static>(&self, param: &str) -> Option<Arc<T>> {
        self.contexts.get(param)?.clone().downcast::<T>().ok()
    }

    /// The injected state bound to this parameter name.
    pub fn state(&self, param: &str) -> Option<&StateAccess> {
        self.states.get(param)
    }
}
