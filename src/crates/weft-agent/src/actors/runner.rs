//! The actor lifecycle driver.
//!
//! One runner task per live assignment:
//!
//! ```text
//! BOUND → QUEUED → (locks, expand) → RUNNING → YIELD* → terminal
//! ```
//!
//! Every path emits exactly one terminal event. Expansion failures are
//! CRITICAL, user errors are ERROR, panics and shrink failures are
//! CRITICAL, and the typed [`AssignInterrupt`] signal maps onto
//! CANCELLED / INTERRUPTED.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use weft_schema::{expand_inputs, shrink_outputs, BoxError, Shelver, StructureRegistry, TypedValue};
use weft_state::StateRegistry;

use crate::actors::{AssignContext, AssignHandle, AssignInterrupt, Callable, StateAccess, Yielder};
use crate::contexts::ContextRegistry;
use crate::implementation::Implementation;
use crate::locks::LockManager;
use crate::messages::{Assign, AssignmentEvent, EventKind};
use crate::outbound::EventSink;

/// Shared machinery every actor needs.
#[derive(Clone)]
pub struct ActorRuntime {
    pub registry: Arc<StructureRegistry>,
    pub shelver: Arc<Shelver>,
    pub contexts: Arc<ContextRegistry>,
    pub states: Arc<StateRegistry>,
    pub locks: Arc<LockManager>,
    pub sink: EventSink,
}

/// Agent-side control over one live actor.
pub struct ActorHandle {
    pub cancel: CancellationToken,
    pub interrupt: CancellationToken,
    pub pause: watch::Sender<bool>,
    pub join: JoinHandle<()>,
}

/// Spawn the runner task for one assignment.
pub fn spawn_actor(
    runtime: ActorRuntime,
    implementation: Arc<Implementation>,
    assign: Assign,
) -> ActorHandle {
    let cancel = CancellationToken::new();
    let interrupt = CancellationToken::new();
    let (pause_tx, pause_rx) = watch::channel(false);

    let runner = Runner {
        runtime,
        implementation,
        assign,
        cancel: cancel.clone(),
        interrupt: interrupt.clone(),
        paused: pause_rx,
    };
    let join = tokio::spawn(runner.run());

    ActorHandle {
        cancel,
        interrupt,
        pause: pause_tx,
        join,
    }
}

struct Runner {
    runtime: ActorRuntime,
    implementation: Arc<Implementation>,
    assign: Assign,
    cancel: CancellationToken,
    interrupt: CancellationToken,
    paused: watch::Receiver<bool>,
}

impl Runner {
    async fn emit(&self, kind: EventKind) {
        self.runtime
            .sink
            .emit(AssignmentEvent::new(&self.assign.assignment, kind))
            .await;
    }

    async fn emit_with_message(&self, kind: EventKind, message: String) {
        self.runtime
            .sink
            .emit(AssignmentEvent::new(&self.assign.assignment, kind).with_message(message))
            .await;
    }

    async fn run(self) {
        self.emit(EventKind::Bound).await;
        self.emit(EventKind::Queued).await;

        // Acquire the declared lock-set before RUNNING; a cancel that
        // arrives while queued wins.
        let lock_set = self.implementation.plan.lock_set();
        let guard = tokio::select! {
            guard = self.runtime.locks.acquire(&lock_set) => guard,
            _ = self.cancel.cancelled() => {
                self.emit(EventKind::Cancelled).await;
                return;
            }
            _ = self.interrupt.cancelled() => {
                self.emit(EventKind::Interrupted).await;
                return;
            }
        };
        let witness = Arc::new(guard);

        let args = match expand_inputs(
            &self.implementation.definition,
            &self.assign.args,
            &self.runtime.registry,
            &self.runtime.shelver,
        )
        .await
        {
            Ok(args) => args,
            Err(e) => {
                self.emit_with_message(EventKind::Critical, e.to_string()).await;
                return;
            }
        };

        let handle = AssignHandle::new(
            &self.assign,
            self.runtime.sink.clone(),
            self.cancel.clone(),
            self.interrupt.clone(),
            self.paused.clone(),
        );

        let context = match self.build_context(handle, args, witness.clone()) {
            Ok(context) => context,
            Err(message) => {
                self.emit_with_message(EventKind::Critical, message).await;
                return;
            }
        };

        match self.implementation.callable.clone() {
            Callable::AsyncFunction(callable) => self.run_async_function(callable, context).await,
            Callable::AsyncGenerator(callable) => self.run_async_generator(callable, context).await,
            Callable::SyncFunction(callable) => self.run_sync_function(callable, context).await,
            Callable::SyncGenerator(callable) => self.run_sync_generator(callable, context).await,
        }

        // The lock-set releases here, after the terminal event.
        drop(witness);
    }

    fn build_context(
        &self,
        handle: AssignHandle,
        args: HashMap<String, TypedValue>,
        witness: Arc<crate::locks::LockSetGuard>,
    ) -> Result<AssignContext, String> {
        let plan = &self.implementation.plan;

        let mut contexts = HashMap::new();
        for injection in plan.contexts() {
            let registered = self
                .runtime
                .contexts
                .get(&injection.name)
                .ok_or_else(|| format!("context '{}' is not registered", injection.name))?;
            contexts.insert(injection.param.clone(), registered.object);
        }

        let mut states = HashMap::new();
        for injection in plan.states() {
            let registered = self
                .runtime
                .states
                .get(&injection.name)
                .map_err(|e| e.to_string())?;
            let read_only = injection.kind == weft_schema::InjectionKind::ReadOnlyState;
            states.insert(
                injection.param.clone(),
                StateAccess::new(
                    registered.document,
                    registered.handle,
                    witness.clone(),
                    read_only,
                ),
            );
        }

        Ok(AssignContext::new(handle, args, contexts, states))
    }

    async fn run_async_function(
        &self,
        callable: crate::actors::AsyncFnCallable,
        context: AssignContext,
    ) {
        let future = callable(context);
        tokio::select! {
            result = future => match result {
                Ok(returns) => self.finish(returns).await,
                Err(e) => self.fail(e).await,
            },
            _ = self.cancel.cancelled() => self.emit(EventKind::Cancelled).await,
            _ = self.interrupt.cancelled() => self.emit(EventKind::Interrupted).await,
        }
    }

    async fn run_async_generator(
        &self,
        callable: crate::actors::AsyncGenCallable,
        context: AssignContext,
    ) {
        let mut stream = callable(context);
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(values)) => {
                        if !self.emit_yield(values).await {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        self.fail(e).await;
                        return;
                    }
                    None => {
                        self.emit(EventKind::Done).await;
                        return;
                    }
                },
                _ = self.cancel.cancelled() => {
                    self.emit(EventKind::Cancelled).await;
                    return;
                }
                _ = self.interrupt.cancelled() => {
                    self.emit(EventKind::Interrupted).await;
                    return;
                }
            }
        }
    }

    async fn run_sync_function(
        &self,
        callable: crate::actors::SyncFnCallable,
        context: AssignContext,
    ) {
        // Cancellation of sync code is cooperative: the thread observes
        // it at its next pausepoint, so the ack is deferred until the
        // callable returns.
        let join = tokio::task::spawn_blocking(move || callable(context));
        match join.await {
            Ok(Ok(returns)) => self.finish(returns).await,
            Ok(Err(e)) => self.fail(e).await,
            Err(join_error) => {
                self.emit_with_message(
                    EventKind::Critical,
                    format!("actor panicked: {}", join_error),
                )
                .await;
            }
        }
    }

    async fn run_sync_generator(
        &self,
        callable: crate::actors::SyncGenCallable,
        context: AssignContext,
    ) {
        let (yield_tx, mut yield_rx) = mpsc::channel(1);
        let yielder = Yielder::new(yield_tx);
        let join = tokio::task::spawn_blocking(move || callable(context, yielder));

        let mut shrink_failed = false;
        while let Some(values) = yield_rx.recv().await {
            if !self.emit_yield(values).await {
                shrink_failed = true;
                break;
            }
        }
        drop(yield_rx);

        let result = join.await;
        if shrink_failed {
            // CRITICAL was already emitted; the generator thread ended
            // with a closed-channel error we deliberately ignore.
            return;
        }
        match result {
            Ok(Ok(())) => self.emit(EventKind::Done).await,
            Ok(Err(e)) => self.fail(e).await,
            Err(join_error) => {
                self.emit_with_message(
                    EventKind::Critical,
                    format!("actor panicked: {}", join_error),
                )
                .await;
            }
        }
    }

    /// Shrink and emit one YIELD. Returns false after emitting CRITICAL
    /// on a shrink failure.
    async fn emit_yield(&self, values: Vec<TypedValue>) -> bool {
        match shrink_outputs(
            &self.implementation.definition,
            &values,
            &self.runtime.registry,
            &self.runtime.shelver,
        )
        .await
        {
            Ok(returns) => {
                self.runtime
                    .sink
                    .emit(
                        AssignmentEvent::new(&self.assign.assignment, EventKind::Yield)
                            .with_returns(returns),
                    )
                    .await;
                true
            }
            Err(e) => {
                self.emit_with_message(EventKind::Critical, e.to_string()).await;
                false
            }
        }
    }

    async fn finish(&self, returns: Vec<TypedValue>) {
        if self.emit_yield(returns).await {
            self.emit(EventKind::Done).await;
        }
    }

    async fn fail(&self, error: BoxError) {
        match error.downcast_ref::<AssignInterrupt>() {
            Some(AssignInterrupt::Cancelled) => self.emit(EventKind::Cancelled).await,
            Some(AssignInterrupt::Interrupted) => self.emit(EventKind::Interrupted).await,
            None => {
                self.emit_with_message(EventKind::Error, error.to_string())
                    .await
            }
        }
    }
}
