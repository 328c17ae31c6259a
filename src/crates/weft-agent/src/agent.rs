//! The agent: owns the control-plane session and everything hosted in
//! this process.
//!
//! Three cooperating concerns run over one connection:
//!
//! 1. the inbound dispatcher, routing server messages to actor spawns,
//!    signals and catch-ups;
//! 2. the outbound sender, draining the single byte-bounded FIFO queue;
//! 3. the state fan-in, forwarding worker envelopes into that queue.
//!
//! Transport loss pauses the outbound sender, keeps actors running and
//! reconnects with capped exponential backoff; terminated assignments
//! are replayed from the in-memory buffer on the next INIT.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use weft_schema::{Shelver, StructureRegistry, TypedValue};
use weft_state::{
    Envelope, Patch, PatchOp, RegisteredState, StateDocument, StateRegistry, StateSchema,
    StateWorker,
};

use crate::actors::runner::{spawn_actor, ActorRuntime};
use crate::contexts::ContextRegistry;
use crate::errors::{AgentError, Result};
use crate::extension::AgentExtension;
use crate::implementation::Implementation;
use crate::locks::LockManager;
use crate::messages::{
    Assign, AssignmentEvent, Bindings, EventKind, FromAgentMessage, ImplementationAnnouncement,
    Init, StateAnnouncement, ToAgentMessage,
};
use crate::outbound::{outbound_queue, EventSink, OutboundQueue, OutboundReceiver};
use crate::replay::ReplayBuffer;
use crate::transport::{Connector, TransportSink, TransportStream};

#[derive(Clone)]
pub struct AgentConfig {
    pub instance_id: String,
    /// Debounce window handed to every state worker.
    pub publish_interval: Duration,
    /// How long a graceful shutdown waits for actor acks.
    pub grace_period: Duration,
    pub replay_capacity: usize,
    pub replay_ttl: Duration,
    pub outbound_high_water: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig::new(uuid::Uuid::new_v4().to_string())
    }
}

impl AgentConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        AgentConfig {
            instance_id: instance_id.into(),
            publish_interval: weft_state::DEFAULT_PUBLISH_INTERVAL,
            grace_period: Duration::from_secs(10),
            replay_capacity: crate::replay::DEFAULT_REPLAY_CAPACITY,
            replay_ttl: crate::replay::DEFAULT_REPLAY_TTL,
            outbound_high_water: crate::outbound::DEFAULT_HIGH_WATER_BYTES,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

struct ActorEntry {
    cancel: CancellationToken,
    interrupt: CancellationToken,
    pause: watch::Sender<bool>,
}

enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

pub struct Agent {
    config: AgentConfig,
    registry: Arc<StructureRegistry>,
    shelver: Arc<Shelver>,
    contexts: Arc<ContextRegistry>,
    states: Arc<StateRegistry>,
    locks: Arc<LockManager>,
    implementations: RwLock<HashMap<String, Arc<Implementation>>>,
    bindings: RwLock<Bindings>,
    implementation_ids: RwLock<HashMap<String, String>>,
    running: Arc<Mutex<HashMap<String, ActorEntry>>>,
    extensions: RwLock<Vec<Arc<dyn AgentExtension>>>,
    queue: OutboundQueue,
    outbound_rx: Mutex<Option<OutboundReceiver>>,
    envelope_tx: mpsc::Sender<Envelope>,
    envelope_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    replay: Arc<ReplayBuffer>,
    sink: EventSink,
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig, registry: Arc<StructureRegistry>) -> Self {
        let (queue, outbound_rx) = outbound_queue(config.outbound_high_water);
        let (envelope_tx, envelope_rx) = mpsc::channel(64);
        let replay = Arc::new(ReplayBuffer::new(config.replay_capacity, config.replay_ttl));
        let sink = EventSink::new(queue.clone(), replay.clone());

        Agent {
            config,
            registry,
            shelver: Arc::new(Shelver::new()),
            contexts: Arc::new(ContextRegistry::new()),
            states: Arc::new(StateRegistry::new()),
            locks: Arc::new(LockManager::new()),
            implementations: RwLock::new(HashMap::new()),
            bindings: RwLock::new(Bindings::default()),
            implementation_ids: RwLock::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            extensions: RwLock::new(Vec::new()),
            queue,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            envelope_tx,
            envelope_rx: Mutex::new(Some(envelope_rx)),
            replay,
            sink,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<StructureRegistry> {
        &self.registry
    }

    pub fn shelver(&self) -> &Arc<Shelver> {
        &self.shelver
    }

    /// The latest server bindings (empty before the first INIT reply).
    pub fn bindings(&self) -> Bindings {
        self.bindings.read().clone()
    }

    /// Register an implementation under its interface name.
    pub fn register_implementation(&self, implementation: Implementation) {
        let interface = implementation.interface.clone();
        self.implementations
            .write()
            .insert(interface, Arc::new(implementation));
    }

    pub fn unregister_implementation(&self, interface: &str) -> bool {
        self.implementations.write().remove(interface).is_some()
    }

    pub fn add_extension(&self, extension: Arc<dyn AgentExtension>) {
        self.extensions.write().push(extension);
    }

    /// Register a shared context object, injectable by name.
    pub fn register_context<T: Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        object: T,
        locks: &[&str],
    ) {
        self.contexts.register(name, object, locks);
    }

    /// Register a replicated state: wraps the initial value as an
    /// observable document and spawns its worker.
    pub async fn register_state(
        &self,
        schema: StateSchema,
        initial: TypedValue,
        required_locks: Vec<String>,
    ) -> Result<Arc<StateDocument>> {
        let schema = Arc::new(schema);
        let (document, patch_rx) = StateDocument::new(schema, required_locks, initial)?;
        let (worker, handle) = StateWorker::create(
            document.clone(),
            self.registry.clone(),
            self.shelver.clone(),
            self.config.publish_interval,
            patch_rx,
            self.envelope_tx.clone(),
            self.queue.pressure(),
        )
        .await?;
        tokio::spawn(worker.run());

        self.states.insert(RegisteredState {
            document: document.clone(),
            handle,
        });
        Ok(document)
    }

    pub fn state_document(&self, name: &str) -> Result<Arc<StateDocument>> {
        Ok(self.states.get(name)?.document)
    }

    /// Request a graceful stop: cancels all actors, waits for their
    /// acks up to the grace period, then closes the transport.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Drive the control-plane connection until shutdown. Reconnects
    /// with capped exponential backoff and jitter on transport loss.
    pub async fn run(&self, connector: &dyn Connector) -> Result<()> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| AgentError::Transport("agent is already running".to_string()))?;

        // State fan-in runs apart from the session loop so a congested
        // queue never stalls inbound dispatch.
        let envelope_rx = self
            .envelope_rx
            .lock()
            .take()
            .ok_or_else(|| AgentError::Transport("agent is already running".to_string()))?;
        let fan_in_queue = self.queue.clone();
        tokio::spawn(fan_in(envelope_rx, fan_in_queue));

        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let (sink, stream) = match connector.connect().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "connect failed");
                    if !self.backoff(&mut attempt).await {
                        break;
                    }
                    continue;
                }
            };
            attempt = 0;

            match self.session(sink, stream, &mut outbound_rx).await {
                SessionEnd::Shutdown => break,
                SessionEnd::ConnectionLost => {
                    tracing::warn!("control connection lost, reconnecting");
                    if !self.backoff(&mut attempt).await {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sleep out the backoff for this attempt. Returns false when
    /// shutdown interrupted the wait.
    async fn backoff(&self, attempt: &mut u32) -> bool {
        let exp = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(*attempt))
            .min(self.config.backoff_cap);
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        let delay = exp.mul_f64(1.0 + jitter);
        *attempt = attempt.saturating_add(1);

        tracing::debug!(delay_ms = delay.as_millis() as u64, "reconnect backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.cancelled() => false,
        }
    }

    async fn session(
        &self,
        mut sink: Box<dyn TransportSink>,
        mut stream: Box<dyn TransportStream>,
        outbound_rx: &mut OutboundReceiver,
    ) -> SessionEnd {
        if let Err(e) = self.send_init(&mut sink).await {
            tracing::warn!(error = %e, "session init failed");
            return SessionEnd::ConnectionLost;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.graceful_stop(&mut sink, outbound_rx).await;
                    return SessionEnd::Shutdown;
                }
                inbound = stream.recv() => match inbound {
                    Ok(Some(message)) => self.handle_inbound(message).await,
                    Ok(None) => return SessionEnd::ConnectionLost,
                    Err(e) => {
                        tracing::warn!(error = %e, "inbound read failed");
                        return SessionEnd::ConnectionLost;
                    }
                },
                outbound = outbound_rx.recv() => {
                    if let Some(message) = outbound {
                        if let Err(e) = sink.send(message).await {
                            tracing::warn!(error = %e, "outbound write failed");
                            return SessionEnd::ConnectionLost;
                        }
                    }
                }
            }
        }
    }

    async fn send_init(&self, sink: &mut Box<dyn TransportSink>) -> Result<()> {
        let implementations: Vec<ImplementationAnnouncement> = self
            .implementations
            .read()
            .values()
            .map(|imp| ImplementationAnnouncement {
                interface: imp.interface.clone(),
                hash: imp.definition.hash(),
                definition: (*imp.definition).clone(),
                dependencies: imp.dependencies.clone(),
                dynamic: imp.dynamic,
            })
            .collect();

        let mut states = Vec::new();
        for registered in self.states.all() {
            let revised = registered.handle.get_revision().await;
            states.push(StateAnnouncement {
                name: registered.document.name().to_string(),
                schema: (**registered.document.schema()).clone(),
                snapshot: revised.data,
                rev: revised.revision,
            });
        }

        let (replayed, lost) = self.replay.drain_for_replay();

        sink.send(FromAgentMessage::Init(Init {
            instance_id: self.config.instance_id.clone(),
            implementations,
            states,
            needs_reconciliation: lost,
        }))
        .await?;

        // Assignments that terminated during an outage: re-emit their
        // terminal events right after the INIT.
        for event in replayed {
            let _ = self.queue.send_now(FromAgentMessage::Event(event));
        }
        Ok(())
    }

    async fn handle_inbound(&self, message: ToAgentMessage) {
        match message {
            ToAgentMessage::Hello { message } => {
                tracing::info!(message = message.as_deref().unwrap_or(""), "server hello");
            }
            ToAgentMessage::InitReply { bindings } => {
                let mut ids = HashMap::new();
                for (interface, id) in &bindings.implementations {
                    ids.insert(id.clone(), interface.clone());
                }
                *self.implementation_ids.write() = ids;
                *self.bindings.write() = bindings;
                tracing::info!("session bound");
            }
            ToAgentMessage::Assign(assign) => self.start_assignment(assign),
            ToAgentMessage::Cancel { assignment } => {
                if let Some(entry) = self.running.lock().get(&assignment) {
                    entry.cancel.cancel();
                } else {
                    tracing::warn!(assignment = %assignment, "cancel for unknown assignment");
                }
            }
            ToAgentMessage::Interrupt { assignment } => {
                if let Some(entry) = self.running.lock().get(&assignment) {
                    entry.interrupt.cancel();
                } else {
                    tracing::warn!(assignment = %assignment, "interrupt for unknown assignment");
                }
            }
            ToAgentMessage::Pause { assignment } => {
                let paused = {
                    let running = self.running.lock();
                    running
                        .get(&assignment)
                        .map(|entry| entry.pause.send(true).is_ok())
                        .unwrap_or(false)
                };
                if paused {
                    self.sink
                        .emit_now(AssignmentEvent::new(&assignment, EventKind::Paused));
                }
            }
            ToAgentMessage::Resume { assignment } => {
                let resumed = {
                    let running = self.running.lock();
                    running
                        .get(&assignment)
                        .map(|entry| entry.pause.send(false).is_ok())
                        .unwrap_or(false)
                };
                if resumed {
                    self.sink
                        .emit_now(AssignmentEvent::new(&assignment, EventKind::Resumed));
                }
            }
            ToAgentMessage::Ping { id } => {
                let _ = self.queue.send_now(FromAgentMessage::Pong { id });
            }
            ToAgentMessage::Provide { implementation } => self.provide(&implementation).await,
            ToAgentMessage::Unprovide { implementation } => self.unprovide(&implementation).await,
            ToAgentMessage::Catchup {
                state_name,
                from_rev,
            } => self.catch_up(&state_name, from_rev).await,
        }
    }

    fn start_assignment(&self, assign: Assign) {
        let interface = self
            .implementation_ids
            .read()
            .get(&assign.implementation)
            .cloned()
            .unwrap_or_else(|| assign.implementation.clone());

        let Some(implementation) = self.implementations.read().get(&interface).cloned() else {
            tracing::error!(implementation = %interface, "assign for unknown implementation");
            self.sink.emit_now(
                AssignmentEvent::new(&assign.assignment, EventKind::Critical)
                    .with_message(format!("no implementation registered for {}", interface)),
            );
            return;
        };

        let mut running = self.running.lock();
        if running.contains_key(&assign.assignment) {
            // An assignment id is owned by at most one live actor.
            tracing::warn!(assignment = %assign.assignment, "duplicate assign ignored");
            return;
        }

        let runtime = ActorRuntime {
            registry: self.registry.clone(),
            shelver: self.shelver.clone(),
            contexts: self.contexts.clone(),
            states: self.states.clone(),
            locks: self.locks.clone(),
            sink: self.sink.clone(),
        };

        let id = assign.assignment.clone();
        let handle = spawn_actor(runtime, implementation, assign);
        running.insert(
            id.clone(),
            ActorEntry {
                cancel: handle.cancel.clone(),
                interrupt: handle.interrupt.clone(),
                pause: handle.pause,
            },
        );
        drop(running);

        let running_map = self.running.clone();
        let join = handle.join;
        tokio::spawn(async move {
            let _ = join.await;
            running_map.lock().remove(&id);
        });
    }

    async fn provide(&self, implementation: &str) {
        let extensions: Vec<Arc<dyn AgentExtension>> = self.extensions.read().clone();
        for extension in extensions {
            match extension.provide(implementation).await {
                Ok(Some(imp)) => {
                    tracing::info!(implementation = %implementation, interface = %imp.interface, "provided");
                    self.register_implementation(imp.dynamic());
                    return;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(implementation = %implementation, error = %e, "provide failed");
                    return;
                }
            }
        }
        tracing::warn!(implementation = %implementation, "no extension provides this implementation");
    }

    async fn unprovide(&self, implementation: &str) {
        let interface = self
            .implementation_ids
            .read()
            .get(implementation)
            .cloned()
            .unwrap_or_else(|| implementation.to_string());
        if self.unregister_implementation(&interface) {
            let extensions: Vec<Arc<dyn AgentExtension>> = self.extensions.read().clone();
            for extension in extensions {
                if let Err(e) = extension.unprovide(implementation).await {
                    tracing::error!(implementation = %implementation, error = %e, "unprovide failed");
                }
            }
        }
    }

    /// Answer a catch-up request with a full re-snapshot envelope.
    async fn catch_up(&self, state_name: &str, from_rev: u64) {
        match self.states.get(state_name) {
            Ok(registered) => {
                let revised = registered.handle.get_revision().await;
                let envelope = Envelope {
                    state_name: state_name.to_string(),
                    rev: revised.revision,
                    base_rev: from_rev,
                    ts: chrono::Utc::now(),
                    patches: vec![Patch {
                        op: PatchOp::Replace,
                        path: String::new(),
                        value: Some(revised.data),
                        old_value: None,
                    }],
                };
                let _ = self.queue.send_now(FromAgentMessage::Envelope(envelope));
            }
            Err(e) => tracing::warn!(state = %state_name, error = %e, "catch-up for unknown state"),
        }
    }

    async fn graceful_stop(
        &self,
        sink: &mut Box<dyn TransportSink>,
        outbound_rx: &mut OutboundReceiver,
    ) {
        tracing::info!("graceful shutdown: cancelling actors");
        {
            let running = self.running.lock();
            for entry in running.values() {
                entry.cancel.cancel();
            }
        }

        // Wait for the actors to ack, bounded by the grace period.
        let deadline = tokio::time::Instant::now() + self.config.grace_period;
        while !self.running.lock().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                let stragglers = self.running.lock().len();
                tracing::warn!(stragglers, "grace period elapsed with live actors");
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        // Flush whatever made it into the queue (terminal acks).
        loop {
            match tokio::time::timeout(Duration::from_millis(100), outbound_rx.recv()).await {
                Ok(Some(message)) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
        let _ = sink.close().await;
    }
}

/// Forward state envelopes into the outbound queue. Runs apart from the
/// session loop so queue backpressure never blocks inbound dispatch.
async fn fan_in(mut envelope_rx: mpsc::Receiver<Envelope>, queue: OutboundQueue) {
    while let Some(envelope) = envelope_rx.recv().await {
        if queue.send(FromAgentMessage::Envelope(envelope)).await.is_err() {
            break;
        }
    }
}
