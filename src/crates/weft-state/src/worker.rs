//! The per-state replication worker.
//!
//! One worker owns one state: it drains the document's patch queue with
//! a debounce window, squashes redundant operations, shrinks the
//! surviving values through the schema, applies them to its snapshot
//! and publishes a monotonically revisioned [`Envelope`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};

use weft_schema::{shrink_port, Shelver, StructureRegistry, TypedValue};

use crate::document::StateDocument;
use crate::error::Result;
use crate::patch::{apply_patches, DocumentPatch, Envelope, Patch, PatchOp};

/// The default debounce window.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// How often the debounce window may double while the outbound queue is
/// congested.
const MAX_CONGESTION_DOUBLINGS: u32 = 6;

/// A consistent view of the replicated snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct RevisedState {
    pub revision: u64,
    pub data: Value,
}

enum Control {
    Flush(oneshot::Sender<()>),
}

struct Shared {
    name: String,
    snapshot: Mutex<SnapshotInner>,
}

struct SnapshotInner {
    rev: u64,
    data: Value,
}

/// Cheap handle for readers and the publish back-channel.
#[derive(Clone)]
pub struct StateWorkerHandle {
    shared: Arc<Shared>,
    control_tx: mpsc::Sender<Control>,
}

impl StateWorkerHandle {
    /// The current revision and snapshot, read under the worker's lock.
    pub async fn get_revision(&self) -> RevisedState {
        let snapshot = self.shared.snapshot.lock().await;
        RevisedState {
            revision: snapshot.rev,
            data: snapshot.data.clone(),
        }
    }

    /// Force an immediate flush of buffered patches, bypassing the
    /// debounce window. Resolves once the flush completed.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control_tx.send(Control::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

pub struct StateWorker {
    document: Arc<StateDocument>,
    registry: Arc<StructureRegistry>,
    shelver: Arc<Shelver>,
    interval: Duration,
    patch_rx: mpsc::Receiver<DocumentPatch>,
    control_rx: mpsc::Receiver<Control>,
    envelope_tx: mpsc::Sender<Envelope>,
    pressure: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl StateWorker {
    /// Build a worker and its handle, capturing the initial snapshot by
    /// shrinking the document's current value tree.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        document: Arc<StateDocument>,
        registry: Arc<StructureRegistry>,
        shelver: Arc<Shelver>,
        interval: Duration,
        patch_rx: mpsc::Receiver<DocumentPatch>,
        envelope_tx: mpsc::Sender<Envelope>,
        pressure: Arc<AtomicBool>,
    ) -> Result<(Self, StateWorkerHandle)> {
        let baseline = shrink_full(&document, &registry, &shelver).await?;
        let shared = Arc::new(Shared {
            name: document.name().to_string(),
            snapshot: Mutex::new(SnapshotInner {
                rev: 0,
                data: baseline,
            }),
        });
        let (control_tx, control_rx) = mpsc::channel(8);
        let handle = StateWorkerHandle {
            shared: shared.clone(),
            control_tx,
        };
        Ok((
            StateWorker {
                document,
                registry,
                shelver,
                interval,
                patch_rx,
                control_rx,
                envelope_tx,
                pressure,
                shared,
            },
            handle,
        ))
    }

    /// The event-driven loop: idle until a patch arrives, coalesce over
    /// the debounce window, then flush the batch. A flush control cuts
    /// the window short.
    pub async fn run(mut self) {
        let mut control_open = true;
        loop {
            tokio::select! {
                maybe_patch = self.patch_rx.recv() => {
                    let Some(first) = maybe_patch else { break };
                    let mut batch = vec![first];
                    let interrupted = self.debounce(&mut control_open).await;
                    while let Ok(patch) = self.patch_rx.try_recv() {
                        batch.push(patch);
                    }
                    if let Err(e) = self.flush_batch(batch).await {
                        tracing::error!(state = %self.shared.name, error = %e, "state flush failed");
                    }
                    if let Some(Control::Flush(ack)) = interrupted {
                        let _ = ack.send(());
                    }
                }
                maybe_control = self.control_rx.recv(), if control_open => {
                    match maybe_control {
                        Some(Control::Flush(ack)) => {
                            let mut batch = Vec::new();
                            while let Ok(patch) = self.patch_rx.try_recv() {
                                batch.push(patch);
                            }
                            if !batch.is_empty() {
                                if let Err(e) = self.flush_batch(batch).await {
                                    tracing::error!(state = %self.shared.name, error = %e, "forced flush failed");
                                }
                            }
                            let _ = ack.send(());
                        }
                        None => control_open = false,
                    }
                }
            }
        }
        tracing::debug!(state = %self.shared.name, "state worker stopped");
    }

    /// Sleep out the debounce window. Returns the control message that
    /// interrupted it, if any.
    async fn debounce(&mut self, control_open: &mut bool) -> Option<Control> {
        if self.interval.is_zero() {
            return None;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.interval) => {}
            ctl = self.control_rx.recv(), if *control_open => {
                match ctl {
                    Some(control) => return Some(control),
                    None => *control_open = false,
                }
            }
        }

        // Over the high-water mark the sender is congested: keep
        // coalescing with a doubled window until it drains.
        let mut window = self.interval;
        let mut doublings = 0;
        while self.pressure.load(Ordering::Relaxed) && doublings < MAX_CONGESTION_DOUBLINGS {
            window *= 2;
            doublings += 1;
            tracing::debug!(
                state = %self.shared.name,
                window_ms = window.as_millis() as u64,
                "outbound congested, widening debounce"
            );
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                ctl = self.control_rx.recv(), if *control_open => {
                    match ctl {
                        Some(control) => return Some(control),
                        None => *control_open = false,
                    }
                }
            }
        }
        None
    }

    async fn flush_batch(&self, batch: Vec<DocumentPatch>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let squashed = squash(batch);

        let mut wire_patches = Vec::with_capacity(squashed.len());
        for patch in squashed {
            let Some(port) = self
                .document
                .schema()
                .resolve_port_for_path(&patch.path)
                .cloned()
            else {
                tracing::error!(
                    state = %self.shared.name,
                    path = %patch.path,
                    "no port resolves for patch path"
                );
                continue;
            };

            let value = match patch.op {
                PatchOp::Add | PatchOp::Replace => {
                    let rich = patch.value.unwrap_or(TypedValue::Null);
                    Some(
                        shrink_port(
                            &port,
                            &rich,
                            &self.registry,
                            &self.shelver,
                            vec![patch.path.clone()],
                            0,
                        )
                        .await?,
                    )
                }
                PatchOp::Remove => None,
            };

            wire_patches.push(Patch {
                op: patch.op,
                path: patch.path,
                value,
                old_value: None,
            });
        }

        if wire_patches.is_empty() {
            return Ok(());
        }

        let (rev, base_rev) = {
            let mut snapshot = self.shared.snapshot.lock().await;
            apply_patches(&mut snapshot.data, &wire_patches)?;
            let base_rev = snapshot.rev;
            snapshot.rev += 1;
            (snapshot.rev, base_rev)
        };

        let envelope = Envelope {
            state_name: self.shared.name.clone(),
            rev,
            base_rev,
            ts: chrono::Utc::now(),
            patches: wire_patches,
        };

        if self.envelope_tx.send(envelope).await.is_err() {
            tracing::warn!(state = %self.shared.name, "envelope sink closed");
        }
        Ok(())
    }
}

/// Keep the last operation per exact path, preserving first-arrival
/// ordering between paths. Nested paths stay independent.
fn squash(batch: Vec<DocumentPatch>) -> Vec<DocumentPatch> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, DocumentPatch> = HashMap::new();
    for patch in batch {
        if !latest.contains_key(&patch.path) {
            order.push(patch.path.clone());
        }
        latest.insert(patch.path.clone(), patch);
    }
    order
        .into_iter()
        .filter_map(|path| latest.remove(&path))
        .collect()
}

/// Shrink the document's full value tree into a JSON snapshot.
async fn shrink_full(
    document: &StateDocument,
    registry: &StructureRegistry,
    shelver: &Shelver,
) -> Result<Value> {
    let root = document.root();
    let entries = root.as_dict().cloned().unwrap_or_default();
    let mut snapshot = serde_json::Map::new();
    for port in &document.schema().ports {
        let value = entries.get(&port.key).cloned().unwrap_or(TypedValue::Null);
        let shrunk = shrink_port(
            port,
            &value,
            registry,
            shelver,
            vec![port.key.clone()],
            0,
        )
        .await?;
        snapshot.insert(port.key.clone(), shrunk);
    }
    Ok(Value::Object(snapshot))
}
