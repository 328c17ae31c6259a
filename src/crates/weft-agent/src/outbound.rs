//! The single outbound queue.
//!
//! All messages leave the agent through one FIFO queue, which is what
//! preserves per-assignment event order on the wire. The queue is
//! bounded in bytes: over the high-water mark producers block (actor
//! events are never dropped) and state workers observe the congestion
//! flag to widen their debounce windows.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::errors::{AgentError, Result};
use crate::messages::{AssignmentEvent, FromAgentMessage};
use crate::replay::ReplayBuffer;

/// Default high-water mark: 8 MB of encoded messages.
pub const DEFAULT_HIGH_WATER_BYTES: usize = 8 * 1024 * 1024;

struct Inner {
    tx: mpsc::UnboundedSender<(FromAgentMessage, usize)>,
    bytes: AtomicUsize,
    high_water: usize,
    congested: Arc<AtomicBool>,
    drained: Notify,
}

/// Producer half. Cheap to clone.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Inner>,
}

/// Consumer half, owned by the session loop.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<(FromAgentMessage, usize)>,
    inner: Arc<Inner>,
}

pub fn outbound_queue(high_water: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let inner = Arc::new(Inner {
        tx,
        bytes: AtomicUsize::new(0),
        high_water,
        congested: Arc::new(AtomicBool::new(false)),
        drained: Notify::new(),
    });
    (
        OutboundQueue {
            inner: inner.clone(),
        },
        OutboundReceiver { rx, inner },
    )
}

impl OutboundQueue {
    /// Enqueue a message, blocking while the queue is over its
    /// high-water mark.
    pub async fn send(&self, message: FromAgentMessage) -> Result<()> {
        let size = serde_json::to_vec(&message)?.len();
        loop {
            if self.inner.bytes.load(Ordering::Acquire) <= self.inner.high_water {
                break;
            }
            self.inner.congested.store(true, Ordering::Release);
            let drained = self.inner.drained.notified();
            if self.inner.bytes.load(Ordering::Acquire) <= self.inner.high_water {
                break;
            }
            drained.await;
        }

        let total = self.inner.bytes.fetch_add(size, Ordering::AcqRel) + size;
        if total > self.inner.high_water {
            self.inner.congested.store(true, Ordering::Release);
        }
        self.inner
            .tx
            .send((message, size))
            .map_err(|_| AgentError::ConnectionClosed)
    }

    /// Enqueue without waiting on the high-water gate. Reserved for
    /// small control replies (pongs, catch-ups, replays) that inbound
    /// dispatch must never block on.
    pub fn send_now(&self, message: FromAgentMessage) -> Result<()> {
        let size = serde_json::to_vec(&message)?.len();
        let total = self.inner.bytes.fetch_add(size, Ordering::AcqRel) + size;
        if total > self.inner.high_water {
            self.inner.congested.store(true, Ordering::Release);
        }
        self.inner
            .tx
            .send((message, size))
            .map_err(|_| AgentError::ConnectionClosed)
    }

    /// The congestion flag state workers watch.
    pub fn pressure(&self) -> Arc<AtomicBool> {
        self.inner.congested.clone()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.inner.bytes.load(Ordering::Acquire)
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<FromAgentMessage> {
        let (message, size) = self.rx.recv().await?;
        let remaining = self
            .inner
            .bytes
            .fetch_sub(size, Ordering::AcqRel)
            .saturating_sub(size);
        if remaining <= self.inner.high_water {
            self.inner.congested.store(false, Ordering::Release);
            self.inner.drained.notify_waiters();
        }
        Some(message)
    }

    pub fn try_recv(&mut self) -> Option<FromAgentMessage> {
        let (message, size) = self.rx.try_recv().ok()?;
        let remaining = self
            .inner
            .bytes
            .fetch_sub(size, Ordering::AcqRel)
            .saturating_sub(size);
        if remaining <= self.inner.high_water {
            self.inner.congested.store(false, Ordering::Release);
            self.inner.drained.notify_waiters();
        }
        Some(message)
    }
}

/// Emits assignment events into the outbound queue and mirrors terminal
/// events into the replay buffer for reconnect catch-up.
#[derive(Clone)]
pub struct EventSink {
    queue: OutboundQueue,
    replay: Arc<ReplayBuffer>,
}

impl EventSink {
    pub fn new(queue: OutboundQueue, replay: Arc<ReplayBuffer>) -> Self {
        EventSink { queue, replay }
    }

    pub async fn emit(&self, event: AssignmentEvent) {
        if event.kind.is_terminal() {
            self.replay.record(event.clone());
        }
        if let Err(e) = self.queue.send(FromAgentMessage::Event(event)).await {
            tracing::warn!(error = %e, "event dropped: outbound queue closed");
        }
    }

    /// Emit without waiting on the high-water gate; for events produced
    /// by inbound dispatch itself.
    pub fn emit_now(&self, event: AssignmentEvent) {
        if event.kind.is_terminal() {
            self.replay.record(event.clone());
        }
        if let Err(e) = self.queue.send_now(FromAgentMessage::Event(event)) {
            tracing::warn!(error = %e, "event dropped: outbound queue closed");
        }
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::EventKind;

    fn event(id: &str) -> FromAgentMessage {
        FromAgentMessage::Event(AssignmentEvent::new(id, EventKind::Progress))
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (queue, mut rx) = outbound_queue(DEFAULT_HIGH_WATER_BYTES);
        for i in 0..10 {
            queue.send(event(&format!("a-{i}"))).await.unwrap();
        }
        for i in 0..10 {
            match rx.recv().await.unwrap() {
                FromAgentMessage::Event(e) => assert_eq!(e.assignment, format!("a-{i}")),
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn over_high_water_blocks_producer_until_drained() {
        // A high-water mark small enough that one message crosses it.
        let (queue, mut rx) = outbound_queue(16);
        queue.send(event("a-0")).await.unwrap();
        assert!(queue.pressure().load(Ordering::Acquire));

        let queue2 = queue.clone();
        let producer = tokio::spawn(async move { queue2.send(event("a-1")).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!producer.is_finished(), "producer must block while congested");

        rx.recv().await.unwrap();
        producer.await.unwrap().unwrap();
        rx.recv().await.unwrap();
        assert!(!queue.pressure().load(Ordering::Acquire));
    }
}
