//! The per-assignment back-channel handle.
//!
//! User code receives an [`AssignHandle`] instead of reaching into
//! ambient context: it emits LOG and PROGRESS events, observes pause
//! and cancellation at pausepoints, and exposes the assignment's
//! metadata. Cancellation is reported as a typed value, not an unwind
//! through user frames.

use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::messages::{Assign, AssignmentEvent, EventKind, LogLevel};
use crate::outbound::EventSink;

/// The typed cancellation signal surfaced by pausepoints. User code
/// propagates it with `?`; the runner maps it onto the matching
/// terminal event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignInterrupt {
    Cancelled,
    Interrupted,
}

impl fmt::Display for AssignInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignInterrupt::Cancelled => f.write_str("assignment cancelled"),
            AssignInterrupt::Interrupted => f.write_str("assignment interrupted"),
        }
    }
}

impl std::error::Error for AssignInterrupt {}

#[derive(Clone)]
pub struct AssignHandle {
    assignment_id: String,
    user: Option<String>,
    reference: Option<String>,
    parent: Option<String>,
    sink: EventSink,
    cancel: CancellationToken,
    interrupt: CancellationToken,
    paused: watch::Receiver<bool>,
}

impl AssignHandle {
    pub(crate) fn new(
        assign: &Assign,
        sink: EventSink,
        cancel: CancellationToken,
        interrupt: CancellationToken,
        paused: watch::Receiver<bool>,
    ) -> Self {
        AssignHandle {
            assignment_id: assign.assignment.clone(),
            user: assign.user.clone(),
            reference: assign.reference.clone(),
            parent: assign.parent.clone(),
            sink,
            cancel,
            interrupt,
            paused,
        }
    }

    pub fn assignment(&self) -> &str {
        &self.assignment_id
    }

    /// The user the server attributed this assignment to.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Fire-and-forget log line attached to this assignment.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let mut event = AssignmentEvent::new(&self.assignment_id, EventKind::Log)
            .with_message(message.into());
        event.level = Some(level);
        self.sink.emit(event).await;
    }

    /// Progress in percent, clamped to 0–100.
    pub async fn progress(&self, percentage: u8, message: Option<String>) {
        let mut event = AssignmentEvent::new(&self.assignment_id, EventKind::Progress);
        event.percentage = Some(percentage.min(100));
        event.message = message;
        self.sink.emit(event).await;
    }

    /// Cooperative suspension point. Parks while the assignment is
    /// paused and reports cancellation or interruption as a typed
    /// signal.
    pub async fn pausepoint(&self) -> Result<(), AssignInterrupt> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(AssignInterrupt::Cancelled);
            }
            if self.interrupt.is_cancelled() {
                return Err(AssignInterrupt::Interrupted);
            }
            if !*self.paused.borrow() {
                return Ok(());
            }

            let mut paused = self.paused.clone();
            tokio::select! {
                changed = paused.changed() => {
                    if changed.is_err() {
                        // Pause control is gone (agent shutting down);
                        // treat as resumed and let cancellation decide.
                        return Ok(());
                    }
                }
                _ = self.cancel.cancelled() => return Err(AssignInterrupt::Cancelled),
                _ = self.interrupt.cancelled() => return Err(AssignInterrupt::Interrupted),
            }
        }
    }

    /// Pausepoint for sync actors running on the blocking pool. Polls
    /// the pause flag instead of awaiting it.
    pub fn pausepoint_blocking(&self) -> Result<(), AssignInterrupt> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(AssignInterrupt::Cancelled);
            }
            if self.interrupt.is_cancelled() {
                return Err(AssignInterrupt::Interrupted);
            }
            if !*self.paused.borrow() {
                return Ok(());
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    /// Blocking mirrors of the event helpers for sync actors.
    pub fn log_blocking(&self, level: LogLevel, message: impl Into<String>) {
        futures::executor::block_on(self.log(level, message));
    }

    pub fn progress_blocking(&self, percentage: u8, message: Option<String>) {
        futures::executor::block_on(self.progress(percentage, message));
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn interrupt_token(&self) -> &CancellationToken {
        &self.interrupt
    }
}
