//! # weft-agent — the fabric client runtime
//!
//! An [`Agent`] hosts implementations and replicated states, negotiates
//! a session over a websocket control channel, executes server-issued
//! assignments concurrently and streams their events back.
//!
//! ```text
//!            ┌────────────── Agent ──────────────┐
//! server ──▶ │ inbound dispatch ─▶ actor runners │
//!            │      │                    │ events│
//!            │      ▼                    ▼       │
//! server ◀── │ outbound FIFO ◀── state workers   │
//!            └───────────────────────────────────┘
//! ```
//!
//! Guarantees:
//! - Per-assignment events reach the wire in program order (one FIFO
//!   outbound queue).
//! - An assignment id is owned by at most one live actor.
//! - Assignments with overlapping lock-sets serialize; disjoint ones
//!   run in parallel.
//! - Transport loss never kills actors; the session reconnects with
//!   capped backoff and replays terminal events.
//!
//! ## Hosting an implementation
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use weft_agent::{Agent, AgentConfig, Callable, Implementation, WsConnector};
//! use weft_schema::{DefinitionBuilder, Port, StructureRegistry, TypedValue};
//!
//! # async fn demo() -> weft_agent::Result<()> {
//! let registry = Arc::new(StructureRegistry::new());
//! let agent = Agent::new(AgentConfig::new("instance-1"), registry);
//!
//! let (definition, plan) = DefinitionBuilder::new("add")
//!     .arg(Port::int("a"))
//!     .arg(Port::int("b"))
//!     .returns(Port::int("return0"))
//!     .build()?;
//!
//! agent.register_implementation(Implementation::new(
//!     "add",
//!     definition,
//!     plan,
//!     Callable::AsyncFunction(Arc::new(|ctx| {
//!         async move {
//!             let a = ctx.arg("a").and_then(TypedValue::as_int).unwrap_or(0);
//!             let b = ctx.arg("b").and_then(TypedValue::as_int).unwrap_or(0);
//!             Ok(vec![TypedValue::Int(a + b)])
//!         }
//!         .boxed()
//!     })),
//! ));
//!
//! agent.run(&WsConnector::new("wss://example.org/agi")).await
//! # }
//! ```

pub mod actors;
pub mod agent;
pub mod contexts;
pub mod errors;
pub mod extension;
pub mod implementation;
pub mod locks;
pub mod messages;
pub mod outbound;
pub mod replay;
pub mod transport;

pub use actors::{
    AssignContext, AssignHandle, AssignInterrupt, Callable, StateAccess, Yielder,
};
pub use agent::{Agent, AgentConfig};
pub use contexts::ContextRegistry;
pub use errors::{AgentError, Result};
pub use extension::AgentExtension;
pub use implementation::Implementation;
pub use locks::{LockManager, LockSetGuard};
pub use messages::{
    Assign, AssignmentEvent, Bindings, EventKind, FromAgentMessage, Init, LogLevel,
    ToAgentMessage,
};
pub use outbound::{EventSink, OutboundQueue, DEFAULT_HIGH_WATER_BYTES};
pub use replay::ReplayBuffer;
pub use transport::{
    channel_transport, ChannelConnector, ChannelServer, Connector, TransportSink,
    TransportStream, WsConnector,
};
