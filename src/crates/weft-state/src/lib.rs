//! # weft-state — observable state and JSON-Patch replication
//!
//! Registered states are mutable documents whose changes replicate to
//! the fabric in near-real time. The pipeline:
//!
//! ```text
//! user code ──set/append/remove──▶ StateDocument ──DocumentPatch──▶ StateWorker
//!                                                                      │ debounce, squash,
//!                                                                      │ shrink, apply
//!                                                                      ▼
//!                                                  Envelope {rev, base_rev, patches}
//! ```
//!
//! Guarantees:
//! - `rev` is strictly increasing per state; `base_rev` of envelope *n*
//!   equals `rev` of envelope *n − 1*.
//! - Applying envelopes in order reproduces the producer's snapshot
//!   bit for bit.
//! - Within one debounce window at most one patch per distinct path
//!   survives (the last one); nested paths are left independent.
//! - Mutations outside the state's required lock-set fail with a
//!   [`StateError::LockViolation`].

pub mod document;
pub mod error;
pub mod patch;
pub mod registry;
pub mod schema;
pub mod worker;

pub use document::{LockWitness, NoLocks, StateDocument, PATCH_QUEUE_CAPACITY};
pub use error::{Result, StateError};
pub use patch::{
    apply_patches, escape_token, join_path, split_path, unescape_token, DocumentPatch, Envelope,
    Patch, PatchOp,
};
pub use registry::{RegisteredState, StateRegistry};
pub use schema::StateSchema;
pub use worker::{
    RevisedState, StateWorker, StateWorkerHandle, DEFAULT_PUBLISH_INTERVAL,
};
