//! # weft-schema — port schemas and the shrink/expand serializer
//!
//! This crate holds the data model the fabric speaks: **ports** (the
//! schema nodes describing one value), **definitions** (the schema of an
//! implementation's inputs and outputs), the **structure registry**
//! (identifier ↔ type mapping with per-type codecs) and the recursive
//! async **serializer** that moves values between wire JSON and rich
//! in-memory objects.
//!
//! ## Core flow
//!
//! ```text
//! wire JSON ──expand──▶ TypedValue ──user code──▶ TypedValue ──shrink──▶ wire JSON
//!                 │                                        │
//!                 └──── StructureRegistry (codecs) ────────┘
//!                 └──── Shelver (LOCAL structures) ────────┘
//! ```
//!
//! - GLOBAL structures round-trip by id through their registered
//!   expander/shrinker.
//! - LOCAL structures never cross the wire: shrinking parks them on the
//!   [`Shelver`] and ships an opaque drawer key.
//! - Unknown types auto-register through an ordered hook chain
//!   (enum → global → local) when the registry allows it.
//!
//! ## Example
//!
//! ```rust
//! use weft_schema::{DefinitionBuilder, Port};
//!
//! let (definition, _plan) = DefinitionBuilder::new("add")
//!     .arg(Port::int("a"))
//!     .arg(Port::int("b"))
//!     .returns(Port::int("return0"))
//!     .build()
//!     .unwrap();
//!
//! // The hash is content-addressed and stable across rebuilds.
//! assert_eq!(definition.hash().len(), 64);
//! ```

pub mod definition;
pub mod error;
pub mod hooks;
pub mod identifier;
pub mod infer;
pub mod model;
pub mod port;
pub mod registry;
pub mod serializer;
pub mod shelver;
pub mod value;
pub mod widgets;

pub use definition::{
    Definition, DefinitionBuilder, DefinitionKind, Injection, InjectionKind, InjectionPlan,
    PortGroup,
};
pub use error::{BoxError, Result, SchemaError};
pub use hooks::{default_hooks, EnumHook, GlobalHook, LocalHook, RegistryHook, StructureSeed};
pub use identifier::Identifier;
pub use infer::PortSpec;
pub use model::{FulfilledModel, ModelRegistration};
pub use port::{Effect, Port, PortKind, Validator};
pub use registry::{
    global_expander, global_shrinker, DefaultConverter, EnumMemberDecl, Expander,
    FulfilledStructure, PortOpts, PortScope, Predicate, Shrinker, StructureRegistry,
    StructureSource,
};
pub use serializer::{expand_inputs, expand_port, matches_port, shrink_outputs, shrink_port};
pub use shelver::Shelver;
pub use value::{AnyObject, TypedValue};
