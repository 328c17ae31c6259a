//! The structure registry: identifier ↔ type mapping plus the per-type
//! serialization contract.
//!
//! A [`FulfilledStructure`] is what a type fulfils once registered:
//! identifier, scope, optional shrinker/expander, a predicate used for
//! union dispatch, and widget/default metadata. Registration happens
//! either explicitly or through the ordered [hook](crate::hooks) chain
//! when an unknown type is first used to build a port.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Result, SchemaError};
use crate::hooks::{default_hooks, RegistryHook, StructureSeed};
use crate::identifier::Identifier;
use crate::model::FulfilledModel;
use crate::port::{Port, PortKind, Validator};
use crate::value::{AnyObject, TypedValue};
use crate::widgets::{AssignWidget, ReturnWidget};

/// Whether instances of a structure can cross the wire by id (GLOBAL) or
/// only live inside this process (LOCAL, shelver-backed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortScope {
    Global,
    Local,
}

/// Turns an expanded object back into its wire id.
pub type Shrinker =
    Arc<dyn Fn(AnyObject) -> BoxFuture<'static, std::result::Result<String, BoxError>> + Send + Sync>;

/// Resolves a wire id into an expanded object.
pub type Expander =
    Arc<dyn Fn(String) -> BoxFuture<'static, std::result::Result<AnyObject, BoxError>> + Send + Sync>;

/// Instance check used for union dispatch.
pub type Predicate = Arc<dyn Fn(&AnyObject) -> bool + Send + Sync>;

/// Converts a rich default value into its wire JSON form.
pub type DefaultConverter =
    Arc<dyn Fn(&TypedValue) -> std::result::Result<serde_json::Value, BoxError> + Send + Sync>;

/// A declared member of a registered enum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumMemberDecl {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EnumMemberDecl {
    pub fn new(name: impl Into<String>) -> Self {
        EnumMemberDecl {
            name: name.into(),
            label: None,
            description: None,
        }
    }
}

/// The concrete contract a type fulfils in a registry.
#[derive(Clone)]
pub struct FulfilledStructure {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub identifier: Identifier,
    pub scope: PortScope,
    pub shrinker: Option<Shrinker>,
    pub expander: Option<Expander>,
    pub predicate: Predicate,
    pub convert_default: Option<DefaultConverter>,
    pub default_widget: Option<AssignWidget>,
    pub default_return_widget: Option<ReturnWidget>,
    /// Present for enums; the serializer resolves members directly.
    pub members: Option<Vec<EnumMemberDecl>>,
}

impl FulfilledStructure {
    /// GLOBAL scope requires both codecs, except for enums whose members
    /// carry the codec implicitly.
    pub fn validate(&self) -> Result<()> {
        if self.scope == PortScope::Global
            && self.members.is_none()
            && (self.shrinker.is_none() || self.expander.is_none())
        {
            return Err(SchemaError::Definition(format!(
                "{} is GLOBAL but does not provide both a shrinker and an expander",
                self.identifier
            )));
        }
        Ok(())
    }

    /// The port kind this structure produces.
    pub fn port_kind(&self) -> PortKind {
        if self.members.is_some() {
            PortKind::Enum
        } else if self.scope == PortScope::Local {
            PortKind::MemoryStructure
        } else {
            PortKind::Structure
        }
    }
}

impl std::fmt::Debug for FulfilledStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfilledStructure")
            .field("identifier", &self.identifier)
            .field("type_name", &self.type_name)
            .field("scope", &self.scope)
            .field("enum", &self.members.is_some())
            .finish()
    }
}

/// Capabilities a type exposes for registration. Rust has no runtime
/// reflection, so the registry learns everything it can know about a
/// type from this trait; the hook chain then decides how the type is
/// fulfilled. All methods default to "nothing", which lands a type in
/// the local (shelved) catch-all.
pub trait StructureSource: Send + Sync + Sized + 'static {
    fn identifier() -> Identifier {
        Identifier::from_type_name(std::any::type_name::<Self>())
    }

    fn expander() -> Option<Expander> {
        None
    }

    fn shrinker() -> Option<Shrinker> {
        None
    }

    fn enum_members() -> Option<Vec<EnumMemberDecl>> {
        None
    }

    fn convert_default() -> Option<DefaultConverter> {
        None
    }

    fn default_widget() -> Option<AssignWidget> {
        None
    }

    fn default_return_widget() -> Option<ReturnWidget> {
        None
    }

    fn predicate() -> Predicate {
        Arc::new(|object: &AnyObject| object.downcast_ref::<Self>().is_some())
    }

    fn seed() -> StructureSeed {
        StructureSeed {
            type_id: TypeId::of::<Self>(),
            type_name: std::any::type_name::<Self>(),
            identifier: Self::identifier(),
            expander: Self::expander(),
            shrinker: Self::shrinker(),
            members: Self::enum_members(),
            predicate: Self::predicate(),
            convert_default: Self::convert_default(),
            default_widget: Self::default_widget(),
            default_return_widget: Self::default_return_widget(),
        }
    }
}

/// Type-erase an async `id -> T` resolver into an [`Expander`].
pub fn global_expander<T, F, Fut>(expand: F) -> Expander
where
    T: Send + Sync + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
{
    Arc::new(move |id: String| {
        let fut = expand(id);
        Box::pin(async move { fut.await.map(|value| Arc::new(value) as AnyObject) })
    })
}

/// Type-erase an async `&T -> id` resolver into a [`Shrinker`].
pub fn global_shrinker<T, F, Fut>(shrink: F) -> Shrinker
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<String, BoxError>> + Send + 'static,
{
    let shrink = Arc::new(shrink);
    Arc::new(move |object: AnyObject| {
        let shrink = shrink.clone();
        Box::pin(async move {
            let typed = object.downcast::<T>().map_err(|_| {
                Box::<dyn std::error::Error + Send + Sync>::from(format!(
                    "expected a {} instance",
                    std::any::type_name::<T>()
                ))
            })?;
            shrink(typed).await
        })
    })
}

/// Overridable port attributes used by [`StructureRegistry::port_for`].
#[derive(Default)]
pub struct PortOpts {
    pub nullable: bool,
    pub label: Option<String>,
    pub description: Option<String>,
    pub default: Option<TypedValue>,
    pub validators: Vec<Validator>,
    pub effects: Vec<crate::port::Effect>,
    pub assign_widget: Option<AssignWidget>,
    pub return_widget: Option<ReturnWidget>,
}

struct Inner {
    by_identifier: HashMap<Identifier, FulfilledStructure>,
    by_type: HashMap<TypeId, Identifier>,
    models_by_identifier: HashMap<Identifier, FulfilledModel>,
    models_by_type: HashMap<TypeId, Identifier>,
}

/// A scoped, injectable registry. Reads vastly outnumber writes
/// (registration happens at startup), so a coarse read/write lock over
/// the maps is enough.
pub struct StructureRegistry {
    allow_overwrites: bool,
    allow_auto_register: bool,
    hooks: Vec<Box<dyn RegistryHook>>,
    inner: RwLock<Inner>,
}

impl Default for StructureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureRegistry {
    pub fn new() -> Self {
        StructureRegistry {
            allow_overwrites: true,
            allow_auto_register: true,
            hooks: default_hooks(),
            inner: RwLock::new(Inner {
                by_identifier: HashMap::new(),
                by_type: HashMap::new(),
                models_by_identifier: HashMap::new(),
                models_by_type: HashMap::new(),
            }),
        }
    }

    pub fn with_allow_overwrites(mut self, allow: bool) -> Self {
        self.allow_overwrites = allow;
        self
    }

    pub fn with_allow_auto_register(mut self, allow: bool) -> Self {
        self.allow_auto_register = allow;
        self
    }

    /// Add a hook in front of the default chain.
    pub fn with_hook(mut self, hook: Box<dyn RegistryHook>) -> Self {
        self.hooks.insert(0, hook);
        self
    }

    /// Idempotent insertion of a fulfilled structure. Rejects overwrites
    /// of an existing identifier unless overwrites are allowed.
    pub fn fulfill_registration(&self, structure: FulfilledStructure) -> Result<()> {
        structure.validate()?;
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_identifier.get(&structure.identifier) {
            if existing.type_id == structure.type_id {
                return Ok(());
            }
            if !self.allow_overwrites {
                return Err(SchemaError::Overwrite {
                    identifier: structure.identifier.to_string(),
                });
            }
        }
        inner
            .by_type
            .insert(structure.type_id, structure.identifier.clone());
        inner
            .by_identifier
            .insert(structure.identifier.clone(), structure);
        Ok(())
    }

    /// Register a type through the hook chain, regardless of whether
    /// auto-registration is enabled for lookups.
    pub fn register<T: StructureSource>(&self) -> Result<FulfilledStructure> {
        self.apply_hooks(T::seed())
    }

    fn apply_hooks(&self, seed: StructureSeed) -> Result<FulfilledStructure> {
        let type_name = seed.type_name;
        let Some(hook) = self.hooks.iter().find(|hook| hook.is_applicable(&seed)) else {
            return Err(SchemaError::Definition(format!(
                "no hook was able to register {}",
                type_name
            )));
        };
        let structure = hook.apply(seed).map_err(|e| {
            SchemaError::Definition(format!(
                "hook {} failed to register {}: {}",
                hook.name(),
                type_name,
                e
            ))
        })?;
        self.fulfill_registration(structure.clone())?;
        Ok(structure)
    }

    /// Resolve a type, auto-registering through the hooks when allowed.
    pub fn resolve<T: StructureSource>(&self) -> Result<FulfilledStructure> {
        {
            let inner = self.inner.read();
            if let Some(identifier) = inner.by_type.get(&TypeId::of::<T>()) {
                if let Some(structure) = inner.by_identifier.get(identifier) {
                    return Ok(structure.clone());
                }
            }
        }
        if self.allow_auto_register {
            self.register::<T>()
        } else {
            Err(SchemaError::Registry(format!(
                "{} is not registered and auto-registration is disabled",
                std::any::type_name::<T>()
            )))
        }
    }

    pub fn get_fulfilled(&self, identifier: &Identifier) -> Result<FulfilledStructure> {
        self.inner
            .read()
            .by_identifier
            .get(identifier)
            .cloned()
            .ok_or_else(|| SchemaError::Registry(format!("{} is not registered", identifier)))
    }

    pub fn get_shrinker(&self, identifier: &Identifier) -> Result<Shrinker> {
        self.get_fulfilled(identifier)?.shrinker.ok_or_else(|| {
            SchemaError::Registry(format!("no shrinker registered for {}", identifier))
        })
    }

    pub fn get_expander(&self, identifier: &Identifier) -> Result<Expander> {
        self.get_fulfilled(identifier)?.expander.ok_or_else(|| {
            SchemaError::Registry(format!("no expander registered for {}", identifier))
        })
    }

    pub fn get_predicate(&self, identifier: &Identifier) -> Result<Predicate> {
        Ok(self.get_fulfilled(identifier)?.predicate)
    }

    /// Resolve `T` and emit the matching STRUCTURE, MEMORY_STRUCTURE or
    /// ENUM port, merging the structure's defaults with the overrides.
    pub fn port_for<T: StructureSource>(&self, key: &str, opts: PortOpts) -> Result<Port> {
        let structure = self.resolve::<T>()?;
        let mut port = match structure.port_kind() {
            PortKind::Enum => Port::enumeration(key, structure.identifier.clone()),
            PortKind::MemoryStructure => {
                Port::memory_structure(key, structure.identifier.clone())
            }
            _ => Port::structure(key, structure.identifier.clone()),
        };

        port.nullable = opts.nullable;
        port.label = opts.label;
        port.description = opts.description;
        port.validators = opts.validators;
        port.effects = opts.effects;
        port.assign_widget = opts.assign_widget.or(structure.default_widget.clone());
        port.return_widget = opts
            .return_widget
            .or(structure.default_return_widget.clone());

        if let Some(default) = opts.default {
            let converter = structure.convert_default.as_ref().ok_or_else(|| {
                SchemaError::Definition(format!(
                    "{} has no default converter; it cannot carry a default",
                    structure.identifier
                ))
            })?;
            port.default = Some(converter(&default).map_err(|e| {
                SchemaError::Definition(format!(
                    "could not convert default for {}: {}",
                    structure.identifier, e
                ))
            })?);
        }

        Ok(port)
    }

    pub fn register_model(&self, model: FulfilledModel) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.models_by_identifier.contains_key(&model.identifier) && !self.allow_overwrites {
            return Err(SchemaError::Overwrite {
                identifier: model.identifier.to_string(),
            });
        }
        inner
            .models_by_type
            .insert(model.type_id, model.identifier.clone());
        inner
            .models_by_identifier
            .insert(model.identifier.clone(), model);
        Ok(())
    }

    pub fn get_model(&self, identifier: &Identifier) -> Result<FulfilledModel> {
        self.inner
            .read()
            .models_by_identifier
            .get(identifier)
            .cloned()
            .ok_or_else(|| SchemaError::Registry(format!("model {} is not registered", identifier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plate {
        id: String,
    }

    impl StructureSource for Plate {
        fn identifier() -> Identifier {
            Identifier::new_unchecked("lab.plate")
        }

        fn expander() -> Option<Expander> {
            Some(global_expander(|id: String| async move {
                Ok(Plate { id })
            }))
        }

        fn shrinker() -> Option<Shrinker> {
            Some(global_shrinker(|plate: Arc<Plate>| async move {
                Ok(plate.id.clone())
            }))
        }
    }

    struct Scratch;

    impl StructureSource for Scratch {}

    #[test]
    fn global_type_registers_as_structure_port() {
        let registry = StructureRegistry::new();
        let port = registry.port_for::<Plate>("plate", PortOpts::default()).unwrap();
        assert_eq!(port.kind, PortKind::Structure);
        assert_eq!(port.identifier.unwrap().as_str(), "lab.plate");
    }

    #[test]
    fn capability_less_type_falls_back_to_memory_structure() {
        let registry = StructureRegistry::new();
        let port = registry
            .port_for::<Scratch>("scratch", PortOpts::default())
            .unwrap();
        assert_eq!(port.kind, PortKind::MemoryStructure);
    }

    #[test]
    fn auto_register_off_turns_misses_into_errors() {
        let registry = StructureRegistry::new().with_allow_auto_register(false);
        let err = registry
            .port_for::<Plate>("plate", PortOpts::default())
            .unwrap_err();
        assert!(matches!(err, SchemaError::Registry(_)));
    }

    #[test]
    fn overwrite_protection_rejects_second_type_on_same_identifier() {
        struct Other;
        impl StructureSource for Other {
            fn identifier() -> Identifier {
                Identifier::new_unchecked("lab.plate")
            }
        }

        let registry = StructureRegistry::new().with_allow_overwrites(false);
        registry.register::<Plate>().unwrap();
        // Re-registering the same type is idempotent.
        registry.register::<Plate>().unwrap();
        let err = registry.register::<Other>().unwrap_err();
        assert!(matches!(err, SchemaError::Overwrite { .. }));
    }

    #[tokio::test]
    async fn shrinker_round_trips_through_registry() {
        let registry = StructureRegistry::new();
        registry.register::<Plate>().unwrap();
        let identifier = Identifier::new_unchecked("lab.plate");
        let shrinker = registry.get_shrinker(&identifier).unwrap();
        let expander = registry.get_expander(&identifier).unwrap();

        let object: AnyObject = Arc::new(Plate {
            id: "p-17".to_string(),
        });
        let id = shrinker(object).await.unwrap();
        assert_eq!(id, "p-17");
        let back = expander(id).await.unwrap();
        assert_eq!(back.downcast::<Plate>().unwrap().id, "p-17");
    }
}
