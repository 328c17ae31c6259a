//! Model registration: typed records that cross the wire field-by-field.
//!
//! A model port expands by recursing into its children and then handing
//! the expanded field map to the registered constructor; shrinking pulls
//! each field back out through the registered accessors.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{BoxError, Result, SchemaError};
use crate::identifier::Identifier;
use crate::value::{AnyObject, TypedValue};

/// Builds a model instance from its expanded fields.
pub type ModelConstructor = Arc<
    dyn Fn(BTreeMap<String, TypedValue>) -> std::result::Result<AnyObject, BoxError> + Send + Sync,
>;

/// Extracts one field from a model instance.
pub type ModelAccessor =
    Arc<dyn Fn(&AnyObject) -> std::result::Result<TypedValue, BoxError> + Send + Sync>;

/// The registered contract of a model type.
#[derive(Clone)]
pub struct FulfilledModel {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub identifier: Identifier,
    pub construct: ModelConstructor,
    pub accessors: HashMap<String, ModelAccessor>,
}

impl std::fmt::Debug for FulfilledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfilledModel")
            .field("type_id", &self.type_id)
            .field("type_name", &self.type_name)
            .field("identifier", &self.identifier)
            .field("accessors", &self.accessors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FulfilledModel {
    pub fn accessor(&self, key: &str) -> Result<&ModelAccessor> {
        self.accessors.get(key).ok_or_else(|| {
            SchemaError::Registry(format!(
                "model {} has no field {}",
                self.identifier, key
            ))
        })
    }
}

/// Fluent registration for a concrete model type.
pub struct ModelRegistration<T> {
    identifier: Identifier,
    accessors: HashMap<String, ModelAccessor>,
    construct: Option<ModelConstructor>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ModelRegistration<T> {
    pub fn new(identifier: Identifier) -> Self {
        ModelRegistration {
            identifier,
            accessors: HashMap::new(),
            construct: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Register a field accessor.
    pub fn field(
        mut self,
        key: impl Into<String>,
        accessor: impl Fn(&T) -> TypedValue + Send + Sync + 'static,
    ) -> Self {
        let key = key.into();
        self.accessors.insert(
            key,
            Arc::new(move |object: &AnyObject| {
                let typed = object.downcast_ref::<T>().ok_or_else(|| {
                    BoxError::from(format!("expected a {}", std::any::type_name::<T>()))
                })?;
                Ok(accessor(typed))
            }),
        );
        self
    }

    /// Register the constructor applied to the expanded field map.
    pub fn constructor(
        mut self,
        construct: impl Fn(BTreeMap<String, TypedValue>) -> std::result::Result<T, BoxError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.construct = Some(Arc::new(move |fields| {
            construct(fields).map(|model| Arc::new(model) as AnyObject)
        }));
        self
    }

    pub fn build(self) -> Result<FulfilledModel> {
        let construct = self.construct.ok_or_else(|| {
            SchemaError::Definition(format!(
                "model {} was registered without a constructor",
                self.identifier
            ))
        })?;
        if self.accessors.is_empty() {
            return Err(SchemaError::Definition(format!(
                "model {} was registered without fields",
                self.identifier
            )));
        }
        Ok(FulfilledModel {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            identifier: self.identifier,
            construct,
            accessors: self.accessors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: i64,
        y: i64,
    }

    fn position_model() -> FulfilledModel {
        ModelRegistration::<Position>::new(Identifier::new_unchecked("test.position"))
            .field("x", |p| TypedValue::Int(p.x))
            .field("y", |p| TypedValue::Int(p.y))
            .constructor(|fields| {
                let x = fields
                    .get("x")
                    .and_then(TypedValue::as_int)
                    .ok_or("missing x")?;
                let y = fields
                    .get("y")
                    .and_then(TypedValue::as_int)
                    .ok_or("missing y")?;
                Ok(Position { x, y })
            })
            .build()
            .unwrap()
    }

    #[test]
    fn constructor_and_accessors_round_trip() {
        let model = position_model();
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), TypedValue::Int(4));
        fields.insert("y".to_string(), TypedValue::Int(-2));

        let object = (model.construct)(fields).unwrap();
        let position = object.downcast_ref::<Position>().unwrap();
        assert_eq!(position, &Position { x: 4, y: -2 });

        let x = model.accessor("x").unwrap()(&object).unwrap();
        assert_eq!(x, TypedValue::Int(4));
        assert!(model.accessor("z").is_err());
    }

    #[test]
    fn registration_without_constructor_is_rejected() {
        let err = ModelRegistration::<Position>::new(Identifier::new_unchecked("test.position"))
            .field("x", |p| TypedValue::Int(p.x))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(_)));
    }
}
