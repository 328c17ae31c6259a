//! Port trees: the schema nodes describing one input or output value.
//!
//! A port's `kind` decides how the serializer treats the value; container
//! kinds carry child ports. Structural invariants (LIST and DICT have
//! exactly one child, UNION at least one) are enforced by the
//! constructors.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::identifier::Identifier;
use crate::widgets::{AssignWidget, ReturnWidget};

/// The kind of value a port describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortKind {
    Int,
    Float,
    String,
    Bool,
    Date,
    List,
    Dict,
    Union,
    Structure,
    MemoryStructure,
    Model,
    Enum,
}

/// A validator attached to a port. `function` is a JS-style arrow
/// expression `(self[, dep…]) => …`; `dependencies` must list the
/// parameters after `self`, each naming a sibling port key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Validator {
    pub fn new(function: impl Into<String>) -> Self {
        Validator {
            function: function.into(),
            dependencies: Vec::new(),
            label: None,
            error_message: None,
        }
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// A UI effect bound to a port (hide, disable, …) gated on a condition
/// over sibling values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// One node of a definition or state schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub key: String,
    pub kind: PortKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Port>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_widget: Option<AssignWidget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_widget: Option<ReturnWidget>,
}

impl Port {
    fn scalar(key: impl Into<String>, kind: PortKind) -> Self {
        Port {
            key: key.into(),
            kind,
            nullable: false,
            identifier: None,
            children: None,
            default: None,
            validators: Vec::new(),
            effects: Vec::new(),
            label: None,
            description: None,
            assign_widget: None,
            return_widget: None,
        }
    }

    pub fn int(key: impl Into<String>) -> Self {
        Port::scalar(key, PortKind::Int)
    }

    pub fn float(key: impl Into<String>) -> Self {
        Port::scalar(key, PortKind::Float)
    }

    pub fn string(key: impl Into<String>) -> Self {
        Port::scalar(key, PortKind::String)
    }

    pub fn bool(key: impl Into<String>) -> Self {
        Port::scalar(key, PortKind::Bool)
    }

    pub fn date(key: impl Into<String>) -> Self {
        Port::scalar(key, PortKind::Date)
    }

    /// A list port with exactly one child describing the element type.
    pub fn list(key: impl Into<String>, child: Port) -> Self {
        let mut port = Port::scalar(key, PortKind::List);
        port.children = Some(vec![child]);
        port
    }

    /// A dict port with exactly one child describing the value type.
    pub fn dict(key: impl Into<String>, child: Port) -> Self {
        let mut port = Port::scalar(key, PortKind::Dict);
        port.children = Some(vec![child]);
        port
    }

    /// A union port. Child order is semantic: shrink picks the first
    /// child whose predicate matches.
    pub fn union(key: impl Into<String>, children: Vec<Port>) -> Result<Self> {
        if children.is_empty() {
            return Err(SchemaError::Definition(
                "a union port needs at least one child".to_string(),
            ));
        }
        let mut port = Port::scalar(key, PortKind::Union);
        port.children = Some(children);
        Ok(port)
    }

    /// A model port over named children.
    pub fn model(
        key: impl Into<String>,
        identifier: Identifier,
        children: Vec<Port>,
    ) -> Result<Self> {
        if children.is_empty() {
            return Err(SchemaError::Definition(
                "a model port needs at least one child".to_string(),
            ));
        }
        let mut port = Port::scalar(key, PortKind::Model);
        port.identifier = Some(identifier);
        port.children = Some(children);
        Ok(port)
    }

    pub fn structure(key: impl Into<String>, identifier: Identifier) -> Self {
        let mut port = Port::scalar(key, PortKind::Structure);
        port.identifier = Some(identifier);
        port
    }

    pub fn memory_structure(key: impl Into<String>, identifier: Identifier) -> Self {
        let mut port = Port::scalar(key, PortKind::MemoryStructure);
        port.identifier = Some(identifier);
        port
    }

    pub fn enumeration(key: impl Into<String>, identifier: Identifier) -> Self {
        let mut port = Port::scalar(key, PortKind::Enum);
        port.identifier = Some(identifier);
        port
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_assign_widget(mut self, widget: AssignWidget) -> Self {
        self.assign_widget = Some(widget);
        self
    }

    pub fn with_return_widget(mut self, widget: ReturnWidget) -> Self {
        self.return_widget = Some(widget);
        self
    }

    /// The single child of a LIST or DICT port.
    pub fn sole_child(&self) -> Result<&Port> {
        match self.children.as_deref() {
            Some([child]) => Ok(child),
            Some(children) => Err(SchemaError::Definition(format!(
                "port {} has {} children (expected 1)",
                self.key,
                children.len()
            ))),
            None => Err(SchemaError::Definition(format!(
                "port {} has no children",
                self.key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_rejects_empty_children() {
        assert!(Port::union("u", vec![]).is_err());
    }

    #[test]
    fn list_carries_exactly_one_child() {
        let port = Port::list("xs", Port::int("item"));
        assert_eq!(port.sole_child().unwrap().key, "item");
    }

    #[test]
    fn optional_fields_are_omitted_from_wire_schema() {
        let port = Port::string("name");
        let json = serde_json::to_value(&port).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("identifier"));
        assert!(!object.contains_key("children"));
        assert!(!object.contains_key("validators"));
        assert_eq!(json["kind"], "STRING");
    }

    #[test]
    fn kind_round_trips_through_screaming_snake_case() {
        let json = serde_json::to_string(&PortKind::MemoryStructure).unwrap();
        assert_eq!(json, "\"MEMORY_STRUCTURE\"");
        let kind: PortKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, PortKind::MemoryStructure);
    }
}
