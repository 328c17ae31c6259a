//! Registry hooks: pluggable auto-registration strategies.
//!
//! When the registry meets a type it has not seen, it offers the type's
//! [`StructureSeed`] to each hook in order; the first applicable hook
//! produces the [`FulfilledStructure`]. The default chain mirrors the
//! capabilities a seed can carry:
//!
//! 1. [`EnumHook`] — the seed declares enum members.
//! 2. [`GlobalHook`] — the seed carries both an expander and a shrinker.
//! 3. [`LocalHook`] — catch-all: LOCAL scope, values ride the shelver.

use std::any::TypeId;
use std::sync::Arc;

use crate::error::Result;
use crate::registry::{
    DefaultConverter, EnumMemberDecl, Expander, FulfilledStructure, PortScope, Predicate, Shrinker,
};
use crate::identifier::Identifier;
use crate::value::TypedValue;
use crate::widgets::{AssignWidget, Choice, ReturnWidget};

/// Everything the registry knows about an unregistered type.
pub struct StructureSeed {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub identifier: Identifier,
    pub expander: Option<Expander>,
    pub shrinker: Option<Shrinker>,
    pub members: Option<Vec<EnumMemberDecl>>,
    pub predicate: Predicate,
    pub convert_default: Option<DefaultConverter>,
    pub default_widget: Option<AssignWidget>,
    pub default_return_widget: Option<ReturnWidget>,
}

/// A registration strategy tried in order against unknown types.
pub trait RegistryHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this hook can fulfil the seed.
    fn is_applicable(&self, seed: &StructureSeed) -> bool;

    /// Produce the fulfilled structure. Only called after
    /// `is_applicable` returned true.
    fn apply(&self, seed: StructureSeed) -> Result<FulfilledStructure>;
}

/// Registers enum types: GLOBAL scope, members carried on the structure,
/// choice widgets derived from the member list.
pub struct EnumHook;

impl RegistryHook for EnumHook {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn is_applicable(&self, seed: &StructureSeed) -> bool {
        seed.members.is_some()
    }

    fn apply(&self, seed: StructureSeed) -> Result<FulfilledStructure> {
        let members = seed.members.unwrap_or_default();
        let choices: Vec<Choice> = members
            .iter()
            .map(|m| Choice {
                label: m.label.clone().unwrap_or_else(|| m.name.clone()),
                value: m.name.clone(),
                description: m.description.clone(),
            })
            .collect();

        let convert_default: DefaultConverter = Arc::new(|value: &TypedValue| match value {
            TypedValue::EnumMember { member, .. } => Ok(serde_json::Value::String(member.clone())),
            TypedValue::Str(s) => Ok(serde_json::Value::String(s.clone())),
            other => Err(format!("{:?} is not an enum member", other).into()),
        });

        Ok(FulfilledStructure {
            type_id: seed.type_id,
            type_name: seed.type_name,
            identifier: seed.identifier,
            scope: PortScope::Global,
            shrinker: None,
            expander: None,
            predicate: seed.predicate,
            convert_default: Some(convert_default),
            default_widget: seed.default_widget.or(Some(AssignWidget::Choice {
                choices: choices.clone(),
            })),
            default_return_widget: seed
                .default_return_widget
                .or(Some(ReturnWidget::Choice { choices })),
            members: Some(members),
        })
    }
}

/// Registers types that expose both codecs: GLOBAL scope, id-addressed.
pub struct GlobalHook;

impl RegistryHook for GlobalHook {
    fn name(&self) -> &'static str {
        "global"
    }

    fn is_applicable(&self, seed: &StructureSeed) -> bool {
        seed.expander.is_some() && seed.shrinker.is_some()
    }

    fn apply(&self, seed: StructureSeed) -> Result<FulfilledStructure> {
        let convert_default: DefaultConverter =
            seed.convert_default.unwrap_or_else(|| {
                Arc::new(|value: &TypedValue| match value {
                    TypedValue::Str(s) => Ok(serde_json::Value::String(s.clone())),
                    other => Err(format!(
                        "defaults for global structures must be ids, got {:?}",
                        other
                    )
                    .into()),
                })
            });

        Ok(FulfilledStructure {
            type_id: seed.type_id,
            type_name: seed.type_name,
            identifier: seed.identifier,
            scope: PortScope::Global,
            shrinker: seed.shrinker,
            expander: seed.expander,
            predicate: seed.predicate,
            convert_default: Some(convert_default),
            default_widget: seed.default_widget,
            default_return_widget: seed.default_return_widget,
            members: None,
        })
    }
}

/// Catch-all: LOCAL scope. Values never cross the wire; the serializer
/// parks them on the shelver and ships the drawer key.
pub struct LocalHook;

impl RegistryHook for LocalHook {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_applicable(&self, _seed: &StructureSeed) -> bool {
        true
    }

    fn apply(&self, seed: StructureSeed) -> Result<FulfilledStructure> {
        Ok(FulfilledStructure {
            type_id: seed.type_id,
            type_name: seed.type_name,
            identifier: seed.identifier,
            scope: PortScope::Local,
            shrinker: None,
            expander: None,
            predicate: seed.predicate,
            convert_default: None,
            default_widget: seed.default_widget,
            default_return_widget: seed.default_return_widget,
            members: None,
        })
    }
}

/// The default chain, in precedence order.
pub fn default_hooks() -> Vec<Box<dyn RegistryHook>> {
    vec![Box::new(EnumHook), Box::new(GlobalHook), Box::new(LocalHook)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StructureSource;

    struct Color;

    impl StructureSource for Color {
        fn identifier() -> Identifier {
            Identifier::new_unchecked("test.color")
        }

        fn enum_members() -> Option<Vec<EnumMemberDecl>> {
            Some(vec![
                EnumMemberDecl::new("RED"),
                EnumMemberDecl::new("GREEN"),
            ])
        }
    }

    #[test]
    fn enum_hook_wins_over_local_catch_all() {
        let seed = Color::seed();
        let hooks = default_hooks();
        let hook = hooks.iter().find(|h| h.is_applicable(&seed)).unwrap();
        assert_eq!(hook.name(), "enum");

        let structure = hook.apply(seed).unwrap();
        assert_eq!(structure.scope, PortScope::Global);
        let members = structure.members.as_ref().unwrap();
        assert_eq!(members.len(), 2);
        match structure.default_widget {
            Some(AssignWidget::Choice { ref choices }) => assert_eq!(choices.len(), 2),
            ref other => panic!("expected a choice widget, got {:?}", other),
        }
    }

    #[test]
    fn enum_default_converter_emits_member_name() {
        let structure = EnumHook.apply(Color::seed()).unwrap();
        let converter = structure.convert_default.unwrap();
        let value = converter(&TypedValue::EnumMember {
            identifier: Identifier::new_unchecked("test.color"),
            member: "RED".to_string(),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!("RED"));
    }
}
