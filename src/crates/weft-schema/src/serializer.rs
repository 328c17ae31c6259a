//! The shrink/expand engine.
//!
//! Two recursive async transforms driven by a [`Port`] and the
//! [`StructureRegistry`]: `expand_port` turns wire JSON into a
//! [`TypedValue`], `shrink_port` goes the other way. Sibling elements of
//! LIST, DICT and MODEL ports are processed concurrently; every error is
//! wrapped once with the accumulated path and the recursion depth.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;

use crate::definition::Definition;
use crate::error::{Result, SchemaError};
use crate::port::{Port, PortKind};
use crate::registry::StructureRegistry;
use crate::shelver::Shelver;
use crate::value::TypedValue;

fn child_path(path: &[String], segment: impl Into<String>) -> Vec<String> {
    let mut next = path.to_vec();
    next.push(segment.into());
    next
}

/// Expand a wire value through a port into its in-memory form.
///
/// `value` is `None` when the key was absent entirely; absence falls
/// back to the port default, then to null for nullable ports, then
/// fails.
pub fn expand_port<'a>(
    port: &'a Port,
    value: Option<&'a Value>,
    registry: &'a StructureRegistry,
    shelver: &'a Shelver,
    path: Vec<String>,
    depth: usize,
) -> BoxFuture<'a, Result<TypedValue>> {
    async move {
        let value = match value {
            None | Some(Value::Null) => {
                if let Some(default) = &port.default {
                    return expand_port(port, Some(default), registry, shelver, path, depth)
                        .await;
                }
                if port.nullable {
                    return Ok(TypedValue::Null);
                }
                return Err(SchemaError::expanding(
                    &path,
                    depth,
                    format!("port {} is required but no value was provided", port.key),
                ));
            }
            Some(value) => value,
        };

        match port.kind {
            PortKind::List => {
                let child = port
                    .sole_child()
                    .map_err(|e| SchemaError::expanding(&path, depth, e.to_string()))?;
                let items = value.as_array().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "expected a JSON array for a list port")
                })?;
                let expanded = try_join_all(items.iter().enumerate().map(|(index, item)| {
                    expand_port(
                        child,
                        Some(item),
                        registry,
                        shelver,
                        child_path(&path, index.to_string()),
                        depth + 1,
                    )
                }))
                .await?;
                Ok(TypedValue::List(expanded))
            }

            PortKind::Dict => {
                let child = port
                    .sole_child()
                    .map_err(|e| SchemaError::expanding(&path, depth, e.to_string()))?;
                let entries = value.as_object().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "expected a JSON object for a dict port")
                })?;
                let expanded = try_join_all(entries.iter().map(|(key, item)| {
                    let key = key.clone();
                    let inner_path = child_path(&path, key.clone());
                    async move {
                        let expanded =
                            expand_port(child, Some(item), registry, shelver, inner_path, depth + 1)
                                .await?;
                        Ok::<_, SchemaError>((key, expanded))
                    }
                }))
                .await?;
                Ok(TypedValue::Dict(expanded.into_iter().collect()))
            }

            PortKind::Union => {
                let children = port.children.as_deref().unwrap_or_default();
                let object = value.as_object().ok_or_else(|| {
                    SchemaError::expanding(
                        &path,
                        depth,
                        "union values are objects of the form {use, value}",
                    )
                })?;
                let index = match object.get("use") {
                    Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
                    Some(Value::String(s)) => s.parse::<usize>().ok(),
                    _ => None,
                }
                .ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "union value is missing a numeric `use`")
                })?;
                let child = children.get(index).ok_or_else(|| {
                    SchemaError::expanding(
                        &path,
                        depth,
                        format!(
                            "union index {} is out of range ({} children)",
                            index,
                            children.len()
                        ),
                    )
                })?;
                expand_port(
                    child,
                    object.get("value"),
                    registry,
                    shelver,
                    child_path(&path, index.to_string()),
                    depth + 1,
                )
                .await
            }

            PortKind::Model => {
                let identifier = port.identifier.as_ref().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "model port has no identifier")
                })?;
                let children = port.children.as_deref().unwrap_or_default();
                let object = value.as_object().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "expected a JSON object for a model port")
                })?;

                let expanded = try_join_all(children.iter().map(|child| {
                    expand_port(
                        child,
                        object.get(&child.key),
                        registry,
                        shelver,
                        child_path(&path, child.key.clone()),
                        depth + 1,
                    )
                }))
                .await?;

                let fields: BTreeMap<String, TypedValue> = children
                    .iter()
                    .map(|child| child.key.clone())
                    .zip(expanded)
                    .collect();

                let model = registry.get_model(identifier)?;
                let object = (model.construct)(fields).map_err(|e| {
                    SchemaError::expanding(
                        &path,
                        depth,
                        format!("could not construct model {}: {}", identifier, e),
                    )
                })?;
                Ok(TypedValue::Model {
                    identifier: identifier.clone(),
                    object,
                })
            }

            PortKind::Int => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .map(TypedValue::Int)
                    .ok_or_else(|| {
                        SchemaError::expanding(&path, depth, "number does not fit an integer")
                    }),
                Value::String(s) => s.parse::<i64>().map(TypedValue::Int).map_err(|_| {
                    SchemaError::expanding(&path, depth, format!("{:?} is not an integer", s))
                }),
                other => Err(SchemaError::expanding(
                    &path,
                    depth,
                    format!("cannot expand {} to INT", json_kind(other)),
                )),
            },

            PortKind::Float => match value {
                Value::Number(n) => n.as_f64().map(TypedValue::Float).ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "number does not fit a float")
                }),
                Value::String(s) => s.parse::<f64>().map(TypedValue::Float).map_err(|_| {
                    SchemaError::expanding(&path, depth, format!("{:?} is not a float", s))
                }),
                other => Err(SchemaError::expanding(
                    &path,
                    depth,
                    format!("cannot expand {} to FLOAT", json_kind(other)),
                )),
            },

            PortKind::Date => {
                let raw = value.as_str().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "dates are ISO-8601 strings")
                })?;
                let normalized = raw.replace('Z', "+00:00");
                DateTime::parse_from_rfc3339(&normalized)
                    .map(|dt| TypedValue::Date(dt.with_timezone(&Utc)))
                    .map_err(|e| {
                        SchemaError::expanding(&path, depth, format!("bad date {:?}: {}", raw, e))
                    })
            }

            PortKind::Bool => match value {
                Value::Bool(b) => Ok(TypedValue::Bool(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(TypedValue::Bool(false)),
                    Some(1) => Ok(TypedValue::Bool(true)),
                    _ => Err(SchemaError::expanding(
                        &path,
                        depth,
                        format!("cannot expand {} to BOOL (only 0 and 1)", n),
                    )),
                },
                Value::String(s) => match s.as_str() {
                    "true" => Ok(TypedValue::Bool(true)),
                    "false" => Ok(TypedValue::Bool(false)),
                    other => Err(SchemaError::expanding(
                        &path,
                        depth,
                        format!("cannot expand {:?} to BOOL", other),
                    )),
                },
                other => Err(SchemaError::expanding(
                    &path,
                    depth,
                    format!("cannot expand {} to BOOL", json_kind(other)),
                )),
            },

            PortKind::String => match value {
                Value::String(s) => Ok(TypedValue::Str(s.clone())),
                Value::Number(n) => Ok(TypedValue::Str(n.to_string())),
                Value::Bool(b) => Ok(TypedValue::Str(b.to_string())),
                other => Err(SchemaError::expanding(
                    &path,
                    depth,
                    format!("cannot expand {} to STRING", json_kind(other)),
                )),
            },

            PortKind::Enum => {
                let identifier = port.identifier.as_ref().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "enum port has no identifier")
                })?;
                let structure = registry.get_fulfilled(identifier)?;
                let members = structure.members.as_deref().ok_or_else(|| {
                    SchemaError::expanding(
                        &path,
                        depth,
                        format!("{} is not registered as an enum", identifier),
                    )
                })?;
                let member = match value {
                    Value::String(name) => members
                        .iter()
                        .find(|m| m.name == *name)
                        .map(|m| m.name.clone())
                        .ok_or_else(|| {
                            SchemaError::expanding(
                                &path,
                                depth,
                                format!("enum {} has no member {:?}", identifier, name),
                            )
                        }),
                    Value::Number(n) => n
                        .as_u64()
                        .and_then(|ordinal| members.get(ordinal as usize))
                        .map(|m| m.name.clone())
                        .ok_or_else(|| {
                            SchemaError::expanding(
                                &path,
                                depth,
                                format!("enum {} has no member at ordinal {}", identifier, n),
                            )
                        }),
                    other => Err(SchemaError::expanding(
                        &path,
                        depth,
                        format!("cannot expand {} to ENUM", json_kind(other)),
                    )),
                }?;
                Ok(TypedValue::EnumMember {
                    identifier: identifier.clone(),
                    member,
                })
            }

            PortKind::MemoryStructure => {
                let identifier = port.identifier.as_ref().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "memory structure port has no identifier")
                })?;
                let key = stringy_id(value).ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "memory structure references are strings")
                })?;
                let object = shelver.get(&key).map_err(|e| {
                    SchemaError::expanding(&path, depth, e.to_string())
                })?;
                Ok(TypedValue::Structure {
                    identifier: identifier.clone(),
                    object,
                })
            }

            PortKind::Structure => {
                let identifier = port.identifier.as_ref().ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "structure port has no identifier")
                })?;
                let id = stringy_id(value).ok_or_else(|| {
                    SchemaError::expanding(&path, depth, "structure references are strings")
                })?;
                let expander = registry.get_expander(identifier)?;
                let object = expander(id.clone()).await.map_err(|e| {
                    SchemaError::expanding(
                        &path,
                        depth,
                        format!("error expanding {:?} with structure {}: {}", id, identifier, e),
                    )
                })?;
                Ok(TypedValue::Structure {
                    identifier: identifier.clone(),
                    object,
                })
            }
        }
    }
    .boxed()
}

/// Shrink an in-memory value through a port into its wire form.
pub fn shrink_port<'a>(
    port: &'a Port,
    value: &'a TypedValue,
    registry: &'a StructureRegistry,
    shelver: &'a Shelver,
    path: Vec<String>,
    depth: usize,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        if value.is_null() {
            if port.nullable {
                return Ok(Value::Null);
            }
            return Err(SchemaError::shrinking(
                &path,
                depth,
                format!("port {} is not nullable but the value is null", port.key),
            ));
        }

        match port.kind {
            PortKind::Union => {
                let children = port.children.as_deref().unwrap_or_default();
                for (index, child) in children.iter().enumerate() {
                    if matches_port(child, value, registry) {
                        let inner = shrink_port(
                            child,
                            value,
                            registry,
                            shelver,
                            child_path(&path, index.to_string()),
                            depth + 1,
                        )
                        .await?;
                        return Ok(serde_json::json!({ "use": index, "value": inner }));
                    }
                }
                Err(SchemaError::shrinking(
                    &path,
                    depth,
                    format!(
                        "no union child matched the value (children: {:?})",
                        children.iter().map(|c| &c.key).collect::<Vec<_>>()
                    ),
                ))
            }

            PortKind::List => {
                let child = port
                    .sole_child()
                    .map_err(|e| SchemaError::shrinking(&path, depth, e.to_string()))?;
                let items = value.as_list().ok_or_else(|| {
                    SchemaError::shrinking(
                        &path,
                        depth,
                        format!("expected a list, got {:?}", value),
                    )
                })?;
                let shrunk = try_join_all(items.iter().enumerate().map(|(index, item)| {
                    shrink_port(
                        child,
                        item,
                        registry,
                        shelver,
                        child_path(&path, index.to_string()),
                        depth + 1,
                    )
                }))
                .await?;
                Ok(Value::Array(shrunk))
            }

            PortKind::Dict => {
                let child = port
                    .sole_child()
                    .map_err(|e| SchemaError::shrinking(&path, depth, e.to_string()))?;
                let entries = value.as_dict().ok_or_else(|| {
                    SchemaError::shrinking(
                        &path,
                        depth,
                        format!("expected a dict, got {:?}", value),
                    )
                })?;
                let shrunk = try_join_all(entries.iter().map(|(key, item)| {
                    let key = key.clone();
                    let inner_path = child_path(&path, key.clone());
                    async move {
                        let shrunk =
                            shrink_port(child, item, registry, shelver, inner_path, depth + 1)
                                .await?;
                        Ok::<_, SchemaError>((key, shrunk))
                    }
                }))
                .await?;
                Ok(Value::Object(shrunk.into_iter().collect()))
            }

            PortKind::Model => {
                let identifier = port.identifier.as_ref().ok_or_else(|| {
                    SchemaError::shrinking(&path, depth, "model port has no identifier")
                })?;
                let object = match value {
                    TypedValue::Model {
                        identifier: actual,
                        object,
                    } if actual == identifier => object,
                    other => {
                        return Err(SchemaError::shrinking(
                            &path,
                            depth,
                            format!("expected model {}, got {:?}", identifier, other),
                        ))
                    }
                };
                let model = registry.get_model(identifier)?;
                let model = &model;
                let children = port.children.as_deref().unwrap_or_default();
                let shrunk = try_join_all(children.iter().map(|child| {
                    let inner_path = child_path(&path, child.key.clone());
                    async move {
                        let accessor = model.accessor(&child.key)?;
                        let field = accessor(object).map_err(|e| {
                            SchemaError::shrinking(
                                &inner_path,
                                depth + 1,
                                format!("could not read field: {}", e),
                            )
                        })?;
                        let shrunk =
                            shrink_port(child, &field, registry, shelver, inner_path, depth + 1)
                                .await?;
                        Ok::<_, SchemaError>((child.key.clone(), shrunk))
                    }
                }))
                .await?;
                Ok(Value::Object(shrunk.into_iter().collect()))
            }

            PortKind::Int => match value {
                TypedValue::Int(i) => Ok(Value::from(*i)),
                other => Err(SchemaError::shrinking(
                    &path,
                    depth,
                    format!("expected an int, got {:?}", other),
                )),
            },

            PortKind::Float => match value {
                TypedValue::Float(f) => Ok(serde_json::json!(f)),
                TypedValue::Int(i) => Ok(serde_json::json!(*i as f64)),
                other => Err(SchemaError::shrinking(
                    &path,
                    depth,
                    format!("expected a float, got {:?}", other),
                )),
            },

            PortKind::Date => match value {
                TypedValue::Date(d) => Ok(Value::String(d.to_rfc3339())),
                other => Err(SchemaError::shrinking(
                    &path,
                    depth,
                    format!("expected a date, got {:?}", other),
                )),
            },

            PortKind::Bool => match value {
                TypedValue::Bool(b) => Ok(Value::Bool(*b)),
                TypedValue::Int(0) => Ok(Value::Bool(false)),
                TypedValue::Int(1) => Ok(Value::Bool(true)),
                TypedValue::Str(s) if s == "true" => Ok(Value::Bool(true)),
                TypedValue::Str(s) if s == "false" => Ok(Value::Bool(false)),
                other => Err(SchemaError::shrinking(
                    &path,
                    depth,
                    format!("expected a bool, got {:?}", other),
                )),
            },

            PortKind::String => match value {
                TypedValue::Str(s) => Ok(Value::String(s.clone())),
                other => Err(SchemaError::shrinking(
                    &path,
                    depth,
                    format!("expected a string, got {:?}", other),
                )),
            },

            PortKind::Enum => {
                let identifier = port.identifier.as_ref().ok_or_else(|| {
                    SchemaError::shrinking(&path, depth, "enum port has no identifier")
                })?;
                let structure = registry.get_fulfilled(identifier)?;
                let members = structure.members.as_deref().unwrap_or_default();
                let name = match value {
                    TypedValue::EnumMember { member, .. } => member.clone(),
                    TypedValue::Str(s) => s.clone(),
                    other => {
                        return Err(SchemaError::shrinking(
                            &path,
                            depth,
                            format!("expected an enum member, got {:?}", other),
                        ))
                    }
                };
                if !members.iter().any(|m| m.name == name) {
                    return Err(SchemaError::shrinking(
                        &path,
                        depth,
                        format!("enum {} has no member {:?}", identifier, name),
                    ));
                }
                Ok(Value::String(name))
            }

            PortKind::MemoryStructure => match value {
                TypedValue::Structure { object, .. } | TypedValue::Model { object, .. } => {
                    Ok(Value::String(shelver.put(object.clone())))
                }
                other => Err(SchemaError::shrinking(
                    &path,
                    depth,
                    format!("expected a structure, got {:?}", other),
                )),
            },

            PortKind::Structure => {
                let identifier = port.identifier.as_ref().ok_or_else(|| {
                    SchemaError::shrinking(&path, depth, "structure port has no identifier")
                })?;
                let object = match value {
                    TypedValue::Structure { object, .. } => object.clone(),
                    other => {
                        return Err(SchemaError::shrinking(
                            &path,
                            depth,
                            format!("expected a structure, got {:?}", other),
                        ))
                    }
                };
                let shrinker = registry.get_shrinker(identifier)?;
                let id = shrinker(object).await.map_err(|e| {
                    SchemaError::shrinking(
                        &path,
                        depth,
                        format!("error shrinking with structure {}: {}", identifier, e),
                    )
                })?;
                Ok(Value::String(id))
            }
        }
    }
    .boxed()
}

/// Does `value` satisfy `port`? Used for ordered union dispatch on the
/// shrink side; purely synchronous and shallow for opaque objects.
pub fn matches_port(port: &Port, value: &TypedValue, registry: &StructureRegistry) -> bool {
    if value.is_null() {
        return port.nullable;
    }
    match port.kind {
        PortKind::Int => matches!(value, TypedValue::Int(_)),
        PortKind::Float => matches!(value, TypedValue::Float(_) | TypedValue::Int(_)),
        PortKind::String => matches!(value, TypedValue::Str(_)),
        PortKind::Bool => matches!(value, TypedValue::Bool(_)),
        PortKind::Date => matches!(value, TypedValue::Date(_)),
        PortKind::List => match (value.as_list(), port.sole_child()) {
            (Some(items), Ok(child)) => {
                items.iter().all(|item| matches_port(child, item, registry))
            }
            _ => false,
        },
        PortKind::Dict => match (value.as_dict(), port.sole_child()) {
            (Some(entries), Ok(child)) => entries
                .values()
                .all(|item| matches_port(child, item, registry)),
            _ => false,
        },
        PortKind::Union => port
            .children
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|child| matches_port(child, value, registry)),
        PortKind::Model => match (value, &port.identifier) {
            (TypedValue::Model { identifier, .. }, Some(expected)) => identifier == expected,
            _ => false,
        },
        PortKind::Enum => match (value, &port.identifier) {
            (TypedValue::EnumMember { identifier, .. }, Some(expected)) => identifier == expected,
            _ => false,
        },
        PortKind::Structure | PortKind::MemoryStructure => match (value, &port.identifier) {
            (TypedValue::Structure { identifier, object }, Some(expected)) => {
                identifier == expected
                    || registry
                        .get_predicate(expected)
                        .map(|predicate| predicate(object))
                        .unwrap_or(false)
            }
            _ => false,
        },
    }
}

/// Expand all arguments of a definition. Keys absent from `args` expand
/// as missing (default / null / error per port).
pub async fn expand_inputs(
    definition: &Definition,
    args: &HashMap<String, Value>,
    registry: &StructureRegistry,
    shelver: &Shelver,
) -> Result<HashMap<String, TypedValue>> {
    let expanded = try_join_all(definition.args.iter().map(|port| {
        expand_port(
            port,
            args.get(&port.key),
            registry,
            shelver,
            vec![port.key.clone()],
            1,
        )
    }))
    .await?;

    Ok(definition
        .args
        .iter()
        .map(|port| port.key.clone())
        .zip(expanded)
        .collect())
}

/// Shrink the return values of a definition. The number of values must
/// match the number of return ports exactly.
pub async fn shrink_outputs(
    definition: &Definition,
    returns: &[TypedValue],
    registry: &StructureRegistry,
    shelver: &Shelver,
) -> Result<BTreeMap<String, Value>> {
    if returns.len() != definition.returns.len() {
        return Err(SchemaError::shrinking(
            &[],
            0,
            format!(
                "return arity mismatch: expected {}, got {}",
                definition.returns.len(),
                returns.len()
            ),
        ));
    }

    let shrunk = try_join_all(definition.returns.iter().zip(returns).map(|(port, value)| {
        shrink_port(
            port,
            value,
            registry,
            shelver,
            vec![port.key.clone()],
            1,
        )
    }))
    .await?;

    Ok(definition
        .returns
        .iter()
        .map(|port| port.key.clone())
        .zip(shrunk)
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn stringy_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::registry::{global_expander, global_shrinker, Expander, Shrinker, StructureSource};
    use serde_json::json;
    use std::sync::Arc;

    struct Sample {
        id: String,
    }

    impl StructureSource for Sample {
        fn identifier() -> Identifier {
            Identifier::new_unchecked("test.sample")
        }

        fn expander() -> Option<Expander> {
            Some(global_expander(|id: String| async move {
                Ok(Sample { id })
            }))
        }

        fn shrinker() -> Option<Shrinker> {
            Some(global_shrinker(|sample: Arc<Sample>| async move {
                Ok(sample.id.clone())
            }))
        }
    }

    fn harness() -> (StructureRegistry, Shelver) {
        (StructureRegistry::new(), Shelver::new())
    }

    #[tokio::test]
    async fn string_port_round_trips() {
        let (registry, shelver) = harness();
        let port = Port::string("x");
        let value = TypedValue::Str("hello".to_string());

        let wire = shrink_port(&port, &value, &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(wire, json!("hello"));

        let back = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn nullable_int_defaults_to_null_when_missing() {
        let (registry, shelver) = harness();
        let port = Port::int("x").nullable();

        let missing = expand_port(&port, None, &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(missing, TypedValue::Null);

        let present = expand_port(&port, Some(&json!(7)), &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(present, TypedValue::Int(7));
    }

    #[tokio::test]
    async fn missing_required_value_is_an_expanding_error() {
        let (registry, shelver) = harness();
        let port = Port::int("x");
        let err = expand_port(&port, None, &registry, &shelver, vec!["x".to_string()], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Expanding { .. }));
        assert!(err.to_string().contains("/x"));
    }

    #[tokio::test]
    async fn default_fills_missing_value() {
        let (registry, shelver) = harness();
        let port = Port::int("x").with_default(json!(41));
        let value = expand_port(&port, None, &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(value, TypedValue::Int(41));
    }

    #[tokio::test]
    async fn union_shrink_picks_first_matching_child_in_order() {
        let (registry, shelver) = harness();
        let port = Port::union("u", vec![Port::string("s"), Port::int("i")]).unwrap();

        let wire = shrink_port(
            &port,
            &TypedValue::Int(5),
            &registry,
            &shelver,
            vec![],
            0,
        )
        .await
        .unwrap();
        assert_eq!(wire, json!({"use": 1, "value": 5}));

        let back = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(back, TypedValue::Int(5));
    }

    #[tokio::test]
    async fn union_without_matching_child_fails_to_shrink() {
        let (registry, shelver) = harness();
        let port = Port::union("u", vec![Port::string("s"), Port::int("i")]).unwrap();
        let err = shrink_port(
            &port,
            &TypedValue::Bool(true),
            &registry,
            &shelver,
            vec![],
            0,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SchemaError::Shrinking { .. }));
    }

    #[tokio::test]
    async fn list_of_structures_shrinks_to_ids_and_expands_back() {
        let (registry, shelver) = harness();
        registry.register::<Sample>().unwrap();
        let port = Port::list(
            "xs",
            Port::structure("item", Identifier::new_unchecked("test.sample")),
        );

        let value = TypedValue::List(vec![
            TypedValue::structure(Identifier::new_unchecked("test.sample"), Sample {
                id: "a".to_string(),
            }),
            TypedValue::structure(Identifier::new_unchecked("test.sample"), Sample {
                id: "b".to_string(),
            }),
        ]);

        let wire = shrink_port(&port, &value, &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(wire, json!(["a", "b"]));

        let back = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        let items = back.as_list().unwrap();
        assert_eq!(items[0].downcast::<Sample>().unwrap().id, "a");
        assert_eq!(items[1].downcast::<Sample>().unwrap().id, "b");
    }

    #[tokio::test]
    async fn memory_structure_rides_the_shelver() {
        let (registry, shelver) = harness();
        struct Opaque {
            payload: u64,
        }
        let identifier = Identifier::new_unchecked("test.opaque");
        let port = Port::memory_structure("o", identifier.clone());
        let value = TypedValue::structure(identifier, Opaque { payload: 99 });

        let wire = shrink_port(&port, &value, &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        let key = wire.as_str().unwrap();
        assert!(shelver.get(key).is_ok());

        let back = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        assert_eq!(back.downcast::<Opaque>().unwrap().payload, 99);
    }

    #[tokio::test]
    async fn date_expansion_normalizes_zulu_suffix() {
        let (registry, shelver) = harness();
        let port = Port::date("d");
        let value = expand_port(
            &port,
            Some(&json!("2024-05-01T12:30:00Z")),
            &registry,
            &shelver,
            vec![],
            0,
        )
        .await
        .unwrap();
        let date = value.as_date().unwrap();
        assert_eq!(date.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[tokio::test]
    async fn dict_recurses_per_entry() {
        let (registry, shelver) = harness();
        let port = Port::dict("m", Port::int("value"));
        let wire = json!({"a": 1, "b": "2"});
        let value = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
            .await
            .unwrap();
        let entries = value.as_dict().unwrap();
        assert_eq!(entries["a"], TypedValue::Int(1));
        assert_eq!(entries["b"], TypedValue::Int(2));
    }

    #[tokio::test]
    async fn nested_error_carries_the_full_path() {
        let (registry, shelver) = harness();
        let port = Port::list("xs", Port::int("item"));
        let err = expand_port(
            &port,
            Some(&json!([1, "nope"])),
            &registry,
            &shelver,
            vec!["xs".to_string()],
            1,
        )
        .await
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/xs/1"), "unexpected message: {message}");
    }

    #[tokio::test]
    async fn bool_coercions_accept_the_documented_forms() {
        let (registry, shelver) = harness();
        let port = Port::bool("b");
        for (wire, expected) in [
            (json!(true), true),
            (json!(0), false),
            (json!("true"), true),
        ] {
            let value = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
                .await
                .unwrap();
            assert_eq!(value, TypedValue::Bool(expected));
        }
        assert!(expand_port(&port, Some(&json!(2)), &registry, &shelver, vec![], 0)
            .await
            .is_err());
    }
}
