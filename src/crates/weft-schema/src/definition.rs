//! Definitions: the schema of an implementation's inputs and outputs,
//! plus the builder that assembles them.
//!
//! Rust has no signature introspection, so the builder is the explicit
//! registration surface: wire arguments become ports, injected
//! parameters (contexts and states) are recorded in a sidecar
//! [`InjectionPlan`] and never appear on the wire. The definition hash
//! is the SHA-256 of the canonical JSON encoding and is used by the
//! server as a cache key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SchemaError};
use crate::port::{Port, Validator};

/// Function implementations return once; generators yield a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefinitionKind {
    Function,
    Generator,
}

/// A named grouping of argument keys, for UI layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortGroup {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

/// The normalized schema of one implementation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: DefinitionKind,
    pub args: Vec<Port>,
    pub returns: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_groups: Vec<PortGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub is_test_for: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
}

impl Definition {
    /// Content-addressed hash over the canonical JSON encoding. Stable
    /// across rebuilds of the same schema.
    pub fn hash(&self) -> String {
        let canonical =
            serde_json::to_vec(self).expect("definitions always encode to JSON");
        format!("{:x}", Sha256::digest(&canonical))
    }
}

/// How an injected parameter is satisfied at assignment time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InjectionKind {
    Context,
    State,
    ReadOnlyState,
}

/// One injected (non-wire) parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    /// The parameter name inside user code.
    pub param: String,
    /// The registered context or state name.
    pub name: String,
    pub kind: InjectionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locks: Vec<String>,
}

/// The sidecar table mapping injected parameters to contexts and states,
/// and the locks an assignment must hold before it runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionPlan {
    pub injections: Vec<Injection>,
}

impl InjectionPlan {
    /// The sorted, deduplicated set of locks this plan requires.
    /// Read-only state injections contribute nothing.
    pub fn lock_set(&self) -> Vec<String> {
        let mut locks: Vec<String> = self
            .injections
            .iter()
            .filter(|injection| injection.kind != InjectionKind::ReadOnlyState)
            .flat_map(|injection| injection.locks.iter().cloned())
            .collect();
        locks.sort();
        locks.dedup();
        locks
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Injection> {
        self.injections
            .iter()
            .filter(|injection| injection.kind == InjectionKind::Context)
    }

    pub fn states(&self) -> impl Iterator<Item = &Injection> {
        self.injections
            .iter()
            .filter(|injection| injection.kind != InjectionKind::Context)
    }
}

/// Assembles a [`Definition`] and its [`InjectionPlan`].
pub struct DefinitionBuilder {
    name: String,
    description: Option<String>,
    kind: DefinitionKind,
    args: Vec<Port>,
    returns: Vec<Port>,
    interfaces: Vec<String>,
    port_groups: Vec<PortGroup>,
    is_test_for: Vec<String>,
    collections: Vec<String>,
    plan: InjectionPlan,
}

impl DefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        DefinitionBuilder {
            name: name.into(),
            description: None,
            kind: DefinitionKind::Function,
            args: Vec::new(),
            returns: Vec::new(),
            interfaces: Vec::new(),
            port_groups: Vec::new(),
            is_test_for: Vec::new(),
            collections: Vec::new(),
            plan: InjectionPlan::default(),
        }
    }

    /// Mark the implementation as a generator (yields a stream).
    pub fn generator(mut self) -> Self {
        self.kind = DefinitionKind::Generator;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a wire argument port, in declaration order.
    pub fn arg(mut self, port: Port) -> Self {
        self.args.push(port);
        self
    }

    /// Add a return port.
    pub fn returns(mut self, port: Port) -> Self {
        self.returns.push(port);
        self
    }

    /// Add a wire argument inferred from a plain Rust type.
    pub fn arg_of<T: crate::infer::PortSpec>(self, key: &str) -> Self {
        self.arg(T::port(key))
    }

    /// Add a return port inferred from a plain Rust type, keyed
    /// `return0`, `return1`, … in declaration order.
    pub fn returns_of<T: crate::infer::PortSpec>(mut self) -> Self {
        let key = format!("return{}", self.returns.len());
        self.returns.push(T::port(&key));
        self
    }

    /// Record a context parameter: injected, never on the wire.
    pub fn inject_context(
        mut self,
        param: impl Into<String>,
        name: impl Into<String>,
        locks: &[&str],
    ) -> Self {
        self.plan.injections.push(Injection {
            param: param.into(),
            name: name.into(),
            kind: InjectionKind::Context,
            locks: locks.iter().map(|l| l.to_string()).collect(),
        });
        self
    }

    /// Record a writable state parameter with its required locks.
    pub fn inject_state(
        mut self,
        param: impl Into<String>,
        name: impl Into<String>,
        locks: &[&str],
    ) -> Self {
        self.plan.injections.push(Injection {
            param: param.into(),
            name: name.into(),
            kind: InjectionKind::State,
            locks: locks.iter().map(|l| l.to_string()).collect(),
        });
        self
    }

    /// Record a read-only state parameter. Contributes no locks.
    pub fn inject_read_only_state(
        mut self,
        param: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.plan.injections.push(Injection {
            param: param.into(),
            name: name.into(),
            kind: InjectionKind::ReadOnlyState,
            locks: Vec::new(),
        });
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn port_group(mut self, group: PortGroup) -> Self {
        self.port_groups.push(group);
        self
    }

    pub fn is_test_for(mut self, interface: impl Into<String>) -> Self {
        self.is_test_for.push(interface.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collections.push(collection.into());
        self
    }

    pub fn build(self) -> Result<(Definition, InjectionPlan)> {
        let mut seen = std::collections::HashSet::new();
        for port in &self.args {
            if !seen.insert(port.key.clone()) {
                return Err(SchemaError::Definition(format!(
                    "duplicate argument key {}",
                    port.key
                )));
            }
        }

        let sibling_keys: Vec<&str> = self.args.iter().map(|p| p.key.as_str()).collect();
        for port in &self.args {
            for validator in &port.validators {
                check_validator(&port.key, validator, &sibling_keys)?;
            }
        }

        let mut seen_returns = std::collections::HashSet::new();
        for port in &self.returns {
            if !seen_returns.insert(port.key.clone()) {
                return Err(SchemaError::Definition(format!(
                    "duplicate return key {}",
                    port.key
                )));
            }
        }

        for group in &self.port_groups {
            for key in &group.ports {
                if !seen.contains(key) {
                    return Err(SchemaError::Definition(format!(
                        "port group {} references unknown argument {}",
                        group.key, key
                    )));
                }
            }
        }

        let definition = Definition {
            name: self.name,
            description: self.description,
            kind: self.kind,
            args: self.args,
            returns: self.returns,
            interfaces: self.interfaces,
            port_groups: self.port_groups,
            is_test_for: self.is_test_for,
            collections: self.collections,
        };
        Ok((definition, self.plan))
    }
}

/// Enforce the validator contract: the declared dependencies must match
/// the JS-style parameter list minus the leading `self`, and every
/// dependency must name a sibling port key.
fn check_validator(port_key: &str, validator: &Validator, siblings: &[&str]) -> Result<()> {
    let params = parse_arrow_params(&validator.function).ok_or_else(|| {
        SchemaError::Definition(format!(
            "validator on {} is not an arrow function: {}",
            port_key, validator.function
        ))
    })?;

    if params.is_empty() {
        return Err(SchemaError::Definition(format!(
            "validator on {} takes no parameters; the first parameter is the value itself",
            port_key
        )));
    }

    let declared = &validator.dependencies;
    let implied = &params[1..];
    if declared.len() != implied.len()
        || declared.iter().zip(implied).any(|(a, b)| a != b)
    {
        return Err(SchemaError::Definition(format!(
            "validator on {} declares dependencies {:?} but its parameter list implies {:?}",
            port_key, declared, implied
        )));
    }

    for dependency in declared {
        if !siblings.contains(&dependency.as_str()) {
            return Err(SchemaError::Definition(format!(
                "validator on {} depends on {} which is not a sibling port",
                port_key, dependency
            )));
        }
    }

    Ok(())
}

fn parse_arrow_params(function: &str) -> Option<Vec<String>> {
    let pattern = regex::Regex::new(r"^\s*\(([^)]*)\)\s*=>").expect("static regex compiles");
    let captures = pattern.captures(function)?;
    let inner = captures.get(1)?.as_str().trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    Some(
        inner
            .split(',')
            .map(|param| param.trim().to_string())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_arg_definition() -> DefinitionBuilder {
        DefinitionBuilder::new("crop")
            .arg(Port::int("width"))
            .arg(Port::int("height"))
            .returns(Port::int("return0"))
    }

    #[test]
    fn hash_is_stable_across_rebuilds() {
        let (a, _) = two_arg_definition().build().unwrap();
        let (b, _) = two_arg_definition().build().unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
    }

    #[test]
    fn hash_changes_with_the_schema() {
        let (a, _) = two_arg_definition().build().unwrap();
        let (b, _) = DefinitionBuilder::new("crop")
            .arg(Port::int("width").nullable())
            .arg(Port::int("height"))
            .returns(Port::int("return0"))
            .build()
            .unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn validator_with_matching_dependencies_passes() {
        let port = Port::int("width").with_validator(
            Validator::new("(self, height) => self > height").with_dependencies(&["height"]),
        );
        let result = DefinitionBuilder::new("crop")
            .arg(port)
            .arg(Port::int("height"))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn validator_dependency_mismatch_is_fatal() {
        let port = Port::int("width")
            .with_validator(Validator::new("(self, height) => self > height"));
        let err = DefinitionBuilder::new("crop")
            .arg(port)
            .arg(Port::int("height"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(_)));
    }

    #[test]
    fn validator_dependency_on_unknown_sibling_is_fatal() {
        let port = Port::int("width").with_validator(
            Validator::new("(self, depth) => self > depth").with_dependencies(&["depth"]),
        );
        let err = DefinitionBuilder::new("crop")
            .arg(port)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn duplicate_argument_keys_are_rejected() {
        let err = DefinitionBuilder::new("crop")
            .arg(Port::int("width"))
            .arg(Port::string("width"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(_)));
    }

    #[test]
    fn injection_plan_collects_write_locks_only() {
        let (_, plan) = DefinitionBuilder::new("move_stage")
            .inject_context("stage", "stage", &["stage_motor"])
            .inject_state("tracker", "tracker_state", &["tracker", "stage_motor"])
            .inject_read_only_state("camera", "camera_state")
            .build()
            .unwrap();
        assert_eq!(plan.lock_set(), vec!["stage_motor", "tracker"]);
        assert_eq!(plan.contexts().count(), 1);
        assert_eq!(plan.states().count(), 2);
    }

    #[test]
    fn port_groups_must_reference_existing_args() {
        let err = DefinitionBuilder::new("crop")
            .arg(Port::int("width"))
            .port_group(PortGroup {
                key: "geometry".to_string(),
                ports: vec!["height".to_string()],
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(_)));
    }
}
