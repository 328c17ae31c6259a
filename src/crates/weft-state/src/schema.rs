//! State schemas and pointer-to-port resolution.

use serde::{Deserialize, Serialize};

use weft_schema::Port;

use crate::patch::split_path;

/// The port tree describing one registered state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    pub name: String,
    pub ports: Vec<Port>,
}

impl StateSchema {
    pub fn new(name: impl Into<String>, ports: Vec<Port>) -> Self {
        StateSchema {
            name: name.into(),
            ports,
        }
    }

    pub fn port(&self, key: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.key == key)
    }

    /// Resolve the port governing a JSON-Pointer path.
    ///
    /// A numeric token (or `-`) steps into the single child of the list
    /// port found so far; a name token searches the current scope. A
    /// path pointing at a list item resolves to the element port, which
    /// carries the structural definition needed to shrink the item.
    pub fn resolve_port_for_path(&self, path: &str) -> Option<&Port> {
        let tokens = split_path(path);
        if tokens.is_empty() {
            return None;
        }

        let mut scope: &[Port] = &self.ports;
        let mut found: Option<&Port> = None;

        for token in &tokens {
            if token == "-" || token.chars().all(|c| c.is_ascii_digit()) {
                // Index into the list found so far: its sole child
                // describes the item type.
                let child = found?.children.as_deref()?.first()?;
                found = Some(child);
                if let Some(children) = child.children.as_deref() {
                    scope = children;
                }
                continue;
            }

            let matched = scope.iter().find(|p| p.key == *token)?;
            found = Some(matched);
            if let Some(children) = matched.children.as_deref() {
                scope = children;
            }
        }

        found
    }
}
