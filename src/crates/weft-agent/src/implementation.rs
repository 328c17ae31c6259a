//! A registered implementation: schema, injection plan and executable.

use std::sync::Arc;

use weft_schema::{Definition, InjectionPlan};

use crate::actors::Callable;

#[derive(Clone)]
pub struct Implementation {
    /// The stable name this implementation is registered under.
    pub interface: String,
    pub definition: Arc<Definition>,
    pub plan: Arc<InjectionPlan>,
    pub callable: Callable,
    /// Interfaces this implementation needs the server to resolve.
    pub dependencies: Vec<String>,
    /// Brought up and down by PROVIDE/UNPROVIDE instead of living for
    /// the whole session.
    pub dynamic: bool,
}

impl Implementation {
    pub fn new(
        interface: impl Into<String>,
        definition: Definition,
        plan: InjectionPlan,
        callable: Callable,
    ) -> Self {
        Implementation {
            interface: interface.into(),
            definition: Arc::new(definition),
            plan: Arc::new(plan),
            callable,
            dependencies: Vec::new(),
            dynamic: false,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }
}
