//! Agent extensions: bring implementations up and down on demand.
//!
//! The server's PROVIDE/UNPROVIDE messages address implementations this
//! agent did not register at startup; extensions materialize them.

use async_trait::async_trait;

use crate::errors::Result;
use crate::implementation::Implementation;

#[async_trait]
pub trait AgentExtension: Send + Sync {
    /// Materialize the implementation behind a PROVIDE, or `None` if
    /// this extension does not know it. The returned implementation is
    /// registered as dynamic.
    async fn provide(&self, implementation: &str) -> Result<Option<Implementation>>;

    /// Tear down whatever `provide` set up. Called on UNPROVIDE after
    /// the implementation is unregistered.
    async fn unprovide(&self, implementation: &str) -> Result<()>;
}
