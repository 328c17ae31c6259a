//! Fabric-wide type identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A lowercased `module.name`-style string that names a type across the
/// fabric. Injective within a registry: two different types never share
/// an identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Build an identifier, lowercasing the input.
    pub fn new(raw: impl Into<String>) -> Self {
        Identifier(raw.into().to_lowercase())
    }

    /// Build an identifier from a string already known to be canonical.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Identifier(raw.into())
    }

    /// Derive an identifier from a Rust type path as reported by
    /// `std::any::type_name`, e.g. `my_app::images::Image` becomes
    /// `my_app.images.image`. Generic parameters are stripped.
    pub fn from_type_name(type_name: &str) -> Self {
        let base = type_name.split('<').next().unwrap_or(type_name);
        Identifier(base.replace("::", ".").to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Identifier::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_on_construction() {
        assert_eq!(Identifier::new("Mock.Object").as_str(), "mock.object");
    }

    #[test]
    fn derives_from_type_path() {
        assert_eq!(
            Identifier::from_type_name("my_app::images::Image").as_str(),
            "my_app.images.image"
        );
        assert_eq!(
            Identifier::from_type_name("alloc::vec::Vec<u8>").as_str(),
            "alloc.vec.vec"
        );
    }
}
