//! Structural port inference for plain Rust types.
//!
//! Primitives and containers map to ports without touching the
//! registry: `Option` adds nullability, `Vec` becomes LIST, string-keyed
//! maps become DICT. Structures, enums and models go through
//! [`StructureRegistry::port_for`](crate::registry::StructureRegistry::port_for)
//! instead.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::port::Port;

pub trait PortSpec {
    fn port(key: &str) -> Port;
}

macro_rules! scalar_port {
    ($($ty:ty => $ctor:ident),* $(,)?) => {
        $(
            impl PortSpec for $ty {
                fn port(key: &str) -> Port {
                    Port::$ctor(key)
                }
            }
        )*
    };
}

scalar_port! {
    i64 => int,
    i32 => int,
    u32 => int,
    f64 => float,
    f32 => float,
    bool => bool,
    String => string,
}

impl PortSpec for DateTime<Utc> {
    fn port(key: &str) -> Port {
        Port::date(key)
    }
}

impl<T: PortSpec> PortSpec for Option<T> {
    fn port(key: &str) -> Port {
        T::port(key).nullable()
    }
}

impl<T: PortSpec> PortSpec for Vec<T> {
    fn port(key: &str) -> Port {
        Port::list(key, T::port("item"))
    }
}

impl<T: PortSpec> PortSpec for HashMap<String, T> {
    fn port(key: &str) -> Port {
        Port::dict(key, T::port("value"))
    }
}

impl<T: PortSpec> PortSpec for BTreeMap<String, T> {
    fn port(key: &str) -> Port {
        Port::dict(key, T::port("value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortKind;

    #[test]
    fn containers_nest_structurally() {
        let port = <Vec<Option<i64>>>::port("xs");
        assert_eq!(port.kind, PortKind::List);
        let child = port.sole_child().unwrap();
        assert_eq!(child.kind, PortKind::Int);
        assert!(child.nullable);
    }

    #[test]
    fn maps_become_dict_ports() {
        let port = <HashMap<String, f64>>::port("m");
        assert_eq!(port.kind, PortKind::Dict);
        assert_eq!(port.sole_child().unwrap().kind, PortKind::Float);
    }
}
