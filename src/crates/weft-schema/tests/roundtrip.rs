//! Round-trip properties of the serializer: for any value matching a
//! port, expanding the shrunk form yields the original value.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use weft_schema::{
    expand_inputs, expand_port, global_expander, global_shrinker, shrink_outputs, shrink_port,
    DefinitionBuilder, EnumMemberDecl, Expander, Identifier, ModelRegistration, Port, PortKind,
    Shelver, Shrinker, StructureRegistry, StructureSource, TypedValue,
};

#[derive(Debug, PartialEq)]
struct Probe {
    id: String,
}

impl StructureSource for Probe {
    fn identifier() -> Identifier {
        Identifier::new_unchecked("fixtures.probe")
    }

    fn expander() -> Option<Expander> {
        Some(global_expander(|id: String| async move { Ok(Probe { id }) }))
    }

    fn shrinker() -> Option<Shrinker> {
        Some(global_shrinker(|probe: Arc<Probe>| async move {
            Ok(probe.id.clone())
        }))
    }
}

struct Level;

impl StructureSource for Level {
    fn identifier() -> Identifier {
        Identifier::new_unchecked("fixtures.level")
    }

    fn enum_members() -> Option<Vec<EnumMemberDecl>> {
        Some(vec![
            EnumMemberDecl::new("LOW"),
            EnumMemberDecl::new("MEDIUM"),
            EnumMemberDecl::new("HIGH"),
        ])
    }
}

#[derive(Debug, PartialEq)]
struct Span {
    start: i64,
    end: i64,
}

fn fixture_registry() -> StructureRegistry {
    let registry = StructureRegistry::new();
    registry.register::<Probe>().unwrap();
    registry.register::<Level>().unwrap();
    registry
        .register_model(
            ModelRegistration::<Span>::new(Identifier::new_unchecked("fixtures.span"))
                .field("start", |span| TypedValue::Int(span.start))
                .field("end", |span| TypedValue::Int(span.end))
                .constructor(|fields| {
                    Ok(Span {
                        start: fields
                            .get("start")
                            .and_then(TypedValue::as_int)
                            .ok_or("missing start")?,
                        end: fields
                            .get("end")
                            .and_then(TypedValue::as_int)
                            .ok_or("missing end")?,
                    })
                })
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

fn span_port(key: &str) -> Port {
    Port::model(
        key,
        Identifier::new_unchecked("fixtures.span"),
        vec![Port::int("start"), Port::int("end")],
    )
    .unwrap()
}

#[tokio::test]
async fn full_definition_round_trip() {
    let registry = fixture_registry();
    let shelver = Shelver::new();

    let (definition, _) = DefinitionBuilder::new("scan")
        .arg(Port::structure("probe", Identifier::new_unchecked("fixtures.probe")))
        .arg(Port::enumeration("level", Identifier::new_unchecked("fixtures.level")))
        .arg(Port::list("offsets", Port::int("offset")))
        .arg(span_port("window"))
        .returns(Port::string("return0"))
        .build()
        .unwrap();

    let args = [
        ("probe".to_string(), json!("probe-1")),
        ("level".to_string(), json!("HIGH")),
        ("offsets".to_string(), json!([1, 2, 3])),
        ("window".to_string(), json!({"start": 0, "end": 10})),
    ]
    .into_iter()
    .collect();

    let expanded = expand_inputs(&definition, &args, &registry, &shelver)
        .await
        .unwrap();

    assert_eq!(expanded["probe"].downcast::<Probe>().unwrap().id, "probe-1");
    assert_eq!(
        expanded["level"],
        TypedValue::EnumMember {
            identifier: Identifier::new_unchecked("fixtures.level"),
            member: "HIGH".to_string(),
        }
    );
    let span = expanded["window"].downcast::<Span>().unwrap();
    assert_eq!(*span, Span { start: 0, end: 10 });

    let outputs = shrink_outputs(
        &definition,
        &[TypedValue::Str("done".to_string())],
        &registry,
        &shelver,
    )
    .await
    .unwrap();
    assert_eq!(outputs["return0"], json!("done"));
}

#[tokio::test]
async fn model_round_trip_through_wire_form() {
    let registry = fixture_registry();
    let shelver = Shelver::new();
    let port = span_port("window");

    let value = TypedValue::model(
        Identifier::new_unchecked("fixtures.span"),
        Span { start: 3, end: 9 },
    );
    let wire = shrink_port(&port, &value, &registry, &shelver, vec![], 0)
        .await
        .unwrap();
    assert_eq!(wire, json!({"start": 3, "end": 9}));

    let back = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
        .await
        .unwrap();
    assert_eq!(*back.downcast::<Span>().unwrap(), Span { start: 3, end: 9 });
}

#[tokio::test]
async fn union_of_structure_and_list_dispatches_by_predicate() {
    let registry = fixture_registry();
    let shelver = Shelver::new();
    let port = Port::union(
        "input",
        vec![
            Port::structure("probe", Identifier::new_unchecked("fixtures.probe")),
            Port::list("many", Port::structure("probe", Identifier::new_unchecked("fixtures.probe"))),
        ],
    )
    .unwrap();

    let single = TypedValue::structure(
        Identifier::new_unchecked("fixtures.probe"),
        Probe { id: "p".to_string() },
    );
    let wire = shrink_port(&port, &single, &registry, &shelver, vec![], 0)
        .await
        .unwrap();
    assert_eq!(wire["use"], 0);

    let many = TypedValue::List(vec![single.clone()]);
    let wire = shrink_port(&port, &many, &registry, &shelver, vec![], 0)
        .await
        .unwrap();
    assert_eq!(wire["use"], 1);
}

fn scalar_port_and_value() -> impl Strategy<Value = (Port, TypedValue)> {
    prop_oneof![
        any::<i64>().prop_map(|i| (Port::int("v"), TypedValue::Int(i))),
        any::<bool>().prop_map(|b| (Port::bool("v"), TypedValue::Bool(b))),
        "[a-zA-Z0-9 ]{0,24}".prop_map(|s| (Port::string("v"), TypedValue::Str(s))),
        (-1_000_000_000i64..1_000_000_000i64).prop_map(|millis| {
            let date = chrono::DateTime::from_timestamp_millis(millis).unwrap();
            (Port::date("v"), TypedValue::Date(date))
        }),
    ]
}

proptest! {
    #[test]
    fn scalar_round_trip((port, value) in scalar_port_and_value()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let registry = StructureRegistry::new();
            let shelver = Shelver::new();
            let wire = shrink_port(&port, &value, &registry, &shelver, vec![], 0)
                .await
                .unwrap();
            let back = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
                .await
                .unwrap();
            assert_eq!(back, value);
        });
    }

    #[test]
    fn list_round_trip(values in proptest::collection::vec(any::<i64>(), 0..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let registry = StructureRegistry::new();
            let shelver = Shelver::new();
            let port = Port::list("xs", Port::int("x"));
            let value = TypedValue::List(values.iter().map(|&i| TypedValue::Int(i)).collect());
            let wire = shrink_port(&port, &value, &registry, &shelver, vec![], 0)
                .await
                .unwrap();
            let back = expand_port(&port, Some(&wire), &registry, &shelver, vec![], 0)
                .await
                .unwrap();
            assert_eq!(back, value);
        });
    }
}

#[test]
fn memory_structure_port_kind_is_local() {
    struct Buffer;
    impl StructureSource for Buffer {}

    let registry = StructureRegistry::new();
    let port = registry
        .port_for::<Buffer>("buffer", Default::default())
        .unwrap();
    assert_eq!(port.kind, PortKind::MemoryStructure);
}
