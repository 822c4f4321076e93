//! BufferQL: a schema-driven columnar binary encoder. A schema compiled
//! by [`bufferql_schema::extend_schema`] describes the shape of a
//! [`bufferql_schema::Value`] tree; [`bufferql_writer::create_encoder`]
//! walks a value against that schema through the five-pass writer
//! pipeline (spawn, group, allocate, position, write) and produces the
//! header-plus-fixed-region-plus-Data-Tape buffer described in
//! `SPEC_FULL.md`.
//!
//! This crate re-exports the pieces a caller needs to compile a schema
//! and encode a value, and adds [`schema_doc`], a JSON convenience
//! layer over the schema grammar.

pub mod schema_doc;

pub use bufferql_schema::{extend_schema, CustomPrimitiveDef, PrimitiveSize, Schema, TypeInput, Value};
pub use bufferql_writer::{create_encoder, Encoder};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use bufferql_schema::{extend_schema, CustomPrimitiveDef, PrimitiveSize, TypeInput, Value};
    use bufferql_writer::create_encoder;
    use test_log::test;

    /// The demo catalogue from the original implementation's own schema
    /// test: a tracked-entity feed with a `Ref`-addressable "of interest"
    /// side table, exercising NamedTuple, Tuple, Array, Map, Optional,
    /// OneOf and Ref together end to end.
    fn tracked_entity_schema() -> bufferql_schema::Schema {
        let source_type_enum = CustomPrimitiveDef {
            name: "SourceTypeEnum".to_string(),
            size: PrimitiveSize::Fixed(1),
            check: Arc::new(|v| matches!(v.as_str(), Some("Lidar") | Some("Camera"))),
            encode_fixed: Some(Arc::new(|out, v| {
                out[0] = match v.as_str() {
                    Some("Camera") => 1,
                    _ => 0,
                };
            })),
            encode_variable: None,
        };

        let mut base_primitive_types = HashMap::new();
        base_primitive_types.insert("SourceTypeEnum".to_string(), source_type_enum);

        let mut defs = HashMap::new();
        defs.insert(
            "#".to_string(),
            TypeInput::NamedTuple(vec![
                (
                    "trackedEntities".to_string(),
                    TypeInput::Expr("Array<TrackedEntity>".to_string()),
                ),
                (
                    "trackedEntitiesOfInterest".to_string(),
                    TypeInput::Expr("Map<TrackedEntityRef>".to_string()),
                ),
            ]),
        );
        defs.insert(
            "TrackedEntity".to_string(),
            TypeInput::NamedTuple(vec![
                ("id".to_string(), TypeInput::Expr("Int32".to_string())),
                ("class".to_string(), TypeInput::Expr("Uint8".to_string())),
                ("pose".to_string(), TypeInput::Expr("Pose".to_string())),
                (
                    "velocity".to_string(),
                    TypeInput::Expr("Optional<Vector3>".to_string()),
                ),
                (
                    "source".to_string(),
                    TypeInput::Expr("TrackedEntitySource".to_string()),
                ),
                (
                    "waypoints".to_string(),
                    TypeInput::Expr("Optional<Array<TrackedEntityWayPoint>>".to_string()),
                ),
            ]),
        );
        defs.insert(
            "TrackedEntityWayPoint".to_string(),
            TypeInput::NamedTuple(vec![
                ("timestamp".to_string(), TypeInput::Expr("Int32".to_string())),
                ("pose".to_string(), TypeInput::Expr("Pose".to_string())),
                (
                    "probability".to_string(),
                    TypeInput::Expr("Optional<Float32>".to_string()),
                ),
            ]),
        );
        defs.insert(
            "Pose".to_string(),
            TypeInput::NamedTuple(vec![
                ("position".to_string(), TypeInput::Expr("Vector3".to_string())),
                ("rotation".to_string(), TypeInput::Expr("Vector3".to_string())),
                ("size".to_string(), TypeInput::Expr("Vector3".to_string())),
            ]),
        );
        defs.insert(
            "TrackedEntitySource".to_string(),
            TypeInput::Tuple(vec![
                TypeInput::Expr("SourceTypeEnum".to_string()),
                TypeInput::Expr("OneOf<String,Int32>".to_string()),
                TypeInput::Expr("Optional<String>".to_string()),
            ]),
        );
        defs.insert(
            "TrackedEntityRef".to_string(),
            TypeInput::Expr("Ref<TrackedEntity>".to_string()),
        );

        extend_schema(base_primitive_types, defs, HashMap::new(), HashMap::new())
            .expect("tracked entity schema compiles")
    }

    fn pose(xyz: [f32; 3]) -> Value {
        Value::map(vec![
            ("position".to_string(), Value::floats(xyz.to_vec())),
            ("rotation".to_string(), Value::floats(vec![0.0, 0.0, 0.0])),
            ("size".to_string(), Value::floats(vec![1.0, 1.0, 1.0])),
        ])
    }

    #[test]
    fn encodes_the_tracked_entity_demo_schema() {
        let schema = tracked_entity_schema();

        let entity = Value::map(vec![
            ("id".to_string(), Value::int(42)),
            ("class".to_string(), Value::int(1)),
            ("pose".to_string(), pose([1.0, 2.0, 3.0])),
            ("velocity".to_string(), Value::floats(vec![0.1, 0.2, 0.3])),
            (
                "source".to_string(),
                Value::list(vec![
                    Value::str("Lidar"),
                    Value::str("abc-123"),
                    Value::str("extra-info"),
                ]),
            ),
            ("waypoints".to_string(), Value::Unit),
        ]);

        // The same entity is referenced from both the primary array and
        // the "of interest" map; Value::clone of a Map shares the Rc, so
        // both spots key into the same reference-table identity.
        let root = Value::map(vec![
            (
                "trackedEntities".to_string(),
                Value::list(vec![entity.clone()]),
            ),
            (
                "trackedEntitiesOfInterest".to_string(),
                Value::map(vec![("abc-123".to_string(), entity.clone())]),
            ),
        ]);

        let encoder = create_encoder(&schema);
        let buf = encoder.encode(root, "#").expect("encode succeeds");
        assert!(!buf.is_empty());
    }

    #[test]
    fn rejects_a_one_of_value_no_option_check_accepts() {
        let schema = tracked_entity_schema();

        let entity = Value::map(vec![
            ("id".to_string(), Value::int(1)),
            ("class".to_string(), Value::int(0)),
            ("pose".to_string(), pose([0.0, 0.0, 0.0])),
            ("velocity".to_string(), Value::Unit),
            (
                "source".to_string(),
                Value::list(vec![
                    Value::str("Lidar"),
                    // Neither String nor Int32's check accepts a Float.
                    Value::float(1.5),
                    Value::Unit,
                ]),
            ),
            ("waypoints".to_string(), Value::Unit),
        ]);
        let root = Value::map(vec![
            ("trackedEntities".to_string(), Value::list(vec![entity])),
            ("trackedEntitiesOfInterest".to_string(), Value::map(vec![])),
        ]);

        let encoder = create_encoder(&schema);
        assert!(encoder.encode(root, "#").is_err());
    }
}
