//! `extend_schema`: turns base primitive definitions plus a map of type
//! expressions/record-style definitions into a validated, canonicalized
//! [`Schema`].

use std::collections::HashMap;

use bufferql_base::{err, Result};
use tracing::debug;

use crate::grammar::{parse_expression, RawRecord};
use crate::primitives::{
    CustomPrimitiveDef, PrimitiveKind, BUILTIN_PRIMITIVES, VECTOR_ARRAY_COMPOUNDS,
    VECTOR_PRIMITIVES,
};
use crate::primitives::{unflatten_transform, BuiltinPrimitive};
use crate::types::{CheckFn, Schema, TransformFn, TypeRecord, TypeTag};

/// A type definition's right-hand side: a textual expression, a Tuple
/// given as a list of per-slot expressions, or a NamedTuple given as an
/// ordered map of field name to expression. Mirrors how a JSON value
/// under a label is interpreted: string -> parse_expression, array ->
/// Tuple, object -> NamedTuple.
#[derive(Clone, Debug)]
pub enum TypeInput {
    Expr(String),
    Tuple(Vec<TypeInput>),
    NamedTuple(Vec<(String, TypeInput)>),
}

fn is_list_of_floats(value: &crate::value::Value, multiple_of: usize) -> bool {
    value
        .as_floats()
        .map(|f| f.len() % multiple_of.max(1) == 0)
        .unwrap_or(false)
}

/// Installs the builtin primitive and Vector/Matrix-array compound
/// records into `schema`. Always the first step of `extend_schema`, so
/// user type definitions can reference `Int32`, `Vector3Array`, etc.
/// without redeclaring them.
fn install_builtins(schema: &mut Schema) {
    for builtin in BUILTIN_PRIMITIVES {
        let name = builtin.name();
        let mut record = TypeRecord::new(name.clone(), TypeTag::Primitive, Vec::new());
        let check_builtin = builtin.clone();
        record.check = Some(std::sync::Arc::new(move |value| check_builtin.check(value)) as CheckFn);
        record.primitive = Some(PrimitiveKind::Builtin(builtin));
        schema.insert(name, record);
    }
    for (name, n) in VECTOR_PRIMITIVES {
        let mut record = TypeRecord::new(name, TypeTag::Primitive, Vec::new());
        let vector = BuiltinPrimitive::Vector(n);
        let check_vector = vector.clone();
        record.check = Some(std::sync::Arc::new(move |value| check_vector.check(value)) as CheckFn);
        record.primitive = Some(PrimitiveKind::Builtin(vector));
        schema.insert(name.to_string(), record);
    }
    for (array_name, component_name, n) in VECTOR_ARRAY_COMPOUNDS {
        let mut record =
            TypeRecord::new(array_name, TypeTag::Array, vec![component_name.to_string()]);
        record.transform = Some(unflatten_transform(n));
        let n_for_check = n;
        record.check = Some(std::sync::Arc::new(move |value| {
            is_list_of_floats(value, n_for_check)
        }) as CheckFn);
        schema.insert(array_name.to_string(), record);
    }
}

fn install_custom_primitives(schema: &mut Schema, base_primitive_types: HashMap<String, CustomPrimitiveDef>) {
    for (label, def) in base_primitive_types {
        let mut record = TypeRecord::new(label.clone(), TypeTag::Primitive, Vec::new());
        record.check = Some(def.check.clone());
        record.primitive = Some(PrimitiveKind::Custom(std::sync::Arc::new(def)));
        schema.insert(label, record);
    }
}

fn raw_record_to_type_record(
    label: &str,
    raw: &RawRecord,
    transforms: &HashMap<String, TransformFn>,
    checks: &HashMap<String, CheckFn>,
) -> Result<TypeRecord> {
    let tag = TypeTag::from_name(&raw.type_name)
        .ok_or_else(|| err(format!("Unknown type tag '{}' for {label}", raw.type_name)))?;
    let mut record = TypeRecord::new(label, tag, raw.children.clone());
    record.transform = transforms.get(label).cloned();
    record.check = checks.get(label).cloned();
    Ok(record)
}

fn add_expr(
    schema: &mut Schema,
    label: &str,
    expr: &str,
    transforms: &HashMap<String, TransformFn>,
    checks: &HashMap<String, CheckFn>,
) -> Result<()> {
    let raw_records = parse_expression(label, expr)?;
    for (child_label, raw) in &raw_records {
        let record = raw_record_to_type_record(child_label, raw, transforms, checks)?;
        schema.insert(child_label.clone(), record);
    }
    Ok(())
}

fn add_type_input(
    schema: &mut Schema,
    label: &str,
    input: &TypeInput,
    transforms: &HashMap<String, TransformFn>,
    checks: &HashMap<String, CheckFn>,
) -> Result<()> {
    match input {
        TypeInput::Expr(expr) => add_expr(schema, label, expr, transforms, checks)?,
        TypeInput::Tuple(slots) => {
            let mut record = TypeRecord::new(label, TypeTag::Tuple, Vec::new());
            record.transform = transforms.get(label).cloned();
            record.check = checks.get(label).cloned();
            let mut children = Vec::with_capacity(slots.len());
            for (i, slot) in slots.iter().enumerate() {
                let slot_label = format!("{label}[{i}]");
                children.push(slot_label.clone());
                add_type_input(schema, &slot_label, slot, transforms, checks)?;
            }
            record.children = children;
            schema.insert(label.to_string(), record);
        }
        TypeInput::NamedTuple(fields) => {
            let mut record = TypeRecord::new(label, TypeTag::NamedTuple, Vec::new());
            record.transform = transforms.get(label).cloned();
            record.check = checks.get(label).cloned();
            let mut children = Vec::with_capacity(fields.len());
            let mut keys = Vec::with_capacity(fields.len());
            let mut indexes = HashMap::with_capacity(fields.len());
            for (key, field_input) in fields {
                let field_label = format!("{label}.{key}");
                children.push(field_label.clone());
                indexes.insert(key.clone(), keys.len());
                keys.push(key.clone());
                add_type_input(schema, &field_label, field_input, transforms, checks)?;
            }
            record.children = children;
            record.keys = keys;
            record.indexes = indexes;
            schema.insert(label.to_string(), record);
        }
    }
    Ok(())
}

/// Builds a complete [`Schema`]: installs the builtin and caller-supplied
/// primitives, expands every type definition (textual expression, Tuple,
/// or NamedTuple) into records, then validates, forwards aliases, and
/// marks Ref targets.
pub fn extend_schema(
    base_primitive_types: HashMap<String, CustomPrimitiveDef>,
    type_definitions: HashMap<String, TypeInput>,
    transforms: HashMap<String, TransformFn>,
    checks: HashMap<String, CheckFn>,
) -> Result<Schema> {
    let mut schema = Schema::new();
    install_builtins(&mut schema);
    install_custom_primitives(&mut schema, base_primitive_types);

    for (label, input) in &type_definitions {
        add_type_input(&mut schema, label, input, &transforms, &checks)?;
    }

    validate_schema(&schema)?;
    forward_alias(&mut schema, 0)?;
    mark_refs(&mut schema);
    debug!(types = schema.len(), "schema compiled");
    Ok(schema)
}

const MODIFIER_TAGS: [TypeTag; 5] = [
    TypeTag::Array,
    TypeTag::Map,
    TypeTag::Optional,
    TypeTag::Ref,
    TypeTag::Link,
];

fn validate_schema(schema: &Schema) -> Result<()> {
    for (label, record) in schema {
        if record.tag != TypeTag::Primitive && record.tag != TypeTag::Link {
            for child in &record.children {
                if !schema.contains_key(child) {
                    return Err(err(format!("Missing type definition {child} for {label}")));
                }
            }
        }

        if MODIFIER_TAGS.contains(&record.tag) && record.children.len() != 1 {
            return Err(err(format!(
                "Modifier type {:?} should reference only a single child",
                record.tag
            )));
        }

        if record.tag == TypeTag::OneOf {
            if record.children.len() < 2 {
                return Err(err(
                    "Modifier type OneOf should reference at least two children",
                ));
            }
            let mut seen = std::collections::HashSet::new();
            for child in &record.children {
                if !seen.insert(child) {
                    return Err(err(
                        "Modifier type OneOf should not reference duplicate children",
                    ));
                }
            }
            for child in &record.children {
                let child_record = &schema[child];
                if child_record.check.is_none() {
                    return Err(err(format!(
                        "Type {child} is present as an OneOf option but missing a check function"
                    )));
                }
            }
        }

        if record.tag == TypeTag::Optional {
            let child = &schema[&record.children[0]];
            if child.tag == TypeTag::Optional {
                return Err(err(
                    "Modifier type Optional should not reference another Optional",
                ));
            }
        }

        if record.tag == TypeTag::Ref {
            let child = &schema[&record.children[0]];
            let allowed = [TypeTag::Tuple, TypeTag::NamedTuple, TypeTag::Array, TypeTag::Map];
            if !allowed.contains(&child.tag) {
                return Err(err(
                    "Modifier type Ref should be used only on Tuple, NamedTuple, Array or Map",
                ));
            }
        }

        if record.tag == TypeTag::Link {
            let target = &record.children[0];
            let mut parts = target.splitn(2, '/');
            let schema_name = parts.next().unwrap_or("");
            let type_name = parts.next().unwrap_or("");
            if schema_name.is_empty() || type_name.is_empty() {
                return Err(err(format!(
                    "Invalid Link {target}. Use the pattern Link<SchemaKey/TypeName> to reference a type from another schema"
                )));
            }
        }
    }
    Ok(())
}

/// Replaces every `Alias -> X` label's record with `X`'s record,
/// repeating until no aliases remain. `replaced` counts iterations so
/// far; a count exceeding the schema size means aliases form a cycle.
fn forward_alias(schema: &mut Schema, replaced: usize) -> Result<()> {
    if replaced > schema.len() {
        return Err(err("Circular alias reference detected"));
    }

    let aliases: Vec<(String, String)> = schema
        .iter()
        .filter(|(_, record)| record.tag == TypeTag::Alias)
        .map(|(label, record)| (label.clone(), record.children[0].clone()))
        .collect();

    if aliases.is_empty() {
        return Ok(());
    }

    for (label, target) in &aliases {
        let resolved = schema
            .get(target)
            .cloned()
            .ok_or_else(|| err(format!("Missing type definition {target} for {label}")))?;
        schema.insert(label.clone(), resolved);
    }

    forward_alias(schema, replaced + aliases.len())
}

/// Sets `is_ref_target = true` on every record some `Ref` points at.
fn mark_refs(schema: &mut Schema) {
    let targets: Vec<String> = schema
        .values()
        .filter(|record| record.tag == TypeTag::Ref)
        .map(|record| record.children[0].clone())
        .collect();
    for target in targets {
        if let Some(record) = schema.get_mut(&target) {
            record.is_ref_target = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn empty_inputs() -> (
        HashMap<String, CustomPrimitiveDef>,
        HashMap<String, TransformFn>,
        HashMap<String, CheckFn>,
    ) {
        (HashMap::new(), HashMap::new(), HashMap::new())
    }

    #[test]
    fn builtins_are_installed() {
        let (base, transforms, checks) = empty_inputs();
        let schema = extend_schema(base, HashMap::new(), transforms, checks).unwrap();
        assert_eq!(schema["Int32"].tag, TypeTag::Primitive);
        assert_eq!(schema["Vector3Array"].tag, TypeTag::Array);
    }

    #[test]
    fn nested_expression_resolves_aliases() {
        let (base, transforms, checks) = empty_inputs();
        let mut defs = HashMap::new();
        defs.insert(
            "Root".to_string(),
            TypeInput::Expr("Array<Map<Optional<Vector3>>>".to_string()),
        );
        let schema = extend_schema(base, defs, transforms, checks).unwrap();

        let root = &schema["Root"];
        assert_eq!(root.tag, TypeTag::Array);
        let map = &schema[&root.children[0]];
        assert_eq!(map.tag, TypeTag::Map);
        let optional = &schema[&map.children[0]];
        assert_eq!(optional.tag, TypeTag::Optional);
        assert_eq!(optional.children, vec!["Vector3".to_string()]);
    }

    #[test]
    fn ref_target_is_marked() {
        let (base, transforms, checks) = empty_inputs();
        let mut defs = HashMap::new();
        defs.insert(
            "Entity".to_string(),
            TypeInput::NamedTuple(vec![("id".to_string(), TypeInput::Expr("Int32".to_string()))]),
        );
        defs.insert(
            "EntityRef".to_string(),
            TypeInput::Expr("Ref<Entity>".to_string()),
        );
        let schema = extend_schema(base, defs, transforms, checks).unwrap();
        assert!(schema["Entity"].is_ref_target);
    }

    #[test]
    fn optional_of_optional_is_rejected() {
        let (base, transforms, checks) = empty_inputs();
        let mut defs = HashMap::new();
        defs.insert(
            "Bad".to_string(),
            TypeInput::Expr("Optional<Optional<Int32>>".to_string()),
        );
        assert!(extend_schema(base, defs, transforms, checks).is_err());
    }

    #[test]
    fn oneof_requires_checks_on_every_option() {
        let (base, transforms, checks) = empty_inputs();
        let mut defs = HashMap::new();
        defs.insert(
            "U".to_string(),
            TypeInput::Expr("OneOf<Int32,Float32>".to_string()),
        );
        let schema = extend_schema(base, defs, transforms, checks);
        assert!(schema.is_ok(), "Int32/Float32 are builtin with checks");
    }

    #[test]
    fn missing_child_definition_fails() {
        let (base, transforms, checks) = empty_inputs();
        let mut defs = HashMap::new();
        defs.insert(
            "Bad".to_string(),
            TypeInput::Expr("Array<NoSuchType>".to_string()),
        );
        assert!(extend_schema(base, defs, transforms, checks).is_err());
    }

    #[test]
    fn named_tuple_record_style_builds_indexes() {
        let (base, transforms, checks) = empty_inputs();
        let mut defs = HashMap::new();
        defs.insert(
            "Pose".to_string(),
            TypeInput::NamedTuple(vec![
                ("position".to_string(), TypeInput::Expr("Vector3".to_string())),
                ("rotation".to_string(), TypeInput::Expr("Vector4".to_string())),
            ]),
        );
        let schema = extend_schema(base, defs, transforms, checks).unwrap();
        let pose = &schema["Pose"];
        assert_eq!(pose.keys, vec!["position".to_string(), "rotation".to_string()]);
        assert_eq!(pose.indexes["rotation"], 1);
        assert_eq!(pose.children, vec!["Pose.position".to_string(), "Pose.rotation".to_string()]);
    }
}
