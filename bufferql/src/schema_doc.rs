//! JSON-document convenience loading for [`Schema`]: record-style
//! sugar around `extend_schema`, not a new grammar. A schema document
//! maps type labels to a definition in the shape §4.4's record-style
//! forms describe: a JSON string is a type expression, an array is a
//! Tuple of per-slot sub-documents, an object is a NamedTuple of named
//! sub-documents — matching how the original Python catalogue's demo
//! schemas (`TrackedEntitySource` as an array, `Pose`/`TrackedEntity` as
//! objects) were written.

use std::collections::HashMap;

use bufferql_base::{err, Result};
use bufferql_schema::{extend_schema, Schema, TypeInput};
use serde_json::Value as JsonValue;

/// Turns one JSON schema document into the label -> [`TypeInput`] map
/// `extend_schema` expects.
pub fn parse_schema_doc(doc: &JsonValue) -> Result<HashMap<String, TypeInput>> {
    let object = doc
        .as_object()
        .ok_or_else(|| err("schema document root must be a JSON object"))?;
    let mut defs = HashMap::with_capacity(object.len());
    for (label, node) in object {
        defs.insert(label.clone(), json_to_type_input(node)?);
    }
    Ok(defs)
}

fn json_to_type_input(node: &JsonValue) -> Result<TypeInput> {
    match node {
        JsonValue::String(expr) => Ok(TypeInput::Expr(expr.clone())),
        JsonValue::Array(items) => {
            let slots = items
                .iter()
                .map(json_to_type_input)
                .collect::<Result<Vec<_>>>()?;
            Ok(TypeInput::Tuple(slots))
        }
        JsonValue::Object(fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for (key, value) in fields {
                out.push((key.clone(), json_to_type_input(value)?));
            }
            Ok(TypeInput::NamedTuple(out))
        }
        _ => Err(err(
            "schema document entries must be a string, array, or object",
        )),
    }
}

/// Loads a schema straight from a JSON document's text, with no custom
/// base primitives or transforms/checks beyond the builtin catalogue.
/// Callers needing custom primitives should parse with
/// [`parse_schema_doc`] and call `extend_schema` directly.
pub fn load_schema_json(text: &str) -> Result<Schema> {
    let doc: JsonValue = serde_json::from_str(text)?;
    let defs = parse_schema_doc(&doc)?;
    extend_schema(HashMap::new(), defs, HashMap::new(), HashMap::new())
}
