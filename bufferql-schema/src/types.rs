//! The compiled schema graph: type labels mapped to validated, alias-
//! and ref-resolved type records.

use std::collections::HashMap;
use std::sync::Arc;

use crate::primitives::PrimitiveKind;
use crate::value::Value;

pub type CheckFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeTag {
    Primitive,
    Array,
    Map,
    Optional,
    OneOf,
    Tuple,
    NamedTuple,
    Ref,
    Link,
    Alias,
}

impl TypeTag {
    pub fn from_name(name: &str) -> Option<TypeTag> {
        Some(match name {
            "Primitive" => TypeTag::Primitive,
            "Array" => TypeTag::Array,
            "Map" => TypeTag::Map,
            "Optional" => TypeTag::Optional,
            "OneOf" => TypeTag::OneOf,
            "Tuple" => TypeTag::Tuple,
            "NamedTuple" => TypeTag::NamedTuple,
            "Ref" => TypeTag::Ref,
            "Link" => TypeTag::Link,
            "Alias" => TypeTag::Alias,
            _ => return None,
        })
    }
}

#[derive(Clone)]
pub struct TypeRecord {
    pub name: String,
    pub tag: TypeTag,
    /// Child type labels. Empty for Primitive/Link; exactly one for the
    /// modifier tags (Array/Map/Optional/Ref/Link); the field list for
    /// Tuple/NamedTuple; the option list for OneOf.
    pub children: Vec<String>,
    /// NamedTuple only: field names, parallel to `children`.
    pub keys: Vec<String>,
    /// NamedTuple only: `keys[i] -> i`, for O(1) field lookup by name.
    pub indexes: HashMap<String, usize>,
    /// Primitive only.
    pub primitive: Option<PrimitiveKind>,
    pub check: Option<CheckFn>,
    pub transform: Option<TransformFn>,
    /// Set by `mark_refs`: true if some Ref record in the schema points
    /// at this one, meaning values of this type must be registered in
    /// the reference table as they're spawned.
    pub is_ref_target: bool,
}

impl TypeRecord {
    pub fn new(name: impl Into<String>, tag: TypeTag, children: Vec<String>) -> TypeRecord {
        TypeRecord {
            name: name.into(),
            tag,
            children,
            keys: Vec::new(),
            indexes: HashMap::new(),
            primitive: None,
            check: None,
            transform: None,
            is_ref_target: false,
        }
    }
}

impl std::fmt::Debug for TypeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRecord")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("children", &self.children)
            .field("keys", &self.keys)
            .field("is_ref_target", &self.is_ref_target)
            .finish()
    }
}

/// A type label to compiled record mapping: the output of
/// [`crate::compiler::extend_schema`] and the input every writer walks.
pub type Schema = HashMap<String, TypeRecord>;
