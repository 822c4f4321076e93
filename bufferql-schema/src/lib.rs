//! The type-expression grammar, schema compiler, and the runtime value
//! tree both the compiler's check/transform functions and the writer
//! tree operate over. No buffer layout lives here; that's
//! bufferql-writer, built on top of the [`types::Schema`] this crate
//! produces.

#![allow(dead_code)]

pub mod compiler;
pub mod grammar;
pub mod primitives;
pub mod types;
pub mod value;

pub use compiler::{extend_schema, TypeInput};
pub use primitives::{BuiltinPrimitive, CustomPrimitiveDef, PrimitiveKind, PrimitiveSize};
pub use types::{CheckFn, Schema, TransformFn, TypeRecord, TypeTag};
pub use value::Value;
