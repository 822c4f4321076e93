//! The built-in primitive catalogue `extend_schema` seeds every schema
//! with, plus the extension point for caller-supplied primitives.

use std::sync::Arc;

use bufferql_core::{DataTape, TapeKey};

use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveSize {
    Fixed(usize),
    /// Stored on the Data Tape; the fixed region holds one varint index
    /// slot instead.
    Variable,
}

/// The fixed starter set: integers, floats, strings, and the
/// fixed-length float vectors/matrices (`Vector2/3/4`, `Matrix3/4`),
/// collapsed into a single `Vector(n)` case since they differ only in
/// component count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuiltinPrimitive {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
    String,
    Vector(usize),
}

impl BuiltinPrimitive {
    pub fn name(&self) -> String {
        match self {
            BuiltinPrimitive::Uint8 => "Uint8".to_string(),
            BuiltinPrimitive::Int8 => "Int8".to_string(),
            BuiltinPrimitive::Uint16 => "Uint16".to_string(),
            BuiltinPrimitive::Int16 => "Int16".to_string(),
            BuiltinPrimitive::Uint32 => "Uint32".to_string(),
            BuiltinPrimitive::Int32 => "Int32".to_string(),
            BuiltinPrimitive::Float32 => "Float32".to_string(),
            BuiltinPrimitive::Float64 => "Float64".to_string(),
            BuiltinPrimitive::String => "String".to_string(),
            BuiltinPrimitive::Vector(2) => "Vector2".to_string(),
            BuiltinPrimitive::Vector(3) => "Vector3".to_string(),
            BuiltinPrimitive::Vector(4) => "Vector4".to_string(),
            BuiltinPrimitive::Vector(9) => "Matrix3".to_string(),
            BuiltinPrimitive::Vector(16) => "Matrix4".to_string(),
            BuiltinPrimitive::Vector(n) => format!("Vector{n}Unnamed"),
        }
    }

    pub fn size(&self) -> PrimitiveSize {
        match self {
            BuiltinPrimitive::Uint8 | BuiltinPrimitive::Int8 => PrimitiveSize::Fixed(1),
            BuiltinPrimitive::Uint16 | BuiltinPrimitive::Int16 => PrimitiveSize::Fixed(2),
            BuiltinPrimitive::Uint32 | BuiltinPrimitive::Int32 | BuiltinPrimitive::Float32 => {
                PrimitiveSize::Fixed(4)
            }
            BuiltinPrimitive::Float64 => PrimitiveSize::Fixed(8),
            BuiltinPrimitive::String => PrimitiveSize::Variable,
            BuiltinPrimitive::Vector(n) => PrimitiveSize::Fixed(4 * n),
        }
    }

    pub fn check(&self, value: &Value) -> bool {
        match self {
            BuiltinPrimitive::Uint8
            | BuiltinPrimitive::Int8
            | BuiltinPrimitive::Uint16
            | BuiltinPrimitive::Int16
            | BuiltinPrimitive::Uint32
            | BuiltinPrimitive::Int32 => matches!(value, Value::Int(_)),
            BuiltinPrimitive::Float32 | BuiltinPrimitive::Float64 => {
                matches!(value, Value::Float(_))
            }
            BuiltinPrimitive::String => matches!(value, Value::Str(_)),
            BuiltinPrimitive::Vector(n) => {
                value.as_floats().map(|f| f.len() == *n).unwrap_or(false)
            }
        }
    }

    /// Writes a fixed-size primitive's bytes at the start of `out`.
    /// Never called for `String`, whose storage goes through
    /// [`BuiltinPrimitive::encode_variable`] instead.
    pub fn encode_fixed(&self, out: &mut [u8], value: &Value) {
        match self {
            BuiltinPrimitive::Uint8 => out[0] = value.as_int().unwrap_or(0) as u8,
            BuiltinPrimitive::Int8 => {
                let v = value.as_int().unwrap_or(0) as i8;
                out[0] = v as u8;
            }
            BuiltinPrimitive::Uint16 => {
                out[..2].copy_from_slice(&(value.as_int().unwrap_or(0) as u16).to_le_bytes())
            }
            BuiltinPrimitive::Int16 => {
                out[..2].copy_from_slice(&(value.as_int().unwrap_or(0) as i16).to_le_bytes())
            }
            BuiltinPrimitive::Uint32 => {
                out[..4].copy_from_slice(&(value.as_int().unwrap_or(0) as u32).to_le_bytes())
            }
            BuiltinPrimitive::Int32 => {
                out[..4].copy_from_slice(&(value.as_int().unwrap_or(0) as i32).to_le_bytes())
            }
            BuiltinPrimitive::Float32 => {
                let f = match value {
                    Value::Float(f) => *f as f32,
                    _ => 0.0,
                };
                out[..4].copy_from_slice(&f.to_le_bytes());
            }
            BuiltinPrimitive::Float64 => {
                let f = match value {
                    Value::Float(f) => *f,
                    _ => 0.0,
                };
                out[..8].copy_from_slice(&f.to_le_bytes());
            }
            BuiltinPrimitive::Vector(n) => {
                let comps = value.as_floats().unwrap_or(&[]);
                for i in 0..*n {
                    let f = comps.get(i).copied().unwrap_or(0.0);
                    out[4 * i..4 * i + 4].copy_from_slice(&f.to_le_bytes());
                }
            }
            BuiltinPrimitive::String => unreachable!("String is encoded via encode_variable"),
        }
    }

    /// Puts a `String` value's UTF-8 bytes on the Data Tape, keyed by the
    /// value's own allocation identity so repeated references to the
    /// same `Rc<str>` dedup. Returns the tape position.
    pub fn encode_variable(&self, value: &Value, tape: &mut DataTape<TapeKey>) -> i64 {
        debug_assert_eq!(*self, BuiltinPrimitive::String);
        let s = value.as_str().unwrap_or("");
        let key = TapeKey::Value(value.identity().unwrap_or(0));
        tape.put(key, s.as_bytes());
        tape.get(&key)
    }
}

/// The Array-of-Vector/Matrix compound types (`Vector3Array`, etc.):
/// an Array whose element type is the corresponding `Vector(n)`, with a
/// transform that groups a flat `Floats` value into `n`-sized chunks
/// before the Array writer spawns one child per chunk.
pub fn unflatten_transform(n: usize) -> Arc<dyn Fn(&Value) -> Value + Send + Sync> {
    Arc::new(move |value: &Value| {
        let flat = value.as_floats().unwrap_or(&[]);
        let chunks: Vec<Value> = flat
            .chunks(n)
            .map(|c| Value::floats(c.to_vec()))
            .collect();
        Value::list(chunks)
    })
}

/// Caller-supplied base primitive types, the extension point
/// `extend_schema`'s `base_primitive_types` argument feeds.
pub struct CustomPrimitiveDef {
    pub name: String,
    pub size: PrimitiveSize,
    pub check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    pub encode_fixed: Option<Arc<dyn Fn(&mut [u8], &Value) + Send + Sync>>,
    pub encode_variable: Option<Arc<dyn Fn(&Value, &mut DataTape<TapeKey>) -> i64 + Send + Sync>>,
}

#[derive(Clone)]
pub enum PrimitiveKind {
    Builtin(BuiltinPrimitive),
    Custom(Arc<CustomPrimitiveDef>),
}

impl PrimitiveKind {
    pub fn size(&self) -> PrimitiveSize {
        match self {
            PrimitiveKind::Builtin(b) => b.size(),
            PrimitiveKind::Custom(c) => c.size,
        }
    }

    pub fn check(&self, value: &Value) -> bool {
        match self {
            PrimitiveKind::Builtin(b) => b.check(value),
            PrimitiveKind::Custom(c) => (c.check)(value),
        }
    }

    pub fn encode_fixed(&self, out: &mut [u8], value: &Value) {
        match self {
            PrimitiveKind::Builtin(b) => b.encode_fixed(out, value),
            PrimitiveKind::Custom(c) => {
                if let Some(f) = &c.encode_fixed {
                    f(out, value);
                }
            }
        }
    }

    pub fn encode_variable(&self, value: &Value, tape: &mut DataTape<TapeKey>) -> i64 {
        match self {
            PrimitiveKind::Builtin(b) => b.encode_variable(value, tape),
            PrimitiveKind::Custom(c) => match &c.encode_variable {
                Some(f) => f(value, tape),
                None => -1,
            },
        }
    }
}

/// Every builtin primitive and builtin compound (`Vector*Array`) name,
/// in the order `extend_schema` installs them.
pub const BUILTIN_PRIMITIVES: [BuiltinPrimitive; 9] = [
    BuiltinPrimitive::Uint8,
    BuiltinPrimitive::Int8,
    BuiltinPrimitive::Uint16,
    BuiltinPrimitive::Int16,
    BuiltinPrimitive::Uint32,
    BuiltinPrimitive::Int32,
    BuiltinPrimitive::Float32,
    BuiltinPrimitive::Float64,
    BuiltinPrimitive::String,
];

pub const VECTOR_PRIMITIVES: [(&str, usize); 5] = [
    ("Vector2", 2),
    ("Vector3", 3),
    ("Vector4", 4),
    ("Matrix3", 9),
    ("Matrix4", 16),
];

pub const VECTOR_ARRAY_COMPOUNDS: [(&str, &str, usize); 5] = [
    ("Vector2Array", "Vector2", 2),
    ("Vector3Array", "Vector3", 3),
    ("Vector4Array", "Vector4", 4),
    ("Matrix3Array", "Matrix3", 9),
    ("Matrix4Array", "Matrix4", 16),
];

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn vector_size_matches_component_count() {
        assert_eq!(BuiltinPrimitive::Vector(3).size(), PrimitiveSize::Fixed(12));
        assert_eq!(BuiltinPrimitive::Vector(16).size(), PrimitiveSize::Fixed(64));
    }

    #[test]
    fn string_is_variable() {
        assert_eq!(BuiltinPrimitive::String.size(), PrimitiveSize::Variable);
    }

    #[test]
    fn encode_fixed_uint16_roundtrips_via_le_bytes() {
        let mut out = [0u8; 2];
        BuiltinPrimitive::Uint16.encode_fixed(&mut out, &Value::int(300));
        assert_eq!(u16::from_le_bytes(out), 300);
    }

    #[test]
    fn unflatten_groups_into_fixed_chunks() {
        let transform = unflatten_transform(3);
        let flat = Value::floats(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let grouped = transform(&flat);
        let list = grouped.as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].as_floats().unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(list[1].as_floats().unwrap(), &[4.0, 5.0, 6.0]);
    }
}
