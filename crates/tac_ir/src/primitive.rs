//! Primitive/opcode tables (spec component A): static name<->enum tables.

use std::fmt;

/// The closed set of primitives (§3.2). `Struct`, `Union`, `Pointer`, and
/// `Array` are markers whose payload lives beside `prim` in `TypeInfo`;
/// `Unknown` means "not yet defined"; `Void` is only valid as a return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    F32,
    F64,
    Pointer,
    Boolean,
    Struct,
    Union,
    Array,
    Void,
    Unknown,
}

/// Name table, kept sorted so lookup can binary-search (spec component A).
const PRIMITIVE_NAMES: &[(&str, Primitive)] = &[
    ("boolean", Primitive::Boolean),
    ("f32", Primitive::F32),
    ("f64", Primitive::F64),
    ("pointer", Primitive::Pointer),
    ("s16", Primitive::S16),
    ("s32", Primitive::S32),
    ("s64", Primitive::S64),
    ("s8", Primitive::S8),
    ("struct", Primitive::Struct),
    ("u16", Primitive::U16),
    ("u32", Primitive::U32),
    ("u64", Primitive::U64),
    ("u8", Primitive::U8),
    ("union", Primitive::Union),
    ("unknown", Primitive::Unknown),
    ("void", Primitive::Void),
];

impl Primitive {
    pub fn from_name(name: &str) -> Option<Primitive> {
        PRIMITIVE_NAMES
            .binary_search_by_key(&name, |(n, _)| n)
            .ok()
            .map(|idx| PRIMITIVE_NAMES[idx].1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::U8 => "u8",
            Primitive::S8 => "s8",
            Primitive::U16 => "u16",
            Primitive::S16 => "s16",
            Primitive::U32 => "u32",
            Primitive::S32 => "s32",
            Primitive::U64 => "u64",
            Primitive::S64 => "s64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Pointer => "pointer",
            Primitive::Boolean => "boolean",
            Primitive::Struct => "struct",
            Primitive::Union => "union",
            Primitive::Array => "array",
            Primitive::Void => "void",
            Primitive::Unknown => "unknown",
        }
    }

    /// Primitives that may be introduced via the plain `type-prim` op.
    /// `void`, `struct`, `union`, `pointer`, `array` have dedicated ops
    /// (§3.3 invariant).
    pub fn is_plain(self) -> bool {
        !matches!(
            self,
            Primitive::Void
                | Primitive::Struct
                | Primitive::Union
                | Primitive::Pointer
                | Primitive::Array
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::U8
                | Primitive::S8
                | Primitive::U16
                | Primitive::S16
                | Primitive::U32
                | Primitive::S32
                | Primitive::U64
                | Primitive::S64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Natural size in bytes, used by frame/spill layout (§4.5) and the C
    /// typedef prelude (§4.4).
    pub fn size(self) -> u32 {
        match self {
            Primitive::U8 | Primitive::S8 | Primitive::Boolean => 1,
            Primitive::U16 | Primitive::S16 => 2,
            Primitive::U32 | Primitive::S32 => 4,
            Primitive::U64 | Primitive::S64 => 8,
            Primitive::F32 => 8, // reserved at 8 per §9 Open Questions; FP unimplemented on x64
            Primitive::F64 => 8,
            Primitive::Pointer => 8,
            Primitive::Struct | Primitive::Union | Primitive::Array | Primitive::Void | Primitive::Unknown => 0,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted() {
        let mut sorted = PRIMITIVE_NAMES.to_vec();
        sorted.sort_by_key(|(n, _)| *n);
        assert_eq!(PRIMITIVE_NAMES, sorted.as_slice());
    }

    #[test]
    fn round_trips_every_name() {
        for &(name, prim) in PRIMITIVE_NAMES {
            assert_eq!(Primitive::from_name(name), Some(prim));
            assert_eq!(prim.name(), name);
        }
    }

    #[test]
    fn plain_excludes_composite_markers() {
        assert!(!Primitive::Void.is_plain());
        assert!(!Primitive::Struct.is_plain());
        assert!(!Primitive::Union.is_plain());
        assert!(!Primitive::Pointer.is_plain());
        assert!(!Primitive::Array.is_plain());
        assert!(Primitive::S32.is_plain());
    }
}
