closed_vocab! {
    /// Normalized builtin type ids committed upstream in Stage-4 documents.
    ///
    /// These are the only types the toolchain knows. Surface names are
    /// mapped to this set by `meta.types` before the AST reaches us; the
    /// lowerer never resolves nominal or user types.
    pub enum TypeId {
        /// 8-bit signed integer (pointee of `cstr` data).
        I8 => "i8",
        /// 32-bit signed integer.
        I32 => "i32",
        /// Boolean.
        Bool => "bool",
        /// 8-bit unsigned integer.
        U8 => "u8",
        /// 32-bit unsigned integer (also the `Char` scalar carrier).
        U32 => "u32",
        /// 64-bit unsigned integer.
        U64 => "u64",
        /// 64-bit signed integer.
        I64 => "i64",
        /// IEEE-754 binary32.
        F32 => "f32",
        /// IEEE-754 binary64.
        F64 => "f64",
        /// The unit/void type.
        Void => "void",
        /// Raw guest pointer.
        Ptr => "ptr",
        /// Unparameterized slice (MVP: opaque value binding).
        Slice => "slice",
        /// data:v1 canonical byte string (cstr data pointer + i64 length).
        Bytes => "bytes",
        /// data:v1 canonical UTF-8 string (cstr data pointer + i64 length).
        StringUtf8 => "string.utf8",
        /// data:v1 canonical NUL-terminated C string.
        CStr => "cstr",
    }
}

impl TypeId {
    /// The SIR stream type id for this type, e.g. `t:i32`.
    pub const fn sir_type_id(self) -> &'static str {
        match self {
            TypeId::I8 => "t:i8",
            TypeId::I32 => "t:i32",
            TypeId::Bool => "t:bool",
            TypeId::U8 => "t:u8",
            TypeId::U32 => "t:u32",
            TypeId::U64 => "t:u64",
            TypeId::I64 => "t:i64",
            TypeId::F32 => "t:f32",
            TypeId::F64 => "t:f64",
            TypeId::Void => "t:void",
            TypeId::Ptr => "t:ptr",
            TypeId::Slice => "t:slice",
            TypeId::Bytes => "t:bytes",
            TypeId::StringUtf8 => "t:string.utf8",
            TypeId::CStr => "t:cstr",
        }
    }

    /// The SIR stream id of the derived pointer type `ptr(self)`,
    /// e.g. `t:p_i32`. Dots in the pointee spelling fold to underscores.
    pub fn derived_ptr_type_id(self) -> String {
        let mut id = String::from("t:p_");
        for ch in self.as_str().chars() {
            id.push(if ch == '.' { '_' } else { ch });
        }
        id
    }

    /// Natural alignment in bytes for load/store-capable value types.
    pub const fn align_bytes(self) -> Option<u32> {
        match self {
            TypeId::I32 => Some(4),
            TypeId::I64 => Some(8),
            TypeId::U8 => Some(1),
            TypeId::F64 => Some(8),
            TypeId::Ptr => Some(8),
            _ => None,
        }
    }

    /// SIR store opcode tag for this value type, when storable.
    pub const fn store_tag(self) -> Option<&'static str> {
        match self {
            TypeId::I32 => Some("store.i32"),
            TypeId::I64 => Some("store.i64"),
            TypeId::U8 => Some("store.i8"),
            TypeId::F64 => Some("store.f64"),
            TypeId::Ptr => Some("store.ptr"),
            _ => None,
        }
    }

    /// SIR load opcode tag for this value type, when loadable.
    pub const fn load_tag(self) -> Option<&'static str> {
        match self {
            TypeId::I32 => Some("load.i32"),
            TypeId::I64 => Some("load.i64"),
            TypeId::U8 => Some("load.i8"),
            TypeId::F64 => Some("load.f64"),
            TypeId::Ptr => Some("load.ptr"),
            _ => None,
        }
    }

    /// Whether a local of this type is lowered as an `alloca`-backed slot.
    ///
    /// Slot-backed locals are addressable and assignable; everything else
    /// is a direct value binding.
    pub const fn supports_slot_storage(self) -> bool {
        matches!(
            self,
            TypeId::I32 | TypeId::I64 | TypeId::U8 | TypeId::F64 | TypeId::Ptr
        )
    }

    /// Integer types accepted for `Int` literals.
    pub const fn accepts_int_literal(self) -> bool {
        matches!(
            self,
            TypeId::I32 | TypeId::I64 | TypeId::U8 | TypeId::U32 | TypeId::U64
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    #[rstest]
    #[case("i8", TypeId::I8)]
    #[case("i32", TypeId::I32)]
    #[case("i64", TypeId::I64)]
    #[case("u8", TypeId::U8)]
    #[case("u32", TypeId::U32)]
    #[case("u64", TypeId::U64)]
    #[case("bool", TypeId::Bool)]
    #[case("f32", TypeId::F32)]
    #[case("f64", TypeId::F64)]
    #[case("void", TypeId::Void)]
    #[case("ptr", TypeId::Ptr)]
    #[case("slice", TypeId::Slice)]
    #[case("bytes", TypeId::Bytes)]
    #[case("string.utf8", TypeId::StringUtf8)]
    #[case("cstr", TypeId::CStr)]
    fn parses_canonical_spellings(#[case] text: &str, #[case] expected: TypeId) {
        assert_eq!(TypeId::parse(text), Some(expected));
        assert_eq!(expected.as_str(), text);
    }

    #[test]
    fn round_trips_every_type_id() {
        for t in TypeId::iter() {
            assert_eq!(TypeId::parse(t.as_str()), Some(t));
            assert_eq!(TypeId::from_str(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn rejects_surface_names() {
        for word in ["I64", "Usize", "int", "u16", "string", ""] {
            assert_eq!(TypeId::parse(word), None);
        }
        let err = TypeId::from_str("Usize").unwrap_err();
        assert_eq!(err.vocab, "TypeId");
        assert_eq!(err.word, "Usize");
    }

    #[test]
    fn slot_storage_matches_load_store_capability() {
        for t in TypeId::iter() {
            if t.supports_slot_storage() {
                assert!(t.store_tag().is_some(), "{t} must be storable");
                assert!(t.load_tag().is_some(), "{t} must be loadable");
                assert!(t.align_bytes().is_some(), "{t} must have alignment");
            } else {
                assert!(t.store_tag().is_none(), "{t} must not be storable");
            }
        }
    }

    #[test]
    fn derived_ptr_id_sanitizes_dots() {
        assert_eq!(TypeId::I32.derived_ptr_type_id(), "t:p_i32");
        assert_eq!(TypeId::StringUtf8.derived_ptr_type_id(), "t:p_string_utf8");
    }
}
