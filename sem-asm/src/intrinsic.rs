closed_vocab! {
    /// Stage-4 AST node kinds.
    ///
    /// Every non-token node object starts with a `k` whose value parses
    /// here. The per-kind field allow lists live with the Stage-4
    /// validator; this enum is only the name vocabulary.
    pub enum Intrinsic {
        /// Compilation unit root.
        Unit => "Unit",
        /// Procedure declaration (extern or with a body).
        Proc => "Proc",
        /// Statement block.
        Block => "Block",
        /// Named, explicitly typed local binding.
        Var => "Var",
        /// Pattern-binding local (pat must be `PatBind`).
        VarPat => "VarPat",
        /// Expression statement.
        ExprStmt => "ExprStmt",
        /// Return from the enclosing procedure.
        Return => "Return",
        /// Two-way conditional.
        If => "If",
        /// Pre-tested loop.
        While => "While",
        /// Unconditional loop.
        Loop => "Loop",
        /// Post-tested loop.
        DoWhile => "DoWhile",
        /// General for loop (init/cond/step all optional).
        For => "For",
        /// Integer counting loop, desugared during lowering.
        ForInt => "ForInt",
        /// Break out of the innermost loop.
        Break => "Break",
        /// Continue the innermost loop.
        Continue => "Continue",
        /// Named, typed procedure parameter.
        Param => "Param",
        /// Pattern-binding procedure parameter.
        ParamPat => "ParamPat",
        /// Call expression (also the type-application spelling).
        Call => "Call",
        /// Argument list.
        Args => "Args",
        /// Name-binding pattern.
        PatBind => "PatBind",
        /// Integer literal pattern.
        PatInt => "PatInt",
        /// Wildcard pattern.
        PatWild => "PatWild",
        /// Name reference.
        Name => "Name",
        /// Builtin type reference.
        TypeRef => "TypeRef",
        /// Integer literal (base-10 token).
        Int => "Int",
        /// binary32 literal exchanged as IEEE-754 bits.
        F32 => "F32",
        /// binary64 literal exchanged as IEEE-754 bits.
        F64 => "F64",
        /// The unit value.
        UnitVal => "UnitVal",
        /// Byte-string literal.
        Bytes => "Bytes",
        /// UTF-8 string literal.
        StringUtf8 => "StringUtf8",
        /// C string literal.
        CStr => "CStr",
        /// Unicode scalar literal (u32).
        Char => "Char",
        /// Zero-extend i32 to i64.
        ZExtI64FromI32 => "ZExtI64FromI32",
        /// Sign-extend i32 to i64.
        SExtI64FromI32 => "SExtI64FromI32",
        /// Truncate i64 to i32.
        TruncI32FromI64 => "TruncI32FromI64",
        /// Convert signed i32 to f64.
        F64FromI32S => "F64FromI32S",
        /// Convert signed i32 to f32.
        F32FromI32S => "F32FromI32S",
        /// Convert unsigned i32 to f64.
        F64FromI32U => "F64FromI32U",
        /// Convert unsigned i32 to f32.
        F32FromI32U => "F32FromI32U",
        /// Saturating truncation of f64 to signed i32.
        TruncSatI32FromF64S => "TruncSatI32FromF64S",
        /// Saturating truncation of f32 to signed i32.
        TruncSatI32FromF32S => "TruncSatI32FromF32S",
        /// Saturating truncation of f64 to unsigned i32.
        TruncSatI32FromF64U => "TruncSatI32FromF64U",
        /// Saturating truncation of f32 to unsigned i32.
        TruncSatI32FromF32U => "TruncSatI32FromF32U",
        /// Convert signed i64 to f64.
        F64FromI64S => "F64FromI64S",
        /// Convert signed i64 to f32.
        F32FromI64S => "F32FromI64S",
        /// Convert unsigned i64 to f64.
        F64FromI64U => "F64FromI64U",
        /// Convert unsigned i64 to f32.
        F32FromI64U => "F32FromI64U",
        /// Saturating truncation of f64 to signed i64.
        TruncSatI64FromF64S => "TruncSatI64FromF64S",
        /// Saturating truncation of f32 to signed i64.
        TruncSatI64FromF32S => "TruncSatI64FromF32S",
        /// Saturating truncation of f64 to unsigned i64.
        TruncSatI64FromF64U => "TruncSatI64FromF64U",
        /// Saturating truncation of f32 to unsigned i64.
        TruncSatI64FromF32U => "TruncSatI64FromF32U",
        /// Reinterpret i64 as a guest pointer.
        PtrFromI64 => "PtrFromI64",
        /// Reinterpret a guest pointer as i64.
        I64FromPtr => "I64FromPtr",
        /// Boolean true literal.
        True => "True",
        /// Boolean false literal.
        False => "False",
        /// Null literal.
        Nil => "Nil",
        /// Parenthesized expression (pass-through).
        Paren => "Paren",
        /// Boolean negation.
        Not => "Not",
        /// Arithmetic negation.
        Neg => "Neg",
        /// Bitwise complement.
        BitNot => "BitNot",
        /// Address of an addressable local.
        AddrOf => "AddrOf",
        /// Pointer dereference.
        Deref => "Deref",
        /// Binary operation carrying a semantic op id.
        Bin => "Bin",
        /// Integer match expression.
        Match => "Match",
        /// One match arm.
        MatchArm => "MatchArm",
    }
}
