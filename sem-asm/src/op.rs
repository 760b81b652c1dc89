closed_vocab! {
    /// Semantic operator ids for `Bin.op`.
    ///
    /// The front end commits surface punctuation to these ids upstream;
    /// `+`, `EqEq` and friends never reach the lowerer.
    pub enum OpId {
        /// Assignment; only valid where an lvalue shape commits the store type.
        Assign => "core.assign",
        /// Short-circuit boolean or.
        BoolOrSc => "core.bool.or_sc",
        /// Short-circuit boolean and.
        BoolAndSc => "core.bool.and_sc",
        /// Integer addition.
        Add => "core.add",
        /// Integer subtraction.
        Sub => "core.sub",
        /// Integer multiplication.
        Mul => "core.mul",
        /// Integer division (signed, trapping in the MVP mapping).
        Div => "core.div",
        /// Integer remainder (unsigned, trapping in the MVP mapping).
        Rem => "core.rem",
        /// Shift left.
        Shl => "core.shl",
        /// Shift right (logical in the MVP mapping).
        Shr => "core.shr",
        /// Bitwise and.
        BitAnd => "core.bitand",
        /// Bitwise or.
        BitOr => "core.bitor",
        /// Bitwise xor.
        BitXor => "core.bitxor",
        /// Equality comparison.
        Eq => "core.eq",
        /// Inequality comparison.
        Ne => "core.ne",
        /// Less-than comparison.
        Lt => "core.lt",
        /// Less-or-equal comparison.
        Lte => "core.lte",
        /// Greater-than comparison.
        Gt => "core.gt",
        /// Greater-or-equal comparison.
        Gte => "core.gte",
    }
}

impl OpId {
    /// Comparison operators (result type `bool`).
    pub const fn is_cmp(self) -> bool {
        matches!(
            self,
            OpId::Eq | OpId::Ne | OpId::Lt | OpId::Lte | OpId::Gt | OpId::Gte
        )
    }

    /// Arithmetic operators (operands and result share the expected width).
    pub const fn is_arith(self) -> bool {
        matches!(self, OpId::Add | OpId::Sub | OpId::Mul | OpId::Div | OpId::Rem)
    }

    /// Bitwise and shift operators.
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            OpId::Shl | OpId::Shr | OpId::BitAnd | OpId::BitOr | OpId::BitXor
        )
    }

    /// Short-circuit boolean operators; their lowering triggers `sem:v1`.
    pub const fn is_short_circuit(self) -> bool {
        matches!(self, OpId::BoolAndSc | OpId::BoolOrSc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn round_trips_every_op_id() {
        for op in OpId::iter() {
            assert_eq!(OpId::parse(op.as_str()), Some(op));
        }
    }

    #[test]
    fn rejects_punctuation_and_surface_spellings() {
        for word in ["+", "Plus", "EqEq", "core.pow", "assign"] {
            assert_eq!(OpId::parse(word), None);
        }
    }

    #[test]
    fn classifications_are_disjoint() {
        for op in OpId::iter() {
            let classes = [
                op.is_cmp(),
                op.is_arith(),
                op.is_bitwise(),
                op.is_short_circuit(),
                op == OpId::Assign,
            ];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1, "{op}");
        }
    }
}
