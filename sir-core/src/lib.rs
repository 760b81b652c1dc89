//! Structured IR core.
//!
//! The SIR module model (types, symbols, globals, functions, typed value
//! slots, a closed opcode vocabulary), a pool-backed mutable builder, a
//! structural validator, and a deterministic slot-table interpreter that
//! executes a validated module against a hosted zABI implementation.

#![warn(missing_docs)]
#![deny(unused_must_use)]

pub mod builder;
pub mod interp;
pub mod module;
pub mod validate;

pub use builder::{BuildError, ModuleBuilder};
pub use interp::{run, run_with_observer, ExecError, ExecObserver, MemEvent, NoObserver, Value};
pub use module::{
    fn_ptr_target, fn_ptr_value, BoolBinOp, BrArgs, ByteSlice, CallResults, FloatCmpOp, FuncIdx,
    Function, Global, GlobalIdx, IdSlice, Inst, IntBinOp, IntCmpOp, IntUnOp, MemKind, Module, Op,
    PoolStr, Prim, Sig, SirType, SymIdx, SymKind, Symbol, TypeIdx, ValId, Width,
};
pub use validate::{validate, SlotKind, ValidateDiag};
