//! Mutable module construction.
//!
//! The builder owns growable byte/id pools; names, initializers and
//! variable-arity operand blocks are copied in at emit time and referenced
//! by pool-relative offsets. `finalize` copies everything into an
//! immutable [`Module`]; the builder stays usable afterwards.

use crate::module::{
    BrArgs, ByteSlice, CallResults, FuncIdx, Function, Global, GlobalIdx, IdSlice, Inst, Module,
    Op, PoolStr, Prim, Sig, SirType, SymIdx, SymKind, Symbol, TypeIdx, ValId,
};

/// Builder failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A function id was 0 or out of range.
    #[error("unknown function id {0}")]
    UnknownFunction(FuncIdx),
    /// `finalize` without any function.
    #[error("module has no functions")]
    EmptyModule,
    /// `finalize` without an entry function.
    #[error("module entry function not set")]
    NoEntry,
    /// A patch target did not address an instruction of the expected kind.
    #[error("patch at f{fid} ip {ip} does not address a {expected}")]
    BadPatch {
        /// Function id.
        fid: FuncIdx,
        /// Instruction index.
        ip: u32,
        /// Expected instruction kind.
        expected: &'static str,
    },
    /// A switch patch supplied the wrong number of case targets.
    #[error("switch patch arity mismatch at f{fid} ip {ip}")]
    SwitchArity {
        /// Function id.
        fid: FuncIdx,
        /// Instruction index.
        ip: u32,
    },
}

struct FuncBuild {
    name: PoolStr,
    insts: Vec<Inst>,
    value_count: u32,
    sig: Sig,
}

/// Mutable SIR module builder.
pub struct ModuleBuilder {
    types: Vec<SirType>,
    syms: Vec<Symbol>,
    globals: Vec<Global>,
    funcs: Vec<FuncBuild>,
    byte_pool: Vec<u8>,
    id_pool: Vec<u32>,
    entry: Option<FuncIdx>,
    src: (u32, u32),
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            syms: Vec::new(),
            globals: Vec::new(),
            funcs: Vec::new(),
            byte_pool: Vec::new(),
            id_pool: Vec::new(),
            entry: None,
            src: (0, 0),
        }
    }

    /// Sets the source mapping applied to subsequently emitted
    /// instructions.
    pub fn set_src(&mut self, node_id: u32, line: u32) {
        self.src = (node_id, line);
    }

    /// Clears the source mapping.
    pub fn clear_src(&mut self) {
        self.src = (0, 0);
    }

    /// Copies a string into the byte pool.
    pub fn intern_str(&mut self, s: &str) -> PoolStr {
        let off = self.byte_pool.len() as u32;
        self.byte_pool.extend_from_slice(s.as_bytes());
        PoolStr {
            off,
            len: s.len() as u32,
        }
    }

    /// Copies raw bytes into the byte pool.
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> ByteSlice {
        let off = self.byte_pool.len() as u32;
        self.byte_pool.extend_from_slice(bytes);
        ByteSlice {
            off,
            len: bytes.len() as u32,
        }
    }

    /// Copies a run of ids into the id pool.
    pub fn intern_ids(&mut self, ids: &[u32]) -> IdSlice {
        let off = self.id_pool.len() as u32;
        self.id_pool.extend_from_slice(ids);
        IdSlice {
            off,
            len: ids.len() as u32,
        }
    }

    /// Interns a primitive type, deduplicating on insert.
    pub fn ty_prim(&mut self, prim: Prim) -> TypeIdx {
        for (i, t) in self.types.iter().enumerate() {
            if *t == SirType::Prim(prim) {
                return i as TypeIdx + 1;
            }
        }
        self.types.push(SirType::Prim(prim));
        self.types.len() as TypeIdx
    }

    /// Interns a derived pointer type.
    pub fn ty_ptr(&mut self, pointee: TypeIdx) -> TypeIdx {
        for (i, t) in self.types.iter().enumerate() {
            if *t == (SirType::Ptr { pointee }) {
                return i as TypeIdx + 1;
            }
        }
        self.types.push(SirType::Ptr { pointee });
        self.types.len() as TypeIdx
    }

    /// Interns a function type.
    pub fn ty_fn(&mut self, params: &[TypeIdx], ret: TypeIdx) -> TypeIdx {
        for (i, t) in self.types.iter().enumerate() {
            if let SirType::Fn { params: p, ret: r } = t {
                let existing = &self.id_pool[p.off as usize..(p.off + p.len) as usize];
                if *r == ret && existing == params {
                    return i as TypeIdx + 1;
                }
            }
        }
        let params = self.intern_ids(params);
        self.types.push(SirType::Fn { params, ret });
        self.types.len() as TypeIdx
    }

    /// Builds a signature from parameter and result type ids.
    pub fn sig(&mut self, params: &[TypeIdx], results: &[TypeIdx]) -> Sig {
        Sig {
            params: self.intern_ids(params),
            results: self.intern_ids(results),
        }
    }

    /// Declares an extern function symbol.
    pub fn extern_fn(&mut self, name: &str, sig: Sig) -> SymIdx {
        let name = self.intern_str(name);
        self.syms.push(Symbol {
            kind: SymKind::ExternFn,
            name,
            sig,
        });
        self.syms.len() as SymIdx
    }

    /// Declares a global byte region.
    pub fn global(&mut self, name: &str, size: u32, align: u32, init: Option<&[u8]>) -> GlobalIdx {
        let name = self.intern_str(name);
        let init = self.intern_bytes(init.unwrap_or(&[]));
        self.globals.push(Global {
            name,
            size,
            align,
            init,
        });
        self.globals.len() as GlobalIdx
    }

    /// Begins a new function and returns its 1-based id.
    pub fn func_begin(&mut self, name: &str) -> FuncIdx {
        let name = self.intern_str(name);
        self.funcs.push(FuncBuild {
            name,
            insts: Vec::new(),
            value_count: 0,
            sig: Sig::EMPTY,
        });
        self.funcs.len() as FuncIdx
    }

    fn func_mut(&mut self, f: FuncIdx) -> Result<&mut FuncBuild, BuildError> {
        if f == 0 || f as usize > self.funcs.len() {
            return Err(BuildError::UnknownFunction(f));
        }
        Ok(&mut self.funcs[f as usize - 1])
    }

    /// Marks the entry function.
    pub fn set_entry(&mut self, f: FuncIdx) -> Result<(), BuildError> {
        self.func_mut(f)?;
        self.entry = Some(f);
        Ok(())
    }

    /// Sets the value-slot count of a function.
    pub fn set_value_count(&mut self, f: FuncIdx, count: u32) -> Result<(), BuildError> {
        self.func_mut(f)?.value_count = count;
        Ok(())
    }

    /// Sets the signature of a function.
    pub fn set_sig(&mut self, f: FuncIdx, sig: Sig) -> Result<(), BuildError> {
        self.func_mut(f)?.sig = sig;
        Ok(())
    }

    /// Next instruction ip of a function, for branch target computation.
    pub fn func_ip(&self, f: FuncIdx) -> u32 {
        if f == 0 {
            return 0;
        }
        self.funcs
            .get(f as usize - 1)
            .map(|fb| fb.insts.len() as u32)
            .unwrap_or(0)
    }

    /// Emits one instruction and returns its ip.
    pub fn emit(&mut self, f: FuncIdx, op: Op) -> Result<u32, BuildError> {
        let src = self.src;
        let fb = self.func_mut(f)?;
        let ip = fb.insts.len() as u32;
        fb.insts.push(Inst {
            op,
            src_node_id: src.0,
            src_line: src.1,
        });
        Ok(ip)
    }

    /// Emits an unconditional branch; the target may be patched later.
    pub fn emit_br(&mut self, f: FuncIdx, target: u32) -> Result<u32, BuildError> {
        self.emit(
            f,
            Op::Br {
                target,
                args: BrArgs::NONE,
            },
        )
    }

    /// Emits an unconditional branch with block-argument moves.
    pub fn emit_br_args(
        &mut self,
        f: FuncIdx,
        target: u32,
        src: &[ValId],
        dst: &[ValId],
    ) -> Result<u32, BuildError> {
        let args = BrArgs {
            src: self.intern_ids(src),
            dst: self.intern_ids(dst),
        };
        self.emit(f, Op::Br { target, args })
    }

    /// Emits a conditional branch.
    pub fn emit_cbr(
        &mut self,
        f: FuncIdx,
        cond: ValId,
        then_ip: u32,
        else_ip: u32,
    ) -> Result<u32, BuildError> {
        self.emit(
            f,
            Op::Cbr {
                cond,
                then_ip,
                else_ip,
            },
        )
    }

    /// Emits a switch over i32 case literals.
    pub fn emit_switch(
        &mut self,
        f: FuncIdx,
        scrut: ValId,
        cases: &[(i32, u32)],
        default_ip: u32,
    ) -> Result<u32, BuildError> {
        let lits: Vec<u32> = cases.iter().map(|(lit, _)| *lit as u32).collect();
        let targets: Vec<u32> = cases.iter().map(|(_, t)| *t).collect();
        let case_lits = self.intern_ids(&lits);
        let case_targets = self.intern_ids(&targets);
        self.emit(
            f,
            Op::Switch {
                scrut,
                case_lits,
                case_targets,
                default_ip,
            },
        )
    }

    /// Emits a call to an extern symbol.
    pub fn emit_call_extern(
        &mut self,
        f: FuncIdx,
        callee: SymIdx,
        args: &[ValId],
        results: CallResults,
    ) -> Result<u32, BuildError> {
        let args = self.intern_ids(args);
        self.emit(
            f,
            Op::CallExtern {
                callee,
                args,
                results,
            },
        )
    }

    /// Emits a direct call to an in-module function.
    pub fn emit_call_func(
        &mut self,
        f: FuncIdx,
        callee: FuncIdx,
        args: &[ValId],
        results: CallResults,
    ) -> Result<u32, BuildError> {
        let args = self.intern_ids(args);
        self.emit(
            f,
            Op::CallFunc {
                callee,
                args,
                results,
            },
        )
    }

    /// Emits an indirect call through a tagged function-pointer slot.
    pub fn emit_call_func_ptr(
        &mut self,
        f: FuncIdx,
        callee: ValId,
        args: &[ValId],
        results: CallResults,
    ) -> Result<u32, BuildError> {
        let args = self.intern_ids(args);
        self.emit(
            f,
            Op::CallFuncPtr {
                callee,
                args,
                results,
            },
        )
    }

    /// Emits a bytes constant, copying the payload into the pool.
    pub fn emit_const_bytes(
        &mut self,
        f: FuncIdx,
        dst_ptr: ValId,
        dst_len: ValId,
        bytes: &[u8],
    ) -> Result<u32, BuildError> {
        let bytes = self.intern_bytes(bytes);
        self.emit(
            f,
            Op::ConstBytes {
                dst_ptr,
                dst_len,
                bytes,
            },
        )
    }

    /// Rewrites the target of a previously emitted `br`.
    pub fn patch_br(&mut self, f: FuncIdx, ip: u32, target: u32) -> Result<(), BuildError> {
        let fid = f;
        let fb = self.func_mut(f)?;
        match fb.insts.get_mut(ip as usize).map(|i| &mut i.op) {
            Some(Op::Br { target: t, .. }) => {
                *t = target;
                Ok(())
            }
            _ => Err(BuildError::BadPatch {
                fid,
                ip,
                expected: "br",
            }),
        }
    }

    /// Rewrites the targets of a previously emitted `cbr`.
    pub fn patch_cbr(
        &mut self,
        f: FuncIdx,
        ip: u32,
        then_ip: u32,
        else_ip: u32,
    ) -> Result<(), BuildError> {
        let fid = f;
        let fb = self.func_mut(f)?;
        match fb.insts.get_mut(ip as usize).map(|i| &mut i.op) {
            Some(Op::Cbr {
                then_ip: t,
                else_ip: e,
                ..
            }) => {
                *t = then_ip;
                *e = else_ip;
                Ok(())
            }
            _ => Err(BuildError::BadPatch {
                fid,
                ip,
                expected: "cbr",
            }),
        }
    }

    /// Rewrites the targets of a previously emitted `switch`.
    pub fn patch_switch(
        &mut self,
        f: FuncIdx,
        ip: u32,
        case_targets: &[u32],
        default_ip: u32,
    ) -> Result<(), BuildError> {
        let fid = f;
        // Read the existing slice bounds before touching the pool.
        let (targets_slice, _) = {
            let fb = self.func_mut(f)?;
            match fb.insts.get(ip as usize).map(|i| i.op) {
                Some(Op::Switch { case_targets, .. }) => (case_targets, ()),
                _ => {
                    return Err(BuildError::BadPatch {
                        fid,
                        ip,
                        expected: "switch",
                    })
                }
            }
        };
        if targets_slice.len() != case_targets.len() as u32 {
            return Err(BuildError::SwitchArity { fid, ip });
        }
        let off = targets_slice.off as usize;
        self.id_pool[off..off + case_targets.len()].copy_from_slice(case_targets);
        let fb = self.func_mut(f)?;
        if let Some(Op::Switch { default_ip: d, .. }) =
            fb.insts.get_mut(ip as usize).map(|i| &mut i.op)
        {
            *d = default_ip;
        }
        Ok(())
    }

    /// Produces an immutable module. The builder keeps its state and can
    /// continue emitting afterwards.
    pub fn finalize(&self) -> Result<Module, BuildError> {
        if self.funcs.is_empty() {
            return Err(BuildError::EmptyModule);
        }
        let entry = self.entry.ok_or(BuildError::NoEntry)?;
        if entry == 0 || entry as usize > self.funcs.len() {
            return Err(BuildError::UnknownFunction(entry));
        }
        let funcs = self
            .funcs
            .iter()
            .map(|fb| Function {
                name: fb.name,
                insts: fb.insts.clone().into_boxed_slice(),
                value_count: fb.value_count,
                sig: fb.sig,
            })
            .collect();
        Ok(Module {
            types: self.types.clone().into_boxed_slice(),
            syms: self.syms.clone().into_boxed_slice(),
            globals: self.globals.clone().into_boxed_slice(),
            funcs,
            entry,
            byte_pool: self.byte_pool.clone().into_boxed_slice(),
            id_pool: self.id_pool.clone().into_boxed_slice(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prim_types_are_deduplicated() {
        let mut b = ModuleBuilder::new();
        let a = b.ty_prim(Prim::I32);
        let c = b.ty_prim(Prim::I64);
        assert_eq!(b.ty_prim(Prim::I32), a);
        assert_ne!(a, c);
        let p = b.ty_ptr(a);
        assert_eq!(b.ty_ptr(a), p);
        let f1 = b.ty_fn(&[a, a], c);
        assert_eq!(b.ty_fn(&[a, a], c), f1);
        assert_ne!(b.ty_fn(&[a], c), f1);
    }

    #[test]
    fn finalize_requires_an_entry() {
        let b = ModuleBuilder::new();
        assert_eq!(b.finalize().unwrap_err(), BuildError::EmptyModule);
        let mut b = ModuleBuilder::new();
        let f = b.func_begin("main");
        assert_eq!(b.finalize().unwrap_err(), BuildError::NoEntry);
        b.set_entry(f).unwrap();
        assert!(b.finalize().is_ok());
    }

    #[test]
    fn patching_rewrites_branch_targets() {
        let mut b = ModuleBuilder::new();
        let f = b.func_begin("main");
        b.set_entry(f).unwrap();
        b.set_value_count(f, 1).unwrap();
        b.emit(f, Op::ConstBool { dst: 0, v: true }).unwrap();
        let br = b.emit_br(f, 0).unwrap();
        let cbr = b.emit_cbr(f, 0, 0, 0).unwrap();
        let sw = b.emit_switch(f, 0, &[(1, 0), (2, 0)], 0).unwrap();
        b.patch_br(f, br, 5).unwrap();
        b.patch_cbr(f, cbr, 6, 7).unwrap();
        b.patch_switch(f, sw, &[8, 9], 10).unwrap();
        assert!(matches!(
            b.patch_br(f, cbr, 1),
            Err(BuildError::BadPatch { expected: "br", .. })
        ));
        assert!(matches!(
            b.patch_switch(f, sw, &[1], 2),
            Err(BuildError::SwitchArity { .. })
        ));

        let m = b.finalize().unwrap();
        let insts = &m.func(f).unwrap().insts;
        assert!(matches!(insts[br as usize].op, Op::Br { target: 5, .. }));
        assert!(matches!(
            insts[cbr as usize].op,
            Op::Cbr {
                then_ip: 6,
                else_ip: 7,
                ..
            }
        ));
        match insts[sw as usize].op {
            Op::Switch {
                case_targets,
                default_ip,
                ..
            } => {
                assert_eq!(m.ids_of(case_targets), &[8, 9]);
                assert_eq!(default_ip, 10);
            }
            _ => panic!("expected switch"),
        }
    }

    #[test]
    fn source_mapping_stamps_emitted_instructions() {
        let mut b = ModuleBuilder::new();
        let f = b.func_begin("main");
        b.set_entry(f).unwrap();
        b.set_src(17, 3);
        b.emit(f, Op::Exit { code: 0 }).unwrap();
        b.clear_src();
        b.emit(f, Op::Exit { code: 1 }).unwrap();
        let m = b.finalize().unwrap();
        let insts = &m.func(f).unwrap().insts;
        assert_eq!((insts[0].src_node_id, insts[0].src_line), (17, 3));
        assert_eq!((insts[1].src_node_id, insts[1].src_line), (0, 0));
    }
}
