//! Structural and type-level module validation.
//!
//! Checks the invariants the interpreter relies on: every referenced id
//! exists, every branch target is in range, no statement follows a
//! terminator inside a block, every block terminates, slot kinds are
//! consistent between definitions and uses, and every slot read is
//! defined on every path reaching it.

use std::collections::BTreeSet;

use crate::module::{FuncIdx, Function, MemKind, Module, Op, Prim, SirType, Width};

/// Structured validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message} (f{fid} ip {ip})")]
pub struct ValidateDiag {
    /// Stable category code, e.g. `sir.validate.inst`.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Function id; 0 when not applicable.
    pub fid: FuncIdx,
    /// Instruction index; 0 when not applicable.
    pub ip: u32,
    /// Offending opcode name, when applicable.
    pub op: Option<&'static str>,
    /// Source node id from the instruction mapping; 0 when unknown.
    pub src_node_id: u32,
    /// Source line from the instruction mapping; 0 when unknown.
    pub src_line: u32,
}

/// Slot value kinds tracked by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SlotKind {
    I8,
    I16,
    I32,
    I64,
    Ptr,
    Bool,
    F32,
    F64,
}

impl SlotKind {
    fn of_width(w: Width) -> SlotKind {
        match w {
            Width::W32 => SlotKind::I32,
            Width::W64 => SlotKind::I64,
        }
    }

    fn of_mem(kind: MemKind) -> SlotKind {
        match kind {
            MemKind::I8 => SlotKind::I8,
            MemKind::I16 => SlotKind::I16,
            MemKind::I32 => SlotKind::I32,
            MemKind::I64 => SlotKind::I64,
            MemKind::Ptr => SlotKind::Ptr,
            MemKind::F32 => SlotKind::F32,
            MemKind::F64 => SlotKind::F64,
        }
    }
}

/// Validates a module; returns the first violated invariant.
pub fn validate(m: &Module) -> Result<(), ValidateDiag> {
    let entry = m.entry();
    if m.func(entry).is_none() {
        return Err(diag(
            "sir.validate.entry",
            format!("entry function id {entry} is out of range"),
            0,
            0,
            None,
        ));
    }
    for t in 1..=m.type_count() {
        match m.ty(t).expect("in range") {
            SirType::Ptr { pointee } => {
                if m.ty(*pointee).is_none() {
                    return Err(diag(
                        "sir.validate.type",
                        format!("ptr type {t} references unknown pointee {pointee}"),
                        0,
                        0,
                        None,
                    ));
                }
            }
            SirType::Fn { params, ret } => {
                if m.ty(*ret).is_none() {
                    return Err(diag(
                        "sir.validate.type",
                        format!("fn type {t} references unknown result type {ret}"),
                        0,
                        0,
                        None,
                    ));
                }
                for p in m.ids_of(*params) {
                    if m.ty(*p).is_none() {
                        return Err(diag(
                            "sir.validate.type",
                            format!("fn type {t} references unknown param type {p}"),
                            0,
                            0,
                            None,
                        ));
                    }
                }
            }
            SirType::Prim(_) => {}
        }
    }
    for fid in 1..=m.func_count() {
        validate_func(m, fid)?;
    }
    Ok(())
}

fn diag(
    code: &'static str,
    message: String,
    fid: FuncIdx,
    ip: u32,
    op: Option<&'static str>,
) -> ValidateDiag {
    ValidateDiag {
        code,
        message,
        fid,
        ip,
        op,
        src_node_id: 0,
        src_line: 0,
    }
}

fn inst_diag(
    code: &'static str,
    message: String,
    m: &Module,
    fid: FuncIdx,
    ip: u32,
) -> ValidateDiag {
    let f = m.func(fid).expect("validated");
    let inst = &f.insts[ip as usize];
    ValidateDiag {
        code,
        message,
        fid,
        ip,
        op: Some(inst.op.kind_name()),
        src_node_id: inst.src_node_id,
        src_line: inst.src_line,
    }
}

fn slot_kind_of_type(m: &Module, t: u32) -> Option<SlotKind> {
    match m.ty(t)? {
        SirType::Prim(p) => match p {
            Prim::Void => None,
            Prim::I8 => Some(SlotKind::I8),
            Prim::I16 => Some(SlotKind::I16),
            Prim::I32 => Some(SlotKind::I32),
            Prim::I64 => Some(SlotKind::I64),
            Prim::Ptr => Some(SlotKind::Ptr),
            Prim::Bool => Some(SlotKind::Bool),
            Prim::F32 => Some(SlotKind::F32),
            Prim::F64 => Some(SlotKind::F64),
        },
        SirType::Ptr { .. } | SirType::Fn { .. } => Some(SlotKind::Ptr),
    }
}

/// Definitions of an instruction: (slot, kind). Kind `None` means the
/// kind comes from elsewhere (call results resolved by signature).
fn defs(m: &Module, op: &Op) -> Vec<(u32, Option<SlotKind>)> {
    use Op::*;
    match *op {
        ConstI8 { dst, .. } => vec![(dst, Some(SlotKind::I8))],
        ConstI16 { dst, .. } => vec![(dst, Some(SlotKind::I16))],
        ConstI32 { dst, .. } => vec![(dst, Some(SlotKind::I32))],
        ConstI64 { dst, .. } => vec![(dst, Some(SlotKind::I64))],
        ConstBool { dst, .. } => vec![(dst, Some(SlotKind::Bool))],
        ConstF32 { dst, .. } => vec![(dst, Some(SlotKind::F32))],
        ConstF64 { dst, .. } => vec![(dst, Some(SlotKind::F64))],
        ConstPtr { dst, .. } | ConstNullPtr { dst } => vec![(dst, Some(SlotKind::Ptr))],
        ConstBytes {
            dst_ptr, dst_len, ..
        } => vec![(dst_ptr, Some(SlotKind::Ptr)), (dst_len, Some(SlotKind::I64))],
        IntBin { w, dst, .. } => vec![(dst, Some(SlotKind::of_width(w)))],
        IntUn { w, dst, .. } => vec![(dst, Some(SlotKind::of_width(w)))],
        IntCmp { dst, .. } => vec![(dst, Some(SlotKind::Bool))],
        FloatCmp { dst, .. } => vec![(dst, Some(SlotKind::Bool))],
        GlobalAddr { dst, .. } => vec![(dst, Some(SlotKind::Ptr))],
        PtrOffset { dst, .. } | PtrAdd { dst, .. } | PtrSub { dst, .. } => {
            vec![(dst, Some(SlotKind::Ptr))]
        }
        PtrCmp { dst, .. } => vec![(dst, Some(SlotKind::Bool))],
        PtrToI64 { dst, .. } => vec![(dst, Some(SlotKind::I64))],
        PtrFromI64 { dst, .. } => vec![(dst, Some(SlotKind::Ptr))],
        BoolNot { dst, .. } | BoolBin { dst, .. } => vec![(dst, Some(SlotKind::Bool))],
        ZextI32I8 { dst, .. } | ZextI32I16 { dst, .. } | TruncI32I64 { dst, .. } => {
            vec![(dst, Some(SlotKind::I32))]
        }
        ZextI64I32 { dst, .. } | SextI64I32 { dst, .. } => vec![(dst, Some(SlotKind::I64))],
        Select { dst, .. } => vec![(dst, None)],
        Br { args, .. } => m
            .ids_of(args.dst)
            .iter()
            .map(|d| (*d, None))
            .collect(),
        Alloca { dst, .. } => vec![(dst, Some(SlotKind::Ptr))],
        Load { kind, dst, .. } => vec![(dst, Some(SlotKind::of_mem(kind)))],
        CallExtern {
            callee, results, ..
        } => {
            let kinds = m
                .sym(callee)
                .map(|s| m.ids_of(s.sig.results).to_vec())
                .unwrap_or_default();
            results
                .as_slice()
                .iter()
                .enumerate()
                .map(|(i, dst)| {
                    (
                        *dst,
                        kinds.get(i).and_then(|t| slot_kind_of_type(m, *t)),
                    )
                })
                .collect()
        }
        CallFunc {
            callee, results, ..
        } => {
            let kinds = m
                .func(callee)
                .map(|f| m.ids_of(f.sig.results).to_vec())
                .unwrap_or_default();
            results
                .as_slice()
                .iter()
                .enumerate()
                .map(|(i, dst)| {
                    (
                        *dst,
                        kinds.get(i).and_then(|t| slot_kind_of_type(m, *t)),
                    )
                })
                .collect()
        }
        CallFuncPtr { results, .. } => {
            results.as_slice().iter().map(|dst| (*dst, None)).collect()
        }
        _ => Vec::new(),
    }
}

/// Uses of an instruction: (slot, required kind when fixed).
fn uses(m: &Module, op: &Op) -> Vec<(u32, Option<SlotKind>)> {
    use Op::*;
    match *op {
        IntBin { w, a, b, .. } => {
            let k = Some(SlotKind::of_width(w));
            vec![(a, k), (b, k)]
        }
        IntUn { w, x, .. } => vec![(x, Some(SlotKind::of_width(w)))],
        IntCmp { w, a, b, .. } => {
            let k = Some(SlotKind::of_width(w));
            vec![(a, k), (b, k)]
        }
        FloatCmp { op, a, b, .. } => {
            let k = Some(match op {
                crate::module::FloatCmpOp::F32Ueq => SlotKind::F32,
                crate::module::FloatCmpOp::F64Olt => SlotKind::F64,
            });
            vec![(a, k), (b, k)]
        }
        PtrOffset { base, index, .. } => {
            vec![(base, Some(SlotKind::Ptr)), (index, Some(SlotKind::I64))]
        }
        PtrAdd { base, off, .. } | PtrSub { base, off, .. } => {
            vec![(base, Some(SlotKind::Ptr)), (off, Some(SlotKind::I64))]
        }
        PtrCmp { a, b, .. } => vec![(a, Some(SlotKind::Ptr)), (b, Some(SlotKind::Ptr))],
        PtrToI64 { x, .. } => vec![(x, Some(SlotKind::Ptr))],
        PtrFromI64 { x, .. } => vec![(x, Some(SlotKind::I64))],
        BoolNot { x, .. } => vec![(x, Some(SlotKind::Bool))],
        BoolBin { a, b, .. } => vec![(a, Some(SlotKind::Bool)), (b, Some(SlotKind::Bool))],
        ZextI32I8 { x, .. } => vec![(x, Some(SlotKind::I8))],
        ZextI32I16 { x, .. } => vec![(x, Some(SlotKind::I16))],
        ZextI64I32 { x, .. } | SextI64I32 { x, .. } => vec![(x, Some(SlotKind::I32))],
        TruncI32I64 { x, .. } => vec![(x, Some(SlotKind::I64))],
        Select { cond, a, b, .. } => vec![(cond, Some(SlotKind::Bool)), (a, None), (b, None)],
        Br { args, .. } => m.ids_of(args.src).iter().map(|s| (*s, None)).collect(),
        Cbr { cond, .. } => vec![(cond, Some(SlotKind::Bool))],
        Switch { scrut, .. } => vec![(scrut, Some(SlotKind::I32))],
        MemCopy { dst, src, len, .. } => vec![
            (dst, Some(SlotKind::Ptr)),
            (src, Some(SlotKind::Ptr)),
            (len, Some(SlotKind::I64)),
        ],
        MemFill { dst, byte, len } => vec![
            (dst, Some(SlotKind::Ptr)),
            (byte, Some(SlotKind::I8)),
            (len, Some(SlotKind::I64)),
        ],
        Store { kind, addr, value, .. } => vec![
            (addr, Some(SlotKind::Ptr)),
            (value, Some(SlotKind::of_mem(kind))),
        ],
        Load { addr, .. } => vec![(addr, Some(SlotKind::Ptr))],
        CallExtern { args, .. } | CallFunc { args, .. } => {
            m.ids_of(args).iter().map(|a| (*a, None)).collect()
        }
        CallFuncPtr { callee, args, .. } => {
            let mut v = vec![(callee, Some(SlotKind::Ptr))];
            v.extend(m.ids_of(args).iter().map(|a| (*a, None)));
            v
        }
        RetVal { value } => vec![(value, None)],
        ExitVal { code } => vec![(code, Some(SlotKind::I32))],
        _ => Vec::new(),
    }
}

fn branch_targets(m: &Module, op: &Op) -> Vec<u32> {
    match *op {
        Op::Br { target, .. } => vec![target],
        Op::Cbr {
            then_ip, else_ip, ..
        } => vec![then_ip, else_ip],
        Op::Switch {
            case_targets,
            default_ip,
            ..
        } => {
            let mut t = m.ids_of(case_targets).to_vec();
            t.push(default_ip);
            t
        }
        _ => Vec::new(),
    }
}

fn validate_func(m: &Module, fid: FuncIdx) -> Result<(), ValidateDiag> {
    let f = m.func(fid).expect("in range");
    let count = f.insts.len() as u32;
    if count == 0 {
        return Err(diag(
            "sir.validate.cfg",
            "function has no instructions".into(),
            fid,
            0,
            None,
        ));
    }
    if f.value_count > 1 << 20 {
        return Err(diag(
            "sir.validate.inst",
            format!("value count {} exceeds the executor limit", f.value_count),
            fid,
            0,
            None,
        ));
    }

    // Leaders: ip 0 plus every branch target.
    let mut leaders = BTreeSet::new();
    leaders.insert(0u32);
    for (ip, inst) in f.insts.iter().enumerate() {
        for target in branch_targets(m, &inst.op) {
            if target >= count {
                return Err(inst_diag(
                    "sir.validate.cfg",
                    format!("branch target {target} is out of range"),
                    m,
                    fid,
                    ip as u32,
                ));
            }
            leaders.insert(target);
        }
    }

    // Block shape: nothing after a terminator inside a block, and every
    // block ends in a terminator.
    for (ip, inst) in f.insts.iter().enumerate() {
        let ip = ip as u32;
        let next = ip + 1;
        if inst.op.is_terminator() {
            if next < count && !leaders.contains(&next) {
                return Err(inst_diag(
                    "sir.validate.cfg",
                    "statement after terminator in the same block".into(),
                    m,
                    fid,
                    next,
                ));
            }
        } else if next >= count {
            return Err(inst_diag(
                "sir.validate.cfg",
                "function falls off the end without a terminator".into(),
                m,
                fid,
                ip,
            ));
        } else if leaders.contains(&next) {
            return Err(inst_diag(
                "sir.validate.cfg",
                "block does not end in a terminator".into(),
                m,
                fid,
                ip,
            ));
        }
    }

    // Referenced ids and slot ranges.
    for (ip, inst) in f.insts.iter().enumerate() {
        let ip = ip as u32;
        check_refs(m, fid, ip, &inst.op)?;
        for (slot, _) in defs(m, &inst.op).into_iter().chain(uses(m, &inst.op)) {
            if slot >= f.value_count {
                return Err(inst_diag(
                    "sir.validate.slot",
                    format!("value slot {slot} is not below value count {}", f.value_count),
                    m,
                    fid,
                    ip,
                ));
            }
        }
    }

    // Slot kinds: one kind per slot across all definitions.
    let mut kinds: Vec<Option<SlotKind>> = vec![None; f.value_count as usize];
    for (i, t) in m.ids_of(f.sig.params).iter().enumerate() {
        let kind = slot_kind_of_type(m, *t).ok_or_else(|| {
            diag(
                "sir.validate.type",
                format!("parameter {i} has a non-value type"),
                fid,
                0,
                None,
            )
        })?;
        if i < kinds.len() {
            kinds[i] = Some(kind);
        }
    }
    for (ip, inst) in f.insts.iter().enumerate() {
        for (slot, kind) in defs(m, &inst.op) {
            let Some(kind) = kind else { continue };
            match kinds[slot as usize] {
                None => kinds[slot as usize] = Some(kind),
                Some(prev) if prev == kind => {}
                Some(prev) => {
                    return Err(inst_diag(
                        "sir.validate.slot",
                        format!("slot {slot} is defined as {kind:?} but previously as {prev:?}"),
                        m,
                        fid,
                        ip as u32,
                    ));
                }
            }
        }
    }
    for (ip, inst) in f.insts.iter().enumerate() {
        for (slot, want) in uses(m, &inst.op) {
            let (Some(want), Some(have)) = (want, kinds[slot as usize]) else {
                continue;
            };
            if want != have {
                return Err(inst_diag(
                    "sir.validate.slot",
                    format!("slot {slot} holds {have:?} but the operand requires {want:?}"),
                    m,
                    fid,
                    ip as u32,
                ));
            }
        }
    }

    liveness(m, fid, f, &leaders)
}

fn check_refs(m: &Module, fid: FuncIdx, ip: u32, op: &Op) -> Result<(), ValidateDiag> {
    match *op {
        Op::GlobalAddr { global, .. } => {
            if m.global(global).is_none() {
                return Err(inst_diag(
                    "sir.validate.inst",
                    format!("unknown global id {global}"),
                    m,
                    fid,
                    ip,
                ));
            }
        }
        Op::CallExtern { callee, .. } => {
            if m.sym(callee).is_none() {
                return Err(inst_diag(
                    "sir.validate.inst",
                    format!("unknown symbol id {callee}"),
                    m,
                    fid,
                    ip,
                ));
            }
        }
        Op::CallFunc { callee, .. } => {
            if m.func(callee).is_none() {
                return Err(inst_diag(
                    "sir.validate.inst",
                    format!("unknown function id {callee}"),
                    m,
                    fid,
                    ip,
                ));
            }
        }
        Op::Alloca { size, align, .. } => {
            if size == 0 {
                return Err(inst_diag(
                    "sir.validate.inst",
                    "alloca size must be non-zero".into(),
                    m,
                    fid,
                    ip,
                ));
            }
            if align == 0 || !align.is_power_of_two() {
                return Err(inst_diag(
                    "sir.validate.inst",
                    format!("alloca alignment {align} is not a power of two"),
                    m,
                    fid,
                    ip,
                ));
            }
        }
        Op::Br { args, .. } => {
            if args.src.len() != args.dst.len() {
                return Err(inst_diag(
                    "sir.validate.inst",
                    "branch argument source and destination arity differ".into(),
                    m,
                    fid,
                    ip,
                ));
            }
        }
        Op::Switch {
            case_lits,
            case_targets,
            ..
        } => {
            if case_lits.len() != case_targets.len() {
                return Err(inst_diag(
                    "sir.validate.inst",
                    "switch case literal and target arity differ".into(),
                    m,
                    fid,
                    ip,
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Per-block liveness: every slot read must be defined along every
/// predecessor path. Meet is set intersection; the entry block starts
/// with the parameter slots.
fn liveness(
    m: &Module,
    fid: FuncIdx,
    f: &Function,
    leaders: &BTreeSet<u32>,
) -> Result<(), ValidateDiag> {
    let nslots = f.value_count as usize;
    let leaders: Vec<u32> = leaders.iter().copied().collect();
    let block_of = |ip: u32| leaders.partition_point(|l| *l <= ip) - 1;
    let nblocks = leaders.len();

    let block_range = |b: usize| {
        let start = leaders[b];
        let end = leaders.get(b + 1).copied().unwrap_or(f.insts.len() as u32);
        (start, end)
    };

    // Predecessors of each block via the final terminator of every block.
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); nblocks];
    for b in 0..nblocks {
        let (_, end) = block_range(b);
        let term = &f.insts[end as usize - 1].op;
        for target in branch_targets(m, term) {
            let t = block_of(target);
            preds[t].push(b);
        }
    }

    // Defs per block.
    let full: Vec<bool> = vec![true; nslots];
    let mut gen_sets: Vec<Vec<bool>> = vec![vec![false; nslots]; nblocks];
    for b in 0..nblocks {
        let (start, end) = block_range(b);
        for ip in start..end {
            for (slot, _) in defs(m, &f.insts[ip as usize].op) {
                gen_sets[b][slot as usize] = true;
            }
        }
    }

    let param_count = m.ids_of(f.sig.params).len().min(nslots);
    let mut ins: Vec<Vec<bool>> = vec![full.clone(); nblocks];
    let mut entry_in = vec![false; nslots];
    entry_in[..param_count].fill(true);
    ins[0] = entry_in;

    // Fixed point over out = in ∪ gen, in = ∩ preds out.
    loop {
        let mut changed = false;
        for b in 0..nblocks {
            if b == 0 {
                continue;
            }
            let mut new_in = full.clone();
            if preds[b].is_empty() {
                // Unreachable block; treat as nothing defined so its own
                // reads must be locally defined.
                new_in = vec![false; nslots];
            }
            for p in &preds[b] {
                let mut out = ins[*p].clone();
                for (i, g) in gen_sets[*p].iter().enumerate() {
                    if *g {
                        out[i] = true;
                    }
                }
                for i in 0..nslots {
                    new_in[i] = new_in[i] && out[i];
                }
            }
            if new_in != ins[b] {
                ins[b] = new_in;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Check every use against the running defined set.
    for b in 0..nblocks {
        let mut defined = ins[b].clone();
        let (start, end) = block_range(b);
        for ip in start..end {
            let op = &f.insts[ip as usize].op;
            for (slot, _) in uses(m, op) {
                if !defined[slot as usize] {
                    return Err(inst_diag(
                        "sir.validate.slot",
                        format!("value slot {slot} is read before being defined on every path"),
                        m,
                        fid,
                        ip,
                    ));
                }
            }
            for (slot, _) in defs(m, op) {
                defined[slot as usize] = true;
            }
        }
    }
    Ok(())
}
