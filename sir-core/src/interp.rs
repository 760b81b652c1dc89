//! Deterministic slot-table interpreter.
//!
//! Executes a module's entry function by allocating a zeroed slot table
//! and stepping instructions by ip. Every operand read is typed; a kind
//! mismatch fails with `invalid`. Loads and stores validate guest
//! pointers through the arena. No clock and no randomness on the hot
//! path.

use sem_asm::ZiError;
use sem_rt::{GuestPtr, SirHost};
use tracing::trace;

use crate::module::{
    fn_ptr_target, BoolBinOp, FloatCmpOp, FuncIdx, IntBinOp, IntCmpOp, IntUnOp, MemKind, Module,
    Op, ValId, Width,
};

/// Call-frame recursion limit.
const MAX_DEPTH: u32 = 512;

/// Executor limit on the per-function slot table size.
const MAX_VALUE_COUNT: u32 = 1 << 20;

/// A typed runtime value held in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Value {
    /// Slot has not been written yet.
    #[default]
    Invalid,
    /// 8-bit integer.
    I8(u8),
    /// 16-bit integer.
    I16(u16),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// Guest pointer.
    Ptr(u64),
    /// Boolean.
    Bool(bool),
    /// binary32 bits.
    F32(u32),
    /// binary64 bits.
    F64(u64),
}

/// Execution failure with instruction context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at f{fid} ip {ip} ({op})")]
pub struct ExecError {
    /// Taxonomy code.
    pub kind: ZiError,
    /// Function id.
    pub fid: FuncIdx,
    /// Instruction index.
    pub ip: u32,
    /// Opcode name.
    pub op: &'static str,
}

impl ExecError {
    /// The negative wire code of the failure.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

/// Memory event kinds reported to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemEvent {
    /// A read from guest memory.
    Read,
    /// A write to guest memory.
    Write,
}

/// Optional execution observer; callbacks are best-effort and must not
/// affect execution.
pub trait ExecObserver {
    /// One instruction is about to execute.
    fn on_step(&mut self, fid: FuncIdx, ip: u32, op: &'static str) {
        let _ = (fid, ip, op);
    }

    /// Guest memory was accessed.
    fn on_mem(&mut self, fid: FuncIdx, ip: u32, kind: MemEvent, addr: GuestPtr, size: u32) {
        let _ = (fid, ip, kind, addr, size);
    }

    /// A host primitive was dispatched.
    fn on_hostcall(&mut self, fid: FuncIdx, ip: u32, callee: &str, rc: i32) {
        let _ = (fid, ip, callee, rc);
    }
}

/// Observer that ignores everything.
pub struct NoObserver;

impl ExecObserver for NoObserver {}

enum Flow {
    Next,
    Jump(u32),
    Exit(i32),
    Return(Option<Value>),
}

enum FrameOutcome {
    Exit(i32),
    Return(Option<Value>),
}

/// Runs the module entry function. Returns its exit code, or a typed
/// error carrying the failing instruction context.
pub fn run(m: &Module, host: &mut dyn SirHost) -> Result<i32, ExecError> {
    run_with_observer(m, host, &mut NoObserver)
}

/// Runs with an execution observer attached.
pub fn run_with_observer(
    m: &Module,
    host: &mut dyn SirHost,
    obs: &mut dyn ExecObserver,
) -> Result<i32, ExecError> {
    let entry = m.entry();
    let ectx = |kind| ExecError {
        kind,
        fid: entry,
        ip: 0,
        op: "entry",
    };
    if m.func(entry).is_none() {
        return Err(ectx(ZiError::Invalid));
    }

    // Materialize globals into the arena before the first instruction.
    let mut globals: Vec<GuestPtr> = Vec::with_capacity(m.global_count() as usize);
    for g in 1..=m.global_count() {
        let global = m.global(g).expect("in range");
        let addr = host.mem_mut().alloc(global.size, global.align);
        if addr == 0 {
            return Err(ectx(ZiError::Oom));
        }
        let init = m.bytes_of(global.init);
        if !init.is_empty() {
            let len = init.len().min(global.size as usize) as u32;
            let dst = host
                .mem_mut()
                .map_rw(addr, len)
                .map_err(|e| ectx(e))?;
            dst.copy_from_slice(&init[..len as usize]);
        }
        globals.push(addr);
    }

    match exec_func(m, host, obs, &globals, entry, &[], 0)? {
        FrameOutcome::Exit(code) => Ok(code),
        FrameOutcome::Return(None) => Ok(0),
        FrameOutcome::Return(Some(Value::I32(v))) => Ok(v),
        FrameOutcome::Return(Some(_)) => Err(ectx(ZiError::Invalid)),
    }
}

fn get(vals: &[Value], id: ValId) -> Result<Value, ZiError> {
    vals.get(id as usize).copied().ok_or(ZiError::Bounds)
}

fn set(vals: &mut [Value], id: ValId, v: Value) -> Result<(), ZiError> {
    *vals.get_mut(id as usize).ok_or(ZiError::Bounds)? = v;
    Ok(())
}

fn as_i32(v: Value) -> Result<i32, ZiError> {
    match v {
        Value::I32(x) => Ok(x),
        _ => Err(ZiError::Invalid),
    }
}

fn as_i64(v: Value) -> Result<i64, ZiError> {
    match v {
        Value::I64(x) => Ok(x),
        _ => Err(ZiError::Invalid),
    }
}

fn as_ptr(v: Value) -> Result<u64, ZiError> {
    match v {
        Value::Ptr(p) => Ok(p),
        _ => Err(ZiError::Invalid),
    }
}

fn as_bool(v: Value) -> Result<bool, ZiError> {
    match v {
        Value::Bool(b) => Ok(b),
        _ => Err(ZiError::Invalid),
    }
}

fn as_len32(v: Value) -> Result<u32, ZiError> {
    let n = as_i64(v)?;
    if !(0..=i64::from(i32::MAX)).contains(&n) {
        return Err(ZiError::Invalid);
    }
    Ok(n as u32)
}

fn int_bin32(op: IntBinOp, a: i32, b: i32) -> Result<i32, ZiError> {
    use IntBinOp::*;
    Ok(match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Shl => a.wrapping_shl(b as u32),
        ShrS => a.wrapping_shr(b as u32),
        ShrU => ((a as u32).wrapping_shr(b as u32)) as i32,
        DivSTrap => {
            if b == 0 || (a == i32::MIN && b == -1) {
                return Err(ZiError::Invalid);
            }
            a / b
        }
        DivSSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            a.saturating_div(b)
        }
        DivUTrap | DivUSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            ((a as u32) / (b as u32)) as i32
        }
        RemSTrap | RemSSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            a.wrapping_rem(b)
        }
        RemUTrap | RemUSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            ((a as u32) % (b as u32)) as i32
        }
    })
}

fn int_bin64(op: IntBinOp, a: i64, b: i64) -> Result<i64, ZiError> {
    use IntBinOp::*;
    Ok(match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Shl => a.wrapping_shl(b as u32),
        ShrS => a.wrapping_shr(b as u32),
        ShrU => ((a as u64).wrapping_shr(b as u32)) as i64,
        DivSTrap => {
            if b == 0 || (a == i64::MIN && b == -1) {
                return Err(ZiError::Invalid);
            }
            a / b
        }
        DivSSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            a.saturating_div(b)
        }
        DivUTrap | DivUSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            ((a as u64) / (b as u64)) as i64
        }
        RemSTrap | RemSSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            a.wrapping_rem(b)
        }
        RemUTrap | RemUSat => {
            if b == 0 {
                return Err(ZiError::Invalid);
            }
            ((a as u64) % (b as u64)) as i64
        }
    })
}

fn int_cmp32(op: IntCmpOp, a: i32, b: i32) -> bool {
    use IntCmpOp::*;
    match op {
        Eq => a == b,
        Ne => a != b,
        Slt => a < b,
        Sle => a <= b,
        Sgt => a > b,
        Sge => a >= b,
        Ult => (a as u32) < (b as u32),
        Ule => (a as u32) <= (b as u32),
        Ugt => (a as u32) > (b as u32),
        Uge => (a as u32) >= (b as u32),
    }
}

fn int_cmp64(op: IntCmpOp, a: i64, b: i64) -> bool {
    use IntCmpOp::*;
    match op {
        Eq => a == b,
        Ne => a != b,
        Slt => a < b,
        Sle => a <= b,
        Sgt => a > b,
        Sge => a >= b,
        Ult => (a as u64) < (b as u64),
        Ule => (a as u64) <= (b as u64),
        Ugt => (a as u64) > (b as u64),
        Uge => (a as u64) >= (b as u64),
    }
}

fn store_bytes(value: Value, kind: MemKind) -> Result<([u8; 8], u32), ZiError> {
    let mut out = [0u8; 8];
    let size = kind.size();
    match (kind, value) {
        (MemKind::I8, Value::I8(v)) => out[..1].copy_from_slice(&v.to_le_bytes()),
        (MemKind::I16, Value::I16(v)) => out[..2].copy_from_slice(&v.to_le_bytes()),
        (MemKind::I32, Value::I32(v)) => out[..4].copy_from_slice(&v.to_le_bytes()),
        (MemKind::I64, Value::I64(v)) => out[..8].copy_from_slice(&v.to_le_bytes()),
        (MemKind::Ptr, Value::Ptr(v)) => out[..8].copy_from_slice(&v.to_le_bytes()),
        (MemKind::F32, Value::F32(bits)) => out[..4].copy_from_slice(&bits.to_le_bytes()),
        (MemKind::F64, Value::F64(bits)) => out[..8].copy_from_slice(&bits.to_le_bytes()),
        _ => return Err(ZiError::Invalid),
    }
    Ok((out, size))
}

fn load_value(bytes: &[u8], kind: MemKind) -> Value {
    match kind {
        MemKind::I8 => Value::I8(bytes[0]),
        MemKind::I16 => Value::I16(u16::from_le_bytes([bytes[0], bytes[1]])),
        MemKind::I32 => Value::I32(i32::from_le_bytes(bytes[..4].try_into().expect("sized"))),
        MemKind::I64 => Value::I64(i64::from_le_bytes(bytes[..8].try_into().expect("sized"))),
        MemKind::Ptr => Value::Ptr(u64::from_le_bytes(bytes[..8].try_into().expect("sized"))),
        MemKind::F32 => Value::F32(u32::from_le_bytes(bytes[..4].try_into().expect("sized"))),
        MemKind::F64 => Value::F64(u64::from_le_bytes(bytes[..8].try_into().expect("sized"))),
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_func(
    m: &Module,
    host: &mut dyn SirHost,
    obs: &mut dyn ExecObserver,
    globals: &[GuestPtr],
    fid: FuncIdx,
    args: &[Value],
    depth: u32,
) -> Result<FrameOutcome, ExecError> {
    if depth > MAX_DEPTH {
        return Err(ExecError {
            kind: ZiError::Internal,
            fid,
            ip: 0,
            op: "call",
        });
    }
    let f = m.func(fid).ok_or(ExecError {
        kind: ZiError::Noent,
        fid,
        ip: 0,
        op: "call",
    })?;
    if f.value_count > MAX_VALUE_COUNT {
        return Err(ExecError {
            kind: ZiError::Invalid,
            fid,
            ip: 0,
            op: "entry",
        });
    }
    let mut vals: Vec<Value> = vec![Value::Invalid; f.value_count as usize];
    for (i, a) in args.iter().enumerate() {
        if i < vals.len() {
            vals[i] = *a;
        }
    }

    let mut ip: u32 = 0;
    while (ip as usize) < f.insts.len() {
        let inst = &f.insts[ip as usize];
        let op_name = inst.op.kind_name();
        obs.on_step(fid, ip, op_name);
        trace!(target: "sir_core::interp", fid, ip, op = op_name);

        let flow = step(m, host, obs, globals, fid, ip, &inst.op, &mut vals, depth)
            .map_err(|kind| ExecError {
                kind,
                fid,
                ip,
                op: op_name,
            })?;
        match flow {
            Flow::Next => ip += 1,
            Flow::Jump(target) => ip = target,
            Flow::Exit(code) => return Ok(FrameOutcome::Exit(code)),
            Flow::Return(v) => return Ok(FrameOutcome::Return(v)),
        }
    }
    // Falling off the end of the stream completes the frame with no value.
    Ok(FrameOutcome::Return(None))
}

#[allow(clippy::too_many_arguments)]
fn step(
    m: &Module,
    host: &mut dyn SirHost,
    obs: &mut dyn ExecObserver,
    globals: &[GuestPtr],
    fid: FuncIdx,
    ip: u32,
    op: &Op,
    vals: &mut [Value],
    depth: u32,
) -> Result<Flow, ZiError> {
    match *op {
        Op::ConstI8 { dst, v } => set(vals, dst, Value::I8(v))?,
        Op::ConstI16 { dst, v } => set(vals, dst, Value::I16(v))?,
        Op::ConstI32 { dst, v } => set(vals, dst, Value::I32(v))?,
        Op::ConstI64 { dst, v } => set(vals, dst, Value::I64(v))?,
        Op::ConstBool { dst, v } => set(vals, dst, Value::Bool(v))?,
        Op::ConstF32 { dst, bits } => set(vals, dst, Value::F32(bits))?,
        Op::ConstF64 { dst, bits } => set(vals, dst, Value::F64(bits))?,
        Op::ConstPtr { dst, v } => set(vals, dst, Value::Ptr(v))?,
        Op::ConstNullPtr { dst } => set(vals, dst, Value::Ptr(0))?,
        Op::ConstBytes {
            dst_ptr,
            dst_len,
            bytes,
        } => {
            let data = m.bytes_of(bytes);
            let len = data.len() as u32;
            let p = host.zi_alloc(len);
            if p == 0 && len > 0 {
                return Err(ZiError::Oom);
            }
            if len > 0 {
                host.mem_mut().map_rw(p, len)?.copy_from_slice(data);
                obs.on_mem(fid, ip, MemEvent::Write, p, len);
            }
            set(vals, dst_ptr, Value::Ptr(p))?;
            set(vals, dst_len, Value::I64(i64::from(len)))?;
        }

        Op::IntBin { w, op, dst, a, b } => {
            let v = match w {
                Width::W32 => Value::I32(int_bin32(op, as_i32(get(vals, a)?)?, as_i32(get(vals, b)?)?)?),
                Width::W64 => Value::I64(int_bin64(op, as_i64(get(vals, a)?)?, as_i64(get(vals, b)?)?)?),
            };
            set(vals, dst, v)?;
        }
        Op::IntUn { w, op, dst, x } => {
            let v = match (w, op) {
                (Width::W32, IntUnOp::Not) => Value::I32(!as_i32(get(vals, x)?)?),
                (Width::W32, IntUnOp::Neg) => Value::I32(as_i32(get(vals, x)?)?.wrapping_neg()),
                (Width::W64, IntUnOp::Not) => Value::I64(!as_i64(get(vals, x)?)?),
                (Width::W64, IntUnOp::Neg) => Value::I64(as_i64(get(vals, x)?)?.wrapping_neg()),
            };
            set(vals, dst, v)?;
        }
        Op::IntCmp { w, op, dst, a, b } => {
            let v = match w {
                Width::W32 => int_cmp32(op, as_i32(get(vals, a)?)?, as_i32(get(vals, b)?)?),
                Width::W64 => int_cmp64(op, as_i64(get(vals, a)?)?, as_i64(get(vals, b)?)?),
            };
            set(vals, dst, Value::Bool(v))?;
        }
        Op::FloatCmp { op, dst, a, b } => {
            let v = match op {
                FloatCmpOp::F32Ueq => {
                    let (x, y) = match (get(vals, a)?, get(vals, b)?) {
                        (Value::F32(x), Value::F32(y)) => {
                            (f32::from_bits(x), f32::from_bits(y))
                        }
                        _ => return Err(ZiError::Invalid),
                    };
                    x.is_nan() || y.is_nan() || x == y
                }
                FloatCmpOp::F64Olt => {
                    let (x, y) = match (get(vals, a)?, get(vals, b)?) {
                        (Value::F64(x), Value::F64(y)) => {
                            (f64::from_bits(x), f64::from_bits(y))
                        }
                        _ => return Err(ZiError::Invalid),
                    };
                    !x.is_nan() && !y.is_nan() && x < y
                }
            };
            set(vals, dst, Value::Bool(v))?;
        }

        Op::GlobalAddr { dst, global } => {
            let addr = *globals
                .get(global.wrapping_sub(1) as usize)
                .ok_or(ZiError::Noent)?;
            set(vals, dst, Value::Ptr(addr))?;
        }
        Op::PtrOffset {
            dst,
            base,
            index,
            scale,
        } => {
            let base = as_ptr(get(vals, base)?)?;
            let index = as_i64(get(vals, index)?)?;
            let delta = (index as u64).wrapping_mul(u64::from(scale));
            set(vals, dst, Value::Ptr(base.wrapping_add(delta)))?;
        }
        Op::PtrAdd { dst, base, off } => {
            let base = as_ptr(get(vals, base)?)?;
            let off = as_i64(get(vals, off)?)?;
            set(vals, dst, Value::Ptr(base.wrapping_add(off as u64)))?;
        }
        Op::PtrSub { dst, base, off } => {
            let base = as_ptr(get(vals, base)?)?;
            let off = as_i64(get(vals, off)?)?;
            set(vals, dst, Value::Ptr(base.wrapping_sub(off as u64)))?;
        }
        Op::PtrCmp { ne, dst, a, b } => {
            let a = as_ptr(get(vals, a)?)?;
            let b = as_ptr(get(vals, b)?)?;
            set(vals, dst, Value::Bool(if ne { a != b } else { a == b }))?;
        }
        Op::PtrToI64 { dst, x } => {
            let p = as_ptr(get(vals, x)?)?;
            set(vals, dst, Value::I64(p as i64))?;
        }
        Op::PtrFromI64 { dst, x } => {
            let v = as_i64(get(vals, x)?)?;
            set(vals, dst, Value::Ptr(v as u64))?;
        }

        Op::BoolNot { dst, x } => {
            let v = as_bool(get(vals, x)?)?;
            set(vals, dst, Value::Bool(!v))?;
        }
        Op::BoolBin { op, dst, a, b } => {
            let a = as_bool(get(vals, a)?)?;
            let b = as_bool(get(vals, b)?)?;
            let v = match op {
                BoolBinOp::And => a && b,
                BoolBinOp::Or => a || b,
                BoolBinOp::Xor => a != b,
            };
            set(vals, dst, Value::Bool(v))?;
        }

        Op::ZextI32I8 { dst, x } => {
            let v = match get(vals, x)? {
                Value::I8(v) => v,
                _ => return Err(ZiError::Invalid),
            };
            set(vals, dst, Value::I32(i32::from(v)))?;
        }
        Op::ZextI32I16 { dst, x } => {
            let v = match get(vals, x)? {
                Value::I16(v) => v,
                _ => return Err(ZiError::Invalid),
            };
            set(vals, dst, Value::I32(i32::from(v)))?;
        }
        Op::ZextI64I32 { dst, x } => {
            let v = as_i32(get(vals, x)?)?;
            set(vals, dst, Value::I64(i64::from(v as u32)))?;
        }
        Op::SextI64I32 { dst, x } => {
            let v = as_i32(get(vals, x)?)?;
            set(vals, dst, Value::I64(i64::from(v)))?;
        }
        Op::TruncI32I64 { dst, x } => {
            let v = as_i64(get(vals, x)?)?;
            set(vals, dst, Value::I32(v as i32))?;
        }

        Op::Select { dst, cond, a, b } => {
            let cond = as_bool(get(vals, cond)?)?;
            let a = get(vals, a)?;
            let b = get(vals, b)?;
            if core::mem::discriminant(&a) != core::mem::discriminant(&b) {
                return Err(ZiError::Invalid);
            }
            set(vals, dst, if cond { a } else { b })?;
        }

        Op::Br { target, args } => {
            let src = m.ids_of(args.src);
            let dst = m.ids_of(args.dst);
            if src.len() != dst.len() {
                return Err(ZiError::Invalid);
            }
            let moved: Vec<Value> = src
                .iter()
                .map(|s| get(vals, *s))
                .collect::<Result<_, _>>()?;
            for (d, v) in dst.iter().zip(moved) {
                set(vals, *d, v)?;
            }
            return Ok(Flow::Jump(target));
        }
        Op::Cbr {
            cond,
            then_ip,
            else_ip,
        } => {
            let cond = as_bool(get(vals, cond)?)?;
            return Ok(Flow::Jump(if cond { then_ip } else { else_ip }));
        }
        Op::Switch {
            scrut,
            case_lits,
            case_targets,
            default_ip,
        } => {
            let scrut = as_i32(get(vals, scrut)?)?;
            let targets = m.ids_of(case_targets);
            for (i, lit) in m.lits_of(case_lits).enumerate() {
                if lit == scrut {
                    let target = targets.get(i).copied().ok_or(ZiError::Invalid)?;
                    return Ok(Flow::Jump(target));
                }
            }
            return Ok(Flow::Jump(default_ip));
        }

        Op::MemCopy {
            dst,
            src,
            len,
            overlap_allow,
        } => {
            let dst = as_ptr(get(vals, dst)?)?;
            let src = as_ptr(get(vals, src)?)?;
            let len = as_len32(get(vals, len)?)?;
            host.mem_mut().copy(dst, src, len, overlap_allow)?;
            obs.on_mem(fid, ip, MemEvent::Read, src, len);
            obs.on_mem(fid, ip, MemEvent::Write, dst, len);
        }
        Op::MemFill { dst, byte, len } => {
            let dst = as_ptr(get(vals, dst)?)?;
            let byte = match get(vals, byte)? {
                Value::I8(b) => b,
                _ => return Err(ZiError::Invalid),
            };
            let len = as_len32(get(vals, len)?)?;
            host.mem_mut().fill(dst, byte, len)?;
            obs.on_mem(fid, ip, MemEvent::Write, dst, len);
        }
        Op::Alloca { dst, size, align } => {
            let p = host.mem_mut().alloc(size, align);
            if p == 0 {
                return Err(ZiError::Oom);
            }
            set(vals, dst, Value::Ptr(p))?;
        }
        Op::Store {
            kind,
            addr,
            value,
            align: _,
        } => {
            let addr = as_ptr(get(vals, addr)?)?;
            let (bytes, size) = store_bytes(get(vals, value)?, kind)?;
            host.mem_mut()
                .map_rw(addr, size)?
                .copy_from_slice(&bytes[..size as usize]);
            obs.on_mem(fid, ip, MemEvent::Write, addr, size);
        }
        Op::Load {
            kind,
            dst,
            addr,
            align: _,
        } => {
            let addr = as_ptr(get(vals, addr)?)?;
            let size = kind.size();
            let bytes = host.mem().map_ro(addr, size)?.to_vec();
            obs.on_mem(fid, ip, MemEvent::Read, addr, size);
            set(vals, dst, load_value(&bytes, kind))?;
        }

        Op::CallExtern {
            callee,
            args,
            results,
        } => {
            let sym = m.sym(callee).ok_or(ZiError::Noent)?;
            let name = m.str_of(sym.name);
            let arg_ids = m.ids_of(args);
            let rc = dispatch_extern(m, host, name, arg_ids, results.as_slice(), vals)?;
            obs.on_hostcall(fid, ip, name, rc);
        }
        Op::CallFunc {
            callee,
            args,
            results,
        } => {
            let outcome = call_in_module(m, host, obs, globals, callee, args, vals, depth)?;
            match outcome {
                FrameOutcome::Exit(code) => return Ok(Flow::Exit(code)),
                FrameOutcome::Return(v) => {
                    write_call_result(results.as_slice(), v, vals)?;
                }
            }
        }
        Op::CallFuncPtr {
            callee,
            args,
            results,
        } => {
            let ptr = as_ptr(get(vals, callee)?)?;
            let target = fn_ptr_target(ptr).ok_or(ZiError::Invalid)?;
            let outcome = call_in_module(m, host, obs, globals, target, args, vals, depth)?;
            match outcome {
                FrameOutcome::Exit(code) => return Ok(Flow::Exit(code)),
                FrameOutcome::Return(v) => {
                    write_call_result(results.as_slice(), v, vals)?;
                }
            }
        }

        Op::Ret => return Ok(Flow::Return(None)),
        Op::RetVal { value } => return Ok(Flow::Return(Some(get(vals, value)?))),
        Op::Exit { code } => return Ok(Flow::Exit(code)),
        Op::ExitVal { code } => return Ok(Flow::Exit(as_i32(get(vals, code)?)?)),
    }
    Ok(Flow::Next)
}

fn write_call_result(
    results: &[ValId],
    value: Option<Value>,
    vals: &mut [Value],
) -> Result<(), ZiError> {
    match results {
        [] => Ok(()),
        [dst] => {
            let v = value.ok_or(ZiError::Invalid)?;
            set(vals, *dst, v)
        }
        _ => Err(ZiError::Invalid),
    }
}

#[allow(clippy::too_many_arguments)]
fn call_in_module(
    m: &Module,
    host: &mut dyn SirHost,
    obs: &mut dyn ExecObserver,
    globals: &[GuestPtr],
    callee: FuncIdx,
    args: crate::module::IdSlice,
    vals: &[Value],
    depth: u32,
) -> Result<FrameOutcome, ZiError> {
    let target = m.func(callee).ok_or(ZiError::Noent)?;
    let arg_ids = m.ids_of(args);
    if arg_ids.len() != m.ids_of(target.sig.params).len() {
        return Err(ZiError::Invalid);
    }
    let arg_vals: Vec<Value> = arg_ids
        .iter()
        .map(|a| get(vals, *a))
        .collect::<Result<_, _>>()?;
    exec_func(m, host, obs, globals, callee, &arg_vals, depth + 1).map_err(|e| e.kind)
}

/// Dispatches one extern call to the hard-wired host primitive table.
/// Returns the host return code for observer reporting.
fn dispatch_extern(
    _m: &Module,
    host: &mut dyn SirHost,
    name: &str,
    arg_ids: &[u32],
    results: &[ValId],
    vals: &mut [Value],
) -> Result<i32, ZiError> {
    let arg = |i: usize| -> Result<Value, ZiError> {
        get(vals, *arg_ids.get(i).ok_or(ZiError::Invalid)?)
    };
    match name {
        "zi_write" => {
            if arg_ids.len() != 3 {
                return Err(ZiError::Invalid);
            }
            let h = as_i32(arg(0)?)?;
            let p = as_ptr(arg(1)?)?;
            let len = as_len32(arg(2)?)?;
            let n = host.zi_write(h, p, len)?;
            write_call_result(results, Some(Value::I32(n as i32)), vals)?;
            Ok(n as i32)
        }
        "zi_end" => {
            if arg_ids.len() != 1 {
                return Err(ZiError::Invalid);
            }
            let h = as_i32(arg(0)?)?;
            host.zi_end(h)?;
            write_call_result(results, Some(Value::I32(0)), vals)?;
            Ok(0)
        }
        "zi_alloc" => {
            if arg_ids.len() != 1 {
                return Err(ZiError::Invalid);
            }
            let size = as_i32(arg(0)?)?;
            if size < 0 {
                return Err(ZiError::Invalid);
            }
            let p = host.zi_alloc(size as u32);
            if p == 0 {
                return Err(ZiError::Oom);
            }
            write_call_result(results, Some(Value::Ptr(p)), vals)?;
            Ok(0)
        }
        "zi_free" => {
            if arg_ids.len() != 1 {
                return Err(ZiError::Invalid);
            }
            let p = as_ptr(arg(0)?)?;
            host.zi_free(p)?;
            write_call_result(results, Some(Value::I32(0)), vals)?;
            Ok(0)
        }
        "zi_telemetry" => {
            if arg_ids.len() != 4 {
                return Err(ZiError::Invalid);
            }
            let topic = as_ptr(arg(0)?)?;
            let topic_len = as_i32(arg(1)?)?;
            let msg = as_ptr(arg(2)?)?;
            let msg_len = as_i32(arg(3)?)?;
            if topic_len < 0 || msg_len < 0 {
                return Err(ZiError::Invalid);
            }
            host.zi_telemetry(topic, topic_len as u32, msg, msg_len as u32)?;
            write_call_result(results, Some(Value::I32(0)), vals)?;
            Ok(0)
        }
        _ => Err(ZiError::Nosys),
    }
}
