//! `Bin` lowering: the operator id decides arity, operand typing and the
//! target opcode. No coercions anywhere; both operands must commit to the
//! exact type the operator requires.

use sem_asm::{OpId, TypeId};
use serde_json::json;

use crate::json::{Json, Obj};

use super::expr::{lower_expr, name_id_text, probe_expr_type, probe_ptr_pointee, slot_addr_typeinfo};
use super::{err, vref, EmitCtx, EmitError, Result, SirExpr};

/// Lowers a `Bin` expression. Assignments route their store into the
/// ambient effect list and evaluate to the stored value.
pub(crate) fn lower_bin(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
) -> Result<SirExpr> {
    let (op, lhs, rhs) = bin_parts(obj)?;

    if op == OpId::Assign {
        let (store_id, value) = lower_assign(ctx, lhs, rhs, expected)?;
        ctx.effects.push(store_id);
        return Ok(value);
    }

    if op.is_cmp() {
        return lower_cmp(ctx, op, lhs, rhs, expected);
    }

    if op.is_short_circuit() {
        let a = lower_expr(ctx, lhs, Some(TypeId::Bool))?;
        let b = lower_expr(ctx, rhs, Some(TypeId::Bool))?;
        if expected != Some(TypeId::Bool) {
            return err("short-circuit Bin result type does not match expected type");
        }
        let tag = if op == OpId::BoolAndSc {
            "sem.and_sc"
        } else {
            "sem.or_sc"
        };
        ctx.sem_v1 = true;
        ctx.emit_type_if_needed(TypeId::Bool)?;
        let id = ctx.new_node_id();
        // The right operand is encoded as a branch-value so the backend
        // can evaluate it lazily.
        ctx.node_line(
            &id,
            tag,
            Some("t:bool"),
            json!({"args": [vref(&a.id), {"kind": "val", "v": vref(&b.id)}]}),
        )?;
        return Ok(SirExpr {
            id,
            ty: TypeId::Bool,
            ptr_of: None,
            sir_type_id: "t:bool".into(),
        });
    }

    // Arithmetic / bitwise / shift: expected type must commit i32 or i64.
    let width = match expected {
        Some(TypeId::I32) => TypeId::I32,
        Some(TypeId::I64) => TypeId::I64,
        _ => {
            return err(format!(
                "{op} requires expected type i32 or i64 (no inference)"
            ))
        }
    };
    let a = lower_expr(ctx, lhs, Some(width))?;
    let b = lower_expr(ctx, rhs, Some(width))?;
    if a.ty != width || b.ty != width {
        return err(format!("Bin operands must match expected type for {op}"));
    }
    let w = width.as_str();
    let tag = match op {
        OpId::Add => format!("{w}.add"),
        OpId::Sub => format!("{w}.sub"),
        OpId::Mul => format!("{w}.mul"),
        // Committed MVP mapping: signed trapping division, unsigned
        // trapping remainder.
        OpId::Div => format!("{w}.div.s.trap"),
        OpId::Rem => format!("{w}.rem.u.trap"),
        OpId::Shl => format!("{w}.shl"),
        OpId::Shr => format!("{w}.shr.u"),
        OpId::BitAnd => format!("{w}.and"),
        OpId::BitOr => format!("{w}.or"),
        OpId::BitXor => format!("{w}.xor"),
        other => return err(format!("Bin op {other} not supported")),
    };
    ctx.emit_type_if_needed(width)?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        &tag,
        Some(width.sir_type_id()),
        json!({"args": [vref(&a.id), vref(&b.id)]}),
    )?;
    Ok(SirExpr {
        id,
        ty: width,
        ptr_of: None,
        sir_type_id: width.sir_type_id().to_owned(),
    })
}

/// Splits a `Bin` node, enforcing that `op` appears before `lhs`/`rhs`.
fn bin_parts<'a>(obj: &'a Obj) -> Result<(OpId, &'a Obj, &'a Obj)> {
    let op_pos = obj
        .key_pos("op")
        .ok_or_else(|| EmitError::new("Bin missing required field op"))?;
    for key in ["lhs", "rhs"] {
        if let Some(pos) = obj.key_pos(key) {
            if pos < op_pos {
                return err("Bin.op must appear before lhs/rhs (no implicit context)");
            }
        }
    }
    let op = obj
        .get("op")
        .and_then(Json::as_str)
        .and_then(OpId::parse)
        .ok_or_else(|| EmitError::new("Bin.op must be a semantic operator id"))?;
    let lhs = obj
        .get("lhs")
        .and_then(Json::as_obj)
        .ok_or_else(|| EmitError::new("Bin missing required field lhs"))?;
    let rhs = obj
        .get("rhs")
        .and_then(Json::as_obj)
        .ok_or_else(|| EmitError::new("Bin missing required field rhs"))?;
    Ok((op, lhs, rhs))
}

fn lower_cmp(
    ctx: &mut EmitCtx<'_>,
    op: OpId,
    lhs: &Obj,
    rhs: &Obj,
    expected: Option<TypeId>,
) -> Result<SirExpr> {
    // Probe both operands; literals are only inferable through the
    // explicit default-int policy.
    let lhs_probe = probe_expr_type(ctx, lhs);
    let rhs_probe = probe_expr_type(ctx, rhs);
    let operand_ty = match (lhs_probe, rhs_probe) {
        (Some(a), Some(b)) if a != b => {
            return err("comparison operands have mismatched types (no implicit coercions)")
        }
        (Some(a), _) => a,
        (None, Some(b)) => b,
        (None, None) => {
            return err(
                "comparison requires at least one operand with an explicit type (e.g. Name of a \
                 typed local); no inference for literals",
            )
        }
    };
    if operand_ty != TypeId::I32 && operand_ty != TypeId::I64 {
        return err("comparison operands must be i32 or i64");
    }

    let a = lower_expr(ctx, lhs, Some(operand_ty))?;
    let b = lower_expr(ctx, rhs, Some(operand_ty))?;
    if a.ty != operand_ty || b.ty != operand_ty {
        return err("comparison operands must match committed operand type");
    }
    if expected != Some(TypeId::Bool) {
        return err("comparison result type does not match expected type (bool)");
    }

    let w = operand_ty.as_str();
    let tag = match op {
        OpId::Eq => format!("{w}.cmp.eq"),
        OpId::Ne => format!("{w}.cmp.ne"),
        OpId::Lt => format!("{w}.cmp.slt"),
        OpId::Lte => format!("{w}.cmp.sle"),
        OpId::Gt => format!("{w}.cmp.sgt"),
        OpId::Gte => format!("{w}.cmp.sge"),
        _ => unreachable!("caller filtered to comparison ops"),
    };
    ctx.emit_type_if_needed(TypeId::Bool)?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        &tag,
        Some("t:bool"),
        json!({"args": [vref(&a.id), vref(&b.id)]}),
    )?;
    Ok(SirExpr {
        id,
        ty: TypeId::Bool,
        ptr_of: None,
        sir_type_id: "t:bool".into(),
    })
}

/// Lowers `core.assign`: commits the store type from the lvalue shape,
/// lowers the lvalue address first and the rhs second, and emits the
/// aligned store. Returns the store node id and the rhs value.
pub(crate) fn lower_assign(
    ctx: &mut EmitCtx<'_>,
    lhs: &Obj,
    rhs: &Obj,
    expected: Option<TypeId>,
) -> Result<(String, SirExpr)> {
    // The lvalue shape commits the store type; Var-style defaults never
    // apply here.
    let (store_ty, lhs_ptr_of) = match lhs.kind() {
        Some("Name") => {
            let name = name_id_text(lhs)?;
            let Some(local) = ctx.lookup_local(&name) else {
                return err("assignment to unknown local");
            };
            if !local.is_slot {
                return err(format!(
                    "assignment target {name:?} is not slot-backed (not assignable)"
                ));
            }
            (local.ti.base, local.ti.ptr_of)
        }
        Some("Deref") => {
            let inner = lhs
                .get("expr")
                .and_then(Json::as_obj)
                .ok_or_else(|| EmitError::new("Deref requires field: expr"))?;
            match probe_ptr_pointee(ctx, inner) {
                Some(TypeId::Void) => {
                    return err("cannot assign through ptr(void) (opaque pointer)")
                }
                Some(t) => (t, None),
                None => match ctx.default_ptr_pointee {
                    Some(t) => (t, None),
                    None => {
                        return err(
                            "assignment to Deref(lhs) requires \
                             meta.types['@default.ptr.pointee'] unless the pointer is explicitly \
                             typed ptr(T)",
                        )
                    }
                },
            }
        }
        _ => return err("assignment lhs must be Name(id) or Deref(expr)"),
    };

    if let Some(expected) = expected {
        if expected != store_ty {
            return err("core.assign expected type must match committed lhs store type");
        }
    }
    if !store_ty.supports_slot_storage() {
        return err("assignment type not supported for store");
    }

    let addr = lower_lvalue_addr(ctx, lhs, store_ty)?;
    let value = lower_expr(ctx, rhs, Some(store_ty))?;
    if value.ty != store_ty {
        return err("assignment rhs type mismatch");
    }
    if store_ty == TypeId::Ptr {
        if let Some(want) = lhs_ptr_of.filter(|p| *p != TypeId::Void) {
            if value.ptr_of != Some(want) {
                return err("assignment rhs pointer pointee does not match destination ptr(T)");
            }
        }
    }

    ctx.emit_type_if_needed(TypeId::Ptr)?;
    ctx.emit_type_if_needed(store_ty)?;
    let store_tag = store_ty
        .store_tag()
        .ok_or_else(|| EmitError::new("assignment type not supported for store"))?;
    let align = store_ty.align_bytes().expect("storable types have alignment");
    let store_id = ctx.new_node_id();
    ctx.node_line(
        &store_id,
        store_tag,
        None,
        json!({"addr": vref(&addr.id), "value": vref(&value.id), "align": align}),
    )?;
    Ok((store_id, value))
}

/// Lowers an lvalue to its address: the slot address of a slot-backed
/// local, or the pointer value of a `Deref`.
fn lower_lvalue_addr(ctx: &mut EmitCtx<'_>, lhs: &Obj, store_ty: TypeId) -> Result<SirExpr> {
    match lhs.kind() {
        Some("Name") => {
            let name = name_id_text(lhs)?;
            let Some(local) = ctx.lookup_local(&name) else {
                return err("assignment to unknown local");
            };
            if !local.is_slot {
                return err("assignment target is not slot-backed");
            }
            let addr_ti = slot_addr_typeinfo(local.ti.base);
            ctx.emit_typeinfo_if_needed(&addr_ti)?;
            let id = ctx.new_node_id();
            ctx.node_line(&id, "name", Some(&addr_ti.sir_id), json!({"name": name}))?;
            Ok(SirExpr {
                id,
                ty: TypeId::Ptr,
                ptr_of: addr_ti.ptr_of,
                sir_type_id: addr_ti.sir_id,
            })
        }
        Some("Deref") => {
            let inner = lhs
                .get("expr")
                .and_then(Json::as_obj)
                .ok_or_else(|| EmitError::new("Deref requires field: expr"))?;
            let pointer = lower_expr(ctx, inner, Some(TypeId::Ptr))?;
            match pointer.ptr_of {
                Some(TypeId::Void) => err("cannot assign through ptr(void) (opaque pointer)"),
                Some(t) if t != store_ty => {
                    err("store type does not match pointer pointee type")
                }
                _ => Ok(pointer),
            }
        }
        _ => err("assignment lhs must be Name(id) or Deref(expr)"),
    }
}
