//! Expression lowering.
//!
//! Every expression position carries an expected type committed by its
//! context; literals without context fall back only to the explicit
//! `@default.*` policies from the document metadata.

use sem_asm::TypeId;
use serde_json::json;

use crate::json::{Json, Obj};

use super::{bin, call, err, matches, tok_text, EmitCtx, Result, SirExpr, TypeInfo};

/// Lowers one expression node with an optional expected type.
pub(crate) fn lower_expr(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
) -> Result<SirExpr> {
    let Some(kind) = obj.kind() else {
        return err("expression node must start with key 'k'");
    };
    match kind {
        "Int" => lower_int(ctx, obj, expected),
        "Char" => lower_char(ctx, obj, expected),
        "F32" => lower_float(ctx, obj, expected, TypeId::F32),
        "F64" => lower_float(ctx, obj, expected, TypeId::F64),
        "CStr" => lower_cstr_lit(ctx, obj, expected),
        "StringUtf8" => lower_packed_lit(ctx, obj, expected, TypeId::StringUtf8),
        "Bytes" => lower_packed_lit(ctx, obj, expected, TypeId::Bytes),
        "Name" => lower_name(ctx, obj, expected),
        "True" => lower_bool_lit(ctx, obj, expected, true),
        "False" => lower_bool_lit(ctx, obj, expected, false),
        "Paren" => lower_paren(ctx, obj, expected),
        "Not" => lower_unary(ctx, obj, expected, "bool.not", TypeId::Bool, TypeId::Bool),
        "Neg" => lower_int_unary(ctx, obj, expected, "neg"),
        "BitNot" => lower_int_unary(ctx, obj, expected, "not"),
        "AddrOf" => lower_addr_of(ctx, obj, expected),
        "Deref" => lower_deref(ctx, obj, expected),
        "Bin" => bin::lower_bin(ctx, obj, expected),
        "Call" => call::lower_call(ctx, obj, expected),
        "Match" => matches::lower_match(ctx, obj, expected),
        "UnitVal" => lower_unit_val(obj, expected),
        "ZExtI64FromI32" => lower_conv(ctx, obj, expected, "i64.zext.i32", TypeId::I32, TypeId::I64),
        "SExtI64FromI32" => lower_conv(ctx, obj, expected, "i64.sext.i32", TypeId::I32, TypeId::I64),
        "TruncI32FromI64" => lower_conv(ctx, obj, expected, "i32.trunc.i64", TypeId::I64, TypeId::I32),
        "F64FromI32S" => lower_conv(ctx, obj, expected, "f64.from_i32.s", TypeId::I32, TypeId::F64),
        "F32FromI32S" => lower_conv(ctx, obj, expected, "f32.from_i32.s", TypeId::I32, TypeId::F32),
        "F64FromI32U" => lower_conv(ctx, obj, expected, "f64.from_i32.u", TypeId::I32, TypeId::F64),
        "F32FromI32U" => lower_conv(ctx, obj, expected, "f32.from_i32.u", TypeId::I32, TypeId::F32),
        "F64FromI64S" => lower_conv(ctx, obj, expected, "f64.from_i64.s", TypeId::I64, TypeId::F64),
        "F32FromI64S" => lower_conv(ctx, obj, expected, "f32.from_i64.s", TypeId::I64, TypeId::F32),
        "F64FromI64U" => lower_conv(ctx, obj, expected, "f64.from_i64.u", TypeId::I64, TypeId::F64),
        "F32FromI64U" => lower_conv(ctx, obj, expected, "f32.from_i64.u", TypeId::I64, TypeId::F32),
        "TruncSatI32FromF64S" => {
            lower_conv(ctx, obj, expected, "i32.trunc_sat_f64.s", TypeId::F64, TypeId::I32)
        }
        "TruncSatI32FromF32S" => {
            lower_conv(ctx, obj, expected, "i32.trunc_sat_f32.s", TypeId::F32, TypeId::I32)
        }
        "TruncSatI32FromF64U" => {
            lower_conv(ctx, obj, expected, "i32.trunc_sat_f64.u", TypeId::F64, TypeId::I32)
        }
        "TruncSatI32FromF32U" => {
            lower_conv(ctx, obj, expected, "i32.trunc_sat_f32.u", TypeId::F32, TypeId::I32)
        }
        "TruncSatI64FromF64S" => {
            lower_conv(ctx, obj, expected, "i64.trunc_sat_f64.s", TypeId::F64, TypeId::I64)
        }
        "TruncSatI64FromF32S" => {
            lower_conv(ctx, obj, expected, "i64.trunc_sat_f32.s", TypeId::F32, TypeId::I64)
        }
        "TruncSatI64FromF64U" => {
            lower_conv(ctx, obj, expected, "i64.trunc_sat_f64.u", TypeId::F64, TypeId::I64)
        }
        "TruncSatI64FromF32U" => {
            lower_conv(ctx, obj, expected, "i64.trunc_sat_f32.u", TypeId::F32, TypeId::I64)
        }
        "PtrFromI64" => lower_conv(ctx, obj, expected, "ptr.from_i64", TypeId::I64, TypeId::Ptr),
        "I64FromPtr" => lower_conv(ctx, obj, expected, "i64.from_ptr", TypeId::Ptr, TypeId::I64),
        other => err(format!(
            "unsupported expression kind {other:?} for SIR emission (define it or fail)"
        )),
    }
}

fn expr_field<'a>(obj: &'a Obj, key: &str) -> Result<&'a Obj> {
    obj.get(key)
        .and_then(Json::as_obj)
        .ok_or_else(|| super::EmitError::new(format!("missing required field {key}")))
}

// ----- literals -----

fn lower_int(ctx: &mut EmitCtx<'_>, obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    let expected = match expected.or(ctx.default_int) {
        Some(t) => t,
        None => {
            return err(
                "Int literal requires an expected type unless meta.types['@default.int'] is set \
                 (no defaults)",
            )
        }
    };
    if !expected.accepts_int_literal() {
        return err(format!("Int literal type {expected} not supported"));
    }
    let lit = tok_text(obj, "lit")?;

    let (tag, value) = match expected {
        TypeId::U8 | TypeId::U32 | TypeId::U64 => {
            let v: u64 = lit
                .parse()
                .map_err(|_| super::EmitError::new("Int literal token is not a valid base-10 unsigned integer"))?;
            if expected == TypeId::U8 && v > u64::from(u8::MAX) {
                return err("Int literal does not fit u8");
            }
            if expected == TypeId::U32 && v > u64::from(u32::MAX) {
                return err("Int literal does not fit u32");
            }
            let tag = match expected {
                TypeId::U8 => "const.u8",
                TypeId::U32 => "const.u32",
                _ => "const.u64",
            };
            (tag, json!(v))
        }
        _ => {
            let v: i64 = lit
                .parse()
                .map_err(|_| super::EmitError::new("Int literal token is not a valid base-10 integer"))?;
            if expected == TypeId::I32 && (v < i64::from(i32::MIN) || v > i64::from(i32::MAX)) {
                return err("Int literal does not fit i32");
            }
            let tag = if expected == TypeId::I32 {
                "const.i32"
            } else {
                "const.i64"
            };
            (tag, json!(v))
        }
    };

    ctx.emit_type_if_needed(expected)?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        tag,
        Some(expected.sir_type_id()),
        json!({"value": value}),
    )?;
    Ok(SirExpr {
        id,
        ty: expected,
        ptr_of: None,
        sir_type_id: expected.sir_type_id().to_owned(),
    })
}

fn lower_char(ctx: &mut EmitCtx<'_>, obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    let expected = expected.unwrap_or(TypeId::U32);
    if expected != TypeId::U32 {
        return err("Char literal has mismatched expected type (must be u32)");
    }
    let lit = tok_text(obj, "lit")?;
    let v = if let Some(hex) = lit.strip_prefix("0x").or_else(|| lit.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        lit.parse::<u64>()
    }
    .map_err(|_| {
        super::EmitError::new("Char literal token is not a valid integer (decimal or 0xHEX)")
    })?;
    if v > 0x10FFFF {
        return err("Char literal out of Unicode range (max 0x10FFFF)");
    }
    if (0xD800..=0xDFFF).contains(&v) {
        return err("Char literal is a surrogate code point (invalid Unicode scalar value)");
    }
    ctx.emit_type_if_needed(TypeId::U32)?;
    let id = ctx.new_node_id();
    ctx.node_line(&id, "const.u32", Some("t:u32"), json!({"value": v}))?;
    Ok(SirExpr {
        id,
        ty: TypeId::U32,
        ptr_of: None,
        sir_type_id: "t:u32".into(),
    })
}

fn is_hex_bits(s: &str, digits: usize) -> bool {
    let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) else {
        return false;
    };
    hex.len() == digits && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

fn lower_float(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
    ty: TypeId,
) -> Result<SirExpr> {
    if expected != Some(ty) {
        return err(format!(
            "{ty} literal must be used in {ty} context (no implicit casts)"
        ));
    }
    let bits = tok_text(obj, "bits")?;
    let digits = if ty == TypeId::F32 { 8 } else { 16 };
    if !is_hex_bits(bits, digits) {
        return err(format!(
            "{ty} literal bits must be 0x followed by exactly {digits} hex digits"
        ));
    }
    let tag = if ty == TypeId::F32 { "const.f32" } else { "const.f64" };
    ctx.emit_type_if_needed(ty)?;
    let id = ctx.new_node_id();
    ctx.node_line(&id, tag, Some(ty.sir_type_id()), json!({"bits": bits}))?;
    Ok(SirExpr {
        id,
        ty,
        ptr_of: None,
        sir_type_id: ty.sir_type_id().to_owned(),
    })
}

fn lower_bool_lit(
    ctx: &mut EmitCtx<'_>,
    _obj: &Obj,
    expected: Option<TypeId>,
    v: bool,
) -> Result<SirExpr> {
    if expected != Some(TypeId::Bool) {
        return err("True/False requires expected type bool (no defaults)");
    }
    ctx.emit_type_if_needed(TypeId::Bool)?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        "const.bool",
        Some("t:bool"),
        json!({"value": if v { 1 } else { 0 }}),
    )?;
    Ok(SirExpr {
        id,
        ty: TypeId::Bool,
        ptr_of: None,
        sir_type_id: "t:bool".into(),
    })
}

/// Emits a `cstr` node holding literal text.
pub(crate) fn emit_cstr_node(ctx: &mut EmitCtx<'_>, text: &str) -> Result<String> {
    ctx.emit_type_if_needed(TypeId::CStr)?;
    let id = ctx.new_node_id();
    ctx.node_line(&id, "cstr", Some("t:cstr"), json!({"value": text}))?;
    Ok(id)
}

fn emit_const_i64(ctx: &mut EmitCtx<'_>, v: i64) -> Result<String> {
    ctx.emit_type_if_needed(TypeId::I64)?;
    let id = ctx.new_node_id();
    ctx.node_line(&id, "const.i64", Some("t:i64"), json!({"value": v}))?;
    Ok(id)
}

fn lower_cstr_lit(ctx: &mut EmitCtx<'_>, obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    let expected = expected.unwrap_or(TypeId::CStr);
    if expected != TypeId::CStr {
        return err("CStr literal has mismatched expected type");
    }
    let lit = tok_text(obj, "lit")?.to_owned();
    let id = emit_cstr_node(ctx, &lit)?;
    Ok(SirExpr {
        id,
        ty: TypeId::CStr,
        ptr_of: Some(TypeId::I8),
        sir_type_id: "t:cstr".into(),
    })
}

/// `StringUtf8`/`Bytes`: the data:v1 canonical two-field struct of a
/// `cstr` data pointer and an i64 byte length.
fn lower_packed_lit(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
    ty: TypeId,
) -> Result<SirExpr> {
    let expected = expected.unwrap_or(ty);
    if expected != ty {
        return err(format!("{ty} literal has mismatched expected type"));
    }
    let lit = tok_text(obj, "lit")?.to_owned();
    let data_id = emit_cstr_node(ctx, &lit)?;
    let len_id = emit_const_i64(ctx, lit.len() as i64)?;
    ctx.emit_type_if_needed(ty)?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        "const.struct",
        Some(ty.sir_type_id()),
        json!({
            "fields": [
                {"i": 0, "v": super::vref(&data_id)},
                {"i": 1, "v": super::vref(&len_id)},
            ]
        }),
    )?;
    Ok(SirExpr {
        id,
        ty,
        ptr_of: None,
        sir_type_id: ty.sir_type_id().to_owned(),
    })
}

fn lower_unit_val(_obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    if let Some(t) = expected {
        if t != TypeId::Void {
            return err("UnitVal has mismatched expected type (void only)");
        }
    }
    // The unit value emits no node.
    Ok(SirExpr {
        id: String::new(),
        ty: TypeId::Void,
        ptr_of: None,
        sir_type_id: "t:void".into(),
    })
}

// ----- names and pointers -----

fn lower_name(ctx: &mut EmitCtx<'_>, obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    let name = tok_text(obj, "id")?.to_owned();
    let Some(local) = ctx.lookup_local(&name) else {
        return err(format!(
            "Name {name:?} refers to unknown local (no implicit globals)"
        ));
    };
    let ti = local.ti.clone();
    let is_slot = local.is_slot;
    if let Some(expected) = expected {
        if expected != ti.base {
            return err(format!("Name {name:?} type mismatch against expected type"));
        }
    }
    ctx.emit_typeinfo_if_needed(&ti)?;

    if !is_slot {
        let id = ctx.new_node_id();
        ctx.node_line(&id, "name", Some(&ti.sir_id), json!({"name": name}))?;
        return Ok(SirExpr {
            id,
            ty: ti.base,
            ptr_of: ti.ptr_of,
            sir_type_id: ti.sir_id,
        });
    }

    // Slot-backed locals bind the slot address; a Name read loads through
    // it at the committed width.
    let addr_ti = slot_addr_typeinfo(ti.base);
    ctx.emit_typeinfo_if_needed(&addr_ti)?;
    let load_tag = ti
        .base
        .load_tag()
        .ok_or_else(|| super::EmitError::new("unsupported slot-backed local type"))?;
    let align = ti.base.align_bytes().expect("slot types have alignment");

    let addr_id = ctx.new_node_id();
    ctx.node_line(&addr_id, "name", Some(&addr_ti.sir_id), json!({"name": name}))?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        load_tag,
        Some(&ti.sir_id),
        json!({"addr": super::vref(&addr_id), "align": align}),
    )?;
    Ok(SirExpr {
        id,
        ty: ti.base,
        ptr_of: ti.ptr_of,
        sir_type_id: ti.sir_id,
    })
}

/// The pointer type of a slot-backed local's address: derived `ptr(T)`
/// for load/store-capable non-pointer types, the raw `ptr` otherwise.
pub(crate) fn slot_addr_typeinfo(base: TypeId) -> TypeInfo {
    if base != TypeId::Ptr && base != TypeId::Slice && base.store_tag().is_some() {
        TypeInfo::derived_ptr(base)
    } else {
        TypeInfo::prim(TypeId::Ptr)
    }
}

/// Reads the `Name.id` text of a `Name` node (for lvalue/AddrOf shapes).
pub(crate) fn name_id_text(obj: &Obj) -> Result<String> {
    if obj.kind() != Some("Name") {
        return err("expected a Name node");
    }
    Ok(tok_text(obj, "id")?.to_owned())
}

fn lower_addr_of(ctx: &mut EmitCtx<'_>, obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    if expected != Some(TypeId::Ptr) {
        return err("AddrOf requires expected type ptr (no implicit pointer typing)");
    }
    let inner = expr_field(obj, "expr")?;
    let name = name_id_text(inner)
        .map_err(|_| super::EmitError::new("AddrOf requires a Name operand"))?;
    let Some(local) = ctx.lookup_local(&name) else {
        return err("AddrOf refers to unknown local");
    };
    if !local.is_slot {
        return err("AddrOf requires an addressable local (slot-backed)");
    }
    let base = local.ti.base;
    if base == TypeId::Ptr {
        return err("AddrOf(ptr) would require ptr-to-ptr which is not modeled");
    }
    let addr_ti = slot_addr_typeinfo(base);
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

fn lower_deref(ctx: &mut EmitCtx<'_>, obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    let inner = expr_field(obj, "expr")?;
    let pointer = lower_expr(ctx, inner, Some(TypeId::Ptr))?;
    if pointer.ty != TypeId::Ptr {
        return err("Deref expr must be ptr");
    }

    let result_ty = match expected {
        Some(t) => t,
        None => match pointer.ptr_of {
            Some(TypeId::Void) | None => match ctx.default_ptr_pointee {
                Some(t) => t,
                None => {
                    return err(
                        "Deref requires an expected type unless \
                         meta.types['@default.ptr.pointee'] is set (no implicit pointee typing)",
                    )
                }
            },
            Some(t) => t,
        },
    };
    if result_ty == TypeId::Ptr {
        return err("Deref result ptr would require ptr-to-ptr which is not modeled");
    }
    match pointer.ptr_of {
        Some(TypeId::Void) => return err("cannot Deref a ptr(void) (opaque pointer)"),
        Some(t) if t != result_ty => {
            return err("Deref result type does not match pointer pointee type")
        }
        _ => {}
    }

    let load_tag = result_ty
        .load_tag()
        .ok_or_else(|| super::EmitError::new("Deref result type not supported for load"))?;
    let align = result_ty.align_bytes().expect("loadable types have alignment");
    ctx.emit_type_if_needed(result_ty)?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        load_tag,
        Some(result_ty.sir_type_id()),
        json!({"addr": super::vref(&pointer.id), "align": align}),
    )?;
    Ok(SirExpr {
        id,
        ty: result_ty,
        ptr_of: None,
        sir_type_id: result_ty.sir_type_id().to_owned(),
    })
}

// ----- structure -----

fn lower_paren(ctx: &mut EmitCtx<'_>, obj: &Obj, expected: Option<TypeId>) -> Result<SirExpr> {
    let inner = expr_field(obj, "expr")?;
    lower_expr(ctx, inner, expected)
}

fn lower_unary(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
    tag: &str,
    operand: TypeId,
    result: TypeId,
) -> Result<SirExpr> {
    let inner = expr_field(obj, "expr")?;
    let x = lower_expr(ctx, inner, Some(operand))?;
    if expected != Some(result) {
        return err("unary expr result type does not match expected type (no implicit coercions)");
    }
    ctx.emit_type_if_needed(result)?;
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        tag,
        Some(result.sir_type_id()),
        json!({"args": [super::vref(&x.id)]}),
    )?;
    Ok(SirExpr {
        id,
        ty: result,
        ptr_of: None,
        sir_type_id: result.sir_type_id().to_owned(),
    })
}

fn lower_int_unary(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
    op: &str,
) -> Result<SirExpr> {
    let width = match expected {
        Some(TypeId::I32) => TypeId::I32,
        Some(TypeId::I64) => TypeId::I64,
        _ => return err("integer unary expected type must be i32 or i64"),
    };
    let tag = format!("{}.{op}", width.as_str());
    lower_unary(ctx, obj, expected, &tag, width, width)
}

fn lower_conv(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
    tag: &str,
    operand: TypeId,
    result: TypeId,
) -> Result<SirExpr> {
    if expected != Some(result) {
        return err(format!(
            "conversion result is {result}; expected type must match (no implicit casts)"
        ));
    }
    lower_unary(ctx, obj, Some(result), tag, operand, result)
}

// ----- probes -----

/// Best-effort type probe with no expected context: `Name` lookups,
/// `Int` via the explicit default policy, `Paren` recursion. Emits
/// nothing.
pub(crate) fn probe_expr_type(ctx: &EmitCtx<'_>, obj: &Obj) -> Option<TypeId> {
    match obj.kind()? {
        "Name" => {
            let name = obj
                .get("id")
                .and_then(Json::as_obj)
                .and_then(|t| t.get("text"))
                .and_then(Json::as_str)?;
            ctx.lookup_local(name).map(|l| l.ti.base)
        }
        "Int" => ctx.default_int,
        "Paren" => probe_expr_type(ctx, obj.get("expr")?.as_obj()?),
        _ => None,
    }
}

/// Best-effort pointee probe: `Name`/`Paren(Name)` of a local with an
/// explicit derived `ptr(T)` type yields `T` (including void).
pub(crate) fn probe_ptr_pointee(ctx: &EmitCtx<'_>, obj: &Obj) -> Option<TypeId> {
    match obj.kind()? {
        "Name" => {
            let name = obj
                .get("id")
                .and_then(Json::as_obj)
                .and_then(|t| t.get("text"))
                .and_then(Json::as_str)?;
            let local = ctx.lookup_local(name)?;
            if local.ti.base == TypeId::Ptr {
                local.ti.ptr_of
            } else {
                None
            }
        }
        "Paren" => probe_ptr_pointee(ctx, obj.get("expr")?.as_obj()?),
        _ => None,
    }
}
