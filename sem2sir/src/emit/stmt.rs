//! Statement lowering and CFG construction.
//!
//! Every statement form either appends to the current block or closes it
//! with a terminator; blocks the lowerer creates are always terminated
//! before the enclosing scope ends. Buffered expression effects flush in
//! order ahead of the statement that owns them.

use sem_asm::TypeId;
use serde_json::json;

use crate::json::{Json, Obj};

use super::bin::lower_assign;
use super::call::lower_call;
use super::expr::lower_expr;
use super::types::parse_type;
use super::{err, tok_text, vref, EmitCtx, EmitError, FnBuild, LoopTargets, Result};

// ----- terminator emission -----

pub(crate) fn emit_term_ret(ctx: &mut EmitCtx<'_>, value_id: Option<&str>) -> Result<String> {
    let id = ctx.new_node_id();
    let fields = match value_id {
        Some(v) => json!({"value": vref(v)}),
        None => json!({}),
    };
    ctx.node_line(&id, "term.ret", None, fields)?;
    Ok(id)
}

pub(crate) fn emit_term_br(ctx: &mut EmitCtx<'_>, to_block_id: &str) -> Result<String> {
    let id = ctx.new_node_id();
    ctx.node_line(&id, "term.br", None, json!({"to": vref(to_block_id)}))?;
    Ok(id)
}

pub(crate) fn emit_term_condbr(
    ctx: &mut EmitCtx<'_>,
    cond_id: &str,
    then_block_id: &str,
    else_block_id: &str,
) -> Result<String> {
    let id = ctx.new_node_id();
    ctx.node_line(
        &id,
        "term.condbr",
        None,
        json!({
            "cond": vref(cond_id),
            "then": {"to": vref(then_block_id)},
            "else": {"to": vref(else_block_id)},
        }),
    )?;
    Ok(id)
}

// ----- block dispatch -----

/// Lowers a `Block` node into the current CFG position.
pub(crate) fn lower_block(
    ctx: &mut EmitCtx<'_>,
    fnb: &mut FnBuild,
    obj: &Obj,
    loop_ctx: Option<LoopTargets>,
) -> Result<()> {
    if obj.kind() != Some("Block") {
        return err("expected Block node");
    }
    let items = obj
        .get("items")
        .and_then(Json::as_arr)
        .ok_or_else(|| EmitError::new("Block requires items"))?;
    for item in items {
        if fnb.cur_terminated() {
            return err("Block has statements after terminator (no implicit control flow)");
        }
        let stmt = item
            .as_obj()
            .ok_or_else(|| EmitError::new("Block.items entries must be nodes"))?;
        lower_stmt_item(ctx, fnb, stmt, loop_ctx)?;
    }
    Ok(())
}

/// Lowers one statement node.
pub(crate) fn lower_stmt_item(
    ctx: &mut EmitCtx<'_>,
    fnb: &mut FnBuild,
    obj: &Obj,
    loop_ctx: Option<LoopTargets>,
) -> Result<()> {
    match obj.kind() {
        Some("Var") => lower_var(ctx, fnb, obj, false),
        Some("VarPat") => lower_var(ctx, fnb, obj, true),
        Some("Return") => lower_return(ctx, fnb, obj),
        Some("Bin") => lower_assign_stmt(ctx, fnb, obj),
        Some("If") => lower_if(ctx, fnb, obj, loop_ctx),
        Some("While") => lower_while(ctx, fnb, obj),
        Some("Loop") => lower_loop(ctx, fnb, obj),
        Some("DoWhile") => lower_do_while(ctx, fnb, obj),
        Some("For") => lower_for(ctx, fnb, obj),
        Some("ForInt") => lower_for_int(ctx, fnb, obj),
        Some("Break") => {
            let Some(targets) = loop_ctx else {
                return err("Break outside of loop is not supported");
            };
            let to = fnb.block_id(targets.break_to).to_owned();
            let id = emit_term_br(ctx, &to)?;
            fnb.append(id, true)
        }
        Some("Continue") => {
            let Some(targets) = loop_ctx else {
                return err("Continue outside of loop is not supported");
            };
            let to = fnb.block_id(targets.continue_to).to_owned();
            let id = emit_term_br(ctx, &to)?;
            fnb.append(id, true)
        }
        Some("Call") => {
            // Expression statement: lower for effects and discard the value.
            let (call, effects) =
                ctx.collect_effects(|ctx| lower_call(ctx, obj, None))?;
            fnb.append_effects(effects)?;
            fnb.append(call.id, false)
        }
        Some("ExprStmt") => lower_expr_stmt(ctx, obj),
        Some(other) => err(format!("unsupported statement kind {other:?}")),
        None => err("statement node must start with key 'k'"),
    }
}

// ----- bindings -----

/// Reads the bound name of a `Var` (`name` token) or `VarPat`
/// (`pat: PatBind(name)`).
fn binding_name(obj: &Obj, is_pat: bool) -> Result<String> {
    if is_pat {
        let pat = obj
            .get("pat")
            .and_then(Json::as_obj)
            .ok_or_else(|| EmitError::new("VarPat requires fields: pat"))?;
        if pat.kind() != Some("PatBind") {
            return err("VarPat.pat must be PatBind (no destructuring)");
        }
        Ok(tok_text(pat, "name")?.to_owned())
    } else {
        Ok(tok_text(obj, "name")?.to_owned())
    }
}

fn lower_var(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj, is_pat: bool) -> Result<()> {
    let name = binding_name(obj, is_pat)?;

    let type_pos = obj.key_pos("type");
    let init_pos = obj.key_pos("init");
    let (Some(type_pos), Some(init_pos)) = (type_pos, init_pos) else {
        return err("Var requires fields: name/pat, type, init (no implicitness)");
    };
    if type_pos > init_pos {
        return err("Var.type must appear before Var.init (no implicit context)");
    }
    let type_node = obj.get("type").expect("position checked");
    if type_node.is_null() {
        return err("Var.type must be explicit (no defaults)");
    }
    let init_node = obj.get("init").expect("position checked");
    if init_node.is_null() {
        return err("Var.init must be explicit (no defaults)");
    }
    let init_obj = init_node
        .as_obj()
        .ok_or_else(|| EmitError::new("Var.init must be a node"))?;

    let ti = parse_type(ctx, type_node)?;
    let (init, effects) =
        ctx.collect_effects(|ctx| lower_expr(ctx, init_obj, Some(ti.base)))?;
    if init.ty != ti.base {
        return err("Var.init type does not match Var.type");
    }
    if ti.base == TypeId::Ptr {
        if let Some(want) = ti.ptr_of.filter(|p| *p != TypeId::Void) {
            if init.ptr_of != Some(want) {
                return err("Var.init pointer pointee does not match declared ptr(T)");
            }
        }
    }
    fnb.append_effects(effects)?;

    if ti.base.supports_slot_storage() {
        // Slot-backed local: alloca + initial store + let binding the slot
        // address.
        let slot_ptr_ti = super::expr::slot_addr_typeinfo(ti.base);
        ctx.emit_typeinfo_if_needed(&slot_ptr_ti)?;
        ctx.emit_typeinfo_if_needed(&ti)?;
        let store_tag = ti.base.store_tag().expect("slot types are storable");
        let align = ti.base.align_bytes().expect("slot types have alignment");

        let slot_id = ctx.new_node_id();
        ctx.node_line(
            &slot_id,
            "alloca",
            None,
            json!({
                "ty": {"t": "ref", "k": "type", "id": ti.sir_id},
                "flags": {"count": 1, "align": align, "zero": true},
            }),
        )?;
        let store_id = ctx.new_node_id();
        ctx.node_line(
            &store_id,
            store_tag,
            None,
            json!({"addr": vref(&slot_id), "value": vref(&init.id), "align": align}),
        )?;
        let let_id = ctx.new_node_id();
        ctx.node_line(
            &let_id,
            "let",
            None,
            json!({"name": name, "value": vref(&slot_id)}),
        )?;

        ctx.push_local(&name, ti, true);
        fnb.append(slot_id, false)?;
        fnb.append(store_id, false)?;
        fnb.append(let_id, false)
    } else {
        // Direct value binding; not addressable, not assignable.
        let let_id = ctx.new_node_id();
        ctx.node_line(
            &let_id,
            "let",
            None,
            json!({"name": name, "value": vref(&init.id)}),
        )?;
        ctx.push_local(&name, ti, false);
        fnb.append(let_id, false)
    }
}

fn lower_return(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj) -> Result<()> {
    let value_node = obj.get("value");
    let fn_ret = ctx.fn_ret;

    if fn_ret != TypeId::Void {
        let Some(value_node) = value_node.filter(|v| !v.is_null()) else {
            return err("Return.value required for non-void function (no implicit return value)");
        };
        let value_obj = value_node
            .as_obj()
            .ok_or_else(|| EmitError::new("Return.value must be a node"))?;
        let (value, effects) =
            ctx.collect_effects(|ctx| lower_expr(ctx, value_obj, Some(fn_ret)))?;
        if value.ty != fn_ret {
            return err("Return.value type mismatch");
        }
        fnb.append_effects(effects)?;
        let id = emit_term_ret(ctx, Some(&value.id))?;
        fnb.append(id, true)
    } else {
        if let Some(v) = value_node {
            if !v.is_null() {
                return err("Return.value must be null for void function");
            }
        }
        let id = emit_term_ret(ctx, None)?;
        fnb.append(id, true)
    }
}

/// A `Bin` in statement position must be a `core.assign`.
fn lower_assign_stmt(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj) -> Result<()> {
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
    let op = obj.get("op").and_then(Json::as_str);
    if op != Some("core.assign") {
        return err("only core.assign Bin is valid in statement position");
    }
    let lhs = obj
        .get("lhs")
        .and_then(Json::as_obj)
        .ok_or_else(|| EmitError::new("Bin missing required field lhs"))?;
    let rhs = obj
        .get("rhs")
        .and_then(Json::as_obj)
        .ok_or_else(|| EmitError::new("Bin missing required field rhs"))?;

    let ((store_id, _value), effects) =
        ctx.collect_effects(|ctx| lower_assign(ctx, lhs, rhs, None))?;
    fnb.append_effects(effects)?;
    fnb.append(store_id, false)
}

fn lower_expr_stmt(ctx: &mut EmitCtx<'_>, obj: &Obj) -> Result<()> {
    let Some(expr) = obj.get("expr") else {
        return err("ExprStmt requires field: expr");
    };
    if expr.is_null() {
        return Ok(());
    }
    let expr_obj = expr
        .as_obj()
        .ok_or_else(|| EmitError::new("ExprStmt.expr must be null or a node"))?;
    if expr_obj.kind() != Some("UnitVal") {
        return err("ExprStmt only supports UnitVal (no untyped expression statements)");
    }
    // UnitVal emits no node; validate it anyway.
    lower_expr(ctx, expr_obj, Some(TypeId::Void)).map(|_| ())
}

// ----- control flow -----

fn require_node<'a>(obj: &'a Obj, key: &str, what: &str) -> Result<&'a Obj> {
    obj.get(key)
        .and_then(Json::as_obj)
        .ok_or_else(|| EmitError::new(format!("{what} requires fields: {key}")))
}

fn require_order(obj: &Obj, first: &str, second: &str, what: &str) -> Result<()> {
    if let (Some(a), Some(b)) = (obj.key_pos(first), obj.key_pos(second)) {
        if a > b {
            return err(format!(
                "{what}.{first} must appear before {what}.{second} (no implicit context)"
            ));
        }
    }
    Ok(())
}

fn lower_if(
    ctx: &mut EmitCtx<'_>,
    fnb: &mut FnBuild,
    obj: &Obj,
    loop_ctx: Option<LoopTargets>,
) -> Result<()> {
    require_order(obj, "cond", "then", "If")?;
    require_order(obj, "then", "else", "If")?;
    let cond_obj = require_node(obj, "cond", "If")?;
    let then_obj = require_node(obj, "then", "If")?;
    let else_node = obj.get("else").filter(|v| !v.is_null());

    let (cond, effects) =
        ctx.collect_effects(|ctx| lower_expr(ctx, cond_obj, Some(TypeId::Bool)))?;
    fnb.append_effects(effects)?;

    let then_idx = fnb.new_block(ctx);
    let mut join: Option<usize> = None;
    let else_idx = match else_node {
        Some(_) => fnb.new_block(ctx),
        None => {
            let j = fnb.new_block(ctx);
            join = Some(j);
            j
        }
    };

    let term = emit_term_condbr(
        ctx,
        &cond.id,
        &fnb.block_id(then_idx).to_owned(),
        &fnb.block_id(else_idx).to_owned(),
    )?;
    fnb.append(term, true)?;

    fnb.cur = then_idx;
    lower_block(ctx, fnb, then_obj, loop_ctx)?;
    if !fnb.cur_terminated() {
        let j = match join {
            Some(j) => j,
            None => {
                let j = fnb.new_block(ctx);
                join = Some(j);
                j
            }
        };
        let id = emit_term_br(ctx, &fnb.block_id(j).to_owned())?;
        fnb.append(id, true)?;
    }

    if let Some(else_node) = else_node {
        let else_obj = else_node
            .as_obj()
            .ok_or_else(|| EmitError::new("If.else must be null or Block"))?;
        fnb.cur = else_idx;
        lower_block(ctx, fnb, else_obj, loop_ctx)?;
        if !fnb.cur_terminated() {
            let j = match join {
                Some(j) => j,
                None => {
                    let j = fnb.new_block(ctx);
                    join = Some(j);
                    j
                }
            };
            let id = emit_term_br(ctx, &fnb.block_id(j).to_owned())?;
            fnb.append(id, true)?;
        }
    }

    // Continue in the join when any branch reaches it; otherwise stay in a
    // terminated block so trailing statements are rejected.
    if let Some(j) = join {
        fnb.cur = j;
    } else {
        fnb.cur = else_idx;
    }
    Ok(())
}

fn lower_while(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj) -> Result<()> {
    let cond_pos = obj.key_pos("cond");
    let body_pos = obj.key_pos("body");
    let (Some(cond_pos), Some(body_pos)) = (cond_pos, body_pos) else {
        return err("While requires fields: cond, body");
    };
    if cond_pos > body_pos {
        return err("While.cond must appear before While.body (no implicit context)");
    }
    let cond_obj = require_node(obj, "cond", "While")?;
    let body_obj = require_node(obj, "body", "While")?;

    let header = fnb.new_block(ctx);
    let body = fnb.new_block(ctx);
    let exit = fnb.new_block(ctx);

    let br = emit_term_br(ctx, &fnb.block_id(header).to_owned())?;
    fnb.append(br, true)?;

    let (cond, effects) =
        ctx.collect_effects(|ctx| lower_expr(ctx, cond_obj, Some(TypeId::Bool)))?;
    fnb.cur = header;
    fnb.append_effects(effects)?;
    let term = emit_term_condbr(
        ctx,
        &cond.id,
        &fnb.block_id(body).to_owned(),
        &fnb.block_id(exit).to_owned(),
    )?;
    fnb.append(term, true)?;

    fnb.cur = body;
    lower_block(
        ctx,
        fnb,
        body_obj,
        Some(LoopTargets {
            break_to: exit,
            continue_to: header,
        }),
    )?;
    if !fnb.cur_terminated() {
        let back = emit_term_br(ctx, &fnb.block_id(header).to_owned())?;
        fnb.append(back, true)?;
    }

    fnb.cur = exit;
    Ok(())
}

fn lower_loop(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj) -> Result<()> {
    let body_obj = require_node(obj, "body", "Loop")?;

    let body = fnb.new_block(ctx);
    let exit = fnb.new_block(ctx);

    let br = emit_term_br(ctx, &fnb.block_id(body).to_owned())?;
    fnb.append(br, true)?;

    fnb.cur = body;
    lower_block(
        ctx,
        fnb,
        body_obj,
        Some(LoopTargets {
            break_to: exit,
            continue_to: body,
        }),
    )?;
    if !fnb.cur_terminated() {
        let back = emit_term_br(ctx, &fnb.block_id(body).to_owned())?;
        fnb.append(back, true)?;
    }

    fnb.cur = exit;
    Ok(())
}

fn lower_do_while(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj) -> Result<()> {
    let body_obj = require_node(obj, "body", "DoWhile")?;
    let cond_obj = require_node(obj, "cond", "DoWhile")?;

    let body = fnb.new_block(ctx);
    let cond_blk = fnb.new_block(ctx);
    let exit = fnb.new_block(ctx);

    let br = emit_term_br(ctx, &fnb.block_id(body).to_owned())?;
    fnb.append(br, true)?;

    fnb.cur = body;
    lower_block(
        ctx,
        fnb,
        body_obj,
        Some(LoopTargets {
            break_to: exit,
            continue_to: cond_blk,
        }),
    )?;
    if !fnb.cur_terminated() {
        let to_cond = emit_term_br(ctx, &fnb.block_id(cond_blk).to_owned())?;
        fnb.append(to_cond, true)?;
    }

    let (cond, effects) =
        ctx.collect_effects(|ctx| lower_expr(ctx, cond_obj, Some(TypeId::Bool)))?;
    fnb.cur = cond_blk;
    fnb.append_effects(effects)?;
    let term = emit_term_condbr(
        ctx,
        &cond.id,
        &fnb.block_id(body).to_owned(),
        &fnb.block_id(exit).to_owned(),
    )?;
    fnb.append(term, true)?;

    fnb.cur = exit;
    Ok(())
}

fn lower_for(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj) -> Result<()> {
    for key in ["init", "cond", "step"] {
        require_order(obj, key, "body", "For")?;
    }
    let body_obj = require_node(obj, "body", "For")?;
    let init_node = obj.get("init").filter(|v| !v.is_null());
    let cond_node = obj.get("cond").filter(|v| !v.is_null());
    let step_node = obj.get("step").filter(|v| !v.is_null());

    if let Some(init) = init_node {
        let init_obj = init
            .as_obj()
            .ok_or_else(|| EmitError::new("For.init must be null or a statement node"))?;
        lower_stmt_item(ctx, fnb, init_obj, None)?;
    }

    let header = fnb.new_block(ctx);
    let body = fnb.new_block(ctx);
    let step = step_node.map(|_| fnb.new_block(ctx));
    let exit = fnb.new_block(ctx);

    let br = emit_term_br(ctx, &fnb.block_id(header).to_owned())?;
    fnb.append(br, true)?;

    match cond_node {
        Some(cond) => {
            let cond_obj = cond
                .as_obj()
                .ok_or_else(|| EmitError::new("For.cond must be null or a node"))?;
            let (cond, effects) =
                ctx.collect_effects(|ctx| lower_expr(ctx, cond_obj, Some(TypeId::Bool)))?;
            fnb.cur = header;
            fnb.append_effects(effects)?;
            let term = emit_term_condbr(
                ctx,
                &cond.id,
                &fnb.block_id(body).to_owned(),
                &fnb.block_id(exit).to_owned(),
            )?;
            fnb.append(term, true)?;
        }
        None => {
            fnb.cur = header;
            let to_body = emit_term_br(ctx, &fnb.block_id(body).to_owned())?;
            fnb.append(to_body, true)?;
        }
    }

    let continue_to = step.unwrap_or(header);
    fnb.cur = body;
    lower_block(
        ctx,
        fnb,
        body_obj,
        Some(LoopTargets {
            break_to: exit,
            continue_to,
        }),
    )?;
    if !fnb.cur_terminated() {
        let next = emit_term_br(ctx, &fnb.block_id(continue_to).to_owned())?;
        fnb.append(next, true)?;
    }

    if let (Some(step_idx), Some(step_node)) = (step, step_node) {
        let step_obj = step_node
            .as_obj()
            .ok_or_else(|| EmitError::new("For.step must be null or a statement node"))?;
        fnb.cur = step_idx;
        lower_stmt_item(ctx, fnb, step_obj, None)?;
        if !fnb.cur_terminated() {
            let back = emit_term_br(ctx, &fnb.block_id(header).to_owned())?;
            fnb.append(back, true)?;
        }
    }

    fnb.cur = exit;
    Ok(())
}

// ----- ForInt desugaring -----

fn synth_tok(text: &str) -> Json {
    Json::Obj(Obj::synthetic(vec![
        ("k".into(), Json::Str("tok".into())),
        ("text".into(), Json::Str(text.into())),
    ]))
}

fn synth_name(name: &str) -> Json {
    Json::Obj(Obj::synthetic(vec![
        ("k".into(), Json::Str("Name".into())),
        ("id".into(), synth_tok(name)),
    ]))
}

fn synth_int(lit: &str) -> Json {
    Json::Obj(Obj::synthetic(vec![
        ("k".into(), Json::Str("Int".into())),
        ("lit".into(), synth_tok(lit)),
    ]))
}

fn synth_bin(op: &str, lhs: Json, rhs: Json) -> Obj {
    Obj::synthetic(vec![
        ("k".into(), Json::Str("Bin".into())),
        ("op".into(), Json::Str(op.into())),
        ("lhs".into(), lhs),
        ("rhs".into(), rhs),
    ])
}

/// Desugars `ForInt` into an explicit counter loop: binds the induction
/// variable, synthesizes the end-exclusive `iv < end` condition and the
/// `iv := iv + step` increment, and lowers both through the ordinary
/// paths.
fn lower_for_int(ctx: &mut EmitCtx<'_>, fnb: &mut FnBuild, obj: &Obj) -> Result<()> {
    for key in ["var", "end", "step"] {
        require_order(obj, key, "body", "ForInt")?;
    }
    let var_obj = require_node(obj, "var", "ForInt")?;
    let end_node = obj
        .get("end")
        .filter(|v| !v.is_null())
        .ok_or_else(|| EmitError::new("ForInt requires fields: end"))?;
    let body_obj = require_node(obj, "body", "ForInt")?;
    let step_node = obj.get("step").filter(|v| !v.is_null());

    // Bind the induction variable as an ordinary declaration.
    let (iv_name, is_pat) = match var_obj.kind() {
        Some("Var") => (binding_name(var_obj, false)?, false),
        Some("VarPat") => (binding_name(var_obj, true)?, true),
        _ => return err("ForInt.var must be Var or VarPat"),
    };
    lower_var(ctx, fnb, var_obj, is_pat)?;

    let Some(local) = ctx.lookup_local(&iv_name) else {
        return err("ForInt induction variable did not bind");
    };
    if !local.is_slot {
        return err("ForInt induction variable must be addressable (slot-backed)");
    }
    let iv_ty = local.ti.base;
    if iv_ty != TypeId::I32 && iv_ty != TypeId::I64 {
        return err("ForInt induction variable must be i32 or i64");
    }

    let header = fnb.new_block(ctx);
    let body = fnb.new_block(ctx);
    let step = fnb.new_block(ctx);
    let exit = fnb.new_block(ctx);

    let br = emit_term_br(ctx, &fnb.block_id(header).to_owned())?;
    fnb.append(br, true)?;

    // Header: iv < end, end-exclusive.
    let cmp = synth_bin("core.lt", synth_name(&iv_name), end_node.clone());
    let (cond, effects) =
        ctx.collect_effects(|ctx| lower_expr(ctx, &cmp, Some(TypeId::Bool)))?;
    fnb.cur = header;
    fnb.append_effects(effects)?;
    let term = emit_term_condbr(
        ctx,
        &cond.id,
        &fnb.block_id(body).to_owned(),
        &fnb.block_id(exit).to_owned(),
    )?;
    fnb.append(term, true)?;

    // Body.
    fnb.cur = body;
    lower_block(
        ctx,
        fnb,
        body_obj,
        Some(LoopTargets {
            break_to: exit,
            continue_to: step,
        }),
    )?;
    if !fnb.cur_terminated() {
        let to_step = emit_term_br(ctx, &fnb.block_id(step).to_owned())?;
        fnb.append(to_step, true)?;
    }

    // Step: iv := iv + (step | 1).
    let step_expr = step_node.cloned().unwrap_or_else(|| synth_int("1"));
    let add = synth_bin("core.add", synth_name(&iv_name), step_expr);
    let assign = synth_bin("core.assign", synth_name(&iv_name), Json::Obj(add));
    fnb.cur = step;
    lower_assign_stmt(ctx, fnb, &assign)?;
    let back = emit_term_br(ctx, &fnb.block_id(header).to_owned())?;
    fnb.append(back, true)?;

    fnb.cur = exit;
    Ok(())
}
