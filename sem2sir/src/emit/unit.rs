//! Unit items: `Proc` pre-scan and lowering.
//!
//! The pre-scan records every procedure signature up front so direct
//! calls resolve without relying on item order; the main pass verifies
//! each `Proc` against its pre-scanned signature before emitting.

use sem_asm::TypeId;
use serde_json::json;

use crate::json::{Json, Obj};

use super::stmt::lower_block;
use super::types::parse_type;
use super::{err, tok_text, vref, EmitCtx, EmitError, FnBuild, ProcInfo, Result, TypeInfo};

fn param_name(param: &Obj) -> Result<String> {
    match param.kind() {
        Some("Param") => Ok(tok_text(param, "name")?.to_owned()),
        Some("ParamPat") => {
            let pat = param
                .get("pat")
                .and_then(Json::as_obj)
                .filter(|p| p.kind() == Some("PatBind"))
                .ok_or_else(|| EmitError::new("ParamPat.pat must be PatBind"))?;
            Ok(tok_text(pat, "name")?.to_owned())
        }
        _ => err("Proc.params entries must be Param or ParamPat"),
    }
}

fn param_type(ctx: &mut EmitCtx<'_>, param: &Obj) -> Result<TypeInfo> {
    let ty = param
        .get("type")
        .ok_or_else(|| EmitError::new("Param requires fields: name, type"))?;
    parse_type(ctx, ty)
}

/// Pre-scans `Unit.items` for `Proc` headers, assigning stable fn ids,
/// and verifies that a non-extern `main` exists.
pub(crate) fn prescan_procs(ctx: &mut EmitCtx<'_>, ast: &Obj) -> Result<()> {
    let items = ast
        .get("items")
        .and_then(Json::as_arr)
        .ok_or_else(|| EmitError::new("Unit requires items"))?;

    for item in items {
        let Some(obj) = item.as_obj() else { continue };
        if obj.kind() != Some("Proc") {
            continue;
        }
        let name = tok_text(obj, "name")?.to_owned();
        if ctx.find_proc(&name).is_some() {
            return err("duplicate Proc name in Unit (no implicit overloading)");
        }

        let mut params = Vec::new();
        if let Some(list) = obj.get("params").and_then(Json::as_arr) {
            for p in list {
                let p = p
                    .as_obj()
                    .ok_or_else(|| EmitError::new("Proc.params entries must be nodes"))?;
                params.push(param_type(ctx, p)?);
            }
        } else {
            return err("Proc requires fields: name, params, ret");
        }
        let ret = match obj.get("ret") {
            Some(ret) => parse_type(ctx, ret)?,
            None => return err("Proc requires fields: name, params, ret"),
        };

        let is_extern = matches!(obj.get("extern"), Some(Json::Bool(true)));
        let link_name = match obj.get("link_name") {
            Some(Json::Obj(tok)) if tok.kind() == Some("tok") => tok
                .get("text")
                .and_then(Json::as_str)
                .map(str::to_owned),
            _ => None,
        };

        let fn_id = ctx.new_node_id();
        let fn_type_id = format!("t:fn:{name}");
        ctx.procs.push(ProcInfo {
            name,
            fn_id,
            fn_type_id,
            params,
            ret,
            is_extern,
            link_name,
        });
    }

    match ctx.procs.iter().find(|p| p.name == "main") {
        None => err("Unit requires a Proc named main"),
        Some(p) if p.is_extern => err("Proc 'main' cannot be extern"),
        Some(_) => Ok(()),
    }
}

/// Lowers one `Unit.items` entry; non-`Proc` items are skipped.
pub(crate) fn lower_unit_item(ctx: &mut EmitCtx<'_>, obj: &Obj) -> Result<()> {
    if obj.kind() != Some("Proc") {
        return Ok(());
    }
    let name = tok_text(obj, "name")?.to_owned();
    let proc_idx = ctx
        .find_proc(&name)
        .ok_or_else(|| EmitError::new("internal: Proc not found in pre-scan table"))?;

    // Re-derive the signature and verify it against the pre-scan.
    let mut param_names = Vec::new();
    let mut param_tis = Vec::new();
    let params_list = obj
        .get("params")
        .and_then(Json::as_arr)
        .ok_or_else(|| EmitError::new("Proc requires fields: name, params, ret"))?;
    for p in params_list {
        let p = p
            .as_obj()
            .ok_or_else(|| EmitError::new("Proc.params entries must be nodes"))?;
        param_names.push(param_name(p)?);
        param_tis.push(param_type(ctx, p)?);
    }
    let ret_ti = match obj.get("ret") {
        Some(ret) => parse_type(ctx, ret)?,
        None => return err("Proc requires fields: name, params, ret"),
    };
    {
        let p = &ctx.procs[proc_idx];
        if p.ret != ret_ti {
            return err("Proc.ret does not match prescan signature");
        }
        if p.params.len() != param_tis.len()
            || p.params.iter().zip(&param_tis).any(|(a, b)| a != b)
        {
            return err("Proc.params do not match prescan signature");
        }
    }

    let is_extern = matches!(obj.get("extern"), Some(Json::Bool(true)));
    let link_name = ctx.procs[proc_idx].link_name.clone();
    if link_name.is_some() && !is_extern {
        return err("Proc.link_name is only allowed when Proc.extern=true");
    }
    let body = obj.get("body").filter(|b| !b.is_null());

    if is_extern {
        if name == "main" {
            return err("Proc 'main' cannot be extern");
        }
        if body.is_some() {
            return err("extern Proc must not have a body (body: null)");
        }
        ctx.emit_fn_type_if_needed(proc_idx)?;
        let fn_id = ctx.procs[proc_idx].fn_id.clone();
        let fn_type_id = ctx.procs[proc_idx].fn_type_id.clone();
        let decl_name = link_name.unwrap_or_else(|| name.clone());
        return ctx.node_line(&fn_id, "decl.fn", Some(&fn_type_id), json!({"name": decl_name}));
    }

    let Some(body) = body else {
        return err("Proc requires fields: name, params, ret, body (unless extern=true)");
    };
    let body_obj = body
        .as_obj()
        .ok_or_else(|| EmitError::new("Proc.body must be a Block"))?;

    // Dependency order: the signature must be committed before the body.
    let body_pos = obj.key_pos("body").expect("body read above");
    for key in ["name", "params", "ret"] {
        if let Some(pos) = obj.key_pos(key) {
            if pos > body_pos {
                return err(format!(
                    "Proc.{key} must appear before Proc.body (no implicit context)"
                ));
            }
        }
    }

    ctx.fn_ret = ret_ti.base;
    ctx.emit_typeinfo_if_needed(&ret_ti)?;
    ctx.emit_fn_type_if_needed(proc_idx)?;

    // Parameters and locals are per-proc.
    ctx.locals.clear();
    let mut param_node_ids = Vec::with_capacity(param_names.len());
    for (pname, ti) in param_names.iter().zip(&param_tis) {
        ctx.emit_typeinfo_if_needed(ti)?;
        ctx.push_local(pname, ti.clone(), false);
        let pid = ctx.new_node_id();
        ctx.node_line(&pid, "param", Some(&ti.sir_id), json!({"name": pname}))?;
        param_node_ids.push(pid);
    }

    let mut fnb = FnBuild::new(ctx);
    lower_block(ctx, &mut fnb, body_obj, None)?;

    if !fnb.cur_terminated() {
        return err(
            "Proc.body must end in a terminator (Return/branch); no implicit fallthrough",
        );
    }
    for block in &fnb.blocks {
        if !block.terminated {
            return err("unterminated block in CFG (missing Return or branch)");
        }
    }

    // Block nodes, then the enclosing fn node in CFG form.
    for block in &fnb.blocks {
        let stmts: Vec<serde_json::Value> = block.stmts.iter().map(|s| vref(s)).collect();
        let id = block.id.clone();
        ctx.node_line(&id, "block", None, json!({"stmts": stmts}))?;
    }

    let fn_id = ctx.procs[proc_idx].fn_id.clone();
    let fn_type_id = ctx.procs[proc_idx].fn_type_id.clone();
    let linkage = if name == "main" { "public" } else { "local" };
    let params_refs: Vec<serde_json::Value> =
        param_node_ids.iter().map(|p| vref(p)).collect();
    let blocks_refs: Vec<serde_json::Value> =
        fnb.blocks.iter().map(|b| vref(&b.id)).collect();
    ctx.node_line(
        &fn_id,
        "fn",
        Some(&fn_type_id),
        json!({
            "name": name,
            "linkage": linkage,
            "params": params_refs,
            "entry": vref(fnb.block_id(fnb.entry)),
            "blocks": blocks_refs,
        }),
    )
}
