//! `Call` lowering: direct calls to in-unit procedures and indirect
//! calls to extern declarations, typed exactly against the pre-scanned
//! signature.

use sem_asm::TypeId;
use serde_json::{json, Value};

use crate::json::{Json, Obj};

use super::expr::{lower_expr, name_id_text};
use super::{err, vref, EmitCtx, EmitError, Result, SirExpr};

pub(crate) fn lower_call(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
) -> Result<SirExpr> {
    let callee = obj
        .get("callee")
        .and_then(Json::as_obj)
        .ok_or_else(|| EmitError::new("Call missing required field callee"))?;
    let callee_name = name_id_text(callee)
        .map_err(|_| EmitError::new("Call.callee must be a Name in the proc table"))?;

    let args = obj
        .get("args")
        .ok_or_else(|| EmitError::new("Call missing required field args (no implicit empty args)"))?;

    let Some(proc_idx) = ctx.find_proc(&callee_name) else {
        return err(format!(
            "Call.callee {callee_name:?} refers to unknown Proc (no implicit externs/globals)"
        ));
    };
    let ret = ctx.procs[proc_idx].ret.clone();
    let params = ctx.procs[proc_idx].params.clone();

    if let Some(expected) = expected {
        if ret.base != expected {
            return err("Call return type mismatch against expected type");
        }
    }
    ctx.emit_typeinfo_if_needed(&ret)?;

    // Arguments, typed one-by-one against the signature.
    let mut arg_ids: Vec<String> = Vec::new();
    match args {
        Json::Null => {}
        Json::Obj(args_obj) if args_obj.kind() == Some("Args") => {
            let items = args_obj
                .get("items")
                .and_then(Json::as_arr)
                .ok_or_else(|| EmitError::new("Args missing required field items"))?;
            for item in items {
                if arg_ids.len() >= params.len() {
                    return err("Call args exceed Proc param arity");
                }
                let param = &params[arg_ids.len()];
                let item_obj = item
                    .as_obj()
                    .ok_or_else(|| EmitError::new("Args.items entries must be nodes"))?;
                let arg = lower_expr(ctx, item_obj, Some(param.base))?;
                if param.base == TypeId::Ptr {
                    if let Some(want) = param.ptr_of {
                        if arg.ptr_of != Some(want) {
                            return err(
                                "Call arg ptr pointee type does not match Proc param type",
                            );
                        }
                    }
                }
                arg_ids.push(arg.id);
            }
        }
        _ => return err("Call.args must be null or Args"),
    }
    if arg_ids.len() != params.len() {
        return err("Call args arity does not match Proc param arity");
    }

    let proc = &ctx.procs[proc_idx];
    let fn_id = proc.fn_id.clone();
    let fn_type_id = proc.fn_type_id.clone();
    let is_extern = proc.is_extern;
    let ret_ty = ret.base;
    let ret_ptr_of = ret.ptr_of;
    let tid = ret.sir_id.clone();

    let id = ctx.new_node_id();
    if is_extern {
        // Extern calls go through the declaration: call.indirect keyed by
        // the function type, with the decl.fn reference as args[0].
        let mut call_args: Vec<Value> = vec![vref(&fn_id)];
        call_args.extend(arg_ids.iter().map(|a| vref(a)));
        ctx.node_line(
            &id,
            "call.indirect",
            Some(&tid),
            json!({"sig": fn_type_id, "args": call_args}),
        )?;
    } else {
        let call_args: Vec<Value> = arg_ids.iter().map(|a| vref(a)).collect();
        ctx.node_line(
            &id,
            "call",
            Some(&tid),
            json!({"callee": vref(&fn_id), "args": call_args}),
        )?;
    }

    Ok(SirExpr {
        id,
        ty: ret_ty,
        ptr_of: ret_ptr_of,
        sir_type_id: tid,
    })
}
