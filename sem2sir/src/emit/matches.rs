//! `Match` lowering to `sem.switch` over an integer scrutinee.
//!
//! MVP shape: `PatInt` arms plus exactly one `PatWild` default, no
//! guards. Arm bodies are value-encoded branch operands.

use sem_asm::TypeId;
use serde_json::{json, Value};

use crate::json::{Json, Obj};

use super::expr::{lower_expr, probe_expr_type};
use super::{err, vref, EmitCtx, EmitError, Result, SirExpr};

pub(crate) fn lower_match(
    ctx: &mut EmitCtx<'_>,
    obj: &Obj,
    expected: Option<TypeId>,
) -> Result<SirExpr> {
    let Some(expected) = expected else {
        return err("Match requires an expected result type (no inference)");
    };

    let cond_pos = obj
        .key_pos("cond")
        .ok_or_else(|| EmitError::new("Match missing required field cond"))?;
    if let Some(arms_pos) = obj.key_pos("arms") {
        if arms_pos < cond_pos {
            return err("Match.cond must appear before Match.arms (no implicit context)");
        }
    }

    let cond = obj
        .get("cond")
        .and_then(Json::as_obj)
        .ok_or_else(|| EmitError::new("Match missing required field cond"))?;
    let scrut_ty = match probe_expr_type(ctx, cond) {
        Some(t) if t == TypeId::I32 || t == TypeId::I64 => t,
        Some(_) => return err("Match switch scrutinee type must be i32 or i64"),
        None => {
            return err(
                "Match scrutinee requires an explicitly typed expression (e.g. Name of a typed \
                 local)",
            )
        }
    };
    let scrut = lower_expr(ctx, cond, Some(scrut_ty))?;

    let arms = obj
        .get("arms")
        .and_then(Json::as_arr)
        .ok_or_else(|| EmitError::new("Match missing required field arms"))?;

    let mut cases: Vec<(String, String)> = Vec::new();
    let mut default_body: Option<String> = None;

    for arm in arms {
        let arm = arm
            .as_obj()
            .filter(|a| a.kind() == Some("MatchArm"))
            .ok_or_else(|| EmitError::new("Match.arms entries must be MatchArm"))?;
        if let Some(guard) = arm.get("guard") {
            if !guard.is_null() {
                return err("MatchArm.guard must be null (no guards in MVP)");
            }
        }
        let pat = arm
            .get("pat")
            .and_then(Json::as_obj)
            .ok_or_else(|| EmitError::new("MatchArm missing required field pat"))?;
        let body = arm
            .get("body")
            .and_then(Json::as_obj)
            .ok_or_else(|| EmitError::new("MatchArm missing required field body"))?;

        match pat.kind() {
            Some("PatWild") => {
                if default_body.is_some() {
                    return err("Match allows exactly one PatWild default arm");
                }
                let value = lower_expr(ctx, body, Some(expected))?;
                default_body = Some(value.id);
            }
            Some("PatInt") => {
                let lit = super::tok_text(pat, "lit")?.to_owned();
                let value = lower_expr(ctx, body, Some(expected))?;
                let lit_id = emit_case_lit(ctx, scrut_ty, &lit)?;
                cases.push((lit_id, value.id));
            }
            _ => return err("MatchArm.pat must be PatInt or PatWild"),
        }
    }

    let Some(default_body) = default_body else {
        return err("Match requires a PatWild default arm");
    };

    ctx.emit_type_if_needed(expected)?;
    ctx.sem_v1 = true;

    let id = ctx.new_node_id();
    let case_values: Vec<Value> = cases
        .iter()
        .map(|(lit, body)| {
            json!({"lit": vref(lit), "body": {"kind": "val", "v": vref(body)}})
        })
        .collect();
    ctx.node_line(
        &id,
        "sem.switch",
        Some(expected.sir_type_id()),
        json!({
            "args": [vref(&scrut.id)],
            "cases": case_values,
            "default": {"kind": "val", "v": vref(&default_body)},
        }),
    )?;
    Ok(SirExpr {
        id,
        ty: expected,
        ptr_of: None,
        sir_type_id: expected.sir_type_id().to_owned(),
    })
}

/// Emits the integer constant for one `PatInt` literal (base-10 or 0x).
fn emit_case_lit(ctx: &mut EmitCtx<'_>, scrut_ty: TypeId, lit: &str) -> Result<String> {
    let (neg, digits) = match lit.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, lit),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    }
    .map_err(|_| EmitError::new("PatInt literal token is not a valid integer (base10/0x)"))?;
    let v = if neg { -magnitude } else { magnitude };
    if scrut_ty == TypeId::I32 && (v < i64::from(i32::MIN) || v > i64::from(i32::MAX)) {
        return err("PatInt literal does not fit i32");
    }
    ctx.emit_type_if_needed(scrut_ty)?;
    let tag = if scrut_ty == TypeId::I32 {
        "const.i32"
    } else {
        "const.i64"
    };
    let id = ctx.new_node_id();
    ctx.node_line(&id, tag, Some(scrut_ty.sir_type_id()), json!({"value": v}))?;
    Ok(id)
}
