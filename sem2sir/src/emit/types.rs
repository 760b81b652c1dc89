//! Type node parsing: `TypeRef` plus the 1-arity `ptr(T)`/`slice(T)`
//! type applications spelled as `Call` nodes.

use sem_asm::TypeId;

use crate::json::{Json, Obj};

use super::{err, tok_text, EmitCtx, Result, TypeInfo};

/// Parses a type position into a committed [`TypeInfo`]. Does not emit
/// any type definitions; callers emit on use.
pub(crate) fn parse_type(ctx: &mut EmitCtx<'_>, node: &Json) -> Result<TypeInfo> {
    let obj = match node.as_obj() {
        Some(o) => o,
        None => return err("type must be a node (no defaults)"),
    };
    match obj.kind() {
        Some("TypeRef") => {
            let text = tok_text(obj, "name")?;
            match TypeId::parse(text) {
                Some(base) => Ok(TypeInfo::prim(base)),
                None => err(format!(
                    "TypeRef.name must be a normalized builtin type id, got {text:?}"
                )),
            }
        }
        Some("Call") => parse_type_application(ctx, obj),
        _ => err("type must be TypeRef or a type application Call"),
    }
}

fn parse_type_application(ctx: &mut EmitCtx<'_>, obj: &Obj) -> Result<TypeInfo> {
    let callee = obj
        .get("callee")
        .and_then(Json::as_obj)
        .filter(|o| o.kind() == Some("TypeRef"))
        .ok_or_else(|| super::EmitError::new("type application callee must be TypeRef"))?;
    let ctor = tok_text(callee, "name")?.to_owned();

    let args = obj
        .get("args")
        .ok_or_else(|| super::EmitError::new("type application missing required field args"))?;
    let mut type_args = Vec::new();
    match args {
        Json::Null => {}
        Json::Obj(args_obj) if args_obj.kind() == Some("Args") => {
            let items = args_obj
                .get("items")
                .and_then(Json::as_arr)
                .ok_or_else(|| super::EmitError::new("Args.items must be array"))?;
            for item in items {
                type_args.push(parse_type(ctx, item)?);
            }
        }
        _ => return err("type application args must be null or Args"),
    }

    match ctor.as_str() {
        "ptr" => {
            if type_args.len() != 1 {
                return err("ptr(T) requires exactly 1 type argument");
            }
            let pointee = type_args[0].base;
            if pointee == TypeId::Ptr || pointee == TypeId::Slice {
                return err("ptr(T) does not support ptr/slice pointees");
            }
            if pointee != TypeId::Void
                && (pointee.store_tag().is_none() || pointee.align_bytes().is_none())
            {
                return err("ptr(T) pointee type is not representable");
            }
            Ok(TypeInfo::derived_ptr(pointee))
        }
        "slice" => {
            if type_args.len() != 1 {
                return err("slice(T) requires exactly 1 type argument");
            }
            // The stream's slice stays unparameterized.
            Ok(TypeInfo::prim(TypeId::Slice))
        }
        other => err(format!(
            "unsupported type constructor {other:?} (only ptr(T)/slice(T))"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::parse_document;

    fn ctx_parse(text: &str) -> Result<TypeInfo> {
        let node = parse_document(text).unwrap();
        let mut sink = Vec::new();
        let mut ctx = crate::emit::EmitCtx::new_for_tests(&mut sink);
        parse_type(&mut ctx, &node)
    }

    #[test]
    fn parses_base_type_refs() {
        let ti = ctx_parse(r#"{"k":"TypeRef","name":{"k":"tok","text":"i64"}}"#).unwrap();
        assert_eq!(ti.base, TypeId::I64);
        assert_eq!(ti.sir_id, "t:i64");
        assert_eq!(ti.ptr_of, None);
    }

    #[test]
    fn parses_ptr_applications() {
        let ti = ctx_parse(
            r#"{"k":"Call","callee":{"k":"TypeRef","name":{"k":"tok","text":"ptr"}},"args":{"k":"Args","items":[{"k":"TypeRef","name":{"k":"tok","text":"i32"}}]}}"#,
        )
        .unwrap();
        assert_eq!(ti.base, TypeId::Ptr);
        assert_eq!(ti.ptr_of, Some(TypeId::I32));
        assert_eq!(ti.sir_id, "t:p_i32");
    }

    #[test]
    fn ptr_of_void_is_opaque_but_allowed() {
        let ti = ctx_parse(
            r#"{"k":"Call","callee":{"k":"TypeRef","name":{"k":"tok","text":"ptr"}},"args":{"k":"Args","items":[{"k":"TypeRef","name":{"k":"tok","text":"void"}}]}}"#,
        )
        .unwrap();
        assert_eq!(ti.ptr_of, Some(TypeId::Void));
    }

    #[test]
    fn rejects_ptr_to_ptr_and_unknown_ctors() {
        let e = ctx_parse(
            r#"{"k":"Call","callee":{"k":"TypeRef","name":{"k":"tok","text":"ptr"}},"args":{"k":"Args","items":[{"k":"TypeRef","name":{"k":"tok","text":"ptr"}}]}}"#,
        )
        .unwrap_err();
        assert!(e.message.contains("ptr/slice pointees"));
        let e = ctx_parse(
            r#"{"k":"Call","callee":{"k":"TypeRef","name":{"k":"tok","text":"vec"}},"args":{"k":"Args","items":[{"k":"TypeRef","name":{"k":"tok","text":"i32"}}]}}"#,
        )
        .unwrap_err();
        assert!(e.message.contains("unsupported type constructor"));
    }

    #[test]
    fn slice_application_stays_unparameterized() {
        let ti = ctx_parse(
            r#"{"k":"Call","callee":{"k":"TypeRef","name":{"k":"tok","text":"slice"}},"args":{"k":"Args","items":[{"k":"TypeRef","name":{"k":"tok","text":"u8"}}]}}"#,
        )
        .unwrap();
        assert_eq!(ti.base, TypeId::Slice);
        assert_eq!(ti.sir_id, "t:slice");
    }
}
