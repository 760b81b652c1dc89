//! Strict Stage-4 boundary validator.
//!
//! Enforces the closed document schema before any lowering happens: exact
//! root keys, empty `diagnostics`, a `meta.types` mapping into the
//! normalized type vocabulary, `k` first in every node object, per-kind
//! field allow lists and required sets, token-leaf fields, and the closed
//! operator/type vocabularies. Every rejection carries a byte offset,
//! line/column and a folded `near` snippet.

use std::fmt;

use itertools::Itertools;
use sem_asm::{Intrinsic, OpId, TypeId};
use strum_shim::iter_all;

use crate::json::{DocIndex, Json, Obj, Pos};

/// Re-exported iteration helper so diagnostics can list whole
/// vocabularies without each call site depending on strum.
mod strum_shim {
    /// All canonical spellings of a closed vocabulary.
    pub fn iter_all<T: strum::IntoEnumIterator + Copy>(f: impl Fn(T) -> &'static str) -> String {
        T::iter().map(f).collect::<Vec<_>>().join(", ")
    }
}

/// A positioned validation diagnostic. The pipeline is fail-fast: the
/// first violation aborts the run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckDiag {
    /// Position of the offending node or value.
    pub pos: Pos,
    /// What went wrong.
    pub message: String,
    /// Optional hint naming the allowed values or expected schema.
    pub hint: Option<String>,
}

impl fmt::Display for CheckDiag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offset {} (line {}, col {}): {}",
            self.pos.offset, self.pos.line, self.pos.col, self.message
        )?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  {hint}")?;
        }
        write!(f, "\n  near: {}", self.pos.near)
    }
}

impl std::error::Error for CheckDiag {}

/// A validated Stage-4 document plus its position index.
#[derive(Debug)]
pub struct CheckedDoc {
    /// The parsed, ordered document.
    pub doc: Json,
    /// Object byte-offset index for later diagnostics.
    pub index: DocIndex,
}

/// Root keys the schema accepts but the pipeline ignores.
const IGNORED_ROOT_KEYS: [&str; 4] = ["symbols", "symtab", "sym_by_tok_i", "tokens"];

/// Token-leaf field allow list.
const TOK_KEYS: [&str; 6] = ["nid", "i", "kind", "start_byte", "end_byte", "text"];

/// Expected value shape of one node field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Must be a token leaf.
    Tok,
    /// Must be a node object.
    Node,
    /// Node object or `null`.
    NodeOrNull,
    /// Array of node objects.
    NodeList,
    /// Array of node objects drawn from a fixed kind set.
    NodeListOf(&'static [Intrinsic]),
    /// `null` or a node of a fixed kind.
    NullOrKind(Intrinsic),
    /// Plain JSON string holding a semantic operator id.
    OpString,
    /// Plain JSON boolean.
    Bool,
    /// Accepted and ignored.
    Any,
}

/// Field schema of one intrinsic: `(name, shape, required)`.
type FieldSpec = (&'static str, Shape, bool);

fn fields_of(k: Intrinsic) -> &'static [FieldSpec] {
    use Intrinsic::*;
    use Shape::*;
    match k {
        Unit => &[("name", Tok, false), ("items", NodeList, true)],
        Proc => &[
            ("name", Tok, true),
            ("params", NodeListOf(&[Param, ParamPat]), true),
            ("ret", Node, true),
            ("decls", Any, false),
            ("body", NodeOrNull, false),
            ("extern", Bool, false),
            ("link_name", Tok, false),
        ],
        Block => &[("items", NodeList, true)],
        Var => &[("name", Tok, true), ("type", NodeOrNull, false), ("init", NodeOrNull, false)],
        VarPat => &[
            ("pat", Node, true),
            ("type", NodeOrNull, false),
            ("init", Node, true),
        ],
        ExprStmt => &[("expr", NodeOrNull, true)],
        Return => &[("value", NodeOrNull, false)],
        If => &[
            ("cond", Node, true),
            ("then", Node, true),
            ("else", NodeOrNull, false),
        ],
        While => &[("cond", Node, true), ("body", Node, true)],
        Loop => &[("body", Node, true)],
        DoWhile => &[("body", Node, true), ("cond", Node, true)],
        For => &[
            ("init", NodeOrNull, false),
            ("cond", NodeOrNull, false),
            ("step", NodeOrNull, false),
            ("body", Node, true),
        ],
        ForInt => &[
            ("var", Node, true),
            ("end", Node, true),
            ("step", NodeOrNull, false),
            ("body", Node, true),
        ],
        Break | Continue => &[],
        Param => &[("name", Tok, true), ("type", Node, true), ("mode", Any, false)],
        ParamPat => &[("pat", Node, true), ("type", Node, true), ("mode", Any, false)],
        Call => &[("callee", Node, true), ("args", NullOrKind(Args), true)],
        Args => &[("items", NodeList, true)],
        PatBind => &[("name", Tok, true)],
        PatInt => &[("lit", Tok, true)],
        PatWild => &[],
        Name => &[("id", Tok, true)],
        TypeRef => &[("name", Tok, true)],
        Int => &[("lit", Tok, true)],
        F32 | F64 => &[("bits", Tok, true)],
        UnitVal | True | False | Nil => &[],
        Bytes | StringUtf8 | CStr | Char => &[("lit", Tok, true)],
        Paren | Not | Neg | BitNot | AddrOf | Deref => &[("expr", Node, true)],
        Bin => &[
            ("op", OpString, true),
            ("op_tok", Tok, false),
            ("lhs", Node, true),
            ("rhs", Node, true),
        ],
        Match => &[
            ("cond", Node, true),
            ("arms", NodeListOf(&[MatchArm]), true),
        ],
        MatchArm => &[
            ("pat", Node, true),
            ("guard", NodeOrNull, false),
            ("body", Node, true),
        ],
        // All explicit conversions take a single expression operand.
        ZExtI64FromI32 | SExtI64FromI32 | TruncI32FromI64 | F64FromI32S | F32FromI32S
        | F64FromI32U | F32FromI32U | TruncSatI32FromF64S | TruncSatI32FromF32S
        | TruncSatI32FromF64U | TruncSatI32FromF32U | F64FromI64S | F32FromI64S | F64FromI64U
        | F32FromI64U | TruncSatI64FromF64S | TruncSatI64FromF32S | TruncSatI64FromF64U
        | TruncSatI64FromF32U | PtrFromI64 | I64FromPtr => &[("expr", Node, true)],
    }
}

struct Checker<'a> {
    text: &'a str,
    index: DocIndex,
}

impl<'a> Checker<'a> {
    fn diag(&self, obj: &Obj, message: String, hint: Option<String>) -> CheckDiag {
        CheckDiag {
            pos: Pos::at(self.text, self.index.offset_of(obj)),
            message,
            hint,
        }
    }

    fn check_root(&self, doc: &Json) -> Result<(), CheckDiag> {
        let root = doc.as_obj().ok_or_else(|| CheckDiag {
            pos: Pos::at(self.text, 0),
            message: "root must be an object".into(),
            hint: None,
        })?;

        for (key, value) in &root.fields {
            match key.as_str() {
                "ast" | "diagnostics" | "meta" => {}
                k if IGNORED_ROOT_KEYS.contains(&k) => {}
                other => {
                    return Err(self.diag(
                        root,
                        format!("unknown root key {other:?}"),
                        Some(
                            "allowed: ast, diagnostics, meta (plus ignored: symbols, symtab, \
                             sym_by_tok_i, tokens)"
                                .into(),
                        ),
                    ));
                }
            }
            let _ = value;
        }

        let diagnostics = root.get("diagnostics").ok_or_else(|| {
            self.diag(root, "missing required field diagnostics".into(), None)
        })?;
        match diagnostics.as_arr() {
            Some([]) => {}
            _ => {
                return Err(self.diag(
                    root,
                    "diagnostics must be [] exactly (reject upstream errors before lowering)"
                        .into(),
                    None,
                ));
            }
        }

        let meta = root
            .get("meta")
            .ok_or_else(|| self.diag(root, "missing required field meta".into(), None))?;
        self.check_meta(root, meta)?;

        let ast = root
            .get("ast")
            .ok_or_else(|| self.diag(root, "missing required field ast".into(), None))?;
        let ast_obj = ast
            .as_obj()
            .ok_or_else(|| self.diag(root, "ast must be a node object".into(), None))?;
        self.check_node(ast_obj)?;
        if ast_obj.kind() != Some("Unit") {
            return Err(self.diag(ast_obj, "ast must be Unit".into(), None));
        }
        Ok(())
    }

    fn check_meta(&self, root: &Obj, meta: &Json) -> Result<(), CheckDiag> {
        let meta = meta
            .as_obj()
            .ok_or_else(|| self.diag(root, "meta must be an object".into(), None))?;

        let types = meta.get("types").ok_or_else(|| {
            self.diag(meta, "meta.types is required (no implicitness)".into(), None)
        })?;
        let types = types
            .as_obj()
            .ok_or_else(|| self.diag(meta, "meta.types must be an object".into(), None))?;
        for (surface, value) in &types.fields {
            let Some(normalized) = value.as_str() else {
                return Err(self.diag(types, "meta.types values must be strings".into(), None));
            };
            let Some(tid) = TypeId::parse(normalized) else {
                return Err(self.diag(
                    types,
                    format!(
                        "meta.types[{surface:?}] must be a normalized builtin type id, got \
                         {normalized:?}"
                    ),
                    Some(format!("allowed: {}", iter_all(TypeId::as_str))),
                ));
            };
            if surface == "@default.int" || surface == "__default_int" {
                if tid != TypeId::I32 && tid != TypeId::I64 {
                    return Err(self.diag(
                        types,
                        "meta.types['@default.int'] must be 'i32' or 'i64'".into(),
                        None,
                    ));
                }
            }
            if surface == "@default.ptr.pointee" || surface == "__default_ptr_pointee" {
                let storable = tid != TypeId::Ptr
                    && tid.store_tag().is_some()
                    && tid.load_tag().is_some()
                    && tid.align_bytes().is_some();
                if !storable {
                    return Err(self.diag(
                        types,
                        "meta.types['@default.ptr.pointee'] must be a load/store-capable \
                         non-ptr value type"
                            .into(),
                        None,
                    ));
                }
            }
        }

        if let Some(ops) = meta.get("ops") {
            match ops.as_obj() {
                Some(o) if o.fields.is_empty() => {}
                Some(o) => {
                    return Err(self.diag(
                        o,
                        "meta.ops must be {} (commit operators upstream)".into(),
                        None,
                    ));
                }
                None => {
                    return Err(self.diag(meta, "meta.ops must be an object".into(), None));
                }
            }
        }
        Ok(())
    }

    fn check_tok(&self, obj: &Obj) -> Result<(), CheckDiag> {
        let mut seen_text = false;
        for (key, value) in obj.fields.iter().skip(1) {
            if !TOK_KEYS.contains(&key.as_str()) {
                return Err(self.diag(
                    obj,
                    format!("field {key:?} is not allowed on k='tok'"),
                    Some(format!("allowed fields for tok: k, {}", TOK_KEYS.join(", "))),
                ));
            }
            if key == "text" {
                if value.as_str().is_none() {
                    return Err(self.diag(obj, "tok.text must be a string".into(), None));
                }
                seen_text = true;
            }
        }
        if !seen_text {
            return Err(self.diag(obj, "tok requires field: text".into(), None));
        }
        Ok(())
    }

    fn check_node(&self, obj: &Obj) -> Result<(), CheckDiag> {
        let Some((first_key, first_val)) = obj.fields.first() else {
            return Err(self.diag(obj, "node object must start with key 'k'".into(), None));
        };
        if first_key != "k" {
            return Err(self.diag(obj, "node object must start with key 'k'".into(), None));
        }
        let Some(k_str) = first_val.as_str() else {
            return Err(self.diag(obj, "node field k must be a string".into(), None));
        };

        if k_str == "tok" {
            return self.check_tok(obj);
        }

        let Some(kind) = Intrinsic::parse(k_str) else {
            return Err(self.diag(
                obj,
                format!("unknown node kind {k_str:?}"),
                Some(format!("allowed: {}", iter_all(Intrinsic::as_str))),
            ));
        };

        let specs = fields_of(kind);
        let mut seen = vec![false; specs.len()];

        for (key, value) in obj.fields.iter().skip(1) {
            if key == "nid" || key == "span" {
                continue;
            }
            let Some(spec_idx) = specs.iter().position(|(name, _, _)| name == key) else {
                let allowed = std::iter::once("k")
                    .chain(["nid", "span"])
                    .chain(specs.iter().map(|(name, _, _)| *name))
                    .join(", ");
                return Err(self.diag(
                    obj,
                    format!("field {key:?} is not allowed on k={k_str:?}"),
                    Some(format!("allowed fields for {k_str}: {allowed}")),
                ));
            };
            seen[spec_idx] = true;
            self.check_field(obj, kind, key, specs[spec_idx].1, value)?;
        }

        let missing: Vec<&str> = specs
            .iter()
            .zip(&seen)
            .filter(|((_, _, required), seen)| *required && !**seen)
            .map(|((name, _, _), _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(self.diag(
                obj,
                format!("{k_str} requires fields: {}", missing.join(", ")),
                Some(schema_hint(kind)),
            ));
        }
        Ok(())
    }

    fn check_field(
        &self,
        parent: &Obj,
        kind: Intrinsic,
        key: &str,
        shape: Shape,
        value: &Json,
    ) -> Result<(), CheckDiag> {
        let field = format!("{}.{key}", kind.as_str());
        match shape {
            Shape::Any => Ok(()),
            Shape::Bool => match value {
                Json::Bool(_) => Ok(()),
                other => Err(self.diag(
                    parent,
                    format!("{field} must be true or false, got {}", other.shape()),
                    None,
                )),
            },
            Shape::Tok => {
                let obj = value.as_obj().ok_or_else(|| {
                    self.diag(
                        parent,
                        format!(
                            "{field} must be a token leaf, got {} (no scalar shortcuts)",
                            value.shape()
                        ),
                        None,
                    )
                })?;
                if obj.kind() != Some("tok") {
                    return Err(self.diag(obj, format!("{field} must be a token leaf"), None));
                }
                self.check_tok(obj)?;
                if kind == Intrinsic::TypeRef && key == "name" {
                    let text = obj
                        .get("text")
                        .and_then(Json::as_str)
                        .expect("tok text checked");
                    if TypeId::parse(text).is_none() {
                        return Err(self.diag(
                            obj,
                            format!(
                                "TypeRef.name must be a normalized builtin type id (e.g. 'i64'), \
                                 got {text:?}"
                            ),
                            Some(format!(
                                "hint: commit builtin types upstream; allowed: {}",
                                iter_all(TypeId::as_str)
                            )),
                        ));
                    }
                }
                Ok(())
            }
            Shape::OpString => {
                let Some(op) = value.as_str() else {
                    return Err(self.diag(
                        parent,
                        format!("{field} must be a string operator id"),
                        None,
                    ));
                };
                if OpId::parse(op).is_none() {
                    return Err(self.diag(
                        parent,
                        format!(
                            "Bin.op must be a semantic operator id (e.g. 'core.add'), got {op:?}"
                        ),
                        Some(format!(
                            "hint: commit surface operators upstream; allowed: {}",
                            iter_all(OpId::as_str)
                        )),
                    ));
                }
                Ok(())
            }
            Shape::Node => {
                let obj = value.as_obj().ok_or_else(|| {
                    self.diag(
                        parent,
                        format!("{field} must be a node object, got {}", value.shape()),
                        None,
                    )
                })?;
                self.check_node(obj)
            }
            Shape::NodeOrNull => {
                if value.is_null() {
                    return Ok(());
                }
                let obj = value.as_obj().ok_or_else(|| {
                    self.diag(
                        parent,
                        format!("{field} must be null or a node object, got {}", value.shape()),
                        None,
                    )
                })?;
                self.check_node(obj)
            }
            Shape::NodeList => {
                let items = value.as_arr().ok_or_else(|| {
                    self.diag(parent, format!("{field} must be an array"), None)
                })?;
                for item in items {
                    let obj = item.as_obj().ok_or_else(|| {
                        self.diag(
                            parent,
                            format!("{field} entries must be node objects"),
                            None,
                        )
                    })?;
                    self.check_node(obj)?;
                }
                Ok(())
            }
            Shape::NodeListOf(kinds) => {
                let items = value.as_arr().ok_or_else(|| {
                    self.diag(parent, format!("{field} must be an array"), None)
                })?;
                for item in items {
                    let obj = item.as_obj().ok_or_else(|| {
                        self.diag(
                            parent,
                            format!("{field} entries must be node objects"),
                            None,
                        )
                    })?;
                    self.check_node(obj)?;
                    let ok = obj
                        .kind()
                        .and_then(Intrinsic::parse)
                        .map(|k| kinds.contains(&k))
                        .unwrap_or(false);
                    if !ok {
                        let names = kinds.iter().map(|k| k.as_str()).join("|");
                        return Err(self.diag(
                            obj,
                            format!("{field} entries must be {names}"),
                            None,
                        ));
                    }
                }
                Ok(())
            }
            Shape::NullOrKind(expected) => {
                if value.is_null() {
                    return Ok(());
                }
                let obj = value.as_obj().ok_or_else(|| {
                    self.diag(
                        parent,
                        format!("{field} must be null or {}", expected.as_str()),
                        None,
                    )
                })?;
                self.check_node(obj)?;
                if obj.kind() != Some(expected.as_str()) {
                    return Err(self.diag(
                        obj,
                        format!("{field} must be null or {}", expected.as_str()),
                        None,
                    ));
                }
                Ok(())
            }
        }
    }
}

fn schema_hint(kind: Intrinsic) -> String {
    let specs = fields_of(kind);
    let body = specs
        .iter()
        .map(|(name, shape, required)| {
            let shape = match shape {
                Shape::Tok => "tok",
                Shape::Node => "node",
                Shape::NodeOrNull => "null | node",
                Shape::NodeList => "[node, ...]",
                Shape::NodeListOf(_) => "[node, ...]",
                Shape::NullOrKind(_) => "null | node",
                Shape::OpString => "string(core.*)",
                Shape::Bool => "true | false",
                Shape::Any => "(ignored)",
            };
            if *required {
                format!("{name}: {shape}")
            } else {
                format!("[{name}: {shape}]")
            }
        })
        .join(", ");
    format!("{} expects: {body}", kind.as_str())
}

/// Validates a Stage-4 document from its raw text.
pub fn check_text(text: &str) -> Result<CheckedDoc, CheckDiag> {
    let index = DocIndex::scan(text);
    let doc = crate::json::parse_document(text).map_err(|message| CheckDiag {
        pos: Pos::at(text, 0),
        message,
        hint: None,
    })?;
    let checker = Checker { text, index };
    checker.check_root(&doc)?;
    Ok(CheckedDoc {
        doc,
        index: checker.index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(ast: &str) -> String {
        format!(r#"{{"ast":{ast},"diagnostics":[],"meta":{{"types":{{}}}}}}"#)
    }

    fn check(text: &str) -> Result<CheckedDoc, CheckDiag> {
        check_text(text)
    }

    #[test]
    fn accepts_an_empty_unit() {
        check(&wrap(r#"{"k":"Unit","items":[]}"#)).unwrap();
    }

    #[test]
    fn rejects_unknown_root_keys_and_tolerates_ignored_ones() {
        let text = r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{}},"tokens":[1]}"#;
        check(text).unwrap();
        let text = r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{}},"bogus":1}"#;
        let err = check(text).unwrap_err();
        assert!(err.message.contains("unknown root key"));
    }

    #[test]
    fn rejects_nonempty_diagnostics() {
        let text = r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[{"x":1}],"meta":{"types":{}}}"#;
        let err = check(text).unwrap_err();
        assert!(err.message.contains("diagnostics must be []"));
    }

    #[test]
    fn requires_meta_types() {
        let text = r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{}}"#;
        let err = check(text).unwrap_err();
        assert!(err.message.contains("meta.types is required"));
    }

    #[test]
    fn rejects_unknown_normalized_types_in_meta() {
        let text =
            r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{"Int":"int32"}}}"#;
        let err = check(text).unwrap_err();
        assert!(err.message.contains("normalized builtin type id"));
        assert!(err.hint.unwrap().contains("i32"));
    }

    #[test]
    fn checks_default_int_policy() {
        let ok =
            r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{"@default.int":"i64"}}}"#;
        check(ok).unwrap();
        let bad =
            r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{"@default.int":"u8"}}}"#;
        let err = check(bad).unwrap_err();
        assert!(err.message.contains("@default.int"));
        let bad = r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{"@default.ptr.pointee":"ptr"}}}"#;
        assert!(check(bad).is_err());
        let ok = r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{"@default.ptr.pointee":"i32"}}}"#;
        check(ok).unwrap();
    }

    #[test]
    fn meta_ops_must_be_empty() {
        let text =
            r#"{"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{},"ops":{"+":"core.add"}}}"#;
        let err = check(text).unwrap_err();
        assert!(err.message.contains("meta.ops must be {}"));
    }

    #[test]
    fn requires_k_first_in_node_objects() {
        let err = check(&wrap(r#"{"items":[],"k":"Unit"}"#)).unwrap_err();
        assert!(err.message.contains("start with key 'k'"));
    }

    #[test]
    fn rejects_unknown_intrinsics_with_the_allowed_list() {
        let err = check(&wrap(r#"{"k":"Frobnicate"}"#)).unwrap_err();
        assert!(err.message.contains("unknown node kind"));
        assert!(err.hint.unwrap().contains("Proc"));
    }

    #[test]
    fn rejects_unknown_fields_per_intrinsic() {
        let err = check(&wrap(r#"{"k":"Unit","items":[],"bogus":1}"#)).unwrap_err();
        assert!(err.message.contains("not allowed on k=\"Unit\""));
    }

    #[test]
    fn enforces_token_leaf_fields() {
        // Name.id as a plain string is rejected even though the text would
        // be fine.
        let ast = r#"{"k":"Unit","items":[{"k":"Proc","name":{"k":"tok","text":"main"},"params":[],"ret":{"k":"TypeRef","name":{"k":"tok","text":"void"}},"body":{"k":"Block","items":[{"k":"ExprStmt","expr":{"k":"Name","id":"x"}}]}}]}"#;
        let err = check(&wrap(ast)).unwrap_err();
        assert!(err.message.contains("token leaf"), "{}", err.message);
    }

    #[test]
    fn tok_requires_text_and_closed_fields() {
        let err = check(&wrap(r#"{"k":"Unit","name":{"k":"tok","nid":1},"items":[]}"#))
            .unwrap_err();
        assert!(err.message.contains("tok requires field: text"));
        let err = check(&wrap(
            r#"{"k":"Unit","name":{"k":"tok","text":"u","extra":1},"items":[]}"#,
        ))
        .unwrap_err();
        assert!(err.message.contains("not allowed on k='tok'"));
    }

    #[test]
    fn bin_op_must_be_a_semantic_id() {
        let ast = r#"{"k":"Unit","items":[{"k":"Proc","name":{"k":"tok","text":"main"},"params":[],"ret":{"k":"TypeRef","name":{"k":"tok","text":"void"}},"body":{"k":"Block","items":[{"k":"ExprStmt","expr":{"k":"Bin","op":"+","lhs":{"k":"Int","lit":{"k":"tok","text":"1"}},"rhs":{"k":"Int","lit":{"k":"tok","text":"2"}}}}]}}]}"#;
        let err = check(&wrap(ast)).unwrap_err();
        assert!(err.message.contains("semantic operator id"));
        assert!(err.hint.unwrap().contains("core.add"));
    }

    #[test]
    fn type_ref_names_are_vocabulary_checked() {
        let ast = r#"{"k":"Unit","items":[{"k":"Proc","name":{"k":"tok","text":"main"},"params":[],"ret":{"k":"TypeRef","name":{"k":"tok","text":"I64"}},"body":null}]}"#;
        let err = check(&wrap(ast)).unwrap_err();
        assert!(err.message.contains("TypeRef.name"));
    }

    #[test]
    fn reports_missing_required_fields_with_a_schema_citation() {
        let err = check(&wrap(r#"{"k":"If","cond":{"k":"True"}}"#)).unwrap_err();
        assert!(err.message.contains("If requires fields: then"));
        assert!(err.hint.unwrap().starts_with("If expects:"));
    }

    #[test]
    fn call_args_must_be_null_or_args() {
        let err = check(&wrap(
            r#"{"k":"Call","callee":{"k":"Name","id":{"k":"tok","text":"f"}},"args":[1]}"#,
        ))
        .unwrap_err();
        assert!(err.message.contains("null or Args"));
    }

    #[test]
    fn match_arms_must_be_match_arms() {
        let err = check(&wrap(
            r#"{"k":"Match","cond":{"k":"True"},"arms":[{"k":"True"}]}"#,
        ))
        .unwrap_err();
        assert!(err.message.contains("MatchArm"));
    }

    #[test]
    fn diagnostics_carry_positions() {
        let text = wrap(r#"{"k":"Unit","items":[{"k":"Bogus"}]}"#);
        let err = check(&text).unwrap_err();
        let expected = text.find(r#"{"k":"Bogus"}"#).unwrap();
        assert_eq!(err.pos.offset, expected);
        assert!(err.pos.line >= 1);
        assert!(err.pos.near.starts_with(r#"{"k":"Bogus"#));
    }

    #[test]
    fn duplicate_keys_fail_at_parse_time() {
        let err = check(r#"{"ast":{"k":"Unit","items":[]},"ast":{"k":"Unit","items":[]},"diagnostics":[],"meta":{"types":{}}}"#)
            .unwrap_err();
        assert!(err.message.contains("duplicate object key"));
    }
}
