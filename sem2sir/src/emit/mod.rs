//! SEM2SIR lowering: Stage-4 AST to the `sir-v1.0` JSON-lines stream.
//!
//! Strict, expected-type-driven translation. The lowerer never guesses:
//! every expression position commits a type (or defers to an explicit
//! `@default.*` policy from the document metadata), unknown constructs
//! are hard errors, and every emitted function is a CFG whose blocks all
//! terminate.

pub(crate) mod bin;
pub(crate) mod call;
pub(crate) mod expr;
pub(crate) mod matches;
pub(crate) mod stmt;
pub(crate) mod types;
pub(crate) mod unit;

use std::collections::HashSet;
use std::fmt;
use std::io::Write;

use sem_asm::TypeId;
use serde_json::{json, Map, Value};

use crate::check::CheckedDoc;
use crate::json::{Json, Obj};

/// IR version stamped on every stream line.
pub const IR_VERSION: &str = "sir-v1.0";

/// A single fail-fast lowering error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitError {
    /// What went wrong.
    pub message: String,
}

impl EmitError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EmitError {}

impl From<std::io::Error> for EmitError {
    fn from(e: std::io::Error) -> Self {
        EmitError::new(format!("failed to write SIR output: {e}"))
    }
}

pub(crate) type Result<T> = std::result::Result<T, EmitError>;

pub(crate) fn err<T>(message: impl Into<String>) -> Result<T> {
    Err(EmitError::new(message))
}

/// A committed type: a builtin base plus an optional explicit pointee for
/// derived `ptr(T)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypeInfo {
    pub base: TypeId,
    pub ptr_of: Option<TypeId>,
    pub sir_id: String,
}

impl TypeInfo {
    pub(crate) fn prim(base: TypeId) -> Self {
        Self {
            base,
            ptr_of: None,
            sir_id: base.sir_type_id().to_owned(),
        }
    }

    pub(crate) fn derived_ptr(pointee: TypeId) -> Self {
        Self {
            base: TypeId::Ptr,
            ptr_of: Some(pointee),
            sir_id: pointee.derived_ptr_type_id(),
        }
    }
}

/// A lowered expression: the SIR node id holding its value plus its
/// committed type.
#[derive(Debug, Clone)]
pub(crate) struct SirExpr {
    pub id: String,
    pub ty: TypeId,
    pub ptr_of: Option<TypeId>,
    pub sir_type_id: String,
}

/// Pre-scanned procedure signature.
#[derive(Debug, Clone)]
pub(crate) struct ProcInfo {
    pub name: String,
    pub fn_id: String,
    pub fn_type_id: String,
    pub params: Vec<TypeInfo>,
    pub ret: TypeInfo,
    pub is_extern: bool,
    pub link_name: Option<String>,
}

/// One local binding of the current procedure.
#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub name: String,
    pub ti: TypeInfo,
    pub is_slot: bool,
}

/// Break/continue targets of the innermost loop (block indexes).
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTargets {
    pub break_to: usize,
    pub continue_to: usize,
}

/// One CFG block under construction.
pub(crate) struct BlockBuild {
    pub id: String,
    pub stmts: Vec<String>,
    pub terminated: bool,
}

/// CFG of the function body under construction.
pub(crate) struct FnBuild {
    pub blocks: Vec<BlockBuild>,
    pub cur: usize,
    pub entry: usize,
}

impl FnBuild {
    pub(crate) fn new(ctx: &mut EmitCtx<'_>) -> Self {
        let entry = BlockBuild {
            id: ctx.new_node_id(),
            stmts: Vec::new(),
            terminated: false,
        };
        FnBuild {
            blocks: vec![entry],
            cur: 0,
            entry: 0,
        }
    }

    pub(crate) fn new_block(&mut self, ctx: &mut EmitCtx<'_>) -> usize {
        self.blocks.push(BlockBuild {
            id: ctx.new_node_id(),
            stmts: Vec::new(),
            terminated: false,
        });
        self.blocks.len() - 1
    }

    pub(crate) fn block_id(&self, idx: usize) -> &str {
        &self.blocks[idx].id
    }

    pub(crate) fn cur_terminated(&self) -> bool {
        self.blocks[self.cur].terminated
    }

    /// Appends a statement to the current block; appending after a
    /// terminator is a hard error.
    pub(crate) fn append(&mut self, stmt_id: String, is_terminator: bool) -> Result<()> {
        let block = &mut self.blocks[self.cur];
        if block.terminated {
            return err("statement after terminator (no implicit control flow)");
        }
        block.stmts.push(stmt_id);
        if is_terminator {
            block.terminated = true;
        }
        Ok(())
    }

    /// Flushes buffered effect statements, preserving order.
    pub(crate) fn append_effects(&mut self, effects: Vec<String>) -> Result<()> {
        for id in effects {
            self.append(id, false)?;
        }
        Ok(())
    }
}

/// Lowering context for one document.
pub struct EmitCtx<'w> {
    out: &'w mut dyn Write,
    next_node: u32,
    pub(crate) procs: Vec<ProcInfo>,
    emitted_fn_types: HashSet<String>,
    pub(crate) locals: Vec<Local>,
    pub(crate) effects: Vec<String>,
    pub(crate) fn_ret: TypeId,
    pub(crate) default_int: Option<TypeId>,
    pub(crate) default_ptr_pointee: Option<TypeId>,
    pub(crate) sem_v1: bool,
    emitted_types: HashSet<TypeId>,
    emitted_ptr_types: HashSet<TypeId>,
}

impl<'w> EmitCtx<'w> {
    fn new(out: &'w mut dyn Write) -> Self {
        Self {
            out,
            next_node: 1,
            procs: Vec::new(),
            emitted_fn_types: HashSet::new(),
            locals: Vec::new(),
            effects: Vec::new(),
            fn_ret: TypeId::Void,
            default_int: None,
            default_ptr_pointee: None,
            sem_v1: false,
            emitted_types: HashSet::new(),
            emitted_ptr_types: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(out: &'w mut dyn Write) -> Self {
        Self::new(out)
    }

    /// Allocates the next `n:<i>` node id.
    pub(crate) fn new_node_id(&mut self) -> String {
        let id = format!("n:{}", self.next_node);
        self.next_node += 1;
        id
    }

    /// Writes one stream line.
    pub(crate) fn line(&mut self, value: Value) -> Result<()> {
        writeln!(self.out, "{value}")?;
        Ok(())
    }

    fn blank_line(&mut self) -> Result<()> {
        writeln!(self.out)?;
        Ok(())
    }

    /// Writes a node line: `{"ir":…,"k":"node","id":…,"tag":…[,"type_ref":…],"fields":…}`.
    pub(crate) fn node_line(
        &mut self,
        id: &str,
        tag: &str,
        type_ref: Option<&str>,
        fields: Value,
    ) -> Result<()> {
        let mut obj = Map::new();
        obj.insert("ir".into(), json!(IR_VERSION));
        obj.insert("k".into(), json!("node"));
        obj.insert("id".into(), json!(id));
        obj.insert("tag".into(), json!(tag));
        if let Some(tr) = type_ref {
            obj.insert("type_ref".into(), json!(tr));
        }
        obj.insert("fields".into(), fields);
        self.line(Value::Object(obj))
    }

    /// Emits a primitive type definition once.
    pub(crate) fn emit_type_if_needed(&mut self, t: TypeId) -> Result<()> {
        if self.emitted_types.contains(&t) {
            return Ok(());
        }
        self.emitted_types.insert(t);
        self.line(json!({
            "ir": IR_VERSION,
            "k": "type",
            "id": t.sir_type_id(),
            "kind": "prim",
            "prim": t.as_str(),
        }))
    }

    /// Emits a derived `ptr(T)` type definition once, after validating
    /// that the pointee is representable.
    pub(crate) fn emit_derived_ptr_type_if_needed(&mut self, pointee: TypeId) -> Result<()> {
        if pointee == TypeId::Ptr || pointee == TypeId::Slice {
            return err("ptr(T) does not support ptr/slice pointees");
        }
        if pointee != TypeId::Void
            && (pointee.store_tag().is_none()
                || pointee.load_tag().is_none()
                || pointee.align_bytes().is_none())
        {
            return err("ptr(T) pointee type is not a load/store-capable value type");
        }
        if self.emitted_ptr_types.contains(&pointee) {
            return Ok(());
        }
        self.emit_type_if_needed(pointee)?;
        self.emitted_ptr_types.insert(pointee);
        self.line(json!({
            "ir": IR_VERSION,
            "k": "type",
            "id": pointee.derived_ptr_type_id(),
            "kind": "ptr",
            "of": pointee.sir_type_id(),
        }))
    }

    /// Emits whatever type definitions a committed type needs.
    pub(crate) fn emit_typeinfo_if_needed(&mut self, ti: &TypeInfo) -> Result<()> {
        if ti.base == TypeId::Ptr {
            if let Some(pointee) = ti.ptr_of {
                return self.emit_derived_ptr_type_if_needed(pointee);
            }
        }
        self.emit_type_if_needed(ti.base)
    }

    /// Emits a procedure's `fn` type definition once, emitting the types
    /// it references first.
    pub(crate) fn emit_fn_type_if_needed(&mut self, proc_idx: usize) -> Result<()> {
        let fn_type_id = self.procs[proc_idx].fn_type_id.clone();
        if self.emitted_fn_types.contains(&fn_type_id) {
            return Ok(());
        }
        self.emitted_fn_types.insert(fn_type_id.clone());

        let ret = self.procs[proc_idx].ret.clone();
        let params = self.procs[proc_idx].params.clone();
        self.emit_typeinfo_if_needed(&ret)?;
        for p in &params {
            self.emit_typeinfo_if_needed(p)?;
        }
        let param_ids: Vec<&str> = params.iter().map(|p| p.sir_id.as_str()).collect();
        self.line(json!({
            "ir": IR_VERSION,
            "k": "type",
            "id": fn_type_id,
            "kind": "fn",
            "params": param_ids,
            "ret": ret.sir_id,
        }))
    }

    /// Finds a pre-scanned procedure by name.
    pub(crate) fn find_proc(&self, name: &str) -> Option<usize> {
        self.procs.iter().position(|p| p.name == name)
    }

    /// Looks up a local binding, innermost first.
    pub(crate) fn lookup_local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rev().find(|l| l.name == name)
    }

    pub(crate) fn push_local(&mut self, name: &str, ti: TypeInfo, is_slot: bool) {
        self.locals.push(Local {
            name: name.to_owned(),
            ti,
            is_slot,
        });
    }

    /// Runs `f` with a fresh effect list and returns its buffered effects
    /// alongside the result.
    pub(crate) fn collect_effects<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<(T, Vec<String>)> {
        let saved = std::mem::take(&mut self.effects);
        let result = f(self);
        let effects = std::mem::replace(&mut self.effects, saved);
        Ok((result?, effects))
    }
}

/// A `{"t":"ref","id":…}` reference value.
pub(crate) fn vref(id: &str) -> Value {
    json!({"t": "ref", "id": id})
}

/// Reads a token-leaf field's text.
pub(crate) fn tok_text<'a>(obj: &'a Obj, key: &str) -> Result<&'a str> {
    let field = obj
        .get(key)
        .ok_or_else(|| EmitError::new(format!("missing required field {key}")))?;
    let tok = field
        .as_obj()
        .filter(|o| o.kind() == Some("tok"))
        .ok_or_else(|| EmitError::new(format!("field {key} must be a token leaf")))?;
    tok.get("text")
        .and_then(Json::as_str)
        .ok_or_else(|| EmitError::new("tok requires field: text"))
}

/// Structural pre-scan for constructs that require the `sem:v1` feature:
/// `Match` nodes and the short-circuit boolean operators. Exact, so it
/// never under-approximates.
fn scan_sem_v1(value: &Json) -> bool {
    match value {
        Json::Obj(obj) => {
            if obj.kind() == Some("Match") {
                return true;
            }
            if obj.kind() == Some("Bin") {
                if let Some(Json::Str(op)) = obj.get("op") {
                    if op == "core.bool.and_sc" || op == "core.bool.or_sc" {
                        return true;
                    }
                }
            }
            obj.fields.iter().any(|(_, v)| scan_sem_v1(v))
        }
        Json::Arr(items) => items.iter().any(|v| scan_sem_v1(v)),
        _ => false,
    }
}

/// Lowers a checked document into the SIR stream.
pub fn emit_checked(checked: &CheckedDoc, out: &mut dyn Write) -> Result<()> {
    let root = checked
        .doc
        .as_obj()
        .expect("checked documents have an object root");
    let ast = root
        .get("ast")
        .and_then(Json::as_obj)
        .expect("checked documents carry a Unit ast");

    let mut ctx = EmitCtx::new(out);

    // Explicit default policies from metadata.
    if let Some(types) = root
        .get("meta")
        .and_then(Json::as_obj)
        .and_then(|m| m.get("types"))
        .and_then(Json::as_obj)
    {
        for (key, value) in &types.fields {
            let tid = value.as_str().and_then(TypeId::parse);
            match key.as_str() {
                "@default.int" | "__default_int" => ctx.default_int = tid,
                "@default.ptr.pointee" | "__default_ptr_pointee" => {
                    ctx.default_ptr_pointee = tid
                }
                _ => {}
            }
        }
    }

    // Pre-scan Proc headers so direct calls resolve regardless of item
    // order, then decide the feature set before the meta line is written.
    unit::prescan_procs(&mut ctx, ast)?;
    ctx.sem_v1 = scan_sem_v1(&checked.doc);

    let mut features = Vec::new();
    if ctx.sem_v1 {
        features.push("sem:v1");
    }
    features.push("data:v1");
    ctx.line(json!({
        "ir": IR_VERSION,
        "k": "meta",
        "producer": "sem2sir",
        "unit": "main",
        "ext": {"features": features},
    }))?;
    ctx.blank_line()?;

    // data:v1 pack validation requires the canonical named types up front.
    ctx.emit_type_if_needed(TypeId::Bytes)?;
    ctx.emit_type_if_needed(TypeId::StringUtf8)?;
    ctx.emit_type_if_needed(TypeId::CStr)?;
    ctx.blank_line()?;

    let items = ast
        .get("items")
        .and_then(Json::as_arr)
        .expect("Unit.items checked");
    for item in items {
        let obj = item.as_obj().expect("Unit.items entries checked");
        unit::lower_unit_item(&mut ctx, obj)?;
    }
    Ok(())
}
