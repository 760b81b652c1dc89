use sir_core::{validate, IntBinOp, IntCmpOp, ModuleBuilder, Op, Width};

fn minimal() -> (ModuleBuilder, u32) {
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    (b, f)
}

#[test]
fn accepts_a_minimal_exit_module() {
    let (mut b, f) = minimal();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    validate(&b.finalize().unwrap()).unwrap();
}

#[test]
fn rejects_empty_functions() {
    let (b, _) = minimal();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.cfg");
}

#[test]
fn rejects_out_of_range_branch_targets() {
    let (mut b, f) = minimal();
    b.emit_br(f, 17).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.cfg");
    assert!(diag.message.contains("out of range"));
}

#[test]
fn rejects_statements_after_a_terminator() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 1).unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    // Not a branch target, so it sits dead inside the entry block.
    b.emit(f, Op::ConstI32 { dst: 0, v: 1 }).unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.cfg");
    assert!(diag.message.contains("after terminator"));
}

#[test]
fn rejects_functions_that_fall_off_the_end() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 1).unwrap();
    b.emit(f, Op::ConstI32 { dst: 0, v: 1 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.cfg");
}

#[test]
fn rejects_slot_ids_at_or_above_value_count() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 1).unwrap();
    b.emit(f, Op::ConstI32 { dst: 3, v: 1 }).unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.slot");
}

#[test]
fn rejects_unknown_symbol_and_function_ids() {
    let (mut b, f) = minimal();
    b.emit_call_extern(f, 5, &[], sir_core::CallResults::NONE)
        .unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.inst");

    let (mut b, f) = minimal();
    b.emit_call_func(f, 9, &[], sir_core::CallResults::NONE)
        .unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.inst");
}

#[test]
fn rejects_kind_conflicts_between_definitions() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 1).unwrap();
    b.emit(f, Op::ConstI32 { dst: 0, v: 1 }).unwrap();
    b.emit(f, Op::ConstI64 { dst: 0, v: 2 }).unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.slot");
    assert!(diag.message.contains("defined as"));
}

#[test]
fn rejects_operand_kind_mismatches() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 3).unwrap();
    b.emit(f, Op::ConstI64 { dst: 0, v: 1 }).unwrap();
    b.emit(f, Op::ConstI64 { dst: 1, v: 2 }).unwrap();
    // 32-bit add over i64 slots.
    b.emit(
        f,
        Op::IntBin {
            w: Width::W32,
            op: IntBinOp::Add,
            dst: 2,
            a: 0,
            b: 1,
        },
    )
    .unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.slot");
    assert!(diag.message.contains("requires"));
}

#[test]
fn rejects_reads_not_defined_on_every_path() {
    // Entry splits; only the then-branch defines slot 1 before the join
    // reads it.
    let (mut b, f) = minimal();
    b.set_value_count(f, 2).unwrap();
    // ip0: cond; ip1: cbr then=2 else=4
    b.emit(f, Op::ConstBool { dst: 0, v: true }).unwrap();
    b.emit_cbr(f, 0, 2, 4).unwrap();
    // then: ip2 defines slot1; ip3 br join
    b.emit(f, Op::ConstI32 { dst: 1, v: 1 }).unwrap();
    b.emit_br(f, 5).unwrap();
    // else: ip4 br join (no def)
    b.emit_br(f, 5).unwrap();
    // join: ip5 reads slot1
    b.emit(f, Op::ExitVal { code: 1 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.code, "sir.validate.slot");
    assert!(diag.message.contains("every path"));
}

#[test]
fn accepts_reads_defined_on_all_paths() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 2).unwrap();
    b.emit(f, Op::ConstBool { dst: 0, v: false }).unwrap();
    b.emit_cbr(f, 0, 2, 4).unwrap();
    b.emit(f, Op::ConstI32 { dst: 1, v: 1 }).unwrap();
    b.emit_br(f, 6).unwrap();
    b.emit(f, Op::ConstI32 { dst: 1, v: 2 }).unwrap();
    b.emit_br(f, 6).unwrap();
    b.emit(f, Op::ExitVal { code: 1 }).unwrap();
    validate(&b.finalize().unwrap()).unwrap();
}

#[test]
fn rejects_bad_alloca_shapes() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 1).unwrap();
    b.emit(
        f,
        Op::Alloca {
            dst: 0,
            size: 0,
            align: 8,
        },
    )
    .unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    assert_eq!(
        validate(&b.finalize().unwrap()).unwrap_err().code,
        "sir.validate.inst"
    );

    let (mut b, f) = minimal();
    b.set_value_count(f, 1).unwrap();
    b.emit(
        f,
        Op::Alloca {
            dst: 0,
            size: 8,
            align: 3,
        },
    )
    .unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    assert_eq!(
        validate(&b.finalize().unwrap()).unwrap_err().code,
        "sir.validate.inst"
    );
}

#[test]
fn diag_carries_source_mapping() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 1).unwrap();
    b.set_src(41, 7);
    b.emit(f, Op::ConstI32 { dst: 9, v: 0 }).unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    let diag = validate(&b.finalize().unwrap()).unwrap_err();
    assert_eq!(diag.src_node_id, 41);
    assert_eq!(diag.src_line, 7);
    assert_eq!(diag.op, Some("const.i32"));
}

#[test]
fn cmp_requires_matching_width() {
    let (mut b, f) = minimal();
    b.set_value_count(f, 3).unwrap();
    b.emit(f, Op::ConstI64 { dst: 0, v: 1 }).unwrap();
    b.emit(f, Op::ConstI64 { dst: 1, v: 1 }).unwrap();
    b.emit(
        f,
        Op::IntCmp {
            w: Width::W64,
            op: IntCmpOp::Eq,
            dst: 2,
            a: 0,
            b: 1,
        },
    )
    .unwrap();
    b.emit(f, Op::Exit { code: 0 }).unwrap();
    validate(&b.finalize().unwrap()).unwrap();
}
