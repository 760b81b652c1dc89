use sem_asm::{HandleFlags, ZiError};
use sem_rt::{CaptureStream, HandleEntry, HostedRuntime, RuntimeConfig};
use sir_core::{
    fn_ptr_value, run, validate, BoolBinOp, CallResults, IntBinOp, IntCmpOp, MemKind, Module,
    ModuleBuilder, Op, Prim, Sig, Value, Width,
};

fn runtime() -> HostedRuntime {
    HostedRuntime::new(RuntimeConfig {
        mem_cap: 1 << 20,
        ..Default::default()
    })
    .unwrap()
}

/// Builds a module that writes a byte string to a handle and exits with
/// the given code.
fn hello_module(handle: i32, text: &[u8], exit_code: i32) -> Module {
    let mut b = ModuleBuilder::new();
    let t_i32 = b.ty_prim(Prim::I32);
    let t_i64 = b.ty_prim(Prim::I64);
    let t_ptr = b.ty_prim(Prim::Ptr);
    let sig = b.sig(&[t_i32, t_ptr, t_i64], &[t_i32]);
    let zi_write = b.extern_fn("zi_write", sig);

    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 4).unwrap();
    b.emit(f, Op::ConstI32 { dst: 0, v: handle }).unwrap();
    b.emit_const_bytes(f, 1, 2, text).unwrap();
    b.emit_call_extern(f, zi_write, &[0, 1, 2], CallResults::one(3))
        .unwrap();
    b.emit(f, Op::Exit { code: exit_code }).unwrap();
    b.finalize().unwrap()
}

#[test]
fn hello_writes_through_the_host_and_exits() {
    let mut rt = runtime();
    let (capture, sink) = CaptureStream::new();
    let h = rt
        .handles_mut()
        .alloc(HandleEntry::new(
            Box::new(capture),
            HandleFlags::WRITABLE | HandleFlags::ENDABLE,
        ))
        .unwrap();
    let m = hello_module(h, b"hello, sir\n", 7);
    validate(&m).unwrap();
    assert_eq!(run(&m, &mut rt).unwrap(), 7);
    assert_eq!(sink.lock().unwrap().as_slice(), b"hello, sir\n");
}

#[test]
fn writing_to_a_missing_handle_fails_with_nosys() {
    let mut rt = runtime();
    let m = hello_module(99, b"x", 0);
    let err = run(&m, &mut rt).unwrap_err();
    assert_eq!(err.kind, ZiError::Nosys);
    assert_eq!(err.op, "call.extern");
}

#[test]
fn counting_loop_runs_the_expected_number_of_iterations() {
    // i = 0; while (i < 3) i = i + 1; exit(i)
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 4).unwrap();
    // ip0: i(slot 0) = 0
    b.emit(f, Op::ConstI32 { dst: 0, v: 0 }).unwrap();
    b.emit_br(f, 2).unwrap(); // ip1 -> header
    // header, ip2: limit(slot 1) = 3; ip3: cond(2) = i < limit; ip4: cbr
    b.emit(f, Op::ConstI32 { dst: 1, v: 3 }).unwrap();
    b.emit(
        f,
        Op::IntCmp {
            w: Width::W32,
            op: IntCmpOp::Slt,
            dst: 2,
            a: 0,
            b: 1,
        },
    )
    .unwrap();
    b.emit_cbr(f, 2, 5, 8).unwrap();
    // body, ip5: one(3) = 1; ip6: i = i + one; ip7: br header
    b.emit(f, Op::ConstI32 { dst: 3, v: 1 }).unwrap();
    b.emit(
        f,
        Op::IntBin {
            w: Width::W32,
            op: IntBinOp::Add,
            dst: 0,
            a: 0,
            b: 3,
        },
    )
    .unwrap();
    b.emit_br(f, 2).unwrap();
    // exit, ip8
    b.emit(f, Op::ExitVal { code: 0 }).unwrap();
    let m = b.finalize().unwrap();
    validate(&m).unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 3);
}

#[test]
fn division_by_zero_traps_with_invalid() {
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 3).unwrap();
    b.emit(f, Op::ConstI32 { dst: 0, v: 10 }).unwrap();
    b.emit(f, Op::ConstI32 { dst: 1, v: 0 }).unwrap();
    b.emit(
        f,
        Op::IntBin {
            w: Width::W32,
            op: IntBinOp::DivSTrap,
            dst: 2,
            a: 0,
            b: 1,
        },
    )
    .unwrap();
    b.emit(f, Op::ExitVal { code: 2 }).unwrap();
    let m = b.finalize().unwrap();
    let mut rt = runtime();
    let err = run(&m, &mut rt).unwrap_err();
    assert_eq!(err.kind, ZiError::Invalid);
    assert_eq!(err.ip, 2);
}

#[test]
fn alloca_store_load_round_trip() {
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 3).unwrap();
    b.emit(
        f,
        Op::Alloca {
            dst: 0,
            size: 4,
            align: 4,
        },
    )
    .unwrap();
    b.emit(f, Op::ConstI32 { dst: 1, v: 1234 }).unwrap();
    b.emit(
        f,
        Op::Store {
            kind: MemKind::I32,
            addr: 0,
            value: 1,
            align: 4,
        },
    )
    .unwrap();
    b.emit(
        f,
        Op::Load {
            kind: MemKind::I32,
            dst: 2,
            addr: 0,
            align: 4,
        },
    )
    .unwrap();
    b.emit(f, Op::ExitVal { code: 2 }).unwrap();
    let m = b.finalize().unwrap();
    validate(&m).unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 1234);
}

#[test]
fn direct_and_indirect_calls_return_values() {
    let mut b = ModuleBuilder::new();
    let t_i32 = b.ty_prim(Prim::I32);

    // add1(x) -> x + 1
    let add1 = b.func_begin("add1");
    let add1_sig = b.sig(&[t_i32], &[t_i32]);
    b.set_sig(add1, add1_sig).unwrap();
    b.set_value_count(add1, 3).unwrap();
    b.emit(add1, Op::ConstI32 { dst: 1, v: 1 }).unwrap();
    b.emit(
        add1,
        Op::IntBin {
            w: Width::W32,
            op: IntBinOp::Add,
            dst: 2,
            a: 0,
            b: 1,
        },
    )
    .unwrap();
    b.emit(add1, Op::RetVal { value: 2 }).unwrap();

    // main: a = add1(40); b = (fnptr add1)(a); exit b  => 42
    let main = b.func_begin("main");
    b.set_entry(main).unwrap();
    b.set_value_count(main, 4).unwrap();
    b.emit(main, Op::ConstI32 { dst: 0, v: 40 }).unwrap();
    b.emit_call_func(main, add1, &[0], CallResults::one(1))
        .unwrap();
    b.emit(
        main,
        Op::ConstPtr {
            dst: 2,
            v: fn_ptr_value(add1),
        },
    )
    .unwrap();
    b.emit_call_func_ptr(main, 2, &[1], CallResults::one(3))
        .unwrap();
    b.emit(main, Op::ExitVal { code: 3 }).unwrap();

    let m = b.finalize().unwrap();
    validate(&m).unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 42);
}

#[test]
fn switch_selects_cases_and_default() {
    for (input, expected) in [(1, 11), (2, 22), (9, 99)] {
        let mut b = ModuleBuilder::new();
        let f = b.func_begin("main");
        b.set_entry(f).unwrap();
        b.set_value_count(f, 1).unwrap();
        // ip0 scrut; ip1 switch; ip2/ip4/ip6 arms
        b.emit(f, Op::ConstI32 { dst: 0, v: input }).unwrap();
        b.emit_switch(f, 0, &[(1, 2), (2, 3)], 4).unwrap();
        b.emit(f, Op::Exit { code: 11 }).unwrap();
        b.emit(f, Op::Exit { code: 22 }).unwrap();
        b.emit(f, Op::Exit { code: 99 }).unwrap();
        let m = b.finalize().unwrap();
        validate(&m).unwrap();
        let mut rt = runtime();
        assert_eq!(run(&m, &mut rt).unwrap(), expected, "input {input}");
    }
}

#[test]
fn branch_args_move_values_between_blocks() {
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 2).unwrap();
    b.emit(f, Op::ConstI32 { dst: 0, v: 5 }).unwrap();
    b.emit_br_args(f, 2, &[0], &[1]).unwrap();
    b.emit(f, Op::ExitVal { code: 1 }).unwrap();
    let m = b.finalize().unwrap();
    validate(&m).unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 5);
}

#[test]
fn select_and_bool_ops() {
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 6).unwrap();
    b.emit(f, Op::ConstBool { dst: 0, v: true }).unwrap();
    b.emit(f, Op::ConstBool { dst: 1, v: false }).unwrap();
    b.emit(
        f,
        Op::BoolBin {
            op: BoolBinOp::Xor,
            dst: 2,
            a: 0,
            b: 1,
        },
    )
    .unwrap();
    b.emit(f, Op::ConstI32 { dst: 3, v: 10 }).unwrap();
    b.emit(f, Op::ConstI32 { dst: 4, v: 20 }).unwrap();
    b.emit(
        f,
        Op::Select {
            dst: 5,
            cond: 2,
            a: 3,
            b: 4,
        },
    )
    .unwrap();
    b.emit(f, Op::ExitVal { code: 5 }).unwrap();
    let m = b.finalize().unwrap();
    validate(&m).unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 10);
}

#[test]
fn globals_are_materialized_with_initializers() {
    let mut b = ModuleBuilder::new();
    let g = b.global("greeting", 8, 8, Some(&7i64.to_le_bytes()));
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 3).unwrap();
    b.emit(f, Op::GlobalAddr { dst: 0, global: g }).unwrap();
    b.emit(
        f,
        Op::Load {
            kind: MemKind::I64,
            dst: 1,
            addr: 0,
            align: 8,
        },
    )
    .unwrap();
    b.emit(f, Op::TruncI32I64 { dst: 2, x: 1 }).unwrap();
    b.emit(f, Op::ExitVal { code: 2 }).unwrap();
    let m = b.finalize().unwrap();
    validate(&m).unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 7);
}

#[test]
fn entry_return_value_becomes_the_exit_code() {
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 1).unwrap();
    b.emit(f, Op::ConstI32 { dst: 0, v: 9 }).unwrap();
    b.emit(f, Op::RetVal { value: 0 }).unwrap();
    let m = b.finalize().unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 9);

    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.emit(f, Op::Ret).unwrap();
    let m = b.finalize().unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap(), 0);
}

#[test]
fn typed_slot_mismatch_is_invalid_at_runtime() {
    let mut b = ModuleBuilder::new();
    let f = b.func_begin("main");
    b.set_entry(f).unwrap();
    b.set_value_count(f, 2).unwrap();
    b.emit(f, Op::ConstI64 { dst: 0, v: 1 }).unwrap();
    // exit_val reads an i32 slot; slot 0 holds i64.
    b.emit(f, Op::ExitVal { code: 0 }).unwrap();
    let m = b.finalize().unwrap();
    let mut rt = runtime();
    assert_eq!(run(&m, &mut rt).unwrap_err().kind, ZiError::Invalid);
}

#[test]
fn interpreter_reports_value_via_sig() {
    // Sanity: Value default is Invalid, reading it types as invalid.
    assert_eq!(Value::default(), Value::Invalid);
    assert_eq!(Sig::EMPTY.params.len(), 0);
}
