//! Backend integration: lower hand-built IR through register allocation and
//! run it, exercising calls, loops, spills, and host bridging.

use tsn_core::{
    Access, CallTarget, CodeHolder, Context, FuncAccess, Function, Instruction, Opcode, SigArg,
    Signature, SrcRef, TypeId, Value,
};
use tsn_vm::{install_builtin_descriptors, Vm, VmBackend, VmConfig};

fn add_script_fn(ctx: &mut Context, name: &str, args: &[TypeId], ret: TypeId) -> u32 {
    let sig_type = ctx.types.signature_type(Signature {
        return_type: ret,
        returns_on_stack: false,
        returns_pointer: false,
        args: args.iter().map(|&t| SigArg::value(t)).collect(),
    });
    ctx.funcs.add(Function {
        id: 0,
        name: name.into(),
        display_name: name.into(),
        fqn: format!("test::{name}"),
        access: Access::Public,
        sig_type,
        method_of: None,
        is_static: false,
        is_thiscall: false,
        access_kind: FuncAccess::Script { entry: None },
    })
}

fn instr(op: Opcode, operands: Vec<Value>) -> Instruction {
    let mut i = Instruction::new(op, SrcRef::default());
    for (idx, v) in operands.into_iter().enumerate() {
        i.operands[idx] = v;
    }
    i
}

#[test]
fn test_lower_and_run_add_function() {
    let mut ctx = Context::new();
    let i32t = ctx.types.primitive(tsn_core::Primitive::I32);
    let fid = add_script_fn(&mut ctx, "add", &[i32t, i32t], i32t);

    let mut ch = CodeHolder::new(fid);
    let r0 = ch.alloc_reg();
    ch.emit(instr(
        Opcode::IAdd,
        vec![Value::reg(r0, i32t), Value::arg(0, i32t), Value::arg(1, i32t)],
    ));
    ch.emit(instr(Opcode::Ret, vec![Value::reg(r0, i32t)]));

    let mut backend = VmBackend::new();
    backend.lower(&mut ctx, &mut ch).unwrap();

    let mut vm = Vm::new(VmConfig::default());
    vm.install_modules(&ctx);
    let result = vm.call(&ctx, &backend.program, fid, &[20, 22]).unwrap();
    assert_eq!(result as i64, 42);
}

#[test]
fn test_lower_and_run_countdown_loop() {
    // n = arg0; acc = 0; label L; acc += n; n -= 1; branch (n != 0) L; ret acc
    let mut ctx = Context::new();
    let i32t = ctx.types.primitive(tsn_core::Primitive::I32);
    let bool_t = ctx.types.primitive(tsn_core::Primitive::Bool);
    let fid = add_script_fn(&mut ctx, "sum_to", &[i32t], i32t);

    let mut ch = CodeHolder::new(fid);
    let n = ch.alloc_reg();
    let acc = ch.alloc_reg();
    let cond = ch.alloc_reg();
    let l = ch.alloc_label();

    ch.emit(instr(
        Opcode::Assign,
        vec![Value::reg(n, i32t), Value::arg(0, i32t)],
    ));
    ch.emit(instr(
        Opcode::Assign,
        vec![Value::reg(acc, i32t), Value::imm_i(0, i32t)],
    ));
    ch.emit(instr(Opcode::Label, vec![Value::imm_u(l as u64, 0)]));
    ch.emit(instr(
        Opcode::IAdd,
        vec![Value::reg(acc, i32t), Value::reg(acc, i32t), Value::reg(n, i32t)],
    ));
    ch.emit(instr(
        Opcode::ISub,
        vec![Value::reg(n, i32t), Value::reg(n, i32t), Value::imm_i(1, i32t)],
    ));
    ch.emit(instr(
        Opcode::INeq,
        vec![Value::reg(cond, bool_t), Value::reg(n, i32t), Value::imm_i(0, i32t)],
    ));
    ch.emit(instr(
        Opcode::Branch,
        vec![Value::reg(cond, bool_t), Value::imm_u(l as u64, 0)],
    ));
    ch.emit(instr(Opcode::Ret, vec![Value::reg(acc, i32t)]));

    let mut backend = VmBackend::new();
    backend.lower(&mut ctx, &mut ch).unwrap();

    let mut vm = Vm::new(VmConfig::default());
    vm.install_modules(&ctx);
    let result = vm.call(&ctx, &backend.program, fid, &[5]).unwrap();
    assert_eq!(result as i64, 15);
}

#[test]
fn test_nested_calls_preserve_caller_state() {
    // leaf(a) = a * 2
    // outer(a) = leaf(a) + leaf(a + 1) -- the second call must not clobber
    // the first result, and arguments survive across calls via homing
    let mut ctx = Context::new();
    let i32t = ctx.types.primitive(tsn_core::Primitive::I32);
    let leaf = add_script_fn(&mut ctx, "leaf", &[i32t], i32t);
    let outer = add_script_fn(&mut ctx, "outer", &[i32t], i32t);

    let mut leaf_ch = CodeHolder::new(leaf);
    let r = leaf_ch.alloc_reg();
    leaf_ch.emit(instr(
        Opcode::IMul,
        vec![Value::reg(r, i32t), Value::arg(0, i32t), Value::imm_i(2, i32t)],
    ));
    leaf_ch.emit(instr(Opcode::Ret, vec![Value::reg(r, i32t)]));

    let mut outer_ch = CodeHolder::new(outer);
    let first = outer_ch.alloc_reg();
    let bumped = outer_ch.alloc_reg();
    let second = outer_ch.alloc_reg();
    let total = outer_ch.alloc_reg();

    let mut p1 = instr(Opcode::Param, vec![Value::arg(0, i32t)]);
    p1.callee = Some(CallTarget::Func(leaf));
    outer_ch.emit(p1);
    let mut c1 = instr(Opcode::Call, vec![Value::reg(first, i32t)]);
    c1.callee = Some(CallTarget::Func(leaf));
    outer_ch.emit(c1);

    outer_ch.emit(instr(
        Opcode::IAdd,
        vec![Value::reg(bumped, i32t), Value::arg(0, i32t), Value::imm_i(1, i32t)],
    ));
    let mut p2 = instr(Opcode::Param, vec![Value::reg(bumped, i32t)]);
    p2.callee = Some(CallTarget::Func(leaf));
    outer_ch.emit(p2);
    let mut c2 = instr(Opcode::Call, vec![Value::reg(second, i32t)]);
    c2.callee = Some(CallTarget::Func(leaf));
    outer_ch.emit(c2);

    outer_ch.emit(instr(
        Opcode::IAdd,
        vec![
            Value::reg(total, i32t),
            Value::reg(first, i32t),
            Value::reg(second, i32t),
        ],
    ));
    outer_ch.emit(instr(Opcode::Ret, vec![Value::reg(total, i32t)]));

    let mut backend = VmBackend::new();
    backend.lower(&mut ctx, &mut leaf_ch).unwrap();
    backend.lower(&mut ctx, &mut outer_ch).unwrap();

    let mut vm = Vm::new(VmConfig::default());
    vm.install_modules(&ctx);
    // outer(10) = 20 + 22
    let result = vm.call(&ctx, &backend.program, outer, &[10]).unwrap();
    assert_eq!(result as i64, 42);
}

#[test]
fn test_register_pressure_spills_and_still_computes() {
    // 20 simultaneously-live values force spills past the 13-register pool
    let mut ctx = Context::new();
    let i64t = ctx.types.primitive(tsn_core::Primitive::I64);
    let fid = add_script_fn(&mut ctx, "pressure", &[], i64t);

    let mut ch = CodeHolder::new(fid);
    let regs: Vec<u32> = (0..20).map(|_| ch.alloc_reg()).collect();
    for (i, &r) in regs.iter().enumerate() {
        ch.emit(instr(
            Opcode::Assign,
            vec![Value::reg(r, i64t), Value::imm_i(i as i64 + 1, i64t)],
        ));
    }
    // sum them all
    let mut acc = regs[0];
    for &r in &regs[1..] {
        let next = ch.alloc_reg();
        ch.emit(instr(
            Opcode::IAdd,
            vec![Value::reg(next, i64t), Value::reg(acc, i64t), Value::reg(r, i64t)],
        ));
        acc = next;
    }
    ch.emit(instr(Opcode::Ret, vec![Value::reg(acc, i64t)]));

    let mut backend = VmBackend::new();
    backend.lower(&mut ctx, &mut ch).unwrap();

    let mut vm = Vm::new(VmConfig::default());
    vm.install_modules(&ctx);
    let result = vm.call(&ctx, &backend.program, fid, &[]).unwrap();
    assert_eq!(result as i64, (1..=20).sum::<i64>());
}

#[test]
fn test_arguments_past_the_register_file_spill_to_stack() {
    // seventeen arguments: a0..a15 plus one stack-passed; the function sums
    // the first and last so a dropped spill is visible
    let mut ctx = Context::new();
    let i64t = ctx.types.primitive(tsn_core::Primitive::I64);
    let args: Vec<tsn_core::TypeId> = (0..17).map(|_| i64t).collect();
    let fid = add_script_fn(&mut ctx, "first_plus_last", &args, i64t);

    let mut ch = CodeHolder::new(fid);
    let r = ch.alloc_reg();
    ch.emit(instr(
        Opcode::IAdd,
        vec![Value::reg(r, i64t), Value::arg(0, i64t), Value::arg(16, i64t)],
    ));
    ch.emit(instr(Opcode::Ret, vec![Value::reg(r, i64t)]));

    let mut backend = VmBackend::new();
    backend.lower(&mut ctx, &mut ch).unwrap();

    let mut vm = Vm::new(VmConfig::default());
    vm.install_modules(&ctx);
    let values: Vec<u64> = (100..117).collect();
    let result = vm.call(&ctx, &backend.program, fid, &values).unwrap();
    assert_eq!(result, 100 + 116);
}

#[test]
fn test_stack_passed_arguments_survive_nested_calls() {
    // outer takes 17 arguments and forwards its stack-passed one through a
    // nested call; the forwarding exercises both the callee-side read and
    // the caller-side spill store
    let mut ctx = Context::new();
    let i64t = ctx.types.primitive(tsn_core::Primitive::I64);
    let double_fn = add_script_fn(&mut ctx, "double", &[i64t], i64t);
    let outer_args: Vec<tsn_core::TypeId> = (0..17).map(|_| i64t).collect();
    let outer = add_script_fn(&mut ctx, "outer", &outer_args, i64t);

    let mut double_ch = CodeHolder::new(double_fn);
    let d = double_ch.alloc_reg();
    double_ch.emit(instr(
        Opcode::IMul,
        vec![Value::reg(d, i64t), Value::arg(0, i64t), Value::imm_i(2, i64t)],
    ));
    double_ch.emit(instr(Opcode::Ret, vec![Value::reg(d, i64t)]));

    let mut outer_ch = CodeHolder::new(outer);
    let doubled = outer_ch.alloc_reg();
    let mut p = instr(Opcode::Param, vec![Value::arg(16, i64t)]);
    p.callee = Some(CallTarget::Func(double_fn));
    outer_ch.emit(p);
    let mut c = instr(Opcode::Call, vec![Value::reg(doubled, i64t)]);
    c.callee = Some(CallTarget::Func(double_fn));
    outer_ch.emit(c);
    outer_ch.emit(instr(Opcode::Ret, vec![Value::reg(doubled, i64t)]));

    let mut backend = VmBackend::new();
    backend.lower(&mut ctx, &mut double_ch).unwrap();
    backend.lower(&mut ctx, &mut outer_ch).unwrap();

    let mut vm = Vm::new(VmConfig::default());
    vm.install_modules(&ctx);
    let mut values: Vec<u64> = (0..16).collect();
    values.push(21);
    let result = vm.call(&ctx, &backend.program, outer, &values).unwrap();
    assert_eq!(result, 42);
}

#[test]
fn test_host_call_through_bridge() {
    // script function that calls the host `alloc`, then `free`, then
    // returns the allocated address's non-nullness
    let mut ctx = Context::new();
    install_builtin_descriptors(&mut ctx.host);
    let u32t = ctx.types.primitive(tsn_core::Primitive::U32);
    let u64t = ctx.types.primitive(tsn_core::Primitive::U64);
    let data = ctx.types.data();

    let alloc_sig = ctx.types.signature_type(Signature {
        return_type: data,
        returns_on_stack: false,
        returns_pointer: false,
        args: vec![SigArg::value(u32t)],
    });
    let alloc_fn = ctx.funcs.add(Function {
        id: 0,
        name: "alloc".into(),
        display_name: "alloc".into(),
        fqn: "$host::alloc".into(),
        access: Access::Trusted,
        sig_type: alloc_sig,
        method_of: None,
        is_static: false,
        is_thiscall: false,
        access_kind: FuncAccess::Host {
            symbol: "alloc".into(),
        },
    });

    let fid = add_script_fn(&mut ctx, "probe", &[], u64t);
    let mut ch = CodeHolder::new(fid);
    let ptr = ch.alloc_reg();
    let mut p = instr(Opcode::Param, vec![Value::imm_u(64, u32t)]);
    p.callee = Some(CallTarget::Func(alloc_fn));
    ch.emit(p);
    let mut c = instr(Opcode::Call, vec![Value::reg(ptr, data)]);
    c.callee = Some(CallTarget::Func(alloc_fn));
    ch.emit(c);
    let ok = ch.alloc_reg();
    ch.emit(instr(
        Opcode::UNeq,
        vec![Value::reg(ok, u64t), Value::reg(ptr, data), Value::imm_u(0, data)],
    ));
    ch.emit(instr(Opcode::Ret, vec![Value::reg(ok, u64t)]));

    let mut backend = VmBackend::new();
    backend.lower(&mut ctx, &mut ch).unwrap();

    let mut vm = Vm::new(VmConfig::default());
    vm.install_modules(&ctx);
    let result = vm.call(&ctx, &backend.program, fid, &[]).unwrap();
    assert_eq!(result, 1);
}
