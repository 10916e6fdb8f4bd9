//! End-to-end scenarios exercising the object model, mem2reg, the
//! verifier, and the interpreter together.

use crank_ir::builder::Builder;
use crank_ir::context::Context;
use crank_ir::interp::error::InterpError;
use crank_ir::interp::interpreter::Interpreter;
use crank_ir::interp::value::RuntimeValue;
use crank_ir::ir::instruction::ICmpPred;
use crank_ir::text::{parse_module, print_module};
use crank_ir::transform::mem2reg::promote_allocas;
use crank_ir::value::ValueRef;
use crank_ir::verify::verify_function;

#[test]
fn addition() {
    let mut ctx = Context::new();
    let m = ctx.new_module(None);
    let name = ctx.intern("add");
    let i32_ty = ctx.i32_ty;
    let f = ctx.new_function(m, name, i32_ty, &[i32_ty, i32_ty], &[None, None], false, false);
    let entry = ctx.append_block(f, None);
    let a = ValueRef::Argument(ctx.func(f).args[0]);
    let b_arg = ValueRef::Argument(ctx.func(f).args[1]);

    let mut b = Builder::new(&mut ctx);
    b.set_insertion_point(entry);
    let sum = b.build_add(a, b_arg, Some("sum"));
    b.build_ret(Some(ValueRef::Instruction(sum)));

    assert_eq!(verify_function(&ctx, f), Vec::new());

    let mut interp = Interpreter::new(&ctx);
    let result = interp.call_function(f, &[RuntimeValue::I32(10), RuntimeValue::I32(5)]).unwrap();
    assert_eq!(result, RuntimeValue::I32(15));
}

#[test]
fn diamond_if_with_mem2reg() {
    let mut ctx = Context::new();
    let m = ctx.new_module(None);
    let name = ctx.intern("diamond");
    let i1_ty = ctx.i1_ty;
    let i32_ty = ctx.i32_ty;
    let f = ctx.new_function(m, name, i32_ty, &[i1_ty], &[None], false, false);
    let entry = ctx.append_block(f, None);
    let then_bb = ctx.append_block(f, None);
    let else_bb = ctx.append_block(f, None);
    let merge = ctx.append_block(f, None);
    let cond = ValueRef::Argument(ctx.func(f).args[0]);

    let mut b = Builder::new(&mut ctx);
    b.set_insertion_point(entry);
    let slot = b.build_alloca(i32_ty, Some("x"));
    let ten = ValueRef::Constant(b.ctx().const_int(i32_ty, 10));
    b.build_store(ten, ValueRef::Instruction(slot));
    b.build_cond_br(cond, then_bb, else_bb);

    b.set_insertion_point(then_bb);
    let twenty = ValueRef::Constant(b.ctx().const_int(i32_ty, 20));
    b.build_store(twenty, ValueRef::Instruction(slot));
    b.build_br(merge);

    b.set_insertion_point(else_bb);
    let thirty = ValueRef::Constant(b.ctx().const_int(i32_ty, 30));
    b.build_store(thirty, ValueRef::Instruction(slot));
    b.build_br(merge);

    b.set_insertion_point(merge);
    let loaded = b.build_load(ValueRef::Instruction(slot), Some("loaded"));
    b.build_ret(Some(ValueRef::Instruction(loaded)));

    assert_eq!(verify_function(&ctx, f), Vec::new());

    let changed = promote_allocas(&mut ctx, f);
    assert!(changed);

    // The alloca and every load/store of it are gone.
    for &block in &ctx.func(f).blocks {
        for inst in ctx.block_insts(block) {
            let op = ctx.inst(inst).opcode;
            assert!(!matches!(op, crank_ir::ir::instruction::Opcode::Alloca));
            assert!(!matches!(op, crank_ir::ir::instruction::Opcode::Load));
            assert!(!matches!(op, crank_ir::ir::instruction::Opcode::Store));
        }
    }

    // Exactly one phi, at merge, with the two expected incoming pairs.
    let merge_phis: Vec<_> = ctx
        .block_insts(merge)
        .into_iter()
        .filter(|&i| ctx.inst(i).opcode.is_phi())
        .collect();
    assert_eq!(merge_phis.len(), 1);
    let incoming = ctx.phi_incoming(merge_phis[0]);
    assert_eq!(incoming.len(), 2);
    let as_ints: Vec<(u64, crank_ir::ids::BlockId)> = incoming
        .iter()
        .map(|&(v, bb)| match v {
            ValueRef::Constant(c) => match ctx.constant(c).kind {
                crank_ir::ir::ConstantKind::Int(n) => (n, bb),
                _ => panic!("expected int constant"),
            },
            _ => panic!("expected constant incoming value"),
        })
        .collect();
    assert!(as_ints.contains(&(20, then_bb)));
    assert!(as_ints.contains(&(30, else_bb)));

    assert_eq!(verify_function(&ctx, f), Vec::new());

    let mut interp = Interpreter::new(&ctx);
    let result = interp.call_function(f, &[RuntimeValue::I1(true)]).unwrap();
    assert_eq!(result, RuntimeValue::I32(20));
}

#[test]
fn loop_with_phi() {
    let mut ctx = Context::new();
    let m = ctx.new_module(None);
    let name = ctx.intern("count_to_ten");
    let i32_ty = ctx.i32_ty;
    let f = ctx.new_function(m, name, i32_ty, &[], &[], false, false);
    let entry = ctx.append_block(f, None);
    let header = ctx.append_block(f, None);
    let body = ctx.append_block(f, None);
    let exit = ctx.append_block(f, None);

    let mut b = Builder::new(&mut ctx);
    b.set_insertion_point(entry);
    let zero = ValueRef::Constant(b.ctx().const_int(i32_ty, 0));
    b.build_br(header);

    b.set_insertion_point(header);
    let iv = b.build_phi(i32_ty, Some("i"));
    let ten = ValueRef::Constant(b.ctx().const_int(i32_ty, 10));
    let cmp = b.build_icmp(ICmpPred::Slt, ValueRef::Instruction(iv), ten, Some("cont"));
    b.build_cond_br(ValueRef::Instruction(cmp), body, exit);

    b.set_insertion_point(body);
    let one = ValueRef::Constant(b.ctx().const_int(i32_ty, 1));
    let next = b.build_add(ValueRef::Instruction(iv), one, Some("i_next"));
    b.build_br(header);

    b.add_incoming(iv, zero, entry);
    b.add_incoming(iv, ValueRef::Instruction(next), body);

    b.set_insertion_point(exit);
    b.build_ret(Some(ValueRef::Instruction(iv)));

    assert_eq!(verify_function(&ctx, f), Vec::new());

    let mut interp = Interpreter::new(&ctx);
    let result = interp.call_function(f, &[]).unwrap();
    assert_eq!(result, RuntimeValue::I32(10));
}

#[test]
fn switch_dispatch() {
    let mut ctx = Context::new();
    let m = ctx.new_module(None);
    let name = ctx.intern("select");
    let i32_ty = ctx.i32_ty;
    let f = ctx.new_function(m, name, i32_ty, &[i32_ty], &[None], false, false);
    let entry = ctx.append_block(f, None);
    let c1 = ctx.append_block(f, None);
    let c2 = ctx.append_block(f, None);
    let d = ctx.append_block(f, None);
    let cond = ValueRef::Argument(ctx.func(f).args[0]);

    let mut b = Builder::new(&mut ctx);
    let ten = b.ctx().const_int(i32_ty, 10);
    let twenty = b.ctx().const_int(i32_ty, 20);
    b.set_insertion_point(entry);
    b.build_switch(cond, d, &[(ten, c1), (twenty, c2)]);

    b.set_insertion_point(c1);
    let hundred = ValueRef::Constant(b.ctx().const_int(i32_ty, 100));
    b.build_ret(Some(hundred));

    b.set_insertion_point(c2);
    let two_hundred = ValueRef::Constant(b.ctx().const_int(i32_ty, 200));
    b.build_ret(Some(two_hundred));

    b.set_insertion_point(d);
    let neg_one = ValueRef::Constant(b.ctx().const_int(i32_ty, (-1i64) as u64));
    b.build_ret(Some(neg_one));

    assert_eq!(verify_function(&ctx, f), Vec::new());

    let mut interp = Interpreter::new(&ctx);
    assert_eq!(interp.call_function(f, &[RuntimeValue::I32(10)]).unwrap(), RuntimeValue::I32(100));
    assert_eq!(interp.call_function(f, &[RuntimeValue::I32(20)]).unwrap(), RuntimeValue::I32(200));
    assert_eq!(interp.call_function(f, &[RuntimeValue::I32(7)]).unwrap(), RuntimeValue::I32((-1i32) as u32));
}

#[test]
fn ffi_call() {
    let mut ctx = Context::new();
    let m = ctx.new_module(None);
    let i32_ty = ctx.i32_ty;
    let extern_name = ctx.intern("external_add");
    let extern_fn = ctx.new_function(m, extern_name, i32_ty, &[i32_ty, i32_ty], &[None, None], false, true);

    let caller_name = ctx.intern("caller");
    let f = ctx.new_function(m, caller_name, i32_ty, &[], &[], false, false);
    let entry = ctx.append_block(f, None);
    let mut b = Builder::new(&mut ctx);
    b.set_insertion_point(entry);
    let seventy = ValueRef::Constant(b.ctx().const_int(i32_ty, 70));
    let seven = ValueRef::Constant(b.ctx().const_int(i32_ty, 7));
    let call = b.build_call(ValueRef::Function(extern_fn), &[seventy, seven], Some("result"));
    b.build_ret(Some(ValueRef::Instruction(call)));

    assert_eq!(verify_function(&ctx, f), Vec::new());

    let mut interp = Interpreter::new(&ctx);
    interp.register_extern(extern_name, |args: &[RuntimeValue]| {
        Ok(RuntimeValue::I32(args[0].as_unsigned() as u32 + args[1].as_unsigned() as u32))
    });
    let result = interp.call_function(f, &[]).unwrap();
    assert_eq!(result, RuntimeValue::I32(77));
}

#[test]
fn ffi_call_fails_when_unregistered() {
    let mut ctx = Context::new();
    let m = ctx.new_module(None);
    let i32_ty = ctx.i32_ty;
    let extern_name = ctx.intern("external_add");
    let extern_fn = ctx.new_function(m, extern_name, i32_ty, &[i32_ty, i32_ty], &[None, None], false, true);

    let caller_name = ctx.intern("caller");
    let f = ctx.new_function(m, caller_name, i32_ty, &[], &[], false, false);
    let entry = ctx.append_block(f, None);
    let mut b = Builder::new(&mut ctx);
    b.set_insertion_point(entry);
    let seventy = ValueRef::Constant(b.ctx().const_int(i32_ty, 70));
    let seven = ValueRef::Constant(b.ctx().const_int(i32_ty, 7));
    let call = b.build_call(ValueRef::Function(extern_fn), &[seventy, seven], None);
    b.build_ret(Some(ValueRef::Instruction(call)));

    let mut interp = Interpreter::new(&ctx);
    let err = interp.call_function(f, &[]).unwrap_err();
    assert_eq!(err, InterpError::UnlinkedExternal("external_add".to_string()));
}

#[test]
fn gep_through_nested_aggregates() {
    let mut ctx = Context::new();
    let m = ctx.new_module(None);
    let i32_ty = ctx.i32_ty;
    let i64_ty = ctx.i64_ty;

    let point_name = ctx.intern("point");
    let point_ty = ctx.named_struct(point_name);
    ctx.define_named_struct_body(point_ty, vec![i32_ty, i64_ty]);

    let array_ty = ctx.array_type(i32_ty, 10);
    let packet_name = ctx.intern("packet");
    let packet_ty = ctx.named_struct(packet_name);
    ctx.define_named_struct_body(packet_ty, vec![point_ty, array_ty]);

    // The pointer gep walks through is produced by an `alloca` inside the
    // function itself, since the interpreter's pointer representation
    // (`Pointee`) only names storage a live frame or global actually owns.
    let alloc_name = ctx.intern("poke_owned");
    let owner = ctx.new_function(m, alloc_name, i32_ty, &[i32_ty], &[None], false, false);
    let owner_entry = ctx.append_block(owner, None);
    let owner_idx = ValueRef::Argument(ctx.func(owner).args[0]);
    let mut ob = Builder::new(&mut ctx);
    ob.set_insertion_point(owner_entry);
    let slot = ob.build_alloca(packet_ty, Some("packet"));
    let zero2 = ValueRef::Constant(ob.ctx().const_int(i32_ty, 0));
    let one2 = ValueRef::Constant(ob.ctx().const_int(i32_ty, 1));
    let elem_ptr_ty2 = ob.ctx().pointer_type(i32_ty);
    let gep2 = ob.build_gep(packet_ty, ValueRef::Instruction(slot), &[zero2, one2, owner_idx], elem_ptr_ty2, false, Some("elem"));
    let value2 = ValueRef::Constant(ob.ctx().const_int(i32_ty, 123));
    ob.build_store(value2, ValueRef::Instruction(gep2));
    let loaded2 = ob.build_load(ValueRef::Instruction(gep2), Some("loaded"));
    ob.build_ret(Some(ValueRef::Instruction(loaded2)));

    assert_eq!(verify_function(&ctx, owner), Vec::new());
    let mut interp = Interpreter::new(&ctx);
    let result = interp.call_function(owner, &[RuntimeValue::I32(3)]).unwrap();
    assert_eq!(result, RuntimeValue::I32(123));
}

#[test]
fn text_round_trip_addition() {
    let source = "\
define i32 @add(i32 %a, i32 %b) {
$entry:
  %sum: i32 = add %a: i32, %b: i32
  ret %sum: i32
}
";
    let mut ctx = Context::new();
    let module = parse_module(&mut ctx, source, 0).expect("parses");
    let errors = crank_ir::verify::verify_module(&ctx, module);
    assert!(errors.is_ok(), "{errors:?}");

    let printed = print_module(&ctx, module);
    let mut ctx2 = Context::new();
    let module2 = parse_module(&mut ctx2, &printed, 0).expect("re-parses printed output");
    assert!(crank_ir::verify::verify_module(&ctx2, module2).is_ok());
}

#[test]
fn text_parser_rejects_branch_to_unknown_block() {
    let source = "\
define void @f() {
$entry:
  br $nowhere
}
";
    let mut ctx = Context::new();
    let err = parse_module(&mut ctx, source, 0).unwrap_err();
    assert!(err.message.contains("nowhere"));
}
