//! `Builder`: stateful instruction factory (spec §4.5's "Builder contract").
//!
//! A `Builder` borrows a `Context` and tracks one insertion point plus a
//! counter for auto-generated result names. Each `build_*` method validates
//! operand types, then calls `Context::build_instruction` to do the actual
//! object-model wiring (block attachment, phi-before-non-phi placement,
//! operand `Use` creation). Per spec, a typing-contract violation is fatal:
//! these methods panic rather than return a `Result`, matching
//! `Context::define_named_struct_body`'s contract-violation panics.

use crate::context::Context;
use crate::ids::{BlockId, ConstId, InstId, Sym};
use crate::interp::host_layout::{DefaultHostLayout, HostLayout};
use crate::ir::instruction::{FCmpPred, ICmpPred, InstData, Opcode};
use crate::types::Type;
use crate::value::ValueRef;

pub struct Builder<'ctx> {
    ctx: &'ctx mut Context,
    block: Option<BlockId>,
    next_name: u32,
}

impl<'ctx> Builder<'ctx> {
    pub fn new(ctx: &'ctx mut Context) -> Self {
        Builder { ctx, block: None, next_name: 0 }
    }

    pub fn ctx(&mut self) -> &mut Context {
        self.ctx
    }

    pub fn set_insertion_point(&mut self, block: BlockId) {
        self.block = Some(block);
    }

    pub fn insertion_block(&self) -> BlockId {
        self.block.expect("builder used with no insertion point set")
    }

    fn fresh_name(&mut self) -> Sym {
        let n = self.next_name;
        self.next_name += 1;
        self.ctx.intern(&format!("{n}"))
    }

    /// Names `inst`'s result from `hint`, or auto-generates one. Only
    /// meaningful for opcodes with `has_result()`.
    fn name_result(&mut self, inst: InstId, hint: Option<&str>) {
        let sym = match hint {
            Some(h) => self.ctx.intern(h),
            None => self.fresh_name(),
        };
        self.ctx.inst_mut(inst).name = Some(sym);
    }

    // ---- terminators --------------------------------------------------------

    pub fn build_ret(&mut self, value: Option<ValueRef>) -> InstId {
        let operands: Vec<ValueRef> = value.into_iter().collect();
        let block = self.insertion_block();
        self.ctx.build_instruction(block, Opcode::Ret, None, InstData::None, &operands)
    }

    pub fn build_br(&mut self, target: BlockId) -> InstId {
        let block = self.insertion_block();
        self.ctx
            .build_instruction(block, Opcode::Br, None, InstData::None, &[ValueRef::Block(target)])
    }

    pub fn build_cond_br(&mut self, cond: ValueRef, then_bb: BlockId, else_bb: BlockId) -> InstId {
        assert!(self.is_i1(cond), "cond_br condition must be i1");
        let block = self.insertion_block();
        self.ctx.build_instruction(
            block,
            Opcode::CondBr,
            None,
            InstData::None,
            &[cond, ValueRef::Block(then_bb), ValueRef::Block(else_bb)],
        )
    }

    /// `cases` are `(case constant, target block)` pairs; `cond`'s type must
    /// be integer and match every case constant's type.
    pub fn build_switch(&mut self, cond: ValueRef, default: BlockId, cases: &[(ConstId, BlockId)]) -> InstId {
        let cond_ty = self.ctx.value_type(cond);
        assert!(self.ctx.type_kind(cond_ty).is_integer(), "switch condition must be an integer");
        let mut operands = vec![cond, ValueRef::Block(default)];
        for (c, target) in cases {
            let case_ty = self.ctx.constant(*c).ty;
            assert_eq!(case_ty, cond_ty, "switch case constant type must match condition type");
            operands.push(ValueRef::Constant(*c));
            operands.push(ValueRef::Block(*target));
        }
        let block = self.insertion_block();
        self.ctx.build_instruction(block, Opcode::Switch, None, InstData::None, &operands)
    }

    // ---- integer / float arithmetic -----------------------------------------

    fn build_int_binop(&mut self, opcode: Opcode, lhs: ValueRef, rhs: ValueRef, name: Option<&str>) -> InstId {
        let ty = self.ctx.value_type(lhs);
        assert_eq!(ty, self.ctx.value_type(rhs), "{}: operand types must match", opcode.mnemonic());
        assert!(
            self.ctx.type_kind(ty).is_integer(),
            "{}: operands must be integers",
            opcode.mnemonic()
        );
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, opcode, Some(ty), InstData::None, &[lhs, rhs]);
        self.name_result(inst, name);
        inst
    }

    fn build_float_binop(&mut self, opcode: Opcode, lhs: ValueRef, rhs: ValueRef, name: Option<&str>) -> InstId {
        let ty = self.ctx.value_type(lhs);
        assert_eq!(ty, self.ctx.value_type(rhs), "{}: operand types must match", opcode.mnemonic());
        assert!(self.ctx.type_kind(ty).is_float(), "{}: operands must be floats", opcode.mnemonic());
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, opcode, Some(ty), InstData::None, &[lhs, rhs]);
        self.name_result(inst, name);
        inst
    }

    pub fn build_add(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::Add, l, r, name)
    }
    pub fn build_sub(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::Sub, l, r, name)
    }
    pub fn build_mul(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::Mul, l, r, name)
    }
    pub fn build_udiv(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::UDiv, l, r, name)
    }
    pub fn build_sdiv(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::SDiv, l, r, name)
    }
    pub fn build_urem(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::URem, l, r, name)
    }
    pub fn build_srem(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::SRem, l, r, name)
    }
    pub fn build_shl(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::Shl, l, r, name)
    }
    pub fn build_lshr(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::LShr, l, r, name)
    }
    pub fn build_ashr(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::AShr, l, r, name)
    }
    pub fn build_and(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::And, l, r, name)
    }
    pub fn build_or(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::Or, l, r, name)
    }
    pub fn build_xor(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_int_binop(Opcode::Xor, l, r, name)
    }

    pub fn build_fadd(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_float_binop(Opcode::FAdd, l, r, name)
    }
    pub fn build_fsub(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_float_binop(Opcode::FSub, l, r, name)
    }
    pub fn build_fmul(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_float_binop(Opcode::FMul, l, r, name)
    }
    pub fn build_fdiv(&mut self, l: ValueRef, r: ValueRef, name: Option<&str>) -> InstId {
        self.build_float_binop(Opcode::FDiv, l, r, name)
    }

    // ---- comparisons ----------------------------------------------------------

    pub fn build_icmp(&mut self, pred: ICmpPred, lhs: ValueRef, rhs: ValueRef, name: Option<&str>) -> InstId {
        let lty = self.ctx.value_type(lhs);
        assert_eq!(lty, self.ctx.value_type(rhs), "icmp: operand types must match");
        assert!(self.ctx.type_kind(lty).is_integer(), "icmp: operands must be integers");
        let i1 = self.ctx.i1_ty;
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, Opcode::ICmp, Some(i1), InstData::ICmp(pred), &[lhs, rhs]);
        self.name_result(inst, name);
        inst
    }

    pub fn build_fcmp(&mut self, pred: FCmpPred, lhs: ValueRef, rhs: ValueRef, name: Option<&str>) -> InstId {
        let lty = self.ctx.value_type(lhs);
        assert_eq!(lty, self.ctx.value_type(rhs), "fcmp: operand types must match");
        assert!(self.ctx.type_kind(lty).is_float(), "fcmp: operands must be floats");
        let i1 = self.ctx.i1_ty;
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, Opcode::FCmp, Some(i1), InstData::FCmp(pred), &[lhs, rhs]);
        self.name_result(inst, name);
        inst
    }

    // ---- casts ------------------------------------------------------------------

    fn build_cast(&mut self, opcode: Opcode, value: ValueRef, dest_ty: crate::ids::TypeId, name: Option<&str>) -> InstId {
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, opcode, Some(dest_ty), InstData::None, &[value]);
        self.name_result(inst, name);
        inst
    }

    pub fn build_trunc(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        let src = self.ctx.value_type(v);
        let src_bits = self.int_bits(src);
        let dest_bits = self.int_bits(dest);
        assert!(dest_bits < src_bits, "trunc: destination must be narrower than source");
        self.build_cast(Opcode::Trunc, v, dest, name)
    }

    pub fn build_zext(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        let src = self.ctx.value_type(v);
        assert!(self.int_bits(dest) > self.int_bits(src), "zext: destination must be wider than source");
        self.build_cast(Opcode::ZExt, v, dest, name)
    }

    pub fn build_sext(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        let src = self.ctx.value_type(v);
        assert!(self.int_bits(dest) > self.int_bits(src), "sext: destination must be wider than source");
        self.build_cast(Opcode::SExt, v, dest, name)
    }

    pub fn build_fptrunc(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        self.build_cast(Opcode::FpTrunc, v, dest, name)
    }
    pub fn build_fpext(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        self.build_cast(Opcode::FpExt, v, dest, name)
    }
    pub fn build_fptoui(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        self.build_cast(Opcode::FpToUi, v, dest, name)
    }
    pub fn build_fptosi(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        self.build_cast(Opcode::FpToSi, v, dest, name)
    }
    pub fn build_uitofp(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        self.build_cast(Opcode::UiToFp, v, dest, name)
    }
    pub fn build_sitofp(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        self.build_cast(Opcode::SiToFp, v, dest, name)
    }
    pub fn build_ptrtoint(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        assert!(self.ctx.type_kind(self.ctx.value_type(v)).is_pointer(), "ptrtoint: source must be a pointer");
        self.build_cast(Opcode::PtrToInt, v, dest, name)
    }
    pub fn build_inttoptr(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        assert!(self.ctx.type_kind(dest).is_pointer(), "inttoptr: destination must be a pointer");
        self.build_cast(Opcode::IntToPtr, v, dest, name)
    }
    pub fn build_bitcast(&mut self, v: ValueRef, dest: crate::ids::TypeId, name: Option<&str>) -> InstId {
        let src = self.ctx.value_type(v);
        let layout = DefaultHostLayout;
        let (src_size, _) = layout.layout(self.ctx, src);
        let (dest_size, _) = layout.layout(self.ctx, dest);
        assert_eq!(src_size, dest_size, "bitcast: source and destination sizes must match");
        self.build_cast(Opcode::BitCast, v, dest, name)
    }

    fn int_bits(&self, ty: crate::ids::TypeId) -> u32 {
        self.ctx
            .type_kind(ty)
            .as_int_width()
            .expect("cast operand/destination must be an integer type")
            .bits()
    }

    fn is_i1(&self, v: ValueRef) -> bool {
        self.ctx.value_type(v) == self.ctx.i1_ty
    }

    // ---- memory -----------------------------------------------------------------

    pub fn build_alloca(&mut self, pointee: crate::ids::TypeId, name: Option<&str>) -> InstId {
        let ptr_ty = self.ctx.pointer_type(pointee);
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, Opcode::Alloca, Some(ptr_ty), InstData::Alloca(pointee), &[]);
        self.name_result(inst, name);
        inst
    }

    pub fn build_load(&mut self, ptr: ValueRef, name: Option<&str>) -> InstId {
        let ptr_ty = self.ctx.value_type(ptr);
        let pointee = match self.ctx.type_kind(ptr_ty) {
            Type::Pointer(p) => *p,
            _ => panic!("load: operand must be a pointer"),
        };
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, Opcode::Load, Some(pointee), InstData::None, &[ptr]);
        self.name_result(inst, name);
        inst
    }

    pub fn build_store(&mut self, value: ValueRef, ptr: ValueRef) -> InstId {
        let ptr_ty = self.ctx.value_type(ptr);
        let pointee = match self.ctx.type_kind(ptr_ty) {
            Type::Pointer(p) => *p,
            _ => panic!("store: pointer operand must be a pointer"),
        };
        assert_eq!(pointee, self.ctx.value_type(value), "store: value type must match pointee type");
        let block = self.insertion_block();
        self.ctx.build_instruction(block, Opcode::Store, None, InstData::None, &[value, ptr])
    }

    /// `source_ty` is the pointee type the base pointer addresses; the
    /// first index scales by `sizeof(source_ty)`, subsequent indices walk
    /// into arrays/structs. Per spec §4.5 this crate does not resolve the
    /// walked-into type here (that needs a `HostLayout`); callers supply
    /// the already-computed result type.
    #[allow(clippy::too_many_arguments)]
    pub fn build_gep(
        &mut self,
        source_ty: crate::ids::TypeId,
        base: ValueRef,
        indices: &[ValueRef],
        result_ty: crate::ids::TypeId,
        inbounds: bool,
        name: Option<&str>,
    ) -> InstId {
        assert!(
            self.ctx.type_kind(self.ctx.value_type(base)).is_pointer(),
            "gep: base must be a pointer"
        );
        let mut operands = Vec::with_capacity(indices.len() + 1);
        operands.push(base);
        operands.extend_from_slice(indices);
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(
            block,
            Opcode::Gep,
            Some(result_ty),
            InstData::Gep { source_ty, inbounds },
            &operands,
        );
        self.name_result(inst, name);
        inst
    }

    // ---- dataflow ---------------------------------------------------------------

    /// Builds an empty `phi`; incoming `(value, block)` pairs are attached
    /// later via `add_incoming`, since the predecessor set (mem2reg) or the
    /// textual operand list (parser) isn't known until after the phi
    /// itself has an id.
    pub fn build_phi(&mut self, ty: crate::ids::TypeId, name: Option<&str>) -> InstId {
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, Opcode::Phi, Some(ty), InstData::None, &[]);
        self.name_result(inst, name);
        inst
    }

    pub fn add_incoming(&mut self, phi: InstId, value: ValueRef, from: BlockId) {
        debug_assert!(self.ctx.inst(phi).opcode.is_phi());
        let ty = self.ctx.inst(phi).result_ty.expect("phi has a result type");
        assert_eq!(self.ctx.value_type(value), ty, "phi incoming value type must match phi type");
        self.ctx.add_operand(phi, value);
        self.ctx.add_operand(phi, ValueRef::Block(from));
    }

    pub fn build_select(&mut self, cond: ValueRef, if_true: ValueRef, if_false: ValueRef, name: Option<&str>) -> InstId {
        assert!(self.is_i1(cond), "select condition must be i1");
        let ty = self.ctx.value_type(if_true);
        assert_eq!(ty, self.ctx.value_type(if_false), "select: true/false operand types must match");
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, Opcode::Select, Some(ty), InstData::None, &[cond, if_true, if_false]);
        self.name_result(inst, name);
        inst
    }

    /// `callee` must be a pointer-to-function value; arity and argument
    /// types must agree with its function type (a variadic callee allows
    /// extra trailing arguments with no further check).
    pub fn build_call(&mut self, callee: ValueRef, args: &[ValueRef], name: Option<&str>) -> InstId {
        let fn_ty = self.resolve_callee_fn_type(callee);
        let (ret, params, is_variadic) = match self.ctx.type_kind(fn_ty) {
            Type::Function { ret, params, is_variadic } => (*ret, params.clone(), *is_variadic),
            _ => panic!("call: callee must be a pointer to function"),
        };
        assert!(
            args.len() == params.len() || (is_variadic && args.len() >= params.len()),
            "call: argument count does not match function arity"
        );
        for (arg, expected) in args.iter().zip(params.iter()) {
            assert_eq!(self.ctx.value_type(*arg), *expected, "call: argument type mismatch");
        }
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callee);
        operands.extend_from_slice(args);
        let result_ty = if self.ctx.type_kind(ret) == &Type::Void { None } else { Some(ret) };
        let block = self.insertion_block();
        let inst = self.ctx.build_instruction(block, Opcode::Call, result_ty, InstData::None, &operands);
        if result_ty.is_some() {
            self.name_result(inst, name);
        }
        inst
    }

    fn resolve_callee_fn_type(&mut self, callee: ValueRef) -> crate::ids::TypeId {
        match callee {
            ValueRef::Function(f) => self.ctx.func(f).fn_ty,
            _ => {
                let ty = self.ctx.value_type(callee);
                match self.ctx.type_kind(ty) {
                    Type::Pointer(pointee) => *pointee,
                    _ => panic!("call: callee must be a pointer to function"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::ICmpPred;

    fn func_with_entry(ctx: &mut Context) -> (crate::ids::FuncId, BlockId) {
        let m = ctx.new_module(Some("t".into()));
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let f = ctx.new_function(m, name, i32_ty, &[], &[], false, false);
        let bb = ctx.append_block(f, None);
        (f, bb)
    }

    #[test]
    fn build_add_infers_result_type_and_names_it() {
        let mut ctx = Context::new();
        let (_, bb) = func_with_entry(&mut ctx);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(bb);
        let i32_ty = b.ctx().i32_ty;
        let lhs = ValueRef::Constant(b.ctx().const_int(i32_ty, 1));
        let rhs = ValueRef::Constant(b.ctx().const_int(i32_ty, 2));
        let add = b.build_add(lhs, rhs, Some("sum"));
        assert_eq!(ctx.inst(add).result_ty, Some(i32_ty));
        assert_eq!(ctx.resolve(ctx.inst(add).name.unwrap()), "sum");
    }

    #[test]
    #[should_panic(expected = "operand types must match")]
    fn build_add_rejects_mismatched_operand_types() {
        let mut ctx = Context::new();
        let (_, bb) = func_with_entry(&mut ctx);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(bb);
        let i32_ty = b.ctx().i32_ty;
        let i64_ty = b.ctx().i64_ty;
        let lhs = ValueRef::Constant(b.ctx().const_int(i32_ty, 1));
        let rhs = ValueRef::Constant(b.ctx().const_int(i64_ty, 2));
        b.build_add(lhs, rhs, None);
    }

    #[test]
    fn build_alloca_load_store_round_trip() {
        let mut ctx = Context::new();
        let (_, bb) = func_with_entry(&mut ctx);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(bb);
        let i32_ty = b.ctx().i32_ty;
        let alloca = b.build_alloca(i32_ty, Some("x"));
        let val = ValueRef::Constant(b.ctx().const_int(i32_ty, 42));
        b.build_store(val, ValueRef::Instruction(alloca));
        let load = b.build_load(ValueRef::Instruction(alloca), Some("x.0"));
        assert_eq!(ctx.inst(load).result_ty, Some(i32_ty));
    }

    #[test]
    fn build_icmp_produces_i1() {
        let mut ctx = Context::new();
        let (_, bb) = func_with_entry(&mut ctx);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(bb);
        let i32_ty = b.ctx().i32_ty;
        let lhs = ValueRef::Constant(b.ctx().const_int(i32_ty, 1));
        let rhs = ValueRef::Constant(b.ctx().const_int(i32_ty, 2));
        let cmp = b.build_icmp(ICmpPred::Slt, lhs, rhs, None);
        assert_eq!(ctx.inst(cmp).result_ty, Some(ctx.i1_ty));
    }

    #[test]
    fn build_phi_places_before_later_non_phi_insts() {
        let mut ctx = Context::new();
        let (_, bb) = func_with_entry(&mut ctx);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(bb);
        let i32_ty = b.ctx().i32_ty;
        let c = ValueRef::Constant(b.ctx().const_int(i32_ty, 0));
        let add = b.build_add(c, c, None);
        let phi = b.build_phi(i32_ty, None);
        let insts = ctx.block_insts(bb);
        assert_eq!(insts, vec![phi, add]);
    }
}
