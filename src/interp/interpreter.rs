//! Tree-walking interpreter (spec §4.10): executes one function at a time
//! against a simulated host memory model, recursing into `call`s.
//!
//! Per call, a fresh [`ByteArena`]-backed stack simulates the program
//! stack `alloca` carves slots out of; a plain `HashMap` keyed by
//! [`ValueRef`] stands in for the frame's pointer-map from IR value to
//! runtime value (there is no reason to give that map its own byte arena —
//! `RuntimeValue` is `Copy` and dropped automatically when the frame is).
//! Global storage lives in one `ByteArena` that persists across calls.

use std::collections::HashMap;

use crate::context::Context;
use crate::ids::{BlockId, FuncId, GlobalId, Sym, TypeId};
use crate::interp::error::InterpError;
use crate::interp::host_layout::{DefaultHostLayout, HostLayout};
use crate::interp::value::{MemPtr, Pointee, Region, RuntimeValue};
use crate::arena::{ByteArena, ByteHandle};
use crate::ir::instruction::{FCmpPred, ICmpPred, Opcode};
use crate::types::{FloatWidth, IntWidth, Type};
use crate::value::ValueRef;

/// A host function registered to back a declaration with no IR body.
/// Blanket-implemented for any matching closure, mirroring the "trait
/// object / closure implementing a sum-type-returning interface" shape
/// this crate's FFI boundary calls for.
pub trait ExternFn {
    fn call(&self, args: &[RuntimeValue]) -> Result<RuntimeValue, InterpError>;
}

impl<F> ExternFn for F
where
    F: Fn(&[RuntimeValue]) -> Result<RuntimeValue, InterpError>,
{
    fn call(&self, args: &[RuntimeValue]) -> Result<RuntimeValue, InterpError> {
        self(args)
    }
}

const DEFAULT_STACK_CAP: usize = 1 << 20;
const STACK_CHUNK_SIZE: usize = 4096;
const GLOBAL_CHUNK_SIZE: usize = 4096;

pub struct Interpreter<'ctx, L: HostLayout = DefaultHostLayout> {
    ctx: &'ctx Context,
    layout: L,
    stack_cap: usize,

    frames: Vec<ByteArena>,
    globals: HashMap<GlobalId, ByteHandle>,
    global_storage: ByteArena,

    externs: HashMap<Sym, Box<dyn ExternFn>>,

    addresses: HashMap<Pointee, u64>,
    reverse_addresses: HashMap<u64, Pointee>,
    next_address: u64,
}

impl<'ctx> Interpreter<'ctx, DefaultHostLayout> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Interpreter::with_layout(ctx, DefaultHostLayout)
    }
}

impl<'ctx, L: HostLayout> Interpreter<'ctx, L> {
    pub fn with_layout(ctx: &'ctx Context, layout: L) -> Self {
        let mut interp = Interpreter {
            ctx,
            layout,
            stack_cap: DEFAULT_STACK_CAP,
            frames: Vec::new(),
            globals: HashMap::new(),
            global_storage: ByteArena::new(GLOBAL_CHUNK_SIZE),
            externs: HashMap::new(),
            addresses: HashMap::new(),
            reverse_addresses: HashMap::new(),
            next_address: 1, // 0 is reserved for the null pointer.
        };
        interp.init_globals();
        interp
    }

    pub fn set_stack_cap(&mut self, cap: usize) {
        self.stack_cap = cap;
    }

    pub fn register_extern(&mut self, name: Sym, f: impl ExternFn + 'static) {
        self.externs.insert(name, Box::new(f));
    }

    fn init_globals(&mut self) {
        for module in self.ctx.modules_iter() {
            for &g in &module.globals {
                let global = self.ctx.global(g);
                let (size, align) = self.layout.layout(self.ctx, global.allocated_ty);
                let handle = self
                    .global_storage
                    .alloc(size as usize, (align as usize).max(1))
                    .expect("global storage exhausted");
                if let Some(init) = global.init {
                    let value = self.const_to_runtime(init);
                    let bytes = self.encode_value(value, size as usize);
                    self.global_storage.write(handle, &bytes);
                }
                self.globals.insert(g, handle);
            }
        }
    }

    // ---- calling convention -------------------------------------------------

    pub fn call_function(&mut self, func: FuncId, args: &[RuntimeValue]) -> Result<RuntimeValue, InterpError> {
        let name = self.ctx.resolve(self.ctx.func(func).name).to_string();
        if self.ctx.func(func).is_declaration {
            log::trace!("calling extern @{name}");
            return self.call_extern(func, args);
        }
        log::trace!("calling @{name} (frame depth {})", self.frames.len() + 1);
        self.frames.push(ByteArena::with_cap(STACK_CHUNK_SIZE, self.stack_cap));
        let result = self.run_function_body(func, args);
        self.frames.pop();
        result
    }

    fn call_extern(&mut self, func: FuncId, args: &[RuntimeValue]) -> Result<RuntimeValue, InterpError> {
        let name = self.ctx.func(func).name;
        match self.externs.get(&name) {
            Some(f) => f.call(args),
            None => Err(InterpError::UnlinkedExternal(self.ctx.resolve(name).to_string())),
        }
    }

    fn run_function_body(&mut self, func: FuncId, args: &[RuntimeValue]) -> Result<RuntimeValue, InterpError> {
        let frame_id = self.frames.len() - 1;
        let mut values: HashMap<ValueRef, RuntimeValue> = HashMap::new();
        for (&arg_id, &val) in self.ctx.func(func).args.iter().zip(args) {
            values.insert(ValueRef::Argument(arg_id), val);
        }

        let mut prev_block: Option<BlockId> = None;
        let mut block = self.ctx.func(func).entry_block().expect("function has no blocks");

        loop {
            let mut next_block: Option<BlockId> = None;
            let mut ret_value: Option<RuntimeValue> = None;

            for inst in self.ctx.block_insts(block) {
                let opcode = self.ctx.inst(inst).opcode;
                match opcode {
                    Opcode::Ret => {
                        let v = if self.ctx.inst(inst).operands.is_empty() {
                            RuntimeValue::Undef
                        } else {
                            self.eval_operand(&values, self.ctx.operand_value(inst, 0))
                        };
                        ret_value = Some(v);
                        break;
                    }
                    Opcode::Br => {
                        next_block = Some(self.ctx.operand_value(inst, 0).as_block().expect("br target is a block"));
                        break;
                    }
                    Opcode::CondBr => {
                        let cond = self.eval_operand(&values, self.ctx.operand_value(inst, 0));
                        let then_bb = self.ctx.operand_value(inst, 1).as_block().expect("cond_br then target is a block");
                        let else_bb = self.ctx.operand_value(inst, 2).as_block().expect("cond_br else target is a block");
                        next_block = Some(if cond.as_bool() { then_bb } else { else_bb });
                        break;
                    }
                    Opcode::Switch => {
                        let cond = self.eval_operand(&values, self.ctx.operand_value(inst, 0));
                        let mut target = self.ctx.switch_default(inst);
                        for (case, case_target) in self.ctx.switch_cases(inst) {
                            let case_val = self.const_to_runtime(case);
                            if case_val.as_unsigned() == cond.as_unsigned() {
                                target = case_target;
                                break;
                            }
                        }
                        next_block = Some(target);
                        break;
                    }
                    Opcode::Phi => {
                        let prev = prev_block.expect("phi executed with no predecessor block");
                        let incoming = self.ctx.phi_incoming(inst);
                        let (val, _) = incoming
                            .iter()
                            .find(|(_, from)| *from == prev)
                            .unwrap_or_else(|| panic!("phi has no incoming value for predecessor {prev:?}"));
                        let v = self.eval_operand(&values, *val);
                        values.insert(ValueRef::Instruction(inst), v);
                    }
                    _ => {
                        if let Some(v) = self.exec_simple(frame_id, inst, &mut values)? {
                            values.insert(ValueRef::Instruction(inst), v);
                        }
                    }
                }
            }

            if let Some(v) = ret_value {
                return Ok(v);
            }
            prev_block = Some(block);
            block = next_block.expect("block fell through without reaching a terminator");
        }
    }

    /// Every non-control-flow, non-phi opcode. Returns `None` for
    /// void-producing opcodes (`store`).
    fn exec_simple(
        &mut self,
        frame_id: usize,
        inst: crate::ids::InstId,
        values: &mut HashMap<ValueRef, RuntimeValue>,
    ) -> Result<Option<RuntimeValue>, InterpError> {
        let opcode = self.ctx.inst(inst).opcode;
        let result_ty = self.ctx.inst(inst).result_ty;

        let v = match opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::UDiv | Opcode::SDiv | Opcode::URem | Opcode::SRem
            | Opcode::Shl | Opcode::LShr | Opcode::AShr | Opcode::And | Opcode::Or | Opcode::Xor => {
                let lhs = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                let rhs = self.eval_operand(values, self.ctx.operand_value(inst, 1));
                self.exec_int_binop(opcode, result_ty.unwrap(), lhs, rhs)?
            }
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                let lhs = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                let rhs = self.eval_operand(values, self.ctx.operand_value(inst, 1));
                self.exec_float_binop(opcode, result_ty.unwrap(), lhs, rhs)?
            }
            Opcode::ICmp => {
                let lhs = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                let rhs = self.eval_operand(values, self.ctx.operand_value(inst, 1));
                exec_icmp(self.ctx.inst(inst).icmp_pred(), lhs, rhs)
            }
            Opcode::FCmp => {
                let lhs = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                let rhs = self.eval_operand(values, self.ctx.operand_value(inst, 1));
                RuntimeValue::I1(exec_fcmp(self.ctx.inst(inst).fcmp_pred(), lhs.as_f64(), rhs.as_f64()))
            }
            Opcode::Trunc | Opcode::ZExt | Opcode::SExt | Opcode::FpTrunc | Opcode::FpExt | Opcode::FpToUi
            | Opcode::FpToSi | Opcode::UiToFp | Opcode::SiToFp | Opcode::PtrToInt | Opcode::IntToPtr
            | Opcode::BitCast => {
                let src_ty = self.ctx.value_type(self.ctx.operand_value(inst, 0));
                let v = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                self.exec_cast(opcode, src_ty, result_ty.unwrap(), v)
            }
            Opcode::Alloca => {
                let ty = self.ctx.inst(inst).alloca_ty();
                let (size, align) = self.layout.layout(self.ctx, ty);
                let handle = self.frames[frame_id]
                    .alloc(size as usize, (align as usize).max(1))
                    .ok_or(InterpError::StackOverflow)?;
                RuntimeValue::Ptr(Pointee::Mem(MemPtr { region: Region::Frame(frame_id), chunk: handle.chunk, offset: handle.offset }))
            }
            Opcode::Load => {
                let ptr = self.eval_operand(values, self.ctx.operand_value(inst, 0)).as_ptr();
                let ty = result_ty.unwrap();
                let (size, _) = self.layout.layout(self.ctx, ty);
                let bytes = self.read_bytes(ptr, size as usize)?;
                self.decode_value(ty, &bytes)
            }
            Opcode::Store => {
                let value = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                let ptr = self.eval_operand(values, self.ctx.operand_value(inst, 1)).as_ptr();
                let value_ty = self.ctx.value_type(self.ctx.operand_value(inst, 0));
                let (size, _) = self.layout.layout(self.ctx, value_ty);
                let bytes = self.encode_value(value, size as usize);
                self.write_bytes(ptr, &bytes)?;
                return Ok(None);
            }
            Opcode::Gep => self.exec_gep(inst, values)?,
            Opcode::Select => {
                let cond = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                let if_true = self.eval_operand(values, self.ctx.operand_value(inst, 1));
                let if_false = self.eval_operand(values, self.ctx.operand_value(inst, 2));
                if cond.as_bool() {
                    if_true
                } else {
                    if_false
                }
            }
            Opcode::Call => {
                let callee = self.eval_operand(values, self.ctx.operand_value(inst, 0));
                let num_operands = self.ctx.inst(inst).operands.len();
                let mut arg_vals = Vec::with_capacity(num_operands - 1);
                for i in 1..num_operands {
                    arg_vals.push(self.eval_operand(values, self.ctx.operand_value(inst, i)));
                }
                let result = match callee.as_ptr() {
                    Pointee::Function(f) => self.call_function(f, &arg_vals)?,
                    _ => return Err(InterpError::InvalidPointer),
                };
                if result_ty.is_none() {
                    return Ok(None);
                }
                result
            }
            Opcode::Phi | Opcode::Ret | Opcode::Br | Opcode::CondBr | Opcode::Switch => {
                unreachable!("control-flow opcodes are dispatched before exec_simple")
            }
        };
        Ok(Some(v))
    }

    // ---- operand evaluation / constant folding ------------------------------

    fn eval_operand(&mut self, values: &HashMap<ValueRef, RuntimeValue>, value: ValueRef) -> RuntimeValue {
        match value {
            ValueRef::Constant(c) => self.const_to_runtime(c),
            ValueRef::Global(g) => {
                let handle = self.globals[&g];
                RuntimeValue::Ptr(Pointee::Mem(MemPtr { region: Region::Global, chunk: handle.chunk, offset: handle.offset }))
            }
            ValueRef::Function(f) => RuntimeValue::Ptr(Pointee::Function(f)),
            ValueRef::Argument(_) | ValueRef::Instruction(_) => *values
                .get(&value)
                .unwrap_or_else(|| panic!("operand {value:?} read before it was defined")),
            ValueRef::Block(_) => panic!("a basic-block value has no runtime representation"),
        }
    }

    fn const_to_runtime(&self, c: crate::ids::ConstId) -> RuntimeValue {
        let constant = self.ctx.constant(c);
        match constant.kind {
            crate::ir::constant::ConstantKind::Undef => RuntimeValue::Undef,
            crate::ir::constant::ConstantKind::Int(bits) => {
                let width = self.ctx.type_kind(constant.ty).as_int_width().expect("int constant has int type");
                RuntimeValue::from_unsigned(width, bits)
            }
            crate::ir::constant::ConstantKind::Float(bits) => match self.ctx.type_kind(constant.ty) {
                Type::Float(FloatWidth::F32) => RuntimeValue::F32(f32::from_bits(bits as u32)),
                Type::Float(FloatWidth::F64) => RuntimeValue::F64(f64::from_bits(bits)),
                other => panic!("float constant has non-float type {other:?}"),
            },
        }
    }

    // ---- arithmetic ----------------------------------------------------------

    fn exec_int_binop(&self, opcode: Opcode, ty: TypeId, lhs: RuntimeValue, rhs: RuntimeValue) -> Result<RuntimeValue, InterpError> {
        let width = self.ctx.type_kind(ty).as_int_width().expect("int binop result type is an integer");
        let result: u64 = match opcode {
            Opcode::Add => lhs.as_unsigned().wrapping_add(rhs.as_unsigned()),
            Opcode::Sub => lhs.as_unsigned().wrapping_sub(rhs.as_unsigned()),
            Opcode::Mul => lhs.as_unsigned().wrapping_mul(rhs.as_unsigned()),
            Opcode::UDiv => {
                let r = rhs.as_unsigned();
                if r == 0 {
                    return Err(InterpError::DivByZeroUnsigned);
                }
                lhs.as_unsigned() / r
            }
            Opcode::SDiv => {
                let r = rhs.as_signed();
                if r == 0 {
                    return Err(InterpError::DivByZeroSigned);
                }
                lhs.as_signed().wrapping_div(r) as u64
            }
            Opcode::URem => {
                let r = rhs.as_unsigned();
                if r == 0 {
                    return Err(InterpError::DivByZeroUnsigned);
                }
                lhs.as_unsigned() % r
            }
            Opcode::SRem => {
                let r = rhs.as_signed();
                if r == 0 {
                    return Err(InterpError::DivByZeroSigned);
                }
                lhs.as_signed().wrapping_rem(r) as u64
            }
            Opcode::Shl => lhs.as_unsigned().wrapping_shl(rhs.as_unsigned() as u32),
            Opcode::LShr => lhs.as_unsigned().wrapping_shr(rhs.as_unsigned() as u32),
            Opcode::AShr => lhs.as_signed().wrapping_shr(rhs.as_unsigned() as u32) as u64,
            Opcode::And => lhs.as_unsigned() & rhs.as_unsigned(),
            Opcode::Or => lhs.as_unsigned() | rhs.as_unsigned(),
            Opcode::Xor => lhs.as_unsigned() ^ rhs.as_unsigned(),
            _ => unreachable!("non-int-binop opcode {opcode:?}"),
        };
        Ok(RuntimeValue::from_unsigned(width, result))
    }

    fn exec_float_binop(&self, opcode: Opcode, ty: TypeId, lhs: RuntimeValue, rhs: RuntimeValue) -> Result<RuntimeValue, InterpError> {
        let l = lhs.as_f64();
        let r = rhs.as_f64();
        let result = match opcode {
            Opcode::FAdd => l + r,
            Opcode::FSub => l - r,
            Opcode::FMul => l * r,
            Opcode::FDiv => {
                if r == 0.0 {
                    return Err(InterpError::DivByZeroFloat);
                }
                l / r
            }
            _ => unreachable!("non-float-binop opcode {opcode:?}"),
        };
        Ok(match self.ctx.type_kind(ty) {
            Type::Float(FloatWidth::F32) => RuntimeValue::F32(result as f32),
            Type::Float(FloatWidth::F64) => RuntimeValue::F64(result),
            other => panic!("float binop result type is not a float: {other:?}"),
        })
    }

    fn exec_cast(&self, opcode: Opcode, src_ty: TypeId, dest_ty: TypeId, v: RuntimeValue) -> RuntimeValue {
        match opcode {
            Opcode::Trunc | Opcode::ZExt => {
                let width = self.ctx.type_kind(dest_ty).as_int_width().expect("cast destination is an integer");
                RuntimeValue::from_unsigned(width, v.as_unsigned())
            }
            Opcode::SExt => {
                let width = self.ctx.type_kind(dest_ty).as_int_width().expect("cast destination is an integer");
                RuntimeValue::from_signed(width, v.as_signed())
            }
            Opcode::FpTrunc | Opcode::FpExt => match self.ctx.type_kind(dest_ty) {
                Type::Float(FloatWidth::F32) => RuntimeValue::F32(v.as_f64() as f32),
                Type::Float(FloatWidth::F64) => RuntimeValue::F64(v.as_f64()),
                other => panic!("fp cast destination is not a float: {other:?}"),
            },
            Opcode::FpToUi => {
                let width = self.ctx.type_kind(dest_ty).as_int_width().expect("fptoui destination is an integer");
                RuntimeValue::from_unsigned(width, v.as_f64() as u64)
            }
            Opcode::FpToSi => {
                let width = self.ctx.type_kind(dest_ty).as_int_width().expect("fptosi destination is an integer");
                RuntimeValue::from_signed(width, v.as_f64() as i64)
            }
            Opcode::UiToFp => match self.ctx.type_kind(dest_ty) {
                Type::Float(FloatWidth::F32) => RuntimeValue::F32(v.as_unsigned() as f32),
                Type::Float(FloatWidth::F64) => RuntimeValue::F64(v.as_unsigned() as f64),
                other => panic!("uitofp destination is not a float: {other:?}"),
            },
            Opcode::SiToFp => match self.ctx.type_kind(dest_ty) {
                Type::Float(FloatWidth::F32) => RuntimeValue::F32(v.as_signed() as f32),
                Type::Float(FloatWidth::F64) => RuntimeValue::F64(v.as_signed() as f64),
                other => panic!("sitofp destination is not a float: {other:?}"),
            },
            Opcode::PtrToInt => {
                let addr = self.address_of_const(v.as_ptr());
                let width = self.ctx.type_kind(dest_ty).as_int_width().expect("ptrtoint destination is an integer");
                RuntimeValue::from_unsigned(width, addr)
            }
            Opcode::IntToPtr => RuntimeValue::Ptr(self.pointee_of(v.as_unsigned())),
            Opcode::BitCast => {
                let (src_size, _) = self.layout.layout(self.ctx, src_ty);
                let (dest_size, _) = self.layout.layout(self.ctx, dest_ty);
                assert_eq!(src_size, dest_size, "bitcast: source and destination sizes must match");
                match self.ctx.type_kind(dest_ty) {
                    Type::Pointer(_) => RuntimeValue::Ptr(v.as_ptr()),
                    Type::Int(w) => RuntimeValue::from_unsigned(*w, v.raw_bits()),
                    Type::Float(FloatWidth::F32) => RuntimeValue::F32(f32::from_bits(v.raw_bits() as u32)),
                    Type::Float(FloatWidth::F64) => RuntimeValue::F64(f64::from_bits(v.raw_bits())),
                    other => panic!("bitcast to unsupported destination type {other:?}"),
                }
            }
            other => unreachable!("non-cast opcode {other:?}"),
        }
    }

    // ---- gep -------------------------------------------------------------------

    fn exec_gep(&mut self, inst: crate::ids::InstId, values: &mut HashMap<ValueRef, RuntimeValue>) -> Result<RuntimeValue, InterpError> {
        let source_ty = self.ctx.inst(inst).gep_source_ty();
        let base = self.eval_operand(values, self.ctx.operand_value(inst, 0));
        let mut ptr = base.as_ptr();
        let mut cur_ty = source_ty;
        let num_operands = self.ctx.inst(inst).operands.len();

        for n in 1..num_operands {
            let idx = self.eval_operand(values, self.ctx.operand_value(inst, n)).as_signed();
            if n == 1 {
                let (elem_size, _) = self.layout.layout(self.ctx, source_ty);
                ptr = offset_pointee(ptr, idx * elem_size as i64);
            } else {
                match self.ctx.type_kind(cur_ty).clone() {
                    Type::Array(elem, _) => {
                        let (elem_size, _) = self.layout.layout(self.ctx, elem);
                        ptr = offset_pointee(ptr, idx * elem_size as i64);
                        cur_ty = elem;
                    }
                    Type::AnonStruct(members) => {
                        let field = idx as usize;
                        let field_offset = self.layout.struct_member_offset(self.ctx, cur_ty, field);
                        ptr = offset_pointee(ptr, field_offset as i64);
                        cur_ty = members[field];
                    }
                    Type::NamedStruct { members: Some(members), .. } => {
                        let field = idx as usize;
                        let field_offset = self.layout.struct_member_offset(self.ctx, cur_ty, field);
                        ptr = offset_pointee(ptr, field_offset as i64);
                        cur_ty = members[field];
                    }
                    other => panic!("gep: cannot index into scalar type {other:?}"),
                }
            }
        }
        Ok(RuntimeValue::Ptr(ptr))
    }

    // ---- memory --------------------------------------------------------------

    fn encode_value(&mut self, value: RuntimeValue, size: usize) -> Vec<u8> {
        match value {
            RuntimeValue::Undef => vec![0u8; size],
            RuntimeValue::I1(b) => vec![b as u8],
            RuntimeValue::I8(v) => vec![v],
            RuntimeValue::I16(v) => v.to_le_bytes().to_vec(),
            RuntimeValue::I32(v) => v.to_le_bytes().to_vec(),
            RuntimeValue::I64(v) => v.to_le_bytes().to_vec(),
            RuntimeValue::F32(v) => v.to_le_bytes().to_vec(),
            RuntimeValue::F64(v) => v.to_le_bytes().to_vec(),
            RuntimeValue::Ptr(p) => self.address_of_const(p).to_le_bytes().to_vec(),
        }
    }

    fn decode_value(&mut self, ty: TypeId, bytes: &[u8]) -> RuntimeValue {
        match self.ctx.type_kind(ty) {
            Type::Int(IntWidth::I1) => RuntimeValue::I1(bytes[0] != 0),
            Type::Int(IntWidth::I8) => RuntimeValue::I8(bytes[0]),
            Type::Int(IntWidth::I16) => RuntimeValue::I16(u16::from_le_bytes(bytes.try_into().unwrap())),
            Type::Int(IntWidth::I32) => RuntimeValue::I32(u32::from_le_bytes(bytes.try_into().unwrap())),
            Type::Int(IntWidth::I64) => RuntimeValue::I64(u64::from_le_bytes(bytes.try_into().unwrap())),
            Type::Float(FloatWidth::F32) => RuntimeValue::F32(f32::from_le_bytes(bytes.try_into().unwrap())),
            Type::Float(FloatWidth::F64) => RuntimeValue::F64(f64::from_le_bytes(bytes.try_into().unwrap())),
            Type::Pointer(_) => RuntimeValue::Ptr(self.pointee_of(u64::from_le_bytes(bytes.try_into().unwrap()))),
            other => panic!("load/store of unsupported scalar type {other:?}"),
        }
    }

    fn region_arena(&self, region: Region) -> Result<&ByteArena, InterpError> {
        match region {
            Region::Frame(id) => self.frames.get(id).ok_or(InterpError::InvalidPointer),
            Region::Global => Ok(&self.global_storage),
        }
    }

    fn region_arena_mut(&mut self, region: Region) -> Result<&mut ByteArena, InterpError> {
        match region {
            Region::Frame(id) => self.frames.get_mut(id).ok_or(InterpError::InvalidPointer),
            Region::Global => Ok(&mut self.global_storage),
        }
    }

    fn read_bytes(&self, ptr: Pointee, size: usize) -> Result<Vec<u8>, InterpError> {
        let mp = match ptr {
            Pointee::Mem(mp) => mp,
            _ => return Err(InterpError::InvalidPointer),
        };
        let arena = self.region_arena(mp.region)?;
        let mut buf = vec![0u8; size];
        arena.read(ByteHandle { chunk: mp.chunk, offset: mp.offset, size }, &mut buf);
        Ok(buf)
    }

    fn write_bytes(&mut self, ptr: Pointee, bytes: &[u8]) -> Result<(), InterpError> {
        let mp = match ptr {
            Pointee::Mem(mp) => mp,
            _ => return Err(InterpError::InvalidPointer),
        };
        let arena = self.region_arena_mut(mp.region)?;
        arena.write(ByteHandle { chunk: mp.chunk, offset: mp.offset, size: bytes.len() }, bytes);
        Ok(())
    }

    // ---- fabricated addresses --------------------------------------------------

    /// `ptrtoint`/pointer-in-memory encoding: every distinct `Pointee`
    /// gets a stable address the first time it's materialized as an
    /// integer, and `inttoptr`/decode can map that address straight back.
    fn address_of_const(&mut self, p: Pointee) -> u64 {
        if let Pointee::Raw(addr) = p {
            return addr;
        }
        if let Some(&addr) = self.addresses.get(&p) {
            return addr;
        }
        let addr = self.next_address;
        self.next_address += 1;
        self.addresses.insert(p, addr);
        self.reverse_addresses.insert(addr, p);
        addr
    }

    fn pointee_of(&self, addr: u64) -> Pointee {
        if addr == 0 {
            return Pointee::Raw(0);
        }
        self.reverse_addresses.get(&addr).copied().unwrap_or(Pointee::Raw(addr))
    }
}

fn offset_pointee(p: Pointee, delta: i64) -> Pointee {
    match p {
        Pointee::Mem(mp) => Pointee::Mem(MemPtr { region: mp.region, chunk: mp.chunk, offset: (mp.offset as i64 + delta) as usize }),
        Pointee::Raw(addr) => Pointee::Raw((addr as i64 + delta) as u64),
        Pointee::Function(_) => panic!("gep: cannot offset a function pointer"),
    }
}

fn exec_icmp(pred: ICmpPred, lhs: RuntimeValue, rhs: RuntimeValue) -> RuntimeValue {
    let result = match pred {
        ICmpPred::Eq => lhs.as_unsigned() == rhs.as_unsigned(),
        ICmpPred::Ne => lhs.as_unsigned() != rhs.as_unsigned(),
        ICmpPred::Sgt => lhs.as_signed() > rhs.as_signed(),
        ICmpPred::Sge => lhs.as_signed() >= rhs.as_signed(),
        ICmpPred::Slt => lhs.as_signed() < rhs.as_signed(),
        ICmpPred::Sle => lhs.as_signed() <= rhs.as_signed(),
        ICmpPred::Ugt => lhs.as_unsigned() > rhs.as_unsigned(),
        ICmpPred::Uge => lhs.as_unsigned() >= rhs.as_unsigned(),
        ICmpPred::Ult => lhs.as_unsigned() < rhs.as_unsigned(),
        ICmpPred::Ule => lhs.as_unsigned() <= rhs.as_unsigned(),
    };
    RuntimeValue::I1(result)
}

fn exec_fcmp(pred: FCmpPred, l: f64, r: f64) -> bool {
    let unordered = l.is_nan() || r.is_nan();
    match pred {
        FCmpPred::True => true,
        FCmpPred::False => false,
        FCmpPred::Ord => !unordered,
        FCmpPred::Uno => unordered,
        FCmpPred::Oeq => !unordered && l == r,
        FCmpPred::One => !unordered && l != r,
        FCmpPred::Ogt => !unordered && l > r,
        FCmpPred::Oge => !unordered && l >= r,
        FCmpPred::Olt => !unordered && l < r,
        FCmpPred::Ole => !unordered && l <= r,
        FCmpPred::Ueq => unordered || l == r,
        FCmpPred::Une => unordered || l != r,
        FCmpPred::Ugt => unordered || l > r,
        FCmpPred::Uge => unordered || l >= r,
        FCmpPred::Ult => unordered || l < r,
        FCmpPred::Ule => unordered || l <= r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::instruction::ICmpPred;

    fn build_abs_like(ctx: &mut Context) -> FuncId {
        // fn f(x: i32) -> i32 { if x < 0 { 0 - x } else { x } }
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let f = ctx.new_function(m, name, i32_ty, &[i32_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let neg_bb = ctx.append_block(f, None);
        let pos_bb = ctx.append_block(f, None);
        let x = ValueRef::Argument(ctx.func(f).args[0]);
        let mut b = Builder::new(ctx);
        b.set_insertion_point(entry);
        let zero = ValueRef::Constant(b.ctx().const_int(i32_ty, 0));
        let cmp = b.build_icmp(ICmpPred::Slt, x, zero, None);
        b.build_cond_br(ValueRef::Instruction(cmp), neg_bb, pos_bb);
        b.set_insertion_point(neg_bb);
        let negated = b.build_sub(zero, x, None);
        b.build_ret(Some(ValueRef::Instruction(negated)));
        b.set_insertion_point(pos_bb);
        b.build_ret(Some(x));
        f
    }

    #[test]
    fn runs_a_branching_function() {
        let mut ctx = Context::new();
        let f = build_abs_like(&mut ctx);
        let mut interp = Interpreter::new(&ctx);
        assert_eq!(interp.call_function(f, &[RuntimeValue::I32(5)]).unwrap(), RuntimeValue::I32(5));
        assert_eq!(interp.call_function(f, &[RuntimeValue::I32(u32::from_ne_bytes((-7i32).to_ne_bytes()))]).unwrap(), RuntimeValue::I32(7));
    }

    #[test]
    fn alloca_store_load_round_trips_through_simulated_stack() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let f = ctx.new_function(m, name, i32_ty, &[], &[], false, false);
        let entry = ctx.append_block(f, None);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        let slot = b.build_alloca(i32_ty, None);
        let forty_two = ValueRef::Constant(b.ctx().const_int(i32_ty, 42));
        b.build_store(forty_two, ValueRef::Instruction(slot));
        let loaded = b.build_load(ValueRef::Instruction(slot), None);
        b.build_ret(Some(ValueRef::Instruction(loaded)));

        let mut interp = Interpreter::new(&ctx);
        assert_eq!(interp.call_function(f, &[]).unwrap(), RuntimeValue::I32(42));
    }

    #[test]
    fn sdiv_by_zero_is_reported_as_an_error() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let f = ctx.new_function(m, name, i32_ty, &[i32_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let x = ValueRef::Argument(ctx.func(f).args[0]);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        let zero = ValueRef::Constant(b.ctx().const_int(i32_ty, 0));
        let div = b.build_sdiv(x, zero, None);
        b.build_ret(Some(ValueRef::Instruction(div)));

        let mut interp = Interpreter::new(&ctx);
        assert_eq!(interp.call_function(f, &[RuntimeValue::I32(10)]), Err(InterpError::DivByZeroSigned));
    }

    #[test]
    fn call_to_unregistered_extern_is_unlinked_external() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("puts");
        let i32_ty = ctx.i32_ty;
        let decl = ctx.new_function(m, name, i32_ty, &[], &[], false, true);

        let mut interp = Interpreter::new(&ctx);
        match interp.call_function(decl, &[]) {
            Err(InterpError::UnlinkedExternal(n)) => assert_eq!(n, "puts"),
            other => panic!("expected UnlinkedExternal, got {other:?}"),
        }
    }

    #[test]
    fn registered_extern_is_called_with_arguments() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("add_one");
        let i32_ty = ctx.i32_ty;
        let decl = ctx.new_function(m, name, i32_ty, &[i32_ty], &[None], false, true);

        let mut interp = Interpreter::new(&ctx);
        interp.register_extern(name, |args: &[RuntimeValue]| Ok(RuntimeValue::I32(args[0].as_unsigned() as u32 + 1)));
        assert_eq!(interp.call_function(decl, &[RuntimeValue::I32(41)]).unwrap(), RuntimeValue::I32(42));
    }

    #[test]
    fn recursive_call_does_not_corrupt_outer_frame_locals() {
        // fn f(n: i32) -> i32 { if n == 0 { 0 } else { let x = n; f(n - 1) + x } }
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let f = ctx.new_function(m, name, i32_ty, &[i32_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let base_bb = ctx.append_block(f, None);
        let rec_bb = ctx.append_block(f, None);
        let n = ValueRef::Argument(ctx.func(f).args[0]);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        let zero = ValueRef::Constant(b.ctx().const_int(i32_ty, 0));
        let is_zero = b.build_icmp(ICmpPred::Eq, n, zero, None);
        b.build_cond_br(ValueRef::Instruction(is_zero), base_bb, rec_bb);
        b.set_insertion_point(base_bb);
        b.build_ret(Some(zero));
        b.set_insertion_point(rec_bb);
        let one = ValueRef::Constant(b.ctx().const_int(i32_ty, 1));
        let slot = b.build_alloca(i32_ty, None);
        b.build_store(n, ValueRef::Instruction(slot));
        let n_minus_one = b.build_sub(n, one, None);
        let callee = ValueRef::Function(f);
        let rec = b.build_call(callee, &[ValueRef::Instruction(n_minus_one)], None);
        let saved = b.build_load(ValueRef::Instruction(slot), None);
        let sum = b.build_add(ValueRef::Instruction(rec), ValueRef::Instruction(saved), None);
        b.build_ret(Some(ValueRef::Instruction(sum)));

        let mut interp = Interpreter::new(&ctx);
        // 3 + 2 + 1 + 0 = 6
        assert_eq!(interp.call_function(f, &[RuntimeValue::I32(3)]).unwrap(), RuntimeValue::I32(6));
    }
}
