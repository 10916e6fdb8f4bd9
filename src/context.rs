//! `Context`: the root owner of one IR universe (spec §3).
//!
//! Everything else in this crate — types, constants, instructions, blocks,
//! functions, globals, modules, uses, interned strings — lives in an arena
//! owned here and is addressed by the index newtypes in `crate::ids`.
//! Destroying a `Context` (simply dropping it) invalidates every id that
//! referred into it; nothing under it is individually freed before then.

use std::collections::HashMap;

use crate::arena::ObjArena;
use crate::ids::{ArgId, BlockId, ConstId, FuncId, GlobalId, InstId, ModuleId, Sym, TypeId, UseId};
use crate::ir::block::BasicBlock;
use crate::ir::constant::{Constant, ConstantKind};
use crate::ir::function::{Argument, Function};
use crate::ir::global::GlobalVariable;
use crate::ir::instruction::{InstData, Instruction, Opcode};
use crate::ir::module::Module;
use crate::types::{FloatWidth, IntWidth, Type};
use crate::value::{Use, ValueRef};

pub struct Context {
    // Object storage.
    types: ObjArena<Type>,
    consts: ObjArena<Constant>,
    insts: ObjArena<Instruction>,
    blocks: ObjArena<BasicBlock>,
    funcs: ObjArena<Function>,
    args: ObjArena<Argument>,
    globals: ObjArena<GlobalVariable>,
    modules: ObjArena<Module>,
    uses: ObjArena<Use>,

    // String interning.
    strings: HashMap<String, Sym>,
    string_table: Vec<String>,

    // Type interning.
    pointer_cache: HashMap<TypeId, TypeId>,
    array_cache: HashMap<(TypeId, u64), TypeId>,
    anon_struct_cache: HashMap<Vec<TypeId>, TypeId>,
    named_struct_cache: HashMap<Sym, TypeId>,
    function_ty_cache: HashMap<(TypeId, Vec<TypeId>, bool), TypeId>,

    // Singleton primitive types, created once in `Context::new`.
    pub void_ty: TypeId,
    pub label_ty: TypeId,
    pub i1_ty: TypeId,
    pub i8_ty: TypeId,
    pub i16_ty: TypeId,
    pub i32_ty: TypeId,
    pub i64_ty: TypeId,
    pub f32_ty: TypeId,
    pub f64_ty: TypeId,

    // Constant interning.
    undef_cache: HashMap<TypeId, ConstId>,
    int_cache: HashMap<(TypeId, u64), ConstId>,
    float_cache: HashMap<(TypeId, u64), ConstId>,
}

impl Context {
    pub fn new() -> Self {
        let mut types = ObjArena::new();
        let void_ty = TypeId::from_usize(types.push(Type::Void));
        let label_ty = TypeId::from_usize(types.push(Type::Label));
        let i1_ty = TypeId::from_usize(types.push(Type::Int(IntWidth::I1)));
        let i8_ty = TypeId::from_usize(types.push(Type::Int(IntWidth::I8)));
        let i16_ty = TypeId::from_usize(types.push(Type::Int(IntWidth::I16)));
        let i32_ty = TypeId::from_usize(types.push(Type::Int(IntWidth::I32)));
        let i64_ty = TypeId::from_usize(types.push(Type::Int(IntWidth::I64)));
        let f32_ty = TypeId::from_usize(types.push(Type::Float(FloatWidth::F32)));
        let f64_ty = TypeId::from_usize(types.push(Type::Float(FloatWidth::F64)));

        Context {
            types,
            consts: ObjArena::new(),
            insts: ObjArena::new(),
            blocks: ObjArena::new(),
            funcs: ObjArena::new(),
            args: ObjArena::new(),
            globals: ObjArena::new(),
            modules: ObjArena::new(),
            uses: ObjArena::new(),
            strings: HashMap::new(),
            string_table: Vec::new(),
            pointer_cache: HashMap::new(),
            array_cache: HashMap::new(),
            anon_struct_cache: HashMap::new(),
            named_struct_cache: HashMap::new(),
            function_ty_cache: HashMap::new(),
            void_ty,
            label_ty,
            i1_ty,
            i8_ty,
            i16_ty,
            i32_ty,
            i64_ty,
            f32_ty,
            f64_ty,
            undef_cache: HashMap::new(),
            int_cache: HashMap::new(),
            float_cache: HashMap::new(),
        }
    }

    // ---- string interning ----------------------------------------------

    pub fn intern(&mut self, s: &str) -> Sym {
        if let Some(sym) = self.strings.get(s) {
            return *sym;
        }
        let sym = Sym::from_usize(self.string_table.len());
        self.string_table.push(s.to_string());
        self.strings.insert(s.to_string(), sym);
        sym
    }

    pub fn resolve(&self, sym: Sym) -> &str {
        &self.string_table[sym.index()]
    }

    // ---- type interning --------------------------------------------------

    pub fn int_type(&self, width: IntWidth) -> TypeId {
        match width {
            IntWidth::I1 => self.i1_ty,
            IntWidth::I8 => self.i8_ty,
            IntWidth::I16 => self.i16_ty,
            IntWidth::I32 => self.i32_ty,
            IntWidth::I64 => self.i64_ty,
        }
    }

    pub fn float_type(&self, width: FloatWidth) -> TypeId {
        match width {
            FloatWidth::F32 => self.f32_ty,
            FloatWidth::F64 => self.f64_ty,
        }
    }

    pub fn pointer_type(&mut self, pointee: TypeId) -> TypeId {
        if let Some(id) = self.pointer_cache.get(&pointee) {
            return *id;
        }
        let id = TypeId::from_usize(self.types.push(Type::Pointer(pointee)));
        self.pointer_cache.insert(pointee, id);
        id
    }

    pub fn array_type(&mut self, elem: TypeId, count: u64) -> TypeId {
        let key = (elem, count);
        if let Some(id) = self.array_cache.get(&key) {
            return *id;
        }
        let id = TypeId::from_usize(self.types.push(Type::Array(elem, count)));
        self.array_cache.insert(key, id);
        id
    }

    pub fn anon_struct_type(&mut self, members: Vec<TypeId>) -> TypeId {
        if let Some(id) = self.anon_struct_cache.get(&members) {
            return *id;
        }
        let id = TypeId::from_usize(self.types.push(Type::AnonStruct(members.clone())));
        self.anon_struct_cache.insert(members, id);
        id
    }

    pub fn function_type(&mut self, ret: TypeId, params: Vec<TypeId>, is_variadic: bool) -> TypeId {
        let key = (ret, params.clone(), is_variadic);
        if let Some(id) = self.function_ty_cache.get(&key) {
            return *id;
        }
        let id = TypeId::from_usize(self.types.push(Type::Function {
            ret,
            params: params.clone(),
            is_variadic,
        }));
        self.function_ty_cache.insert(key, id);
        id
    }

    /// Interns (or returns the existing) opaque named struct `name`. Its
    /// body is `None` until `define_named_struct_body` is called — this is
    /// how a pointer to a not-yet-fully-defined struct gets a `TypeId` to
    /// point at.
    pub fn named_struct(&mut self, name: Sym) -> TypeId {
        if let Some(id) = self.named_struct_cache.get(&name) {
            return *id;
        }
        let id = TypeId::from_usize(self.types.push(Type::NamedStruct { name, members: None }));
        self.named_struct_cache.insert(name, id);
        id
    }

    /// Sets the body of a named struct type. Contract violation (fatal) if
    /// the struct already has a *different* body — redefinition under a
    /// new shape is never legal, per spec §4.3.
    pub fn define_named_struct_body(&mut self, ty: TypeId, members: Vec<TypeId>) {
        match self.types.get_mut(ty.index()) {
            Type::NamedStruct { members: existing, .. } => match existing {
                None => *existing = Some(members),
                Some(current) if *current == members => {}
                Some(_) => panic!("redefinition of named struct type with a different body"),
            },
            _ => panic!("define_named_struct_body called on a non-struct type"),
        }
    }

    pub fn type_kind(&self, id: TypeId) -> &Type {
        self.types.get(id.index())
    }

    pub fn types_equal(&self, a: TypeId, b: TypeId) -> bool {
        a == b
    }

    // ---- constant interning ----------------------------------------------

    pub fn const_undef(&mut self, ty: TypeId) -> ConstId {
        if let Some(id) = self.undef_cache.get(&ty) {
            return *id;
        }
        let id = ConstId::from_usize(self.consts.push(Constant {
            kind: ConstantKind::Undef,
            ty,
            uses: crate::list::List::new(),
        }));
        self.undef_cache.insert(ty, id);
        id
    }

    pub fn const_int(&mut self, ty: TypeId, value: u64) -> ConstId {
        let width = self
            .type_kind(ty)
            .as_int_width()
            .expect("const_int requires an integer type");
        let masked = value & width.mask();
        let key = (ty, masked);
        if let Some(id) = self.int_cache.get(&key) {
            return *id;
        }
        let id = ConstId::from_usize(self.consts.push(Constant {
            kind: ConstantKind::Int(masked),
            ty,
            uses: crate::list::List::new(),
        }));
        self.int_cache.insert(key, id);
        id
    }

    pub fn const_float(&mut self, ty: TypeId, bits: u64) -> ConstId {
        let key = (ty, bits);
        if let Some(id) = self.float_cache.get(&key) {
            return *id;
        }
        let id = ConstId::from_usize(self.consts.push(Constant {
            kind: ConstantKind::Float(bits),
            ty,
            uses: crate::list::List::new(),
        }));
        self.float_cache.insert(key, id);
        id
    }

    pub fn constant(&self, id: ConstId) -> &Constant {
        self.consts.get(id.index())
    }

    // ---- object accessors --------------------------------------------------

    pub fn inst(&self, id: InstId) -> &Instruction {
        self.insts.get(id.index())
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        self.insts.get_mut(id.index())
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks.get(id.index())
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks.get_mut(id.index())
    }

    pub fn func(&self, id: FuncId) -> &Function {
        self.funcs.get(id.index())
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        self.funcs.get_mut(id.index())
    }

    pub fn arg(&self, id: ArgId) -> &Argument {
        self.args.get(id.index())
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        self.globals.get(id.index())
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut GlobalVariable {
        self.globals.get_mut(id.index())
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        self.modules.get(id.index())
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        self.modules.get_mut(id.index())
    }

    /// Every module the context has created, in creation order — the
    /// interpreter walks this once to seed global storage.
    pub fn modules_iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn use_(&self, id: UseId) -> &Use {
        self.uses.get(id.index())
    }

    /// The sequence of `(used value, block)` held by a `phi`.
    pub fn phi_incoming(&self, inst: InstId) -> Vec<(ValueRef, BlockId)> {
        let i = self.inst(inst);
        debug_assert!(i.opcode.is_phi());
        i.operands
            .chunks(2)
            .map(|pair| {
                let val = self.use_(pair[0]).value;
                let blk = self.use_(pair[1]).value.as_block().expect("phi block operand");
                (val, blk)
            })
            .collect()
    }

    /// The `(case constant, target)` pairs of a `switch`, after the
    /// condition (operand 0) and default target (operand 1).
    pub fn switch_cases(&self, inst: InstId) -> Vec<(ConstId, BlockId)> {
        let i = self.inst(inst);
        debug_assert_eq!(i.opcode, Opcode::Switch);
        i.operands[2..]
            .chunks(2)
            .map(|pair| {
                let c = self.use_(pair[0]).value.as_constant().expect("switch case constant");
                let b = self.use_(pair[1]).value.as_block().expect("switch case target");
                (c, b)
            })
            .collect()
    }

    pub fn switch_default(&self, inst: InstId) -> BlockId {
        let i = self.inst(inst);
        debug_assert_eq!(i.opcode, Opcode::Switch);
        self.use_(i.operands[1]).value.as_block().expect("switch default target")
    }

    pub fn operand_value(&self, inst: InstId, index: usize) -> ValueRef {
        self.use_(self.inst(inst).operands[index]).value
    }

    // ---- module / function / global construction --------------------------

    pub fn new_module(&mut self, name: Option<String>) -> ModuleId {
        ModuleId::from_usize(self.modules.push(Module { name, functions: Vec::new(), globals: Vec::new() }))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_function(
        &mut self,
        module: ModuleId,
        name: Sym,
        ret_ty: TypeId,
        param_types: &[TypeId],
        param_names: &[Option<Sym>],
        is_variadic: bool,
        is_declaration: bool,
    ) -> FuncId {
        let fn_ty = self.function_type(ret_ty, param_types.to_vec(), is_variadic);
        let func_id = FuncId::from_usize(self.funcs.push(Function {
            name,
            module,
            ret_ty,
            fn_ty,
            args: Vec::new(),
            blocks: Vec::new(),
            is_declaration,
            uses: crate::list::List::new(),
        }));
        let mut args = Vec::with_capacity(param_types.len());
        for (i, ty) in param_types.iter().enumerate() {
            let arg_id = ArgId::from_usize(self.args.push(Argument {
                ty: *ty,
                name: param_names.get(i).copied().flatten(),
                func: func_id,
                index: i as u32,
                uses: crate::list::List::new(),
            }));
            args.push(arg_id);
        }
        self.func_mut(func_id).args = args;
        self.module_mut(module).functions.push(func_id);
        func_id
    }

    pub fn new_global(
        &mut self,
        module: ModuleId,
        name: Sym,
        allocated_ty: TypeId,
        init: Option<ConstId>,
    ) -> GlobalId {
        let ptr_ty = self.pointer_type(allocated_ty);
        let id = GlobalId::from_usize(self.globals.push(GlobalVariable {
            name,
            module,
            allocated_ty,
            ptr_ty,
            init,
            uses: crate::list::List::new(),
        }));
        self.module_mut(module).globals.push(id);
        id
    }

    pub fn append_block(&mut self, func: FuncId, name: Option<Sym>) -> BlockId {
        let id = BlockId::from_usize(self.blocks.push(BasicBlock::new(func, name)));
        self.func_mut(func).blocks.push(id);
        id
    }

    // ---- value typing -------------------------------------------------------

    pub fn value_type(&self, v: ValueRef) -> TypeId {
        match v {
            ValueRef::Argument(a) => self.arg(a).ty,
            ValueRef::Instruction(i) => self
                .inst(i)
                .result_ty
                .expect("value_type on a void-producing instruction"),
            ValueRef::Block(_) => self.label_ty,
            ValueRef::Function(f) => {
                let func = self.func(f);
                // not cached: function pointer types are cheap and rare to
                // query repeatedly outside the builder/printer.
                let fn_ty = func.fn_ty;
                self.fn_ptr_type_uncached(fn_ty)
            }
            ValueRef::Constant(c) => self.constant(c).ty,
            ValueRef::Global(g) => self.global(g).ptr_ty,
        }
    }

    fn fn_ptr_type_uncached(&self, fn_ty: TypeId) -> TypeId {
        // Pointer-to-function types are produced through the normal
        // pointer cache by callers that hold `&mut self` (builder,
        // verifier); this immutable helper is only used for printing and
        // returns the cached id if present, panicking otherwise would be
        // wrong for a read-only query, so it degrades gracefully: callers
        // that need a fresh pointer type go through `Context::pointer_type`.
        // In practice every function's pointer type is materialized the
        // first time the function is used as a callee, so the cache is hit.
        self.pointer_cache.get(&fn_ty).copied().unwrap_or(fn_ty)
    }

    // ---- def-use graph ------------------------------------------------------

    pub fn add_use(&mut self, user: InstId, operand_index: u32, value: ValueRef) -> UseId {
        let id = UseId::from_usize(self.uses.push(Use::new(user, operand_index, value)));
        self.use_list_push_back(value, id);
        id
    }

    pub fn remove_use(&mut self, use_id: UseId) {
        let value = self.uses.get(use_id.index()).value;
        self.use_list_remove(value, use_id);
    }

    /// Reseats every use of `old` onto `new`, preserving each user's
    /// operand order (the operand `Vec` itself is untouched — only the
    /// `Use::value` field and the uses-list membership change).
    pub fn replace_all_uses_with(&mut self, old: ValueRef, new: ValueRef) {
        while let Some(use_id) = self.use_list_head(old) {
            self.use_list_remove(old, use_id);
            self.uses.get_mut(use_id.index()).value = new;
            self.use_list_push_back(new, use_id);
        }
        debug_assert!(self.use_list_head(old).is_none());
    }

    pub fn use_list_head(&self, v: ValueRef) -> Option<UseId> {
        match v {
            ValueRef::Argument(a) => self.args.get(a.index()).uses.head,
            ValueRef::Instruction(i) => self.insts.get(i.index()).uses.head,
            ValueRef::Block(b) => self.blocks.get(b.index()).uses.head,
            ValueRef::Function(f) => self.funcs.get(f.index()).uses.head,
            ValueRef::Constant(c) => self.consts.get(c.index()).uses.head,
            ValueRef::Global(g) => self.globals.get(g.index()).uses.head,
        }
    }

    /// True if `v` has at least one user; used by mem2reg promotability
    /// analysis and the verifier.
    pub fn has_uses(&self, v: ValueRef) -> bool {
        self.use_list_head(v).is_some()
    }

    pub fn uses_of(&self, v: ValueRef) -> Vec<UseId> {
        let mut out = Vec::new();
        let mut cur = self.use_list_head(v);
        while let Some(id) = cur {
            out.push(id);
            cur = self.uses.get(id.index()).next;
        }
        out
    }

    fn use_list_remove(&mut self, v: ValueRef, id: UseId) {
        let uses = &mut self.uses;
        match v {
            ValueRef::Argument(a) => self.args.get_mut(a.index()).uses.remove(id, |u| uses.get_mut(u.index())),
            ValueRef::Instruction(i) => self.insts.get_mut(i.index()).uses.remove(id, |u| uses.get_mut(u.index())),
            ValueRef::Block(b) => self.blocks.get_mut(b.index()).uses.remove(id, |u| uses.get_mut(u.index())),
            ValueRef::Function(f) => self.funcs.get_mut(f.index()).uses.remove(id, |u| uses.get_mut(u.index())),
            ValueRef::Constant(c) => self.consts.get_mut(c.index()).uses.remove(id, |u| uses.get_mut(u.index())),
            ValueRef::Global(g) => self.globals.get_mut(g.index()).uses.remove(id, |u| uses.get_mut(u.index())),
        }
    }

    fn use_list_push_back(&mut self, v: ValueRef, id: UseId) {
        let uses = &mut self.uses;
        match v {
            ValueRef::Argument(a) => self.args.get_mut(a.index()).uses.push_back(id, |u| uses.get_mut(u.index())),
            ValueRef::Instruction(i) => self.insts.get_mut(i.index()).uses.push_back(id, |u| uses.get_mut(u.index())),
            ValueRef::Block(b) => self.blocks.get_mut(b.index()).uses.push_back(id, |u| uses.get_mut(u.index())),
            ValueRef::Function(f) => self.funcs.get_mut(f.index()).uses.push_back(id, |u| uses.get_mut(u.index())),
            ValueRef::Constant(c) => self.consts.get_mut(c.index()).uses.push_back(id, |u| uses.get_mut(u.index())),
            ValueRef::Global(g) => self.globals.get_mut(g.index()).uses.push_back(id, |u| uses.get_mut(u.index())),
        }
    }

    // ---- instruction construction / erasure ---------------------------------

    /// Allocates an instruction, attaches it to `block` (at the tail, or at
    /// the head-after-existing-phis when `opcode.is_phi()`), wires up its
    /// operand `Use`s in order, and returns its id. This is the one place
    /// that performs the object-model wiring the spec's Builder contract
    /// describes; `crate::builder::Builder` layers opcode-specific type
    /// validation on top.
    pub fn build_instruction(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        result_ty: Option<TypeId>,
        data: InstData,
        operands: &[ValueRef],
    ) -> InstId {
        let inst_id = InstId::from_usize(self.insts.push(Instruction::new(opcode, block, result_ty, data)));
        if opcode.is_phi() {
            self.insert_at_block_head_after_phis(block, inst_id);
        } else {
            let insts = &mut self.insts;
            self.blocks
                .get_mut(block.index())
                .insts
                .push_back(inst_id, |id| insts.get_mut(id.index()));
        }
        for (i, operand) in operands.iter().enumerate() {
            let use_id = self.add_use(inst_id, i as u32, *operand);
            self.insts.get_mut(inst_id.index()).operands.push(use_id);
        }
        inst_id
    }

    fn insert_at_block_head_after_phis(&mut self, block: BlockId, inst_id: InstId) {
        let mut cursor = self.block(block).first_inst();
        while let Some(id) = cursor {
            if self.inst(id).opcode.is_phi() {
                cursor = self.inst(id).next;
            } else {
                break;
            }
        }
        let insts = &mut self.insts;
        match cursor {
            Some(first_non_phi) => {
                self.blocks.get_mut(block.index()).insts.insert_before(first_non_phi, inst_id, |id| {
                    insts.get_mut(id.index())
                });
            }
            None => {
                self.blocks
                    .get_mut(block.index())
                    .insts
                    .push_back(inst_id, |id| insts.get_mut(id.index()));
            }
        }
    }

    /// Adds an operand to an already-built instruction (used by mem2reg
    /// when wiring up `phi` incoming pairs after the fact, since the set of
    /// predecessors a `phi` needs operands for isn't known until renaming
    /// walks the whole dominator tree).
    pub fn add_operand(&mut self, inst_id: InstId, value: ValueRef) {
        let index = self.inst(inst_id).operands.len() as u32;
        let use_id = self.add_use(inst_id, index, value);
        self.inst_mut(inst_id).operands.push(use_id);
    }

    /// Erases `inst_id`: detaches every operand `Use`, unlinks the
    /// instruction from its block, and asserts it has no remaining users.
    /// Memory is not reclaimed (see module docs) until the whole `Context`
    /// is dropped.
    pub fn erase_instruction(&mut self, inst_id: InstId) {
        assert!(
            !self.has_uses(ValueRef::Instruction(inst_id)),
            "erase_instruction: instruction {inst_id:?} still has users"
        );
        let (block, operand_ids) = {
            let inst = self.inst(inst_id);
            (inst.block, inst.operands.clone())
        };
        for use_id in operand_ids {
            self.remove_use(use_id);
        }
        self.inst_mut(inst_id).operands.clear();
        let insts = &mut self.insts;
        self.blocks
            .get_mut(block.index())
            .insts
            .remove(inst_id, |id| insts.get_mut(id.index()));
    }

    /// Iterates the instructions of `block` in program order. Collects
    /// into a `Vec` first so callers may freely erase/rewrite instructions
    /// while iterating (mutation-safe iteration, per spec §4.2).
    pub fn block_insts(&self, block: BlockId) -> Vec<InstId> {
        let mut out = Vec::new();
        let mut cur = self.block(block).first_inst();
        while let Some(id) = cur {
            out.push(id);
            cur = self.inst(id).next;
        }
        out
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
