//! Functions and their arguments (spec §3).

use crate::ids::{ArgId, BlockId, FuncId, ModuleId, Sym, TypeId};
use crate::value::UseList;

#[derive(Debug, Clone)]
pub struct Argument {
    pub ty: TypeId,
    pub name: Option<Sym>,
    pub func: FuncId,
    pub index: u32,
    pub uses: UseList,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Sym,
    pub module: ModuleId,
    pub ret_ty: TypeId,
    /// The finalized function type (`Type::Function`), set once all
    /// arguments are declared; spec.md §3 calls this out explicitly
    /// because a `Builder` may still be appending arguments when the
    /// function object is first created.
    pub fn_ty: TypeId,
    pub args: Vec<ArgId>,
    /// First block is the entry block.
    pub blocks: Vec<BlockId>,
    pub is_declaration: bool,
    pub uses: UseList,
}

impl Function {
    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}
