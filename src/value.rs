//! `Value` as a tagged sum, and the def-use edge (`Use`) that connects a
//! user instruction's operand slot to the value it reads.
//!
//! The source models `Value` as a polymorphic base struct that every SSA
//! entity embeds and downcasts out of via `container_of`. Per the
//! "Polymorphic base with sub-kinds" design note, this crate makes the
//! variant explicit instead: [`ValueRef`] is a sum type over the six kinds
//! spec.md §3 lists, so there is no cast to get wrong.

use crate::ids::{ArgId, BlockId, ConstId, FuncId, GlobalId, InstId, UseId};
use crate::list::ListNode;

/// Any entity that can be an operand. Copy because it is just a tagged
/// index — the payload lives in whichever `Context` arena the variant
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    Argument(ArgId),
    Instruction(InstId),
    Block(BlockId),
    Function(FuncId),
    Constant(ConstId),
    Global(GlobalId),
}

impl ValueRef {
    pub fn as_instruction(self) -> Option<InstId> {
        match self {
            ValueRef::Instruction(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_block(self) -> Option<BlockId> {
        match self {
            ValueRef::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_constant(self) -> Option<ConstId> {
        match self {
            ValueRef::Constant(c) => Some(c),
            _ => None,
        }
    }
}

/// The uses list of a value: every value-bearing struct (`Instruction`,
/// `Argument`, `BasicBlock`, `Function`, `GlobalVariable`, `Constant`)
/// embeds one of these as its `uses` field. It is unordered — callers
/// must not read anything into the relative order of two `Use`s on the
/// same list — but still needs head *and* tail to support O(1)
/// `push_back`/`remove` via `crate::list::List`.
pub type UseList = crate::list::List<UseId>;

/// A def-use edge: `user`'s operand number `operand_index` reads `value`.
///
/// Lives in its own arena (`Context::uses`) rather than inline in the
/// user's operand `Vec`, because [`crate::context::Context::replace_all_uses_with`]
/// needs to relink a `Use` onto a *different* value's uses list without
/// touching the operand list it belongs to — exactly the split the spec
/// draws between "one node on the user's operand list (ordered)" and "one
/// node on the value's uses list (unordered)". The ordered side is instead
/// represented directly by `Instruction::operands: Vec<UseId>`, since
/// operand order is fixed at construction and never needs list surgery;
/// only the uses-list side needs true intrusive linking. See DESIGN.md.
#[derive(Debug, Clone, Copy)]
pub struct Use {
    pub user: InstId,
    pub operand_index: u32,
    pub value: ValueRef,
    pub(crate) prev: Option<UseId>,
    pub(crate) next: Option<UseId>,
}

impl Use {
    pub(crate) fn new(user: InstId, operand_index: u32, value: ValueRef) -> Self {
        Use {
            user,
            operand_index,
            value,
            prev: None,
            next: None,
        }
    }
}

impl ListNode for Use {
    type Id = UseId;

    fn prev(&self) -> Option<UseId> {
        self.prev
    }

    fn next(&self) -> Option<UseId> {
        self.next
    }

    fn set_prev(&mut self, id: Option<UseId>) {
        self.prev = id;
    }

    fn set_next(&mut self, id: Option<UseId>) {
        self.next = id;
    }
}
