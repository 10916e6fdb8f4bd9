//! Basic blocks: an ordered instruction list plus the invariants that make
//! it well-formed SSA (spec §3: terminator last, `phi`s first).

use crate::ids::{FuncId, InstId, Sym};
use crate::list::List;
use crate::value::UseList;

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub name: Option<Sym>,
    pub func: FuncId,
    pub(crate) insts: List<InstId>,
    pub uses: UseList,
}

impl BasicBlock {
    pub(crate) fn new(func: FuncId, name: Option<Sym>) -> Self {
        BasicBlock {
            name,
            func,
            insts: List::new(),
            uses: UseList::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn first_inst(&self) -> Option<InstId> {
        self.insts.head
    }

    pub fn last_inst(&self) -> Option<InstId> {
        self.insts.tail
    }
}
