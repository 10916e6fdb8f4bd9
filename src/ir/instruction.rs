//! Instructions: opcodes, opcode-specific immediate data, and the
//! instruction record itself (spec §4.5).

use smallvec::SmallVec;

use crate::ids::{BlockId, InstId, Sym, TypeId, UseId};
use crate::list::ListNode;
use crate::value::UseList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ICmpPred {
    Eq,
    Ne,
    Sgt,
    Sge,
    Slt,
    Sle,
    Ugt,
    Uge,
    Ult,
    Ule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FCmpPred {
    Oeq,
    One,
    Ogt,
    Oge,
    Olt,
    Ole,
    Ord,
    Ueq,
    Une,
    Ugt,
    Uge,
    Ult,
    Ule,
    Uno,
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Terminators
    Ret,
    Br,
    CondBr,
    Switch,
    // Integer arithmetic
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    // Floating point arithmetic
    FAdd,
    FSub,
    FMul,
    FDiv,
    // Comparisons
    ICmp,
    FCmp,
    // Casts
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    PtrToInt,
    IntToPtr,
    BitCast,
    // Memory
    Alloca,
    Load,
    Store,
    Gep,
    // Dataflow
    Phi,
    Select,
    Call,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Ret | Opcode::Br | Opcode::CondBr | Opcode::Switch)
    }

    pub fn is_phi(self) -> bool {
        matches!(self, Opcode::Phi)
    }

    /// Opcodes whose result is non-`void` (they define an SSA value).
    pub fn has_result(self) -> bool {
        !matches!(self, Opcode::Ret | Opcode::Br | Opcode::CondBr | Opcode::Switch | Opcode::Store)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Ret => "ret",
            Opcode::Br => "br",
            Opcode::CondBr => "cond_br",
            Opcode::Switch => "switch",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::UDiv => "udiv",
            Opcode::SDiv => "sdiv",
            Opcode::URem => "urem",
            Opcode::SRem => "srem",
            Opcode::Shl => "shl",
            Opcode::LShr => "lshr",
            Opcode::AShr => "ashr",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FDiv => "fdiv",
            Opcode::ICmp => "icmp",
            Opcode::FCmp => "fcmp",
            Opcode::Trunc => "trunc",
            Opcode::ZExt => "zext",
            Opcode::SExt => "sext",
            Opcode::FpTrunc => "fptrunc",
            Opcode::FpExt => "fpext",
            Opcode::FpToUi => "fptoui",
            Opcode::FpToSi => "fptosi",
            Opcode::UiToFp => "uitofp",
            Opcode::SiToFp => "sitofp",
            Opcode::PtrToInt => "ptrtoint",
            Opcode::IntToPtr => "inttoptr",
            Opcode::BitCast => "bitcast",
            Opcode::Alloca => "alloca",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Gep => "gep",
            Opcode::Phi => "phi",
            Opcode::Select => "select",
            Opcode::Call => "call",
        }
    }
}

/// Opcode-specific immediate data that doesn't fit the generic operand
/// list. Switch case constants/targets and phi incoming pairs are *not*
/// here — spec.md calls those out as "embedded in the operand list", so
/// they are real operands (see `Instruction::switch_cases`/`phi_incoming`)
/// and participate in the def-use graph like any other operand.
#[derive(Debug, Clone)]
pub enum InstData {
    None,
    ICmp(ICmpPred),
    FCmp(FCmpPred),
    /// The allocated (pointee) type; the instruction's own `result_ty` is
    /// `Pointer(ty)`.
    Alloca(TypeId),
    Gep { source_ty: TypeId, inbounds: bool },
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Most opcodes have 0-4 operands (binops: 2, gep: base + a couple of
    /// indices); phi and switch are the only opcodes that routinely grow
    /// past that, and they spill onto the heap like any `SmallVec`.
    pub operands: SmallVec<[UseId; 4]>,
    /// `None` for void-producing opcodes (`ret`, `br`, `cond_br`, `switch`,
    /// `store`); `Some(ty)` otherwise — a non-void instruction is, per
    /// spec.md §3, a single unique SSA definition of type `ty`.
    pub result_ty: Option<TypeId>,
    pub name: Option<Sym>,
    pub block: BlockId,
    pub(crate) prev: Option<InstId>,
    pub(crate) next: Option<InstId>,
    pub uses: UseList,
    pub data: InstData,
}

impl Instruction {
    pub(crate) fn new(opcode: Opcode, block: BlockId, result_ty: Option<TypeId>, data: InstData) -> Self {
        Instruction {
            opcode,
            operands: SmallVec::new(),
            result_ty,
            name: None,
            block,
            prev: None,
            next: None,
            uses: UseList::default(),
            data,
        }
    }

    /// For `br`/`cond_br`/`switch`, the default/unconditional target is
    /// always operand 1 (cond_br, switch) or operand 0 (br). Callers that
    /// need the decoded successor set should go through
    /// `crate::analysis::cfg` instead of re-deriving this ad hoc.
    pub fn icmp_pred(&self) -> ICmpPred {
        match self.data {
            InstData::ICmp(p) => p,
            _ => panic!("icmp_pred called on non-icmp instruction"),
        }
    }

    pub fn fcmp_pred(&self) -> FCmpPred {
        match self.data {
            InstData::FCmp(p) => p,
            _ => panic!("fcmp_pred called on non-fcmp instruction"),
        }
    }

    pub fn alloca_ty(&self) -> TypeId {
        match self.data {
            InstData::Alloca(ty) => ty,
            _ => panic!("alloca_ty called on non-alloca instruction"),
        }
    }

    pub fn gep_source_ty(&self) -> TypeId {
        match self.data {
            InstData::Gep { source_ty, .. } => source_ty,
            _ => panic!("gep_source_ty called on non-gep instruction"),
        }
    }

    pub fn gep_inbounds(&self) -> bool {
        match self.data {
            InstData::Gep { inbounds, .. } => inbounds,
            _ => panic!("gep_inbounds called on non-gep instruction"),
        }
    }

    /// Number of `(value, block)` pairs for a `phi`.
    pub fn phi_incoming_count(&self) -> usize {
        debug_assert!(self.opcode.is_phi());
        self.operands.len() / 2
    }
}

impl ListNode for Instruction {
    type Id = InstId;

    fn prev(&self) -> Option<InstId> {
        self.prev
    }

    fn next(&self) -> Option<InstId> {
        self.next
    }

    fn set_prev(&mut self, id: Option<InstId>) {
        self.prev = id;
    }

    fn set_next(&mut self, id: Option<InstId>) {
        self.next = id;
    }
}
