//! The interned type system (spec §3, §4.3).
//!
//! Every `Type` a `Context` hands out is interned: structural equality
//! implies pointer (here, [`TypeId`]) equality, and vice versa. Named
//! structs are the one kind keyed by identity rather than structure —
//! redefining `%foo` with a different body is a contract violation, not a
//! second type.

use crate::ids::{Sym, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I1,
    I8,
    I16,
    I32,
    I64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::I1 => 1,
            IntWidth::I8 => 8,
            IntWidth::I16 => 16,
            IntWidth::I32 => 32,
            IntWidth::I64 => 64,
        }
    }

    /// Mask selecting the low `bits()` bits of a 64-bit word.
    pub fn mask(self) -> u64 {
        if self.bits() == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits()) - 1
        }
    }

    pub fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

/// A type's structural shape. Interned by `Context` into [`TypeId`]s; never
/// constructed directly by callers outside `context.rs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(IntWidth),
    Float(FloatWidth),
    /// The pseudo-type of basic-block values. Never a legal operand type
    /// for arithmetic; only `br`/`cond_br`/`switch`/`phi` targets and `phi`
    /// predecessor operands carry it.
    Label,
    Pointer(TypeId),
    Array(TypeId, u64),
    /// Anonymous struct, interned by member list.
    AnonStruct(Vec<TypeId>),
    /// Named struct, interned by name. `members` is `None` until the body
    /// is set by `Context::define_named_struct`, so a named struct type id
    /// can be minted before its body is known (forward references through
    /// a pointer).
    NamedStruct { name: Sym, members: Option<Vec<TypeId>> },
    Function {
        ret: TypeId,
        params: Vec<TypeId>,
        is_variadic: bool,
    },
}

impl Type {
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array(..) | Type::AnonStruct(_) | Type::NamedStruct { .. })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn as_int_width(&self) -> Option<IntWidth> {
        match self {
            Type::Int(w) => Some(*w),
            _ => None,
        }
    }
}
