//! Runtime values (spec §4.10): the tagged union the interpreter actually
//! computes with, as opposed to [`crate::value::ValueRef`], which names an
//! IR value rather than holding one.
//!
//! Pointers need their own shape here. [`crate::arena::ByteArena`] hands
//! out `(chunk, offset)` handles rather than flat addresses, so a runtime
//! pointer is a [`Pointee`] naming which backing store it addresses
//! (a live call frame's stack, global storage, a function) plus a byte
//! offset within it — never a bare `usize`. `ptrtoint`/`inttoptr` still
//! need integers that round-trip, so the interpreter keeps a side table
//! mapping fabricated addresses to `Pointee`s (see `Interpreter::address_of`).

use crate::ids::FuncId;
use crate::types::IntWidth;

/// Which arena a [`MemPtr`] indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// A live call's stack arena, identified by its depth in
    /// `Interpreter::frames` at the time the pointer was created.
    Frame(usize),
    /// The interpreter-wide global-variable storage.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemPtr {
    pub region: Region,
    pub chunk: usize,
    pub offset: usize,
}

/// What a pointer-typed runtime value addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pointee {
    Mem(MemPtr),
    Function(FuncId),
    /// An address with no backing allocation: the result of `inttoptr` on
    /// an address this run never handed out (including the null pointer,
    /// `Raw(0)`). Dereferencing one is `InvalidPointer`.
    Raw(u64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeValue {
    Undef,
    I1(bool),
    I8(u8),
    I16(u16),
    I32(u32),
    I64(u64),
    F32(f32),
    F64(f64),
    Ptr(Pointee),
}

impl RuntimeValue {
    /// View as a zero-extended 64-bit unsigned integer.
    pub fn as_unsigned(&self) -> u64 {
        match *self {
            RuntimeValue::I1(b) => b as u64,
            RuntimeValue::I8(v) => v as u64,
            RuntimeValue::I16(v) => v as u64,
            RuntimeValue::I32(v) => v as u64,
            RuntimeValue::I64(v) => v,
            other => panic!("as_unsigned on a non-integer runtime value: {other:?}"),
        }
    }

    /// View as a sign-extended 64-bit signed integer.
    pub fn as_signed(&self) -> i64 {
        match *self {
            RuntimeValue::I1(b) => b as i64,
            RuntimeValue::I8(v) => v as i8 as i64,
            RuntimeValue::I16(v) => v as i16 as i64,
            RuntimeValue::I32(v) => v as i32 as i64,
            RuntimeValue::I64(v) => v as i64,
            other => panic!("as_signed on a non-integer runtime value: {other:?}"),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            RuntimeValue::F32(v) => v as f64,
            RuntimeValue::F64(v) => v,
            other => panic!("as_f64 on a non-float runtime value: {other:?}"),
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            RuntimeValue::I1(b) => b,
            other => panic!("as_bool on a non-i1 runtime value: {other:?}"),
        }
    }

    pub fn as_ptr(&self) -> Pointee {
        match *self {
            RuntimeValue::Ptr(p) => p,
            other => panic!("as_ptr on a non-pointer runtime value: {other:?}"),
        }
    }

    /// Bit pattern, zero-extended to 64 bits; `bitcast`'s only notion of
    /// "same value, different type tag".
    pub fn raw_bits(&self) -> u64 {
        match *self {
            RuntimeValue::Undef => 0,
            RuntimeValue::F32(v) => v.to_bits() as u64,
            RuntimeValue::F64(v) => v.to_bits(),
            RuntimeValue::Ptr(_) => panic!("raw_bits on a pointer runtime value"),
            other => other.as_unsigned(),
        }
    }

    /// Masks `bits` down to `width` and wraps it in the matching variant.
    pub fn from_unsigned(width: IntWidth, bits: u64) -> RuntimeValue {
        let v = bits & width.mask();
        match width {
            IntWidth::I1 => RuntimeValue::I1(v != 0),
            IntWidth::I8 => RuntimeValue::I8(v as u8),
            IntWidth::I16 => RuntimeValue::I16(v as u16),
            IntWidth::I32 => RuntimeValue::I32(v as u32),
            IntWidth::I64 => RuntimeValue::I64(v),
        }
    }

    pub fn from_signed(width: IntWidth, bits: i64) -> RuntimeValue {
        RuntimeValue::from_unsigned(width, bits as u64)
    }

    /// Number of bytes this value occupies in host memory.
    pub fn byte_len(&self) -> usize {
        match self {
            RuntimeValue::Undef => 0,
            RuntimeValue::I1(_) | RuntimeValue::I8(_) => 1,
            RuntimeValue::I16(_) => 2,
            RuntimeValue::I32(_) | RuntimeValue::F32(_) => 4,
            RuntimeValue::I64(_) | RuntimeValue::F64(_) => 8,
            RuntimeValue::Ptr(_) => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_unsigned_masks_to_width() {
        assert_eq!(RuntimeValue::from_unsigned(IntWidth::I8, 0x1ff), RuntimeValue::I8(0xff));
        assert_eq!(RuntimeValue::from_unsigned(IntWidth::I1, 2), RuntimeValue::I1(false));
    }

    #[test]
    fn as_signed_sign_extends_from_stored_width() {
        let v = RuntimeValue::I8(0xff);
        assert_eq!(v.as_signed(), -1);
        assert_eq!(v.as_unsigned(), 0xff);
    }

    #[test]
    fn raw_bits_round_trips_float_bit_pattern() {
        let v = RuntimeValue::F32(1.5);
        assert_eq!(f32::from_bits(v.raw_bits() as u32), 1.5);
    }
}
