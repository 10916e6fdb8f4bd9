//! Interpreter error kinds (spec §4.10).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpError {
    #[error("signed division by zero")]
    DivByZeroSigned,
    #[error("unsigned division by zero")]
    DivByZeroUnsigned,
    #[error("floating point division by zero")]
    DivByZeroFloat,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid pointer dereference")]
    InvalidPointer,
    /// A `call` reached a declaration with no registered extern — distinct
    /// from `InvalidPointer`, which is reserved for pointer faults.
    #[error("call to unlinked external function `{0}`")]
    UnlinkedExternal(String),
}
