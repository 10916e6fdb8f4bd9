//! Tree-walking interpreter (spec §4.10-§4.11): executes a verified
//! function directly against a simulated host memory model, with a
//! pluggable layout for primitive/aggregate size and alignment.

pub mod error;
pub mod host_layout;
pub mod interpreter;
pub mod value;

pub use error::InterpError;
pub use host_layout::{DefaultHostLayout, HostLayout};
pub use interpreter::{ExternFn, Interpreter};
pub use value::{MemPtr, Pointee, Region, RuntimeValue};
