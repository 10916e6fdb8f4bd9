//! Module-scope global variables (spec §3).

use crate::ids::{ConstId, ModuleId, Sym, TypeId};
use crate::value::UseList;

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: Sym,
    pub module: ModuleId,
    /// The allocated (pointee) type; the global's own value type is
    /// `Pointer(allocated_ty)`.
    pub allocated_ty: TypeId,
    pub ptr_ty: TypeId,
    /// Must be structurally typed to `allocated_ty` when present.
    pub init: Option<ConstId>,
    pub uses: UseList,
}
