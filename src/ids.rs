//! Index newtypes addressing objects owned by a [`crate::context::Context`].
//!
//! Every long-lived IR object is stored in a [`crate::arena::ObjArena`] and
//! referred to by one of these instead of a pointer or `Rc` — see the
//! "Cyclic references" design note. They are only meaningful relative to
//! the `Context` that produced them; indices from two different contexts
//! must never be mixed.

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub(crate) fn from_usize(i: usize) -> Self {
                $name(i as u32)
            }

            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(TypeId, "Handle to an interned `Type`.");
define_id!(ConstId, "Handle to an interned `Constant`.");
define_id!(InstId, "Handle to an `Instruction`.");
define_id!(BlockId, "Handle to a `BasicBlock`.");
define_id!(FuncId, "Handle to a `Function`.");
define_id!(ModuleId, "Handle to a `Module`.");
define_id!(ArgId, "Handle to an `Argument`.");
define_id!(GlobalId, "Handle to a `GlobalVariable`.");
define_id!(UseId, "Handle to a `Use` def-use edge.");
define_id!(Sym, "Handle to an interned string.");
