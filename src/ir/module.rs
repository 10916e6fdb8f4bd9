//! The top-level container: ordered functions and globals (spec §3).

use crate::ids::{FuncId, GlobalId};

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: Option<String>,
    pub functions: Vec<FuncId>,
    pub globals: Vec<GlobalId>,
}
