//! Per-function analyses derived from the object model: CFG, dominator
//! tree, dominance frontier (spec §4.6-§4.8). Each analysis is an
//! independent, arena-owned snapshot computed from a `Context` + `FuncId`;
//! none of them mutate the IR.

pub mod cfg;
pub mod domfrontier;
pub mod domtree;

pub use cfg::Cfg;
pub use domfrontier::DominanceFrontier;
pub use domtree::DomTree;
