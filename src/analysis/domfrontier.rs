//! Dominance frontiers (spec §4.8).
//!
//! `DF(B) = DF_local(B) ∪ ⋃_{C ∈ children(B)} DF_up(C, B)`, computed by a
//! single postorder walk of the dominator tree. Each `DF(B)` is a bitset
//! over the CFG's dense node ids (`Vec<bool>`); a scratch buffer would
//! only save allocations the arena-per-function scale here doesn't need.

use crate::analysis::cfg::{Cfg, NodeId};
use crate::analysis::domtree::DomTree;

pub struct DominanceFrontier {
    /// `frontier[b]` is the set of node ids in `DF(b)`, as a bitset sized
    /// to the CFG's node count.
    frontier: Vec<Vec<bool>>,
}

impl DominanceFrontier {
    pub fn build(cfg: &Cfg, dt: &DomTree) -> DominanceFrontier {
        let n = cfg.len();
        let mut frontier = vec![vec![false; n]; n];

        for &b in &dt.postorder() {
            if !dt.is_reachable(b) {
                continue;
            }
            // DF_local(b): successors not strictly dominated by b.
            for &succ in &cfg.node(b).successors {
                if dt.idom(succ) != Some(b) {
                    frontier[b][succ] = true;
                }
            }
            // DF_up(c, b) for each dominator-tree child c of b.
            for &c in dt.children(b) {
                for w in 0..n {
                    if frontier[c][w] && dt.idom(w) != Some(b) {
                        frontier[b][w] = true;
                    }
                }
            }
        }

        DominanceFrontier { frontier }
    }

    pub fn of(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.frontier[node].iter().enumerate().filter_map(|(i, &set)| set.then_some(i))
    }

    pub fn contains(&self, block: NodeId, frontier_of: NodeId) -> bool {
        self.frontier[block][frontier_of]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::context::Context;
    use crate::value::ValueRef;

    #[test]
    fn diamond_branches_have_merge_in_their_frontier() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i1_ty = ctx.i1_ty;
        let void_ty = ctx.void_ty;
        let f = ctx.new_function(m, name, void_ty, &[i1_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let then_bb = ctx.append_block(f, None);
        let else_bb = ctx.append_block(f, None);
        let merge = ctx.append_block(f, None);
        let cond = ValueRef::Argument(ctx.func(f).args[0]);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        b.build_cond_br(cond, then_bb, else_bb);
        b.set_insertion_point(then_bb);
        b.build_br(merge);
        b.set_insertion_point(else_bb);
        b.build_br(merge);
        b.set_insertion_point(merge);
        b.build_ret(None);

        let cfg = crate::analysis::cfg::Cfg::build(&ctx, f);
        let dt = DomTree::build(&cfg);
        let df = DominanceFrontier::build(&cfg, &dt);

        let merge_n = cfg.node_of(merge);
        assert!(df.contains(cfg.node_of(then_bb), merge_n));
        assert!(df.contains(cfg.node_of(else_bb), merge_n));
        assert!(!df.contains(cfg.node_of(entry), merge_n));
        assert_eq!(df.of(cfg.node_of(then_bb)).collect::<Vec<_>>(), vec![merge_n]);
    }

    #[test]
    fn loop_header_is_in_its_own_frontier() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("loop");
        let i1_ty = ctx.i1_ty;
        let void_ty = ctx.void_ty;
        let f = ctx.new_function(m, name, void_ty, &[i1_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let header = ctx.append_block(f, None);
        let body = ctx.append_block(f, None);
        let exit = ctx.append_block(f, None);
        let cond = ValueRef::Argument(ctx.func(f).args[0]);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        b.build_br(header);
        b.set_insertion_point(header);
        b.build_cond_br(cond, body, exit);
        b.set_insertion_point(body);
        b.build_br(header);
        b.set_insertion_point(exit);
        b.build_ret(None);

        let cfg = crate::analysis::cfg::Cfg::build(&ctx, f);
        let dt = DomTree::build(&cfg);
        let df = DominanceFrontier::build(&cfg, &dt);
        let header_n = cfg.node_of(header);
        let body_n = cfg.node_of(body);
        assert!(df.contains(body_n, header_n));
    }
}
