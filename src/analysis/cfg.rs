//! Control-flow graph construction (spec §4.6).
//!
//! Two passes over a function's ordered blocks: first assign every block a
//! dense id `0..N`, then read each block's terminator and thread
//! `CfgEdge`s onto the source's successors and the target's predecessors.
//! The whole graph is owned by the returned `Cfg` — nothing here touches
//! the `Context`'s own arenas.

use std::collections::HashMap;

use crate::context::Context;
use crate::ids::{BlockId, FuncId};
use crate::ir::instruction::Opcode;

/// Dense index into `Cfg::nodes`. Distinct from `BlockId`: a `BlockId`
/// addresses the `Context`'s block arena across the whole module, a
/// `NodeId` addresses one function's CFG.
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub block: BlockId,
    pub successors: Vec<NodeId>,
    pub predecessors: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub nodes: Vec<CfgNode>,
    pub block_to_node: HashMap<BlockId, NodeId>,
    pub entry: NodeId,
}

impl Cfg {
    pub fn build(ctx: &Context, func: FuncId) -> Cfg {
        let blocks = &ctx.func(func).blocks;
        log::trace!("building cfg for {} ({} blocks)", ctx.resolve(ctx.func(func).name), blocks.len());
        let mut block_to_node = HashMap::with_capacity(blocks.len());
        let mut nodes = Vec::with_capacity(blocks.len());
        for (i, &block) in blocks.iter().enumerate() {
            block_to_node.insert(block, i);
            nodes.push(CfgNode { block, successors: Vec::new(), predecessors: Vec::new() });
        }

        for (i, &block) in blocks.iter().enumerate() {
            for target in Self::successor_blocks(ctx, block) {
                let j = block_to_node[&target];
                if !nodes[i].successors.contains(&j) {
                    nodes[i].successors.push(j);
                }
                if !nodes[j].predecessors.contains(&i) {
                    nodes[j].predecessors.push(i);
                }
            }
        }

        Cfg { nodes, block_to_node, entry: 0 }
    }

    /// The terminator-derived successor set of `block`, deduplicated but
    /// otherwise in terminator order (default/condition targets first).
    fn successor_blocks(ctx: &Context, block: BlockId) -> Vec<BlockId> {
        let term = ctx.block(block).last_inst().expect("block has no terminator");
        let inst = ctx.inst(term);
        match inst.opcode {
            Opcode::Ret => Vec::new(),
            Opcode::Br => {
                let target = ctx.operand_value(term, 0).as_block().expect("br target must be a block");
                vec![target]
            }
            Opcode::CondBr => {
                let then_bb = ctx.operand_value(term, 1).as_block().expect("cond_br then-target");
                let else_bb = ctx.operand_value(term, 2).as_block().expect("cond_br else-target");
                if then_bb == else_bb {
                    vec![then_bb]
                } else {
                    vec![then_bb, else_bb]
                }
            }
            Opcode::Switch => {
                let mut targets = vec![ctx.switch_default(term)];
                for (_, target) in ctx.switch_cases(term) {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
                targets
            }
            other => panic!("block does not end in a terminator (found {})", other.mnemonic()),
        }
    }

    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id]
    }

    pub fn node_of(&self, block: BlockId) -> NodeId {
        self.block_to_node[&block]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::value::ValueRef;

    /// `entry: cond_br %c, then, else`; `then`/`else` both `br merge`;
    /// `merge: ret`. Classic diamond, used across the dominator-tree and
    /// dominance-frontier tests too.
    fn build_diamond(ctx: &mut Context) -> (FuncId, [BlockId; 4]) {
        let m = ctx.new_module(Some("t".into()));
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let i1_ty = ctx.i1_ty;
        let f = ctx.new_function(m, name, i32_ty, &[i1_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let then_bb = ctx.append_block(f, None);
        let else_bb = ctx.append_block(f, None);
        let merge = ctx.append_block(f, None);

        let cond = ValueRef::Argument(ctx.func(f).args[0]);
        let mut b = Builder::new(ctx);
        b.set_insertion_point(entry);
        b.build_cond_br(cond, then_bb, else_bb);
        b.set_insertion_point(then_bb);
        b.build_br(merge);
        b.set_insertion_point(else_bb);
        b.build_br(merge);
        b.set_insertion_point(merge);
        b.build_ret(None);

        (f, [entry, then_bb, else_bb, merge])
    }

    #[test]
    fn diamond_cfg_has_expected_edges() {
        let mut ctx = Context::new();
        let (f, [entry, then_bb, else_bb, merge]) = build_diamond(&mut ctx);
        let cfg = Cfg::build(&ctx, f);
        assert_eq!(cfg.len(), 4);

        let entry_node = cfg.node_of(entry);
        let mut succs: Vec<_> = cfg.node(entry_node).successors.iter().map(|&n| cfg.node(n).block).collect();
        succs.sort_by_key(|b| b.index());
        let mut expected = vec![then_bb, else_bb];
        expected.sort_by_key(|b| b.index());
        assert_eq!(succs, expected);

        let merge_node = cfg.node_of(merge);
        assert_eq!(cfg.node(merge_node).predecessors.len(), 2);
        assert!(cfg.node(cfg.node_of(then_bb)).successors == vec![merge_node]);
        assert!(cfg.node(cfg.node_of(else_bb)).successors == vec![merge_node]);
    }

    #[test]
    fn cond_br_with_identical_targets_dedups_to_one_edge() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("g");
        let i1_ty = ctx.i1_ty;
        let void_ty = ctx.void_ty;
        let f = ctx.new_function(m, name, void_ty, &[i1_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let exit = ctx.append_block(f, None);
        let cond = ValueRef::Argument(ctx.func(f).args[0]);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        b.build_cond_br(cond, exit, exit);
        b.set_insertion_point(exit);
        b.build_ret(None);

        let cfg = Cfg::build(&ctx, f);
        let entry_node = cfg.node_of(entry);
        assert_eq!(cfg.node(entry_node).successors.len(), 1);
    }
}
