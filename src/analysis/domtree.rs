//! Dominator tree via Lengauer-Tarjan (spec §4.7).
//!
//! Operates on `Cfg` node ids, not `BlockId`s directly, so it stays usable
//! on any subgraph a `Cfg` happens to describe. Unreachable nodes (not
//! visited by the initial DFS) are excluded from every query and simply
//! absent from `idom`.

use crate::analysis::cfg::{Cfg, NodeId};
use crate::ids::BlockId;
use crate::value::ValueRef;

pub struct DomTree {
    /// Indexed by `Cfg` `NodeId`. `None` for unreachable nodes and the
    /// root (the root has no immediate dominator).
    idom: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
    root: NodeId,
    reachable: Vec<bool>,
}

impl DomTree {
    pub fn build(cfg: &Cfg) -> DomTree {
        let n = cfg.len();
        let root = cfg.entry;
        log::trace!("computing dominator tree over {n} cfg nodes");

        // Step 1: DFS numbering from the root.
        let mut dfs_order: Vec<NodeId> = Vec::new(); // dfs number -> node
        let mut dfs_num = vec![0usize; n]; // node -> dfs number (1-based); 0 = unvisited
        let mut parent = vec![None; n]; // node -> dfs parent node
        let mut visited = vec![false; n];
        visited[root] = true;
        dfs_num[root] = 1;
        dfs_order.push(root);
        let mut frontier = vec![root];
        while let Some(node) = frontier.pop() {
            for &succ in &cfg.node(node).successors {
                if !visited[succ] {
                    visited[succ] = true;
                    parent[succ] = Some(node);
                    dfs_num[succ] = dfs_order.len() + 1;
                    dfs_order.push(succ);
                    frontier.push(succ);
                }
            }
        }
        let k = dfs_order.len();

        let mut semi = vec![0usize; n]; // node -> dfs number of its semidominator
        for &node in &dfs_order {
            semi[node] = dfs_num[node];
        }
        let mut ancestor: Vec<Option<NodeId>> = vec![None; n]; // union-find parent
        let mut label = vec![0usize; n]; // node -> node with minimal semi on its path
        for &node in &dfs_order {
            label[node] = node;
        }
        let mut buckets: Vec<Vec<NodeId>> = vec![Vec::new(); n]; // keyed by node whose dfs_num == semi
        let mut idom = vec![None; n];

        // eval(v): ancestor of v with minimal dfs_num(semi[.]) on the
        // union-find forest path, via iterative path compression.
        fn eval(v: NodeId, ancestor: &mut [Option<NodeId>], label: &mut [usize], semi: &[usize]) -> NodeId {
            let mut path = Vec::new();
            let mut cur = v;
            while let Some(a) = ancestor[cur] {
                path.push(cur);
                cur = a;
            }
            // `cur` is now the root of this tree; compress by relabeling
            // every node on `path` to the minimal-semi label found at or
            // below it, walking back down from the root.
            let mut best = cur;
            for &node in path.iter().rev() {
                if semi[label[node]] < semi[label[best]] {
                    best = label[node];
                }
                ancestor[node] = ancestor[cur];
                label[node] = best;
            }
            if path.is_empty() {
                v
            } else {
                label[v]
            }
        }

        // Step 2 + bucket population: decreasing DFS number from k down to 2.
        for i in (2..=k).rev() {
            let w = dfs_order[i - 1];
            for &v in &cfg.node(w).predecessors {
                if !visited[v] {
                    continue;
                }
                let u = eval(v, &mut ancestor, &mut label, &semi);
                if semi[label[u]] < semi[w] {
                    semi[w] = semi[label[u]];
                }
            }
            let semi_dom_node = dfs_order[semi[w] - 1];
            buckets[semi_dom_node].push(w);
            ancestor[w] = parent[w];

            // Step 3: process w's dfs parent's bucket now that w is linked.
            let p = parent[w].expect("non-root node has a dfs parent");
            let bucket = std::mem::take(&mut buckets[p]);
            for v in bucket {
                let u = eval(v, &mut ancestor, &mut label, &semi);
                idom[v] = Some(if semi[label[u]] < semi[v] { u } else { p });
            }
        }

        // Step 4: final pass in increasing DFS order, correcting idom.
        for i in 2..=k {
            let w = dfs_order[i - 1];
            let expected = dfs_order[semi[w] - 1];
            if idom[w] != Some(expected) {
                idom[w] = idom[idom[w].expect("idom set in step 3")];
            }
        }

        let mut children = vec![Vec::new(); n];
        for &node in &dfs_order {
            if let Some(p) = idom[node] {
                children[p].push(node);
            }
        }

        DomTree { idom, children, root, reachable: visited }
    }

    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.reachable[node]
    }

    /// `node`'s immediate dominator, or `None` for the root or an
    /// unreachable node.
    pub fn idom(&self, node: NodeId) -> Option<NodeId> {
        self.idom[node]
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.children[node]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// `a` dominates `b` if `a` lies on `b`'s idom chain (every node
    /// dominates itself).
    pub fn node_dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.reachable[b] {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom[cur] {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    /// Preorder walk of the dominator tree, root first — the traversal
    /// order mem2reg's renaming pass (spec §4.9) recurses in.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            out.push(node);
            for &child in self.children(node).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Postorder walk of the dominator tree (children before parent) — the
    /// order dominance-frontier computation (spec §4.8) needs.
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root, false)];
        while let Some((node, children_done)) = stack.pop() {
            if children_done {
                out.push(node);
            } else {
                stack.push((node, true));
                for &child in self.children(node) {
                    stack.push((child, false));
                }
            }
        }
        out
    }

    /// `dominates(value, block)` per spec §4.7: an instruction must be
    /// dominated by the block it was defined in; constants, arguments,
    /// functions, and globals have no single definition point and so
    /// dominate every block.
    pub fn dominates_value(&self, ctx: &crate::context::Context, cfg: &Cfg, value: ValueRef, block: BlockId) -> bool {
        match value {
            ValueRef::Instruction(inst) => {
                let def_block = ctx.inst(inst).block;
                self.node_dominates(cfg.node_of(def_block), cfg.node_of(block))
            }
            ValueRef::Block(def_block) => self.node_dominates(cfg.node_of(def_block), cfg.node_of(block)),
            ValueRef::Argument(_) | ValueRef::Constant(_) | ValueRef::Function(_) | ValueRef::Global(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::Cfg;
    use crate::builder::Builder;
    use crate::context::Context;
    use crate::value::ValueRef;

    fn build_diamond(ctx: &mut Context) -> (crate::ids::FuncId, [BlockId; 4]) {
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
    fn diamond_merge_block_is_dominated_only_by_entry() {
        let mut ctx = Context::new();
        let (f, [entry, then_bb, else_bb, merge]) = build_diamond(&mut ctx);
        let cfg = Cfg::build(&ctx, f);
        let dt = DomTree::build(&cfg);

        let entry_n = cfg.node_of(entry);
        let merge_n = cfg.node_of(merge);
        assert_eq!(dt.idom(merge_n), Some(entry_n));
        assert!(dt.node_dominates(entry_n, merge_n));
        assert!(!dt.node_dominates(cfg.node_of(then_bb), merge_n));
        assert!(!dt.node_dominates(cfg.node_of(else_bb), merge_n));
    }

    #[test]
    fn root_has_no_immediate_dominator() {
        let mut ctx = Context::new();
        let (f, [entry, ..]) = build_diamond(&mut ctx);
        let cfg = Cfg::build(&ctx, f);
        let dt = DomTree::build(&cfg);
        assert_eq!(dt.idom(cfg.node_of(entry)), None);
    }

    #[test]
    fn loop_header_dominates_its_own_body_and_itself() {
        // entry -> header; header -cond-> body, exit; body -> header.
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

        let cfg = Cfg::build(&ctx, f);
        let dt = DomTree::build(&cfg);
        let header_n = cfg.node_of(header);
        let body_n = cfg.node_of(body);
        assert!(dt.node_dominates(header_n, body_n));
        assert!(dt.node_dominates(header_n, header_n));
        assert_eq!(dt.idom(body_n), Some(header_n));
        assert_eq!(dt.idom(cfg.node_of(exit)), Some(header_n));
    }
}
