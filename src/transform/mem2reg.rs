//! mem2reg: promotes non-aggregate allocas whose only uses are loads and
//! pointer-operand stores into SSA values via iterated-dominance-frontier
//! phi placement (spec §4.9).

use std::collections::{HashMap, HashSet};

use crate::analysis::cfg::{Cfg, NodeId};
use crate::analysis::domfrontier::DominanceFrontier;
use crate::analysis::domtree::DomTree;
use crate::builder::Builder;
use crate::context::Context;
use crate::ids::{ArgId, BlockId, FuncId, InstId};
use crate::ir::instruction::Opcode;
use crate::value::ValueRef;

/// Runs mem2reg with every promoted alloca's stack bottom set to `undef`.
/// Returns whether any alloca was promoted.
pub fn promote_allocas(ctx: &mut Context, func: FuncId) -> bool {
    promote_allocas_with_params(ctx, func, &[])
}

/// Like `promote_allocas`, but for each `(alloca, arg)` pair in
/// `param_locals` the promoted value's stack starts at `arg`'s value
/// instead of `undef` — for front-ends (mirroring this crate's own
/// `Lowerer`) that `alloca` + `store` every parameter into a local slot in
/// the entry block before handing the function to mem2reg.
pub fn promote_allocas_with_params(ctx: &mut Context, func: FuncId, param_locals: &[(InstId, ArgId)]) -> bool {
    let entry = ctx.func(func).entry_block().expect("function has no blocks");
    let allocas = find_promotable_allocas(ctx, entry);
    if allocas.is_empty() {
        log::debug!("mem2reg: no promotable allocas in {}", ctx.resolve(ctx.func(func).name));
        return false;
    }
    log::debug!("mem2reg: promoting {} alloca(s) in {}", allocas.len(), ctx.resolve(ctx.func(func).name));
    let alloca_set: HashSet<InstId> = allocas.iter().copied().collect();

    let cfg = Cfg::build(ctx, func);
    let dt = DomTree::build(&cfg);
    let df = DominanceFrontier::build(&cfg, &dt);

    // φ placement: iterated dominance frontier of each alloca's store set.
    let mut phi_blocks: HashMap<InstId, HashSet<NodeId>> = HashMap::new();
    for &alloca in &allocas {
        let stores = collect_store_blocks(ctx, &cfg, alloca);
        phi_blocks.insert(alloca, iterated_dominance_frontier(&df, stores));
    }

    // Insertion: one empty phi per (alloca, marked block).
    let mut block_phis: HashMap<NodeId, Vec<(InstId, InstId)>> = HashMap::new();
    let mut phi_to_alloca: HashMap<InstId, InstId> = HashMap::new();
    for &alloca in &allocas {
        let ty = ctx.inst(alloca).alloca_ty();
        for &node in &phi_blocks[&alloca] {
            let block = cfg.node(node).block;
            let mut b = Builder::new(ctx);
            b.set_insertion_point(block);
            let phi = b.build_phi(ty, None);
            phi_to_alloca.insert(phi, alloca);
            block_phis.entry(node).or_default().push((alloca, phi));
        }
    }

    // Renaming: pre-order dominator-tree walk with a per-alloca value stack.
    let mut stacks: HashMap<InstId, Vec<ValueRef>> = HashMap::new();
    for &alloca in &allocas {
        let ty = ctx.inst(alloca).alloca_ty();
        let bottom = param_locals
            .iter()
            .find(|(a, _)| *a == alloca)
            .map(|&(_, arg)| ValueRef::Argument(arg))
            .unwrap_or_else(|| ValueRef::Constant(ctx.const_undef(ty)));
        stacks.insert(alloca, vec![bottom]);
    }
    let mut to_delete = Vec::new();
    rename_block(ctx, &cfg, &dt, &alloca_set, &block_phis, &phi_to_alloca, &mut stacks, &mut to_delete, dt.root());

    for inst in to_delete {
        ctx.erase_instruction(inst);
    }
    for alloca in allocas {
        ctx.erase_instruction(alloca);
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn rename_block(
    ctx: &mut Context,
    cfg: &Cfg,
    dt: &DomTree,
    allocas: &HashSet<InstId>,
    block_phis: &HashMap<NodeId, Vec<(InstId, InstId)>>,
    phi_to_alloca: &HashMap<InstId, InstId>,
    stacks: &mut HashMap<InstId, Vec<ValueRef>>,
    to_delete: &mut Vec<InstId>,
    node: NodeId,
) {
    let block = cfg.node(node).block;
    let mut pushed = Vec::new();

    for inst in ctx.block_insts(block) {
        if let Some(&alloca) = phi_to_alloca.get(&inst) {
            stacks.get_mut(&alloca).unwrap().push(ValueRef::Instruction(inst));
            pushed.push(alloca);
            continue;
        }
        match ctx.inst(inst).opcode {
            Opcode::Load => {
                if let Some(alloca) = ctx.operand_value(inst, 0).as_instruction() {
                    if allocas.contains(&alloca) {
                        let top = *stacks[&alloca].last().unwrap();
                        ctx.replace_all_uses_with(ValueRef::Instruction(inst), top);
                        to_delete.push(inst);
                    }
                }
            }
            Opcode::Store => {
                if let Some(alloca) = ctx.operand_value(inst, 1).as_instruction() {
                    if allocas.contains(&alloca) {
                        let value = ctx.operand_value(inst, 0);
                        stacks.get_mut(&alloca).unwrap().push(value);
                        pushed.push(alloca);
                        to_delete.push(inst);
                    }
                }
            }
            _ => {}
        }
    }

    for &succ in &cfg.node(node).successors {
        if let Some(phis) = block_phis.get(&succ) {
            for &(alloca, phi) in phis {
                let top = *stacks[&alloca].last().unwrap();
                Builder::new(ctx).add_incoming(phi, top, block);
            }
        }
    }

    for &child in dt.children(node) {
        rename_block(ctx, cfg, dt, allocas, block_phis, phi_to_alloca, stacks, to_delete, child);
    }

    for alloca in pushed {
        stacks.get_mut(&alloca).unwrap().pop();
    }
}

fn find_promotable_allocas(ctx: &Context, entry: BlockId) -> Vec<InstId> {
    ctx.block_insts(entry)
        .into_iter()
        .filter(|&inst| ctx.inst(inst).opcode == Opcode::Alloca && is_promotable(ctx, inst))
        .collect()
}

fn is_promotable(ctx: &Context, alloca: InstId) -> bool {
    if ctx.type_kind(ctx.inst(alloca).alloca_ty()).is_aggregate() {
        return false;
    }
    ctx.uses_of(ValueRef::Instruction(alloca)).into_iter().all(|use_id| {
        let u = ctx.use_(use_id);
        match ctx.inst(u.user).opcode {
            Opcode::Load => true,
            Opcode::Store => u.operand_index == 1,
            _ => false,
        }
    })
}

fn collect_store_blocks(ctx: &Context, cfg: &Cfg, alloca: InstId) -> HashSet<NodeId> {
    ctx.uses_of(ValueRef::Instruction(alloca))
        .into_iter()
        .filter_map(|use_id| {
            let u = ctx.use_(use_id);
            (ctx.inst(u.user).opcode == Opcode::Store && u.operand_index == 1)
                .then(|| cfg.node_of(ctx.inst(u.user).block))
        })
        .collect()
}

fn iterated_dominance_frontier(df: &DominanceFrontier, seeds: HashSet<NodeId>) -> HashSet<NodeId> {
    let mut marked = HashSet::new();
    let mut worklist: Vec<NodeId> = seeds.into_iter().collect();
    while let Some(b) = worklist.pop() {
        for y in df.of(b) {
            if marked.insert(y) {
                worklist.push(y);
            }
        }
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn diamond_if_with_stores_on_both_arms_gets_a_phi() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i1_ty = ctx.i1_ty;
        let i32_ty = ctx.i32_ty;
        let f = ctx.new_function(m, name, i32_ty, &[i1_ty], &[None], false, false);
        let entry = ctx.append_block(f, None);
        let then_bb = ctx.append_block(f, None);
        let else_bb = ctx.append_block(f, None);
        let merge = ctx.append_block(f, None);
        let cond = ValueRef::Argument(ctx.func(f).args[0]);

        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        let slot = b.build_alloca(i32_ty, Some("x"));
        b.build_cond_br(cond, then_bb, else_bb);
        b.set_insertion_point(then_bb);
        let one = ValueRef::Constant(b.ctx().const_int(i32_ty, 1));
        b.build_store(one, ValueRef::Instruction(slot));
        b.build_br(merge);
        b.set_insertion_point(else_bb);
        let two = ValueRef::Constant(b.ctx().const_int(i32_ty, 2));
        b.build_store(two, ValueRef::Instruction(slot));
        b.build_br(merge);
        b.set_insertion_point(merge);
        let loaded = b.build_load(ValueRef::Instruction(slot), Some("v"));
        b.build_ret(Some(ValueRef::Instruction(loaded)));

        let changed = promote_allocas(&mut ctx, f);
        assert!(changed);

        let merge_insts = ctx.block_insts(merge);
        assert_eq!(ctx.inst(merge_insts[0]).opcode, Opcode::Phi);
        assert_eq!(ctx.inst(merge_insts[0]).phi_incoming_count(), 2);
        assert_eq!(ctx.block_insts(entry).iter().filter(|&&i| ctx.inst(i).opcode == Opcode::Alloca).count(), 0);
    }

    #[test]
    fn alloca_never_stored_promotes_to_undef() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let f = ctx.new_function(m, name, i32_ty, &[], &[], false, false);
        let entry = ctx.append_block(f, None);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        let slot = b.build_alloca(i32_ty, None);
        let loaded = b.build_load(ValueRef::Instruction(slot), None);
        b.build_ret(Some(ValueRef::Instruction(loaded)));

        promote_allocas(&mut ctx, f);
        let insts = ctx.block_insts(entry);
        assert_eq!(insts.len(), 1);
        match ctx.operand_value(insts[0], 0) {
            ValueRef::Constant(c) => assert_eq!(ctx.constant(c).kind, crate::ir::constant::ConstantKind::Undef),
            other => panic!("expected undef constant operand, got {other:?}"),
        }
    }

    #[test]
    fn alloca_with_escaping_use_is_not_promoted() {
        let mut ctx = Context::new();
        let m = ctx.new_module(None);
        let name = ctx.intern("f");
        let i32_ty = ctx.i32_ty;
        let ptr_ty = ctx.pointer_type(i32_ty);
        let f = ctx.new_function(m, name, ptr_ty, &[], &[], false, false);
        let entry = ctx.append_block(f, None);
        let mut b = Builder::new(&mut ctx);
        b.set_insertion_point(entry);
        let slot = b.build_alloca(i32_ty, None);
        // Returning the pointer itself escapes it.
        b.build_ret(Some(ValueRef::Instruction(slot)));

        let changed = promote_allocas(&mut ctx, f);
        assert!(!changed);
        assert_eq!(ctx.block_insts(entry).len(), 2);
    }
}
