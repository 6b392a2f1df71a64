//! CFG cleanup: the Shillner–Lu "Clean" pass.
//!
//! Grounded in Cranelift's iterative (non-recursive) reverse-postorder
//! traversal idiom from `dominator_tree.rs` — an explicit `(Block,
//! next_child_index)` stack frame instead of native recursion, so a
//! pathologically long chain of blocks can't blow the host stack — but
//! driving specific fixpoint of redundant-branch,
//! unconditional-branch-to-next, conditional-around-unconditional,
//! conditional-skip-with-inversion, empty-block-merge and
//! block-combination transforms instead of Cranelift's critical-edge
//! splitting.

use crate::error::CodegenResult;
use crate::flowgraph::{build_cfg, EdgeKind};
use crate::ir::{Block, Function, Opcode};

/// Blocks whose label has had its address taken (`AddressOf`) are never
/// removed or merged away address-taken guard.
fn address_taken_blocks(func: &Function) -> std::collections::HashSet<Block> {
    let mut set = std::collections::HashSet::new();
    for &block in &func.layout {
        for inst in &func.block(block).insts {
            if inst.opcode == Opcode::AddressOf {
                if let crate::ir::Operand::Label(label) = inst.value1 {
                    set.insert(func.label_target(label));
                }
            }
        }
    }
    set
}

/// Reverse-postorder block order computed with an explicit stack of
/// `(Block, next_child_index)` frames rather than recursion.
fn reverse_postorder(func: &Function, entry: Block) -> Vec<Block> {
    let cfg = match build_cfg(func) {
        Ok(c) => c,
        Err(_) => return func.layout.clone(),
    };
    let mut order = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut stack: Vec<(Block, usize)> = vec![(entry, 0)];
    visited.insert(entry);

    while let Some(&mut (block, ref mut next_child)) = stack.last_mut() {
        let successors = cfg.successors(block);
        let mut advanced = false;
        while *next_child < successors.len() {
            let idx = *next_child;
            *next_child += 1;
            if let Some(dst) = successors[idx].dst {
                if visited.insert(dst) {
                    stack.push((dst, 0));
                    advanced = true;
                    break;
                }
            }
        }
        if !advanced && *next_child >= successors.len() {
            order.push(block);
            stack.pop();
        }
    }

    order.reverse();
    for &block in &func.layout {
        if !order.contains(&block) {
            order.push(block);
        }
    }
    order
}

fn only_inst_is_unconditional_branch(func: &Function, block: Block) -> Option<crate::ir::Label> {
    let insts = &func.block(block).insts;
    if insts.len() == 1 && insts[0].opcode == Opcode::Branch {
        insts[0].value1.as_label()
    } else {
        None
    }
}

/// Collapse a chain of unconditional-branch-only blocks to its final
/// real target "redundant branch" transform.
fn redundant_branch_pass(func: &mut Function) -> bool {
    let mut changed = false;
    let blocks: Vec<Block> = func.layout.clone();
    for block in blocks {
        let insts_len = func.block(block).insts.len();
        if insts_len == 0 {
            continue;
        }
        let last_idx = insts_len - 1;
        let last = func.block(block).insts[last_idx].clone();
        let target_label = match last.opcode {
            Opcode::Branch => last.value1.as_label(),
            Opcode::BranchIf | Opcode::BranchIfNot => last.value2.as_label(),
            _ => None,
        };
        if let Some(label) = target_label {
            let target_block = func.label_target(label);
            if let Some(final_label) = only_inst_is_unconditional_branch(func, target_block) {
                let final_block = func.label_target(final_label);
                if final_block != target_block {
                    let inst = &mut func.block_mut(block).insts[last_idx];
                    match inst.opcode {
                        Opcode::Branch => inst.value1 = crate::ir::Operand::Label(final_label),
                        Opcode::BranchIf | Opcode::BranchIfNot => {
                            inst.value2 = crate::ir::Operand::Label(final_label)
                        }
                        _ => {}
                    }
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Remove a branch whose target is the immediately following block in
/// layout order: an unconditional branch to it is already a
/// fallthrough, and a conditional branch whose taken edge lands on the
/// same block as its fallthrough edge no longer has any observable
/// effect on control flow either way.
fn drop_branch_to_next_pass(func: &mut Function) -> bool {
    let mut changed = false;
    for pos in 0..func.layout.len() {
        let block = func.layout[pos];
        let insts_len = func.block(block).insts.len();
        if insts_len == 0 {
            continue;
        }
        let last_idx = insts_len - 1;
        let label = {
            let inst = &func.block(block).insts[last_idx];
            match inst.opcode {
                Opcode::Branch => inst.value1.as_label(),
                Opcode::BranchIf | Opcode::BranchIfNot => inst.value2.as_label(),
                _ => None,
            }
        };
        let label = match label {
            Some(l) => l,
            None => continue,
        };
        let target = func.label_target(label);
        if func.layout.get(pos + 1) == Some(&target) {
            func.block_mut(block).insts[last_idx].make_nop();
            changed = true;
        }
    }
    changed
}

/// `BranchIf cond, L1; Branch L2; L1:...` with no other predecessors of
/// the intervening fallthrough block becomes
/// `BranchIfNot cond, L2;...` (invert and drop the jump).
fn invert_and_skip_jump_pass(func: &mut Function) -> CodegenResult<bool> {
    let mut changed = false;
    let taken = address_taken_blocks(func);
    for pos in 0..func.layout.len() {
        let block = func.layout[pos];
        let insts_len = func.block(block).insts.len();
        if insts_len == 0 {
            continue;
        }
        let last_idx = insts_len - 1;
        let (opcode, cond, then_label) = {
            let inst = &func.block(block).insts[last_idx];
            match inst.opcode {
                Opcode::BranchIf | Opcode::BranchIfNot => (
                    inst.opcode,
                    inst.value1.as_value(),
                    inst.value2.as_label(),
                ),
                _ => continue,
            }
        };
        let (cond, then_label) = match (cond, then_label) {
            (Some(c), Some(l)) => (c, l),
            _ => continue,
        };
        let then_block = func.label_target(then_label);
        let next_block = match func.layout.get(pos + 1) {
            Some(&b) => b,
            None => continue,
        };
        if then_block == next_block {
            continue;
        }
        let next_insts_len = func.block(next_block).insts.len();
        if next_insts_len != 1 {
            continue;
        }
        let next_last = func.block(next_block).insts[0].clone();
        if next_last.opcode != Opcode::Branch {
            continue;
        }
        let skip_target = next_last.value1.as_label().unwrap();
        let cfg = build_cfg(func)?;
        if cfg.predecessor_count(next_block) != 1 || taken.contains(&next_block) {
            continue;
        }

        let inverted = opcode.invert_branch()?;
        let inst = &mut func.block_mut(block).insts[last_idx];
        inst.opcode = inverted;
        inst.value1 = crate::ir::Operand::Value(cond);
        inst.value2 = crate::ir::Operand::Label(skip_target);
        // The intermediate block's own jump is now unreachable: both the
        // inverted branch's taken edge and its fallthrough land past it,
        // but the fallthrough still flows *through* this block, so it
        // must become a nop rather than keep firing unconditionally.
        func.block_mut(next_block).insts[0].make_nop();
        changed = true;
    }
    Ok(changed)
}

/// Merge a block with no instructions of its own (other than an
/// unconditional branch) into its unique predecessor, and combine a
/// block with exactly one predecessor and one successor edge into that
/// predecessor directly.
fn merge_and_combine_pass(func: &mut Function) -> CodegenResult<bool> {
    let mut changed = false;
    let taken = address_taken_blocks(func);
    let cfg = build_cfg(func)?;

    let mut i = 0;
    while i + 1 < func.layout.len() {
        let a = func.layout[i];
        let b = func.layout[i + 1];
        if taken.contains(&b) {
            i += 1;
            continue;
        }
        let a_succ = cfg.successors(a);
        let falls_through = a_succ.len() == 1
        && a_succ[0].kind == EdgeKind::Fallthrough
        && a_succ[0].dst == Some(b);
        if falls_through && cfg.predecessor_count(b) == 1 {
            let b_insts = func.block(b).insts.clone();
            func.block_mut(a).insts.extend(b_insts);
            func.layout.remove(i + 1);
            changed = true;
            break;
        }
        i += 1;
    }
    Ok(changed)
}

/// Run the cleanup fixpoint: repeat the transform passes until none of
/// them makes further progress, visiting blocks in reverse-postorder so
/// forward progress (e.g. collapsing a branch chain) is seen immediately
/// by later passes in the same round.
pub fn clean_cfg(func: &mut Function) -> CodegenResult<()> {
    if let Some(entry) = func.entry_block() {
        func.layout = reverse_postorder(func, entry)
            .into_iter()
            .filter(|b| func.layout.contains(b))
            .collect();
    }

    loop {
        let mut changed = false;
        changed |= redundant_branch_pass(func);
        changed |= drop_branch_to_next_pass(func);
        changed |= invert_and_skip_jump_pass(func)?;
        changed |= merge_and_combine_pass(func)?;
        if !changed {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, InstructionData, Operand, Signature};
    use crate::types::{AbiCallConv, Type};

    fn sig() -> Signature {
        Signature::new(AbiCallConv::Cdecl, Type::void(), vec![])
    }

    #[test]
    fn drops_branch_to_immediately_following_block() {
        let mut func = Function::new("f", sig());
        let (b0, _l0) = func.create_block();
        let (b1, l1) = func.create_block();
        func.append_inst(
            b0,
            InstructionData::new(Opcode::Branch).with_value1(Operand::Label(l1)),
        );
        func.append_inst(b1, InstructionData::new(Opcode::ReturnVoid));

        clean_cfg(&mut func).unwrap();
        assert!(func.block(b0).insts[0].is_nop());
    }

    #[test]
    fn merges_fallthrough_only_block() {
        let mut func = Function::new("f", sig());
        let (b0, _) = func.create_block();
        let (b1, _) = func.create_block();
        func.append_inst(b1, InstructionData::new(Opcode::ReturnVoid));

        clean_cfg(&mut func).unwrap();
        assert_eq!(func.layout.len(), 1);
        assert_eq!(func.block(b0).insts.len(), 1);
    }

    #[test]
    fn drops_a_conditional_branch_whose_target_is_already_the_fallthrough() {
        let mut func = Function::new("f", sig());
        let (b0, _l0) = func.create_block();
        let (b1, l1) = func.create_block();
        let cond = func.create_value(b0, Type::nint());
        func.append_inst(
            b0,
            InstructionData::new(Opcode::BranchIf)
                .with_value1(Operand::Value(cond))
                .with_value2(Operand::Label(l1)),
        );
        func.append_inst(b1, InstructionData::new(Opcode::ReturnVoid));

        clean_cfg(&mut func).unwrap();
        assert!(func.block(b0).insts[0].is_nop());
    }

    #[test]
    fn inverts_and_skips_a_single_instruction_jump_without_losing_the_then_target() {
        // `BB: if cond goto L0; BB2: goto L1; L0: ...; L1: ...` — the
        // classic "conditional branch skipping a single-instruction jump"
        // shape. `cond == true` must still reach L0 afterward.
        let mut func = Function::new("f", sig());
        let (b0, _l0) = func.create_block();
        let (b1, _l1) = func.create_block();
        let (b2, l2) = func.create_block();
        let (b3, l3) = func.create_block();

        let cond = func.create_value(b0, Type::nint());
        func.append_inst(
            b0,
            InstructionData::new(Opcode::BranchIf)
                .with_value1(Operand::Value(cond))
                .with_value2(Operand::Label(l2)),
        );
        func.append_inst(b1, InstructionData::new(Opcode::Branch).with_value1(Operand::Label(l3)));
        func.append_inst(b2, InstructionData::new(Opcode::ReturnVoid));
        func.append_inst(b3, InstructionData::new(Opcode::ReturnVoid));

        let changed = invert_and_skip_jump_pass(&mut func).unwrap();
        assert!(changed);

        let inst = &func.block(b0).insts[0];
        assert_eq!(inst.opcode, Opcode::BranchIfNot);
        assert_eq!(inst.value1.as_value(), Some(cond));
        assert_eq!(inst.value2.as_label(), Some(l3));
        assert!(
            func.block(b1).insts[0].is_nop(),
            "the intermediate jump must be rewritten to a nop, not left executing unconditionally"
        );
    }

    #[test]
    fn does_not_skip_past_an_address_taken_intermediate_block() {
        let mut func = Function::new("f", sig());
        let (b0, _l0) = func.create_block();
        let (b1, l1) = func.create_block();
        let (b2, l2) = func.create_block();
        let (b3, l3) = func.create_block();
        let (b4, _l4) = func.create_block();

        let cond = func.create_value(b0, Type::nint());
        func.append_inst(
            b0,
            InstructionData::new(Opcode::BranchIf)
                .with_value1(Operand::Value(cond))
                .with_value2(Operand::Label(l2)),
        );
        func.append_inst(b1, InstructionData::new(Opcode::Branch).with_value1(Operand::Label(l3)));
        func.append_inst(b2, InstructionData::new(Opcode::ReturnVoid));
        func.append_inst(b3, InstructionData::new(Opcode::ReturnVoid));
        // Something (e.g. a dispatch table) took b1's address.
        func.append_inst(
            b4,
            InstructionData::new(Opcode::AddressOf).with_value1(Operand::Label(l1)),
        );

        let changed = invert_and_skip_jump_pass(&mut func).unwrap();
        assert!(!changed, "an address-taken intermediate block must not be bypassed");
        assert_eq!(func.block(b0).insts[0].opcode, Opcode::BranchIf);
    }
}
