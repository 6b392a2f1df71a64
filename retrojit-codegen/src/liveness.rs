//! Liveness analysis and copy propagation.
//!
//! Grounded in Cranelift's backward-scanning liveness idiom (see
//! `regalloc/liveness.rs`'s per-instruction live-range tracking) but
//! computing lighter per-instruction flags — `DEST_LIVE`
//! / `VALUEn_NEXT_USE` — rather than full SSA live ranges, since the
//! local allocator only ever needs "is this still wanted after this
//! instruction", not a value's complete range.

use crate::ir::instructions::InstFlags;
use crate::ir::{Function, Opcode, Operand};

/// Walk a block backward, marking each instruction's destination `LIVE`
/// if some later instruction (or the block's live-out set) still wants
/// it, and each source operand `NEXT_USE` if it is read again later in
/// the block. Dead instructions (computed value never subsequently used,
/// and with no side effect) are rewritten to `Nop`.
fn liveness_for_block(func: &mut Function, block: crate::ir::Block) {
    use std::collections::HashSet;

    let mut live: HashSet<crate::ir::Value> = func
        .values
        .iter()
        .filter(|(_, data)| data.starts_block_live())
        .map(|(v, _)| v)
        .collect();

    let len = func.block(block).insts.len();
    for i in (0..len).rev() {
        let (opcode, dest, v1, v2) = {
            let inst = &func.block(block).insts[i];
            (inst.opcode, inst.dest, inst.value1, inst.value2)
        };

        let mut flags = InstFlags::empty();

        let dest_live = dest.map(|d| live.contains(&d)).unwrap_or(false);
        if dest_live {
            flags.insert(InstFlags::DEST_LIVE);
        }
        if let Some(d) = dest {
            live.remove(&d);
        }

        let has_side_effect = !matches!(
            opcode,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::Neg
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Not
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Convert
            | Opcode::Copy
            | Opcode::Load
        );
        let dead = dest.is_some() && !dest_live && !has_side_effect;
        if dead {
            flags.insert(InstFlags::DEAD);
        }

        if let Operand::Value(v) = v1 {
            if live.contains(&v) {
                flags.insert(InstFlags::VALUE1_NEXT_USE);
            }
            live.insert(v);
        }
        if let Operand::Value(v) = v2 {
            if live.contains(&v) {
                flags.insert(InstFlags::VALUE2_NEXT_USE);
            }
            live.insert(v);
        }

        let inst = &mut func.block_mut(block).insts[i];
        inst.flags = flags;
        if dead {
            inst.make_nop();
        }
    }
}

/// Recompute liveness flags for every block of `func`.
pub fn compute_liveness(func: &mut Function) {
    let blocks = func.layout.clone();
    for block in blocks {
        liveness_for_block(func, block);
    }
}

/// Opcodes eligible as the source of copy propagation: only a plain
/// register-to-register `Copy`
/// qualifies, never a load, call result, or constant materialization.
fn is_propagatable_copy(inst: &crate::ir::InstructionData) -> bool {
    inst.opcode.is_copy() && inst.dest.is_some() && matches!(inst.value1, Operand::Value(_))
}

/// Forward copy propagation: for `dest = Copy src`, rewrite later uses of
/// `dest` within the same block to use `src` directly, as long as `src`
/// is not redefined in between. Stops propagating across a redefinition
/// of either value.
fn forward_propagate_block(func: &mut Function, block: crate::ir::Block) -> bool {
    let mut changed = false;
    let len = func.block(block).insts.len();

    for i in 0..len {
        let copy = func.block(block).insts[i].clone();
        if !is_propagatable_copy(&copy) {
            continue;
        }
        let dest = copy.dest.unwrap();
        let src = copy.value1.as_value().unwrap();

        for j in (i + 1)..len {
            let inst = &mut func.block_mut(block).insts[j];
            let redefines_dest = inst.dest == Some(dest);
            let redefines_src = inst.dest == Some(src);
            if let Operand::Value(v) = inst.value1 {
                if v == dest {
                    inst.value1 = Operand::Value(src);
                    changed = true;
                }
            }
            if let Operand::Value(v) = inst.value2 {
                if v == dest {
                    inst.value2 = Operand::Value(src);
                    changed = true;
                }
            }
            if redefines_dest || redefines_src {
                break;
            }
        }
    }
    changed
}

/// Backward copy propagation: for `dest = Copy src` where `src` is
/// defined exactly once, earlier in the block, by an instruction whose
/// result is otherwise unused, retarget that definition to write `dest`
/// directly and drop the copy.
fn backward_propagate_block(func: &mut Function, block: crate::ir::Block) -> bool {
    let mut changed = false;
    let len = func.block(block).insts.len();

    for i in 0..len {
        let copy = func.block(block).insts[i].clone();
        if !is_propagatable_copy(&copy) {
            continue;
        }
        let dest = copy.dest.unwrap();
        let src = copy.value1.as_value().unwrap();

        let mut def_index = None;
        let mut src_used_elsewhere = false;
        for j in 0..i {
            let inst = &func.block(block).insts[j];
            if inst.dest == Some(src) {
                if def_index.is_some() {
                    def_index = None;
                    break;
                }
                def_index = Some(j);
            }
            if matches!(inst.value1, Operand::Value(v) if v == src)
            || matches!(inst.value2, Operand::Value(v) if v == src)
            {
                src_used_elsewhere = true;
            }
        }

        if let Some(j) = def_index {
            if !src_used_elsewhere {
                func.block_mut(block).insts[j].dest = Some(dest);
                func.block_mut(block).insts[i].make_nop();
                changed = true;
            }
        }
    }
    changed
}

/// Run copy propagation (forward then backward) to a fixpoint,
/// recomputing liveness after every pass since propagation changes which
/// values are read where
pub fn propagate_copies(func: &mut Function) {
    loop {
        let mut changed = false;
        let blocks = func.layout.clone();
        for &block in &blocks {
            changed |= forward_propagate_block(func, block);
        }
        for &block in &blocks {
            changed |= backward_propagate_block(func, block);
        }
        compute_liveness(func);
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, InstructionData, Signature};
    use crate::types::{AbiCallConv, Type};

    fn sig() -> Signature {
        Signature::new(AbiCallConv::Cdecl, Type::void(), vec![])
    }

    #[test]
    fn dead_instruction_is_rewritten_to_nop() {
        let mut func = Function::new("f", sig());
        let (b0, _) = func.create_block();
        let a = func.create_value(b0, Type::int());
        let b = func.create_value(b0, Type::int());
        let dead = func.create_value(b0, Type::int());
        func.append_inst(
            b0,
            InstructionData::new(Opcode::Add)
                .with_dest(dead)
                .with_value1(Operand::Value(a))
                .with_value2(Operand::Value(b)),
        );
        func.append_inst(b0, InstructionData::new(Opcode::ReturnVoid));

        compute_liveness(&mut func);
        assert!(func.block(b0).insts[0].is_nop());
    }

    #[test]
    fn forward_copy_propagation_removes_indirection() {
        let mut func = Function::new("f", sig());
        let (b0, _) = func.create_block();
        let a = func.create_value(b0, Type::int());
        let copy_dest = func.create_value(b0, Type::int());
        let result = func.create_value(b0, Type::int());

        func.append_inst(
            b0,
            InstructionData::new(Opcode::Copy)
                .with_dest(copy_dest)
                .with_value1(Operand::Value(a)),
        );
        func.append_inst(
            b0,
            InstructionData::new(Opcode::Neg)
                .with_dest(result)
                .with_value1(Operand::Value(copy_dest)),
        );
        func.append_inst(b0, InstructionData::new(Opcode::ReturnVoid));

        propagate_copies(&mut func);
        assert_eq!(func.block(b0).insts[1].value1, Operand::Value(a));
    }
}
