//! Control flow graph construction.
//!
//! Grounded in Cranelift's `ControlFlowGraph` (a per-function,
//! recomputed-on-demand map of block predecessors/successors) but built
//! fresh around explicit two-pass algorithm: a first pass
//! counts each block's outgoing/incoming edges, a second allocates exact-
//! sized edge arrays and fills them in, and every edge records its
//! `EdgeKind` — a distinction Cranelift's `bforest`-based sets don't
//! carry, since Cranelift's verifier doesn't need to tell a fallthrough
//! apart from a branch.

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{Block, Function, InstRef, Opcode, Operand};
use retrojit_bforest::MapForest;
use retrojit_entity::SecondaryMap;

/// The reason a CFG edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Execution falls off the end of a block with no terminator into
    /// the next block in layout order.
    Fallthrough,
    /// An explicit `Branch`/`BranchIf`/`BranchIfNot`/`BranchTable` edge.
    Branch,
    /// A `Return`/`ReturnVoid` edge to the function's implicit exit.
    Return,
    /// An edge induced by a `CheckNull`/call that may raise, per
    /// "exception edges are conservative over-approximations".
    Exception,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub src: Block,
    pub dst: Option<Block>,
    pub kind: EdgeKind,
    pub inst: InstRef,
}

#[derive(Default, Clone)]
struct NodeEdges {
    successors: Vec<Edge>,
    predecessor_count: u32,
}

/// The control flow graph of one function: each block's outgoing edges
/// and incoming-edge count.
pub struct ControlFlowGraph {
    nodes: SecondaryMap<Block, NodeEdges>,
}

impl ControlFlowGraph {
    pub fn successors(&self, block: Block) -> &[Edge] {
        &self.nodes[block].successors
    }

    pub fn predecessor_count(&self, block: Block) -> u32 {
        self.nodes[block].predecessor_count
    }

    pub fn is_reachable(&self, entry: Block, target: Block) -> bool {
        if entry == target {
            return true;
        }
        let mut stack = vec![entry];
        let mut seen = std::collections::HashSet::new();
        seen.insert(entry);
        while let Some(b) = stack.pop() {
            for edge in self.successors(b) {
                if let Some(dst) = edge.dst {
                    if dst == target {
                        return true;
                    }
                    if seen.insert(dst) {
                        stack.push(dst);
                    }
                }
            }
        }
        false
    }
}

fn branch_targets(func: &Function, block: Block, index: usize) -> CodegenResult<Vec<(Opcode, Option<Block>)>> {
    let inst = &func.block(block).insts[index];
    match inst.opcode {
        Opcode::Branch => {
            let label = inst.value1.as_label().expect("Branch carries a label");
            Ok(vec![(Opcode::Branch, Some(resolve_label(func, label)?))])
        }
        Opcode::BranchIf | Opcode::BranchIfNot => {
            let label = inst.value2.as_label().expect("conditional branch carries a label");
            Ok(vec![(inst.opcode, Some(resolve_label(func, label)?))])
        }
        Opcode::BranchTable => {
            if let Operand::JumpTable(jt) = inst.value2 {
                let mut out = Vec::new();
                for &label in &func.jump_tables[jt] {
                    out.push((Opcode::BranchTable, Some(resolve_label(func, label)?)));
                }
                Ok(out)
            } else {
                Err(CodegenError::CompileError("branch table instruction missing table operand".into()))
            }
        }
        Opcode::Return | Opcode::ReturnVoid => Ok(vec![(inst.opcode, None)]),
        _ => Ok(Vec::new()),
    }
}

fn resolve_label(func: &Function, label: crate::ir::Label) -> CodegenResult<Block> {
    func.labels
        .get(label)
        .copied()
        .ok_or_else(|| CodegenError::UndefinedLabel(func.entry_block().unwrap_or_else(|| func.layout[0])))
}

/// Build the control flow graph of `func`. First pass counts each
/// block's successor edges (so the second pass can allocate exact-sized
/// arrays instead of growing a `Vec` per insertion); second pass emits
/// the edges themselves and tallies predecessor counts.
pub fn build_cfg(func: &Function) -> CodegenResult<ControlFlowGraph> {
    let mut counts: SecondaryMap<Block, u32> = SecondaryMap::new();
    for &block in &func.layout {
        let data = func.block(block);
        let mut count = 0u32;
        for (index, inst) in data.insts.iter().enumerate() {
            if inst.opcode.is_terminator() {
                count += branch_targets(func, block, index)?.len() as u32;
            }
        }
        counts[block] = count.max(1);
    }

    let mut nodes: SecondaryMap<Block, NodeEdges> = SecondaryMap::new();
    // An ordered map, not a `HashMap`: every edge target is checked
    // against it below, and an ordered forest lets that check share its
    // backing allocation with any other per-function lookup this pass
    // grows to need.
    let mut layout_forest: MapForest<Block, usize> = MapForest::new();
    let layout_pos = layout_forest.make_map();
    for (i, &b) in func.layout.iter().enumerate() {
        layout_forest.insert(layout_pos, b, i);
    }

    for (pos, &block) in func.layout.iter().enumerate() {
        let data = func.block(block);
        let mut successors = Vec::with_capacity(counts[block] as usize);
        let mut terminated = false;

        for (index, inst) in data.insts.iter().enumerate() {
            if inst.opcode.is_terminator() {
                terminated = true;
                let inst_ref = InstRef::new(block, index);
                for (opcode, dst) in branch_targets(func, block, index)? {
                    let kind = match opcode {
                        Opcode::Return | Opcode::ReturnVoid => EdgeKind::Return,
                        _ => EdgeKind::Branch,
                    };
                    successors.push(Edge {
                        src: block,
                        dst,
                        kind,
                        inst: inst_ref,
                    });
                }
            } else if inst.opcode == Opcode::CheckNull || inst.opcode.is_call() {
                let inst_ref = InstRef::new(block, index);
                successors.push(Edge {
                    src: block,
                    dst: None,
                    kind: EdgeKind::Exception,
                    inst: inst_ref,
                });
            }
        }

        if !terminated {
            if let Some(&next) = func.layout.get(pos + 1) {
                let inst_ref = InstRef::new(block, data.insts.len());
                successors.push(Edge {
                    src: block,
                    dst: Some(next),
                    kind: EdgeKind::Fallthrough,
                    inst: inst_ref,
                });
            }
        }

        nodes[block].successors = successors;
    }

    for &block in &func.layout {
        let edges: Vec<Edge> = nodes[block].successors.clone();
        for edge in edges {
            if let Some(dst) = edge.dst {
                if layout_forest.get(layout_pos, &dst).is_none() {
                    return Err(CodegenError::UndefinedLabel(block));
                }
                nodes[dst].predecessor_count += 1;
            }
        }
    }

    Ok(ControlFlowGraph { nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Signature};
    use crate::types::{AbiCallConv, Type};

    fn sig() -> Signature {
        Signature::new(AbiCallConv::Cdecl, Type::void(), vec![])
    }

    #[test]
    fn straight_line_fallthrough() {
        let mut func = Function::new("f", sig());
        let (b0, _) = func.create_block();
        let (b1, _) = func.create_block();
        func.append_inst(b1, crate::ir::InstructionData::new(Opcode::ReturnVoid));
        let _ = b0;

        let cfg = build_cfg(&func).unwrap();
        assert_eq!(cfg.successors(b0).len(), 1);
        assert_eq!(cfg.successors(b0)[0].kind, EdgeKind::Fallthrough);
        assert_eq!(cfg.predecessor_count(b1), 1);
    }

    #[test]
    fn branch_to_undefined_label_is_an_error() {
        let mut func = Function::new("f", sig());
        let (b0, _) = func.create_block();
        let bogus_label = func.labels.next_key();
        func.append_inst(
            b0,
            crate::ir::InstructionData::new(Opcode::Branch)
                .with_value1(Operand::Label(bogus_label)),
        );
        assert!(build_cfg(&func).is_err());
    }
}
