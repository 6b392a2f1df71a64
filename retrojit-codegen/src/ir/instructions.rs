//! Opcodes and instruction storage.
//!
//! Grounded in Cranelift's `ir::InstructionData` (a flat enum keyed by
//! opcode, carrying just the operands that opcode needs) but reshaped
//! around three-address model: every instruction has a
//! destination plus up to two source operands, each either a `Value`, a
//! branch `Label`, a `FuncRef`/`SigRef`, or — for calls through raw
//! function pointers — a native address baked in at build time.

use crate::ir::{FuncRef, JumpTable, Label, SigRef, Value};
use bitflags::bitflags;

/// The opcode lattice. Unlike Cranelift's hundreds of target-agnostic
/// SSA opcodes, this is the small, closed set this crate actually
/// dispatches on during codegen and CFG cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    Copy,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Convert,
    CheckNull,
    Branch,
    BranchIf,
    BranchIfNot,
    /// A branch through a `JumpTable`, indexed by the one source value.
    BranchTable,
    Call,
    CallIndirect,
    /// Arguments passed in registers ahead of a call
    OutgoingReg,
    /// The callee-side counterpart: bind an incoming register to a value.
    IncomingReg,
    /// Copy a value into the ABI-mandated return register(s).
    ReturnReg,
    Return,
    ReturnVoid,
    /// Resolve the address of an imported symbol into a value.
    Import,
    /// A no-op marker recording a bytecode offset for the binary's
    /// offset table.
    MarkOffset,
    /// Load from / store to memory through a pointer value.
    Load,
    Store,
    /// Take the address of a local/addressable value.
    AddressOf,
}

impl Opcode {
    /// Opcodes CFG cleanup treats as terminators: nothing may fall
    /// through past them.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Branch
            | Opcode::BranchIf
            | Opcode::BranchIfNot
            | Opcode::BranchTable
            | Opcode::Return
            | Opcode::ReturnVoid
        )
    }

    pub fn is_conditional_branch(self) -> bool {
        matches!(self, Opcode::BranchIf | Opcode::BranchIfNot)
    }

    pub fn is_unconditional_branch(self) -> bool {
        matches!(self, Opcode::Branch)
    }

    /// The inverted condition of a conditional branch, used by CFG
    /// cleanup's "invert and skip the jump" transform. A total function:
    /// unknown/non-branch opcodes are a hard compile error rather than a
    /// panic "never abort" rule.
    pub fn invert_branch(self) -> Result<Opcode, crate::error::CodegenError> {
        match self {
            Opcode::BranchIf => Ok(Opcode::BranchIfNot),
            Opcode::BranchIfNot => Ok(Opcode::BranchIf),
            other => Err(crate::error::CodegenError::CompileError(format!(
                "cannot invert non-conditional opcode {:?}",
                other
            ))),
        }
    }

    /// Copy-like opcodes eligible for forward/backward copy propagation,
    /// explicit list.
    pub fn is_copy(self) -> bool {
        matches!(self, Opcode::Copy)
    }

    pub fn is_call(self) -> bool {
        matches!(self, Opcode::Call | Opcode::CallIndirect)
    }
}

/// One source/destination slot of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value(Value),
    Label(Label),
    Func(FuncRef),
    Sig(SigRef),
    JumpTable(JumpTable),
    /// A raw, already-resolved native code address (e.g. a direct call
    /// to a pointer baked in at build time).
    NativeAddress(usize),
    /// A bytecode offset recorded by `MarkOffset`.
    Offset(u32),
    None,
}

impl Operand {
    pub fn as_value(self) -> Option<Value> {
        match self {
            Operand::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_label(self) -> Option<Label> {
        match self {
            Operand::Label(l) => Some(l),
            _ => None,
        }
    }
}

bitflags! {
    /// Per-instruction liveness/allocation metadata computed by
    /// `compute_liveness` and consumed by the register allocator, packed
    /// into a 16-bit word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct InstFlags: u16 {
        /// `dest` is live after this instruction (has a later use).
        const DEST_LIVE = 1 << 0;
        /// `value1` is used again later in the block.
        const VALUE1_NEXT_USE = 1 << 1;
        /// `value2` is used again later in the block.
        const VALUE2_NEXT_USE = 1 << 2;
        /// This instruction has no observable effect and should be
        /// rewritten to `Nop` by dead-instruction elimination.
        const DEAD = 1 << 3;
        /// `value1` holds a branch-table index rather than a plain value
        /// (reinterprets the slot for `BranchTable`).
        const VALUE1_IS_INDEX = 1 << 4;
        /// This instruction marks a label address taken by `AddressOf`,
        /// blocking the CFG-cleanup transforms that would otherwise
        /// delete or merge its block.
        const ADDRESS_TAKEN = 1 << 5;
    }
}

/// A single three-address instruction: one opcode, one destination, up
/// to two source operands, plus the liveness/scheduling flags computed
/// by later passes.
#[derive(Debug, Clone)]
pub struct InstructionData {
    pub opcode: Opcode,
    pub dest: Option<Value>,
    pub value1: Operand,
    pub value2: Operand,
    pub flags: InstFlags,
    /// The bytecode offset this instruction originated from, if the
    /// builder was tracking source positions.
    pub source_offset: Option<u32>,
}

impl InstructionData {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            dest: None,
            value1: Operand::None,
            value2: Operand::None,
            flags: InstFlags::empty(),
            source_offset: None,
        }
    }

    pub fn with_dest(mut self, dest: Value) -> Self {
        self.dest = Some(dest);
        self
    }

    pub fn with_value1(mut self, v: Operand) -> Self {
        self.value1 = v;
        self
    }

    pub fn with_value2(mut self, v: Operand) -> Self {
        self.value2 = v;
        self
    }

    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }

    pub fn make_nop(&mut self) {
        self.opcode = Opcode::Nop;
        self.dest = None;
        self.value1 = Operand::None;
        self.value2 = Operand::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_branch_round_trips() {
        assert_eq!(Opcode::BranchIf.invert_branch().unwrap(), Opcode::BranchIfNot);
        assert_eq!(Opcode::BranchIfNot.invert_branch().unwrap(), Opcode::BranchIf);
    }

    #[test]
    fn invert_branch_rejects_non_branch() {
        assert!(Opcode::Add.invert_branch().is_err());
    }

    #[test]
    fn make_nop_clears_operands() {
        let mut inst = InstructionData::new(Opcode::Add);
        inst.flags.insert(InstFlags::DEST_LIVE);
        inst.make_nop();
        assert!(inst.is_nop());
        assert!(inst.dest.is_none());
    }
}
