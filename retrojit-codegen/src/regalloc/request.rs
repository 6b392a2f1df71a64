//! Per-instruction register requirements.
//!
//! Grounded in Cranelift's `regalloc::Context`'s solve-constraints
//! step, reshaped around value/scratch descriptor pair:
//! each instruction is translated into a small, fixed set of
//! requirements (what class each operand needs, whether it must be
//! clobbered, how many scratch registers the emitter additionally
//! needs) before the local allocator decides concrete assignments.

use crate::ir::Value;
use smallvec::SmallVec;

/// What an instruction needs of one value operand.
#[derive(Debug, Clone, Copy)]
pub struct ValueDescriptor {
    pub value: Value,
    /// Whether this use is the value's last use in the block (computed
    /// from liveness: `!NEXT_USE`).
    pub is_last_use: bool,
    /// True if the backend requires this operand in a register at all
    /// (false permits a memory/immediate operand).
    pub needs_register: bool,
}

/// A transient register the emitter needs for the duration of one
/// instruction but that carries no value identity (e.g. an x86 shift
/// count, or a temporary used while materializing a large constant).
#[derive(Debug, Clone, Copy)]
pub struct ScratchDescriptor {
    pub clobbers_input: bool,
}

/// The full register request for one instruction (minus the
/// stack-register-file flags, which
/// the bundled reference backend never sets — see DESIGN.md).
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub dest: Option<ValueDescriptor>,
    pub value1: Option<ValueDescriptor>,
    pub value2: Option<ValueDescriptor>,
    /// Almost every instruction needs zero or one scratch register, so
    /// this stays inline rather than heap-allocating per instruction.
    pub scratch: SmallVec<[ScratchDescriptor; 2]>,
    /// Three inputs, no output (e.g. a compare-and-branch fused op).
    pub ternary: bool,
    pub is_branch: bool,
    pub is_copy: bool,
    pub commutative: bool,
    /// The output register need not equal any input's register.
    pub free_dest: bool,
    /// True if this instruction clobbers every caller-saved register
    /// (e.g. a call), forcing any value currently resident in one to be
    /// spilled or moved to a global register first.
    pub clobbers_volatiles: bool,
}
