//! The intermediate representation: entities, instructions, functions
//! and the builder that constructs them.

pub mod builder;
pub mod entities;
pub mod function;
pub mod instructions;
pub mod value;

pub use builder::{Builder, BuilderContext};
pub use entities::{Block, FrameSlot, FuncRef, InstRef, JumpTable, Label, SigRef, Value};
pub use function::{BlockData, CompiledEntry, Function, FrameSlotData, Signature};
pub use instructions::{InstFlags, InstructionData, Opcode, Operand};
pub use value::{ConstantPayload, ValueData, ValueFlags, NO_REGISTER};
