//! Target-ISA abstraction.
//!
//! Grounded in Cranelift's `isa::TargetIsa` trait object (one dynamic
//! interface implemented per architecture, selected at `Context`
//! construction time) but narrowed to exact surface: a
//! backend only needs to describe its registers and emit code for one
//! instruction at a time into a growable buffer, reporting `MemoryFull`
//! when it runs out of room so the codegen driver can restart into a
//! bigger region.

pub mod registers;
#[cfg(feature = "x64")]
pub mod x64;

use crate::error::CodegenResult;
use crate::ir::{Function, InstructionData};
use crate::isa::registers::RegInfo;
use crate::types::{ArchLayout, PointerSize};

/// A target architecture: its register file, pointer width, and ABI
/// layout parameters.
pub trait TargetIsa: Send + Sync {
    fn name(&self) -> &'static str;
    fn pointer_size(&self) -> PointerSize;
    fn reg_info(&self) -> &RegInfo;
    fn arch_layout(&self) -> &ArchLayout;
    fn make_emitter(&self) -> Box<dyn Emitter>;
}

/// A single-use code emitter for one function compilation. The codegen
/// driver (`context::Context::compile`) calls `emit_instruction` once
/// per non-nop instruction in layout order, then `emit_prologue`/
/// `emit_epilogue` around the body.
///
/// Every method that writes bytes returns `CodegenError::MemoryFull`
/// (never panics, never grows its own buffer) when the caller-supplied
/// code region is exhausted; the driver's restart loop is the only thing
/// that decides to allocate more space and retry
pub trait Emitter {
    /// Reset internal position to the start of a fresh code buffer of
    /// `capacity` bytes, discarding any bytes emitted for a prior,
    /// overflowed attempt.
    fn begin(&mut self, capacity: usize);

    fn emit_prologue(&mut self, func: &Function) -> CodegenResult<()>;

    fn emit_instruction(
        &mut self,
        func: &Function,
        inst: &InstructionData,
    ) -> CodegenResult<()>;

    fn emit_epilogue(&mut self, func: &Function) -> CodegenResult<()>;

    /// Bytes written so far into the current attempt.
    fn len(&self) -> usize;

    /// Copy the finished buffer out; called once per successful
    /// compile, after the driver has flushed the instruction cache.
    fn finish(&mut self) -> Vec<u8>;
}
