//! The bundled x86-64 SystemV reference backend.
//!
//! Added because the rest of this crate — the allocator, the codegen
//! driver's restart loop, the offset encoder — has nothing to exercise
//! end to end without at least one concrete `Emitter`. Intentionally
//! small; see `emitter.rs` for the supported opcode subset.

mod emitter;
pub mod registers;

pub use emitter::X64Emitter;

use crate::isa::registers::RegInfo;
use crate::isa::{Emitter, TargetIsa};
use crate::types::{ArchLayout, PointerSize};

pub struct X64Isa {
    reg_info: RegInfo,
    arch_layout: ArchLayout,
}

impl X64Isa {
    pub fn new() -> Self {
        Self {
            reg_info: registers::reg_info(),
            arch_layout: ArchLayout::x86_64_system_v(),
        }
    }
}

impl Default for X64Isa {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetIsa for X64Isa {
    fn name(&self) -> &'static str {
        "x86_64-systemv"
    }

    fn pointer_size(&self) -> PointerSize {
        PointerSize::Size64
    }

    fn reg_info(&self) -> &RegInfo {
        &self.reg_info
    }

    fn arch_layout(&self) -> &ArchLayout {
        &self.arch_layout
    }

    fn make_emitter(&self) -> Box<dyn Emitter> {
        Box::new(X64Emitter::new())
    }
}
