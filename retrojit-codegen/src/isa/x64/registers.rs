//! x86-64 SystemV register description.

use crate::isa::registers::{RegBank, RegClass, RegInfo, RegUnit};

/// Register unit numbering, in SystemV call-used order first (so the
/// allocator's LRU/cost tie-breaking favors caller-saved registers),
/// followed by the callee-saved ("global") registers.
///
/// 0=rax 1=rcx 2=rdx 3=rsi 4=rdi 5=r8 6=r9 7=r10 8=r11 (caller-saved)
/// 9=rbx 10=r12 11=r13 12=r14 13=r15 (callee-saved / global candidates)
pub const RAX: RegUnit = 0;
pub const RCX: RegUnit = 1;
pub const RDX: RegUnit = 2;
pub const RSI: RegUnit = 3;
pub const RDI: RegUnit = 4;
pub const R8: RegUnit = 5;
pub const R9: RegUnit = 6;
pub const R10: RegUnit = 7;
pub const R11: RegUnit = 8;
pub const RBX: RegUnit = 9;
pub const R12: RegUnit = 10;
pub const R13: RegUnit = 11;
pub const R14: RegUnit = 12;
pub const R15: RegUnit = 13;

/// SystemV integer argument-passing order.
pub const ARG_REGS: [RegUnit; 6] = [RDI, RSI, RDX, RCX, R8, R9];
pub const RETURN_REG: RegUnit = RAX;

/// The native encoding (ModRM rm/reg field, REX.B/R extension bit) of a
/// register unit.
pub fn encoding(unit: RegUnit) -> (u8, bool) {
    // Maps our logical unit numbering onto the real x86-64 register
    // numbers (0=rax..7=rdi, 8=r8..15=r15).
    const NATIVE: [u8; 14] = [0, 1, 2, 6, 7, 8, 9, 10, 11, 3, 12, 13, 14, 15];
    let native = NATIVE[unit as usize];
    (native & 0x7, native >= 8)
}

pub fn gpr_class() -> RegClass {
    RegClass {
        name: "gpr",
        bank: RegBank::Integer,
        first_unit: RAX,
        num_regs: 14,
        num_flat: 9,
        paired: false,
    }
}

pub fn reg_info() -> RegInfo {
    RegInfo {
        classes: vec![gpr_class()],
    }
}
