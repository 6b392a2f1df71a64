//! Static description of a target's register file.
//!
//! Grounded in Cranelift's `isa::registers` module: register units are
//! the allocation primitive, grouped into named classes (`flat`,
//! `global`) and banks (integer, float). Far smaller than Cranelift's
//! generated multi-ISA tables since this crate ships a single reference
//! backend.

/// A register unit: the smallest thing the allocator tracks. One
/// register == one unit in the reference backend (no aliasing, unlike
/// e.g. x86 `al`/`ax`/`eax`/`rax` sharing one physical register).
pub type RegUnit = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegBank {
    Integer,
    Float,
}

/// A class of interchangeable registers: a contiguous run of register
/// units, a display prefix, and which of them are reserved for
/// long-lived ("global") allocation candidates versus purely local
/// ("flat") use flat/paired/global register kinds.
#[derive(Debug, Clone)]
pub struct RegClass {
    pub name: &'static str,
    pub bank: RegBank,
    pub first_unit: RegUnit,
    pub num_regs: RegUnit,
    /// How many registers, counted from `first_unit`, are scratch/flat
    /// only and never chosen as global register candidates.
    pub num_flat: RegUnit,
    /// Long (64-bit-on-32-bit-target) values are kept in pairs of
    /// adjacent registers when `true`.
    pub paired: bool,
}

impl RegClass {
    pub fn global_units(&self) -> impl Iterator<Item = RegUnit> {
        let start = self.first_unit + self.num_flat;
        let end = self.first_unit + self.num_regs;
        start..end
    }

    pub fn flat_units(&self) -> impl Iterator<Item = RegUnit> {
        let start = self.first_unit;
        let end = self.first_unit + self.num_flat;
        start..end
    }
}

/// The complete register description of a target: its classes, and
/// which units are caller-saved ("volatile") versus callee-saved
/// ("global candidate").
#[derive(Debug, Clone)]
pub struct RegInfo {
    pub classes: Vec<RegClass>,
}

impl RegInfo {
    pub fn class(&self, name: &str) -> Option<&RegClass> {
        self.classes.iter().find(|c| c.name == name)
    }
}
