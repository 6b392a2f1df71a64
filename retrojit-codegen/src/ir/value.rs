//! Value slots: `jit_value` — a type, home location, an
//! optional constant payload, and the one-bit flag set that drives
//! ownership promotion, liveness and register allocation.

use crate::ir::{Block, FrameSlot};
use crate::types::Type;
use bitflags::bitflags;

bitflags! {
    /// The 1-bit flag set of `jit_value`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ValueFlags: u16 {
        const IS_CONSTANT = 1 << 0;
        const IS_NINT_CONSTANT = 1 << 1;
        const IS_TEMPORARY = 1 << 2;
        const IS_LOCAL = 1 << 3;
        const IS_VOLATILE = 1 << 4;
        const IS_ADDRESSABLE = 1 << 5;
        const IS_PARAMETER = 1 << 6;
        const IN_REGISTER = 1 << 7;
        const IN_FRAME = 1 << 8;
        const IN_GLOBAL_REGISTER = 1 << 9;
        const HAS_GLOBAL_REGISTER = 1 << 10;
        const LIVE = 1 << 11;
        const NEXT_USE = 1 << 12;
        const HAS_FRAME_OFFSET = 1 << 13;
        const GLOBAL_CANDIDATE = 1 << 14;
        const FREE_ADDRESS = 1 << 15;
    }
}

/// A constant payload. Long (struct/union) constants are heap-allocated
/// out-of-line and released when the owning value is freed; scalars are
/// stored inline
#[derive(Clone, Debug)]
pub enum ConstantPayload {
    NInt(i64),
    Long(i64),
    F32(f32),
    F64(f64),
    NFloat(f64),
    /// A long (struct/union) constant: raw bytes matching the value's type
    /// layout, heap-allocated.
    Bytes(Vec<u8>),
}

/// The sentinel used for "no register assigned" and "no frame offset
/// assigned" respectively ("a register index (or
/// -1), a frame offset (or sentinel)").
pub const NO_REGISTER: i16 = -1;

#[derive(Clone, Debug)]
pub struct ValueData {
    pub ty: Type,
    /// The block that created this value (its scope before any
    /// promotion to `local`).
    pub owner: Block,
    pub reg: i16,
    /// Companion register of a long pair, or `NO_REGISTER`.
    pub reg_pair: i16,
    pub frame_slot: Option<FrameSlot>,
    pub global_reg: i16,
    pub constant: Option<ConstantPayload>,
    pub flags: ValueFlags,
    pub usage_count: u32,
}

impl ValueData {
    pub fn new_temporary(owner: Block, ty: Type) -> Self {
        Self {
            ty,
            owner,
            reg: NO_REGISTER,
            reg_pair: NO_REGISTER,
            frame_slot: None,
            global_reg: NO_REGISTER,
            constant: None,
            flags: ValueFlags::IS_TEMPORARY,
            usage_count: 0,
        }
    }

    pub fn new_parameter(owner: Block, ty: Type) -> Self {
        let mut v = Self::new_temporary(owner, ty);
        v.flags = ValueFlags::IS_PARAMETER | ValueFlags::IS_LOCAL;
        v
    }

    pub fn new_constant(owner: Block, ty: Type, payload: ConstantPayload) -> Self {
        let mut v = Self::new_temporary(owner, ty);
        v.flags |= ValueFlags::IS_CONSTANT;
        if matches!(payload, ConstantPayload::NInt(_)) {
            v.flags |= ValueFlags::IS_NINT_CONSTANT;
        }
        v.constant = Some(payload);
        v
    }

    /// Promote a temporary referenced outside its creating block to
    /// `local` value ownership rule.
    pub fn promote_to_local(&mut self) {
        self.flags.remove(ValueFlags::IS_TEMPORARY);
        self.flags.insert(ValueFlags::IS_LOCAL);
    }

    /// Promote a value captured by a nested function: both `local` and
    /// `addressable`.
    pub fn promote_to_captured(&mut self) {
        self.promote_to_local();
        self.flags.insert(ValueFlags::IS_ADDRESSABLE);
    }

    pub fn is_temporary(&self) -> bool {
        self.flags.contains(ValueFlags::IS_TEMPORARY)
    }
    pub fn is_local(&self) -> bool {
        self.flags.contains(ValueFlags::IS_LOCAL)
    }
    pub fn is_constant(&self) -> bool {
        self.flags.contains(ValueFlags::IS_CONSTANT)
    }
    pub fn is_volatile(&self) -> bool {
        self.flags.contains(ValueFlags::IS_VOLATILE)
    }
    pub fn is_addressable(&self) -> bool {
        self.flags.contains(ValueFlags::IS_ADDRESSABLE)
    }
    pub fn is_parameter(&self) -> bool {
        self.flags.contains(ValueFlags::IS_PARAMETER)
    }
    pub fn in_register(&self) -> bool {
        self.flags.contains(ValueFlags::IN_REGISTER)
    }
    pub fn has_global_register(&self) -> bool {
        self.flags.contains(ValueFlags::HAS_GLOBAL_REGISTER)
    }
    pub fn is_live(&self) -> bool {
        self.flags.contains(ValueFlags::LIVE)
    }
    pub fn next_use(&self) -> bool {
        self.flags.contains(ValueFlags::NEXT_USE)
    }

    /// Conservatively live at block entry: every non-temporary value
    /// (local, parameter, global) starts each block live.
    pub fn starts_block_live(&self) -> bool {
        !self.is_temporary()
    }

    pub fn bump_usage(&mut self) {
        self.usage_count = self.usage_count.saturating_add(1);
    }
}
