//! A minimal x86-64 SystemV reference emitter.
//!
//! Not a general-purpose backend: it covers the opcode subset this
//! crate's own end-to-end tests exercise (parameter binding, integer
//! arithmetic, copies, returns) and raises `MemoryFull` the moment its
//! buffer would overflow, so `context::Context::compile`'s restart loop
//! has something real to restart against. A production backend would
//! replace this module entirely.

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{Function, InstructionData, Opcode, Operand, Value};
use crate::isa::registers::RegUnit;
use crate::isa::x64::registers::{encoding, ARG_REGS, RETURN_REG};
use crate::isa::Emitter;
use crate::regalloc::{Allocation, Context as RegContext, RegisterRequest, ValueDescriptor};
use std::collections::HashMap;

pub struct X64Emitter {
    buf: Vec<u8>,
    capacity: usize,
    regs: RegContext,
    bound: HashMap<crate::ir::Value, RegUnit>,
    /// Frame bytes reserved by the prologue's `sub rsp` for spill slots,
    /// restored by a matching `add rsp` before every `ret`.
    frame_bytes: u32,
    /// A value's rsp-relative spill slot offset, assigned the first time
    /// it is ever spilled and stable for the rest of the compile.
    spill_slots: HashMap<Value, u32>,
    next_spill_slot: u32,
}

impl X64Emitter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            capacity: 0,
            regs: RegContext::new(),
            bound: HashMap::new(),
            frame_bytes: 0,
            spill_slots: HashMap::new(),
            next_spill_slot: 0,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> CodegenResult<()> {
        if self.buf.len() + bytes.len() > self.capacity {
            return Err(CodegenError::MemoryFull);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn rex(&mut self, w: bool, r: bool, b: bool) -> u8 {
        0x40 | ((w as u8) << 3) | ((r as u8) << 2) | (b as u8)
    }

    /// `mov dst, src` (both 64-bit GPRs).
    fn mov_reg_reg(&mut self, dst: RegUnit, src: RegUnit) -> CodegenResult<()> {
        if dst == src {
            return Ok(());
        }
        let (dst_enc, dst_ext) = encoding(dst);
        let (src_enc, src_ext) = encoding(src);
        let rex = self.rex(true, src_ext, dst_ext);
        let modrm = 0xC0 | (src_enc << 3) | dst_enc;
        self.push_bytes(&[rex, 0x89, modrm])
    }

    /// `add`/`sub dst, src`.
    fn alu_reg_reg(&mut self, opcode_byte: u8, dst: RegUnit, src: RegUnit) -> CodegenResult<()> {
        let (dst_enc, dst_ext) = encoding(dst);
        let (src_enc, src_ext) = encoding(src);
        let rex = self.rex(true, src_ext, dst_ext);
        let modrm = 0xC0 | (src_enc << 3) | dst_enc;
        self.push_bytes(&[rex, opcode_byte, modrm])
    }

    fn ret(&mut self) -> CodegenResult<()> {
        self.push_bytes(&[0xC3])
    }

    /// `sub rsp, bytes` (grow the frame) or `add rsp, bytes` (restore
    /// it), both 64-bit, immediate-32 encoded. A no-op when `bytes == 0`
    /// so functions that never spill emit no frame adjustment at all.
    fn adjust_rsp(&mut self, bytes: u32, grow: bool) -> CodegenResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        // ModRM opcode-extension digit: /5 (sub) or /0 (add).
        let digit: u8 = if grow { 5 } else { 0 };
        let rex = self.rex(true, false, false);
        let modrm = 0xC0 | (digit << 3) | 0b100;
        let mut encoded = vec![rex, 0x81, modrm];
        encoded.extend_from_slice(&bytes.to_le_bytes());
        self.push_bytes(&encoded)
    }

    /// `mov [rsp+offset], reg` — spill a value's register to its frame
    /// slot.
    fn store_to_slot(&mut self, reg: RegUnit, offset: u32) -> CodegenResult<()> {
        let (enc, ext) = encoding(reg);
        let rex = self.rex(true, ext, false);
        let modrm = 0x80 | (enc << 3) | 0b100;
        let mut encoded = vec![rex, 0x89, modrm, 0x24];
        encoded.extend_from_slice(&offset.to_le_bytes());
        self.push_bytes(&encoded)
    }

    /// `mov reg, [rsp+offset]` — reload a spilled value into a register.
    fn load_from_slot(&mut self, reg: RegUnit, offset: u32) -> CodegenResult<()> {
        let (enc, ext) = encoding(reg);
        let rex = self.rex(true, ext, false);
        let modrm = 0x80 | (enc << 3) | 0b100;
        let mut encoded = vec![rex, 0x8B, modrm, 0x24];
        encoded.extend_from_slice(&offset.to_le_bytes());
        self.push_bytes(&encoded)
    }

    /// The frame slot `value` spills into, assigning a fresh one the
    /// first time it is spilled.
    fn spill_slot_for(&mut self, value: Value) -> u32 {
        if let Some(&offset) = self.spill_slots.get(&value) {
            return offset;
        }
        let offset = self.next_spill_slot;
        self.next_spill_slot += 8;
        self.spill_slots.insert(value, offset);
        offset
    }

    /// Store every evicted value to its spill slot before the register
    /// that held it is reused, and drop its now-stale register binding.
    fn spill_evicted(&mut self, spills: &[(Value, RegUnit)]) -> CodegenResult<()> {
        for &(value, reg) in spills {
            let offset = self.spill_slot_for(value);
            self.store_to_slot(reg, offset)?;
            self.bound.remove(&value);
        }
        Ok(())
    }

    /// Choose a register for `value` (an instruction's destination, or a
    /// value being reloaded after a spill), spilling whatever it evicts
    /// first, and commit the allocator's bookkeeping for the new
    /// binding. `inputs` are this instruction's other live operands, so
    /// the allocator's cost model avoids evicting one of them.
    fn acquire_register(&mut self, value: Value, inputs: &[Value]) -> CodegenResult<RegUnit> {
        let class = crate::isa::x64::registers::gpr_class();
        let reg = self.regs.choose_output_register(&class, value, inputs, false);
        let mut alloc = Allocation {
            dest: Some(reg),
            ..Default::default()
        };
        if let Some(occupant) = self.regs.occupant_of(reg) {
            if occupant != value {
                alloc.spills.push((occupant, reg));
            }
        }
        self.spill_evicted(&alloc.spills)?;
        let req = RegisterRequest {
            dest: Some(ValueDescriptor {
                value,
                is_last_use: false,
                needs_register: true,
            }),
            ..Default::default()
        };
        self.regs.commit(&req, &alloc);
        Ok(reg)
    }

    /// The register currently holding `value`, reloading it from its
    /// spill slot if the allocator evicted it since it was last bound.
    fn binding_of(&mut self, value: crate::ir::Value) -> CodegenResult<RegUnit> {
        if let Some(&reg) = self.bound.get(&value) {
            return Ok(reg);
        }
        let offset = *self.spill_slots.get(&value).ok_or_else(|| {
            CodegenError::CompileError("value read before it was ever defined or spilled".into())
        })?;
        let reg = self.acquire_register(value, &[])?;
        self.load_from_slot(reg, offset)?;
        self.bound.insert(value, reg);
        Ok(reg)
    }

    /// Bind a parameter into its argument register both in `bound` (for
    /// `binding_of` lookups) and in the allocator's own occupancy map, so
    /// a later `allocate_dest` can see the register is live and evict it
    /// through a spill instead of silently overwriting it.
    fn bind_param(&mut self, value: Value, reg: RegUnit) {
        self.bound.insert(value, reg);
        let req = RegisterRequest {
            dest: Some(ValueDescriptor {
                value,
                is_last_use: false,
                needs_register: true,
            }),
            ..Default::default()
        };
        self.regs.commit(&req, &Allocation { dest: Some(reg), ..Default::default() });
    }
}

impl Default for X64Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter for X64Emitter {
    fn begin(&mut self, capacity: usize) {
        self.buf.clear();
        self.capacity = capacity;
        self.bound.clear();
        self.regs.reset();
        self.frame_bytes = 0;
        self.spill_slots.clear();
        self.next_spill_slot = 0;
    }

    fn emit_prologue(&mut self, func: &Function) -> CodegenResult<()> {
        // Conservative upper bound: at most one distinct value per slot,
        // and the function can never have more distinct values than
        // `func.values.len()`. Avoids a second emission pass or
        // backpatching the frame size once the real spill count is known.
        self.frame_bytes = func.values.len() as u32 * 8;
        self.adjust_rsp(self.frame_bytes, true)?;
        if let Some(entry) = func.entry_block() {
            for (i, &param) in func.block(entry).params.iter().enumerate() {
                if let Some(&reg) = ARG_REGS.get(i) {
                    self.bind_param(param, reg);
                }
            }
        }
        Ok(())
    }

    fn emit_instruction(&mut self, _func: &Function, inst: &InstructionData) -> CodegenResult<()> {
        match inst.opcode {
            Opcode::Copy => {
                let dest = inst.dest.expect("Copy has a destination");
                let src_value = inst.value1.as_value().expect("Copy reads a value");
                let src_reg = self.binding_of(src_value)?;
                let dest_reg = self.allocate_dest(dest, &[src_value])?;
                self.mov_reg_reg(dest_reg, src_reg)?;
            }
            Opcode::Add | Opcode::Sub => {
                let dest = inst.dest.expect("arithmetic op has a destination");
                let a = inst.value1.as_value().expect("binary op reads value1");
                let b = inst.value2.as_value().expect("binary op reads value2");
                let a_reg = self.binding_of(a)?;
                let b_reg = self.binding_of(b)?;
                let dest_reg = self.allocate_dest(dest, &[a, b])?;
                self.mov_reg_reg(dest_reg, a_reg)?;
                let opcode_byte = if inst.opcode == Opcode::Add { 0x01 } else { 0x29 };
                self.alu_reg_reg(opcode_byte, dest_reg, b_reg)?;
            }
            Opcode::Return => {
                let value = inst.value1.as_value().expect("Return reads a value");
                let reg = self.binding_of(value)?;
                self.mov_reg_reg(RETURN_REG, reg)?;
                self.adjust_rsp(self.frame_bytes, false)?;
                self.ret()?;
            }
            Opcode::ReturnVoid => {
                self.adjust_rsp(self.frame_bytes, false)?;
                self.ret()?;
            }
            other => {
                return Err(CodegenError::CompileError(format!(
                    "x64 reference backend does not support opcode {:?}",
                    other
                )))
            }
        }
        Ok(())
    }

    fn emit_epilogue(&mut self, _func: &Function) -> CodegenResult<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl X64Emitter {
    /// Choose and bind a destination register, spilling (with a real
    /// store, not silently overwriting) whatever value currently
    /// occupies it. `inputs` are this instruction's source operands, so
    /// a register that holds one of them costs more to reuse as the
    /// destination than a free one.
    fn allocate_dest(
        &mut self,
        dest: crate::ir::Value,
        inputs: &[crate::ir::Value],
    ) -> CodegenResult<RegUnit> {
        let reg = self.acquire_register(dest, inputs)?;
        self.bound.insert(dest, reg);
        Ok(reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrojit_entity::EntityRef;

    fn val(n: usize) -> Value {
        Value::new(n)
    }

    #[test]
    fn evicting_a_still_needed_value_spills_it_instead_of_overwriting_it() {
        let mut emitter = X64Emitter::new();
        emitter.begin(4096);

        let v0 = val(0);
        let v1 = val(1);

        let reg0 = emitter.acquire_register(v0, &[]).unwrap();
        emitter.bound.insert(v0, reg0);

        let before_len = emitter.buf.len();
        let reg1 = emitter.acquire_register(v1, &[]).unwrap();
        emitter.bound.insert(v1, reg1);

        assert_eq!(reg0, reg1, "the allocator is expected to reuse the same register here");
        assert!(
            emitter.buf.len() > before_len,
            "evicting v0 from its register must emit a real store, not just drop it"
        );
        assert!(emitter.spill_slots.contains_key(&v0));
        assert!(!emitter.bound.contains_key(&v0));

        let reload_before_len = emitter.buf.len();
        let reloaded = emitter.binding_of(v0).unwrap();
        assert!(
            emitter.buf.len() > reload_before_len,
            "reading v0 back after eviction must emit a real load"
        );
        assert_eq!(emitter.bound.get(&v0), Some(&reloaded));
    }

    #[test]
    fn reading_a_value_that_was_never_defined_or_spilled_is_an_error() {
        let mut emitter = X64Emitter::new();
        emitter.begin(4096);
        assert!(emitter.binding_of(val(7)).is_err());
    }
}
