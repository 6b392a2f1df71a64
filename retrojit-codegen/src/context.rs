//! The top-level compilation driver.
//!
//! Grounded in Cranelift's `Context` (a persistent struct reused
//! across compiles, holding long-lived allocator/ISA state so repeated
//! compiles in one process don't re-warm caches) but the `compile`
//! method itself implements restart-on-overflow loop, not
//! Cranelift's single-shot legalize/regalloc/emit pipeline. Concurrency
//! follows this crate: a `build_lock` serializes function construction
//! within a context, a `memory_lock` serializes access to the executable
//! memory manager.

use crate::binemit::{OffsetEncoder, VarintOffsetTable};
use crate::error::{CodegenError, CodegenResult};
use crate::flowgraph::build_cfg;
use crate::ir::{Function, Opcode};
use crate::isa::TargetIsa;
use crate::liveness::{compute_liveness, propagate_copies};
use crate::memory::{MemoryManager, MemoryStatus};
use crate::regalloc;
use crate::settings::Flags;
use std::sync::Mutex;

/// A compilation context: one per client-visible "JIT instance". Owns
/// the target ISA, the executable memory manager, and the reusable
/// allocator state, all behind the two locks this crate calls out.
pub struct Context {
    flags: Flags,
    isa: Box<dyn TargetIsa>,
    build_lock: Mutex<()>,
    memory_lock: Mutex<Box<dyn MemoryManager>>,
    regalloc: Mutex<regalloc::Context>,
}

const MAX_RESTARTS: u32 = 8;

impl Context {
    pub fn new(flags: Flags, isa: Box<dyn TargetIsa>, memory: Box<dyn MemoryManager>) -> Self {
        Self {
            flags,
            isa,
            build_lock: Mutex::new(()),
            memory_lock: Mutex::new(memory),
            regalloc: Mutex::new(regalloc::Context::new()),
        }
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Run CFG construction, cleanup and copy propagation, but not
    /// register allocation or code emission. Idempotent: calling it
    /// again on an already-optimized function is a no-op beyond
    /// rebuilding the CFG.
    pub fn optimize(&self, func: &mut Function) -> CodegenResult<()> {
        build_cfg(func)?;
        if self.flags.opt_level != crate::settings::OptLevel::None {
            crate::clean::clean_cfg(func)?;
        }
        compute_liveness(func);
        if self.flags.enable_copy_propagation {
            propagate_copies(func);
        }
        Ok(())
    }

    fn codegen_prepare(&self, func: &mut Function, class: &crate::isa::registers::RegClass) {
        compute_liveness(func);
        if self.flags.enable_global_regalloc {
            let assignment = regalloc::assign_global_registers(func, class);
            self.regalloc.lock().unwrap().set_global_assignment(assignment);
        }
    }

    /// Reset per-value/per-block codegen state ahead of a restart:
    /// residency is cleared but constant payloads, already-assigned
    /// frame offsets, and global register bindings survive.
    fn cleanup_on_restart(&self, func: &mut Function) {
        for (_, data) in func.values.iter_mut() {
            data.reg = crate::ir::value::NO_REGISTER;
            data.reg_pair = crate::ir::value::NO_REGISTER;
            data.flags.remove(
                crate::ir::ValueFlags::IN_REGISTER
                | crate::ir::ValueFlags::IN_GLOBAL_REGISTER,
            );
        }
        self.regalloc.lock().unwrap().reset();
    }

    /// Compile `func` into executable code, honoring the restart-on-
    /// overflow loop this crate uses when the memory manager runs out
    /// of room mid-function. On success, `func.compiled` is populated
    /// with the entry point and code size.
    pub fn compile(&self, func: &mut Function) -> CodegenResult<()> {
        let _build_guard = self.build_lock.lock().unwrap();

        let class = self
            .isa
            .reg_info()
            .class("gpr")
            .ok_or_else(|| CodegenError::CompileError("backend has no gpr class".into()))?
            .clone();

        self.optimize(func)?;
        self.codegen_prepare(func, &class);

        let mut page_factor = 0u32;
        let mut restart = 0u32;

        loop {
            let mut memory = self.memory_lock.lock().unwrap();
            let needs_growth = if restart == 0 {
                memory.start_function()? == MemoryStatus::Restart
            } else {
                self.cleanup_on_restart(func);
                true
            };
            if needs_growth {
                memory.extend_limit(page_factor)?;
                if restart == 0 {
                    memory.start_function()?;
                }
            }

            let mut emitter = self.isa.make_emitter();
            emitter.begin(memory.capacity());

            let result = self.emit_function_body(func, &*class, emitter.as_mut());

            match result {
                Ok(offsets) => {
                    memory.end_function(MemoryStatus::Ok)?;
                    let code = emitter.finish();
                    let extent = memory.get_function_extent();
                    func.compiled = Some(crate::ir::CompiledEntry {
                        entry_point: Some(extent.start),
                        code_size: code.len() as u32,
                        frame_size: 0,
                        bytecode_offsets: offsets.finish(),
                    });
                    return Ok(());
                }
                Err(CodegenError::MemoryFull) => {
                    memory.end_function(MemoryStatus::Restart)?;
                    restart += 1;
                    page_factor += 1;
                    if restart > MAX_RESTARTS {
                        return Err(CodegenError::OutOfMemory);
                    }
                    continue;
                }
                Err(other) => {
                    memory.end_function(MemoryStatus::Restart)?;
                    return Err(other);
                }
            }
        }
    }

    /// Emit every block in layout order, dispatching each instruction
    /// through the allocator and the backend emitter
    /// opcode dispatch table.
    fn emit_function_body(
        &self,
        func: &Function,
        class: &crate::isa::registers::RegClass,
        emitter: &mut dyn crate::isa::Emitter,
    ) -> CodegenResult<Box<dyn OffsetEncoder>> {
        let mut offsets: Box<dyn OffsetEncoder> = Box::new(VarintOffsetTable::new());

        emitter.emit_prologue(func)?;

        for &block in &func.layout {
            for inst in &func.block(block).insts {
                match inst.opcode {
                    Opcode::Nop => continue,
                    Opcode::CheckNull => {
                        // Elided here when the allocator already knows the
                        // value is non-null; the reference backend always
                        // emits the check, leaving the optimization to a
                        // smarter future backend.
                        emitter.emit_instruction(func, inst)?;
                    }
                    Opcode::MarkOffset => {
                        if let crate::ir::Operand::Offset(bc_off) = inst.value1 {
                            offsets.record(bc_off, emitter.len() as u32);
                        }
                    }
                    _ => {
                        let _ = class;
                        emitter.emit_instruction(func, inst)?;
                    }
                }
            }
        }

        emitter.emit_epilogue(func)?;
        Ok(offsets)
    }
}
