//! An mmap-backed JIT execution engine for `retrojit-codegen`.
//!
//! Grounded in `cranelift-simplejit`: a [`memory::MmapMemoryManager`]
//! implementing `retrojit_codegen::memory::MemoryManager` via the
//! `region` crate, and a [`module::JitModule`] tying declared function
//! names to compiled entry points.

pub mod memory;
pub mod module;

pub use memory::MmapMemoryManager;
pub use module::{FuncId, JitModule, ModuleError};
