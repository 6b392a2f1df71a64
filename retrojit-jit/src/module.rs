//! A function registry tying declared, defined and finalized functions
//! together, the way `cranelift-simplejit`'s `Module` does.

use crate::memory::MmapMemoryManager;
use retrojit_codegen::context::Context as CodegenContext;
use retrojit_codegen::ir::{Function, Signature};
use retrojit_codegen::isa::TargetIsa;
use retrojit_codegen::settings::Flags;
use retrojit_entity::{entity_impl, EntityRef, PrimaryMap};
use std::collections::HashMap;
use thiserror::Error;

/// An opaque handle to a function declared in a [`JitModule`], stable
/// across `declare_function`/`define_function`/`get_finalized_function`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(u32);
entity_impl!(FuncId, "func");

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("function {0:?} was never defined")]
    Undefined(String),
    #[error("duplicate declaration of function {0:?}")]
    Duplicate(String),
    #[error(transparent)]
    Codegen(#[from] retrojit_codegen::error::CodegenError),
}

struct Declaration {
    name: String,
    signature: Signature,
    entry_point: Option<usize>,
}

/// An in-process JIT: owns the executable memory, the target ISA, and a
/// name -> [`FuncId`] registry, mirroring `cranelift-simplejit::JITModule`.
pub struct JitModule {
    context: CodegenContext,
    decls: PrimaryMap<FuncId, Declaration>,
    by_name: HashMap<String, FuncId>,
}

impl JitModule {
    pub fn new(isa: Box<dyn TargetIsa>) -> Result<Self, ModuleError> {
        let memory = Box::new(MmapMemoryManager::new()?);
        Ok(Self {
            context: CodegenContext::new(Flags::default(), isa, memory),
            decls: PrimaryMap::new(),
            by_name: HashMap::new(),
        })
    }

    /// Reserve a name and signature ahead of defining the function body,
    /// so mutually recursive functions can reference each other's
    /// `FuncId` before either is compiled.
    pub fn declare_function(
        &mut self,
        name: &str,
        signature: Signature,
    ) -> Result<FuncId, ModuleError> {
        if self.by_name.contains_key(name) {
            return Err(ModuleError::Duplicate(name.to_string()));
        }
        let id = self.decls.push(Declaration {
            name: name.to_string(),
            signature,
            entry_point: None,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Compile `func`'s body and record its entry point against `id`.
    pub fn define_function(&mut self, id: FuncId, func: &mut Function) -> Result<(), ModuleError> {
        self.context.compile(func)?;
        let compiled = func
            .compiled
            .as_ref()
            .expect("Context::compile populates func.compiled on success");
        self.decls[id].entry_point = compiled.entry_point;
        Ok(())
    }

    /// Look up a raw pointer to a defined function's code.
    ///
    /// # Safety
    ///
    /// The caller must transmute this to a function pointer matching the
    /// signature passed to `declare_function`; nothing here checks that.
    pub fn get_finalized_function(&self, id: FuncId) -> Result<*const u8, ModuleError> {
        self.decls[id]
            .entry_point
            .map(|p| p as *const u8)
            .ok_or_else(|| ModuleError::Undefined(self.decls[id].name.clone()))
    }

    pub fn lookup(&self, name: &str) -> Option<FuncId> {
        self.by_name.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrojit_codegen::types::{AbiCallConv, Type};

    #[cfg(feature = "x64")]
    #[test]
    fn declaring_twice_under_the_same_name_is_rejected() {
        let isa = Box::new(retrojit_codegen::isa::x64::X64Isa::new());
        let mut module = JitModule::new(isa).unwrap();
        let sig = Signature::new(AbiCallConv::Cdecl, Type::void(), vec![]);
        module.declare_function("f", sig.clone()).unwrap();
        assert!(module.declare_function("f", sig).is_err());
    }
}
