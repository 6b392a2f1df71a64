//! Umbrella crate re-exporting the commonly-used pieces of the
//! `retrojit` workspace, the way Cranelift's `cranelift` crate
//! re-exports `cranelift-codegen` and `cranelift-frontend` for callers
//! who don't want to depend on each satellite crate by hand.

pub use retrojit_codegen as codegen;
pub use retrojit_frontend as frontend;
pub use retrojit_jit as jit;
pub use retrojit_native as native;

/// The prelude a typical client of this library needs: the IR builder,
/// the codegen context, and the JIT execution engine.
pub mod prelude {
    pub use retrojit_codegen::context::Context;
    pub use retrojit_codegen::ir::{Builder, BuilderContext, Function, Signature};
    pub use retrojit_codegen::settings::Flags;
    pub use retrojit_codegen::types::{AbiCallConv, Type};
    pub use retrojit_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
    pub use retrojit_jit::{FuncId, JitModule};
}
