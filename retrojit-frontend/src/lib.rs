//! An ergonomic variable-based builder facade over `retrojit-codegen`'s
//! block-cursor [`Builder`](retrojit_codegen::ir::Builder).
//!
//! Grounded in the split Cranelift's `cranelift-frontend` crate makes
//! between a per-function cursor (here, [`FunctionBuilder`]) and a
//! reusable, pool-backed context ([`FunctionBuilderContext`]) that is
//! cleared rather than dropped between functions. The one place this
//! crate diverges from Cranelift's `FunctionBuilder`: Cranelift's IR
//! is strict SSA, so a reassigned source variable needs a new value and
//! a block-parameter phi at every merge point (`SSABuilder`). This
//! workspace's IR instead lets a value be read from any block once
//! promoted to `local` (see `retrojit_codegen::ir::ValueFlags`), the way
//! the libjit-style IR it's grounded on treats local variables as
//! ordinary mutable values. So a [`Variable`] here is just a stable
//! binding to the most recently assigned [`retrojit_codegen::ir::Value`]
//! — no phi insertion, no block sealing.
//!
//! # Panics
//!
//! Like Cranelift's crate, the functions below panic (via
//! `debug_assert!` in debug builds) when asked to do something that
//! would produce an incoherent function, such as reading a variable
//! before it has ever been defined.

mod variable;

pub use variable::Variable;

use log::trace;
use retrojit_codegen::error::CodegenResult;
use retrojit_codegen::ir::{Block, Builder, BuilderContext, Function, Label, Value};
use retrojit_codegen::types::Type;
use std::collections::HashMap;

/// Reusable scratch state shared across many [`FunctionBuilder`] sessions.
///
/// Kept separate from [`FunctionBuilder`] itself so a frontend translating
/// many functions in a loop can reuse one context's allocations, mirroring
/// `cranelift_frontend::FunctionBuilderContext`.
#[derive(Default)]
pub struct FunctionBuilderContext {
    inner: BuilderContext,
    types: HashMap<Variable, Type>,
    bindings: HashMap<Variable, Value>,
}

impl FunctionBuilderContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.types.clear();
        self.bindings.clear();
    }
}

/// A cursor for translating a single function body, one source-level
/// construct at a time, into a `retrojit_codegen::ir::Function`.
pub struct FunctionBuilder<'a> {
    builder: Builder<'a>,
    types: &'a mut HashMap<Variable, Type>,
    bindings: &'a mut HashMap<Variable, Value>,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(func: &'a mut Function, fn_ctx: &'a mut FunctionBuilderContext) -> Self {
        fn_ctx.clear();
        // Destructuring borrows `inner`, `types` and `bindings` as three
        // independent `&'a mut` reborrows of disjoint fields, so `Builder`
        // can hold onto `inner` for `'a` while this struct keeps using
        // the other two — no aliasing, no unsafe needed.
        let FunctionBuilderContext {
            inner,
            types,
            bindings,
        } = fn_ctx;
        Self {
            builder: Builder::new(func, inner),
            types,
            bindings,
        }
    }

    pub fn create_block(&mut self) -> (Block, Label) {
        self.builder.create_block()
    }

    pub fn switch_to_block(&mut self, block: Block) {
        self.builder.switch_to_block(block);
    }

    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        self.builder.append_block_param(block, ty)
    }

    /// Declare the type of a source-level local. Must be called before
    /// the first `def_var`/`use_var` for this variable.
    pub fn declare_var(&mut self, var: Variable, ty: Type) {
        self.types.insert(var, ty);
    }

    /// Bind `var` to `value` from this point forward in program order.
    pub fn def_var(&mut self, var: Variable, value: Value) {
        trace!("def_var {:?} = {:?}", var, value);
        self.bindings.insert(var, value);
    }

    /// Read the current value of `var`.
    ///
    /// # Panics
    ///
    /// Panics if `var` has never been defined on any path reaching this
    /// point — callers are expected to `def_var` every local before its
    /// first use, the same requirement Cranelift's crate places on
    /// `use_var`.
    pub fn use_var(&mut self, var: Variable) -> Value {
        *self
            .bindings
            .get(&var)
            .unwrap_or_else(|| panic!("variable {:?} used before it was defined", var))
    }

    pub fn ins(&mut self) -> Inserter<'_, 'a> {
        Inserter { fb: self }
    }

    pub fn create_frame_slot(&mut self, size: u32, align: u32) -> retrojit_codegen::ir::FrameSlot {
        self.builder.create_frame_slot(size, align)
    }

    pub fn finish(self) -> CodegenResult<()> {
        self.builder.finish()
    }
}

/// A thin wrapper exposing the block-cursor's instruction-emitting
/// methods, named `ins()` to match Cranelift's `FuncInstBuilder`
/// access pattern (`builder.ins().iadd(a, b)`-style call sites).
pub struct Inserter<'f, 'a> {
    fb: &'f mut FunctionBuilder<'a>,
}

impl<'f, 'a> Inserter<'f, 'a> {
    pub fn binary(
        &mut self,
        opcode: retrojit_codegen::ir::Opcode,
        ty: Type,
        a: Value,
        b: Value,
    ) -> CodegenResult<Value> {
        self.fb.builder.binary(opcode, ty, a, b)
    }

    pub fn unary(
        &mut self,
        opcode: retrojit_codegen::ir::Opcode,
        ty: Type,
        a: Value,
    ) -> CodegenResult<Value> {
        self.fb.builder.unary(opcode, ty, a)
    }

    pub fn constant(
        &mut self,
        ty: Type,
        payload: retrojit_codegen::ir::ConstantPayload,
    ) -> CodegenResult<Value> {
        self.fb.builder.constant(ty, payload)
    }

    pub fn branch(&mut self, target: Label) -> CodegenResult<()> {
        self.fb.builder.branch(target)
    }

    pub fn branch_if(&mut self, cond: Value, target: Label) -> CodegenResult<()> {
        self.fb.builder.branch_if(cond, target)
    }

    pub fn branch_if_not(&mut self, cond: Value, target: Label) -> CodegenResult<()> {
        self.fb.builder.branch_if_not(cond, target)
    }

    pub fn return_value(&mut self, value: Value) -> CodegenResult<()> {
        self.fb.builder.return_value(value)
    }

    pub fn return_void(&mut self) -> CodegenResult<()> {
        self.fb.builder.return_void()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrojit_codegen::ir::{Function, Opcode, Signature};
    use retrojit_codegen::types::Type;
    use retrojit_entity::EntityRef;

    #[test]
    fn variable_reads_back_most_recent_definition() {
        let sig = Signature::new(
            retrojit_codegen::types::AbiCallConv::Cdecl,
            Type::nint(),
            vec![Type::nint()],
        );
        let mut func = Function::new("add_one", sig);
        let mut fn_ctx = FunctionBuilderContext::new();
        let mut fb = FunctionBuilder::new(&mut func, &mut fn_ctx);

        let (entry, _label) = fb.create_block();
        fb.switch_to_block(entry);
        let param = fb.append_block_param(entry, Type::nint());

        let x = Variable::new(0);
        fb.declare_var(x, Type::nint());
        fb.def_var(x, param);

        let one = fb
            .ins()
            .constant(Type::nint(), retrojit_codegen::ir::ConstantPayload::NInt(1))
            .unwrap();
        let xv = fb.use_var(x);
        let sum = fb.ins().binary(Opcode::Add, Type::nint(), xv, one).unwrap();
        fb.def_var(x, sum);

        let result = fb.use_var(x);
        fb.ins().return_value(result).unwrap();
        fb.finish().unwrap();

        assert_eq!(func.block(entry).insts.len(), 2);
    }

    #[test]
    #[should_panic(expected = "used before it was defined")]
    fn using_an_undefined_variable_panics() {
        let sig = Signature::new(retrojit_codegen::types::AbiCallConv::Cdecl, Type::void(), vec![]);
        let mut func = Function::new("bad", sig);
        let mut fn_ctx = FunctionBuilderContext::new();
        let mut fb = FunctionBuilder::new(&mut func, &mut fn_ctx);
        let (entry, _) = fb.create_block();
        fb.switch_to_block(entry);

        let x = Variable::new(0);
        fb.declare_var(x, Type::nint());
        let _ = fb.use_var(x);
    }
}
