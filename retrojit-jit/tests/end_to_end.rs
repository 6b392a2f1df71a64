//! Builds functions through `retrojit-frontend` and calls the resulting
//! machine code back through a real function pointer, exercising the
//! whole pipeline: building, compiling, executing.

#![cfg(feature = "x64")]

use retrojit_codegen::ir::{Function, Opcode, Signature};
use retrojit_codegen::isa::x64::X64Isa;
use retrojit_codegen::types::{AbiCallConv, Type};
use retrojit_entity::EntityRef;
use retrojit_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use retrojit_jit::JitModule;

#[test]
fn adding_two_int_parameters_runs_through_real_machine_code() {
    let sig = Signature::new(AbiCallConv::Cdecl, Type::nint(), vec![Type::nint(), Type::nint()]);
    let mut func = Function::new("add", sig.clone());
    let mut fn_ctx = FunctionBuilderContext::new();

    {
        let mut fb = FunctionBuilder::new(&mut func, &mut fn_ctx);
        let (entry, _label) = fb.create_block();
        fb.switch_to_block(entry);
        let a = fb.append_block_param(entry, Type::nint());
        let b = fb.append_block_param(entry, Type::nint());
        let sum = fb.ins().binary(Opcode::Add, Type::nint(), a, b).unwrap();
        fb.ins().return_value(sum).unwrap();
        fb.finish().unwrap();
    }

    let isa = Box::new(X64Isa::new());
    let mut module = JitModule::new(isa).unwrap();
    let id = module.declare_function("add", sig).unwrap();
    module.define_function(id, &mut func).unwrap();

    let ptr = module.get_finalized_function(id).unwrap();
    let add: extern "C" fn(i64, i64) -> i64 = unsafe { std::mem::transmute(ptr) };
    assert_eq!(add(2, 3), 5);
    assert_eq!(add(-10, 4), -6);
}

#[test]
fn a_constant_folded_at_build_time_never_reaches_the_allocator() {
    let sig = Signature::new(AbiCallConv::Cdecl, Type::nint(), vec![]);
    let mut func = Function::new("answer", sig.clone());
    let mut fn_ctx = FunctionBuilderContext::new();

    {
        let mut fb = FunctionBuilder::new(&mut func, &mut fn_ctx);
        let (entry, _label) = fb.create_block();
        fb.switch_to_block(entry);
        let a = fb
            .ins()
            .constant(Type::nint(), retrojit_codegen::ir::ConstantPayload::NInt(40))
            .unwrap();
        let b = fb
            .ins()
            .constant(Type::nint(), retrojit_codegen::ir::ConstantPayload::NInt(2))
            .unwrap();
        let sum = fb.ins().binary(Opcode::Add, Type::nint(), a, b).unwrap();
        fb.ins().return_value(sum).unwrap();
        fb.finish().unwrap();
    }

    let isa = Box::new(X64Isa::new());
    let mut module = JitModule::new(isa).unwrap();
    let id = module.declare_function("answer", sig).unwrap();
    module.define_function(id, &mut func).unwrap();

    let ptr = module.get_finalized_function(id).unwrap();
    let answer: extern "C" fn() -> i64 = unsafe { std::mem::transmute(ptr) };
    assert_eq!(answer(), 42);
}

#[test]
fn a_variable_reassigned_across_a_branch_reads_back_through_real_code() {
    let sig = Signature::new(AbiCallConv::Cdecl, Type::nint(), vec![Type::nint()]);
    let mut func = Function::new("bump_if_positive", sig.clone());
    let mut fn_ctx = FunctionBuilderContext::new();

    {
        let mut fb = FunctionBuilder::new(&mut func, &mut fn_ctx);
        let (entry, _entry_label) = fb.create_block();
        let (exit, exit_label) = fb.create_block();
        fb.switch_to_block(entry);

        let x = Variable::new(0);
        fb.declare_var(x, Type::nint());
        let param = fb.append_block_param(entry, Type::nint());
        fb.def_var(x, param);

        let one = fb
            .ins()
            .constant(Type::nint(), retrojit_codegen::ir::ConstantPayload::NInt(1))
            .unwrap();
        let bumped = fb.ins().binary(Opcode::Add, Type::nint(), param, one).unwrap();
        fb.def_var(x, bumped);
        fb.ins().branch(exit_label).unwrap();

        fb.switch_to_block(exit);
        let result = fb.use_var(x);
        fb.ins().return_value(result).unwrap();
        fb.finish().unwrap();
    }

    let isa = Box::new(X64Isa::new());
    let mut module = JitModule::new(isa).unwrap();
    let id = module.declare_function("bump_if_positive", sig).unwrap();
    module.define_function(id, &mut func).unwrap();

    let ptr = module.get_finalized_function(id).unwrap();
    let bump: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(ptr) };
    assert_eq!(bump(10), 11);
}

#[test]
fn a_function_too_large_for_the_first_memory_region_still_compiles_after_restarting() {
    // One mmap region starts out a single page, far smaller than the
    // code this chain of adds emits, forcing `Context::compile`'s
    // restart-on-`MemoryFull` loop to grow the region (at least once)
    // before it succeeds. Run through `JitModule`'s real
    // `MmapMemoryManager`, not a mock, so the restart exercises the
    // actual mprotect/copy machinery, not just the driver's retry logic.
    const CHAIN_LEN: i64 = 5000;

    let sig = Signature::new(AbiCallConv::Cdecl, Type::nint(), vec![Type::nint()]);
    let mut func = Function::new("long_chain", sig.clone());
    let mut fn_ctx = FunctionBuilderContext::new();

    {
        let mut fb = FunctionBuilder::new(&mut func, &mut fn_ctx);
        let (entry, _label) = fb.create_block();
        fb.switch_to_block(entry);
        let mut acc = fb.append_block_param(entry, Type::nint());
        let one = fb
            .ins()
            .constant(Type::nint(), retrojit_codegen::ir::ConstantPayload::NInt(1))
            .unwrap();
        for _ in 0..CHAIN_LEN {
            acc = fb.ins().binary(Opcode::Add, Type::nint(), acc, one).unwrap();
        }
        fb.ins().return_value(acc).unwrap();
        fb.finish().unwrap();
    }

    let isa = Box::new(X64Isa::new());
    let mut module = JitModule::new(isa).unwrap();
    let id = module.declare_function("long_chain", sig).unwrap();
    module.define_function(id, &mut func).unwrap();

    let ptr = module.get_finalized_function(id).unwrap();
    let long_chain: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(ptr) };
    assert_eq!(long_chain(0), CHAIN_LEN);
}
