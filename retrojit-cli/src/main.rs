//! A small demo CLI exercising `retrojit` end to end: build a function
//! with the frontend builder, JIT-compile it, and call it.
//!
//! Grounded in Cranelift's CLI conventions: a `clap` derive parser and
//! `env_logger` wired to `-v`/`RUST_LOG`, the same pair `wasmtime-cli`
//! uses.

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use retrojit::codegen::ir::{Opcode, Signature};
use retrojit::codegen::types::{AbiCallConv, Type};
use retrojit::jit::JitModule;
use retrojit::native;
use retrojit_entity::EntityRef;
use retrojit_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};

#[derive(Parser)]
#[command(name = "retrojit-cli", about = "Compile and run small demo functions with retrojit")]
struct Cli {
    /// Increase log verbosity (-v, -vv, ...).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Compile `fn add(a, b) -> a + b` and call it with the given
    /// arguments.
    Add { a: i64, b: i64 },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    match cli.command {
        Command::Add { a, b } => run_add(a, b),
    }
}

fn run_add(a: i64, b: i64) -> Result<()> {
    let isa = native::builder().map_err(anyhow::Error::msg)?;
    let mut module = JitModule::new(isa).context("setting up the JIT module")?;

    let sig = Signature::new(AbiCallConv::Cdecl, Type::nint(), vec![Type::nint(), Type::nint()]);
    let id = module.declare_function("add", sig.clone())?;

    let mut func = retrojit::codegen::ir::Function::new("add", sig);
    let mut fn_ctx = FunctionBuilderContext::new();
    {
        let mut fb = FunctionBuilder::new(&mut func, &mut fn_ctx);
        let (entry, _label) = fb.create_block();
        fb.switch_to_block(entry);
        let p0 = fb.append_block_param(entry, Type::nint());
        let p1 = fb.append_block_param(entry, Type::nint());

        let x = Variable::new(0);
        let y = Variable::new(1);
        fb.declare_var(x, Type::nint());
        fb.declare_var(y, Type::nint());
        fb.def_var(x, p0);
        fb.def_var(y, p1);

        let xv = fb.use_var(x);
        let yv = fb.use_var(y);
        let sum = fb.ins().binary(Opcode::Add, Type::nint(), xv, yv)?;
        fb.ins().return_value(sum)?;
        fb.finish()?;
    }

    module.define_function(id, &mut func)?;
    let entry = module.get_finalized_function(id)?;
    if entry.is_null() {
        bail!("compiled function has a null entry point");
    }

    let add_fn: extern "C" fn(i64, i64) -> i64 = unsafe { std::mem::transmute(entry) };
    let result = add_fn(a, b);
    println!("{a} + {b} = {result}");

    Ok(())
}
