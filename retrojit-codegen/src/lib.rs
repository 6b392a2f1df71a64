//! Low-level retargetable JIT code generator.
//!
//! This crate implements the core of a just-in-time compiler: a typed,
//! three-address intermediate representation, control flow graph
//! construction and cleanup, liveness analysis with copy propagation, a
//! cost-model local register allocator, and a restart-on-overflow
//! codegen driver that emits into client-managed executable memory.
//!
//! Concrete per-architecture instruction encoders live behind the
//! [`isa::Emitter`] trait; this crate bundles one reference backend
//! (`isa::x64`, behind the `x64` feature) sufficient to compile and run
//! the functions in this crate's own test suite.

#![deny(unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod binemit;
pub mod clean;
pub mod context;
pub mod error;
pub mod flowgraph;
pub mod ir;
pub mod isa;
pub mod liveness;
pub mod memory;
pub mod regalloc;
pub mod settings;
pub mod types;

pub use crate::context::Context;
pub use crate::error::{CodegenError, CodegenResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
