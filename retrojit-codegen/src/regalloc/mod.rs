//! Local register allocation: per-instruction assignment driven by an
//! explicit cost model, plus pre-codegen global register selection.

pub mod context;
pub mod global;
pub mod register_set;
pub mod request;

pub use context::{Allocation, Context, Location};
pub use global::assign_global_registers;
pub use register_set::RegisterSet;
pub use request::{RegisterRequest, ScratchDescriptor, ValueDescriptor};
