//! The single error taxonomy used across the core.
//!
//! Every fallible operation in the crate returns `Result<_, CodegenError>`
//! instead of calling into a `setjmp`/longjmp-style escape: the codegen
//! driver's restart loop is just a `match` on this enum (see
//! `context::Context::compile`), and `MemoryFull` never escapes past it.

use crate::ir::Block;
use thiserror::Error;

/// The result type used pervasively throughout the core.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Errors raised while building or compiling a function.
///
/// Mirrors the taxonomy of the original library's builtin exceptions:
/// user-visible runtime errors, allocation failure, IR inconsistency, and
/// the internal-only `MemoryFull` signal consumed by the restart loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// Arithmetic overflow detected by a checked operation.
    #[error("arithmetic overflow")]
    Overflow,
    /// Generic arithmetic error (e.g. invalid float-to-int conversion).
    #[error("arithmetic error")]
    Arithmetic,
    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Dereference of a null reference at a point where it is required to be
    /// non-null.
    #[error("null reference")]
    NullReference,
    /// Call through a null function pointer.
    #[error("null function")]
    NullFunction,
    /// A null reference was passed as an argument where non-null was
    /// required.
    #[error("null reference argument")]
    NullReferenceArg,
    /// Allocation failed anywhere in the builder or the driver.
    #[error("out of memory")]
    OutOfMemory,
    /// The IR is internally inconsistent in a way that defeats
    /// compilation, e.g. no register in the required class satisfies the
    /// allocator's constraint set.
    #[error("compile error: {0}")]
    CompileError(String),
    /// A branch or jump-table entry refers to a label that was never bound
    /// to a block.
    #[error("undefined label referenced from block {0}")]
    UndefinedLabel(Block),
    /// Internal only: the backend's code buffer overflowed mid-instruction.
    /// Always caught by `Context::compile`'s restart loop; never observed
    /// by callers of the public API.
    #[error("memory full (internal restart signal)")]
    MemoryFull,
}
