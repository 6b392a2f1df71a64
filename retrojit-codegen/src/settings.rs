//! Compilation tunables.
//!
//! Grounded in Cranelift's `settings::Flags` pattern (a small, cheaply
//! cloned struct of target/behavior knobs threaded through `Context`
//! instead of global mutable state) but shaped around the client-facing
//! tunables this crate exposes explicitly: cache sizing, pre-compile
//! opt-in, constant-folding, and position-independent code.

/// Optimization level requested for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimization beyond CFG cleanup and copy propagation.
    None,
    /// Default: CFG cleanup, copy propagation, global register allocation.
    Default,
}

impl Default for OptLevel {
    fn default() -> Self {
        OptLevel::Default
    }
}

/// Context-wide configuration.
#[derive(Debug, Clone)]
pub struct Flags {
    /// Default optimization level for newly created functions.
    pub opt_level: OptLevel,
    /// Whether `clean_cfg` and `compute_liveness` run copy propagation.
    pub enable_copy_propagation: bool,
    /// Whether global (callee-saved) register allocation runs at all.
    pub enable_global_regalloc: bool,
    /// Emit position-independent code from the reference backend.
    pub position_independent_code: bool,
    /// Disable the IR builder's constant folding of pure arithmetic ops.
    pub dont_fold_constants: bool,
    /// Soft cap, in bytes, on the executable memory cache. `0` means
    /// unbounded.
    pub cache_limit_bytes: usize,
    /// Page size requested from the memory manager on first allocation.
    pub cache_page_size: usize,
    /// Compile eagerly on `Function` creation instead of waiting for the
    /// first call through an on-demand driver.
    pub pre_compile: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            enable_copy_propagation: true,
            enable_global_regalloc: true,
            position_independent_code: false,
            dont_fold_constants: false,
            cache_limit_bytes: 0,
            cache_page_size: 64 * 1024,
            pre_compile: false,
        }
    }
}

impl Flags {
    /// Create flags with every optimization disabled, used by tests that
    /// want to inspect the IR before cleanup/propagation run.
    pub fn minimal() -> Self {
        Self {
            opt_level: OptLevel::None,
            enable_copy_propagation: false,
            enable_global_regalloc: false,
            ..Self::default()
        }
    }
}
