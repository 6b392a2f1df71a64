//! Support for targeting the host machine.
//!
//! Grounded in Cranelift's `cranelift-native` crate (only its
//! `Cargo.toml` survived into the retrieval pack, not its source): a
//! one-function crate whose job is to look at `target_lexicon::HOST` and
//! hand back a `Box<dyn TargetIsa>` for whatever's actually running this
//! process, so callers building a JIT don't have to name an architecture
//! themselves.

use retrojit_codegen::isa::TargetIsa;
use target_lexicon::{Architecture, Triple};

/// Build a [`TargetIsa`] for the host this process is running on.
///
/// Returns `Err` with a human-readable reason when the host architecture
/// has no backend in this build (either because it isn't x86-64, or
/// because the crate was built without the `x64` feature).
pub fn builder() -> Result<Box<dyn TargetIsa>, String> {
    isa_for(&Triple::host())
}

fn isa_for(triple: &Triple) -> Result<Box<dyn TargetIsa>, String> {
    match triple.architecture {
        #[cfg(feature = "x64")]
        Architecture::X86_64 => Ok(Box::new(retrojit_codegen::isa::x64::X64Isa::new())),
        other => Err(format!(
            "no retrojit backend available for host architecture {:?}",
            other
        )),
    }
}

/// CPU feature flags detected on the host, queried via `raw-cpuid` on
/// x86-64. Not yet consulted by the reference backend (which targets a
/// lowest-common-denominator SystemV subset), but kept so a future
/// backend can legalize differently depending on, e.g., the presence of
/// AVX.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod host_features {
    /// Whether the host CPU advertises the given feature leaf.
    pub fn has_popcnt() -> bool {
        raw_cpuid::CpuId::new()
            .get_feature_info()
            .map(|f| f.has_popcnt())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_architecture_is_rejected() {
        let triple: Triple = "wasm32-unknown-unknown".parse().unwrap();
        let result = isa_for(&triple);
        assert!(result.is_err());
    }

    #[test]
    #[cfg(feature = "x64")]
    fn host_x86_64_resolves_to_the_bundled_backend() {
        let triple = Triple::host();
        if triple.architecture == Architecture::X86_64 {
            assert!(builder().is_ok());
        }
    }
}
