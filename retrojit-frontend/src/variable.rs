use retrojit_entity::{entity_impl, EntityRef};

/// An opaque reference to a source-level local variable, as distinct
/// from the IR's own [`retrojit_codegen::ir::Value`]s.
///
/// Mirrors Cranelift's `cranelift_frontend::Variable`: frontends hand
/// out one `Variable` per source-language local and let this crate worry
/// about keeping its current value up to date as the block cursor moves.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(u32);
entity_impl!(Variable, "var");
