//! Global (callee-saved) register candidate selection.
//!
//! A pre-codegen scan, not a part of the per-instruction allocator
//! itself. Grounded in Cranelift's `isa::RegInfo`/register-pressure-
//! tracking idiom for enumerating a class's registers, generalized to
//! rank by usage count rather than by live-range pressure since this
//! crate's allocator has no live ranges to track.

use crate::ir::{Function, Value};
use crate::isa::registers::RegClass;
use crate::types::TypeKind;
use std::collections::HashMap;

const MIN_USAGE_COUNT: u32 = 3;

fn is_global_candidate_type(ty: &crate::types::Type) -> bool {
    matches!(
        ty.kind(),
        TypeKind::SByte
        | TypeKind::UByte
        | TypeKind::Short
        | TypeKind::UShort
        | TypeKind::Int
        | TypeKind::UInt
        | TypeKind::NInt
        | TypeKind::NUInt
        | TypeKind::Long
        | TypeKind::ULong
        | TypeKind::Pointer(_)
    )
}

/// True if `func` contains a construct that makes global-register
/// allocation unsafe: this crate has no `try`/tail-call
/// IR construct, so this is always `false` here; kept as an explicit
/// extension point for a future ABI feature, documented in DESIGN.md.
fn has_unwind_or_tail_call(_func: &Function) -> bool {
    false
}

/// Scan every value in `func`, rank candidates by usage count, and
/// assign the highest-ranked ones to global registers (highest-numbered
/// register first), up to the class's global-register budget.
pub fn assign_global_registers(
    func: &Function,
    class: &RegClass,
) -> HashMap<Value, crate::isa::registers::RegUnit> {
    let mut assignment = HashMap::new();
    if has_unwind_or_tail_call(func) {
        return assignment;
    }

    let mut candidates: Vec<(Value, u32)> = func
        .values
        .iter()
        .filter(|(_, data)| {
            is_global_candidate_type(&data.ty)
                && data.usage_count >= MIN_USAGE_COUNT
                && !data.is_volatile()
                && !data.is_addressable()
        })
        .map(|(v, data)| (v, data.usage_count))
        .collect();

    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    let global_units: Vec<_> = class.global_units().collect();
    for (reg, (value, _count)) in global_units.iter().rev().zip(candidates) {
        assignment.insert(value, *reg);
    }

    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Signature};
    use crate::isa::registers::RegBank;
    use crate::types::{AbiCallConv, Type};

    fn gpr() -> RegClass {
        RegClass {
            name: "gpr",
            bank: RegBank::Integer,
            first_unit: 0,
            num_regs: 6,
            num_flat: 3,
            paired: false,
        }
    }

    #[test]
    fn only_values_used_at_least_three_times_are_candidates() {
        let mut func = Function::new("f", Signature::new(AbiCallConv::Cdecl, Type::void(), vec![]));
        let (b0, _) = func.create_block();
        let frequent = func.create_value(b0, Type::int());
        let rare = func.create_value(b0, Type::int());
        func.values.get_mut(frequent).unwrap().usage_count = 5;
        func.values.get_mut(rare).unwrap().usage_count = 1;

        let assignment = assign_global_registers(&func, &gpr());
        assert!(assignment.contains_key(&frequent));
        assert!(!assignment.contains_key(&rare));
    }

    #[test]
    fn a_volatile_value_is_never_promoted_even_if_used_often() {
        use crate::ir::ValueFlags;

        let mut func = Function::new("f", Signature::new(AbiCallConv::Cdecl, Type::void(), vec![]));
        let (b0, _) = func.create_block();
        let stable = func.create_value(b0, Type::int());
        let volatile = func.create_value(b0, Type::int());
        func.values.get_mut(stable).unwrap().usage_count = 5;
        func.values.get_mut(volatile).unwrap().usage_count = 5;
        func.values
            .get_mut(volatile)
            .unwrap()
            .flags
            .insert(ValueFlags::IS_VOLATILE);

        let assignment = assign_global_registers(&func, &gpr());
        assert!(assignment.contains_key(&stable));
        assert!(
            !assignment.contains_key(&volatile),
            "a volatile value must never be considered for a global register"
        );
    }
}
