//! End-to-end properties of the local register allocator that are
//! easiest to state across several instructions in a row, rather than
//! inside `regalloc::context`'s own unit tests.

use retrojit_codegen::ir::Value;
use retrojit_codegen::isa::registers::{RegBank, RegClass};
use retrojit_codegen::regalloc::{Context, RegisterRequest, ScratchDescriptor, ValueDescriptor};
use retrojit_entity::EntityRef;
use smallvec::smallvec;

fn gpr() -> RegClass {
    RegClass {
        name: "gpr",
        bank: RegBank::Integer,
        first_unit: 0,
        num_regs: 4,
        num_flat: 3,
        paired: false,
    }
}

fn dest_req(value: Value) -> RegisterRequest {
    RegisterRequest {
        dest: Some(ValueDescriptor {
            value,
            is_last_use: false,
            needs_register: true,
        }),
        ..Default::default()
    }
}

#[test]
fn two_values_live_across_the_same_instruction_never_share_a_register() {
    let mut ctx = Context::new();
    let class = gpr();

    let a = Value::new(0);
    let b = Value::new(1);

    let a_alloc = ctx.allocate(&class, &dest_req(a));
    ctx.commit(&dest_req(a), &a_alloc);

    let req = RegisterRequest {
        dest: Some(ValueDescriptor {
            value: b,
            is_last_use: false,
            needs_register: true,
        }),
        value1: Some(ValueDescriptor {
            value: a,
            is_last_use: false,
            needs_register: true,
        }),
        ..Default::default()
    };
    let alloc = ctx.allocate(&class, &req);
    ctx.commit(&req, &alloc);

    assert_ne!(alloc.dest, alloc.value1, "dest and a live input must land in different registers");
}

#[test]
fn a_register_occupied_by_a_still_needed_value_is_spilled_not_silently_overwritten() {
    let mut ctx = Context::new();
    // Every unit is a flat candidate, so the allocator has nowhere to
    // put a second value except a register already holding the first.
    let class = RegClass {
        name: "gpr",
        bank: RegBank::Integer,
        first_unit: 0,
        num_regs: 1,
        num_flat: 1,
        paired: false,
    };

    let resident = Value::new(0);
    let resident_alloc = ctx.allocate(&class, &dest_req(resident));
    ctx.commit(&dest_req(resident), &resident_alloc);

    let newcomer = Value::new(1);
    let alloc = ctx.allocate(&class, &dest_req(newcomer));

    assert_eq!(alloc.dest, resident_alloc.dest, "only one register exists");
    assert_eq!(
        alloc.spills.to_vec(),
        vec![(resident, resident_alloc.dest.unwrap())],
        "the evicted resident must be recorded for a spill store, not dropped"
    );
}

#[test]
fn scratch_registers_never_collide_with_operand_registers() {
    let mut ctx = Context::new();
    let class = gpr();

    let dest = Value::new(0);
    let value1 = Value::new(1);
    let req = RegisterRequest {
        dest: Some(ValueDescriptor {
            value: dest,
            is_last_use: false,
            needs_register: true,
        }),
        value1: Some(ValueDescriptor {
            value: value1,
            is_last_use: true,
            needs_register: true,
        }),
        scratch: smallvec![ScratchDescriptor { clobbers_input: false }],
        ..Default::default()
    };

    let alloc = ctx.allocate(&class, &req);
    let mut claimed: Vec<_> = [alloc.dest, alloc.value1].into_iter().flatten().collect();
    claimed.extend(alloc.scratch.iter().copied());
    let mut unique = claimed.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(claimed.len(), unique.len(), "dest/value1/scratch must each get a distinct register");
}

#[test]
fn commutative_binary_ops_may_swap_operands_to_avoid_a_copy() {
    let mut ctx = Context::new();
    let class = gpr();

    let a = Value::new(0);
    let b = Value::new(1);
    let a_alloc = ctx.allocate(&class, &dest_req(a));
    ctx.commit(&dest_req(a), &a_alloc);
    let b_alloc = ctx.allocate(&class, &dest_req(b));
    ctx.commit(&dest_req(b), &b_alloc);

    // `b` already sits in the register chosen as the destination, so a
    // commutative op should swap operands to avoid a copy of `b` out of
    // the way first.
    let (first, second) = ctx.choose_input_order(true, b_alloc.dest.unwrap(), a, b);
    assert_eq!((first, second), (b, a));
}
