//! The local, per-instruction register allocator.
//!
//! Grounded in Cranelift's `regalloc::Context` idiom of a persistent
//! struct reused across compiles to avoid reallocating scratch state —
//! but the algorithm itself is written fresh from this crate: unlike
//! Cranelift's global live-range coloring pipeline
//! (`Coloring`/`Coalescing`/`Spilling`/`Reload`), this allocator makes
//! one cost-minimizing decision per instruction and never revisits it,
//! which is what makes the codegen driver's restart-on-overflow loop
//! safe to re-run from scratch.

use crate::ir::Value;
use crate::isa::registers::{RegClass, RegUnit};
use crate::regalloc::request::RegisterRequest;
use smallvec::SmallVec;
use std::collections::HashMap;

pub const COST_COPY: u32 = 4;
pub const COST_THRASH: u32 = 100;
pub const COST_GLOBAL_BIAS: u32 = 2;
pub const COST_CLOBBER_GLOBAL: u32 = 1000;
pub const COST_SPILL_CLEAN: u32 = 1;
pub const COST_SPILL_DIRTY: u32 = 16;
pub const COST_SPILL_CLEAN_GLOBAL: u32 = 4;
pub const COST_SPILL_DIRTY_GLOBAL: u32 = 1;

/// Where a value currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Nowhere,
    Reg(RegUnit),
    Frame,
    GlobalReg(RegUnit),
}

#[derive(Debug, Clone, Copy, Default)]
struct Residency {
    /// A frame or global-register copy exists and is up to date.
    clean_copy: bool,
    /// This register holds the only copy; a store is needed before it
    /// can be reused.
    dirty: bool,
}

/// The concrete assignment produced by `allocate`, ready for `gen`/
/// `commit` to act on.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub dest: Option<RegUnit>,
    pub value1: Option<RegUnit>,
    pub value2: Option<RegUnit>,
    pub scratch: SmallVec<[RegUnit; 2]>,
    /// Values evicted from a register to make room; the driver emits a
    /// store for each before the instruction itself.
    pub spills: SmallVec<[(Value, RegUnit); 2]>,
}

/// Per-function allocator state, reused (via `reset`) across the
/// restart-on-overflow loop's attempts rather than rebuilt.
pub struct Context {
    location: HashMap<Value, Location>,
    occupant: HashMap<RegUnit, Value>,
    residency: HashMap<Value, Residency>,
    global_assign: HashMap<Value, RegUnit>,
    lru: Vec<RegUnit>,
    allow_clobber_global: bool,
}

impl Context {
    pub fn new() -> Self {
        Self {
            location: HashMap::new(),
            occupant: HashMap::new(),
            residency: HashMap::new(),
            global_assign: HashMap::new(),
            lru: Vec::new(),
            allow_clobber_global: false,
        }
    }

    /// Reset all per-value state at the start of a function compile, or
    /// when `cleanup_on_restart` discards a failed attempt. The
    /// global-register assignment survives a restart: it was
    /// computed once, before codegen, by `global::assign_global_registers`.
    pub fn reset(&mut self) {
        self.location.clear();
        self.occupant.clear();
        self.residency.clear();
        self.lru.clear();
    }

    pub fn set_global_assignment(&mut self, assignment: HashMap<Value, RegUnit>) {
        self.global_assign = assignment;
    }

    pub fn location_of(&self, value: Value) -> Location {
        self.location.get(&value).copied().unwrap_or(Location::Nowhere)
    }

    /// The value currently resident in `reg`, if any. Lets a backend
    /// that bypasses `allocate`'s full dest/value1/value2/scratch
    /// request shape (e.g. to reload a single spilled value) still see
    /// what it is about to evict.
    pub fn occupant_of(&self, reg: RegUnit) -> Option<Value> {
        self.occupant.get(&reg).copied()
    }

    fn touch(&mut self, reg: RegUnit) {
        self.lru.retain(|&r| r != reg);
        self.lru.push(reg);
    }

    fn lru_rank(&self, reg: RegUnit) -> usize {
        self.lru.iter().position(|&r| r == reg).unwrap_or(0)
    }

    fn spill_cost(&self, value: Value, needed_after: bool) -> u32 {
        if !needed_after {
            return 0;
        }
        let residency = self.residency.get(&value).copied().unwrap_or_default();
        let is_global_home = self.global_assign.contains_key(&value);
        match (residency.clean_copy, is_global_home) {
            (true, true) => COST_SPILL_CLEAN_GLOBAL,
            (true, false) => COST_SPILL_CLEAN,
            (false, true) => COST_SPILL_DIRTY_GLOBAL,
            (false, false) => COST_SPILL_DIRTY,
        }
    }

    /// Compute the use cost of assigning `candidate` to hold `value`
    /// for this instruction's dest/input role step 2/4.
    fn cost_of_candidate(
        &self,
        candidate: RegUnit,
        value: Value,
        inst_inputs: &[Value],
        needed_after: bool,
        commutative_or_reversible: bool,
    ) -> u32 {
        let mut cost = 0u32;

        let already_here = self.location_of(value) == Location::Reg(candidate);
        if already_here {
            return 0;
        }

        cost += COST_COPY;

        if let Some(&occupant) = self.occupant.get(&candidate) {
            if occupant != value {
                let occupant_is_live_input = inst_inputs.contains(&occupant);
                if occupant_is_live_input && !commutative_or_reversible {
                    cost += COST_THRASH;
                }
                let occupant_needed_after = inst_inputs.contains(&occupant);
                cost += self.spill_cost(occupant, occupant_needed_after);
            }
        }

        if let Some(&global_reg) = self.global_assign.get(&value) {
            if global_reg != candidate {
                cost += COST_GLOBAL_BIAS;
            }
        }

        if self.global_assign.values().any(|&g| g == candidate) && !self.allow_clobber_global {
            return u32::MAX;
        } else if self.global_assign.values().any(|&g| g == candidate) {
            cost += COST_CLOBBER_GLOBAL;
        }

        cost
    }

    /// Step 2: choose the output register, minimizing cost, breaking
    /// ties toward the least-recently-used candidate.
    pub fn choose_output_register(
        &self,
        class: &RegClass,
        dest: Value,
        inputs: &[Value],
        commutative_or_reversible: bool,
    ) -> RegUnit {
        class
            .flat_units()
            .chain(class.global_units())
            .map(|reg| {
                let cost = self.cost_of_candidate(reg, dest, inputs, true, commutative_or_reversible);
                (cost, self.lru_rank(reg), reg)
            })
            .min_by_key(|&(cost, rank, _)| (cost, rank))
            .map(|(_, _, reg)| reg)
            .expect("register class must not be empty")
    }

    /// Step 3: for a commutative/reversible binary op, swap operands if
    /// the non-destructive slot already holds the output's register.
    pub fn choose_input_order(
        &self,
        commutative_or_reversible: bool,
        dest_reg: RegUnit,
        value1: Value,
        value2: Value,
    ) -> (Value, Value) {
        if commutative_or_reversible && self.location_of(value2) == Location::Reg(dest_reg) {
            (value2, value1)
        } else {
            (value1, value2)
        }
    }

    /// Step 4/5: choose a register for an input or scratch operand under
    /// the same cost model, avoiding registers already claimed this
    /// instruction.
    pub fn choose_operand_register(
        &self,
        class: &RegClass,
        value: Value,
        inputs: &[Value],
        needed_after: bool,
        taken: &[RegUnit],
    ) -> RegUnit {
        class
            .flat_units()
            .chain(class.global_units())
            .filter(|reg| !taken.contains(reg))
            .map(|reg| {
                let cost = self.cost_of_candidate(reg, value, inputs, needed_after, false);
                (cost, self.lru_rank(reg), reg)
            })
            .min_by_key(|&(cost, rank, _)| (cost, rank))
            .map(|(_, _, reg)| reg)
            .expect("register class must not be empty")
    }

    /// Full allocation of one instruction's request: picks dest/value1/
    /// value2/scratch registers and records which resident values must
    /// be spilled to make room steps 1-5. `class` is
    /// the backend's register class for this instruction's operands.
    pub fn allocate(&mut self, class: &RegClass, req: &RegisterRequest) -> Allocation {
        let mut alloc = Allocation::default();
        let inputs: Vec<Value> = [req.value1.map(|d| d.value), req.value2.map(|d| d.value)]
            .into_iter()
            .flatten()
            .collect();

        let (v1, v2) = match (req.value1, req.value2) {
            (Some(a), Some(b)) if req.commutative => {
                if let Some(dest) = req.dest {
                    let dest_reg = self.choose_output_register(class, dest.value, &inputs, true);
                    let (ordered1, ordered2) =
                        self.choose_input_order(true, dest_reg, a.value, b.value);
                    (Some(ordered1), Some(ordered2))
                } else {
                    (Some(a.value), Some(b.value))
                }
            }
            (a, b) => (a.map(|d| d.value), b.map(|d| d.value)),
        };

        let mut taken: SmallVec<[RegUnit; 4]> = SmallVec::new();

        if let Some(dest) = req.dest {
            let reg = self.choose_output_register(class, dest.value, &inputs, req.commutative);
            if let Some(&occupant) = self.occupant.get(&reg) {
                if occupant != dest.value {
                    alloc.spills.push((occupant, reg));
                }
            }
            alloc.dest = Some(reg);
            taken.push(reg);
        }

        if let Some(v) = v1 {
            let needed_after = req
                .value1
                .map(|d| !d.is_last_use)
                .unwrap_or(false);
            let reg = self.choose_operand_register(class, v, &inputs, needed_after, &taken);
            alloc.value1 = Some(reg);
            taken.push(reg);
        }

        if let Some(v) = v2 {
            let needed_after = req
                .value2
                .map(|d| !d.is_last_use)
                .unwrap_or(false);
            let reg = self.choose_operand_register(class, v, &inputs, needed_after, &taken);
            alloc.value2 = Some(reg);
            taken.push(reg);
        }

        for _ in &req.scratch {
            let reg = class
                .flat_units()
                .find(|r| !taken.contains(r))
                .expect("scratch register available");
            alloc.scratch.push(reg);
            taken.push(reg);
        }

        alloc
    }

    /// Commit step: after the backend emits the instruction, bind
    /// evicted values out, bind the destination in, and update LRU/
    /// dirty-bit bookkeeping `commit`.
    pub fn commit(&mut self, req: &RegisterRequest, alloc: &Allocation) {
        for &(value, reg) in &alloc.spills {
            self.location.insert(value, Location::Frame);
            self.occupant.remove(&reg);
            self.residency.entry(value).or_default().clean_copy = true;
        }

        if let (Some(dest), Some(reg)) = (req.dest, alloc.dest) {
            if let Some(old_reg) = self.location_of(dest.value).as_reg() {
                self.occupant.remove(&old_reg);
            }
            self.location.insert(dest.value, Location::Reg(reg));
            self.occupant.insert(reg, dest.value);
            self.residency.insert(
                dest.value,
                Residency {
                    clean_copy: false,
                    dirty: true,
                },
            );
            self.touch(reg);
        }

        for (value, reg) in [
            (req.value1.map(|d| d.value), alloc.value1),
            (req.value2.map(|d| d.value), alloc.value2),
        ] {
            if let (Some(value), Some(reg)) = (value, reg) {
                self.location.insert(value, Location::Reg(reg));
                self.occupant.insert(reg, value);
                self.touch(reg);
            }
        }
    }
}

impl Location {
    fn as_reg(self) -> Option<RegUnit> {
        match self {
            Location::Reg(r) | Location::GlobalReg(r) => Some(r),
            _ => None,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::registers::{RegBank, RegClass};
    use retrojit_entity::EntityRef;

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

    #[test]
    fn output_register_prefers_free_register() {
        let ctx = Context::new();
        let class = gpr();
        let dest = crate::ir::Value::new(0);
        let reg = ctx.choose_output_register(&class, dest, &[], false);
        assert!(reg < class.num_regs);
    }

    #[test]
    fn commit_binds_destination_and_spill_frees_occupant() {
        let mut ctx = Context::new();
        let class = gpr();
        let occupant = crate::ir::Value::new(0);
        let dest = crate::ir::Value::new(1);

        let occ_req = crate::regalloc::request::RegisterRequest {
            dest: Some(crate::regalloc::request::ValueDescriptor {
                value: occupant,
                is_last_use: false,
                needs_register: true,
            }),
            ..Default::default()
        };
        let occ_alloc = ctx.allocate(&class, &occ_req);
        ctx.commit(&occ_req, &occ_alloc);
        assert_eq!(ctx.location_of(occupant), Location::Reg(occ_alloc.dest.unwrap()));

        let dest_req = crate::regalloc::request::RegisterRequest {
            dest: Some(crate::regalloc::request::ValueDescriptor {
                value: dest,
                is_last_use: false,
                needs_register: true,
            }),
            ..Default::default()
        };
        let dest_alloc = ctx.allocate(&class, &dest_req);
        ctx.commit(&dest_req, &dest_alloc);
        assert_eq!(ctx.location_of(dest), Location::Reg(dest_alloc.dest.unwrap()));
    }
}
