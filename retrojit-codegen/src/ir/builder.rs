//! The IR builder: a transient, reusable cursor over a `Function`.
//!
//! Grounded in Cranelift's `FunctionBuilder`/`FunctionBuilderContext`
//! split in `cranelift-frontend`: a small per-function cursor
//! (`Builder`) borrows a reusable, pool-backed context (`BuilderContext`)
//! so repeated compiles don't re-allocate the label table, value
//! promotion bookkeeping or frame-size accumulator from scratch. Per
//! this crate, the builder — not the function — owns the "currently
//! building" state; the `Function` it produces is plain data.

use crate::error::{CodegenError, CodegenResult};
use crate::ir::instructions::{InstructionData, Opcode, Operand};
use crate::ir::value::ConstantPayload;
use crate::ir::{Block, Function, Label, Value};
use crate::types::Type;
use std::collections::HashMap;

/// Reusable scratch state shared across many `Builder` sessions, cleared
/// (not dropped) between functions — mirrors Cranelift's
/// `FunctionBuilderContext::clear`.
pub struct BuilderContext {
    /// Values referenced from a block other than the one that created
    /// them, discovered while building; promoted to `local` at `finish`.
    cross_block_refs: HashMap<Value, Block>,
    frame_bytes: u32,
    /// Mirrors `settings::Flags::dont_fold_constants`, inverted: `true`
    /// unless a caller opts out via `set_fold_constants`.
    fold_constants: bool,
}

impl Default for BuilderContext {
    fn default() -> Self {
        Self {
            cross_block_refs: HashMap::new(),
            frame_bytes: 0,
            fold_constants: true,
        }
    }
}

impl BuilderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match this context's folding behavior to a `Context`'s flags.
    pub fn set_fold_constants(&mut self, enabled: bool) {
        self.fold_constants = enabled;
    }

    fn clear(&mut self) {
        self.cross_block_refs.clear();
        self.frame_bytes = 0;
    }
}

/// A cursor for incrementally constructing one `Function`'s body.
pub struct Builder<'a> {
    pub func: &'a mut Function,
    ctx: &'a mut BuilderContext,
    current: Option<Block>,
    sealed: bool,
}

impl<'a> Builder<'a> {
    pub fn new(func: &'a mut Function, ctx: &'a mut BuilderContext) -> Self {
        ctx.clear();
        Self {
            func,
            ctx,
            current: None,
            sealed: false,
        }
    }

    /// Create a new block and switch the cursor to append into it.
    pub fn create_block(&mut self) -> (Block, Label) {
        let (block, label) = self.func.create_block();
        self.current = Some(block);
        (block, label)
    }

    pub fn switch_to_block(&mut self, block: Block) {
        self.current = Some(block);
    }

    fn current_block(&self) -> CodegenResult<Block> {
        self.current
            .ok_or_else(|| CodegenError::CompileError("no current block".into()))
    }

    /// Declare a function parameter, bound at the entry block.
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        let value = self.func.create_value(block, ty);
        if let Some(data) = self.func.values.get_mut(value) {
            *data = crate::ir::value::ValueData::new_parameter(block, ty);
        }
        self.func.block_mut(block).params.push(value);
        value
    }

    /// Record that `value`, created at `value`'s owner block, is being
    /// used from `using_block`. If that differs from its owner, it must
    /// be promoted to `local` before register allocation runs, per
    /// ownership rule.
    fn note_use(&mut self, value: Value, using_block: Block) {
        if let Some(data) = self.func.values.get(value) {
            if data.owner != using_block {
                self.ctx.cross_block_refs.insert(value, data.owner);
            }
        }
    }

    fn append(&mut self, inst: InstructionData) -> CodegenResult<()> {
        let block = self.current_block()?;
        if let Some(dest) = inst.dest {
            self.note_use(dest, block);
        }
        if let Operand::Value(v) = inst.value1 {
            self.note_use(v, block);
        }
        if let Operand::Value(v) = inst.value2 {
            self.note_use(v, block);
        }
        self.func.append_inst(block, inst);
        Ok(())
    }

    fn new_value(&mut self, ty: Type) -> CodegenResult<Value> {
        let block = self.current_block()?;
        Ok(self.func.create_value(block, ty))
    }

    pub fn constant(&mut self, ty: Type, payload: ConstantPayload) -> CodegenResult<Value> {
        let block = self.current_block()?;
        let value = self.func.values.push(crate::ir::value::ValueData::new_constant(
            block, ty, payload,
        ));
        Ok(value)
    }

    /// Emit a binary opcode with two source values, returning the
    /// destination value. Folds away at build time when both operands
    /// are `NInt` constants and `opcode` has a pure integer meaning,
    /// unless folding was disabled on this context.
    pub fn binary(&mut self, opcode: Opcode, ty: Type, a: Value, b: Value) -> CodegenResult<Value> {
        if self.ctx.fold_constants {
            if let Some(folded) = self.try_fold_binary(opcode, ty, a, b)? {
                return Ok(folded);
            }
        }
        let dest = self.new_value(ty)?;
        self.append(
            InstructionData::new(opcode)
                .with_dest(dest)
                .with_value1(Operand::Value(a))
                .with_value2(Operand::Value(b)),
        )?;
        Ok(dest)
    }

    pub fn unary(&mut self, opcode: Opcode, ty: Type, a: Value) -> CodegenResult<Value> {
        if self.ctx.fold_constants {
            if let Some(folded) = self.try_fold_unary(opcode, ty, a)? {
                return Ok(folded);
            }
        }
        let dest = self.new_value(ty)?;
        self.append(
            InstructionData::new(opcode)
                .with_dest(dest)
                .with_value1(Operand::Value(a)),
        )?;
        Ok(dest)
    }

    fn const_nint(&self, value: Value) -> Option<i64> {
        match &self.func.values.get(value)?.constant {
            Some(ConstantPayload::NInt(n)) => Some(*n),
            _ => None,
        }
    }

    fn try_fold_binary(
        &mut self,
        opcode: Opcode,
        ty: Type,
        a: Value,
        b: Value,
    ) -> CodegenResult<Option<Value>> {
        let (a, b) = match (self.const_nint(a), self.const_nint(b)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(None),
        };
        let folded = match opcode {
            Opcode::Add => a.wrapping_add(b),
            Opcode::Sub => a.wrapping_sub(b),
            Opcode::Mul => a.wrapping_mul(b),
            Opcode::And => a & b,
            Opcode::Or => a | b,
            Opcode::Xor => a ^ b,
            Opcode::Shl => a.wrapping_shl(b as u32),
            Opcode::Shr => a.wrapping_shr(b as u32),
            Opcode::Div if b != 0 => a.wrapping_div(b),
            Opcode::Rem if b != 0 => a.wrapping_rem(b),
            _ => return Ok(None),
        };
        Ok(Some(self.constant(ty, ConstantPayload::NInt(folded))?))
    }

    fn try_fold_unary(&mut self, opcode: Opcode, ty: Type, a: Value) -> CodegenResult<Option<Value>> {
        let a = match self.const_nint(a) {
            Some(a) => a,
            None => return Ok(None),
        };
        let folded = match opcode {
            Opcode::Neg => a.wrapping_neg(),
            Opcode::Not => !a,
            _ => return Ok(None),
        };
        Ok(Some(self.constant(ty, ConstantPayload::NInt(folded))?))
    }

    pub fn branch(&mut self, target: Label) -> CodegenResult<()> {
        self.append(InstructionData::new(Opcode::Branch).with_value1(Operand::Label(target)))
    }

    pub fn branch_if(&mut self, cond: Value, target: Label) -> CodegenResult<()> {
        self.append(
            InstructionData::new(Opcode::BranchIf)
                .with_value1(Operand::Value(cond))
                .with_value2(Operand::Label(target)),
        )
    }

    pub fn branch_if_not(&mut self, cond: Value, target: Label) -> CodegenResult<()> {
        self.append(
            InstructionData::new(Opcode::BranchIfNot)
                .with_value1(Operand::Value(cond))
                .with_value2(Operand::Label(target)),
        )
    }

    pub fn return_value(&mut self, value: Value) -> CodegenResult<()> {
        self.append(InstructionData::new(Opcode::Return).with_value1(Operand::Value(value)))
    }

    pub fn return_void(&mut self) -> CodegenResult<()> {
        self.append(InstructionData::new(Opcode::ReturnVoid))
    }

    /// Allocate a frame slot; the accumulator in `ctx` lets repeated
    /// allocations within one function session avoid re-deriving the
    /// running frame size on every call.
    pub fn create_frame_slot(&mut self, size: u32, align: u32) -> crate::ir::entities::FrameSlot {
        self.ctx.frame_bytes += size;
        self.func.create_frame_slot(size, align)
    }

    /// Finalize the function: promote every value referenced outside its
    /// creating block to `local`
    pub fn finish(mut self) -> CodegenResult<()> {
        for (value, _owner) in self.ctx.cross_block_refs.drain() {
            if let Some(data) = self.func.values.get_mut(value) {
                data.promote_to_local();
            }
        }
        self.sealed = true;
        Ok(())
    }
}

impl<'a> Drop for Builder<'a> {
    fn drop(&mut self) {
        debug_assert!(
            self.sealed || self.current.is_none(),
            "Builder dropped without calling finish()"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Signature;
    use crate::types::AbiCallConv;

    fn func() -> Function {
        Function::new("f", Signature::new(AbiCallConv::Cdecl, Type::nint(), vec![]))
    }

    #[test]
    fn adding_two_constants_folds_to_one_constant_value() {
        let mut func = func();
        let mut ctx = BuilderContext::new();
        let mut b = Builder::new(&mut func, &mut ctx);
        let (entry, _) = b.create_block();

        let two = b.constant(Type::nint(), ConstantPayload::NInt(2)).unwrap();
        let three = b.constant(Type::nint(), ConstantPayload::NInt(3)).unwrap();
        let sum = b.binary(Opcode::Add, Type::nint(), two, three).unwrap();
        b.return_value(sum).unwrap();
        b.finish().unwrap();

        assert!(func.block(entry).insts.is_empty());
        match &func.values[sum].constant {
            Some(ConstantPayload::NInt(5)) => {}
            other => panic!("expected a folded constant of 5, got {:?}", other),
        }
    }

    #[test]
    fn folding_disabled_emits_a_real_add_instruction() {
        let mut func = func();
        let mut ctx = BuilderContext::new();
        ctx.set_fold_constants(false);
        let mut b = Builder::new(&mut func, &mut ctx);
        let (_, _) = b.create_block();

        let two = b.constant(Type::nint(), ConstantPayload::NInt(2)).unwrap();
        let three = b.constant(Type::nint(), ConstantPayload::NInt(3)).unwrap();
        let sum = b.binary(Opcode::Add, Type::nint(), two, three).unwrap();
        b.return_value(sum).unwrap();
        b.finish().unwrap();

        assert!(func.values[sum].constant.is_none());
    }

    #[test]
    fn folding_leaves_non_constant_operands_alone() {
        let mut func = func();
        let mut ctx = BuilderContext::new();
        let mut b = Builder::new(&mut func, &mut ctx);
        let (entry, _) = b.create_block();
        let param = b.append_block_param(entry, Type::nint());

        let one = b.constant(Type::nint(), ConstantPayload::NInt(1)).unwrap();
        let sum = b.binary(Opcode::Add, Type::nint(), param, one).unwrap();
        b.return_value(sum).unwrap();
        b.finish().unwrap();

        assert_eq!(func.block(entry).insts.len(), 1);
    }
}
