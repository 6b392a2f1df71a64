//! Intermediate representation of a function.
//!
//! Grounded in Cranelift's `ir::Function` (one struct owning every
//! per-function arena) but diverging from its global `DataFlowGraph` +
//! `Layout` split: here each `BlockData` owns its own instruction array
//! directly "a block is a dynamic array of
//! instructions" model, addressed via `InstRef{block, index}` rather
//! than a function-wide `Inst` arena.

use crate::ir::{Block, FrameSlot, FuncRef, JumpTable, Label, SigRef, Value};
use crate::ir::instructions::InstructionData;
use crate::ir::value::ValueData;
use crate::types::{AbiCallConv, Type};
use retrojit_entity::PrimaryMap;
use std::collections::HashMap;

/// A function signature: calling convention, return type, parameter
/// types.
#[derive(Clone, Debug)]
pub struct Signature {
    pub call_conv: AbiCallConv,
    pub return_type: Type,
    pub params: Vec<Type>,
}

impl Signature {
    pub fn new(call_conv: AbiCallConv, return_type: Type, params: Vec<Type>) -> Self {
        Self {
            call_conv,
            return_type,
            params,
        }
    }
}

/// A stack frame slot: a byte size, alignment, and (once the frame is
/// laid out) its offset from the frame base.
#[derive(Clone, Debug, Default)]
pub struct FrameSlotData {
    pub size: u32,
    pub align: u32,
    pub offset: Option<i32>,
}

/// One basic block: an ordered instruction array plus the set of labels
/// bound to it. Multiple labels may alias the same block.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub insts: Vec<InstructionData>,
    /// Parameters this block expects to be live-in (entry block: the
    /// function's formal parameters).
    pub params: Vec<Value>,
}

impl BlockData {
    pub fn append(&mut self, inst: InstructionData) -> usize {
        self.insts.push(inst);
        self.insts.len() - 1
    }
}

/// Compiled-code metadata attached to a function once `Context::compile`
/// has run.
#[derive(Clone, Debug, Default)]
pub struct CompiledEntry {
    pub entry_point: Option<usize>,
    pub code_size: u32,
    pub frame_size: u32,
    /// The varint-encoded bytecode-to-native offset table built from
    /// this function's `MarkOffset` instructions, queried through
    /// `binemit::function_get_bytecode`.
    pub bytecode_offsets: Vec<u8>,
}

/// A function: its signature, blocks (each owning its own instructions,
/// in program order), declared values, stack frame, and imported
/// function/signature tables.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub blocks: PrimaryMap<Block, BlockData>,
    /// Program order of blocks; `blocks` is keyed by identity, this is
    /// layout. CFG cleanup reorders/removes entries here, never in
    /// `blocks` itself, so `Block` references stay stable.
    pub layout: Vec<Block>,
    pub labels: PrimaryMap<Label, Block>,
    pub values: PrimaryMap<Value, ValueData>,
    pub frame_slots: PrimaryMap<FrameSlot, FrameSlotData>,
    pub signatures: PrimaryMap<SigRef, Signature>,
    pub imports: PrimaryMap<FuncRef, String>,
    pub jump_tables: PrimaryMap<JumpTable, Vec<Label>>,
    /// Per-block metadata key/value pairs.
    pub metadata: HashMap<Block, HashMap<i64, Box<dyn std::any::Any>>>,
    pub compiled: Option<CompiledEntry>,
}

impl Function {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
            blocks: PrimaryMap::new(),
            layout: Vec::new(),
            labels: PrimaryMap::new(),
            values: PrimaryMap::new(),
            frame_slots: PrimaryMap::new(),
            signatures: PrimaryMap::new(),
            imports: PrimaryMap::new(),
            jump_tables: PrimaryMap::new(),
            metadata: HashMap::new(),
            compiled: None,
        }
    }

    /// Create a new block, appended to the end of the layout, and bind a
    /// fresh label to it.
    pub fn create_block(&mut self) -> (Block, Label) {
        let block = self.blocks.push(BlockData::default());
        self.layout.push(block);
        let label = self.labels.push(block);
        (block, label)
    }

    /// Bind an additional label to an existing block (e.g. after CFG
    /// cleanup merges two blocks together).
    pub fn bind_label(&mut self, block: Block) -> Label {
        self.labels.push(block)
    }

    pub fn label_target(&self, label: Label) -> Block {
        self.labels[label]
    }

    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: Block) -> &mut BlockData {
        &mut self.blocks[block]
    }

    pub fn append_inst(&mut self, block: Block, inst: InstructionData) -> usize {
        self.blocks[block].append(inst)
    }

    pub fn create_value(&mut self, owner: Block, ty: Type) -> Value {
        self.values.push(ValueData::new_temporary(owner, ty))
    }

    pub fn create_frame_slot(&mut self, size: u32, align: u32) -> FrameSlot {
        self.frame_slots.push(FrameSlotData {
            size,
            align,
            offset: None,
        })
    }

    pub fn import_signature(&mut self, sig: Signature) -> SigRef {
        self.signatures.push(sig)
    }

    pub fn import_function(&mut self, name: impl Into<String>) -> FuncRef {
        self.imports.push(name.into())
    }

    pub fn create_jump_table(&mut self, targets: Vec<Label>) -> JumpTable {
        self.jump_tables.push(targets)
    }

    /// Iterate blocks in current layout order.
    pub fn blocks_in_layout_order(&self) -> impl Iterator<Item = Block> + '_ {
        self.layout.iter().copied()
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.layout.first().copied()
    }

    pub fn set_metadata(&mut self, block: Block, tag: i64, value: Box<dyn std::any::Any>) {
        self.metadata.entry(block).or_default().insert(tag, value);
    }

    pub fn get_metadata(&self, block: Block, tag: i64) -> Option<&(dyn std::any::Any)> {
        self.metadata.get(&block).and_then(|m| m.get(&tag)).map(|b| b.as_ref())
    }

    pub fn free_metadata(&mut self, block: Block, tag: i64) {
        if let Some(m) = self.metadata.get_mut(&block) {
            m.remove(&tag);
        }
    }
}
