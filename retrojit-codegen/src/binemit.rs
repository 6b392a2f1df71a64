//! Binary-to-source offset mapping.
//!
//! Concrete encoders are scoped out of this crate, but the
//! bytecode-to-native offset table is small, ABI-agnostic bookkeeping
//! the driver itself owns, fed by `MARK_OFFSET` instructions that
//! `Context::compile` honors during emission. Grounded in Cranelift's
//! `binemit::CodeOffset` type and varint-table idiom from its
//! relocation records.

/// A byte offset into emitted code.
pub type CodeOffset = u32;

/// Maps emitted-code offsets back to the bytecode offsets that produced
/// them, encoded as a varint delta stream for compactness — the same
/// shape as Cranelift's relocation/stackmap side tables.
pub trait OffsetEncoder {
    fn record(&mut self, bytecode_offset: u32, native_offset: CodeOffset);
    fn finish(self: Box<Self>) -> Vec<u8>;
}

/// A `(bytecode_offset, native_offset)` pair table, delta- and
/// varint-encoded: each entry stores the increase over the previous
/// entry's offsets, so straight-line code (the common case) costs one
/// byte per field.
#[derive(Default)]
pub struct VarintOffsetTable {
    entries: Vec<(u32, CodeOffset)>,
    last_bytecode: u32,
    last_native: CodeOffset,
}

fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> u32 {
    let mut value = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = bytes[*pos];
        *pos += 1;
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    value
}

impl VarintOffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a table produced by `finish`, for tests and tooling that
    /// want to map a native offset back to its source.
    pub fn decode(bytes: &[u8]) -> Vec<(u32, CodeOffset)> {
        let mut out = Vec::new();
        let mut pos = 0;
        let mut bytecode = 0u32;
        let mut native = 0u32;
        while pos < bytes.len() {
            bytecode += read_varint(bytes, &mut pos);
            native += read_varint(bytes, &mut pos);
            out.push((bytecode, native));
        }
        out
    }
}

/// Look up the bytecode offset responsible for native offset `pc` on a
/// compiled function. With `exact`, only a marker recorded at exactly
/// `pc` matches; otherwise the nearest preceding marker's bytecode
/// offset is returned, mirroring how a debugger maps a return address
/// back to its source line.
pub fn function_get_bytecode(func: &crate::ir::Function, pc: u32, exact: bool) -> Option<u32> {
    let compiled = func.compiled.as_ref()?;
    let table = VarintOffsetTable::decode(&compiled.bytecode_offsets);
    if exact {
        table
            .iter()
            .find(|&&(_, native)| native == pc)
            .map(|&(bytecode, _)| bytecode)
    } else {
        table
            .iter()
            .filter(|&&(_, native)| native <= pc)
            .max_by_key(|&&(_, native)| native)
            .map(|&(bytecode, _)| bytecode)
    }
}

impl OffsetEncoder for VarintOffsetTable {
    fn record(&mut self, bytecode_offset: u32, native_offset: CodeOffset) {
        self.entries.push((bytecode_offset, native_offset));
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut last_bytecode = self.last_bytecode;
        let mut last_native = self.last_native;
        for (bytecode, native) in self.entries {
            write_varint(&mut out, bytecode.wrapping_sub(last_bytecode));
            write_varint(&mut out, native.wrapping_sub(last_native));
            last_bytecode = bytecode;
            last_native = native;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut table = VarintOffsetTable::new();
        table.record(0, 0);
        table.record(4, 12);
        table.record(300, 400);
        let encoded: Box<dyn OffsetEncoder> = Box::new(table);
        let bytes = encoded.finish();
        let decoded = VarintOffsetTable::decode(&bytes);
        assert_eq!(decoded, vec![(0, 0), (4, 12), (300, 400)]);
    }

    #[test]
    fn function_get_bytecode_finds_exact_and_nearest_markers() {
        use crate::ir::{CompiledEntry, Function, Signature};
        use crate::types::{AbiCallConv, Type};

        let mut table = VarintOffsetTable::new();
        table.record(0, 0);
        table.record(4, 12);
        table.record(300, 400);
        let encoded: Box<dyn OffsetEncoder> = Box::new(table);
        let bytes = encoded.finish();

        let mut func = Function::new("f", Signature::new(AbiCallConv::Cdecl, Type::void(), vec![]));
        func.compiled = Some(CompiledEntry {
            entry_point: Some(0),
            code_size: 400,
            frame_size: 0,
            bytecode_offsets: bytes,
        });

        assert_eq!(function_get_bytecode(&func, 12, true), Some(4));
        assert_eq!(function_get_bytecode(&func, 13, true), None);
        assert_eq!(function_get_bytecode(&func, 13, false), Some(4));
        assert_eq!(function_get_bytecode(&func, 399, false), Some(4));
        assert_eq!(function_get_bytecode(&func, 400, false), Some(300));
    }

    #[test]
    fn function_get_bytecode_is_none_before_compilation() {
        use crate::ir::{Function, Signature};
        use crate::types::{AbiCallConv, Type};

        let func = Function::new("f", Signature::new(AbiCallConv::Cdecl, Type::void(), vec![]));
        assert_eq!(function_get_bytecode(&func, 0, false), None);
    }
}
