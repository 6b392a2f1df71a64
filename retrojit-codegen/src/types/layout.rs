//! Structural layout: struct/union field placement, size/alignment
//! rounding, and the in-register-return classification of this crate

use super::{ArchLayout, Component, Type, TypeKind};

/// The computed size/alignment of a type, cached on first query.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
}

/// How an aggregate of a given size is returned from a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnConvention {
    /// Returned directly in one or more registers.
    InRegisters,
    /// An implicit first parameter points to caller-allocated storage.
    ViaPointer,
}

fn round_up(offset: u32, align: u32) -> u32 {
    if align == 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}

/// Compute the layout of `ty` under `arch`. Primitives have fixed,
/// target-defined sizes; structs lay out fields in declaration order;
/// unions overlap every field at offset 0.
pub fn compute(ty: &Type, arch: &ArchLayout) -> Layout {
    let ptr_size = match arch.pointer_size {
        super::PointerSize::Size32 => 4,
        super::PointerSize::Size64 => 8,
    };
    match ty.kind() {
        TypeKind::Void => Layout { size: 0, align: 1 },
        TypeKind::SByte | TypeKind::UByte => Layout { size: 1, align: 1 },
        TypeKind::Short | TypeKind::UShort => Layout { size: 2, align: 2 },
        TypeKind::Int | TypeKind::UInt => Layout { size: 4, align: 4 },
        TypeKind::NInt | TypeKind::NUInt => Layout {
            size: ptr_size,
            align: ptr_size,
        },
        TypeKind::Long | TypeKind::ULong => Layout { size: 8, align: 8 },
        TypeKind::Float32 => Layout { size: 4, align: 4 },
        TypeKind::Float64 => Layout { size: 8, align: 8 },
        TypeKind::NFloat => Layout { size: 8, align: 8 },
        TypeKind::Pointer(_) | TypeKind::Signature { .. } => Layout {
            size: ptr_size,
            align: ptr_size,
        },
        TypeKind::Tagged(under, _) => compute(under, arch),
        TypeKind::Struct(components) => layout_struct(components, arch),
        TypeKind::Union(components) => layout_union(components, arch),
    }
}

fn layout_struct(components: &[Component], arch: &ArchLayout) -> Layout {
    let mut offset = 0u32;
    let mut max_align = 1u32;
    for c in components {
        let field_align = c.ty.align_of(arch).min(arch.max_align).max(1);
        let field_size = c.ty.size_of(arch);
        max_align = max_align.max(field_align);
        offset = match c.offset {
            Some(explicit) => explicit,
            None => round_up(offset, field_align),
        };
        offset += field_size;
    }
    Layout {
        size: round_up(offset, max_align),
        align: max_align,
    }
}

fn layout_union(components: &[Component], arch: &ArchLayout) -> Layout {
    let mut max_size = 0u32;
    let mut max_align = 1u32;
    for c in components {
        let field_align = c.ty.align_of(arch).min(arch.max_align).max(1);
        let field_size = c.ty.size_of(arch);
        max_align = max_align.max(field_align);
        max_size = max_size.max(field_size);
    }
    Layout {
        size: round_up(max_size, max_align),
        align: max_align,
    }
}

/// Build a bitmap (bit `n` ⇒ size `n` fits in return registers) covering
/// sizes `0..=max_in_reg_bytes`, rounded down to the nearest representable
/// register pack. Used by `ArchLayout::x86_64_system_v` to express
/// "structs up to 16 bytes return in two GPRs".
pub fn return_via_pointer_bitmap(max_in_reg_bytes: u32) -> u64 {
    let mut bitmap = 0u64;
    let mut n = 0u32;
    while n <= max_in_reg_bytes && n < 64 {
        bitmap |= 1u64 << n;
        n += 1;
    }
    bitmap
}

pub(super) fn fits_in_return_registers(size: u32, arch: &ArchLayout) -> bool {
    if size == 0 || size >= 64 {
        return false;
    }
    (arch.return_in_regs_bitmap & (1u64 << size)) != 0
}
