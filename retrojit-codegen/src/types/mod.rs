//! The structural type system: primitive, pointer, struct, union, and
//! signature types, with ABI-aware layout computed lazily and cached.
//!
//! Grounded in Cranelift's `ir::types` module for the primitive-kind
//! enumeration and its `normalize`/`promote_int` helpers, generalized to
//! cover aggregate and tagged type kinds, which Cranelift's value-type
//! system (a flat `Type(u8)` over a fixed lattice) doesn't need, since
//! Cranelift's IR is already fully typed post-legalization and has no
//! client-defined structs.

mod layout;

pub use layout::{return_via_pointer_bitmap, Layout, ReturnConvention};

use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A structural component of an aggregate type: a sub-type, an optional
/// symbolic name, and a byte offset (explicit, or "unset" before layout
/// runs).
#[derive(Clone, Debug)]
pub struct Component {
    pub ty: Type,
    pub name: Option<String>,
    /// `None` until layout has computed it, unless the client supplied an
    /// explicit offset.
    pub offset: Option<u32>,
}

impl Component {
    pub fn new(ty: Type, name: Option<String>) -> Self {
        Self {
            ty,
            name,
            offset: None,
        }
    }

    pub fn with_offset(ty: Type, name: Option<String>, offset: u32) -> Self {
        Self {
            ty,
            name,
            offset: Some(offset),
        }
    }
}

/// Calling-convention tag carried by signature types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiCallConv {
    Cdecl,
    Vararg,
    Stdcall,
    Fastcall,
}

/// The tagged-type payload: an integer discriminator plus an opaque
/// client payload and an optional drop hook, exactly as this crate
/// describes `jit_type_tag`'s wrapper.
pub struct TaggedData {
    pub tag: i64,
    pub data: Box<dyn std::any::Any>,
    pub drop_hint: Option<Box<dyn Fn(&mut dyn std::any::Any)>>,
}

impl fmt::Debug for TaggedData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaggedData").field("tag", &self.tag).finish()
    }
}

/// The structural kind of a type. Aggregates, pointers, signatures and
/// tagged wrappers carry their substructure inline; primitives are unit
/// variants matching Cranelift's primitive-kind lattice one for one.
#[derive(Debug)]
pub enum TypeKind {
    Void,
    SByte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    NInt,
    NUInt,
    Long,
    ULong,
    Float32,
    Float64,
    NFloat,
    Pointer(Type),
    Struct(Vec<Component>),
    Union(Vec<Component>),
    Signature {
        call_conv: AbiCallConv,
        return_type: Type,
        params: Vec<Type>,
    },
    Tagged(Type, RefCell<Option<TaggedData>>),
}

/// Shared, lazily-laid-out type data.
///
/// `Type` is a cheap `Rc` clone of this; the predefined singletons are
/// `fixed` and never actually freed (clone/drop are no-ops for them, per
/// "reference-count operations on the predefined type
/// singletons are no-ops").
#[derive(Debug)]
pub struct TypeData {
    pub kind: TypeKind,
    pub fixed: bool,
    layout: RefCell<Option<Layout>>,
    explicit_size: RefCell<Option<u32>>,
    explicit_align: RefCell<Option<u32>>,
}

/// A reference-counted, immutable-after-creation type descriptor.
#[derive(Clone, Debug)]
pub struct Type(pub(crate) Rc<TypeData>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Type {}

impl Type {
    fn new(kind: TypeKind) -> Self {
        Self(Rc::new(TypeData {
            kind,
            fixed: false,
            layout: RefCell::new(None),
            explicit_size: RefCell::new(None),
            explicit_align: RefCell::new(None),
        }))
    }

    fn singleton(kind: TypeKind) -> Self {
        Self(Rc::new(TypeData {
            kind,
            fixed: true,
            layout: RefCell::new(None),
            explicit_size: RefCell::new(None),
            explicit_align: RefCell::new(None),
        }))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn is_fixed(&self) -> bool {
        self.0.fixed
    }

    /// Construct a struct type from an ordered list of components.
    pub fn struct_of(components: Vec<Component>) -> Self {
        Self::new(TypeKind::Struct(components))
    }

    /// Construct a union type: every component starts at offset 0.
    pub fn union_of(components: Vec<Component>) -> Self {
        Self::new(TypeKind::Union(components))
    }

    /// Construct a function-signature type.
    pub fn signature_of(call_conv: AbiCallConv, return_type: Type, params: Vec<Type>) -> Self {
        Self::new(TypeKind::Signature {
            call_conv,
            return_type,
            params,
        })
    }

    /// Construct a pointer to `target`.
    pub fn pointer_to(target: Type) -> Self {
        Self::new(TypeKind::Pointer(target))
    }

    /// Wrap `underlying` with an integer discriminator and opaque payload.
    pub fn tag(underlying: Type, tag: i64, data: Box<dyn std::any::Any>) -> Self {
        Self::new(TypeKind::Tagged(
            underlying,
            RefCell::new(Some(TaggedData {
                tag,
                data,
                drop_hint: None,
            })),
        ))
    }

    /// Override the computed size. Per this crate, the *larger* of the
    /// explicit and computed values wins.
    pub fn set_size(&self, size: u32) {
        *self.0.explicit_size.borrow_mut() = Some(size);
        *self.0.layout.borrow_mut() = None;
    }

    /// Override the computed alignment; same override rule as `set_size`.
    pub fn set_alignment(&self, align: u32) {
        *self.0.explicit_align.borrow_mut() = Some(align);
        *self.0.layout.borrow_mut() = None;
    }

    /// Walk `sub_type` chains until hitting a non-tagged kind, the
    /// invariant tagged types must maintain.
    pub fn remove_tags(&self) -> Type {
        let mut cur = self.clone();
        loop {
            let next = match cur.kind() {
                TypeKind::Tagged(under, _) => Some(under.clone()),
                _ => None,
            };
            match next {
                Some(t) => cur = t,
                None => return cur,
            }
        }
    }

    /// Strip tags, collapse pointer/signature/native-int to the
    /// underlying fixed-width integer, and native-float to its concrete
    /// precision
    pub fn normalize(&self, ptr_size: PointerSize) -> Type {
        let base = self.remove_tags();
        match base.kind() {
            TypeKind::Pointer(_) | TypeKind::Signature { .. } => match ptr_size {
                PointerSize::Size32 => Type::int(),
                PointerSize::Size64 => Type::long(),
            },
            TypeKind::NInt => match ptr_size {
                PointerSize::Size32 => Type::int(),
                PointerSize::Size64 => Type::long(),
            },
            TypeKind::NUInt => match ptr_size {
                PointerSize::Size32 => Type::uint(),
                PointerSize::Size64 => Type::ulong(),
            },
            TypeKind::NFloat => Type::float64(),
            _ => base,
        }
    }

    /// Map sub-int integer kinds to `int`/`uint` for arithmetic, per
    /// this crate
    pub fn promote_int(&self) -> Type {
        match self.kind() {
            TypeKind::SByte | TypeKind::Short => Type::int(),
            TypeKind::UByte | TypeKind::UShort => Type::uint(),
            _ => self.clone(),
        }
    }

    pub fn is_struct_or_union(&self) -> bool {
        matches!(self.kind(), TypeKind::Struct(_) | TypeKind::Union(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.remove_tags().kind(),
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
        )
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.remove_tags().kind(), TypeKind::Pointer(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self.remove_tags().kind(),
            TypeKind::Float32 | TypeKind::Float64 | TypeKind::NFloat
        )
    }

    /// Lazily compute (and cache) the layout of this type.
    fn layout(&self, arch: &ArchLayout) -> Layout {
        if let Some(l) = self.0.layout.borrow().as_ref() {
            return l.clone();
        }
        let computed = layout::compute(self, arch);
        *self.0.layout.borrow_mut() = Some(computed.clone());
        computed
    }

    /// `size_of(T)`: triggers layout on first query.
    pub fn size_of(&self, arch: &ArchLayout) -> u32 {
        let computed = self.layout(arch).size;
        let explicit = *self.0.explicit_size.borrow();
        match explicit {
            Some(e) if e > computed => e,
            Some(_) => computed,
            None => computed,
        }
    }

    /// `align_of(T)`: triggers layout on first query.
    pub fn align_of(&self, arch: &ArchLayout) -> u32 {
        let computed = self.layout(arch).align;
        let explicit = *self.0.explicit_align.borrow();
        match explicit {
            Some(e) if e > computed => e,
            Some(_) => computed,
            None => computed,
        }
    }

    /// Whether a value of this type is returned via a caller-allocated
    /// out-pointer rather than in registers
    pub fn return_via_pointer(&self, arch: &ArchLayout) -> bool {
        if !self.is_struct_or_union() {
            return false;
        }
        let size = self.size_of(arch);
        !layout::fits_in_return_registers(size, arch)
    }

    // --- Predefined singletons -------------------------------------------------

    pub fn void() -> Type {
        predefined(&VOID, TypeKind::Void)
    }
    pub fn sbyte() -> Type {
        predefined(&SBYTE, TypeKind::SByte)
    }
    pub fn ubyte() -> Type {
        predefined(&UBYTE, TypeKind::UByte)
    }
    pub fn short() -> Type {
        predefined(&SHORT, TypeKind::Short)
    }
    pub fn ushort() -> Type {
        predefined(&USHORT, TypeKind::UShort)
    }
    pub fn int() -> Type {
        predefined(&INT, TypeKind::Int)
    }
    pub fn uint() -> Type {
        predefined(&UINT, TypeKind::UInt)
    }
    pub fn nint() -> Type {
        predefined(&NINT, TypeKind::NInt)
    }
    pub fn nuint() -> Type {
        predefined(&NUINT, TypeKind::NUInt)
    }
    pub fn long() -> Type {
        predefined(&LONG, TypeKind::Long)
    }
    pub fn ulong() -> Type {
        predefined(&ULONG, TypeKind::ULong)
    }
    pub fn float32() -> Type {
        predefined(&FLOAT32, TypeKind::Float32)
    }
    pub fn float64() -> Type {
        predefined(&FLOAT64, TypeKind::Float64)
    }
    pub fn nfloat() -> Type {
        predefined(&NFLOAT, TypeKind::NFloat)
    }
    pub fn void_ptr() -> Type {
        VOID_PTR
            .get_or_init(|| Type::singleton(TypeKind::Pointer(Type::void())))
            .clone()
    }
}

fn predefined(cell: &OnceCell<Type>, kind: TypeKind) -> Type {
    cell.get_or_init(|| Type::singleton(kind)).clone()
}

// `TypeKind` has no `Clone` (it owns a `Rc<TypeData>` cycle-free DAG via
// `Type`, not `Clone`-through-and-through), so singletons are memoized one
// cell per kind rather than derived generically.
static VOID: OnceCell<Type> = OnceCell::new();
static SBYTE: OnceCell<Type> = OnceCell::new();
static UBYTE: OnceCell<Type> = OnceCell::new();
static SHORT: OnceCell<Type> = OnceCell::new();
static USHORT: OnceCell<Type> = OnceCell::new();
static INT: OnceCell<Type> = OnceCell::new();
static UINT: OnceCell<Type> = OnceCell::new();
static NINT: OnceCell<Type> = OnceCell::new();
static NUINT: OnceCell<Type> = OnceCell::new();
static LONG: OnceCell<Type> = OnceCell::new();
static ULONG: OnceCell<Type> = OnceCell::new();
static FLOAT32: OnceCell<Type> = OnceCell::new();
static FLOAT64: OnceCell<Type> = OnceCell::new();
static NFLOAT: OnceCell<Type> = OnceCell::new();
static VOID_PTR: OnceCell<Type> = OnceCell::new();

/// Target pointer width, used by `normalize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerSize {
    Size32,
    Size64,
}

/// Per-target constants needed to lay out aggregates and classify
/// in-register returns: primitive sizes/alignments, a maximum alignment
/// clamp, and the in-register-return bitmap of this crate
#[derive(Clone, Debug)]
pub struct ArchLayout {
    pub pointer_size: PointerSize,
    pub max_align: u32,
    /// One bit per byte size up to 64: bit `n` set means an aggregate of
    /// size `n` fits in the target's return registers.
    pub return_in_regs_bitmap: u64,
}

impl ArchLayout {
    /// A reference System-V-like x86-64 layout: 8-byte pointers, 16-byte
    /// max alignment, aggregates up to 16 bytes returned in two GPRs.
    pub fn x86_64_system_v() -> Self {
        Self {
            pointer_size: PointerSize::Size64,
            max_align: 16,
            return_in_regs_bitmap: return_via_pointer_bitmap(16),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_sizes_match_target_constants() {
        let arch = ArchLayout::x86_64_system_v();
        assert_eq!(Type::sbyte().size_of(&arch), 1);
        assert_eq!(Type::short().size_of(&arch), 2);
        assert_eq!(Type::int().size_of(&arch), 4);
        assert_eq!(Type::long().size_of(&arch), 8);
        assert_eq!(Type::float32().size_of(&arch), 4);
        assert_eq!(Type::float64().size_of(&arch), 8);
        assert_eq!(Type::void_ptr().size_of(&arch), 8);
        assert_eq!(Type::int().align_of(&arch), 4);
    }

    #[test]
    fn normalize_is_idempotent_on_primitives() {
        let arch = ArchLayout::x86_64_system_v();
        assert_eq!(Type::int().normalize(arch.pointer_size), Type::int());
    }

    #[test]
    fn struct_is_at_least_as_big_as_its_field() {
        let arch = ArchLayout::x86_64_system_v();
        let s = Type::struct_of(vec![Component::new(Type::int(), None)]);
        assert!(s.size_of(&arch) >= Type::int().size_of(&arch));
        assert_eq!(s.align_of(&arch), Type::int().align_of(&arch));
    }

    #[test]
    fn pointer_normalizes_to_native_width_integer() {
        let arch = ArchLayout::x86_64_system_v();
        let p = Type::pointer_to(Type::int());
        assert_eq!(p.normalize(arch.pointer_size), Type::long());
    }

    #[test]
    fn remove_tags_sees_through_any_depth() {
        let inner = Type::int();
        let once = Type::tag(inner.clone(), 1, Box::new(()));
        let twice = Type::tag(once, 2, Box::new(()));
        assert_eq!(twice.remove_tags(), inner);
    }

    #[test]
    fn return_via_pointer_true_for_oversized_struct_false_for_primitives() {
        let arch = ArchLayout::x86_64_system_v();
        let small = Type::struct_of(vec![Component::new(Type::int(), None)]);
        let huge = Type::struct_of(
            (0..10)
                .map(|_| Component::new(Type::long(), None))
                .collect(),
        );
        assert!(!small.return_via_pointer(&arch));
        assert!(huge.return_via_pointer(&arch));
        assert!(!Type::int().return_via_pointer(&arch));
    }

    #[test]
    fn explicit_size_override_keeps_larger_value() {
        let arch = ArchLayout::x86_64_system_v();
        let s = Type::struct_of(vec![Component::new(Type::sbyte(), None)]);
        let computed = s.size_of(&arch);
        s.set_size(computed + 100);
        assert_eq!(s.size_of(&arch), computed + 100);
        // A smaller explicit size than the computed one loses.
        s.set_size(1);
        assert_eq!(s.size_of(&arch), computed);
    }
}
