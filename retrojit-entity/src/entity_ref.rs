/// A type that can be used as a densely-numbered index into entity arenas.
///
/// This is implemented by opaque `u32` newtypes via the `entity_impl!`
/// macro; client code never constructs a raw index by hand.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a linear index.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}
