use thiserror::Error;

/// Reasons an allocation request can fail. The C shaped API on
/// [`crate::Segalloc`] flattens all of these into a null pointer, which is
/// all a `malloc` caller ever sees, but the internal code paths keep the
/// distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The heap provider cannot grow the region any further. Allocator state
    /// is left exactly as it was before the failing request.
    #[error("out of heap memory")]
    OutOfHeap,

    /// The allocator guarantees 16 byte alignment and nothing more. Stricter
    /// layouts are refused instead of silently misaligned.
    #[error("unsupported alignment {0}, the allocator guarantees 16 bytes")]
    UnsupportedAlignment(usize),

    /// The requested size does not fit in a `usize` once metadata padding is
    /// added, or a `calloc` element count multiplication overflowed.
    #[error("allocation size overflow")]
    SizeOverflow,
}
