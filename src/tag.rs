use crate::align::ALIGNMENT;

/// The allocation state of the block itself lives in bit 0.
const ALLOCATED: usize = 1;

/// Bit 1 records the allocation state of the block physically before this
/// one. Allocated blocks have no footer, so without this bit a block could
/// never tell whether it is safe to look left. See [`crate::block`].
const PREV_ALLOCATED: usize = 1 << 1;

/// Block sizes are multiples of [`ALIGNMENT`], so the low 4 bits of a size
/// are always zero and we can pack the state bits in there.
const SIZE_MASK: usize = !(ALIGNMENT - 1);

/// A single metadata word, used both as block header and as footer. This is
/// how the bits are laid out:
///
/// ```text
///  63                                    4   3   2   1   0
/// +----------------------------------------+---+---+---+---+
/// |               block size               | 0 | 0 | p | a |
/// +----------------------------------------+---+---+---+---+
///                                                  |   |
///           previous block is allocated  <---------+   |
///                this block is allocated  <------------+
/// ```
///
/// Headers carry all three fields. Footers only exist on free blocks and
/// carry the size plus the `a` bit; their `p` bit is never written or read.
/// Since the fields occupy disjoint bits, a plain bitwise OR composes them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct Tag(usize);

impl Tag {
    /// Builds a header word. `size` must already be a multiple of
    /// [`ALIGNMENT`].
    #[inline]
    pub fn new(size: usize, prev_allocated: bool, allocated: bool) -> Self {
        debug_assert_eq!(size & !SIZE_MASK, 0);

        let mut word = size;
        if prev_allocated {
            word |= PREV_ALLOCATED;
        }
        if allocated {
            word |= ALLOCATED;
        }

        Self(word)
    }

    /// Builds a footer word. Footers don't record the state of the previous
    /// block, only their own size and allocation bit.
    #[inline]
    pub fn footer(size: usize, allocated: bool) -> Self {
        debug_assert_eq!(size & !SIZE_MASK, 0);
        Self(if allocated { size | ALLOCATED } else { size })
    }

    /// The sentinel header at the very end of the heap. Size 0 terminates
    /// forward walks, and the allocated bit keeps the last real block from
    /// trying to coalesce past the heap. The block before a fresh epilogue is
    /// always the block that was just created in front of it, which is
    /// allocated, hence `prev_allocated` starts as true.
    #[inline]
    pub fn epilogue() -> Self {
        Self::new(0, true, true)
    }

    /// Block size in bytes, state bits masked out.
    #[inline]
    pub fn size(self) -> usize {
        self.0 & SIZE_MASK
    }

    #[inline]
    pub fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    #[inline]
    pub fn prev_allocated(self) -> bool {
        self.0 & PREV_ALLOCATED != 0
    }

    /// Copy of this word with the `prev_allocated` bit set or cleared. Size
    /// and allocation bits are untouched, and the operation is idempotent.
    #[inline]
    pub fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        if prev_allocated {
            Self(self.0 | PREV_ALLOCATED)
        } else {
            Self(self.0 & !PREV_ALLOCATED)
        }
    }

    /// Whether this word is the epilogue sentinel.
    #[inline]
    pub fn is_epilogue(self) -> bool {
        self.size() == 0
    }
}
