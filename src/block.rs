use std::{mem, ptr::NonNull};

use crate::{
    align::{is_aligned, WORD},
    freelist::FreeNode,
    tag::Tag,
};

/// Minimum block size in bytes: a header word, room for the free list node
/// that occupies the payload while the block is free, and a footer word.
/// Splitting never produces a remainder smaller than this, and requests are
/// rounded up to it.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * WORD + mem::size_of::<FreeNode>();

/// A block of the heap, identified by its header address. This is a thin
/// `Copy` handle over raw heap words; all the state lives in the heap itself.
/// Layout of a block:
///
/// ```text
///              +--------------------------+
/// header ----> | size | prev_alloc, alloc |   1 word
///              +--------------------------+
/// payload ---> |   user data when the     |
///              |   block is allocated,    |
///              |   FreeNode + junk when   |   size - 2 words
///              |   it is free             |
///              +--------------------------+
///              | size | alloc (footer)    |   1 word, free blocks only
///              +--------------------------+
/// ```
///
/// Allocated blocks give the footer word to the caller as payload, which is
/// why the predecessor's state has to be tracked in our own header: there
/// may be nothing readable where an allocated neighbor's footer would be.
/// Block sizes are multiples of 16 and the heap starts with one word of
/// padding, so headers always sit 8 bytes below a 16 byte boundary and
/// payloads are exactly 16 byte aligned.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Block(NonNull<Tag>);

impl Block {
    /// Wraps the header word at `address`.
    ///
    /// # Safety
    ///
    /// `address` must point at a live header word within the heap.
    #[inline]
    pub unsafe fn from_header(address: NonNull<u8>) -> Self {
        debug_assert!(is_aligned(address.as_ptr() as usize + WORD));
        Self(address.cast())
    }

    /// Returns the block that owns `address`, where `address` points right
    /// after a valid header:
    ///
    /// ```text
    /// +-------------+
    /// |   Header    | <- Returned block points here.
    /// +-------------+
    /// |   Payload   | <- Given address points here.
    /// +-------------+
    /// ```
    ///
    /// # Safety
    ///
    /// This is mostly used to resolve pointers handed back by the caller for
    /// `free` and `realloc`, so it is only safe if the address is one we
    /// previously returned from an allocation and it hasn't been freed yet.
    #[inline]
    pub unsafe fn from_payload(address: NonNull<u8>) -> Self {
        Self(NonNull::new_unchecked(address.cast::<Tag>().as_ptr().offset(-1)))
    }

    /// Returns the block whose payload hosts the given free list node. See
    /// [`FreeNode`]: the node address and the payload address are the same.
    ///
    /// # Safety
    ///
    /// `node` must live inside the payload of a free block, which is
    /// guaranteed as long as it came out of [`crate::freelist::FreeLists`].
    #[inline]
    pub unsafe fn from_free_node(node: NonNull<FreeNode>) -> Self {
        Self::from_payload(node.cast())
    }

    /// Address of the header word.
    #[inline]
    pub fn header(self) -> NonNull<u8> {
        self.0.cast()
    }

    /// Reads the header word.
    ///
    /// # Safety
    ///
    /// The header must be initialized, see [`Self::from_header`].
    #[inline]
    pub unsafe fn tag(self) -> Tag {
        self.0.as_ptr().read()
    }

    /// Overwrites the header word.
    ///
    /// # Safety
    ///
    /// Same as [`Self::tag`], plus the size stored in `tag` must describe
    /// memory this block actually owns.
    #[inline]
    pub unsafe fn set_tag(self, tag: Tag) {
        self.0.as_ptr().write(tag);
    }

    /// Shorthand for `tag().size()`.
    #[inline]
    pub unsafe fn size(self) -> usize {
        self.tag().size()
    }

    /// First byte after the header. This is the address callers receive and
    /// also where the free list node lives while the block is free.
    #[inline]
    pub unsafe fn payload(self) -> NonNull<u8> {
        NonNull::new_unchecked(self.0.as_ptr().offset(1)).cast()
    }

    /// The free list node stored in this block's payload.
    ///
    /// # Safety
    ///
    /// The block must be free and linked, otherwise the payload bytes are
    /// user data and not a node.
    #[inline]
    pub unsafe fn free_node(self) -> NonNull<FreeNode> {
        self.payload().cast()
    }

    /// The block physically after this one. On the last real block this
    /// yields the epilogue sentinel, never memory past the heap.
    #[inline]
    pub unsafe fn next(self) -> Block {
        let address = self.header().as_ptr().add(self.size());
        Self(NonNull::new_unchecked(address).cast())
    }

    /// Duplicates this block's size and allocation bit into its footer, the
    /// last word of the block. Only free blocks keep a footer (the prologue
    /// sentinel being the one allocated exception), and the stored size is
    /// what lets the right neighbor locate our header when coalescing.
    #[inline]
    pub unsafe fn write_footer(self) {
        let tag = self.tag();
        let footer = self.header().as_ptr().add(tag.size() - WORD).cast::<Tag>();
        footer.write(Tag::footer(tag.size(), tag.is_allocated()));
    }

    /// Reads the footer of the physically previous block, which sits in the
    /// word right before our header.
    ///
    /// # Safety
    ///
    /// Only meaningful when our header says `prev_allocated` is false; an
    /// allocated predecessor has payload there. The word itself is always
    /// readable because the prologue sentinel guarantees a valid footer
    /// exists even for the first real block.
    #[inline]
    pub unsafe fn prev_footer(self) -> Tag {
        debug_assert!(!self.tag().prev_allocated());
        self.0.as_ptr().offset(-1).read()
    }

    /// The block physically before this one, located through its footer.
    ///
    /// # Safety
    ///
    /// Same requirement as [`Self::prev_footer`].
    #[inline]
    pub unsafe fn prev(self) -> Block {
        let address = self.header().as_ptr().sub(self.prev_footer().size());
        Self(NonNull::new_unchecked(address).cast())
    }

    /// Rewrites only the `prev_allocated` bit of the header.
    #[inline]
    pub unsafe fn set_prev_allocated(self, prev_allocated: bool) {
        self.set_tag(self.tag().with_prev_allocated(prev_allocated));
    }
}
