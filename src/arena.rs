use std::ptr::{self, NonNull};

use crate::{
    align::{align_up, ALIGNMENT, WORD},
    block::{Block, MIN_BLOCK_SIZE},
    classes::class_of,
    error::AllocError,
    freelist::FreeLists,
    region::HeapRegion,
    tag::Tag,
};

/// The allocation engine. Owns the heap region and the segregated free list
/// registry and implements the actual policy: first fit placement with
/// splitting, eager coalescing on release, and exact size heap extension on
/// misses. This struct needs `&mut self` for everything and knows nothing
/// about threads; [`crate::Segalloc`] wraps it for the public API.
///
/// The heap is laid out like this from the very first allocation on:
///
/// ```text
///  lo()
///   |  8 bytes   16 bytes    variable size blocks...        1 word
///   v +--------+-----------+---------+---------+--     --+----------+
///     | unused | prologue  |  block  |  block  |   ...   | epilogue |
///     +--------+-----------+---------+---------+--     --+----------+
///                  ^                                          ^
///                  |                                          |
///      permanent allocated sentinel,            size 0 header marking the
///      guarantees the word before the           end; overwritten and moved
///      first real block is a valid footer       every time the heap grows
/// ```
pub(crate) struct Arena {
    /// Lazily created on the first allocation so that [`Arena::new`] can be
    /// `const`.
    pub(crate) region: Option<HeapRegion>,
    pub(crate) free: FreeLists,
}

/// Rounds a request up to the size of the block that can carry it: one word
/// of header plus the payload, aligned, and never below the minimum block
/// size. Absurd requests that would overflow the padding are rejected here
/// instead of wrapping around.
pub(crate) fn padded_block_size(size: usize) -> Result<usize, AllocError> {
    if size > usize::MAX - (WORD + ALIGNMENT - 1) {
        return Err(AllocError::SizeOverflow);
    }

    Ok(align_up(size + WORD).max(MIN_BLOCK_SIZE))
}

impl Arena {
    pub const fn new() -> Self {
        Self {
            region: None,
            free: FreeLists::new(),
        }
    }

    /// Allocates a block that can hold at least `size` bytes and returns its
    /// payload address, 16 byte aligned by construction.
    pub unsafe fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let block_size = padded_block_size(size)?;
        self.init_if_needed()?;

        #[cfg(debug_assertions)]
        self.check();

        let payload = match self.free.take_fit(block_size) {
            Some(node) => self.place(Block::from_free_node(node), block_size),
            None => self.extend(block_size)?,
        };

        #[cfg(debug_assertions)]
        self.check();

        Ok(payload)
    }

    /// Releases an allocated block, merging it with whichever physical
    /// neighbors are free and filing the result back in the registry.
    pub unsafe fn release(&mut self, block: Block) {
        #[cfg(debug_assertions)]
        self.check();

        let tag = block.tag();
        debug_assert!(tag.is_allocated());

        let size = tag.size();
        let next = block.next();

        // The merged block: either this one or, when the left neighbor joins
        // in, the leftmost header of the merge. Neighbors are pulled out of
        // their lists *before* any size changes, while their class can still
        // be derived, and the result is reinserted at the end because
        // coalescing usually changes the size class.
        let coalesced = match (tag.prev_allocated(), next.tag().is_allocated()) {
            // No free neighbor. The block keeps its place, gains a footer
            // and the successor learns that its predecessor is free now.
            (true, true) => {
                block.set_tag(Tag::new(size, true, false));
                block.write_footer();
                next.set_prev_allocated(false);
                block
            }

            // Only the left neighbor is free: grow it over this block. The
            // footer lands where this block's footer would have been.
            (false, true) => {
                let prev = block.prev();
                self.free.remove(prev.free_node(), class_of(prev.size()));

                let merged = Tag::new(
                    prev.size() + size,
                    prev.tag().prev_allocated(),
                    false,
                );
                prev.set_tag(merged);
                prev.write_footer();
                next.set_prev_allocated(false);
                prev
            }

            // Only the right neighbor is free: absorb it. Its successor
            // already knows its predecessor is free, no bit to flip.
            (true, false) => {
                self.free.remove(next.free_node(), class_of(next.size()));

                block.set_tag(Tag::new(size + next.size(), true, false));
                block.write_footer();
                block
            }

            // Both neighbors are free: the left one swallows everything.
            (false, false) => {
                let prev = block.prev();
                self.free.remove(prev.free_node(), class_of(prev.size()));
                self.free.remove(next.free_node(), class_of(next.size()));

                let merged = Tag::new(
                    prev.size() + size + next.size(),
                    prev.tag().prev_allocated(),
                    false,
                );
                prev.set_tag(merged);
                prev.write_footer();
                prev
            }
        };

        self.free.insert(coalesced);

        #[cfg(debug_assertions)]
        self.check();
    }

    /// Reallocation is allocate, copy, release: grab a new block, move as
    /// many payload bytes as both blocks can hold, then free the old one.
    pub unsafe fn reallocate(
        &mut self,
        payload: NonNull<u8>,
        size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let block = Block::from_payload(payload);
        let old_payload_size = block.size() - WORD;

        let new_payload = self.allocate(size)?;
        ptr::copy_nonoverlapping(
            payload.as_ptr(),
            new_payload.as_ptr(),
            old_payload_size.min(size),
        );
        self.release(block);

        Ok(new_payload)
    }

    /// Current heap length in bytes, 0 before the first allocation.
    pub fn heap_size(&self) -> usize {
        self.region.as_ref().map_or(0, |region| region.len())
    }

    /// Carves the requested size out of `block`, which was just unlinked
    /// from its free list. If what remains is big enough to be a block of
    /// its own it becomes a new free block, otherwise the caller simply gets
    /// the whole thing:
    ///
    /// **Before**:
    ///
    /// ```text
    /// +-----------------------------------+
    /// |         free, 128 bytes           |
    /// +-----------------------------------+
    /// ```
    ///
    /// **After** a 48 byte placement:
    ///
    /// ```text
    /// +---------------+-------------------+
    /// | alloc, 48 B   |   free, 80 bytes  |
    /// +---------------+-------------------+
    /// ```
    unsafe fn place(&mut self, block: Block, block_size: usize) -> NonNull<u8> {
        let total = block.size();
        let remainder = total - block_size;
        let prev_allocated = block.tag().prev_allocated();

        if remainder >= MIN_BLOCK_SIZE {
            block.set_tag(Tag::new(block_size, prev_allocated, true));

            // The cut off tail keeps the free state of the original block,
            // so its successor's prev_allocated bit is already correct.
            let rest = block.next();
            rest.set_tag(Tag::new(remainder, true, false));
            rest.write_footer();
            self.free.insert(rest);
        } else {
            block.set_tag(Tag::new(total, prev_allocated, true));
            block.next().set_prev_allocated(true);
        }

        block.payload()
    }

    /// Grows the heap by exactly `block_size` bytes and returns the payload
    /// of the block created in the new space. The old epilogue word becomes
    /// the new block's header, and a fresh epilogue is written at the new
    /// end. The block is handed to the caller directly, already allocated:
    /// no footer, no free list insertion.
    unsafe fn extend(&mut self, block_size: usize) -> Result<NonNull<u8>, AllocError> {
        let region = self.region.as_mut().unwrap_unchecked();

        let epilogue = Block::from_header(NonNull::new_unchecked(
            region.hi().as_ptr().sub(WORD - 1),
        ));
        debug_assert!(epilogue.tag().is_epilogue());
        let prev_allocated = epilogue.tag().prev_allocated();

        let segment = region.sbrk(block_size)?;
        log::debug!(
            "heap grown by {block_size} bytes to {} total",
            region.len()
        );

        // The header goes one word *before* the new segment, right on top of
        // the old epilogue, so the payload starts exactly at the segment.
        let block = Block::from_header(NonNull::new_unchecked(segment.as_ptr().sub(WORD)));
        block.set_tag(Tag::new(block_size, prev_allocated, true));

        let epilogue = Block::from_header(NonNull::new_unchecked(
            segment.as_ptr().add(block_size - WORD),
        ));
        epilogue.set_tag(Tag::epilogue());

        Ok(block.payload())
    }

    /// First use: reserve the region and lay the sentinels down. One word of
    /// padding, then the prologue (an ordinary looking allocated block of
    /// two words with header and footer), then the epilogue header. The
    /// prologue makes the word before any real block a readable footer and
    /// the epilogue terminates forward walks, so neither boundary is ever a
    /// special case again.
    unsafe fn init_if_needed(&mut self) -> Result<(), AllocError> {
        if self.region.is_some() {
            return Ok(());
        }

        let mut region = HeapRegion::new()?;
        let base = region.sbrk(4 * WORD)?;

        let prologue = Block::from_header(NonNull::new_unchecked(base.as_ptr().add(WORD)));
        prologue.set_tag(Tag::new(2 * WORD, false, true));
        prologue.write_footer();

        let epilogue = Block::from_header(NonNull::new_unchecked(base.as_ptr().add(3 * WORD)));
        epilogue.set_tag(Tag::epilogue());

        self.region = Some(region);
        Ok(())
    }

    /// The prologue sentinel, where heap walks start. Only exists after
    /// initialization.
    #[cfg(any(debug_assertions, test))]
    pub(crate) unsafe fn prologue(&self) -> Block {
        let region = self.region.as_ref().unwrap_unchecked();
        Block::from_header(NonNull::new_unchecked(region.lo().as_ptr().add(WORD)))
    }
}
