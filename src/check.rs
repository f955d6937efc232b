//! Heap wide consistency verification. In debug builds the [`Arena`] runs
//! [`Arena::check`] at the start and end of every public operation; release
//! builds compile all of this away. A failed assertion here means allocator
//! state was corrupted, either by a bug in the allocator itself or by caller
//! misuse (double free, out of bounds writes), and there is nothing sane
//! left to do but abort.
//!
//! Nothing in this module may allocate: when the allocator is installed as
//! the global allocator, an allocation here would reenter the lock we are
//! holding.

#![cfg(debug_assertions)]

use crate::{
    align::{is_aligned, WORD},
    arena::Arena,
    block::{Block, MIN_BLOCK_SIZE},
    classes::{class_of, CLASS_COUNT},
};

impl Arena {
    /// Walks every block of the heap and every node of every free list,
    /// asserting the structural invariants:
    ///
    /// 1. Blocks tile the heap exactly, from the prologue to the epilogue.
    ///
    /// 2. Every block size is a multiple of the alignment and at least the
    ///    minimum block size; every payload is 16 byte aligned.
    ///
    /// 3. Each header's `prev_allocated` bit agrees with the actual state of
    ///    the block before it.
    ///
    /// 4. No two free blocks are adjacent (coalescing never misses).
    ///
    /// 5. Free block footers mirror their headers.
    ///
    /// 6. Every free block is linked in exactly the list of its size class,
    ///    and the lists contain nothing else.
    pub(crate) unsafe fn check(&self) {
        let Some(region) = &self.region else {
            return;
        };

        let prologue = self.prologue();
        assert_eq!(prologue.size(), 2 * WORD);
        assert!(prologue.tag().is_allocated());

        let epilogue_header = region.hi().as_ptr().sub(WORD - 1);

        let mut block = prologue.next();
        let mut prev_allocated = true;
        let mut free_blocks = 0;

        loop {
            let tag = block.tag();

            if tag.is_epilogue() {
                // (1) the walk must end exactly at the last word.
                assert_eq!(block.header().as_ptr(), epilogue_header);
                assert!(tag.is_allocated());
                assert_eq!(tag.prev_allocated(), prev_allocated);
                break;
            }

            // (2)
            assert!(region.contains(block.header()));
            assert!(tag.size() >= MIN_BLOCK_SIZE);
            assert!(is_aligned(tag.size()));
            assert!(is_aligned(block.payload().as_ptr() as usize));

            // (3)
            assert_eq!(tag.prev_allocated(), prev_allocated);

            if !tag.is_allocated() {
                // (4)
                assert!(prev_allocated, "two adjacent free blocks");

                // (5) the footer is the last word of the block.
                let footer = block
                    .header()
                    .as_ptr()
                    .add(tag.size() - WORD)
                    .cast::<crate::tag::Tag>()
                    .read();
                assert_eq!(footer.size(), tag.size());
                assert!(!footer.is_allocated());

                // (6) linked where the size says it should be.
                assert!(self.free.contains(block.free_node(), class_of(tag.size())));
                free_blocks += 1;
            }

            prev_allocated = tag.is_allocated();
            block = block.next();
        }

        // (6) the other direction: every node resolves to a free, in-heap
        // block of the right class. Equal counts rule out blocks linked in
        // more than one list.
        let mut linked_nodes = 0;
        for class in 0..CLASS_COUNT {
            self.free.for_each_node(class, |node| {
                let block = Block::from_free_node(node);
                assert!(region.contains(node.cast()));
                assert!(is_aligned(node.as_ptr() as usize));
                assert!(!block.tag().is_allocated());
                assert_eq!(class_of(block.size()), class);
                linked_nodes += 1;
            });
        }
        assert_eq!(linked_nodes, free_blocks);
    }
}
